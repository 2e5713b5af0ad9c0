//! Upstream query predicates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};

/// The query predicate selecting which upstream entries a tail delivers.
///
/// Built once at startup and never changed afterwards; every source opened by
/// the process (the shared persistent tail and each legacy request) uses the
/// same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Every log line of one Cloud Run service: requests, stdout and stderr.
    Service {
        /// Cloud Run service name.
        service_name: String,
    },
    /// Request logs only, across every service in the project.
    Requests {
        /// GCP project identifier.
        project_id: String,
    },
}

impl FilterSpec {
    /// Builds the filter for a project, scoped to a service when one is named.
    ///
    /// An absent or blank service name falls back to the request-only filter.
    pub fn from_config(project_id: &str, service_name: Option<&str>) -> Result<Self> {
        let project_id = validate("project id", project_id)?;
        match service_name.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => Self::service(name),
            None => Ok(Self::Requests {
                project_id: project_id.to_string(),
            }),
        }
    }

    /// Filter for every log line of one Cloud Run service.
    pub fn service(service_name: &str) -> Result<Self> {
        let service_name = validate("service name", service_name)?;
        Ok(Self::Service {
            service_name: service_name.to_string(),
        })
    }

    /// Filter for request logs across the project.
    pub fn requests(project_id: &str) -> Result<Self> {
        let project_id = validate("project id", project_id)?;
        Ok(Self::Requests {
            project_id: project_id.to_string(),
        })
    }

    /// Returns the Cloud Logging filter expression.
    #[must_use]
    pub fn expression(&self) -> String {
        match self {
            Self::Service { service_name } => format!(
                r#"resource.type="cloud_run_revision" AND resource.labels.service_name="{service_name}""#
            ),
            Self::Requests { project_id } => format!(
                r#"logName="projects/{project_id}/logs/run.googleapis.com%2Frequests""#
            ),
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}

/// Returns the project-scoped resource name tail queries are issued against.
#[must_use]
pub fn resource_name(project_id: &str) -> String {
    format!("projects/{project_id}")
}

fn validate<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LogError::MissingValue(field));
    }
    if let Some(bad) = value.chars().find(|c| matches!(c, '"' | '\\') || c.is_control()) {
        return Err(LogError::InvalidValue {
            field,
            reason: format!("contains forbidden character {bad:?}"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_filter_expression() {
        let filter = FilterSpec::service("checkout").unwrap();
        assert_eq!(
            filter.expression(),
            r#"resource.type="cloud_run_revision" AND resource.labels.service_name="checkout""#
        );
    }

    #[test]
    fn requests_filter_expression() {
        let filter = FilterSpec::requests("acme-prod").unwrap();
        assert_eq!(
            filter.expression(),
            r#"logName="projects/acme-prod/logs/run.googleapis.com%2Frequests""#
        );
    }

    #[test]
    fn from_config_prefers_service() {
        let filter = FilterSpec::from_config("acme-prod", Some("checkout")).unwrap();
        assert!(matches!(filter, FilterSpec::Service { ref service_name } if service_name == "checkout"));
    }

    #[test]
    fn from_config_falls_back_to_requests() {
        let filter = FilterSpec::from_config("acme-prod", None).unwrap();
        assert!(matches!(filter, FilterSpec::Requests { .. }));

        let filter = FilterSpec::from_config("acme-prod", Some("   ")).unwrap();
        assert!(matches!(filter, FilterSpec::Requests { .. }));
    }

    #[test]
    fn from_config_requires_project() {
        let err = FilterSpec::from_config("", Some("checkout")).unwrap_err();
        assert!(matches!(err, LogError::MissingValue("project id")));
    }

    #[test]
    fn rejects_quotes_in_service_name() {
        let err = FilterSpec::service(r#"evil" OR true"#).unwrap_err();
        assert!(matches!(err, LogError::InvalidValue { field: "service name", .. }));
    }

    #[test]
    fn display_matches_expression() {
        let filter = FilterSpec::service("api").unwrap();
        assert_eq!(filter.to_string(), filter.expression());
    }

    #[test]
    fn resource_name_is_project_scoped() {
        assert_eq!(resource_name("acme-prod"), "projects/acme-prod");
    }
}
