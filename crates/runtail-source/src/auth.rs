//! Access tokens for the Cloud Logging API.
//!
//! Three credential sources are supported:
//! - a service account key file, exchanged through the RS256 JWT bearer grant
//! - the GCE / Cloud Run metadata server (the default on Google infrastructure)
//! - a fixed token, for local runs with `gcloud auth print-access-token`

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{SourceError, SourceResult};

/// Read-only scope for Cloud Logging.
pub const LOGGING_READ_SCOPE: &str = "https://www.googleapis.com/auth/logging.read";

/// Token endpoint used when a key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Metadata server token endpoint for the default service account.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for self-signed grant assertions.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens closer than this to expiry are refreshed.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service account key file the grant needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account email, used as the assertion issuer.
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    /// Key id, sent as the JWT `kid`.
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// OAuth2 token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    /// Parses a key from the JSON of a downloaded key file.
    pub fn from_json(json: &str) -> SourceResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SourceError::Credentials(format!("invalid service account key: {e}")))
    }

    /// Reads and parses a key file.
    pub fn from_file(path: &Path) -> SourceResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SourceError::Credentials(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Signs the grant assertion exchanged for an access token.
    pub fn assertion(&self, scope: &str, now: DateTime<Utc>) -> SourceResult<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| SourceError::Credentials(format!("invalid private key: {e}")))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.private_key_id);

        let iat = now.timestamp();
        let claims = GrantClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        encode(&header, &claims, &key)
            .map_err(|e| SourceError::Credentials(format!("cannot sign assertion: {e}")))
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Where access tokens come from.
#[derive(Clone)]
pub enum Credentials {
    /// Service account key, exchanged via the JWT bearer grant.
    ServiceAccount(ServiceAccountKey),
    /// Metadata server of the machine we run on.
    Metadata {
        /// Token endpoint.
        url: String,
    },
    /// A fixed bearer token.
    Static(String),
}

impl Credentials {
    /// Metadata server credentials at the standard endpoint.
    #[must_use]
    pub fn metadata() -> Self {
        Self::Metadata {
            url: METADATA_TOKEN_URL.to_string(),
        }
    }

    /// Key file credentials when a path is given, metadata server otherwise.
    pub fn from_key_path(path: Option<&Path>) -> SourceResult<Self> {
        match path {
            Some(path) => Ok(Self::ServiceAccount(ServiceAccountKey::from_file(path)?)),
            None => Ok(Self::metadata()),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ServiceAccount(_) => "service_account",
            Self::Metadata { .. } => "metadata",
            Self::Static(_) => "static",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
            Self::Metadata { url } => f.debug_struct("Metadata").field("url", url).finish(),
            Self::Static(_) => f.debug_tuple("Static").field(&"[REDACTED]").finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Hands out access tokens, refreshing them shortly before they expire.
#[derive(Debug)]
pub struct TokenProvider {
    credentials: Credentials,
    scope: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Creates a provider requesting the Cloud Logging read scope.
    #[must_use]
    pub fn new(credentials: Credentials, http: reqwest::Client) -> Self {
        Self {
            credentials,
            scope: LOGGING_READ_SCOPE.to_string(),
            http,
            cached: Mutex::new(None),
        }
    }

    /// Returns the credentials in use.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns a token valid for at least the refresh margin.
    pub async fn token(&self) -> SourceResult<String> {
        if let Credentials::Static(token) = &self.credentials {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached
            .as_ref()
            .filter(|t| t.expires_at > Instant::now() + REFRESH_MARGIN)
        {
            return Ok(token.value.clone());
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drops the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch(&self) -> SourceResult<CachedToken> {
        let response = match &self.credentials {
            Credentials::ServiceAccount(key) => {
                let assertion = key.assertion(&self.scope, Utc::now())?;
                self.http
                    .post(&key.token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
                    .send()
                    .await?
            }
            Credentials::Metadata { url } => {
                self.http
                    .get(url)
                    .query(&[("scopes", self.scope.as_str())])
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
            }
            Credentials::Static(token) => {
                return Ok(CachedToken {
                    value: token.clone(),
                    expires_at: Instant::now() + Duration::from_secs(86_400),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!("{status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        debug!(
            credentials = self.credentials.kind(),
            expires_in_secs = lifetime.as_secs(),
            "obtained access token"
        );

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}
