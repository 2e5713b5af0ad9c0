//! Parser for application log lines.
//!
//! Lines written by the application's logging setup look like
//!
//! ```text
//! 2024-01-01 10:00:00,000 - [INFO] - myapp.worker - (worker.py:42) - Processed batch
//! ```
//!
//! and parse into [`ParsedRecord::Structured`]. Everything else (tracebacks,
//! request lines, raw prints) becomes [`ParsedRecord::Unstructured`] with the
//! payload untouched.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ParsedRecord;

// Free-text fields stop at any line terminator (`\r`, `\n`, U+2028, U+2029)
// and `$` is end of input, so multi-line and CRLF-terminated payloads never
// match. Digits are ASCII only.
static STRUCTURED_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^([0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2},[0-9]{3})",
        r" - \[([^\r\n\x{2028}\x{2029}]+)\]",
        r" - ([A-Za-z0-9_.]+)",
        r" - \(([^\r\n\x{2028}\x{2029}]+):([0-9]+)\)",
        r" - ([^\r\n\x{2028}\x{2029}]*)$",
    ))
    .unwrap_or_else(|_| unreachable!())
});

/// Parses a text payload. Total: every input yields a record.
#[must_use]
pub fn parse_record(text: &str) -> ParsedRecord {
    parse_structured(text).unwrap_or_else(|| ParsedRecord::Unstructured {
        message: text.to_string(),
    })
}

fn parse_structured(text: &str) -> Option<ParsedRecord> {
    let caps = STRUCTURED_LINE_REGEX.captures(text)?;
    let line = caps[5].parse::<u64>().ok()?;

    Some(ParsedRecord::Structured {
        timestamp: caps[1].to_string(),
        severity: caps[2].to_string(),
        module: caps[3].to_string(),
        file: caps[4].to_string(),
        line,
        message: caps[6].trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parses_structured_line() {
        let record = parse_record(
            "2024-01-01 10:00:00,000 - [INFO] - myapp.worker - (worker.py:42) - Processed batch",
        );

        assert_eq!(
            record,
            ParsedRecord::Structured {
                timestamp: "2024-01-01 10:00:00,000".to_string(),
                severity: "INFO".to_string(),
                module: "myapp.worker".to_string(),
                file: "worker.py".to_string(),
                line: 42,
                message: "Processed batch".to_string(),
            }
        );
    }

    #[test]
    fn trims_message() {
        let record = parse_record(
            "2024-01-01 10:00:00,000 - [ERROR] - app - (main.py:7) -    spaced out   ",
        );
        assert_eq!(record.message(), "spaced out");
    }

    #[test]
    fn file_may_contain_colons_and_spaces() {
        let record = parse_record(
            "2024-03-09 23:59:59,999 - [WARNING] - pkg.sub_mod - (C:/src/my file.py:1200) - disk low",
        );

        match record {
            ParsedRecord::Structured { file, line, module, .. } => {
                assert_eq!(file, "C:/src/my file.py");
                assert_eq!(line, 1200);
                assert_eq!(module, "pkg.sub_mod");
            }
            ParsedRecord::Unstructured { .. } => panic!("expected structured record"),
        }
    }

    #[test]
    fn empty_message_is_structured() {
        let record = parse_record("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:1) - ");
        assert!(record.is_structured());
        assert_eq!(record.message(), "");
    }

    #[test_case("Traceback (most recent call last): ..." ; "traceback")]
    #[test_case("GET 200 /healthz" ; "request line")]
    #[test_case("" ; "empty")]
    #[test_case("2024-01-01 10:00:00 - [INFO] - app - (a.py:1) - no millis" ; "missing millis")]
    #[test_case("2024-01-01 10:00:00,000 - INFO - app - (a.py:1) - no brackets" ; "unbracketed severity")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - my-app - (a.py:1) - dash" ; "module with dash")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:x) - bad line" ; "non numeric line")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:1) - first\nsecond" ; "multi line")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:1) - windows\r\n" ; "crlf terminated")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:1) - carriage\rreturn" ; "embedded carriage return")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:1) - para\u{2029}graph" ; "paragraph separator")]
    #[test_case("\u{0662}024-01-01 10:00:00,000 - [INFO] - app - (a.py:1) - arabic digit" ; "non ascii year digit")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:\u{0967}) - devanagari" ; "non ascii line digit")]
    #[test_case("prefix 2024-01-01 10:00:00,000 - [INFO] - app - (a.py:1) - msg" ; "leading text")]
    #[test_case("2024-01-01 10:00:00,000 - [INFO] - app - (a.py:99999999999999999999999) - big" ; "line overflow")]
    fn falls_back_to_unstructured(text: &str) {
        assert_eq!(
            parse_record(text),
            ParsedRecord::Unstructured {
                message: text.to_string()
            }
        );
    }

    #[test]
    fn non_ascii_module_is_unstructured() {
        let text = "2024-01-01 10:00:00,000 - [INFO] - módulo - (a.py:1) - msg";
        assert!(!parse_record(text).is_structured());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn structured_lines_round_trip_fields(
                severity in "[A-Z]{1,10}",
                module in "[a-z_]{1,8}(\\.[a-z_]{1,8}){0,3}",
                file in "[a-z_]{1,12}\\.py",
                line in 0u64..1_000_000,
                message in "[ -~]{0,60}",
            ) {
                let text = format!(
                    "2024-05-17 08:15:30,421 - [{severity}] - {module} - ({file}:{line}) - {message}"
                );

                match parse_record(&text) {
                    ParsedRecord::Structured { severity: s, module: m, file: f, line: l, message: msg, .. } => {
                        prop_assert_eq!(s, severity);
                        prop_assert_eq!(m, module);
                        prop_assert_eq!(f, file);
                        prop_assert_eq!(l, line);
                        prop_assert_eq!(msg, message.trim().to_string());
                    }
                    ParsedRecord::Unstructured { .. } => prop_assert!(false, "expected structured: {}", text),
                }
            }

            #[test]
            fn unstructured_is_stable(text in "\\PC{0,80}") {
                if let ParsedRecord::Unstructured { message } = parse_record(&text) {
                    prop_assert_eq!(&message, &text);
                    prop_assert_eq!(parse_record(&message), ParsedRecord::Unstructured { message: text.clone() });
                }
            }

            #[test]
            fn never_panics(text in any::<String>()) {
                let _ = parse_record(&text);
            }
        }
    }
}
