use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::errors::OutputError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("Invalid regex pattern"));

/// Make a metadata value safe to embed in a file name.
///
/// Path separators become `_`, every `..` becomes `__`, and anything outside
/// `[A-Za-z0-9-_.]` becomes `_`.
pub fn sanitize_component(value: &str) -> String {
    value
        .replace(['/', '\\'], "_")
        .replace("..", "__")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn date_placeholders(now: DateTime<Utc>) -> HashMap<&'static str, String> {
    HashMap::from([
        ("date", now.format("%Y-%m-%d").to_string()),
        ("time", now.format("%H-%M-%S").to_string()),
        ("timestamp", now.format("%Y%m%d-%H%M%S").to_string()),
        ("year", now.format("%Y").to_string()),
        ("month", now.format("%m").to_string()),
        ("day", now.format("%d").to_string()),
        ("hour", now.format("%H").to_string()),
        ("minute", now.format("%M").to_string()),
        ("second", now.format("%S").to_string()),
    ])
}

/// Substitute `{name}` placeholders in `pattern`.
///
/// Metadata values are sanitized and take precedence over the date/time
/// placeholders. Any placeholder left unresolved is an error.
pub fn resolve_filename(
    pattern: &str,
    metadata: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Result<String, OutputError> {
    let mut values: HashMap<&str, String> = date_placeholders(now);
    for (key, value) in metadata {
        values.insert(key.as_str(), sanitize_component(value));
    }

    let mut unresolved = Vec::new();
    let filename = PLACEHOLDER.replace_all(pattern, |caps: &regex::Captures| {
        match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                unresolved.push(caps[1].to_string());
                caps[0].to_string()
            }
        }
    });

    if !unresolved.is_empty() {
        return Err(OutputError::UnresolvedPlaceholder {
            filename: filename.into_owned(),
            placeholders: unresolved,
        });
    }

    Ok(filename.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 2).unwrap()
    }

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_component("a\\b"), "a_b");
        assert_eq!(sanitize_component("Run Pod!"), "Run_Pod_");
        assert_eq!(sanitize_component("run-pod_1.2"), "run-pod_1.2");
    }

    #[test]
    fn test_date_placeholders() {
        let name = resolve_filename(
            "{year}/{month}/{day}/{hour}{minute}{second}_{date}_{time}_{timestamp}",
            &HashMap::new(),
            now(),
        )
        .unwrap();
        assert_eq!(
            name,
            "2025/03/07/090502_2025-03-07_09-05-02_20250307-090502"
        );
    }

    #[test]
    fn test_metadata_is_sanitized() {
        let name = resolve_filename(
            "{provider}_data.json",
            &meta(&[("provider", "../../etc/passwd")]),
            now(),
        )
        .unwrap();
        assert_eq!(name, "______etc_passwd_data.json");
    }

    #[test]
    fn test_metadata_overrides_date_keys() {
        let name = resolve_filename("{date}.json", &meta(&[("date", "custom")]), now()).unwrap();
        assert_eq!(name, "custom.json");
    }

    #[test]
    fn test_unresolved_placeholder_fails() {
        let err = resolve_filename("{provider}_{unknown}.json", &meta(&[("provider", "x")]), now())
            .unwrap_err();
        match err {
            OutputError::UnresolvedPlaceholder { placeholders, .. } => {
                assert_eq!(placeholders, vec!["unknown".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
