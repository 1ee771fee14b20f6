use crate::errors::CollectorConfigError;
use gpuport_utils::RetryPolicy;
use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Timeout and retry settings shared by every collector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Per-attempt timeout in seconds.
    pub timeout: u64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    /// Delay before the first retry, in seconds.
    pub base_delay: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            max_retries: 3,
            backoff_factor: 2.0,
            base_delay: 5.0,
        }
    }
}

impl CollectorConfig {
    /// Load from a YAML file. A missing path means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CollectorConfigError> {
        let Some(path) = path else {
            debug!("No collector config given, using defaults");
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path).map_err(|source| CollectorConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, CollectorConfigError> {
        let config: CollectorConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CollectorConfigError> {
        if !(1..=300).contains(&self.timeout) {
            return Err(invalid("timeout", self.timeout));
        }
        if self.max_retries > 10 {
            return Err(invalid("max_retries", self.max_retries));
        }
        if !(self.backoff_factor > 0.0 && self.backoff_factor.is_finite()) {
            return Err(invalid("backoff_factor", self.backoff_factor));
        }
        if !(self.base_delay > 0.0 && self.base_delay.is_finite()) {
            return Err(invalid("base_delay", self.base_delay));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs_f64(self.base_delay),
            self.backoff_factor,
        )
    }
}

fn invalid(field: &'static str, value: impl ToString) -> CollectorConfigError {
    CollectorConfigError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::load(None).unwrap();
        assert_eq!(config, CollectorConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(30));

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = CollectorConfig::from_yaml("timeout: 60\nbase_delay: 0.5\n").unwrap();
        assert_eq!(config.timeout, 60);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_bounds() {
        for yaml in [
            "timeout: 0",
            "timeout: 301",
            "max_retries: 11",
            "backoff_factor: 0",
            "base_delay: -1.0",
        ] {
            let err = CollectorConfig::from_yaml(yaml).unwrap_err();
            assert!(
                matches!(err, CollectorConfigError::InvalidValue { .. }),
                "{} should be rejected",
                yaml
            );
        }

        assert!(CollectorConfig::from_yaml("timeout: 300\nmax_retries: 0").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_retries: 5").unwrap();
        let config = CollectorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_retries, 5);

        let err = CollectorConfig::load(Some(Path::new("/no/such/collector.yaml"))).unwrap_err();
        assert!(matches!(err, CollectorConfigError::Read { .. }));
    }
}
