//! Collector boundary: anything that can produce normalized GPU offers.

use async_trait::async_trait;
use gpuport_core::GpuInstance;
use gpuport_utils::with_retry;
use log::{debug, info};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::config::CollectorConfig;
use crate::errors::CollectorError;

#[async_trait]
pub trait Collector: Send + Sync {
    /// Provider label attached to every record this collector returns.
    fn provider_name(&self) -> &str;

    async fn fetch_instances(&self) -> Result<Vec<GpuInstance>, CollectorError>;
}

/// Fetch with a per-attempt timeout, retrying on any failure per `config`.
pub async fn fetch_with_retry(
    collector: &dyn Collector,
    config: &CollectorConfig,
) -> Result<Vec<GpuInstance>, CollectorError> {
    let policy = config.retry_policy();
    let timeout = config.timeout();

    let instances = with_retry(&policy, move || async move {
        match tokio::time::timeout(timeout, collector.fetch_instances()).await {
            Ok(result) => result,
            Err(_) => Err(CollectorError::Timeout {
                provider: collector.provider_name().to_string(),
                seconds: config.timeout,
            }),
        }
    })
    .await?;

    info!(
        "Collected {} instance(s) from {}",
        instances.len(),
        collector.provider_name()
    );
    Ok(instances)
}

/// Reads a JSON array of offer records from disk.
///
/// Records without a `provider` key are attributed to this collector's
/// provider. Every record is normalized; the first invalid one fails the fetch.
#[derive(Debug, Clone)]
pub struct JsonFileCollector {
    provider: String,
    path: PathBuf,
}

impl JsonFileCollector {
    pub fn new(provider: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            provider: provider.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Result<Vec<GpuInstance>, CollectorError> {
        let records: Vec<Value> = serde_json::from_str(content)?;
        records
            .into_iter()
            .enumerate()
            .map(|(index, mut record)| {
                let object = record
                    .as_object_mut()
                    .ok_or(CollectorError::NotAnObject { index })?;
                object
                    .entry("provider")
                    .or_insert_with(|| Value::String(self.provider.clone()));

                let instance: GpuInstance = serde_json::from_value(record)?;
                instance
                    .normalized()
                    .map_err(|source| CollectorError::InvalidRecord { index, source })
            })
            .collect()
    }
}

#[async_trait]
impl Collector for JsonFileCollector {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    async fn fetch_instances(&self) -> Result<Vec<GpuInstance>, CollectorError> {
        debug!("Reading offers from {}", self.path.display());
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| CollectorError::Read {
                path: self.path.clone(),
                source,
            })?;
        self.parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuport_core::AvailabilityStatus;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const RECORDS: &str = r#"[
        {
            "instance_type": " 1x-a100 ",
            "accelerator_name": "A100",
            "accelerator_count": 1,
            "region": "US-East",
            "price": 1.2,
            "availability": "High",
            "arch": "  "
        },
        {
            "provider": "Vast",
            "instance_type": "8x-h100",
            "accelerator_name": "H100",
            "accelerator_count": 8,
            "region": "EU",
            "price": 20.0,
            "availability": "Not Available"
        }
    ]"#;

    #[tokio::test]
    async fn test_json_file_collector() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(RECORDS.as_bytes()).unwrap();

        let collector = JsonFileCollector::new("RunPod", file.path());
        let instances = collector.fetch_instances().await.unwrap();

        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].provider, "RunPod");
        assert_eq!(instances[0].instance_type, "1x-a100");
        assert_eq!(instances[0].arch, None);
        assert_eq!(instances[1].provider, "Vast");
        assert_eq!(instances[1].availability, AvailabilityStatus::NotAvailable);
    }

    #[test]
    fn test_invalid_record_reports_index() {
        let collector = JsonFileCollector::new("RunPod", "unused.json");
        let err = collector
            .parse(r#"[{"instance_type":"x","accelerator_name":"A","accelerator_count":1,"region":"US","price":5000,"availability":"Low"}]"#)
            .unwrap_err();
        assert!(matches!(err, CollectorError::InvalidRecord { index: 0, .. }));

        let err = collector.parse("[1]").unwrap_err();
        assert!(matches!(err, CollectorError::NotAnObject { index: 0 }));
    }

    struct FlakyCollector {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Collector for FlakyCollector {
        fn provider_name(&self) -> &str {
            "flaky"
        }

        async fn fetch_instances(&self) -> Result<Vec<GpuInstance>, CollectorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CollectorError::NotAnObject { index: 0 });
            }
            Ok(vec![GpuInstance::new(
                "flaky",
                "t",
                "A100",
                1.0,
                "US",
                1.0,
                AvailabilityStatus::High,
            )])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_retry_recovers() {
        let collector = FlakyCollector {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let config = CollectorConfig {
            base_delay: 1.0,
            ..CollectorConfig::default()
        };

        let instances = fetch_with_retry(&collector, &config).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(collector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_retry_gives_up() {
        let collector = FlakyCollector {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let config = CollectorConfig {
            max_retries: 2,
            ..CollectorConfig::default()
        };

        assert!(fetch_with_retry(&collector, &config).await.is_err());
        assert_eq!(collector.calls.load(Ordering::SeqCst), 3);
    }

    struct SlowCollector;

    #[async_trait]
    impl Collector for SlowCollector {
        fn provider_name(&self) -> &str {
            "slow"
        }

        async fn fetch_instances(&self) -> Result<Vec<GpuInstance>, CollectorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_times_out() {
        let config = CollectorConfig {
            timeout: 1,
            max_retries: 0,
            ..CollectorConfig::default()
        };
        let err = fetch_with_retry(&SlowCollector, &config).await.unwrap_err();
        assert!(matches!(err, CollectorError::Timeout { seconds: 1, .. }));
    }
}
