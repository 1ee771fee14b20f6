//! Output connectors: local filesystem, S3-compatible object storage and
//! HTTPS endpoints.

mod filename;
mod https;
mod local;
mod object_storage;

pub use filename::{resolve_filename, sanitize_component};
pub use https::{build_headers, write_https, HttpSummary};
pub use local::{write_local, write_local_at};
pub use object_storage::{build_store, object_key, put_object, write_object_store};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::config::OutputConfig;
use crate::errors::OutputError;

/// Where a successful write ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputDescriptor {
    File(PathBuf),
    Object { bucket: String, key: String },
    Http(HttpSummary),
}

impl fmt::Display for OutputDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputDescriptor::File(path) => write!(f, "{}", path.display()),
            OutputDescriptor::Object { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
            OutputDescriptor::Http(summary) => write!(
                f,
                "{} item(s), {}/{} batch(es) ok, {} request(s)",
                summary.total_items,
                summary.successful_requests,
                summary.successful_requests + summary.failed_requests,
                summary.total_requests
            ),
        }
    }
}

/// Deliver `payload` to one configured output.
///
/// `metadata` feeds the filename placeholders of file-like outputs;
/// `content_type` labels uploaded objects.
pub async fn write_output(
    payload: &str,
    config: &OutputConfig,
    metadata: &HashMap<String, String>,
    content_type: &str,
) -> Result<OutputDescriptor, OutputError> {
    match config {
        OutputConfig::Local(c) => write_local(payload, c, metadata).map(OutputDescriptor::File),
        OutputConfig::ObjectStore(c) => {
            let key = write_object_store(payload, c, metadata, content_type).await?;
            Ok(OutputDescriptor::Object {
                bucket: c.bucket.clone(),
                key,
            })
        }
        OutputConfig::Https(c) => write_https(payload, c).await.map(OutputDescriptor::Http),
    }
}
