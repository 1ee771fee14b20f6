use gpuport_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("Record {index} rejected: {source}")]
    InvalidRecord { index: usize, source: CoreError },

    #[error("{provider} did not respond within {seconds}s")]
    Timeout { provider: String, seconds: u64 },
}

#[derive(Error, Debug)]
pub enum CollectorConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config format: {0}")]
    InvalidFormat(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}
