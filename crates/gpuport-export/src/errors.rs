use std::path::PathBuf;
use thiserror::Error;

/// Construction-time errors for malformed filter clauses, metric specs and
/// output settings.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Operator '{operator}' requires '{operand}' field")]
    MissingOperand {
        operator: &'static str,
        operand: &'static str,
    },

    #[error("Operator '{operator}' requires a numeric '{operand}'")]
    NonNumericOperand {
        operator: &'static str,
        operand: &'static str,
    },

    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Metric '{metric}' of type '{aggregation}' requires 'field' parameter")]
    MissingMetricField {
        metric: String,
        aggregation: &'static str,
    },

    #[error("'{setting}' must be a finite number {bound}, got {value}")]
    OutOfRange {
        setting: &'static str,
        bound: &'static str,
        value: f64,
    },
}

/// Evaluation-time filter errors.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Field '{0}' does not exist on GpuInstance")]
    FieldNotFound(String),

    #[error("Operator '{operator}' requires a {expected} field, but '{field}' is {found}")]
    TypeMismatch {
        field: String,
        operator: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum TransformerError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid CSV option '{option}': {message}")]
    InvalidCsvOption {
        option: &'static str,
        message: String,
    },

    #[error("CSV output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Field '{0}' does not exist on GpuInstance")]
    FieldNotFound(String),

    #[error("Metric '{0}' requires 'field' parameter")]
    MissingMetricField(String),

    #[error("Metric '{metric}' cannot aggregate {found} values with '{aggregation}'")]
    UnsupportedValue {
        metric: String,
        aggregation: &'static str,
        found: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Output directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("File already exists and overwrite is disabled: {0}")]
    FileExists(PathBuf),

    #[error("Unresolved placeholders {placeholders:?} in filename '{filename}'")]
    UnresolvedPlaceholder {
        filename: String,
        placeholders: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Utils(#[from] gpuport_utils::UtilsError),

    #[error("Object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid object storage configuration: {0}")]
    StoreConfig(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Client certificate error: {0}")]
    ClientCertificate(String),

    #[error("Invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("All {failed} batch(es) failed to send")]
    AllBatchesFailed { failed: usize },
}

/// Pipeline-level failures raised before the output loop.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Filter stage failed: {0}")]
    Filter(#[from] FilterError),

    #[error("Transform stage failed: {0}")]
    Transformer(#[from] TransformerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid export configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Environment substitution failed: {0}")]
    Env(#[from] gpuport_utils::UtilsError),

    #[error("Duplicate pipeline name: {0}")]
    DuplicatePipeline(String),
}
