//! Typed export configuration.
//!
//! These types mirror the YAML surface one to one. Transformer and output
//! configs are tagged unions so the executor dispatches with an exhaustive
//! `match`.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::errors::ValidationError;
use crate::filters::FilterClause;

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Root of an export configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_version")]
    pub version: String,
    pub pipelines: Vec<PipelineDefinition>,
}

/// One named filter -> transform -> outputs pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    pub transformer: TransformerConfig,
    pub outputs: Vec<OutputConfig>,
}

impl PipelineDefinition {
    pub fn new(
        name: impl Into<String>,
        transformer: TransformerConfig,
        outputs: Vec<OutputConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            filters: Vec::new(),
            transformer,
            outputs,
        }
    }
}

// ---------------------------------------------------------------------------
// Transformers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum TransformerConfig {
    Json(JsonTransformerConfig),
    Csv(CsvTransformerConfig),
    Metrics(MetricsTransformerConfig),
}

impl TransformerConfig {
    /// File extension / `{format}` placeholder value for the payload.
    pub fn output_format(&self) -> &'static str {
        match self {
            TransformerConfig::Json(_) | TransformerConfig::Metrics(_) => "json",
            TransformerConfig::Csv(_) => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            TransformerConfig::Json(_) | TransformerConfig::Metrics(_) => "application/json",
            TransformerConfig::Csv(_) => "text/csv",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullHandling {
    Omit,
    #[default]
    Null,
    Empty,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonTransformerConfig {
    /// Source field -> output alias. When set, only these fields are emitted.
    #[serde(default)]
    pub fields: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub include_raw_data: bool,
    #[serde(default)]
    pub pretty_print: bool,
    #[serde(default)]
    pub null_handling: NullHandling,
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_quote_char() -> String {
    "\"".to_string()
}

fn default_escape_char() -> String {
    "\\".to_string()
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvTransformerConfig {
    /// Source field -> column header, in column order.
    pub fields: IndexMap<String, String>,
    #[serde(default = "default_true")]
    pub include_headers: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_quote_char")]
    pub quote_char: String,
    #[serde(default = "default_escape_char")]
    pub escape_char: String,
    #[serde(default = "default_true")]
    pub double_quote: bool,
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    #[serde(default)]
    pub null_value: String,
}

impl CsvTransformerConfig {
    pub fn new(fields: IndexMap<String, String>) -> Self {
        Self {
            fields,
            include_headers: true,
            delimiter: default_delimiter(),
            quote_char: default_quote_char(),
            escape_char: default_escape_char(),
            double_quote: true,
            line_terminator: default_line_terminator(),
            null_value: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Count,
    Avg,
    Min,
    Max,
    Sum,
    Unique,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Count => "count",
            AggregationType::Avg => "avg",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::Sum => "sum",
            AggregationType::Unique => "unique",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricSpecRaw {
    pub name: String,
    #[serde(rename = "type")]
    pub aggregation: AggregationType,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub group_by: Option<String>,
}

/// A named aggregation. Every type except `count` carries a source field.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "MetricSpecRaw")]
pub struct MetricSpec {
    pub name: String,
    pub aggregation: AggregationType,
    pub field: Option<String>,
    pub group_by: Option<String>,
}

impl TryFrom<MetricSpecRaw> for MetricSpec {
    type Error = ValidationError;

    fn try_from(raw: MetricSpecRaw) -> Result<Self, Self::Error> {
        if raw.aggregation != AggregationType::Count && raw.field.is_none() {
            return Err(ValidationError::MissingMetricField {
                metric: raw.name,
                aggregation: raw.aggregation.as_str(),
            });
        }
        Ok(MetricSpec {
            name: raw.name,
            aggregation: raw.aggregation,
            field: raw.field,
            group_by: raw.group_by,
        })
    }
}

impl MetricSpec {
    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aggregation: AggregationType::Count,
            field: None,
            group_by: None,
        }
    }

    pub fn new(
        name: impl Into<String>,
        aggregation: AggregationType,
        field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            aggregation,
            field: Some(field.into()),
            group_by: None,
        }
    }

    pub fn grouped_by(mut self, field: impl Into<String>) -> Self {
        self.group_by = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsTransformerConfig {
    pub metrics: Vec<MetricSpec>,
    #[serde(default = "default_true")]
    pub include_timestamp: bool,
    #[serde(default = "default_true")]
    pub include_collection_info: bool,
}

impl MetricsTransformerConfig {
    pub fn new(metrics: Vec<MetricSpec>) -> Self {
        Self {
            metrics,
            include_timestamp: true,
            include_collection_info: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    Local(LocalOutputConfig),
    #[serde(rename = "s3")]
    ObjectStore(ObjectStoreOutputConfig),
    Https(HttpsOutputConfig),
}

impl OutputConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            OutputConfig::Local(_) => "local",
            OutputConfig::ObjectStore(_) => "s3",
            OutputConfig::Https(_) => "https",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            OutputConfig::Local(c) => c.name.as_deref(),
            OutputConfig::ObjectStore(c) => c.name.as_deref(),
            OutputConfig::Https(c) => c.name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

fn default_local_pattern() -> String {
    "{provider}_{date}_{time}.{format}".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalOutputConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
    #[serde(default = "default_local_pattern")]
    pub filename_pattern: String,
    #[serde(default = "default_true")]
    pub create_dirs: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub compression: Compression,
}

impl LocalOutputConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            path: path.into(),
            filename_pattern: default_local_pattern(),
            create_dirs: true,
            overwrite: false,
            compression: Compression::None,
        }
    }
}

fn default_object_pattern() -> String {
    "{provider}_{timestamp}.{format}".to_string()
}

fn default_storage_class() -> String {
    "STANDARD".to_string()
}

fn default_acl() -> String {
    "private".to_string()
}

fn default_access_key_env() -> String {
    "AWS_ACCESS_KEY_ID".to_string()
}

fn default_secret_key_env() -> String {
    "AWS_SECRET_ACCESS_KEY".to_string()
}

/// Names of the environment variables holding explicit credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialRef {
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default)]
    pub session_token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreOutputConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_object_pattern")]
    pub filename_pattern: String,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub credentials: Option<CredentialRef>,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    #[serde(default)]
    pub server_side_encryption: Option<String>,
    #[serde(default = "default_acl")]
    pub acl: String,
    #[serde(default)]
    pub metadata: Option<IndexMap<String, String>>,
}

impl ObjectStoreOutputConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            name: None,
            bucket: bucket.into(),
            prefix: String::new(),
            region: None,
            endpoint_url: None,
            filename_pattern: default_object_pattern(),
            compression: Compression::None,
            credentials: None,
            storage_class: default_storage_class(),
            server_side_encryption: None,
            acl: default_acl(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    5.0
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_retry_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn checked_setting<'de, D>(
    deserializer: D,
    setting: &'static str,
    bound: &'static str,
    valid: fn(f64) -> bool,
) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() && valid(value) {
        Ok(value)
    } else {
        Err(D::Error::custom(ValidationError::OutOfRange {
            setting,
            bound,
            value,
        }))
    }
}

fn batch_delay<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    checked_setting(deserializer, "batch_delay", ">= 0", |v| v >= 0.0)
}

fn retry_delay<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    checked_setting(deserializer, "retry_delay", ">= 0", |v| v >= 0.0)
}

fn retry_backoff<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    checked_setting(deserializer, "retry_backoff", "> 0", |v| v > 0.0)
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpsOutputConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Values may reference `${VAR}` environment variables.
    #[serde(default)]
    pub headers: Option<IndexMap<String, String>>,
    /// Items per request; unset sends everything in one request.
    #[serde(default)]
    pub batch_size: Option<NonZeroUsize>,
    /// Seconds to wait between batches.
    #[serde(default, deserialize_with = "batch_delay")]
    pub batch_delay: f64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay", deserialize_with = "retry_delay")]
    pub retry_delay: f64,
    #[serde(default = "default_retry_backoff", deserialize_with = "retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_retry_statuses")]
    pub retry_on_status: Vec<u16>,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
}

impl HttpsOutputConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
            method: HttpMethod::Post,
            headers: None,
            batch_size: None,
            batch_delay: 0.0,
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            retry_backoff: default_retry_backoff(),
            retry_on_status: default_retry_statuses(),
            verify_ssl: true,
            client_cert: None,
            client_key: None,
        }
    }
}
