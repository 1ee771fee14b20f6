//! # GPUPort Export
//!
//! Declarative export pipelines for normalized GPU offers. Each pipeline
//! filters the collected records, renders them as JSON, CSV or a metrics
//! summary, and delivers the payload to local files, S3-compatible object
//! storage or HTTPS endpoints.

pub mod config;
pub mod errors;
pub mod filters;
pub mod loader;
pub mod outputs;
pub mod pipeline;
pub mod transformers;

pub use config::{
    AggregationType, Compression, CredentialRef, CsvTransformerConfig, ExportConfig, HttpMethod,
    HttpsOutputConfig, JsonTransformerConfig, LocalOutputConfig, MetricSpec,
    MetricsTransformerConfig, NullHandling, ObjectStoreOutputConfig, OutputConfig,
    PipelineDefinition, TransformerConfig,
};
pub use errors::*;
pub use filters::{evaluate, evaluate_all, filter_instances, Condition, FilterClause, FilterOperator};
pub use loader::{load_export_config, parse_export_config, validate_config};
pub use outputs::{write_output, HttpSummary, OutputDescriptor};
pub use pipeline::{execute_pipeline, execute_pipelines, OutputOutcome, PipelineResult, StageTimings};
pub use transformers::transform;

// Record types every pipeline consumer needs
pub use gpuport_core::{AvailabilityStatus, GpuInstance};
