//! YAML loading and advisory validation for export configurations.

use gpuport_core::GpuInstance;
use gpuport_utils::substitute_env_vars;
use log::{debug, warn};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::{ExportConfig, OutputConfig, PipelineDefinition, TransformerConfig};
use crate::errors::ConfigError;

/// Load an export configuration file.
pub fn load_export_config(path: impl AsRef<Path>) -> Result<ExportConfig, ConfigError> {
    let path = path.as_ref();
    debug!("Loading export configuration from {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_export_config(&content)
}

/// Parse YAML text, substituting `${VAR}` in string values first.
///
/// HTTPS `headers` maps are left raw; they are substituted once when the
/// request is built.
pub fn parse_export_config(content: &str) -> Result<ExportConfig, ConfigError> {
    let raw: Value = serde_yaml::from_str(content)?;
    let substituted = substitute_values(raw)?;
    let config: ExportConfig = serde_yaml::from_value(substituted)?;

    let mut seen = HashSet::new();
    for pipeline in &config.pipelines {
        if !seen.insert(pipeline.name.as_str()) {
            return Err(ConfigError::DuplicatePipeline(pipeline.name.clone()));
        }
    }

    debug!("Loaded {} pipeline(s)", config.pipelines.len());
    Ok(config)
}

const HEADERS_KEY: &str = "headers";

fn substitute_values(value: Value) -> Result<Value, ConfigError> {
    Ok(match value {
        Value::String(s) => Value::String(substitute_env_vars(&s)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(substitute_values)
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(mapping) => {
            let mut out = serde_yaml::Mapping::with_capacity(mapping.len());
            for (key, value) in mapping {
                let value = if key.as_str() == Some(HEADERS_KEY) {
                    value
                } else {
                    substitute_values(value)?
                };
                out.insert(key, value);
            }
            Value::Mapping(out)
        }
        Value::Tagged(mut tagged) => {
            tagged.value = substitute_values(tagged.value)?;
            Value::Tagged(tagged)
        }
        other => other,
    })
}

/// Non-fatal configuration issues worth surfacing to the operator.
pub fn validate_config(config: &ExportConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    for pipeline in &config.pipelines {
        if pipeline.enabled && pipeline.outputs.is_empty() {
            warnings.push(format!(
                "Pipeline '{}' is enabled but has no output destinations",
                pipeline.name
            ));
        }

        for (field, usage) in referenced_fields(pipeline) {
            if !GpuInstance::has_field(field) {
                warnings.push(format!(
                    "Pipeline '{}': {} references unknown field '{}'",
                    pipeline.name, usage, field
                ));
            }
        }

        for output in &pipeline.outputs {
            match output {
                OutputConfig::Local(local) => {
                    if local.path.is_relative() && !local.create_dirs {
                        warnings.push(format!(
                            "Pipeline '{}': Local output path '{}' is relative and create_dirs=false - may fail if directory doesn't exist",
                            pipeline.name,
                            local.path.display()
                        ));
                    }
                }
                OutputConfig::ObjectStore(store) => {
                    if store.credentials.is_none() {
                        warnings.push(format!(
                            "Pipeline '{}': S3 output has no credentials configured - will rely on environment/IAM role",
                            pipeline.name
                        ));
                    }
                }
                OutputConfig::Https(https) => match url::Url::parse(&https.url) {
                    Ok(url) if url.scheme() == "https" => {}
                    Ok(url) => warnings.push(format!(
                        "Pipeline '{}': HTTPS output URL uses '{}' instead of https",
                        pipeline.name,
                        url.scheme()
                    )),
                    Err(e) => warnings.push(format!(
                        "Pipeline '{}': HTTPS output URL '{}' is invalid: {}",
                        pipeline.name, https.url, e
                    )),
                },
            }
        }
    }

    for message in &warnings {
        warn!("{}", message);
    }
    warnings
}

/// Record attributes named by a pipeline's filters and transformer.
fn referenced_fields(pipeline: &PipelineDefinition) -> Vec<(&str, &'static str)> {
    let mut fields: Vec<(&str, &'static str)> = pipeline
        .filters
        .iter()
        .map(|clause| (clause.field.as_str(), "filter"))
        .collect();

    match &pipeline.transformer {
        TransformerConfig::Json(json) => {
            if let Some(map) = &json.fields {
                fields.extend(map.keys().map(|k| (k.as_str(), "JSON transformer")));
            }
        }
        TransformerConfig::Csv(csv) => {
            fields.extend(csv.fields.keys().map(|k| (k.as_str(), "CSV transformer")));
        }
        TransformerConfig::Metrics(metrics) => {
            for metric in &metrics.metrics {
                fields.extend(metric.field.as_deref().map(|f| (f, "metric")));
                fields.extend(metric.group_by.as_deref().map(|f| (f, "metric group_by")));
            }
        }
    }
    fields
}
