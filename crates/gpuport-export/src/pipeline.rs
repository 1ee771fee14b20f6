//! Pipeline executor: filter -> transform -> outputs.
//!
//! A filter or transform failure aborts the pipeline and is reported in
//! [`PipelineResult::error`]. Output failures never abort: each output gets
//! its own [`OutputOutcome`] and the loop moves on.

use gpuport_core::GpuInstance;
use log::{debug, error, info};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::config::PipelineDefinition;
use crate::errors::PipelineError;
use crate::filters::filter_instances;
use crate::outputs::{write_output, OutputDescriptor};
use crate::transformers::transform;

/// Wall-clock time spent in each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub filter: Duration,
    pub transform: Duration,
    pub output: Duration,
    pub total: Duration,
}

/// Result of writing to one configured output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOutcome {
    pub output_type: &'static str,
    pub name: Option<String>,
    pub success: bool,
    pub destination: Option<OutputDescriptor>,
    pub error: Option<String>,
}

/// Outcome of one pipeline run. Built fresh per execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub pipeline_name: String,
    pub enabled: bool,
    pub input_count: usize,
    pub filtered_count: usize,
    pub output_count: usize,
    pub outputs: Vec<OutputOutcome>,
    /// Pipeline-level failure (filter or transform); output failures live in `outputs`.
    pub error: Option<String>,
    pub timings: StageTimings,
}

impl PipelineResult {
    fn skipped(name: &str, input_count: usize) -> Self {
        Self {
            pipeline_name: name.to_string(),
            enabled: false,
            input_count,
            filtered_count: 0,
            output_count: 0,
            outputs: Vec::new(),
            error: None,
            timings: StageTimings::default(),
        }
    }

    /// No pipeline-level error occurred.
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn successful_outputs(&self) -> usize {
        self.outputs.iter().filter(|o| o.success).count()
    }

    pub fn failed_outputs(&self) -> usize {
        self.outputs.iter().filter(|o| !o.success).count()
    }

    /// No pipeline-level error and every output succeeded.
    pub fn is_fully_successful(&self) -> bool {
        self.success() && self.failed_outputs() == 0
    }
}

/// Run one pipeline over `instances`.
pub async fn execute_pipeline(
    instances: &[GpuInstance],
    definition: &PipelineDefinition,
) -> PipelineResult {
    let started = Instant::now();
    debug!(
        "Starting pipeline '{}' with {} instance(s)",
        definition.name,
        instances.len()
    );

    if !definition.enabled {
        debug!("Pipeline '{}' is disabled, skipping", definition.name);
        return PipelineResult::skipped(&definition.name, instances.len());
    }

    let mut result = PipelineResult {
        pipeline_name: definition.name.clone(),
        enabled: true,
        input_count: instances.len(),
        filtered_count: 0,
        output_count: 0,
        outputs: Vec::new(),
        error: None,
        timings: StageTimings::default(),
    };

    let stage = Instant::now();
    let filtered = match filter_instances(instances, &definition.filters) {
        Ok(filtered) => filtered,
        Err(e) => return fail(result, PipelineError::from(e), started),
    };
    result.timings.filter = stage.elapsed();
    result.filtered_count = filtered.len();

    let stage = Instant::now();
    let payload = match transform(&filtered, &definition.transformer) {
        Ok(payload) => payload,
        Err(e) => return fail(result, PipelineError::from(e), started),
    };
    result.timings.transform = stage.elapsed();

    let metadata = output_metadata(definition, &filtered);
    let content_type = definition.transformer.content_type();

    let stage = Instant::now();
    for output in &definition.outputs {
        let outcome = match write_output(&payload, output, &metadata, content_type).await {
            Ok(destination) => {
                debug!(
                    "Pipeline '{}' wrote {} output: {}",
                    definition.name,
                    output.type_name(),
                    destination
                );
                OutputOutcome {
                    output_type: output.type_name(),
                    name: output.name().map(str::to_string),
                    success: true,
                    destination: Some(destination),
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    "Pipeline '{}' failed to write {} output{}: {}",
                    definition.name,
                    output.type_name(),
                    output
                        .name()
                        .map(|n| format!(" '{}'", n))
                        .unwrap_or_default(),
                    e
                );
                OutputOutcome {
                    output_type: output.type_name(),
                    name: output.name().map(str::to_string),
                    success: false,
                    destination: None,
                    error: Some(e.to_string()),
                }
            }
        };
        result.outputs.push(outcome);
    }
    result.timings.output = stage.elapsed();
    result.output_count = result.outputs.len();
    result.timings.total = started.elapsed();

    info!(
        "Completed pipeline '{}' in {:.3}s: {} of {} instance(s), {} output(s) ok, {} failed",
        definition.name,
        result.timings.total.as_secs_f64(),
        result.filtered_count,
        result.input_count,
        result.successful_outputs(),
        result.failed_outputs()
    );
    result
}

fn fail(mut result: PipelineResult, e: PipelineError, started: Instant) -> PipelineResult {
    error!("Pipeline '{}' failed: {}", result.pipeline_name, e);
    result.error = Some(e.to_string());
    result.timings.total = started.elapsed();
    result
}

/// Filename metadata for file-like outputs: pipeline name, payload format and
/// the provider of the filtered records (`mixed` or `none` when not unique).
fn output_metadata(
    definition: &PipelineDefinition,
    filtered: &[&GpuInstance],
) -> HashMap<String, String> {
    let providers: BTreeSet<&str> = filtered.iter().map(|i| i.provider.as_str()).collect();
    let provider = match providers.len() {
        0 => "none".to_string(),
        1 => providers.into_iter().next().unwrap_or("none").to_string(),
        _ => "mixed".to_string(),
    };

    HashMap::from([
        ("pipeline".to_string(), definition.name.clone()),
        (
            "format".to_string(),
            definition.transformer.output_format().to_string(),
        ),
        ("provider".to_string(), provider),
    ])
}

/// Run every pipeline in order. A failing pipeline never stops the next one.
pub async fn execute_pipelines(
    instances: &[GpuInstance],
    definitions: &[PipelineDefinition],
) -> Vec<PipelineResult> {
    let mut results = Vec::with_capacity(definitions.len());
    for definition in definitions {
        results.push(execute_pipeline(instances, definition).await);
    }
    results
}
