//! Record -> payload serializers.
//!
//! Each transformer is a pure function over borrowed records; nothing here
//! performs I/O or mutates its input.

mod csv;
mod json;
mod metrics;

pub use self::csv::transform_to_csv;
pub use self::json::transform_to_json;
pub use self::metrics::{transform_to_metrics, transform_to_metrics_at};

use gpuport_core::GpuInstance;
use log::debug;
use std::borrow::Borrow;

use crate::config::TransformerConfig;
use crate::errors::TransformerError;

/// Dispatch to the transformer selected by `config`.
pub fn transform<R: Borrow<GpuInstance>>(
    instances: &[R],
    config: &TransformerConfig,
) -> Result<String, TransformerError> {
    let payload = match config {
        TransformerConfig::Json(c) => transform_to_json(instances, c)?,
        TransformerConfig::Csv(c) => transform_to_csv(instances, c)?,
        TransformerConfig::Metrics(c) => transform_to_metrics(instances, c)?,
    };

    debug!(
        "Transformed {} instance(s) to {} bytes of {}",
        instances.len(),
        payload.len(),
        config.output_format()
    );
    Ok(payload)
}
