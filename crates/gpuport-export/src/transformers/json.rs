use gpuport_core::{FieldValue, GpuInstance, FIELD_NAMES};
use serde_json::{Map, Value};
use std::borrow::Borrow;

use crate::config::{JsonTransformerConfig, NullHandling};
use crate::errors::TransformerError;

/// Serialize records as a JSON array of flat objects.
pub fn transform_to_json<R: Borrow<GpuInstance>>(
    instances: &[R],
    config: &JsonTransformerConfig,
) -> Result<String, TransformerError> {
    let rows: Vec<Value> = instances
        .iter()
        .map(|instance| Value::Object(project(instance.borrow(), config)))
        .collect();

    let payload = if config.pretty_print {
        serde_json::to_string_pretty(&rows)?
    } else {
        serde_json::to_string(&rows)?
    };
    Ok(payload)
}

fn project(instance: &GpuInstance, config: &JsonTransformerConfig) -> Map<String, Value> {
    let mut row = Map::new();

    match &config.fields {
        // The rename map is an exhaustive selection; raw_data never rides along.
        Some(fields) => {
            for (source, alias) in fields {
                if source == "raw_data" {
                    continue;
                }
                if let Ok(value) = instance.field(source) {
                    insert(&mut row, alias, &value, config.null_handling);
                }
            }
        }
        None => {
            for name in FIELD_NAMES {
                if *name == "raw_data" && !config.include_raw_data {
                    continue;
                }
                if let Ok(value) = instance.field(name) {
                    insert(&mut row, name, &value, config.null_handling);
                }
            }
        }
    }

    row
}

fn insert(row: &mut Map<String, Value>, key: &str, value: &FieldValue<'_>, nulls: NullHandling) {
    if !value.is_null() {
        row.insert(key.to_string(), value.to_json());
        return;
    }
    match nulls {
        NullHandling::Omit => {}
        NullHandling::Null => {
            row.insert(key.to_string(), Value::Null);
        }
        NullHandling::Empty => {
            row.insert(key.to_string(), Value::String(String::new()));
        }
    }
}
