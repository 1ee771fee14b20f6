use chrono::{DateTime, Utc};
use gpuport_core::{FieldValue, GpuInstance};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::borrow::Borrow;
use std::collections::HashSet;

use crate::config::{AggregationType, MetricSpec, MetricsTransformerConfig};
use crate::errors::TransformerError;

/// Aggregate records into a metrics document, stamped with the current time.
pub fn transform_to_metrics<R: Borrow<GpuInstance>>(
    instances: &[R],
    config: &MetricsTransformerConfig,
) -> Result<String, TransformerError> {
    transform_to_metrics_at(instances, config, Utc::now())
}

/// Aggregate records into a metrics document stamped with `now`.
pub fn transform_to_metrics_at<R: Borrow<GpuInstance>>(
    instances: &[R],
    config: &MetricsTransformerConfig,
    now: DateTime<Utc>,
) -> Result<String, TransformerError> {
    let records: Vec<&GpuInstance> = instances.iter().map(Borrow::borrow).collect();
    let stamp = now.to_rfc3339();

    let mut document = Map::new();
    if config.include_timestamp {
        document.insert("timestamp".to_string(), Value::String(stamp.clone()));
    }
    if config.include_collection_info {
        document.insert(
            "collection_info".to_string(),
            json!({
                "total_instances": records.len(),
                "collected_at": stamp,
            }),
        );
    }

    let mut metrics = Map::new();
    for spec in &config.metrics {
        let value = match &spec.group_by {
            Some(group_by) => grouped_metric(&records, spec, group_by)?,
            None => metric(&records, spec)?,
        };
        metrics.insert(spec.name.clone(), value);
    }
    document.insert("metrics".to_string(), Value::Object(metrics));

    Ok(serde_json::to_string_pretty(&document)?)
}

/// Partition by the display form of `group_by`; null values land under `"null"`.
fn grouped_metric(
    records: &[&GpuInstance],
    spec: &MetricSpec,
    group_by: &str,
) -> Result<Value, TransformerError> {
    let mut groups: IndexMap<String, Vec<&GpuInstance>> = IndexMap::new();
    for record in records {
        let key = record
            .field(group_by)
            .map_err(|_| TransformerError::FieldNotFound(group_by.to_string()))?
            .to_string();
        groups.entry(key).or_default().push(*record);
    }

    let mut result = Map::new();
    for (key, members) in groups {
        result.insert(key, metric(&members, spec)?);
    }
    Ok(Value::Object(result))
}

fn metric(records: &[&GpuInstance], spec: &MetricSpec) -> Result<Value, TransformerError> {
    if spec.aggregation == AggregationType::Count {
        return Ok(Value::from(records.len()));
    }

    let field = spec
        .field
        .as_deref()
        .ok_or_else(|| TransformerError::MissingMetricField(spec.name.clone()))?;

    let mut values = Vec::with_capacity(records.len());
    for record in records {
        let value = record
            .field(field)
            .map_err(|_| TransformerError::FieldNotFound(field.to_string()))?;
        if !value.is_null() {
            values.push(value);
        }
    }

    if values.is_empty() {
        return Ok(match spec.aggregation {
            AggregationType::Unique => Value::from(0),
            _ => Value::Null,
        });
    }

    match spec.aggregation {
        AggregationType::Count => Ok(Value::from(records.len())),
        AggregationType::Avg => {
            let numbers = numbers(spec, &values)?;
            Ok(json!(numbers.iter().sum::<f64>() / numbers.len() as f64))
        }
        AggregationType::Sum => {
            if let Some(ints) = integers(&values) {
                return Ok(Value::from(ints.iter().sum::<i64>()));
            }
            Ok(json!(numbers(spec, &values)?.iter().sum::<f64>()))
        }
        AggregationType::Min => extreme(spec, &values, false),
        AggregationType::Max => extreme(spec, &values, true),
        AggregationType::Unique => {
            let distinct: HashSet<String> = values.iter().map(ToString::to_string).collect();
            Ok(Value::from(distinct.len()))
        }
    }
}

fn numbers(spec: &MetricSpec, values: &[FieldValue<'_>]) -> Result<Vec<f64>, TransformerError> {
    values
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| unsupported(spec, v)))
        .collect()
}

fn integers(values: &[FieldValue<'_>]) -> Option<Vec<i64>> {
    values
        .iter()
        .map(|v| match v {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        })
        .collect()
}

/// Min or max over homogeneous numbers or strings, returning the original value.
fn extreme(
    spec: &MetricSpec,
    values: &[FieldValue<'_>],
    pick_max: bool,
) -> Result<Value, TransformerError> {
    let Some((first, rest)) = values.split_first() else {
        return Ok(Value::Null);
    };

    if values.iter().all(|v| v.as_f64().is_some()) {
        let mut best = first;
        let mut best_number = first.as_f64().unwrap_or_default();
        for value in rest {
            let number = value.as_f64().unwrap_or_default();
            if (pick_max && number > best_number) || (!pick_max && number < best_number) {
                best = value;
                best_number = number;
            }
        }
        return Ok(best.to_json());
    }

    if let Some(texts) = values.iter().map(FieldValue::as_str).collect::<Option<Vec<_>>>() {
        let best = if pick_max {
            texts.into_iter().max()
        } else {
            texts.into_iter().min()
        };
        return Ok(best.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null));
    }

    let offending = values.iter().find(|v| v.as_str().is_none()).unwrap_or(first);
    Err(unsupported(spec, offending))
}

fn unsupported(spec: &MetricSpec, value: &FieldValue<'_>) -> TransformerError {
    TransformerError::UnsupportedValue {
        metric: spec.name.clone(),
        aggregation: spec.aggregation.as_str(),
        found: value.type_name(),
    }
}
