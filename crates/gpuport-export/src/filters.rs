//! Predicate filter engine.
//!
//! A pipeline's filters are a conjunction of [`FilterClause`]s. Clauses are
//! validated when they are built (or deserialized), so evaluation only fails
//! on record-dependent problems: an unknown field or a wrong field type.

use gpuport_core::{FieldValue, GpuInstance};
use log::debug;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{FilterError, ValidationError};

/// Comparison operator token as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    In,
    NotIn,
    Regex,
    Contains,
    StartsWith,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Between => "between",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not_in",
            FilterOperator::Regex => "regex",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::IsNull => "is_null",
            FilterOperator::IsNotNull => "is_not_null",
        }
    }
}

/// Raw clause as it appears in YAML, before operand validation.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub values: Option<Vec<Value>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Validated operator together with its operands.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Lt(f64),
    Lte(f64),
    Gt(f64),
    Gte(f64),
    Between { min: f64, max: f64 },
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Regex(Regex),
    Contains(String),
    StartsWith(String),
    IsNull,
    IsNotNull,
}

impl Condition {
    pub fn operator(&self) -> FilterOperator {
        match self {
            Condition::Eq(_) => FilterOperator::Eq,
            Condition::Ne(_) => FilterOperator::Ne,
            Condition::Lt(_) => FilterOperator::Lt,
            Condition::Lte(_) => FilterOperator::Lte,
            Condition::Gt(_) => FilterOperator::Gt,
            Condition::Gte(_) => FilterOperator::Gte,
            Condition::Between { .. } => FilterOperator::Between,
            Condition::In(_) => FilterOperator::In,
            Condition::NotIn(_) => FilterOperator::NotIn,
            Condition::Regex(_) => FilterOperator::Regex,
            Condition::Contains(_) => FilterOperator::Contains,
            Condition::StartsWith(_) => FilterOperator::StartsWith,
            Condition::IsNull => FilterOperator::IsNull,
            Condition::IsNotNull => FilterOperator::IsNotNull,
        }
    }
}

/// One `field operator operand` condition.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "FilterSpec")]
pub struct FilterClause {
    pub field: String,
    pub condition: Condition,
}

impl TryFrom<FilterSpec> for FilterClause {
    type Error = ValidationError;

    fn try_from(spec: FilterSpec) -> Result<Self, Self::Error> {
        let op = spec.operator;
        let name = op.as_str();

        let value = || spec.value.clone().ok_or(missing(name, "value"));
        let number = || {
            value()?
                .as_f64()
                .ok_or(ValidationError::NonNumericOperand {
                    operator: name,
                    operand: "value",
                })
        };
        let text = || value().map(|v| operand_text(&v));
        let values = || spec.values.clone().ok_or(missing(name, "values"));

        let condition = match op {
            FilterOperator::Eq => Condition::Eq(value()?),
            FilterOperator::Ne => Condition::Ne(value()?),
            FilterOperator::Lt => Condition::Lt(number()?),
            FilterOperator::Lte => Condition::Lte(number()?),
            FilterOperator::Gt => Condition::Gt(number()?),
            FilterOperator::Gte => Condition::Gte(number()?),
            FilterOperator::Between => match (spec.min, spec.max) {
                (Some(min), Some(max)) => Condition::Between { min, max },
                (None, _) => return Err(missing(name, "min")),
                (_, None) => return Err(missing(name, "max")),
            },
            FilterOperator::In => Condition::In(values()?),
            FilterOperator::NotIn => Condition::NotIn(values()?),
            FilterOperator::Regex => {
                let pattern = text()?;
                let regex = Regex::new(&pattern)
                    .map_err(|source| ValidationError::InvalidRegex { pattern, source })?;
                Condition::Regex(regex)
            }
            FilterOperator::Contains => Condition::Contains(text()?),
            FilterOperator::StartsWith => Condition::StartsWith(text()?),
            FilterOperator::IsNull => Condition::IsNull,
            FilterOperator::IsNotNull => Condition::IsNotNull,
        };

        Ok(FilterClause {
            field: spec.field,
            condition,
        })
    }
}

fn missing(operator: &'static str, operand: &'static str) -> ValidationError {
    ValidationError::MissingOperand { operator, operand }
}

/// String operands accept any scalar; non-strings use their JSON text.
fn operand_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl FilterClause {
    pub fn new(field: impl Into<String>, condition: Condition) -> Self {
        Self {
            field: field.into(),
            condition,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Condition::Eq(value.into()))
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Condition::Ne(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: f64) -> Self {
        Self::new(field, Condition::Lt(value))
    }

    pub fn lte(field: impl Into<String>, value: f64) -> Self {
        Self::new(field, Condition::Lte(value))
    }

    pub fn gt(field: impl Into<String>, value: f64) -> Self {
        Self::new(field, Condition::Gt(value))
    }

    pub fn gte(field: impl Into<String>, value: f64) -> Self {
        Self::new(field, Condition::Gte(value))
    }

    pub fn between(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self::new(field, Condition::Between { min, max })
    }

    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, Condition::In(values))
    }

    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, Condition::NotIn(values))
    }

    pub fn regex(field: impl Into<String>, pattern: &str) -> Result<Self, ValidationError> {
        let regex = Regex::new(pattern).map_err(|source| ValidationError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self::new(field, Condition::Regex(regex)))
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::new(field, Condition::Contains(needle.into()))
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(field, Condition::StartsWith(prefix.into()))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, Condition::IsNull)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, Condition::IsNotNull)
    }

    pub fn operator(&self) -> FilterOperator {
        self.condition.operator()
    }
}

/// Evaluate one clause against a record.
pub fn evaluate(instance: &GpuInstance, clause: &FilterClause) -> Result<bool, FilterError> {
    let value = instance
        .field(&clause.field)
        .map_err(|_| FilterError::FieldNotFound(clause.field.clone()))?;

    let result = match &clause.condition {
        Condition::Eq(expected) => value.equals_json(expected),
        Condition::Ne(expected) => !value.equals_json(expected),
        Condition::Lt(bound) => numeric(clause, &value)?.is_some_and(|v| v < *bound),
        Condition::Lte(bound) => numeric(clause, &value)?.is_some_and(|v| v <= *bound),
        Condition::Gt(bound) => numeric(clause, &value)?.is_some_and(|v| v > *bound),
        Condition::Gte(bound) => numeric(clause, &value)?.is_some_and(|v| v >= *bound),
        Condition::Between { min, max } => {
            numeric(clause, &value)?.is_some_and(|v| *min <= v && v <= *max)
        }
        Condition::In(options) => options.iter().any(|o| value.equals_json(o)),
        Condition::NotIn(options) => !options.iter().any(|o| value.equals_json(o)),
        Condition::Regex(regex) => text(clause, &value)?.is_some_and(|s| regex.is_match(s)),
        Condition::Contains(needle) => {
            text(clause, &value)?.is_some_and(|s| s.contains(needle.as_str()))
        }
        Condition::StartsWith(prefix) => {
            text(clause, &value)?.is_some_and(|s| s.starts_with(prefix.as_str()))
        }
        Condition::IsNull => value.is_null(),
        Condition::IsNotNull => !value.is_null(),
    };

    Ok(result)
}

/// Numeric view of the field; `None` when the field is null.
fn numeric(clause: &FilterClause, value: &FieldValue<'_>) -> Result<Option<f64>, FilterError> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_f64()
        .map(Some)
        .ok_or_else(|| type_mismatch(clause, "numeric", value))
}

/// String view of the field; `None` when the field is null.
fn text<'a>(
    clause: &FilterClause,
    value: &FieldValue<'a>,
) -> Result<Option<&'a str>, FilterError> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_str()
        .map(Some)
        .ok_or_else(|| type_mismatch(clause, "string", value))
}

fn type_mismatch(
    clause: &FilterClause,
    expected: &'static str,
    value: &FieldValue<'_>,
) -> FilterError {
    FilterError::TypeMismatch {
        field: clause.field.clone(),
        operator: clause.operator().as_str(),
        expected,
        found: value.type_name(),
    }
}

/// Conjunction of all clauses. An empty list matches everything.
///
/// Stops at the first false clause; an error from any evaluated clause is
/// returned rather than treated as a non-match.
pub fn evaluate_all(
    instance: &GpuInstance,
    clauses: &[FilterClause],
) -> Result<bool, FilterError> {
    for clause in clauses {
        if !evaluate(instance, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Keep the records that satisfy every clause, in their original order.
pub fn filter_instances<'a>(
    instances: &'a [GpuInstance],
    clauses: &[FilterClause],
) -> Result<Vec<&'a GpuInstance>, FilterError> {
    if clauses.is_empty() {
        return Ok(instances.iter().collect());
    }

    let mut filtered = Vec::with_capacity(instances.len());
    for instance in instances {
        if evaluate_all(instance, clauses)? {
            filtered.push(instance);
        }
    }

    debug!(
        "Filtered {} of {} instances with {} clause(s)",
        filtered.len(),
        instances.len(),
        clauses.len()
    );
    Ok(filtered)
}
