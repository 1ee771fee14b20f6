use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::errors::{CoreError, Result};

/// Upper bound for a sane hourly price, in USD.
pub const MAX_PRICE_PER_HOUR: f64 = 1000.0;

const ONE_YEAR_SECS: i64 = 365 * 24 * 60 * 60;
const ONE_DAY_SECS: i64 = 24 * 60 * 60;

/// Every attribute name that can be addressed by filters, transformers and metrics.
pub const FIELD_NAMES: &[&str] = &[
    "provider",
    "instance_type",
    "v_cpus",
    "memory_gib",
    "arch",
    "accelerator_name",
    "accelerator_count",
    "accelerator_mem_gib",
    "gpu_info",
    "region",
    "availability_zone",
    "price",
    "spot_price",
    "availability",
    "quantity",
    "collected_at",
    "raw_data",
];

/// Standardized availability of an offer across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvailabilityStatus {
    #[serde(rename = "High")]
    High,
    #[serde(rename = "Medium")]
    Medium,
    #[serde(rename = "Low")]
    Low,
    #[serde(rename = "Not Available")]
    NotAvailable,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::High => "High",
            AvailabilityStatus::Medium => "Medium",
            AvailabilityStatus::Low => "Low",
            AvailabilityStatus::NotAvailable => "Not Available",
        }
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AvailabilityStatus {
    type Err = CoreError;

    /// Accepts the exact display labels plus the constant spelling
    /// `NOT_AVAILABLE`. Matching is case-sensitive.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "High" => Ok(AvailabilityStatus::High),
            "Medium" => Ok(AvailabilityStatus::Medium),
            "Low" => Ok(AvailabilityStatus::Low),
            "Not Available" | "NOT_AVAILABLE" => Ok(AvailabilityStatus::NotAvailable),
            _ => Err(CoreError::validation(
                "availability",
                format!("unknown availability status '{}'", s),
            )),
        }
    }
}

/// Normalized GPU rental offer as collected from a provider.
///
/// Records are created once at collection time; every pipeline stage reads
/// them by reference and produces new values instead of mutating them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInstance {
    pub provider: String,
    pub instance_type: String,
    #[serde(default)]
    pub v_cpus: Option<f64>,
    #[serde(default)]
    pub memory_gib: Option<f64>,
    #[serde(default)]
    pub arch: Option<String>,
    pub accelerator_name: String,
    pub accelerator_count: f64,
    #[serde(default)]
    pub accelerator_mem_gib: Option<f64>,
    #[serde(default)]
    pub gpu_info: Option<String>,
    pub region: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub spot_price: Option<f64>,
    pub availability: AvailabilityStatus,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default = "current_timestamp")]
    pub collected_at: i64,
    #[serde(default)]
    pub raw_data: Map<String, Value>,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

impl GpuInstance {
    /// Create an offer with the mandatory attributes; optional ones start empty
    /// and `collected_at` is set to now.
    pub fn new(
        provider: impl Into<String>,
        instance_type: impl Into<String>,
        accelerator_name: impl Into<String>,
        accelerator_count: f64,
        region: impl Into<String>,
        price: f64,
        availability: AvailabilityStatus,
    ) -> Self {
        GpuInstance {
            provider: provider.into(),
            instance_type: instance_type.into(),
            v_cpus: None,
            memory_gib: None,
            arch: None,
            accelerator_name: accelerator_name.into(),
            accelerator_count,
            accelerator_mem_gib: None,
            gpu_info: None,
            region: region.into(),
            availability_zone: None,
            price,
            spot_price: None,
            availability,
            quantity: None,
            collected_at: current_timestamp(),
            raw_data: Map::new(),
        }
    }

    /// Trim string attributes, drop blank optional strings, then validate.
    pub fn normalized(mut self) -> Result<Self> {
        self.provider = self.provider.trim().to_string();
        self.instance_type = self.instance_type.trim().to_string();
        self.accelerator_name = self.accelerator_name.trim().to_string();
        self.region = self.region.trim().to_string();
        self.arch = trim_optional(self.arch);
        self.gpu_info = trim_optional(self.gpu_info);
        self.availability_zone = trim_optional(self.availability_zone);

        self.validate()?;
        Ok(self)
    }

    /// Check the record invariants against the current time.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(current_timestamp())
    }

    /// Check the record invariants against `now` (unix seconds).
    pub fn validate_at(&self, now: i64) -> Result<()> {
        for (name, value) in [
            ("provider", &self.provider),
            ("instance_type", &self.instance_type),
            ("accelerator_name", &self.accelerator_name),
            ("region", &self.region),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::validation(
                    name,
                    "field cannot be empty or whitespace-only",
                ));
            }
        }

        for (name, value) in [
            ("v_cpus", self.v_cpus),
            ("memory_gib", self.memory_gib),
            ("accelerator_count", Some(self.accelerator_count)),
            ("accelerator_mem_gib", self.accelerator_mem_gib),
        ] {
            if let Some(v) = value {
                if v.is_nan() || v <= 0.0 {
                    return Err(CoreError::validation(name, "must be greater than zero"));
                }
            }
        }

        for (name, value) in [("price", Some(self.price)), ("spot_price", self.spot_price)] {
            if let Some(v) = value {
                if v.is_nan() || v < 0.0 {
                    return Err(CoreError::validation(name, "must not be negative"));
                }
                if v > MAX_PRICE_PER_HOUR {
                    return Err(CoreError::validation(
                        name,
                        format!("exceeds reasonable maximum (${}/hour)", MAX_PRICE_PER_HOUR),
                    ));
                }
            }
        }

        if self.collected_at < now - ONE_YEAR_SECS || self.collected_at > now + ONE_DAY_SECS {
            return Err(CoreError::validation(
                "collected_at",
                "timestamp is outside reasonable range",
            ));
        }

        Ok(())
    }

    /// Look up an attribute by name.
    pub fn field(&self, name: &str) -> Result<FieldValue<'_>> {
        let value = match name {
            "provider" => FieldValue::Text(&self.provider),
            "instance_type" => FieldValue::Text(&self.instance_type),
            "v_cpus" => FieldValue::from_float(self.v_cpus),
            "memory_gib" => FieldValue::from_float(self.memory_gib),
            "arch" => FieldValue::from_text(self.arch.as_deref()),
            "accelerator_name" => FieldValue::Text(&self.accelerator_name),
            "accelerator_count" => FieldValue::Float(self.accelerator_count),
            "accelerator_mem_gib" => FieldValue::from_float(self.accelerator_mem_gib),
            "gpu_info" => FieldValue::from_text(self.gpu_info.as_deref()),
            "region" => FieldValue::Text(&self.region),
            "availability_zone" => FieldValue::from_text(self.availability_zone.as_deref()),
            "price" => FieldValue::Float(self.price),
            "spot_price" => FieldValue::from_float(self.spot_price),
            "availability" => FieldValue::Availability(self.availability),
            "quantity" => self
                .quantity
                .map(|q| FieldValue::Integer(i64::from(q)))
                .unwrap_or(FieldValue::Null),
            "collected_at" => FieldValue::Integer(self.collected_at),
            "raw_data" => FieldValue::Map(&self.raw_data),
            other => return Err(CoreError::UnknownField(other.to_string())),
        };
        Ok(value)
    }

    /// Whether `name` addresses an attribute of the record.
    pub fn has_field(name: &str) -> bool {
        FIELD_NAMES.contains(&name)
    }
}

fn trim_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Borrowed, dynamically typed view of one record attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Null,
    Text(&'a str),
    Float(f64),
    Integer(i64),
    Availability(AvailabilityStatus),
    Map(&'a Map<String, Value>),
}

impl<'a> FieldValue<'a> {
    fn from_float(value: Option<f64>) -> Self {
        value.map(FieldValue::Float).unwrap_or(FieldValue::Null)
    }

    fn from_text(value: Option<&'a str>) -> Self {
        value.map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Text(_) => "string",
            FieldValue::Float(_) => "float",
            FieldValue::Integer(_) => "integer",
            FieldValue::Availability(_) => "availability",
            FieldValue::Map(_) => "map",
        }
    }

    /// Equality against a configured JSON operand.
    ///
    /// Numbers compare numerically regardless of integer/float spelling and
    /// availability compares as the enum, so `"Not Available"` and
    /// `"NOT_AVAILABLE"` both match `AvailabilityStatus::NotAvailable`.
    /// Mismatched types are simply unequal.
    pub fn equals_json(&self, other: &Value) -> bool {
        match (self, other) {
            (FieldValue::Null, Value::Null) => true,
            (FieldValue::Text(s), Value::String(o)) => *s == o.as_str(),
            (FieldValue::Float(_) | FieldValue::Integer(_), Value::Number(n)) => {
                match (self.as_f64(), n.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (FieldValue::Availability(status), Value::String(o)) => o
                .parse::<AvailabilityStatus>()
                .map(|parsed| parsed == *status)
                .unwrap_or(false),
            (FieldValue::Map(m), Value::Object(o)) => *m == o,
            _ => false,
        }
    }

    /// JSON representation used by the serializers.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.to_string()),
            FieldValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Integer(v) => Value::from(*v),
            FieldValue::Availability(status) => Value::String(status.as_str().to_string()),
            FieldValue::Map(m) => Value::Object((*m).clone()),
        }
    }
}

/// Text form used for CSV cells and group keys: floats always carry a
/// fractional part (`8.0`), availability prints its label, maps print as JSON.
impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Float(v) => write!(f, "{:?}", v),
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Availability(status) => f.write_str(status.as_str()),
            FieldValue::Map(m) => {
                let json = serde_json::to_string(m).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}
