//! # GPUPort Collectors
//!
//! Collector boundary and command-line wiring for GPUPort. Collectors
//! produce normalized [`GpuInstance`] records; the export engine in
//! `gpuport-export` filters, transforms and delivers them.

pub mod cli;
pub mod collector;
pub mod config;
pub mod errors;

pub use collector::{fetch_with_retry, Collector, JsonFileCollector};
pub use config::CollectorConfig;
pub use errors::{CollectorConfigError, CollectorError};

pub use gpuport_core::{AvailabilityStatus, GpuInstance};
