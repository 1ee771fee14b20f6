//! # GPUPort Core
//!
//! Core domain model for GPUPort export pipelines.
//!
//! This crate contains pure domain logic with no I/O dependencies:
//! - The normalized `GpuInstance` record and its availability enum
//! - Record validation and normalization rules
//! - Dynamic field access used by filters, transformers and metrics
//!
//! ## Design Principles
//!
//! - **Immutable Records**: Stages read records by reference, never mutate them
//! - **Dependency-Free**: No I/O, networking, or persistence dependencies

pub mod errors;
pub mod models;

// Re-export commonly used types
pub use errors::{CoreError, Result};
pub use models::{AvailabilityStatus, FieldValue, GpuInstance, FIELD_NAMES, MAX_PRICE_PER_HOUR};
