//! # GPUPort Utils
//!
//! Infrastructure helpers shared by the export engine and the collectors:
//! environment substitution, retry with exponential backoff, and gzip.

pub mod compression;
pub mod env;
pub mod errors;
pub mod retry;

// Re-export common types for convenience
pub use compression::gzip_bytes;
pub use env::substitute_env_vars;
pub use errors::{Result, UtilsError};
pub use retry::{with_retry, RetryPolicy};
