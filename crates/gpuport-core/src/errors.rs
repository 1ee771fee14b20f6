use thiserror::Error;

/// Core domain errors - no I/O dependencies
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Field '{0}' does not exist on GpuInstance")]
    UnknownField(String),
}

impl CoreError {
    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
