use thiserror::Error;

/// Infrastructure-specific errors for gpuport-utils
#[derive(Error, Debug)]
pub enum UtilsError {
    #[error("Environment variable(s) not set: {0}")]
    MissingEnvVar(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UtilsError>;
