//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Work item identifier must not be empty")]
    EmptyWorkItem,

    #[error("Cannot derive a record key from '{0}': it has no file name")]
    NoBaseName(String),
}
