use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the context store.
///
/// Unknown partitions and story ids are not errors: lookups return empty
/// results and updates become no-ops.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Missing credentials, unset model name, unknown provider. Fatal at construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The embedding backend failed or returned malformed output.
    #[error("Embedding provider error: {0}")]
    Provider(String),

    /// Writing a snapshot to durable storage failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid story patch: {0}")]
    InvalidPatch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}
