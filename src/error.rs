//! Error types for raster cube operations

use thiserror::Error;

/// Main error type for cube operations
#[derive(Error, Debug)]
pub enum CubeError {
    /// Request outside the on-disk or active extents. No state was changed.
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Materialized window would exceed the configured memory ceiling.
    #[error("Resource exhausted: window of {requested} bytes exceeds ceiling of {ceiling} bytes")]
    ResourceExhausted { requested: u64, ceiling: u64 },

    /// Backing store unreadable, unwritable or full.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Use of an accessor whose window has been invalidated.
    #[error("Stale window: {0}")]
    StaleWindow(String),

    /// Illegal view descriptor mutation or request configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl CubeError {
    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        Self::OutOfBounds(msg.into())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        Self::StaleWindow(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Whether the in-progress operation can be retried with a narrower or corrected request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CubeError::OutOfBounds(_)
                | CubeError::ResourceExhausted { .. }
                | CubeError::InvalidConfiguration(_)
        )
    }
}

/// Specialized Result type for cube operations
pub type Result<T> = std::result::Result<T, CubeError>;

impl From<serde_json::Error> for CubeError {
    fn from(err: serde_json::Error) -> Self {
        CubeError::Serialization(err.to_string())
    }
}
