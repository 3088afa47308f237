use std::error::Error;
use thiserror::Error;

/// Result alias for durable storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by durable backends regardless of the underlying medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not serve the request.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable context.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// No durable backend is installed (degraded mode).
    #[error("storage unavailable (degraded mode)")]
    Detached,
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
