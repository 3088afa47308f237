//! Error types raised by the file storage backend.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Convenient result alias returning [`FileStoreError`] failures.
pub type FileResult<T> = Result<T, FileStoreError>;

/// Failures that can occur while reading or writing collection files.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// The data directory could not be created.
    #[error("failed to create data directory `{}`", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A collection file could not be read.
    #[error("failed to read collection file `{}`", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A collection file could not be written or moved into place.
    #[error("failed to write collection file `{}`", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A collection file holds invalid JSON.
    #[error("failed to decode collection file `{}`", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A collection could not be serialized.
    #[error("failed to encode collection `{collection}`")]
    Encode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
