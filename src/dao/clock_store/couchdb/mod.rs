//! CouchDB backend: one document per record collection, replaced wholesale on write.

mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::{CouchResult, CouchStoreError};
pub use store::CouchClockStore;

use crate::dao::storage::StorageError;

impl From<CouchStoreError> for StorageError {
    fn from(err: CouchStoreError) -> Self {
        StorageError::unavailable(format!("couchdb: {err}"), err)
    }
}
