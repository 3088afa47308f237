#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod file;

use crate::dao::models::{ClockEntity, EventEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Durable backend holding the two record collections.
///
/// Each collection is read and written as one unit; callers do read-modify-write on
/// whole snapshots.
pub trait ClockStore: Send + Sync {
    fn load_events(&self) -> BoxFuture<'static, StorageResult<Vec<EventEntity>>>;
    fn store_events(&self, events: Vec<EventEntity>) -> BoxFuture<'static, StorageResult<()>>;
    fn load_clocks(&self) -> BoxFuture<'static, StorageResult<Vec<ClockEntity>>>;
    fn store_clocks(&self, clocks: Vec<ClockEntity>) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
