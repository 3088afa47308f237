/// Durable store backends for event and clock records.
pub mod clock_store;
/// Durable record definitions.
pub mod models;
/// Tiered cache in front of the durable store.
pub mod persistence;
/// Storage error shared by every backend.
pub mod storage;
