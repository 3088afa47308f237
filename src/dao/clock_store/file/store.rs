use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;

use crate::dao::{
    clock_store::ClockStore,
    models::{ClockEntity, EventEntity},
    storage::StorageResult,
};

use super::{
    config::FileConfig,
    error::{FileResult, FileStoreError},
};

const EVENTS_FILE: &str = "events.json";
const CLOCKS_FILE: &str = "clocks.json";

/// Durable backend keeping each collection as one JSON file.
#[derive(Clone)]
pub struct FileClockStore {
    directory: Arc<Path>,
}

impl FileClockStore {
    /// Make sure the data directory exists and return a store rooted there.
    pub async fn connect(config: FileConfig) -> FileResult<Self> {
        let store = Self {
            directory: Arc::from(config.directory),
        };
        store.ensure_directory().await?;
        Ok(store)
    }

    async fn ensure_directory(&self) -> FileResult<()> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| FileStoreError::CreateDir {
                path: self.directory.to_path_buf(),
                source,
            })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.directory.join(file)
    }

    async fn read_collection<T>(&self, file: &str) -> FileResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let path = self.path(file);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(FileStoreError::Read { path, source }),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents).map_err(|source| FileStoreError::Decode { path, source })
    }

    /// Write through a temporary file and rename so readers never see a torn file.
    async fn write_collection<T>(
        &self,
        collection: &'static str,
        file: &str,
        records: &[T],
    ) -> FileResult<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec_pretty(records)
            .map_err(|source| FileStoreError::Encode { collection, source })?;

        self.ensure_directory().await?;
        let path = self.path(file);
        let tmp = self.path(&format!("{file}.tmp"));

        fs::write(&tmp, payload)
            .await
            .map_err(|source| FileStoreError::Write {
                path: tmp.clone(),
                source,
            })?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|source| FileStoreError::Write { path, source })
    }
}

impl ClockStore for FileClockStore {
    fn load_events(&self) -> BoxFuture<'static, StorageResult<Vec<EventEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.read_collection(EVENTS_FILE).await?) })
    }

    fn store_events(&self, events: Vec<EventEntity>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write_collection("events", EVENTS_FILE, &events)
                .await
                .map_err(Into::into)
        })
    }

    fn load_clocks(&self) -> BoxFuture<'static, StorageResult<Vec<ClockEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.read_collection(CLOCKS_FILE).await?) })
    }

    fn store_clocks(&self, clocks: Vec<ClockEntity>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write_collection("clocks", CLOCKS_FILE, &clocks)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_directory().await?;
            fs::metadata(&store.directory)
                .await
                .map(|_| ())
                .map_err(|source| FileStoreError::Read {
                    path: store.directory.to_path_buf(),
                    source,
                })?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::state::clock::ClockStatus;

    fn clock_record(event_id: Uuid) -> ClockEntity {
        let now = OffsetDateTime::now_utc();
        ClockEntity {
            event_id,
            is_running: false,
            started_at: None,
            accumulated_run_time_seconds: 42.0,
            current_quarter: 3,
            quarter_length_seconds: 600.0,
            status: ClockStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn missing_files_read_as_empty_collections() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileClockStore::connect(FileConfig::new(dir.path()))
            .await
            .unwrap();

        assert!(store.load_clocks().await.unwrap().is_empty());
        assert!(store.load_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn collections_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let store = FileClockStore::connect(FileConfig::new(dir.path()))
                .await
                .unwrap();
            store.store_clocks(vec![clock_record(id)]).await.unwrap();
        }

        let reopened = FileClockStore::connect(FileConfig::new(dir.path()))
            .await
            .unwrap();
        let clocks = reopened.load_clocks().await.unwrap();
        assert_eq!(clocks.len(), 1);
        assert_eq!(clocks[0].event_id, id);
        assert_eq!(clocks[0].current_quarter, 3);
        assert!(!dir.path().join("clocks.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CLOCKS_FILE), "{not json").unwrap();
        let store = FileClockStore::connect(FileConfig::new(dir.path()))
            .await
            .unwrap();

        assert!(store.load_clocks().await.is_err());
    }

    #[tokio::test]
    async fn creates_nested_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        let store = FileClockStore::connect(FileConfig::new(&nested))
            .await
            .unwrap();
        store.health_check().await.unwrap();
        assert!(nested.is_dir());
    }
}
