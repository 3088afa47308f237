use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::dao::{
    clock_store::ClockStore,
    models::{ClockEntity, EventEntity},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchResult, CouchStoreError},
    models::{CLOCKS_DOC_ID, CollectionDocument, EVENTS_DOC_ID, RevisionOnly},
};

/// Attempts at replacing a collection document before a revision conflict is reported.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Durable backend keeping each record collection in one CouchDB document.
#[derive(Clone)]
pub struct CouchClockStore {
    client: Client,
    database_url: Arc<str>,
    auth: Option<Arc<(String, String)>>,
}

/// Outcome of a single collection write.
enum WriteOutcome {
    Written,
    Conflict,
}

impl CouchClockStore {
    /// Build the client and create the database when it does not exist yet.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder().build().map_err(CouchStoreError::Client)?;
        let database_url = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.database
        );
        let store = Self {
            client,
            database_url: Arc::from(database_url),
            auth: config.credentials.map(Arc::new),
        };

        store.ensure_database().await?;
        info!(database = %config.database, "CouchDB clock store ready");
        Ok(store)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth.as_deref() {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    fn database(&self, method: Method) -> RequestBuilder {
        self.authorized(self.client.request(method, self.database_url.as_ref()))
    }

    fn document(&self, method: Method, doc_id: &str) -> RequestBuilder {
        let url = format!("{}/{doc_id}", self.database_url);
        self.authorized(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let target = self.database_url.to_string();
        let status = self
            .database(Method::GET)
            .send()
            .await
            .map_err(CouchStoreError::transport(target.as_str()))?
            .status();
        if status.is_success() {
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return Err(CouchStoreError::Status { target, status });
        }

        let status = self
            .database(Method::PUT)
            .send()
            .await
            .map_err(CouchStoreError::transport(target.as_str()))?
            .status();
        // 412: created concurrently by another instance.
        if status.is_success() || status == StatusCode::PRECONDITION_FAILED {
            info!(database = %target, "CouchDB database created");
            Ok(())
        } else {
            Err(CouchStoreError::Status { target, status })
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, doc_id: &'static str) -> CouchResult<Option<T>> {
        let response = self
            .document(Method::GET, doc_id)
            .send()
            .await
            .map_err(CouchStoreError::transport(doc_id))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(CouchStoreError::decode(doc_id)),
            status => Err(CouchStoreError::Status {
                target: doc_id.to_string(),
                status,
            }),
        }
    }

    async fn load_collection<T: DeserializeOwned>(
        &self,
        doc_id: &'static str,
    ) -> CouchResult<Vec<T>> {
        Ok(self
            .fetch::<CollectionDocument<T>>(doc_id)
            .await?
            .map(|document| document.records)
            .unwrap_or_default())
    }

    /// Replace the collection document, re-reading its revision after a conflict.
    async fn store_collection<T: Serialize>(
        &self,
        doc_id: &'static str,
        records: Vec<T>,
    ) -> CouchResult<()> {
        let mut document = CollectionDocument::new(doc_id, None, records);
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            document.rev = self
                .fetch::<RevisionOnly>(doc_id)
                .await?
                .map(|existing| existing.rev);
            match self.put(&document).await? {
                WriteOutcome::Written => return Ok(()),
                WriteOutcome::Conflict => {
                    debug!(doc_id, attempt, "collection revision moved; retrying write");
                }
            }
        }
        Err(CouchStoreError::RevisionConflict {
            doc_id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    async fn put<T: Serialize>(&self, document: &CollectionDocument<T>) -> CouchResult<WriteOutcome> {
        let status = self
            .document(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(CouchStoreError::transport(document.id.as_str()))?
            .status();
        classify_write(&document.id, status)
    }
}

fn classify_write(doc_id: &str, status: StatusCode) -> CouchResult<WriteOutcome> {
    match status {
        StatusCode::CONFLICT => Ok(WriteOutcome::Conflict),
        status if status.is_success() => Ok(WriteOutcome::Written),
        status => Err(CouchStoreError::Status {
            target: doc_id.to_string(),
            status,
        }),
    }
}

impl ClockStore for CouchClockStore {
    fn load_events(&self) -> BoxFuture<'static, StorageResult<Vec<EventEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.load_collection(EVENTS_DOC_ID).await?) })
    }

    fn store_events(&self, events: Vec<EventEntity>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.store_collection(EVENTS_DOC_ID, events).await?) })
    }

    fn load_clocks(&self) -> BoxFuture<'static, StorageResult<Vec<ClockEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.load_collection(CLOCKS_DOC_ID).await?) })
    }

    fn store_clocks(&self, clocks: Vec<ClockEntity>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.store_collection(CLOCKS_DOC_ID, clocks).await?) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let target = store.database_url.to_string();
            let status = store
                .database(Method::HEAD)
                .send()
                .await
                .map_err(CouchStoreError::transport(target.as_str()))?
                .status();
            if status.is_success() {
                Ok(())
            } else {
                Err(CouchStoreError::Status { target, status }.into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_retryable_and_other_failures_are_not() {
        assert!(matches!(
            classify_write(CLOCKS_DOC_ID, StatusCode::CREATED),
            Ok(WriteOutcome::Written)
        ));
        assert!(matches!(
            classify_write(CLOCKS_DOC_ID, StatusCode::CONFLICT),
            Ok(WriteOutcome::Conflict)
        ));
        assert!(matches!(
            classify_write(CLOCKS_DOC_ID, StatusCode::UNAUTHORIZED),
            Err(CouchStoreError::Status { status: StatusCode::UNAUTHORIZED, .. })
        ));
    }
}
