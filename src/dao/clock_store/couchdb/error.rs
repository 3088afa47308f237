use reqwest::StatusCode;
use thiserror::Error;

pub type CouchResult<T> = Result<T, CouchStoreError>;

/// Failures of the CouchDB clock backend.
#[derive(Debug, Error)]
pub enum CouchStoreError {
    #[error("`{var}` is missing while other CouchDB variables are set")]
    IncompleteEnv { var: &'static str },
    #[error("failed to build CouchDB HTTP client")]
    Client(#[source] reqwest::Error),
    /// The request never got an answer.
    #[error("CouchDB request to `{target}` failed")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} for `{target}`")]
    Status { target: String, status: StatusCode },
    #[error("CouchDB returned an unreadable body for `{target}`")]
    Decode {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    /// Another writer kept replacing the collection document between our read and write.
    #[error("collection document `{doc_id}` kept changing; gave up after {attempts} attempts")]
    RevisionConflict { doc_id: &'static str, attempts: u32 },
}

impl CouchStoreError {
    pub(super) fn transport(target: impl Into<String>) -> impl FnOnce(reqwest::Error) -> Self {
        let target = target.into();
        move |source| CouchStoreError::Transport { target, source }
    }

    pub(super) fn decode(target: impl Into<String>) -> impl FnOnce(reqwest::Error) -> Self {
        let target = target.into();
        move |source| CouchStoreError::Decode { target, source }
    }
}
