use serde::{Deserialize, Serialize};

/// Document holding the whole event collection.
pub const EVENTS_DOC_ID: &str = "collection::events";
/// Document holding the whole clock collection.
pub const CLOCKS_DOC_ID: &str = "collection::clocks";

/// One CouchDB document wrapping a full record collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    /// Omitted on the first write of a collection.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
}

impl<T> CollectionDocument<T> {
    pub fn new(id: &str, rev: Option<String>, records: Vec<T>) -> Self {
        Self {
            id: id.to_string(),
            rev,
            records,
        }
    }
}

/// Revision-only projection used before overwriting a collection document.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_rev")]
    pub rev: String,
}
