pub mod filter;
pub mod memory;
pub mod notify;
pub mod sqlite;

#[cfg(test)]
pub mod testing;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::app::{Result, WatchlistError};

pub use filter::Filter;
pub use memory::MemoryRemote;
pub use notify::{ChangeFeed, Notification, Subscription};
pub use sqlite::SqliteRemote;

/// A schemaless record: a JSON object with a string `id` field.
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Items,
    Markers,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Items => "items",
            Collection::Markers => "markers",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A change notification. `record` is the record after the change, or the
/// removed record for deletions.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub record: Record,
}

/// Client of the remote collection store.
///
/// The store offers no cross-record transactions; callers that need two
/// writes to agree must compensate themselves.
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>> {
        let filter = Filter::new().eq("id", id);
        Ok(self.list(collection, &filter).await?.into_iter().next())
    }

    /// Store a new record. A record without an `id` gets a fresh one.
    async fn create(&self, collection: Collection, record: Record) -> Result<Record>;

    /// Remove a record. `NotFound` if it does not exist.
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    /// Merge `fields` into an existing record and return the result.
    /// The `id` field cannot be changed.
    async fn update(&self, collection: Collection, id: &str, fields: Record) -> Result<Record>;

    async fn subscribe(
        &self,
        collection: Collection,
        filter: Filter,
        kinds: &[ChangeKind],
    ) -> Result<Subscription>;
}

pub fn to_record<T: Serialize>(value: &T) -> Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(WatchlistError::ValidationFailed(format!(
            "record must be a JSON object, got {}",
            other
        ))),
    }
}

pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

pub fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Assign a fresh id to records created without one.
pub(crate) fn ensure_id(mut record: Record) -> (String, Record) {
    let id = match record_id(&record) {
        Some(id) => id.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            record.insert("id".into(), Value::String(id.clone()));
            id
        }
    };
    (id, record)
}

/// Merge update fields into a record, keeping its id.
pub(crate) fn merge_fields(record: &mut Record, fields: Record) {
    for (key, value) in fields {
        if key == "id" {
            continue;
        }
        record.insert(key, value);
    }
}
