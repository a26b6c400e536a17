use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::app::{Result, WatchlistError};
use crate::remote::{
    ensure_id, merge_fields, record_id, ChangeEvent, ChangeFeed, ChangeKind, Collection, Filter,
    Record, RemoteCollection, Subscription,
};

/// Volatile in-process store. Records keep insertion order.
#[derive(Default)]
pub struct MemoryRemote {
    collections: Mutex<HashMap<Collection, Vec<Record>>>,
    feed: ChangeFeed,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Collection, Vec<Record>>>> {
        self.collections
            .lock()
            .map_err(|e| WatchlistError::RemoteUnavailable(e.to_string()))
    }

    fn not_found(collection: Collection, id: &str) -> WatchlistError {
        WatchlistError::NotFound(format!("{} record {}", collection, id))
    }
}

#[async_trait]
impl RemoteCollection for MemoryRemote {
    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>> {
        let collections = self.lock()?;
        Ok(collections
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, collection: Collection, record: Record) -> Result<Record> {
        let (id, record) = ensure_id(record);
        {
            let mut collections = self.lock()?;
            let records = collections.entry(collection).or_default();
            if records.iter().any(|r| record_id(r) == Some(id.as_str())) {
                return Err(WatchlistError::ValidationFailed(format!(
                    "duplicate {} id {}",
                    collection, id
                )));
            }
            records.push(record.clone());
        }

        self.feed.publish(ChangeEvent {
            collection,
            kind: ChangeKind::Created,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let removed = {
            let mut collections = self.lock()?;
            let records = collections.entry(collection).or_default();
            let pos = records
                .iter()
                .position(|r| record_id(r) == Some(id))
                .ok_or_else(|| Self::not_found(collection, id))?;
            records.remove(pos)
        };

        self.feed.publish(ChangeEvent {
            collection,
            kind: ChangeKind::Deleted,
            record: removed,
        });
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, fields: Record) -> Result<Record> {
        let updated = {
            let mut collections = self.lock()?;
            let record = collections
                .entry(collection)
                .or_default()
                .iter_mut()
                .find(|r| record_id(r) == Some(id))
                .ok_or_else(|| Self::not_found(collection, id))?;
            merge_fields(record, fields);
            record.clone()
        };

        self.feed.publish(ChangeEvent {
            collection,
            kind: ChangeKind::Updated,
            record: updated.clone(),
        });
        Ok(updated)
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: Filter,
        kinds: &[ChangeKind],
    ) -> Result<Subscription> {
        Ok(self.feed.subscribe(collection, filter, kinds))
    }
}
