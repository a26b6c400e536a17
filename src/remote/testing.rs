//! Failure-injecting wrapper used by the reconciler and cache tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::{Result, WatchlistError};
use crate::remote::{
    ChangeKind, Collection, Filter, MemoryRemote, Record, RemoteCollection, Subscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Get,
    Create,
    Delete,
    Update,
}

/// Wraps a [`MemoryRemote`] and fails selected operations on demand.
#[derive(Default)]
pub struct FlakyRemote {
    pub inner: MemoryRemote,
    failures: Mutex<Vec<(Op, Collection)>>,
    stalls: Mutex<Vec<(Collection, Duration)>>,
    offline: std::sync::atomic::AtomicBool,
    calls: AtomicUsize,
}

impl FlakyRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `op` on `collection` once.
    pub fn fail_next(&self, op: Op, collection: Collection) {
        self.failures.lock().unwrap().push((op, collection));
    }

    /// Answer the next `list` on `collection` with the records read at call
    /// time, but only after `delay`.
    pub fn stall_next_list(&self, collection: Collection, delay: Duration) {
        self.stalls.lock().unwrap().push((collection, delay));
    }

    /// Fail every call until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: Op, collection: Collection) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(WatchlistError::RemoteUnavailable("offline".into()));
        }
        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures.iter().position(|f| *f == (op, collection)) {
            failures.remove(pos);
            return Err(WatchlistError::RemoteUnavailable(format!(
                "injected {:?} failure on {}",
                op, collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCollection for FlakyRemote {
    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>> {
        self.check(Op::List, collection)?;
        let records = self.inner.list(collection, filter).await?;
        let stall = {
            let mut stalls = self.stalls.lock().unwrap();
            stalls
                .iter()
                .position(|(c, _)| *c == collection)
                .map(|pos| stalls.remove(pos).1)
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(records)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>> {
        self.check(Op::Get, collection)?;
        self.inner.get(collection, id).await
    }

    async fn create(&self, collection: Collection, record: Record) -> Result<Record> {
        self.check(Op::Create, collection)?;
        self.inner.create(collection, record).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        self.check(Op::Delete, collection)?;
        self.inner.delete(collection, id).await
    }

    async fn update(&self, collection: Collection, id: &str, fields: Record) -> Result<Record> {
        self.check(Op::Update, collection)?;
        self.inner.update(collection, id, fields).await
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: Filter,
        kinds: &[ChangeKind],
    ) -> Result<Subscription> {
        self.inner.subscribe(collection, filter, kinds).await
    }
}
