//! Local, non-authoritative view of the current user's relations.
//!
//! The cache is rebuilt wholesale from the remote store on every refresh,
//! so redundant refreshes are harmless. Every write is tagged with the
//! cache generation it was started under; bumping the generation
//! (identity switch, unmount, dispose) turns late writes into no-ops.
//! Within a generation, refreshes of one kind commit in the order they
//! started: a refresh that began before the last committed one is dropped.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::app::{Result, WatchlistError};
use crate::domain::RelationKind;
use crate::remote::{record_id, Collection, Filter, RemoteCollection};

/// Derived state of one relation for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationState {
    pub active: bool,
    /// Aggregate counter, for relations that carry one.
    pub count: Option<u64>,
}

impl RelationState {
    pub fn new(active: bool, count: Option<u64>) -> Self {
        Self { active, count }
    }
}

/// Token returned by an optimistic update, used to settle or revert it.
#[derive(Debug, Clone, Copy)]
pub struct Optimistic {
    previous: Option<RelationState>,
    generation: u64,
}

impl Optimistic {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Default)]
struct CacheInner {
    kinds: HashMap<RelationKind, HashMap<String, RelationState>>,
    generation: u64,
    disposed: bool,
    last_ticket: u64,
    committed: HashMap<RelationKind, u64>,
}

pub struct RelationCache {
    inner: RwLock<CacheInner>,
    changes: watch::Sender<u64>,
}

/// Filter selecting one user's markers of one relation kind.
pub fn marker_filter(kind: RelationKind, user_id: &str) -> Filter {
    Filter::new()
        .eq("relation", kind.as_str())
        .eq("user_id", user_id)
}

/// Read an item's counter field. Missing or malformed counters read as zero.
pub fn counter_value(record: &crate::remote::Record, field: &str) -> u64 {
    record.get(field).and_then(Value::as_u64).unwrap_or(0)
}

impl RelationCache {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: RwLock::new(CacheInner::default()),
            changes,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Receiver bumped after every committed change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn is_disposed(&self) -> bool {
        self.read().disposed
    }

    pub fn get(&self, kind: RelationKind, item_id: &str) -> RelationState {
        let inner = self.read();
        inner
            .kinds
            .get(&kind)
            .and_then(|m| m.get(item_id))
            .copied()
            .unwrap_or_else(|| RelationState::new(false, kind.has_counter().then_some(0)))
    }

    pub fn snapshot(&self, kind: RelationKind) -> HashMap<String, RelationState> {
        self.read().kinds.get(&kind).cloned().unwrap_or_default()
    }

    /// Ids of the items for which `kind` is active, sorted.
    pub fn active_items(&self, kind: RelationKind) -> Vec<String> {
        let mut ids: Vec<_> = self
            .read()
            .kinds
            .get(&kind)
            .map(|m| {
                m.iter()
                    .filter(|(_, s)| s.active)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Re-fetch `user_id`'s markers of `kind` and replace the cached view.
    ///
    /// On failure the previous content is left untouched.
    pub async fn refresh(
        &self,
        remote: &dyn RemoteCollection,
        kind: RelationKind,
        user_id: &str,
    ) -> Result<()> {
        let generation = self.generation();
        self.refresh_at(remote, kind, user_id, generation).await
    }

    /// Like [`refresh`](Self::refresh), but only commits if the cache is
    /// still at `generation` when the remote answers.
    pub async fn refresh_at(
        &self,
        remote: &dyn RemoteCollection,
        kind: RelationKind,
        user_id: &str,
        generation: u64,
    ) -> Result<()> {
        let ticket = {
            let mut inner = self.write();
            if inner.disposed {
                return Ok(());
            }
            inner.last_ticket += 1;
            inner.last_ticket
        };

        let markers = remote
            .list(Collection::Markers, &marker_filter(kind, user_id))
            .await
            .map_err(WatchlistError::into_remote)?;

        let mut next = HashMap::new();
        if let Some(field) = kind.spec().counter {
            let items = remote
                .list(Collection::Items, &Filter::new())
                .await
                .map_err(WatchlistError::into_remote)?;
            for item in &items {
                if let Some(id) = record_id(item) {
                    let count = counter_value(item, field);
                    next.insert(id.to_string(), RelationState::new(false, Some(count)));
                }
            }
        }

        for marker in &markers {
            let Some(item_id) = marker.get("item_id").and_then(Value::as_str) else {
                continue;
            };
            next.entry(item_id.to_string())
                .or_insert_with(|| RelationState::new(false, kind.has_counter().then_some(0)))
                .active = true;
        }

        {
            let mut inner = self.write();
            if inner.disposed || inner.generation != generation {
                debug!(
                    "Discarding stale {} refresh for {} (generation {} != {})",
                    kind, user_id, generation, inner.generation
                );
                return Ok(());
            }
            if inner.committed.get(&kind).is_some_and(|&done| done > ticket) {
                debug!(
                    "Discarding {} refresh for {} overtaken by a newer one",
                    kind, user_id
                );
                return Ok(());
            }
            inner.committed.insert(kind, ticket);
            debug!(
                "Refreshed {} for {}: {} markers",
                kind,
                user_id,
                markers.len()
            );
            inner.kinds.insert(kind, next);
        }
        self.notify();
        Ok(())
    }

    /// Show `state` immediately, before the remote store has confirmed it.
    pub fn apply_local_optimistic_update(
        &self,
        kind: RelationKind,
        item_id: &str,
        state: RelationState,
    ) -> Optimistic {
        let token = {
            let mut inner = self.write();
            let generation = inner.generation;
            if inner.disposed {
                return Optimistic {
                    previous: None,
                    generation,
                };
            }
            let previous = inner
                .kinds
                .entry(kind)
                .or_default()
                .insert(item_id.to_string(), state);
            Optimistic {
                previous,
                generation,
            }
        };
        self.notify();
        token
    }

    /// Replace an optimistic value with the confirmed one.
    pub fn settle(
        &self,
        kind: RelationKind,
        item_id: &str,
        state: RelationState,
        token: &Optimistic,
    ) {
        if self.write_if_current(token.generation, kind, item_id, Some(state)) {
            self.notify();
        }
    }

    /// Undo an optimistic update after the remote operation failed.
    pub fn revert(&self, kind: RelationKind, item_id: &str, token: Optimistic) {
        if self.write_if_current(token.generation, kind, item_id, token.previous) {
            self.notify();
        }
    }

    fn write_if_current(
        &self,
        generation: u64,
        kind: RelationKind,
        item_id: &str,
        state: Option<RelationState>,
    ) -> bool {
        let mut inner = self.write();
        if inner.disposed || inner.generation != generation {
            debug!("Discarding stale {} update for item {}", kind, item_id);
            return false;
        }
        let map = inner.kinds.entry(kind).or_default();
        match state {
            Some(state) => {
                map.insert(item_id.to_string(), state);
            }
            None => {
                map.remove(item_id);
            }
        }
        true
    }

    /// Drop every cached relation of a deleted item.
    pub fn forget_item(&self, item_id: &str) {
        {
            let mut inner = self.write();
            for map in inner.kinds.values_mut() {
                map.remove(item_id);
            }
        }
        self.notify();
    }

    /// Clear all content and invalidate in-flight writes.
    pub fn reset(&self) {
        {
            let mut inner = self.write();
            inner.kinds.clear();
            inner.generation += 1;
        }
        self.notify();
    }

    /// End of life: clear, invalidate, and ignore all later writes.
    pub fn dispose(&self) {
        {
            let mut inner = self.write();
            inner.kinds.clear();
            inner.generation += 1;
            inner.disposed = true;
        }
        self.notify();
    }
}

impl Default for RelationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::remote::testing::FlakyRemote;
    use crate::remote::{MemoryRemote, Record};

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn seed(remote: &dyn RemoteCollection) {
        for (id, likes) in [("dune", 2), ("heat", 0)] {
            remote
                .create(Collection::Items, record(json!({"id": id, "likes": likes})))
                .await
                .unwrap();
        }
        for (id, relation, item, user) in [
            ("m1", "favorite", "dune", "u1"),
            ("m2", "favorite", "heat", "u2"),
            ("m3", "liked", "dune", "u1"),
        ] {
            remote
                .create(
                    Collection::Markers,
                    record(json!({"id": id, "relation": relation, "item_id": item, "user_id": user})),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_refresh_builds_user_view() {
        let remote = MemoryRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();

        cache
            .refresh(&remote, RelationKind::Favorite, "u1")
            .await
            .unwrap();
        assert!(cache.get(RelationKind::Favorite, "dune").active);
        assert!(!cache.get(RelationKind::Favorite, "heat").active);
        assert_eq!(cache.get(RelationKind::Favorite, "dune").count, None);
        assert_eq!(cache.active_items(RelationKind::Favorite), vec!["dune"]);
    }

    #[tokio::test]
    async fn test_refresh_counts_for_counter_kinds() {
        let remote = MemoryRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();

        cache.refresh(&remote, RelationKind::Liked, "u1").await.unwrap();
        assert_eq!(
            cache.get(RelationKind::Liked, "dune"),
            RelationState::new(true, Some(2))
        );
        assert_eq!(
            cache.get(RelationKind::Liked, "heat"),
            RelationState::new(false, Some(0))
        );
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let remote = MemoryRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();

        cache.refresh(&remote, RelationKind::Liked, "u1").await.unwrap();
        let first = cache.snapshot(RelationKind::Liked);
        cache.refresh(&remote, RelationKind::Liked, "u1").await.unwrap();
        assert_eq!(first, cache.snapshot(RelationKind::Liked));
    }

    #[tokio::test]
    async fn test_refresh_replaces_optimistic_state() {
        let remote = MemoryRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();

        cache.apply_local_optimistic_update(
            RelationKind::Favorite,
            "heat",
            RelationState::new(true, None),
        );
        cache
            .refresh(&remote, RelationKind::Favorite, "u1")
            .await
            .unwrap();
        assert!(!cache.get(RelationKind::Favorite, "heat").active);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_content() {
        let remote = FlakyRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();
        cache
            .refresh(&remote, RelationKind::Favorite, "u1")
            .await
            .unwrap();

        remote.set_offline(true);
        let err = cache
            .refresh(&remote, RelationKind::Favorite, "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, WatchlistError::RemoteUnavailable(_)));
        assert!(cache.get(RelationKind::Favorite, "dune").active);
    }

    #[tokio::test]
    async fn test_stale_generation_refresh_is_discarded() {
        let remote = MemoryRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();
        let generation = cache.generation();
        cache.reset();

        cache
            .refresh_at(&remote, RelationKind::Favorite, "u1", generation)
            .await
            .unwrap();
        assert!(cache.snapshot(RelationKind::Favorite).is_empty());
    }

    #[tokio::test]
    async fn test_slow_refresh_does_not_overwrite_newer_one() {
        let remote = Arc::new(FlakyRemote::new());
        seed(remote.as_ref()).await;
        let cache = Arc::new(RelationCache::new());

        // The first markers list answers with what it read, 100ms late.
        remote.stall_next_list(Collection::Markers, Duration::from_millis(100));
        let slow = {
            let (remote, cache) = (remote.clone(), cache.clone());
            tokio::spawn(async move {
                cache
                    .refresh(remote.as_ref(), RelationKind::Favorite, "u1")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        remote.inner.delete(Collection::Markers, "m1").await.unwrap();
        cache
            .refresh(remote.as_ref(), RelationKind::Favorite, "u1")
            .await
            .unwrap();
        assert!(!cache.get(RelationKind::Favorite, "dune").active);

        slow.await.unwrap().unwrap();
        assert!(!cache.get(RelationKind::Favorite, "dune").active);
    }

    #[test]
    fn test_revert_restores_previous_value() {
        let cache = RelationCache::new();
        let token = cache.apply_local_optimistic_update(
            RelationKind::Viewed,
            "dune",
            RelationState::new(true, None),
        );
        assert!(cache.get(RelationKind::Viewed, "dune").active);

        cache.revert(RelationKind::Viewed, "dune", token);
        assert!(!cache.get(RelationKind::Viewed, "dune").active);
        assert!(cache.snapshot(RelationKind::Viewed).is_empty());
    }

    #[test]
    fn test_writes_after_reset_are_dropped() {
        let cache = RelationCache::new();
        let token = cache.apply_local_optimistic_update(
            RelationKind::Viewed,
            "dune",
            RelationState::new(true, None),
        );
        cache.reset();
        cache.settle(
            RelationKind::Viewed,
            "dune",
            RelationState::new(true, None),
            &token,
        );
        assert!(!cache.get(RelationKind::Viewed, "dune").active);
    }

    #[tokio::test]
    async fn test_disposed_cache_ignores_everything() {
        let remote = MemoryRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();
        cache.dispose();
        assert!(cache.is_disposed());

        cache
            .refresh(&remote, RelationKind::Favorite, "u1")
            .await
            .unwrap();
        cache.apply_local_optimistic_update(
            RelationKind::Favorite,
            "heat",
            RelationState::new(true, None),
        );
        assert!(cache.snapshot(RelationKind::Favorite).is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_signalled() {
        let remote = MemoryRemote::new();
        seed(&remote).await;
        let cache = RelationCache::new();
        let mut changes = cache.changes();

        cache
            .refresh(&remote, RelationKind::Favorite, "u1")
            .await
            .unwrap();
        assert!(changes.has_changed().unwrap());
        let _ = changes.borrow_and_update();
        assert!(!changes.has_changed().unwrap());
    }

    #[test]
    fn test_forget_item() {
        let cache = RelationCache::new();
        cache.apply_local_optimistic_update(
            RelationKind::Liked,
            "dune",
            RelationState::new(true, Some(1)),
        );
        cache.forget_item("dune");
        assert_eq!(
            cache.get(RelationKind::Liked, "dune"),
            RelationState::new(false, Some(0))
        );
    }
}
