//! Toggle reconciliation of per-user relations against the remote store.
//!
//! A toggle is a read-then-write sequence with no transactional isolation:
//! two concurrent toggles of the same `(relation, item, user)` triple may
//! both read "absent" and both create a marker. That race is accepted.
//! What is guaranteed is that a single toggle never leaves the marker and
//! the item's counter disagreeing: if the counter write fails, the marker
//! write is compensated.

pub mod confirm;
pub mod items;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::app::{Result, WatchlistError};
use crate::cache::{counter_value, RelationCache, RelationState};
use crate::domain::{Identity, Marker, RelationKind};
use crate::remote::{to_record, Collection, Filter, Record, RemoteCollection};

pub use confirm::{AlwaysConfirm, Confirm, NeverConfirm};
pub use items::{DeleteOutcome, FavoriteEntry};

/// Result of a toggle. `count` is the item's counter after the toggle, for
/// relations that carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Activated { count: Option<u64> },
    Deactivated { count: Option<u64> },
    /// The user declined the removal prompt; nothing changed.
    Cancelled,
}

impl ToggleOutcome {
    pub fn is_active(&self) -> Option<bool> {
        match self {
            ToggleOutcome::Activated { .. } => Some(true),
            ToggleOutcome::Deactivated { .. } => Some(false),
            ToggleOutcome::Cancelled => None,
        }
    }
}

pub struct ToggleReconciler {
    remote: Arc<dyn RemoteCollection>,
    cache: Arc<RelationCache>,
    confirm: Arc<dyn Confirm>,
    confirm_removal: HashSet<RelationKind>,
    confirm_delete: bool,
}

/// Filter selecting the marker for one `(relation, item, user)` triple.
pub fn triple_filter(kind: RelationKind, item_id: &str, user_id: &str) -> Filter {
    Filter::new()
        .eq("relation", kind.as_str())
        .eq("item_id", item_id)
        .eq("user_id", user_id)
}

impl ToggleReconciler {
    pub fn new(remote: Arc<dyn RemoteCollection>, cache: Arc<RelationCache>) -> Self {
        Self {
            remote,
            cache,
            confirm: Arc::new(AlwaysConfirm),
            confirm_removal: HashSet::new(),
            confirm_delete: false,
        }
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Ask before removing an existing `kind` marker.
    pub fn confirm_removal_of(mut self, kind: RelationKind, enabled: bool) -> Self {
        if enabled {
            self.confirm_removal.insert(kind);
        } else {
            self.confirm_removal.remove(&kind);
        }
        self
    }

    /// Ask before deleting an item.
    pub fn confirm_item_delete(mut self, enabled: bool) -> Self {
        self.confirm_delete = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<RelationCache> {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteCollection> {
        &self.remote
    }

    /// Flip `kind` between `item_id` and `user`.
    pub async fn toggle(
        &self,
        kind: RelationKind,
        item_id: &str,
        user: &Identity,
    ) -> Result<ToggleOutcome> {
        // Markers must never point at a missing item.
        let item = self.load_item_record(item_id).await?;

        let existing = self
            .remote
            .list(
                Collection::Markers,
                &triple_filter(kind, item_id, &user.user_id),
            )
            .await
            .map_err(WatchlistError::into_remote)?;

        if existing.len() > 1 {
            warn!(
                "{} duplicate {} markers for item {} and user {}",
                existing.len(),
                kind,
                item_id,
                user.user_id
            );
        }

        match existing.into_iter().next() {
            Some(marker) => self.deactivate(kind, item_id, &item, marker).await,
            None => self.activate(kind, item_id, &item, user).await,
        }
    }

    async fn activate(
        &self,
        kind: RelationKind,
        item_id: &str,
        item: &Record,
        user: &Identity,
    ) -> Result<ToggleOutcome> {
        let counter = kind.spec().counter;
        let marker = Marker::new(kind, item_id, &user.user_id);
        let record = to_record(&marker)?;

        let expected_count = counter.map(|field| counter_value(item, field) + 1);
        let token = self.cache.apply_local_optimistic_update(
            kind,
            item_id,
            RelationState::new(true, expected_count),
        );

        if let Err(e) = self.remote.create(Collection::Markers, record).await {
            self.cache.revert(kind, item_id, token);
            return Err(e.into_remote());
        }

        let count = match counter {
            Some(field) => match self.adjust_counter(item_id, field, true).await {
                Ok(count) => Some(count),
                Err(e) => {
                    if let Err(undo) = self.remote.delete(Collection::Markers, &marker.id).await {
                        error!(
                            "Failed to roll back {} marker {} after counter failure: {}",
                            kind, marker.id, undo
                        );
                    }
                    self.cache.revert(kind, item_id, token);
                    return Err(e.into_remote());
                }
            },
            None => None,
        };

        self.cache
            .settle(kind, item_id, RelationState::new(true, count), &token);
        info!("{} marked {} for item {}", user.user_id, kind, item_id);
        Ok(ToggleOutcome::Activated { count })
    }

    async fn deactivate(
        &self,
        kind: RelationKind,
        item_id: &str,
        item: &Record,
        marker: Record,
    ) -> Result<ToggleOutcome> {
        let marker_id = marker
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| WatchlistError::NotFound(format!("{} marker without id", kind)))?
            .to_string();

        if self.confirm_removal.contains(&kind) {
            let prompt = format!("Remove {} mark from this title?", kind);
            if !self.confirm.confirm(&prompt) {
                info!("Removal of {} marker {} cancelled", kind, marker_id);
                return Ok(ToggleOutcome::Cancelled);
            }
        }

        let counter = kind.spec().counter;
        let expected_count = counter.map(|field| counter_value(item, field).saturating_sub(1));
        let token = self.cache.apply_local_optimistic_update(
            kind,
            item_id,
            RelationState::new(false, expected_count),
        );

        if let Err(e) = self.remote.delete(Collection::Markers, &marker_id).await {
            self.cache.revert(kind, item_id, token);
            return Err(e.into_remote());
        }

        let count = match counter {
            Some(field) => match self.adjust_counter(item_id, field, false).await {
                Ok(count) => Some(count),
                Err(e) => {
                    if let Err(undo) = self.remote.create(Collection::Markers, marker).await {
                        error!(
                            "Failed to restore {} marker {} after counter failure: {}",
                            kind, marker_id, undo
                        );
                    }
                    self.cache.revert(kind, item_id, token);
                    return Err(e.into_remote());
                }
            },
            None => None,
        };

        self.cache
            .settle(kind, item_id, RelationState::new(false, count), &token);
        info!("Removed {} marker {} for item {}", kind, marker_id, item_id);
        Ok(ToggleOutcome::Deactivated { count })
    }

    /// Re-read the item and move its counter by one, never below zero.
    async fn adjust_counter(&self, item_id: &str, field: &str, increment: bool) -> Result<u64> {
        let item = self.load_item_record(item_id).await?;
        let current = counter_value(&item, field);
        let next = if increment {
            current + 1
        } else {
            current.saturating_sub(1)
        };

        let mut fields = Record::new();
        fields.insert(field.to_string(), Value::from(next));
        let updated = self
            .remote
            .update(Collection::Items, item_id, fields)
            .await
            .map_err(WatchlistError::into_remote)?;
        Ok(counter_value(&updated, field))
    }

    async fn load_item_record(&self, item_id: &str) -> Result<Record> {
        self.remote
            .get(Collection::Items, item_id)
            .await
            .map_err(WatchlistError::into_remote)?
            .ok_or_else(|| WatchlistError::NotFound(format!("item {}", item_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemKind, NewItem};
    use crate::remote::testing::{FlakyRemote, Op};
    use crate::remote::MemoryRemote;

    fn user(id: &str) -> Identity {
        Identity::new(id, format!("{}@example.com", id))
    }

    async fn setup(remote: Arc<dyn RemoteCollection>) -> (ToggleReconciler, String) {
        let reconciler = ToggleReconciler::new(remote, Arc::new(RelationCache::new()));
        let mut form = NewItem::new(ItemKind::Movie, "Dune");
        form.year = "2021".into();
        let item = reconciler.create_item(form, &user("a")).await.unwrap();
        (reconciler, item.id)
    }

    async fn marker_count(
        remote: &dyn RemoteCollection,
        kind: RelationKind,
        item: &str,
        u: &str,
    ) -> usize {
        remote
            .list(Collection::Markers, &triple_filter(kind, item, u))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_favorite_toggle_parity() {
        let remote: Arc<dyn RemoteCollection> = Arc::new(MemoryRemote::new());
        let (reconciler, item) = setup(remote.clone()).await;
        let b = user("b");

        for n in 1..=5 {
            let outcome = reconciler
                .toggle(RelationKind::Favorite, &item, &b)
                .await
                .unwrap();
            let expected = n % 2 == 1;
            assert_eq!(outcome.is_active(), Some(expected));
            assert_eq!(
                marker_count(remote.as_ref(), RelationKind::Favorite, &item, "b").await,
                usize::from(expected)
            );
            assert_eq!(
                reconciler.cache().get(RelationKind::Favorite, &item).active,
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_relations_are_independent() {
        let remote: Arc<dyn RemoteCollection> = Arc::new(MemoryRemote::new());
        let (reconciler, item) = setup(remote.clone()).await;
        let b = user("b");

        reconciler
            .toggle(RelationKind::Favorite, &item, &b)
            .await
            .unwrap();
        reconciler
            .toggle(RelationKind::Viewed, &item, &b)
            .await
            .unwrap();
        reconciler
            .toggle(RelationKind::Favorite, &item, &b)
            .await
            .unwrap();

        assert_eq!(
            marker_count(remote.as_ref(), RelationKind::Viewed, &item, "b").await,
            1
        );
        assert_eq!(
            marker_count(remote.as_ref(), RelationKind::Favorite, &item, "b").await,
            0
        );
    }

    #[tokio::test]
    async fn test_like_counts_per_user() {
        let remote: Arc<dyn RemoteCollection> = Arc::new(MemoryRemote::new());
        let (reconciler, item) = setup(remote.clone()).await;

        let first = reconciler
            .toggle(RelationKind::Liked, &item, &user("b"))
            .await
            .unwrap();
        assert_eq!(first, ToggleOutcome::Activated { count: Some(1) });
        let second = reconciler
            .toggle(RelationKind::Liked, &item, &user("c"))
            .await
            .unwrap();
        assert_eq!(second, ToggleOutcome::Activated { count: Some(2) });
        let third = reconciler
            .toggle(RelationKind::Liked, &item, &user("b"))
            .await
            .unwrap();
        assert_eq!(third, ToggleOutcome::Deactivated { count: Some(1) });
    }

    #[tokio::test]
    async fn test_counter_never_negative() {
        let remote: Arc<dyn RemoteCollection> = Arc::new(MemoryRemote::new());
        let (reconciler, item) = setup(remote.clone()).await;

        // A marker without a matching increment, as left behind by a race.
        let stray = Marker::new(RelationKind::Liked, &item, "b");
        remote
            .create(Collection::Markers, to_record(&stray).unwrap())
            .await
            .unwrap();

        let first = reconciler
            .toggle(RelationKind::Liked, &item, &user("b"))
            .await
            .unwrap();
        assert_eq!(first, ToggleOutcome::Deactivated { count: Some(0) });

        for _ in 0..2 {
            reconciler
                .toggle(RelationKind::Liked, &item, &user("b"))
                .await
                .unwrap();
        }
        let stored = reconciler.get_item(&item).await.unwrap();
        assert_eq!(stored.likes, 0);
    }

    #[tokio::test]
    async fn test_counter_failure_rolls_back_marker() {
        let flaky = Arc::new(FlakyRemote::new());
        let remote: Arc<dyn RemoteCollection> = flaky.clone();
        let (reconciler, item) = setup(remote.clone()).await;
        let b = user("b");

        flaky.fail_next(Op::Update, Collection::Items);
        let err = reconciler
            .toggle(RelationKind::Liked, &item, &b)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchlistError::RemoteUnavailable(_)));

        assert_eq!(
            marker_count(remote.as_ref(), RelationKind::Liked, &item, "b").await,
            0
        );
        assert_eq!(reconciler.get_item(&item).await.unwrap().likes, 0);
        assert!(!reconciler.cache().get(RelationKind::Liked, &item).active);
    }

    #[tokio::test]
    async fn test_counter_failure_on_removal_restores_marker() {
        let flaky = Arc::new(FlakyRemote::new());
        let remote: Arc<dyn RemoteCollection> = flaky.clone();
        let (reconciler, item) = setup(remote.clone()).await;
        let b = user("b");

        reconciler
            .toggle(RelationKind::Liked, &item, &b)
            .await
            .unwrap();

        flaky.fail_next(Op::Update, Collection::Items);
        assert!(reconciler
            .toggle(RelationKind::Liked, &item, &b)
            .await
            .is_err());

        assert_eq!(
            marker_count(remote.as_ref(), RelationKind::Liked, &item, "b").await,
            1
        );
        assert_eq!(reconciler.get_item(&item).await.unwrap().likes, 1);
        assert_eq!(
            reconciler.cache().get(RelationKind::Liked, &item),
            RelationState::new(true, Some(1))
        );
    }

    #[tokio::test]
    async fn test_marker_failure_reverts_cache() {
        let flaky = Arc::new(FlakyRemote::new());
        let remote: Arc<dyn RemoteCollection> = flaky.clone();
        let (reconciler, item) = setup(remote.clone()).await;

        flaky.fail_next(Op::Create, Collection::Markers);
        let err = reconciler
            .toggle(RelationKind::Viewed, &item, &user("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchlistError::RemoteUnavailable(_)));
        assert!(!reconciler.cache().get(RelationKind::Viewed, &item).active);
    }

    #[tokio::test]
    async fn test_declined_removal_changes_nothing() {
        let remote: Arc<dyn RemoteCollection> = Arc::new(MemoryRemote::new());
        let (reconciler, item) = setup(remote.clone()).await;
        let reconciler = reconciler
            .with_confirm(Arc::new(NeverConfirm))
            .confirm_removal_of(RelationKind::Favorite, true);
        let b = user("b");

        // Adding never asks.
        reconciler
            .toggle(RelationKind::Favorite, &item, &b)
            .await
            .unwrap();
        let outcome = reconciler
            .toggle(RelationKind::Favorite, &item, &b)
            .await
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Cancelled);
        assert_eq!(
            marker_count(remote.as_ref(), RelationKind::Favorite, &item, "b").await,
            1
        );
        assert!(reconciler.cache().get(RelationKind::Favorite, &item).active);
    }

    #[tokio::test]
    async fn test_toggle_on_missing_item_is_not_found() {
        let remote: Arc<dyn RemoteCollection> = Arc::new(MemoryRemote::new());
        let reconciler = ToggleReconciler::new(remote.clone(), Arc::new(RelationCache::new()));

        for kind in RelationKind::ALL {
            let err = reconciler
                .toggle(kind, "ghost", &user("b"))
                .await
                .unwrap_err();
            assert!(matches!(err, WatchlistError::NotFound(_)));
            assert_eq!(marker_count(remote.as_ref(), kind, "ghost", "b").await, 0);
            assert!(!reconciler.cache().get(kind, "ghost").active);
        }
    }

    #[tokio::test]
    async fn test_favorite_on_deleted_item_is_not_found() {
        let remote: Arc<dyn RemoteCollection> = Arc::new(MemoryRemote::new());
        let (reconciler, item) = setup(remote.clone()).await;
        let stored = reconciler.get_item(&item).await.unwrap();
        reconciler.delete_item(&stored, &user("a")).await.unwrap();

        assert!(matches!(
            reconciler
                .toggle(RelationKind::Favorite, &item, &user("b"))
                .await,
            Err(WatchlistError::NotFound(_))
        ));
        assert_eq!(
            marker_count(remote.as_ref(), RelationKind::Favorite, &item, "b").await,
            0
        );
    }
}
