use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info};

use crate::app::{Result, WatchlistError};
use crate::cache::{marker_filter, RelationState};
use crate::domain::{Identity, Item, ItemPatch, Marker, NewItem, RelationKind};
use crate::reconciler::ToggleReconciler;
use crate::remote::{from_record, to_record, Collection, Filter, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
}

/// A favorite as listed in the user's favorites view.
#[derive(Debug, Clone, PartialEq)]
pub struct FavoriteEntry {
    pub marker_id: String,
    pub item: Item,
}

impl ToggleReconciler {
    pub async fn create_item(&self, form: NewItem, user: &Identity) -> Result<Item> {
        let item = form.into_item(&user.user_id, &user.login)?;
        let created = self
            .remote
            .create(Collection::Items, to_record(&item)?)
            .await
            .map_err(WatchlistError::into_remote)?;
        let item: Item = from_record(created)?;
        info!("{} added '{}' ({})", user.login, item.title, item.id);
        Ok(item)
    }

    pub async fn get_item(&self, item_id: &str) -> Result<Item> {
        let record = self.load_item_record(item_id).await?;
        from_record(record)
    }

    /// All items, oldest first.
    pub async fn list_items(&self) -> Result<Vec<Item>> {
        let records = self
            .remote
            .list(Collection::Items, &Filter::new())
            .await
            .map_err(WatchlistError::into_remote)?;
        let mut items = records
            .into_iter()
            .map(from_record::<Item>)
            .collect::<Result<Vec<_>>>()?;
        items.sort_by_key(|i| i.created_at);
        Ok(items)
    }

    /// Edit descriptive attributes. Only the owner may do this.
    pub async fn update_item(
        &self,
        item: &Item,
        user: &Identity,
        patch: ItemPatch,
    ) -> Result<Item> {
        if !item.is_owned_by(&user.user_id) {
            return Err(WatchlistError::PermissionDenied(
                "you cannot edit titles added by other users".into(),
            ));
        }
        patch.validate()?;
        if patch.is_empty() {
            return Ok(item.clone());
        }

        let mut fields = Record::new();
        if let Some(kind) = patch.kind {
            fields.insert("kind".into(), serde_json::to_value(kind)?);
        }
        if let Some(title) = patch.title {
            fields.insert("title".into(), Value::String(title.trim().to_string()));
        }
        if let Some(genre) = patch.genre {
            fields.insert("genre".into(), serde_json::to_value(genre)?);
        }
        if let Some(year) = patch.year {
            fields.insert("year".into(), Value::String(year.trim().to_string()));
        }
        if let Some(platform) = patch.platform {
            fields.insert("platform".into(), serde_json::to_value(platform)?);
        }

        let updated = self
            .remote
            .update(Collection::Items, &item.id, fields)
            .await
            .map_err(WatchlistError::into_remote)?;
        info!("{} edited item {}", user.login, item.id);
        from_record(updated)
    }

    /// Delete an item. Only the owner may do this; the check happens before
    /// anything is sent to the remote store.
    pub async fn delete_item(&self, item: &Item, user: &Identity) -> Result<DeleteOutcome> {
        if !item.is_owned_by(&user.user_id) {
            return Err(WatchlistError::PermissionDenied(
                "you cannot delete titles added by other users".into(),
            ));
        }

        if self.confirm_delete {
            let prompt = format!("Delete '{}'?", item.title);
            if !self.confirm.confirm(&prompt) {
                return Ok(DeleteOutcome::Cancelled);
            }
        }

        self.remote
            .delete(Collection::Items, &item.id)
            .await
            .map_err(WatchlistError::into_remote)?;
        self.cache.forget_item(&item.id);
        info!("{} deleted '{}' ({})", user.login, item.title, item.id);
        Ok(DeleteOutcome::Deleted)
    }

    /// The user's favorites with their items resolved. Favorites pointing at
    /// deleted items are skipped.
    pub async fn favorites(&self, user: &Identity) -> Result<Vec<FavoriteEntry>> {
        let markers = self
            .remote
            .list(
                Collection::Markers,
                &marker_filter(RelationKind::Favorite, &user.user_id),
            )
            .await
            .map_err(WatchlistError::into_remote)?
            .into_iter()
            .map(from_record::<Marker>)
            .collect::<Result<Vec<_>>>()?;

        let lookups = markers.iter().map(|m| self.remote.get(Collection::Items, &m.item_id));
        let items = try_join_all(lookups)
            .await
            .map_err(WatchlistError::into_remote)?;

        let mut entries = Vec::with_capacity(markers.len());
        for (marker, item) in markers.into_iter().zip(items) {
            match item {
                Some(record) => entries.push(FavoriteEntry {
                    marker_id: marker.id,
                    item: from_record(record)?,
                }),
                None => debug!(
                    "Skipping favorite {} of deleted item {}",
                    marker.id, marker.item_id
                ),
            }
        }
        Ok(entries)
    }

    /// Remove a favorite by marker id, from the favorites view.
    pub async fn remove_favorite(&self, marker_id: &str, user: &Identity) -> Result<()> {
        let record = self
            .remote
            .get(Collection::Markers, marker_id)
            .await
            .map_err(WatchlistError::into_remote)?
            .ok_or_else(|| WatchlistError::NotFound(format!("favorite {}", marker_id)))?;
        let marker: Marker = from_record(record)?;

        if !marker.is_owned_by(&user.user_id) {
            return Err(WatchlistError::PermissionDenied(
                "that favorite belongs to another user".into(),
            ));
        }
        if marker.relation != RelationKind::Favorite {
            return Err(WatchlistError::ValidationFailed(format!(
                "marker {} is not a favorite",
                marker_id
            )));
        }

        let token = self.cache.apply_local_optimistic_update(
            RelationKind::Favorite,
            &marker.item_id,
            RelationState::new(false, None),
        );
        if let Err(e) = self.remote.delete(Collection::Markers, marker_id).await {
            self.cache.revert(RelationKind::Favorite, &marker.item_id, token);
            return Err(e.into_remote());
        }
        info!("{} removed favorite {}", user.login, marker_id);
        Ok(())
    }
}
