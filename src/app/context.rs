use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{Result, WatchlistError};
use crate::cache::RelationCache;
use crate::config::Config;
use crate::domain::{Identity, RelationKind};
use crate::identity::{IdentityProvider, Session};
use crate::reconciler::{AlwaysConfirm, Confirm, ToggleReconciler};
use crate::remote::{MemoryRemote, RemoteCollection, SqliteRemote};
use crate::subscription::SubscriptionManager;

/// Wires the remote store, the cache, the reconciler and the session.
pub struct AppContext {
    pub remote: Arc<dyn RemoteCollection>,
    pub cache: Arc<RelationCache>,
    pub reconciler: ToggleReconciler,
    pub session: Session,
}

impl AppContext {
    pub fn new(
        config: &Config,
        db_path: Option<PathBuf>,
        identity: Option<Identity>,
        confirm: Arc<dyn Confirm>,
    ) -> Result<Self> {
        let db_path = match db_path.or_else(|| config.store.path.clone()) {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let remote: Arc<dyn RemoteCollection> = Arc::new(SqliteRemote::new(&db_path)?);
        Ok(Self::with_remote(remote, config, identity, confirm))
    }

    pub fn in_memory() -> Self {
        Self::with_remote(
            Arc::new(MemoryRemote::new()),
            &Config::default(),
            None,
            Arc::new(AlwaysConfirm),
        )
    }

    pub fn with_remote(
        remote: Arc<dyn RemoteCollection>,
        config: &Config,
        identity: Option<Identity>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        let cache = Arc::new(RelationCache::new());
        let reconciler = ToggleReconciler::new(remote.clone(), cache.clone())
            .with_confirm(confirm)
            .confirm_removal_of(RelationKind::Favorite, config.relations.confirm_unfavorite)
            .confirm_item_delete(config.relations.confirm_delete);
        let session = Session::new(identity.or_else(|| config.identity.identity()));

        Self {
            remote,
            cache,
            reconciler,
            session,
        }
    }

    /// The signed-in user, or a `PermissionDenied` error telling how to sign in.
    pub fn require_user(&self) -> Result<Identity> {
        self.session.current().ok_or_else(|| {
            WatchlistError::PermissionDenied(
                "not signed in; pass --user or set [identity] user_id in the config".into(),
            )
        })
    }

    /// A subscription manager bound to this context's store and cache.
    pub fn subscriptions(&self, kinds: &[RelationKind]) -> SubscriptionManager {
        SubscriptionManager::new(self.remote.clone(), self.cache.clone(), kinds)
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| WatchlistError::Config("Could not find data directory".into()))?;
        let watchlist_dir = data_dir.join("watchlist");
        std::fs::create_dir_all(&watchlist_dir)?;
        Ok(watchlist_dir.join("watchlist.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_context_has_no_user() {
        let ctx = AppContext::in_memory();
        assert!(matches!(
            ctx.require_user(),
            Err(WatchlistError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_explicit_identity_wins_over_config() {
        let mut config = Config::default();
        config.identity.user_id = Some("from-config".into());

        let ctx = AppContext::with_remote(
            Arc::new(MemoryRemote::new()),
            &config,
            Some(Identity::new("from-flag", "flag@example.com")),
            Arc::new(AlwaysConfirm),
        );
        assert_eq!(ctx.require_user().unwrap().user_id, "from-flag");
    }

    #[test]
    fn test_on_disk_context() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(
            &Config::default(),
            Some(dir.path().join("watchlist.db")),
            None,
            Arc::new(AlwaysConfirm),
        )
        .unwrap();
        assert!(ctx.session.current().is_none());
    }
}
