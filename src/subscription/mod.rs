//! Live-update subscriptions of a mounted view.
//!
//! A mounted view holds one subscription per relation kind, filtered to the
//! current user. Any notification triggers a wholesale refresh of that
//! kind in the [`RelationCache`]. Subscriptions are tied to the mount: they
//! are released on unmount, on identity switch and on drop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::Result;
use crate::cache::{marker_filter, RelationCache};
use crate::domain::{Identity, RelationKind};
use crate::remote::{ChangeKind, Collection, Filter, RemoteCollection, Subscription};

struct Mounted {
    user: Identity,
    pumps: Vec<JoinHandle<()>>,
}

impl Drop for Mounted {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

pub struct SubscriptionManager {
    remote: Arc<dyn RemoteCollection>,
    cache: Arc<RelationCache>,
    kinds: Vec<RelationKind>,
    mounted: Option<Mounted>,
}

impl SubscriptionManager {
    pub fn new(
        remote: Arc<dyn RemoteCollection>,
        cache: Arc<RelationCache>,
        kinds: &[RelationKind],
    ) -> Self {
        Self {
            remote,
            cache,
            kinds: kinds.to_vec(),
            mounted: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn current_user(&self) -> Option<&Identity> {
        self.mounted.as_ref().map(|m| &m.user)
    }

    /// Subscribe for `user` and load the initial state.
    ///
    /// Subscriptions are established before the initial refresh so no change
    /// between the two is lost. If the initial refresh fails the view stays
    /// mounted and the error is returned; the next notification retries.
    pub async fn mount(&mut self, user: &Identity) -> Result<()> {
        if self.is_mounted() {
            self.unmount();
        }

        let generation = self.cache.generation();
        let mut mounted = Mounted {
            user: user.clone(),
            pumps: Vec::new(),
        };

        for &kind in &self.kinds {
            let subscription = self
                .remote
                .subscribe(
                    Collection::Markers,
                    marker_filter(kind, &user.user_id),
                    &[ChangeKind::Created, ChangeKind::Deleted],
                )
                .await?;
            mounted
                .pumps
                .push(self.spawn_pump(kind, &user.user_id, subscription, generation));

            // Other users' likes move the counters too.
            if kind.has_counter() {
                let subscription = self
                    .remote
                    .subscribe(
                        Collection::Items,
                        Filter::new(),
                        &[ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted],
                    )
                    .await?;
                mounted
                    .pumps
                    .push(self.spawn_pump(kind, &user.user_id, subscription, generation));
            }
        }

        info!(
            "Mounted {} subscriptions for {}",
            mounted.pumps.len(),
            user.login
        );
        self.mounted = Some(mounted);

        let mut first_error = None;
        for &kind in &self.kinds {
            if let Err(e) = self
                .cache
                .refresh_at(self.remote.as_ref(), kind, &user.user_id, generation)
                .await
            {
                warn!("Initial {} refresh failed: {}", kind, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release every subscription and invalidate pending cache writes.
    pub fn unmount(&mut self) {
        if let Some(mounted) = self.mounted.take() {
            debug!("Unmounting subscriptions for {}", mounted.user.login);
        }
        self.cache.reset();
    }

    /// Tear down the current identity's subscriptions and, if a user is
    /// given, mount for that user.
    pub async fn switch_identity(&mut self, user: Option<&Identity>) -> Result<()> {
        self.unmount();
        match user {
            Some(user) => self.mount(user).await,
            None => Ok(()),
        }
    }

    /// Track the session until its sender goes away, then unmount.
    pub async fn follow(&mut self, mut identity: watch::Receiver<Option<Identity>>) {
        loop {
            let current = identity.borrow_and_update().clone();
            if let Err(e) = self.switch_identity(current.as_ref()).await {
                warn!("Failed to mount subscriptions: {}", e);
            }
            if identity.changed().await.is_err() {
                break;
            }
        }
        self.unmount();
    }

    fn spawn_pump(
        &self,
        kind: RelationKind,
        user_id: &str,
        mut subscription: Subscription,
        generation: u64,
    ) -> JoinHandle<()> {
        let remote = self.remote.clone();
        let cache = self.cache.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            while subscription.recv().await.is_some() {
                // Collapse a burst of notifications into one refresh.
                let mut coalesced = 0usize;
                while subscription.try_recv().is_some() {
                    coalesced += 1;
                }
                if cache.generation() != generation {
                    break;
                }

                debug!(
                    "Refreshing {} for {} ({} notifications coalesced)",
                    kind, user_id, coalesced
                );
                if let Err(e) = cache
                    .refresh_at(remote.as_ref(), kind, &user_id, generation)
                    .await
                {
                    warn!("Live {} refresh failed: {}", kind, e);
                }
            }
        })
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if self.is_mounted() {
            self.unmount();
        }
    }
}
