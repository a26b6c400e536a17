//! Current-user tracking.
//!
//! Authentication itself is delegated to the hosting backend; this module
//! only tracks who is signed in and tells interested views when that changes.

use tokio::sync::watch;
use tracing::info;

use crate::domain::Identity;

pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
    fn sign_out(&self);
}

/// Signed-in user, observable through a `watch` channel.
pub struct Session {
    tx: watch::Sender<Option<Identity>>,
}

impl Session {
    pub fn new(initial: Option<Identity>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self::new(Some(identity))
    }

    /// Sign in, replacing any current user.
    pub fn sign_in(&self, identity: Identity) {
        info!("Signed in as {}", identity.login);
        self.tx.send_replace(Some(identity));
    }

    pub fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }
}

impl IdentityProvider for Session {
    fn current(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    fn sign_out(&self) {
        if let Some(previous) = self.tx.send_replace(None) {
            info!("Signed out {}", previous.login);
        }
    }
}
