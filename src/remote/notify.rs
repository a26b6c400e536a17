use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::remote::{ChangeEvent, ChangeKind, Collection, Filter};

const FEED_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 64;

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A matching record changed.
    Change(ChangeEvent),
    /// The subscriber fell behind and some notifications were dropped.
    /// Consumers should resynchronise from the store.
    Missed(u64),
}

/// In-process change fan-out shared by the bundled backends.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is not an error: nobody is watching yet.
        let _ = self.tx.send(event);
    }

    /// Open a filtered subscription. Must be called within a tokio runtime.
    pub fn subscribe(
        &self,
        collection: Collection,
        filter: Filter,
        kinds: &[ChangeKind],
    ) -> Subscription {
        let mut rx = self.tx.subscribe();
        let (tx, out) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let kinds = kinds.to_vec();

        let pump = tokio::spawn(async move {
            loop {
                let notification = match rx.recv().await {
                    Ok(event) => {
                        if event.collection != collection
                            || !kinds.contains(&event.kind)
                            || !filter.matches(&event.record)
                        {
                            continue;
                        }
                        Notification::Change(event)
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Subscription on {} lagged by {} events", collection, n);
                        Notification::Missed(n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if tx.send(notification).await.is_err() {
                    break;
                }
            }
            debug!("Subscription pump on {} stopped", collection);
        });

        Subscription {
            rx: out,
            pump: Some(pump),
            cancelled: false,
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a live subscription.
///
/// Cancelled explicitly with [`Subscription::cancel`] or implicitly on drop.
/// A cancelled subscription never yields another notification.
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
    pump: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl Subscription {
    /// Build a subscription from a raw channel. Backends that produce
    /// notifications themselves use this instead of [`ChangeFeed`].
    pub fn from_channel(rx: mpsc::Receiver<Notification>) -> Self {
        Self {
            rx,
            pump: None,
            cancelled: false,
        }
    }

    /// Wait for the next notification. `None` once cancelled or closed.
    pub async fn recv(&mut self) -> Option<Notification> {
        if self.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Take an already queued notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        if self.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
