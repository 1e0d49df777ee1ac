use std::sync::atomic::{AtomicBool, Ordering};

use nostr_sdk::Event;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::SubscriptionEngine;
use crate::events::{ObserverId, SubscriptionUpdate};
use crate::models::{SubId, SubscriptionConfig, SubscriptionStatus};

/// Consumer handle of one subscription listener.
///
/// Dropping the handle releases the listener; the subscription itself closes
/// when its last listener is gone.
pub struct Subscription {
    engine: SubscriptionEngine,
    id: SubId,
    observers: Mutex<Vec<ObserverId>>,
    closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(engine: SubscriptionEngine, id: SubId) -> Self {
        Self {
            engine,
            id,
            observers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SubId {
        &self.id
    }

    pub fn config(&self) -> Option<SubscriptionConfig> {
        self.engine.subscription_config(&self.id)
    }

    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.engine.status(&self.id)
    }

    /// Records, newest first
    pub fn events(&self) -> Vec<Event> {
        self.engine.events(&self.id)
    }

    pub fn eose(&self) -> bool {
        self.status().is_some_and(|s| s.eose)
    }

    pub fn has_more(&self) -> bool {
        self.status().is_some_and(|s| s.has_more)
    }

    /// Nothing received yet and the relays have not finished either
    pub fn is_loading(&self) -> bool {
        !self.eose() && self.events().is_empty()
    }

    pub fn load_more(&self, limit: Option<usize>) -> bool {
        self.engine.load_more(&self.id, limit)
    }

    pub fn invalidate(&self) -> bool {
        self.engine.invalidate(&self.id, None)
    }

    pub fn on_update<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&SubId, &SubscriptionUpdate) + Send + Sync + 'static,
    {
        let observer = self.engine.observe(&self.id, callback);
        self.observers.lock().push(observer);
        observer
    }

    /// Stream of updates for this subscription
    pub fn updates(&self) -> mpsc::UnboundedReceiver<SubscriptionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_update(move |_, update| {
            let _ = tx.send(update.clone());
        });
        rx
    }

    pub fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for observer in self.observers.lock().drain(..) {
            self.engine.remove_observer(observer);
        }
        self.engine.unsubscribe(&self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
