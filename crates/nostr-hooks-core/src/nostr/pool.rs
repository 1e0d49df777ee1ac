//! Seam between the engine and the relay network.

use futures::future::BoxFuture;
use nostr_sdk::{Event, Filter};
use tokio::sync::mpsc;

use crate::error::HooksError;

/// Handle of one network subscription opened on a [`RelayPool`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolSubId(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum PoolNotification {
    Event(Box<Event>),
    /// Every relay has delivered its stored events
    Eose,
}

pub struct PoolSubscription {
    pub id: PoolSubId,
    pub notifications: mpsc::UnboundedReceiver<PoolNotification>,
}

/// Relay pool the engine dispatches network queries to.
///
/// Implementations keep a subscription open until [`RelayPool::unsubscribe`]
/// is called, forwarding live events after the single EOSE notification.
pub trait RelayPool: Send + Sync + 'static {
    fn subscribe(
        &self,
        relays: Vec<String>,
        filters: Vec<Filter>,
    ) -> BoxFuture<'_, Result<PoolSubscription, HooksError>>;

    fn unsubscribe(&self, id: PoolSubId) -> BoxFuture<'_, ()>;

    fn publish(&self, relays: Vec<String>, event: Event) -> BoxFuture<'_, Result<(), HooksError>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// One recorded `subscribe` call
    pub struct MockCall {
        pub id: PoolSubId,
        pub relays: Vec<String>,
        pub filters: Vec<Filter>,
        tx: mpsc::UnboundedSender<PoolNotification>,
    }

    /// In-memory pool recording every call; tests drive results by hand.
    #[derive(Default)]
    pub struct MockPool {
        calls: Mutex<Vec<MockCall>>,
        unsubscribed: Mutex<Vec<PoolSubId>>,
        published: Mutex<Vec<(Vec<String>, Event)>>,
        next_id: AtomicUsize,
        pub fail: AtomicBool,
    }

    impl MockPool {
        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        pub fn filters(&self, call: usize) -> Vec<Filter> {
            self.calls.lock()[call].filters.clone()
        }

        pub fn relays(&self, call: usize) -> Vec<String> {
            self.calls.lock()[call].relays.clone()
        }

        pub fn call_id(&self, call: usize) -> PoolSubId {
            self.calls.lock()[call].id.clone()
        }

        pub fn push_event(&self, call: usize, event: &Event) {
            let _ = self.calls.lock()[call]
                .tx
                .send(PoolNotification::Event(Box::new(event.clone())));
        }

        pub fn push_eose(&self, call: usize) {
            let _ = self.calls.lock()[call].tx.send(PoolNotification::Eose);
        }

        pub fn is_unsubscribed(&self, call: usize) -> bool {
            let id = self.call_id(call);
            self.unsubscribed.lock().contains(&id)
        }

        pub fn published(&self) -> Vec<(Vec<String>, Event)> {
            self.published.lock().clone()
        }
    }

    impl RelayPool for MockPool {
        fn subscribe(
            &self,
            relays: Vec<String>,
            filters: Vec<Filter>,
        ) -> BoxFuture<'_, Result<PoolSubscription, HooksError>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(HooksError::pool("relay unreachable"));
                }
                let (tx, notifications) = mpsc::unbounded_channel();
                let id = PoolSubId(format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
                self.calls.lock().push(MockCall {
                    id: id.clone(),
                    relays,
                    filters,
                    tx,
                });
                Ok(PoolSubscription { id, notifications })
            })
        }

        fn unsubscribe(&self, id: PoolSubId) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.unsubscribed.lock().push(id);
            })
        }

        fn publish(
            &self,
            relays: Vec<String>,
            event: Event,
        ) -> BoxFuture<'_, Result<(), HooksError>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(HooksError::pool("relay unreachable"));
                }
                self.published.lock().push((relays, event));
                Ok(())
            })
        }
    }
}
