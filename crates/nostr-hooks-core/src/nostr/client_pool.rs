//! [`RelayPool`] backed by a `nostr_sdk::Client`.
//!
//! Every filter of a pool subscription becomes its own REQ with a
//! pre-registered subscription id, so events and EOSE can be routed before
//! the REQ call even returns. A subscription reports a single
//! [`PoolNotification::Eose`] once every REQ has finished on every relay it
//! was sent to (EOSE or CLOSED).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pool::{PoolNotification, PoolSubId, PoolSubscription, RelayPool};
use crate::error::HooksError;

#[derive(Default)]
struct ReqProgress {
    /// Relays the REQ was accepted by; unknown until the REQ call returns
    expected: Option<usize>,
    finished: HashSet<String>,
}

impl ReqProgress {
    fn is_complete(&self) -> bool {
        self.expected.is_some_and(|n| self.finished.len() >= n)
    }
}

struct Stream {
    tx: mpsc::UnboundedSender<PoolNotification>,
    reqs: HashMap<String, ReqProgress>,
    eose_sent: bool,
}

impl Stream {
    fn maybe_eose(&mut self) {
        if !self.eose_sent && self.reqs.values().all(ReqProgress::is_complete) {
            self.eose_sent = true;
            let _ = self.tx.send(PoolNotification::Eose);
        }
    }
}

/// REQ id -> stream routing table shared with the router task
#[derive(Default)]
struct RouterState {
    routes: HashMap<String, PoolSubId>,
    streams: HashMap<PoolSubId, Stream>,
}

impl RouterState {
    fn open(
        &mut self,
        stream: PoolSubId,
        reqs: &[SubscriptionId],
        tx: mpsc::UnboundedSender<PoolNotification>,
    ) {
        let mut progress = HashMap::new();
        for req in reqs {
            self.routes.insert(req.to_string(), stream.clone());
            progress.insert(req.to_string(), ReqProgress::default());
        }
        self.streams.insert(
            stream,
            Stream {
                tx,
                reqs: progress,
                eose_sent: false,
            },
        );
    }

    fn close(&mut self, stream: &PoolSubId) -> Vec<String> {
        let Some(s) = self.streams.remove(stream) else {
            return Vec::new();
        };
        let reqs: Vec<String> = s.reqs.into_keys().collect();
        for req in &reqs {
            self.routes.remove(req);
        }
        reqs
    }

    fn stream_for(&mut self, req: &str) -> Option<&mut Stream> {
        let stream = self.routes.get(req)?;
        self.streams.get_mut(stream)
    }

    fn route_event(&mut self, req: &str, event: Event) -> bool {
        match self.stream_for(req) {
            Some(stream) => stream
                .tx
                .send(PoolNotification::Event(Box::new(event)))
                .is_ok(),
            None => false,
        }
    }

    /// Record that `relay` finished `req` (EOSE or CLOSED)
    fn finish(&mut self, req: &str, relay: String) {
        if let Some(stream) = self.stream_for(req) {
            if let Some(progress) = stream.reqs.get_mut(req) {
                progress.finished.insert(relay);
            }
            stream.maybe_eose();
        }
    }

    /// Set how many relays accepted `req`. Zero drops the REQ from its stream.
    fn accepted(&mut self, req: &str, relays: usize) {
        let Some(stream) = self.stream_for(req) else {
            return;
        };
        if relays == 0 {
            stream.reqs.remove(req);
            self.routes.remove(req);
            return;
        }
        if let Some(progress) = stream.reqs.get_mut(req) {
            progress.expected = Some(relays);
        }
        stream.maybe_eose();
    }

    fn has_reqs(&self, stream: &PoolSubId) -> bool {
        self.streams.get(stream).is_some_and(|s| !s.reqs.is_empty())
    }

    fn check_eose(&mut self, stream: &PoolSubId) {
        if let Some(s) = self.streams.get_mut(stream) {
            s.maybe_eose();
        }
    }
}

pub struct NostrClientPool {
    client: Client,
    state: Arc<Mutex<RouterState>>,
    router: JoinHandle<()>,
}

impl NostrClientPool {
    /// Add `relays` to a fresh client and connect, bounded by `timeout`.
    pub async fn connect(relays: &[String], timeout: Duration) -> Result<Self, HooksError> {
        let client = Client::default();
        for url in relays {
            client.add_relay(url.as_str()).await.map_err(HooksError::pool)?;
        }

        let connect_start = std::time::Instant::now();
        if tokio::time::timeout(timeout, client.connect()).await.is_err() {
            warn!(
                elapsed = ?connect_start.elapsed(),
                "relay connect timed out, continuing in background"
            );
        } else {
            info!(relays = relays.len(), elapsed = ?connect_start.elapsed(), "connected to relays");
        }

        Self::from_client(client)
    }

    /// Wrap an existing client. Must be called inside a tokio runtime.
    pub fn from_client(client: Client) -> Result<Self, HooksError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HooksError::NoRuntime)?;
        let state = Arc::new(Mutex::new(RouterState::default()));
        let router = runtime.spawn(route_notifications(client.clone(), state.clone()));
        Ok(Self {
            client,
            state,
            router,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn ensure_relays(&self, relays: &[String]) {
        for url in relays {
            match self.client.add_relay(url.as_str()).await {
                Ok(true) => {
                    if let Err(e) = self.client.connect_relay(url.as_str()).await {
                        warn!(relay = %url, error = %e, "failed to connect relay");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(relay = %url, error = %e, "invalid relay url"),
            }
        }
    }

    async fn send_req(&self, relays: &[String], req: SubscriptionId, filter: Filter) -> usize {
        let result = if relays.is_empty() {
            self.client.subscribe_with_id(req.clone(), filter, None).await
        } else {
            self.client
                .subscribe_with_id_to(relays.to_vec(), req.clone(), filter, None)
                .await
        };
        match result {
            Ok(output) => {
                for (relay, error) in &output.failed {
                    debug!(req = %req, relay = %relay, error = %error, "REQ rejected");
                }
                output.success.len()
            }
            Err(e) => {
                warn!(req = %req, error = %e, "REQ failed");
                0
            }
        }
    }
}

impl Drop for NostrClientPool {
    fn drop(&mut self) {
        self.router.abort();
    }
}

impl RelayPool for NostrClientPool {
    fn subscribe(
        &self,
        relays: Vec<String>,
        filters: Vec<Filter>,
    ) -> BoxFuture<'_, Result<PoolSubscription, HooksError>> {
        Box::pin(async move {
            self.ensure_relays(&relays).await;

            let id = PoolSubId(uuid::Uuid::new_v4().simple().to_string());
            let reqs: Vec<SubscriptionId> =
                filters.iter().map(|_| SubscriptionId::generate()).collect();
            let (tx, notifications) = mpsc::unbounded_channel();
            self.state.lock().open(id.clone(), &reqs, tx);

            for (req, filter) in reqs.into_iter().zip(filters) {
                let accepted = self.send_req(&relays, req.clone(), filter).await;
                self.state.lock().accepted(&req.to_string(), accepted);
            }

            let mut state = self.state.lock();
            if !state.has_reqs(&id) {
                state.close(&id);
                return Err(HooksError::Pool {
                    message: "no relay accepted the subscription".to_string(),
                });
            }
            state.check_eose(&id);
            Ok(PoolSubscription { id, notifications })
        })
    }

    fn unsubscribe(&self, id: PoolSubId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let reqs = self.state.lock().close(&id);
            for req in reqs {
                self.client.unsubscribe(&SubscriptionId::new(req)).await;
            }
        })
    }

    fn publish(&self, relays: Vec<String>, event: Event) -> BoxFuture<'_, Result<(), HooksError>> {
        Box::pin(async move {
            let output = if relays.is_empty() {
                self.client.send_event(&event).await
            } else {
                self.ensure_relays(&relays).await;
                self.client.send_event_to(relays, &event).await
            }
            .map_err(HooksError::pool)?;

            if output.success.is_empty() {
                let reasons: Vec<String> = output.failed.values().cloned().collect();
                return Err(HooksError::Pool {
                    message: format!("event rejected by every relay: {}", reasons.join("; ")),
                });
            }
            debug!(event_id = %event.id, relays = output.success.len(), "event published");
            Ok(())
        })
    }
}

async fn route_notifications(client: Client, state: Arc<Mutex<RouterState>>) {
    let mut notifications = client.notifications();
    loop {
        match notifications.recv().await {
            Ok(RelayPoolNotification::Event {
                subscription_id,
                event,
                ..
            }) => {
                state.lock().route_event(&subscription_id.to_string(), *event);
            }
            Ok(RelayPoolNotification::Message { relay_url, message }) => match message {
                RelayMessage::EndOfStoredEvents(sub_id) => {
                    state.lock().finish(&sub_id.to_string(), relay_url.to_string());
                }
                RelayMessage::Closed {
                    subscription_id,
                    message,
                    ..
                } => {
                    debug!(
                        req = %subscription_id,
                        relay = %relay_url,
                        reason = %message,
                        "REQ closed by relay"
                    );
                    state
                        .lock()
                        .finish(&subscription_id.to_string(), relay_url.to_string());
                }
                _ => {}
            },
            Ok(RelayPoolNotification::Shutdown) => {
                info!("relay pool shut down, router exiting");
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "notification router lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(keys: &Keys) -> Event {
        EventBuilder::text_note("hi").sign_with_keys(keys).unwrap()
    }

    fn open_stream(
        reqs: &[&str],
    ) -> (RouterState, PoolSubId, mpsc::UnboundedReceiver<PoolNotification>) {
        let mut state = RouterState::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = PoolSubId("stream".to_string());
        let reqs: Vec<SubscriptionId> = reqs.iter().map(|r| SubscriptionId::new(*r)).collect();
        state.open(id.clone(), &reqs, tx);
        (state, id, rx)
    }

    #[test]
    fn test_routes_events_by_req_id() {
        let (mut state, _, mut rx) = open_stream(&["a"]);
        let event = note(&Keys::generate());

        assert!(state.route_event("a", event.clone()));
        assert!(!state.route_event("unknown", event.clone()));
        assert_eq!(rx.try_recv().unwrap(), PoolNotification::Event(Box::new(event)));
    }

    #[test]
    fn test_eose_waits_for_every_req_and_relay() {
        let (mut state, _, mut rx) = open_stream(&["a", "b"]);
        state.accepted("a", 2);
        state.accepted("b", 1);

        state.finish("a", "wss://one".to_string());
        state.finish("b", "wss://one".to_string());
        assert!(rx.try_recv().is_err());

        state.finish("a", "wss://two".to_string());
        assert_eq!(rx.try_recv().unwrap(), PoolNotification::Eose);

        state.finish("a", "wss://two".to_string());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_eose_before_req_returns() {
        let (mut state, _, mut rx) = open_stream(&["a"]);
        state.finish("a", "wss://one".to_string());
        assert!(rx.try_recv().is_err());

        state.accepted("a", 1);
        assert_eq!(rx.try_recv().unwrap(), PoolNotification::Eose);
    }

    #[test]
    fn test_rejected_req_is_dropped() {
        let (mut state, id, mut rx) = open_stream(&["a", "b"]);
        state.accepted("a", 0);
        assert!(state.has_reqs(&id));

        state.accepted("b", 1);
        state.finish("b", "wss://one".to_string());
        assert_eq!(rx.try_recv().unwrap(), PoolNotification::Eose);

        let (mut state, id, _rx) = open_stream(&["a"]);
        state.accepted("a", 0);
        assert!(!state.has_reqs(&id));
    }

    #[test]
    fn test_close_removes_routes() {
        let (mut state, id, _rx) = open_stream(&["a", "b"]);
        let mut reqs = state.close(&id);
        reqs.sort();
        assert_eq!(reqs, vec!["a".to_string(), "b".to_string()]);
        assert!(!state.route_event("a", note(&Keys::generate())));
    }
}
