//! In-flight network queries and the task that drives each of them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use nostr_sdk::prelude::*;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::pagination::{has_more_after_eose, page_has_more};
use super::{EngineInner, EngineState, Updates};
use crate::events::SubscriptionUpdate;
use crate::filters::valid_filters;
use crate::models::SubId;
use crate::nostr::pool::{PoolNotification, RelayPool};

pub(crate) type QueryId = u64;

pub(crate) enum QueryPurpose {
    /// Regular batch (or forced singleton) serving its constituents' own filters
    Batch,
    /// One older page for a single subscription
    LoadMore {
        sub_id: SubId,
        filters: Vec<Filter>,
        /// Page size used to decide whether another page may exist
        limit: Option<usize>,
    },
    /// Fresh fetch replacing the cached results of a sibling group
    Invalidate {
        stale: HashMap<SubId, HashSet<EventId>>,
    },
}

pub(crate) struct NetworkQuery {
    pub relays: Vec<String>,
    pub constituents: HashSet<SubId>,
    pub purpose: QueryPurpose,
    pub eose: bool,
    /// Set at EOSE when the query is about to close
    pub closing: bool,
    pub received: HashSet<EventId>,
    /// Number of (event, subscriber) attributions made by this query
    pub attributed: usize,
    pub cancel: watch::Sender<bool>,
}

impl NetworkQuery {
    /// Whether a new subscription may piggyback on this query
    pub fn joinable(&self) -> bool {
        !self.closing && !matches!(self.purpose, QueryPurpose::LoadMore { .. })
    }
}

impl EngineInner {
    /// Register a network query for `constituents` and spawn its driver task.
    pub(crate) fn dispatch(
        &self,
        state: &mut EngineState,
        relays: Vec<String>,
        filters: Vec<Filter>,
        constituents: Vec<SubId>,
        purpose: QueryPurpose,
        submitted_filters: usize,
    ) -> QueryId {
        let id = state.next_query_id();
        for sub in &constituents {
            if let Some(st) = state.registry.get_mut(sub) {
                st.pending_queries += 1;
            }
        }

        info!(
            query_id = id,
            subs = constituents.len(),
            filters = filters.len(),
            relays = relays.len(),
            "dispatching network query"
        );
        self.stats
            .update(|s| s.record_dispatch(submitted_filters, filters.len()));

        let (cancel, cancel_rx) = watch::channel(false);
        state.queries.insert(
            id,
            NetworkQuery {
                relays: relays.clone(),
                constituents: constituents.into_iter().collect(),
                purpose,
                eose: false,
                closing: false,
                received: HashSet::new(),
                attributed: 0,
                cancel,
            },
        );

        self.runtime.spawn(run_query(
            self.weak.clone(),
            self.pool.clone(),
            id,
            relays,
            filters,
            cancel_rx,
        ));
        id
    }

    pub(crate) fn on_network_event(&self, id: QueryId, event: Event) {
        let mut updates = Updates::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(query) = state.queries.get_mut(&id) else {
                return;
            };
            self.stats.update(|s| s.record_event(event.kind.as_u16()));
            query.received.insert(event.id);

            let targets: Vec<SubId> = match &query.purpose {
                QueryPurpose::LoadMore {
                    sub_id, filters, ..
                } => {
                    if query.constituents.contains(sub_id) && self.matcher.matches(filters, &event)
                    {
                        vec![sub_id.clone()]
                    } else {
                        Vec::new()
                    }
                }
                _ => query
                    .constituents
                    .iter()
                    .filter(|sub| {
                        state.registry.get(sub).is_some_and(|st| {
                            self.matcher
                                .matches(&valid_filters(&st.config.filters), &event)
                        })
                    })
                    .cloned()
                    .collect(),
            };
            if targets.is_empty() {
                debug!(query_id = id, event_id = %event.id, "event matched no subscriber");
                return;
            }

            let outcome = state.cache.add_event(event.clone(), targets.iter());
            query.attributed += outcome.attributed.len();
            for sub in outcome.attributed {
                updates.push((sub, SubscriptionUpdate::Event(Box::new(event.clone()))));
            }
            for (sub, old) in outcome.replaced {
                updates.push((sub, SubscriptionUpdate::Evicted(vec![old])));
            }
        }
        self.notify(updates);
    }

    /// Returns true when the query should close.
    pub(crate) fn on_network_eose(&self, id: QueryId) -> bool {
        let mut updates = Updates::new();
        let close = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(query) = state.queries.get_mut(&id) else {
                return true;
            };
            if query.eose {
                return query.closing;
            }
            query.eose = true;
            debug!(query_id = id, received = query.received.len(), "network query reached EOSE");

            if let QueryPurpose::Invalidate { stale } = &mut query.purpose {
                for (sub, ids) in stale.drain() {
                    let gone: Vec<EventId> = ids
                        .into_iter()
                        .filter(|e| !query.received.contains(e))
                        .collect();
                    let detached = state.cache.detach(&sub, &gone);
                    if !detached.is_empty() {
                        debug!(sub_id = %sub, evicted = detached.len(), "dropped stale records");
                        updates.push((sub, SubscriptionUpdate::Evicted(detached)));
                    }
                }
            }

            let page = match &query.purpose {
                QueryPurpose::LoadMore { limit, .. } => {
                    Some(page_has_more(*limit, query.attributed))
                }
                _ => None,
            };

            for sub in &query.constituents {
                let Some(st) = state.registry.get_mut(sub) else {
                    continue;
                };
                st.pending_queries = st.pending_queries.saturating_sub(1);
                if let Some(has_more) = page {
                    st.has_more = has_more;
                    updates.push((sub.clone(), SubscriptionUpdate::HasMore(has_more)));
                    continue;
                }
                if st.pending_queries == 0 && !st.eose {
                    st.eose = true;
                    st.has_more =
                        has_more_after_eose(&st.config.filters, state.cache.count_for(sub));
                    updates.push((sub.clone(), SubscriptionUpdate::Eose(true)));
                    updates.push((sub.clone(), SubscriptionUpdate::HasMore(st.has_more)));
                }
            }

            let close = page.is_some()
                || query.constituents.iter().all(|sub| {
                    state
                        .registry
                        .get(sub)
                        .map_or(true, |st| st.config.options.close_after_eose)
                });
            query.closing = close;
            close
        };
        self.notify(updates);
        close
    }

    /// The pool refused the query. Dependents keep `eose = false`.
    pub(crate) fn fail_query(&self, id: QueryId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(query) = state.queries.remove(&id) else {
            return;
        };
        self.stats.update(|s| s.queries_failed += 1);
        for sub in &query.constituents {
            if let Some(st) = state.registry.get_mut(sub) {
                st.pending_queries = st.pending_queries.saturating_sub(1);
            }
        }
    }

    pub(crate) fn finish_query(&self, id: QueryId) {
        if self.state.lock().queries.remove(&id).is_some() {
            debug!(query_id = id, "network query closed");
        }
    }
}

async fn run_query(
    engine: Weak<EngineInner>,
    pool: Arc<dyn RelayPool>,
    id: QueryId,
    relays: Vec<String>,
    filters: Vec<Filter>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut subscription = match pool.subscribe(relays, filters).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(query_id = id, error = %e, "network query failed");
            if let Some(inner) = engine.upgrade() {
                inner.fail_query(id);
            }
            return;
        }
    };

    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    debug!(query_id = id, "network query cancelled");
                    break;
                }
            }
            notification = subscription.notifications.recv() => {
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                match notification {
                    Some(PoolNotification::Event(event)) => inner.on_network_event(id, *event),
                    Some(PoolNotification::Eose) => {
                        if inner.on_network_eose(id) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    pool.unsubscribe(subscription.id).await;
    if let Some(inner) = engine.upgrade() {
        inner.finish_query(id);
    }
}
