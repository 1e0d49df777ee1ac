//! The subscription engine.
//!
//! Owns the shared event cache, the registry of live subscriptions, the
//! batching scheduler and every in-flight network query. All state sits
//! behind one lock; observer callbacks run after it is released.

mod handle;
mod pagination;
mod query;
pub mod scheduler;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use nostr_sdk::prelude::*;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, info};

pub use handle::Subscription;
pub use scheduler::{Batch, BatchScheduler, QueueEntry, SchedulerState};

use self::pagination::has_more_after_eose;
use self::query::{NetworkQuery, QueryId, QueryPurpose};
use crate::config::EngineConfig;
use crate::error::HooksError;
use crate::events::{ObserverId, Observers, SubscriptionUpdate, UpdateCallback};
use crate::filters::{merge_filters, valid_filters, FilterMatcher, Nip01Matcher};
use crate::models::{SubId, SubscriptionConfig, SubscriptionStatus};
use crate::nostr::pool::RelayPool;
use crate::nostr::publish::{EventDraft, EventSigner};
use crate::stats::{EngineStats, SharedEngineStats};
use crate::store::{EventCache, Registration, SubscriptionRegistry};
use crate::timer::Debouncer;

pub(crate) type Updates = Vec<(SubId, SubscriptionUpdate)>;

#[derive(Default)]
pub(crate) struct EngineState {
    pub cache: EventCache,
    pub registry: SubscriptionRegistry,
    pub scheduler: BatchScheduler,
    pub queries: HashMap<QueryId, NetworkQuery>,
    pub gc: Debouncer,
    /// Subscriptions opened with `force`
    pub forced: HashSet<SubId>,
    next_query_id: QueryId,
}

impl EngineState {
    fn next_query_id(&mut self) -> QueryId {
        self.next_query_id += 1;
        self.next_query_id
    }
}

pub(crate) struct EngineInner {
    state: Mutex<EngineState>,
    observers: Mutex<Observers>,
    config: EngineConfig,
    runtime: Handle,
    pool: Arc<dyn RelayPool>,
    matcher: Arc<dyn FilterMatcher>,
    signer: RwLock<Option<Arc<dyn EventSigner>>>,
    stats: SharedEngineStats,
    weak: Weak<EngineInner>,
}

/// Cloneable handle to one engine instance.
#[derive(Clone)]
pub struct SubscriptionEngine {
    inner: Arc<EngineInner>,
}

impl SubscriptionEngine {
    /// Create an engine on the current tokio runtime.
    pub fn new(pool: Arc<dyn RelayPool>, config: EngineConfig) -> Result<Self, HooksError> {
        Self::with_matcher(pool, Arc::new(Nip01Matcher), config)
    }

    pub fn with_matcher(
        pool: Arc<dyn RelayPool>,
        matcher: Arc<dyn FilterMatcher>,
        config: EngineConfig,
    ) -> Result<Self, HooksError> {
        let runtime = Handle::try_current().map_err(|_| HooksError::NoRuntime)?;
        info!(
            default_relays = config.default_relays.len(),
            gc_delay_ms = config.gc_delay_ms,
            "subscription engine started"
        );
        let inner = Arc::new_cyclic(|weak| EngineInner {
            state: Mutex::new(EngineState::default()),
            observers: Mutex::new(Observers::default()),
            config,
            runtime,
            pool,
            matcher,
            signer: RwLock::new(None),
            stats: SharedEngineStats::new(),
            weak: weak.clone(),
        });
        Ok(Self { inner })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// A subscription config with the engine's default options.
    pub fn config_for(&self, filters: Vec<Filter>) -> SubscriptionConfig {
        SubscriptionConfig::new(filters).options(self.inner.config.default_options.clone())
    }

    pub fn subscribe(&self, config: SubscriptionConfig) -> Subscription {
        self.subscribe_with_id(SubId::generate(), config)
    }

    /// Subscribe under a caller-chosen id. Reusing a live id adds a listener
    /// to the existing subscription instead of opening a new one.
    pub fn subscribe_with_id(&self, id: SubId, config: SubscriptionConfig) -> Subscription {
        self.inner.handle_new_sub(id.clone(), config);
        Subscription::new(self.clone(), id)
    }

    /// Drop one listener of `id`. Prefer dropping the [`Subscription`].
    pub fn unsubscribe(&self, id: &SubId) {
        self.inner.unsubscribe(id);
    }

    /// Records of `id`, newest first.
    pub fn events(&self, id: &SubId) -> Vec<Event> {
        let mut events = self.inner.state.lock().cache.records_for(id);
        events.reverse();
        events
    }

    pub fn status(&self, id: &SubId) -> Option<SubscriptionStatus> {
        self.inner.state.lock().registry.get(id).map(|st| st.status())
    }

    pub fn subscription_config(&self, id: &SubId) -> Option<SubscriptionConfig> {
        self.inner
            .state
            .lock()
            .registry
            .get(id)
            .map(|st| st.config.clone())
    }

    /// Fetch the page of records older than the oldest one `id` holds.
    /// Returns false when there is nothing to load.
    pub fn load_more(&self, id: &SubId, limit: Option<usize>) -> bool {
        self.inner.load_more(id, limit)
    }

    /// Refetch `id` (with an updated config, if given) ignoring the cache.
    pub fn invalidate(&self, id: &SubId, config: Option<SubscriptionConfig>) -> bool {
        self.inner.invalidate(id, config)
    }

    pub fn observe<F>(&self, id: &SubId, callback: F) -> ObserverId
    where
        F: Fn(&SubId, &SubscriptionUpdate) + Send + Sync + 'static,
    {
        self.inner
            .observers
            .lock()
            .add(id.clone(), Arc::new(callback) as Arc<UpdateCallback>)
    }

    pub fn remove_observer(&self, observer: ObserverId) -> bool {
        self.inner.observers.lock().remove(observer)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    pub fn cached_event_count(&self) -> usize {
        self.inner.state.lock().cache.len()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.state.lock().scheduler.state()
    }

    /// Evict unreferenced records now instead of waiting for the GC timer.
    pub fn sweep(&self) -> usize {
        self.inner.collect_garbage()
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.stats.snapshot()
    }

    pub fn set_signer(&self, signer: Arc<dyn EventSigner>) {
        *self.inner.signer.write() = Some(signer);
    }

    pub fn clear_signer(&self) {
        *self.inner.signer.write() = None;
    }

    /// Sign `draft` and send it to `relays` (the default relays when empty).
    pub async fn publish(
        &self,
        draft: EventDraft,
        relays: Vec<String>,
    ) -> Result<Event, HooksError> {
        let signer = self.inner.signer.read().clone().ok_or(HooksError::NoSigner)?;
        let event = signer.sign(draft.into_builder()?)?;
        let relays = self.inner.resolve_relays(&relays);

        self.inner.pool.publish(relays, event.clone()).await?;
        info!(event_id = %event.id, kind = event.kind.as_u16(), "event published");
        Ok(event)
    }
}

impl EngineInner {
    fn resolve_relays(&self, relays: &[String]) -> Vec<String> {
        let mut relays = if relays.is_empty() {
            self.config.default_relays.clone()
        } else {
            relays.to_vec()
        };
        relays.sort();
        relays.dedup();
        relays
    }

    fn notify(&self, updates: Updates) {
        for (sub, update) in updates {
            let callbacks = self.observers.lock().for_sub(&sub);
            for callback in callbacks {
                callback(&sub, &update);
            }
        }
    }

    fn handle_new_sub(&self, id: SubId, config: SubscriptionConfig) {
        let mut updates = Updates::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.registry.register(id.clone(), config.clone()) == Registration::Joined {
                debug!(sub_id = %id, "listener joined live subscription");
                return;
            }
            self.stats.update(|s| s.subscriptions_opened += 1);

            if !config.options.enabled {
                debug!(sub_id = %id, "subscription disabled");
                return;
            }

            let filters = valid_filters(&config.filters);
            if filters.is_empty() {
                debug!(sub_id = %id, "no valid filters");
                if let Some(st) = state.registry.get_mut(&id) {
                    st.eose = true;
                }
                updates.push((id.clone(), SubscriptionUpdate::Eose(true)));
            } else if config.options.invalidate {
                self.invalidate_locked(state, &id, None, &mut updates);
            } else if config.options.force {
                state.forced.insert(id.clone());
                let relays = self.resolve_relays(&config.relays);
                let submitted = filters.len();
                self.dispatch(
                    state,
                    relays,
                    merge_filters(&filters),
                    vec![id.clone()],
                    QueryPurpose::Batch,
                    submitted,
                );
            } else if !self.join_in_flight(state, &id, &config, &mut updates)
                && !self.join_queued(state, &id, &config, &filters, &mut updates)
                && !self.serve_from_cache(state, &id, &config, &filters, &mut updates)
            {
                self.enqueue(state, &id, &config, filters);
            }
        }
        self.notify(updates);
    }

    /// Piggyback on a running query that already serves a sibling.
    fn join_in_flight(
        &self,
        state: &mut EngineState,
        id: &SubId,
        config: &SubscriptionConfig,
        updates: &mut Updates,
    ) -> bool {
        let key = config.key();
        let siblings = state.registry.siblings(&key, Some(id));
        if siblings.is_empty() {
            return false;
        }
        let relays = self.resolve_relays(&config.relays);
        let share_forced = self.config.share_forced_results;
        let forced = &state.forced;

        let Some((query_id, query)) = state.queries.iter_mut().find(|(_, q)| {
            q.joinable()
                && q.relays == relays
                && q.constituents
                    .iter()
                    .any(|c| siblings.contains(c) && (share_forced || !forced.contains(c)))
        }) else {
            return false;
        };

        query.constituents.insert(id.clone());
        let query_eose = query.eose;
        let query_id = *query_id;
        debug!(sub_id = %id, query_id, "joined in-flight query");

        let sibling_has_more = siblings
            .iter()
            .find_map(|s| state.registry.get(s).map(|st| st.has_more))
            .unwrap_or(false);
        attach_sibling_records(state, id, &siblings, updates);

        if let Some(st) = state.registry.get_mut(id) {
            if query_eose {
                st.eose = true;
                st.has_more = sibling_has_more;
                updates.push((id.clone(), SubscriptionUpdate::Eose(true)));
                updates.push((id.clone(), SubscriptionUpdate::HasMore(st.has_more)));
            } else {
                st.pending_queries += 1;
            }
        }
        true
    }

    /// Ride along with a sibling still waiting in the batching window.
    fn join_queued(
        &self,
        state: &mut EngineState,
        id: &SubId,
        config: &SubscriptionConfig,
        filters: &[Filter],
        updates: &mut Updates,
    ) -> bool {
        let key = config.key();
        if !state.scheduler.has_queued_sibling(&key, id) {
            return false;
        }
        let siblings = state.registry.siblings(&key, Some(id));
        attach_sibling_records(state, id, &siblings, updates);
        debug!(sub_id = %id, "joined queued batch");
        self.enqueue(state, id, config, filters.to_vec());
        true
    }

    /// Answer from records already in the cache.
    ///
    /// Matches are attached either way; only a subscription that closes after
    /// EOSE is fully served, a live one still needs a network query.
    fn serve_from_cache(
        &self,
        state: &mut EngineState,
        id: &SubId,
        config: &SubscriptionConfig,
        filters: &[Filter],
        updates: &mut Updates,
    ) -> bool {
        let mut hits = state.cache.matching(filters, self.matcher.as_ref());
        if !self.config.share_forced_results {
            let forced = &state.forced;
            let cache = &state.cache;
            hits.retain(|event_id| {
                cache.subscribers_of(event_id).map_or(true, |subs| {
                    subs.is_empty() || subs.iter().any(|s| !forced.contains(s))
                })
            });
        }
        if hits.is_empty() {
            return false;
        }

        attach_records(state, id, &hits, updates);
        if !config.options.close_after_eose {
            return false;
        }

        let count = state.cache.count_for(id);
        if let Some(st) = state.registry.get_mut(id) {
            st.eose = true;
            st.has_more = has_more_after_eose(&st.config.filters, count);
            debug!(sub_id = %id, records = count, "served from cache");
            updates.push((id.clone(), SubscriptionUpdate::Eose(true)));
            updates.push((id.clone(), SubscriptionUpdate::HasMore(st.has_more)));
        }
        true
    }

    fn enqueue(
        &self,
        state: &mut EngineState,
        id: &SubId,
        config: &SubscriptionConfig,
        filters: Vec<Filter>,
    ) {
        state.scheduler.enqueue(QueueEntry {
            sub_id: id.clone(),
            key: config.key(),
            filters,
            relays: self.resolve_relays(&config.relays),
        });
        let weak = self.weak.clone();
        let armed = state
            .scheduler
            .arm(&self.runtime, config.options.batching_interval(), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.process_queue();
                }
            });
        debug!(
            sub_id = %id,
            queued = state.scheduler.len(),
            new_window = armed,
            "subscription queued"
        );
    }

    fn process_queue(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.scheduler.fired();

        for batch in state.scheduler.take_batches() {
            let constituents: Vec<SubId> = batch
                .constituents
                .into_iter()
                .filter(|sub| state.registry.contains(sub))
                .collect();
            if constituents.is_empty() {
                continue;
            }
            self.dispatch(
                state,
                batch.relays,
                batch.filters,
                constituents,
                QueryPurpose::Batch,
                batch.submitted_filters,
            );
        }
    }

    fn unsubscribe(&self, id: &SubId) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(removed) = state.registry.release(id) else {
                debug!(sub_id = %id, "listener released");
                return;
            };
            if state.scheduler.remove(id) && state.scheduler.is_empty() {
                state.scheduler.cancel();
            }
            state.forced.remove(id);
            detach_from_queries(state, std::slice::from_ref(id), true);

            let siblings = state.registry.siblings(&removed.key, None);
            let orphaned = state.cache.purge(id, &siblings);
            self.stats.update(|s| s.subscriptions_closed += 1);
            info!(sub_id = %id, orphaned, "subscription closed");

            let weak = self.weak.clone();
            state.gc.arm(&self.runtime, self.config.gc_delay(), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.collect_garbage();
                }
            });
        }

        let callbacks = self.observers.lock().remove_sub(id);
        for callback in callbacks {
            callback(id, &SubscriptionUpdate::Closed);
        }
    }

    fn collect_garbage(&self) -> usize {
        let mut state = self.state.lock();
        state.gc.disarm();
        let evicted = state.cache.sweep();
        if evicted > 0 {
            self.stats.update(|s| s.gc_evictions += evicted as u64);
            info!(evicted, remaining = state.cache.len(), "cache sweep");
        }
        evicted
    }
}

/// Take `subs` out of the queries serving them and cancel every query left
/// with nobody to serve. Load-more pages are only touched when `pages` is set.
pub(crate) fn detach_from_queries(state: &mut EngineState, subs: &[SubId], pages: bool) {
    let registry = &mut state.registry;
    let mut idle = Vec::new();
    for (query_id, query) in state.queries.iter_mut() {
        if !pages && matches!(query.purpose, QueryPurpose::LoadMore { .. }) {
            continue;
        }
        let mut detached = false;
        for sub in subs {
            if !query.constituents.remove(sub) {
                continue;
            }
            detached = true;
            if let QueryPurpose::Invalidate { stale } = &mut query.purpose {
                stale.remove(sub);
            }
            if !query.eose {
                if let Some(st) = registry.get_mut(sub) {
                    st.pending_queries = st.pending_queries.saturating_sub(1);
                }
            }
        }
        if !detached {
            continue;
        }
        let nobody_listening = query.eose
            && query.constituents.iter().all(|sub| {
                registry
                    .get(sub)
                    .map_or(true, |st| st.config.options.close_after_eose)
            });
        if query.constituents.is_empty() || nobody_listening {
            idle.push(*query_id);
        }
    }
    for query_id in idle {
        if let Some(query) = state.queries.remove(&query_id) {
            let _ = query.cancel.send(true);
            debug!(query_id, "cancelled network query without subscribers");
        }
    }
}

fn attach_records(state: &mut EngineState, id: &SubId, ids: &[EventId], updates: &mut Updates) {
    for event_id in state.cache.attach(id, ids) {
        if let Some(event) = state.cache.get(&event_id) {
            updates.push((id.clone(), SubscriptionUpdate::Event(Box::new(event.clone()))));
        }
    }
}

fn attach_sibling_records(
    state: &mut EngineState,
    id: &SubId,
    siblings: &[SubId],
    updates: &mut Updates,
) {
    let mut ids: Vec<EventId> = siblings
        .iter()
        .flat_map(|s| state.cache.ids_for(s))
        .collect();
    ids.sort();
    ids.dedup();
    attach_records(state, id, &ids, updates);
}
