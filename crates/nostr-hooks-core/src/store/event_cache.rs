//! Shared, deduplicated store of received events.
//!
//! Every cached event carries the set of subscriptions interested in it.
//! The per-subscription view is derived by filtering on that set. Events
//! whose set becomes empty stay until the next [`EventCache::sweep`], so a
//! subscription opened shortly after another one closed can still reuse them.

use std::collections::{HashMap, HashSet};

use nostr_sdk::prelude::*;

use crate::filters::FilterMatcher;
use crate::models::replaceable::supersedes;
use crate::models::{ReplaceableKey, SubId};

struct CacheEntry {
    event: Event,
    subscribers: HashSet<SubId>,
}

/// Result of [`EventCache::add_event`]
#[derive(Debug, Default)]
pub struct AddOutcome {
    /// Subscriptions that gained this event
    pub attributed: Vec<SubId>,
    /// Older replaceable events detached from a subscription by this one
    pub replaced: Vec<(SubId, EventId)>,
}

#[derive(Default)]
pub struct EventCache {
    entries: HashMap<EventId, CacheEntry>,
    replaceable: HashMap<ReplaceableKey, HashSet<EventId>>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.entries.get(id).map(|e| &e.event)
    }

    // ===== Mutations =====

    /// Insert `event` (once) and attribute it to `subs`.
    pub fn add_event<'a>(
        &mut self,
        event: Event,
        subs: impl IntoIterator<Item = &'a SubId>,
    ) -> AddOutcome {
        let id = event.id;
        if !self.entries.contains_key(&id) {
            if let Some(key) = ReplaceableKey::of(&event) {
                self.replaceable.entry(key).or_default().insert(id);
            }
            self.entries.insert(
                id,
                CacheEntry {
                    event,
                    subscribers: HashSet::new(),
                },
            );
        }

        let mut outcome = AddOutcome::default();
        for sub in subs {
            if let Some(replaced) = self.attribute(&id, sub) {
                outcome.attributed.push(sub.clone());
                outcome
                    .replaced
                    .extend(replaced.into_iter().map(|old| (sub.clone(), old)));
            }
        }
        outcome
    }

    /// Attribute already cached events to `sub`. Returns the ids that were added.
    pub fn attach(&mut self, sub: &SubId, ids: &[EventId]) -> Vec<EventId> {
        ids.iter()
            .filter(|id| self.attribute(id, sub).is_some())
            .copied()
            .collect()
    }

    /// Link one cached event to `sub`, honoring replaceable supersession.
    ///
    /// Returns `None` when nothing changed (unknown event, already linked, or
    /// a newer version is already linked), otherwise the superseded ids.
    fn attribute(&mut self, id: &EventId, sub: &SubId) -> Option<Vec<EventId>> {
        let entry = self.entries.get(id)?;
        if entry.subscribers.contains(sub) {
            return None;
        }

        let mut superseded = Vec::new();
        if let Some(key) = ReplaceableKey::of(&entry.event) {
            let rivals: Vec<EventId> = self
                .replaceable
                .get(&key)
                .into_iter()
                .flatten()
                .filter(|rival| *rival != id)
                .filter(|rival| {
                    self.entries
                        .get(*rival)
                        .is_some_and(|e| e.subscribers.contains(sub))
                })
                .copied()
                .collect();

            for rival in rivals {
                let Some(current) = self.entries.get(&rival) else {
                    continue;
                };
                if !supersedes(&entry.event, &current.event) {
                    return None;
                }
                superseded.push(rival);
            }
        }

        for old in &superseded {
            if let Some(e) = self.entries.get_mut(old) {
                e.subscribers.remove(sub);
            }
        }
        if let Some(entry) = self.entries.get_mut(id) {
            entry.subscribers.insert(sub.clone());
        }
        Some(superseded)
    }

    /// Detach `sub` from the given events.
    pub fn detach(&mut self, sub: &SubId, ids: &[EventId]) -> Vec<EventId> {
        ids.iter()
            .filter(|id| {
                self.entries
                    .get_mut(*id)
                    .is_some_and(|e| e.subscribers.remove(sub))
            })
            .copied()
            .collect()
    }

    /// Remove `sub` from every event. Events that would be left unreferenced
    /// are handed to `siblings`, live subscriptions with identical filters
    /// that conceptually own the same data. Returns how many events were
    /// orphaned (eligible for the next sweep).
    pub fn purge(&mut self, sub: &SubId, siblings: &[SubId]) -> usize {
        let mut orphaned = 0;
        for entry in self.entries.values_mut() {
            if !entry.subscribers.remove(sub) || !entry.subscribers.is_empty() {
                continue;
            }
            if siblings.is_empty() {
                orphaned += 1;
            } else {
                entry.subscribers.extend(siblings.iter().cloned());
            }
        }
        orphaned
    }

    /// Evict every event no subscription references. Returns the eviction count.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.subscribers.is_empty());

        let entries = &self.entries;
        self.replaceable.retain(|_, ids| {
            ids.retain(|id| entries.contains_key(id));
            !ids.is_empty()
        });

        before - self.entries.len()
    }

    // ===== Getters =====

    /// Events attributed to `sub`, oldest first.
    pub fn records_for(&self, sub: &SubId) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .entries
            .values()
            .filter(|e| e.subscribers.contains(sub))
            .map(|e| e.event.clone())
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        events
    }

    pub fn ids_for(&self, sub: &SubId) -> Vec<EventId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.subscribers.contains(sub))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn count_for(&self, sub: &SubId) -> usize {
        self.entries
            .values()
            .filter(|e| e.subscribers.contains(sub))
            .count()
    }

    /// Oldest `created_at` among the events attributed to `sub`.
    pub fn oldest_for(&self, sub: &SubId) -> Option<Timestamp> {
        self.entries
            .values()
            .filter(|e| e.subscribers.contains(sub))
            .map(|e| e.event.created_at)
            .min()
    }

    /// Cached events (referenced or not) that match any of `filters`.
    pub fn matching(&self, filters: &[Filter], matcher: &dyn FilterMatcher) -> Vec<EventId> {
        self.entries
            .iter()
            .filter(|(_, e)| matcher.matches(filters, &e.event))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn subscribers_of(&self, id: &EventId) -> Option<&HashSet<SubId>> {
        self.entries.get(id).map(|e| &e.subscribers)
    }
}
