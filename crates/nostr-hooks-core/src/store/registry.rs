use std::collections::HashMap;

use crate::models::{FilterSetKey, SubId, SubscriptionConfig, SubscriptionState};

/// Outcome of [`SubscriptionRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First consumer of this id
    Created,
    /// Another consumer of an already live id; only the listener count changed
    Joined,
}

/// Sub-store for live subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: HashMap<SubId, SubscriptionState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Getters =====

    pub fn get(&self, id: &SubId) -> Option<&SubscriptionState> {
        self.subs.get(id)
    }

    pub fn get_mut(&mut self, id: &SubId) -> Option<&mut SubscriptionState> {
        self.subs.get_mut(id)
    }

    pub fn contains(&self, id: &SubId) -> bool {
        self.subs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Live subscriptions with the filter set `key`, excluding `except`.
    pub fn siblings(&self, key: &FilterSetKey, except: Option<&SubId>) -> Vec<SubId> {
        let mut ids: Vec<SubId> = self
            .subs
            .iter()
            .filter(|(id, state)| &state.key == key && Some(*id) != except)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ===== Mutations =====

    pub fn register(&mut self, id: SubId, config: SubscriptionConfig) -> Registration {
        if let Some(existing) = self.subs.get_mut(&id) {
            existing.listener_count += 1;
            return Registration::Joined;
        }
        self.subs.insert(id, SubscriptionState::new(config));
        Registration::Created
    }

    /// Drop one listener. Returns the removed state once the last one is gone.
    pub fn release(&mut self, id: &SubId) -> Option<SubscriptionState> {
        let state = self.subs.get_mut(id)?;
        state.listener_count = state.listener_count.saturating_sub(1);
        if state.listener_count > 0 {
            return None;
        }
        self.subs.remove(id)
    }

    /// Replace the config of a live subscription, re-keying it.
    pub fn update_config(&mut self, id: &SubId, config: SubscriptionConfig) -> bool {
        let Some(state) = self.subs.get_mut(id) else {
            return false;
        };
        state.key = config.key();
        state.config = config;
        true
    }
}
