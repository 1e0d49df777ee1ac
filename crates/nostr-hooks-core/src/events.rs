use std::collections::HashMap;
use std::sync::Arc;

use nostr_sdk::{Event, EventId};

use crate::models::SubId;

/// Change notification delivered to subscription observers
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionUpdate {
    /// A record was attributed to the subscription
    Event(Box<Event>),
    Eose(bool),
    HasMore(bool),
    /// Records detached from the subscription (invalidation or replaceable supersession)
    Evicted(Vec<EventId>),
    /// The last listener unsubscribed
    Closed,
}

pub type UpdateCallback = dyn Fn(&SubId, &SubscriptionUpdate) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observer callbacks keyed by the subscription they watch.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    by_sub: HashMap<SubId, Vec<(ObserverId, Arc<UpdateCallback>)>>,
}

impl Observers {
    pub fn add(&mut self, sub: SubId, callback: Arc<UpdateCallback>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.by_sub.entry(sub).or_default().push((id, callback));
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let mut removed = false;
        self.by_sub.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(oid, _)| *oid != id);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        removed
    }

    pub fn remove_sub(&mut self, sub: &SubId) -> Vec<Arc<UpdateCallback>> {
        self.by_sub
            .remove(sub)
            .map(|cbs| cbs.into_iter().map(|(_, cb)| cb).collect())
            .unwrap_or_default()
    }

    pub fn for_sub(&self, sub: &SubId) -> Vec<Arc<UpdateCallback>> {
        self.by_sub
            .get(sub)
            .map(|cbs| cbs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }
}
