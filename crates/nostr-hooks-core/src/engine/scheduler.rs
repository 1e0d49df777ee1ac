//! Debounced batching of new subscriptions into merged network queries.

use std::collections::BTreeMap;
use std::time::Duration;

use nostr_sdk::Filter;
use tokio::runtime::Handle;

use crate::filters::merge_filters;
use crate::models::{FilterSetKey, SubId};
use crate::timer::Debouncer;

/// A subscription waiting for the batching window to close
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub sub_id: SubId,
    pub key: FilterSetKey,
    pub filters: Vec<Filter>,
    pub relays: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// The debounce timer is running; new entries join the pending batch
    Batching,
}

/// One merged network query ready for dispatch
#[derive(Debug, Clone)]
pub struct Batch {
    pub relays: Vec<String>,
    pub filters: Vec<Filter>,
    pub constituents: Vec<SubId>,
    /// Filter count before merging, for stats
    pub submitted_filters: usize,
}

#[derive(Default)]
pub struct BatchScheduler {
    queue: Vec<QueueEntry>,
    timer: Debouncer,
}

impl BatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SchedulerState {
        if self.timer.is_armed() {
            SchedulerState::Batching
        } else {
            SchedulerState::Idle
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether another subscription with the same filter set is queued
    pub fn has_queued_sibling(&self, key: &FilterSetKey, except: &SubId) -> bool {
        self.queue
            .iter()
            .any(|e| &e.key == key && &e.sub_id != except)
    }

    /// Queue an entry, replacing any earlier entry for the same subscription.
    pub fn enqueue(&mut self, entry: QueueEntry) {
        self.remove(&entry.sub_id);
        self.queue.push(entry);
    }

    pub fn remove(&mut self, id: &SubId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|e| &e.sub_id != id);
        self.queue.len() != before
    }

    /// Start the batching window unless one is already open.
    pub fn arm<F>(&mut self, runtime: &Handle, window: Duration, on_fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.timer.arm(runtime, window, on_fire)
    }

    /// Called by the timer task when it fires.
    pub(crate) fn fired(&mut self) {
        self.timer.disarm();
    }

    /// Close the batching window without firing it.
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    /// Drain the queue into one merged batch per distinct relay set.
    pub fn take_batches(&mut self) -> Vec<Batch> {
        let mut groups: BTreeMap<Vec<String>, Batch> = BTreeMap::new();
        let mut order: Vec<Vec<String>> = Vec::new();

        for entry in self.queue.drain(..) {
            let mut relays = entry.relays;
            relays.sort();
            relays.dedup();

            let batch = groups.entry(relays.clone()).or_insert_with(|| {
                order.push(relays.clone());
                Batch {
                    relays,
                    filters: Vec::new(),
                    constituents: Vec::new(),
                    submitted_filters: 0,
                }
            });
            batch.submitted_filters += entry.filters.len();
            batch.filters.extend(entry.filters);
            batch.constituents.push(entry.sub_id);
        }

        order
            .into_iter()
            .filter_map(|relays| groups.remove(&relays))
            .map(|mut batch| {
                batch.filters = merge_filters(&batch.filters);
                batch
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    fn entry(id: &str, filters: Vec<Filter>, relays: &[&str]) -> QueueEntry {
        QueueEntry {
            sub_id: SubId::from(id),
            key: FilterSetKey::new(&filters),
            filters,
            relays: relays.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_take_batches_merges_same_relay_set() {
        let k1 = Keys::generate().public_key();
        let k2 = Keys::generate().public_key();
        let mut scheduler = BatchScheduler::new();
        scheduler.enqueue(entry(
            "a",
            vec![Filter::new().kind(Kind::Metadata).author(k1)],
            &["wss://r1", "wss://r2"],
        ));
        scheduler.enqueue(entry(
            "b",
            vec![Filter::new().kind(Kind::Metadata).author(k2)],
            &["wss://r2", "wss://r1"],
        ));

        let batches = scheduler.take_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].constituents, vec![SubId::from("a"), SubId::from("b")]);
        assert_eq!(batches[0].filters.len(), 1);
        assert_eq!(batches[0].submitted_filters, 2);
        assert_eq!(batches[0].filters[0].authors.as_ref().map(|a| a.len()), Some(2));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_take_batches_splits_relay_sets() {
        let mut scheduler = BatchScheduler::new();
        scheduler.enqueue(entry("a", vec![Filter::new().kind(Kind::TextNote)], &["wss://r1"]));
        scheduler.enqueue(entry("b", vec![Filter::new().kind(Kind::TextNote)], &["wss://r2"]));
        scheduler.enqueue(entry("c", vec![Filter::new().kind(Kind::TextNote)], &["wss://r1"]));

        let batches = scheduler.take_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].relays, vec!["wss://r1".to_string()]);
        assert_eq!(batches[0].constituents.len(), 2);
        assert_eq!(batches[1].constituents, vec![SubId::from("b")]);
    }

    #[test]
    fn test_enqueue_replaces_and_remove() {
        let mut scheduler = BatchScheduler::new();
        let filters = vec![Filter::new().kind(Kind::TextNote)];
        scheduler.enqueue(entry("a", filters.clone(), &[]));
        scheduler.enqueue(entry("a", filters.clone(), &[]));
        scheduler.enqueue(entry("b", filters.clone(), &[]));
        assert_eq!(scheduler.len(), 2);

        let key = FilterSetKey::new(&filters);
        assert!(scheduler.has_queued_sibling(&key, &SubId::from("a")));
        assert!(scheduler.remove(&SubId::from("b")));
        assert!(!scheduler.has_queued_sibling(&key, &SubId::from("a")));
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_follows_timer() {
        let mut scheduler = BatchScheduler::new();
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        assert!(scheduler.arm(&Handle::current(), Duration::from_millis(10), || {}));
        assert_eq!(scheduler.state(), SchedulerState::Batching);
        assert!(!scheduler.arm(&Handle::current(), Duration::from_millis(10), || {}));

        scheduler.cancel();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
