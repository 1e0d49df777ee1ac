//! "Load more" paging and cache invalidation.

use std::collections::{HashMap, HashSet};

use nostr_sdk::prelude::*;
use tracing::{debug, info};

use super::query::QueryPurpose;
use super::{detach_from_queries, EngineInner, EngineState, Updates};
use crate::events::SubscriptionUpdate;
use crate::filters::{merge_filters, valid_filters};
use crate::models::{SubId, SubscriptionConfig};

/// Whether a subscription that just reached EOSE may have older records.
///
/// A result set that filled its largest `limit` was probably truncated by the
/// relays. Without any limit, relays still cap responses, so any result at
/// all may be a partial one.
pub(crate) fn has_more_after_eose(filters: &[Filter], count: usize) -> bool {
    match filters.iter().filter_map(|f| f.limit).max() {
        Some(limit) => limit > 0 && count >= limit,
        None => count > 0,
    }
}

/// Same rule applied to a single page.
pub(crate) fn page_has_more(limit: Option<usize>, received: usize) -> bool {
    match limit {
        Some(limit) => limit > 0 && received >= limit,
        None => received > 0,
    }
}

/// Filters for the page that ends just before `until`.
pub(crate) fn page_filters(
    filters: &[Filter],
    until: Timestamp,
    limit: Option<usize>,
) -> Vec<Filter> {
    valid_filters(filters)
        .into_iter()
        .map(|f| {
            let f = f.until(until);
            match limit {
                Some(limit) => f.limit(limit),
                None => f,
            }
        })
        .collect()
}

impl EngineInner {
    pub(crate) fn load_more(&self, id: &SubId, limit: Option<usize>) -> bool {
        let mut updates = Updates::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(st) = state.registry.get(id) else {
                return false;
            };
            if !(st.has_more && st.eose) {
                debug!(sub_id = %id, has_more = st.has_more, eose = st.eose, "load more ignored");
                return false;
            }
            let Some(oldest) = state.cache.oldest_for(id) else {
                return false;
            };

            let until = Timestamp::from(oldest.as_u64().saturating_sub(1));
            let filters = page_filters(&st.config.filters, until, limit);
            if filters.is_empty() {
                return false;
            }
            let page_limit = limit.or_else(|| filters.iter().filter_map(|f| f.limit).max());
            let relays = self.resolve_relays(&st.config.relays);

            if let Some(st) = state.registry.get_mut(id) {
                st.has_more = false;
            }
            updates.push((id.clone(), SubscriptionUpdate::HasMore(false)));

            info!(
                sub_id = %id,
                until = until.as_u64(),
                limit = ?page_limit,
                "loading older records"
            );
            let submitted = filters.len();
            self.dispatch(
                state,
                relays,
                filters.clone(),
                vec![id.clone()],
                QueryPurpose::LoadMore {
                    sub_id: id.clone(),
                    filters,
                    limit: page_limit,
                },
                submitted,
            );
        }
        self.notify(updates);
        true
    }

    pub(crate) fn invalidate(&self, id: &SubId, config: Option<SubscriptionConfig>) -> bool {
        let mut updates = Updates::new();
        let dispatched = {
            let mut guard = self.state.lock();
            self.invalidate_locked(&mut guard, id, config, &mut updates)
        };
        self.notify(updates);
        dispatched
    }

    /// Refetch the filter set of `id` ignoring the cache, on behalf of every
    /// live subscription sharing it.
    pub(crate) fn invalidate_locked(
        &self,
        state: &mut EngineState,
        id: &SubId,
        config: Option<SubscriptionConfig>,
        updates: &mut Updates,
    ) -> bool {
        if let Some(config) = config {
            if !state.registry.update_config(id, config) {
                return false;
            }
        }
        let Some(st) = state.registry.get(id) else {
            return false;
        };
        if !st.config.options.enabled {
            debug!(sub_id = %id, "invalidate ignored for disabled subscription");
            return false;
        }
        let filters = valid_filters(&st.config.filters);
        if filters.is_empty() {
            return false;
        }
        let relays = self.resolve_relays(&st.config.relays);
        let siblings = state.registry.siblings(&st.key, None);
        detach_from_queries(state, &siblings, false);

        let mut stale = HashMap::new();
        for sub in &siblings {
            state.scheduler.remove(sub);
            if let Some(st) = state.registry.get_mut(sub) {
                st.eose = false;
                st.has_more = false;
            }
            let cached: HashSet<EventId> = state.cache.ids_for(sub).into_iter().collect();
            stale.insert(sub.clone(), cached);
            updates.push((sub.clone(), SubscriptionUpdate::Eose(false)));
        }

        info!(sub_id = %id, siblings = siblings.len(), "invalidating cached results");
        let submitted = filters.len();
        self.dispatch(
            state,
            relays,
            merge_filters(&filters),
            siblings,
            QueryPurpose::Invalidate { stale },
            submitted,
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_more_after_eose() {
        let limited = vec![Filter::new().kind(Kind::TextNote).limit(2)];
        assert!(has_more_after_eose(&limited, 2));
        assert!(!has_more_after_eose(&limited, 1));

        let unlimited = vec![Filter::new().kind(Kind::TextNote)];
        assert!(has_more_after_eose(&unlimited, 1));
        assert!(!has_more_after_eose(&unlimited, 0));

        let zero = vec![Filter::new().kind(Kind::TextNote).limit(0)];
        assert!(!has_more_after_eose(&zero, 0));
    }

    #[test]
    fn test_page_has_more() {
        assert!(page_has_more(Some(2), 2));
        assert!(!page_has_more(Some(2), 1));
        assert!(page_has_more(None, 1));
        assert!(!page_has_more(None, 0));
    }

    #[test]
    fn test_page_filters_override_until_and_limit() {
        let filters = vec![
            Filter::new().kind(Kind::TextNote).limit(20),
            Filter {
                authors: Some(Default::default()),
                ..Filter::new()
            },
        ];
        let paged = page_filters(&filters, Timestamp::from(99), Some(5));

        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].until, Some(Timestamp::from(99)));
        assert_eq!(paged[0].limit, Some(5));

        let paged = page_filters(&filters, Timestamp::from(99), None);
        assert_eq!(paged[0].limit, Some(20));
    }
}
