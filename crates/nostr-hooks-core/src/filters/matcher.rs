use nostr_sdk::prelude::*;

use crate::models::tag_utils::single_letter_values;

/// Decides whether a record satisfies a declarative filter.
///
/// This is the seam for relay-side semantics the engine does not own; the
/// engine only ever asks "does this event belong to that subscriber".
pub trait FilterMatcher: Send + Sync {
    fn matches_filter(&self, filter: &Filter, event: &Event) -> bool;

    /// Filters in a set are ORed.
    fn matches(&self, filters: &[Filter], event: &Event) -> bool {
        filters.iter().any(|f| self.matches_filter(f, event))
    }
}

/// NIP-01 matching. `limit` bounds a result set, it never excludes a record.
#[derive(Debug, Default, Clone, Copy)]
pub struct Nip01Matcher;

impl FilterMatcher for Nip01Matcher {
    fn matches_filter(&self, filter: &Filter, event: &Event) -> bool {
        if let Some(ids) = &filter.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(authors) = &filter.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &filter.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if filter.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if filter.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        for (tag, values) in &filter.generic_tags {
            if !single_letter_values(event, tag).any(|v| values.contains(v)) {
                return false;
            }
        }
        if let Some(search) = &filter.search {
            // NIP-50 ranking is relay-defined; locally a case-insensitive substring is enough
            if !event
                .content
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_at(keys: &Keys, content: &str, ts: u64) -> Event {
        EventBuilder::text_note(content)
            .custom_created_at(Timestamp::from(ts))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn test_matches_kind_and_author() {
        let keys = Keys::generate();
        let event = note_at(&keys, "hello", 100);
        let m = Nip01Matcher;

        let by_author = Filter::new().kind(Kind::TextNote).author(keys.public_key());
        assert!(m.matches_filter(&by_author, &event));
        assert!(!m.matches_filter(&Filter::new().kind(Kind::Metadata), &event));
        assert!(!m.matches_filter(&Filter::new().author(Keys::generate().public_key()), &event));
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let keys = Keys::generate();
        let event = note_at(&keys, "hello", 100);
        let m = Nip01Matcher;

        assert!(m.matches_filter(&Filter::new().since(Timestamp::from(100)), &event));
        assert!(m.matches_filter(&Filter::new().until(Timestamp::from(100)), &event));
        assert!(!m.matches_filter(&Filter::new().until(Timestamp::from(99)), &event));
        assert!(!m.matches_filter(&Filter::new().since(Timestamp::from(101)), &event));
    }

    #[test]
    fn test_limit_does_not_exclude() {
        let keys = Keys::generate();
        let event = note_at(&keys, "hello", 100);
        assert!(Nip01Matcher.matches_filter(&Filter::new().kind(Kind::TextNote).limit(1), &event));
    }

    #[test]
    fn test_matches_tags_and_search() {
        let keys = Keys::generate();
        let event = EventBuilder::text_note("Learning Rust today")
            .tag(Tag::hashtag("rust"))
            .sign_with_keys(&keys)
            .unwrap();
        let t = SingleLetterTag::lowercase(Alphabet::T);
        let m = Nip01Matcher;

        assert!(m.matches_filter(&Filter::new().custom_tag(t.clone(), "rust"), &event));
        assert!(!m.matches_filter(&Filter::new().custom_tag(t, "go"), &event));
        assert!(m.matches_filter(&Filter::new().search("rust"), &event));
        assert!(!m.matches_filter(&Filter::new().search("python"), &event));
    }

    #[test]
    fn test_filter_set_is_ored() {
        let keys = Keys::generate();
        let event = note_at(&keys, "hello", 100);
        let filters = [Filter::new().kind(Kind::Metadata), Filter::new().kind(Kind::TextNote)];
        assert!(Nip01Matcher.matches(&filters, &event));
    }
}
