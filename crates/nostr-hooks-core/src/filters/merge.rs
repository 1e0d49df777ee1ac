//! Filter normalization and merging
//!
//! Collapses independently issued filters that share a "shape" into one
//! filter with unioned identity lists, so that fan-out query patterns (many
//! consumers each asking for one author's profile, say) cost one REQ.

use std::collections::HashMap;

use nostr_sdk::Filter;

/// A filter with an empty list constraint (or an empty value inside a tag
/// list, or an empty search string) can never match and is dropped.
pub fn is_filter_corrupted(filter: &Filter) -> bool {
    filter.ids.as_ref().is_some_and(|ids| ids.is_empty())
        || filter.authors.as_ref().is_some_and(|a| a.is_empty())
        || filter.kinds.as_ref().is_some_and(|k| k.is_empty())
        || filter.search.as_ref().is_some_and(|s| s.is_empty())
        || filter
            .generic_tags
            .values()
            .any(|values| values.is_empty() || values.iter().any(|v| v.is_empty()))
}

pub fn valid_filters(filters: &[Filter]) -> Vec<Filter> {
    filters
        .iter()
        .filter(|f| !is_filter_corrupted(f))
        .cloned()
        .collect()
}

/// Grouping key: filters with equal keys differ only in their identity lists
/// (ids, authors, tag values) and can be unioned.
#[derive(Debug, PartialEq, Eq, Hash)]
struct MergeKey {
    shape: Vec<String>,
    kinds: Option<Vec<u16>>,
    since: Option<u64>,
    until: Option<u64>,
    limit: Option<usize>,
    /// Search is not unionable: such filters only merge with identical ones
    exact: Option<String>,
}

impl MergeKey {
    fn of(filter: &Filter) -> Self {
        let mut shape: Vec<String> = [
            ("ids", filter.ids.is_some()),
            ("authors", filter.authors.is_some()),
            ("kinds", filter.kinds.is_some()),
            ("search", filter.search.is_some()),
            ("since", filter.since.is_some()),
            ("until", filter.until.is_some()),
            ("limit", filter.limit.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| name.to_string())
        .collect();
        shape.extend(filter.generic_tags.keys().map(|tag| format!("#{tag:?}")));
        let exact = filter
            .search
            .as_ref()
            .map(|_| serde_json::to_string(filter).unwrap_or_default());

        Self {
            shape,
            kinds: filter
                .kinds
                .as_ref()
                .map(|kinds| kinds.iter().map(|k| k.as_u16()).collect()),
            since: filter.since.map(|t| t.as_u64()),
            until: filter.until.map(|t| t.as_u64()),
            limit: filter.limit,
            exact,
        }
    }
}

fn absorb(target: &mut Filter, other: &Filter) {
    if let (Some(ids), Some(more)) = (target.ids.as_mut(), other.ids.as_ref()) {
        ids.extend(more.iter().cloned());
    }
    if let (Some(authors), Some(more)) = (target.authors.as_mut(), other.authors.as_ref()) {
        authors.extend(more.iter().cloned());
    }
    for (tag, values) in &other.generic_tags {
        target
            .generic_tags
            .entry(tag.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
}

/// Merge a set of filters into a minimal equivalent set.
///
/// Corrupted filters are dropped, compatible ones are unioned. Groups come
/// out in the order their first member appeared.
pub fn merge_filters(filters: &[Filter]) -> Vec<Filter> {
    let mut merged: Vec<Filter> = Vec::new();
    let mut index: HashMap<MergeKey, usize> = HashMap::new();

    for filter in filters.iter().filter(|f| !is_filter_corrupted(f)) {
        let key = MergeKey::of(filter);
        match index.get(&key) {
            Some(&pos) => absorb(&mut merged[pos], filter),
            None => {
                index.insert(key, merged.len());
                merged.push(filter.clone());
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    fn pk() -> PublicKey {
        Keys::generate().public_key()
    }

    fn p_tag() -> SingleLetterTag {
        SingleLetterTag::lowercase(Alphabet::P)
    }

    #[test]
    fn test_merges_filters_with_same_properties() {
        let (a, b) = (pk(), pk());
        let merged = merge_filters(&[Filter::new().author(a), Filter::new().author(b)]);
        assert_eq!(merged, vec![Filter::new().authors([a, b])]);
    }

    #[test]
    fn test_does_not_merge_different_shapes() {
        let keys = Keys::generate();
        let id = EventBuilder::text_note("x").sign_with_keys(&keys).unwrap().id;
        let filters = vec![Filter::new().author(keys.public_key()), Filter::new().id(id)];
        assert_eq!(merge_filters(&filters), filters);
    }

    #[test]
    fn test_drops_filters_with_empty_lists() {
        let a = pk();
        let empty = Filter {
            authors: Some(Default::default()),
            ..Default::default()
        };
        let merged = merge_filters(&[empty, Filter::new().author(a)]);
        assert_eq!(merged, vec![Filter::new().author(a)]);
    }

    #[test]
    fn test_drops_filters_with_empty_tag_values() {
        let mut empty = Filter::new();
        empty.generic_tags.insert(p_tag(), Default::default());
        let filters = vec![
            empty,
            Filter::new().custom_tag(p_tag(), "p1"),
            Filter::new().custom_tags(p_tag(), ["", "p2"]),
        ];
        assert_eq!(
            merge_filters(&filters),
            vec![Filter::new().custom_tag(p_tag(), "p1")]
        );
    }

    #[test]
    fn test_same_limit_merges_different_limit_does_not() {
        let (a, b) = (pk(), pk());

        let same = merge_filters(&[
            Filter::new().author(a).limit(10),
            Filter::new().author(b).limit(10),
        ]);
        assert_eq!(same, vec![Filter::new().authors([a, b]).limit(10)]);

        let different = vec![
            Filter::new().author(a).limit(10),
            Filter::new().author(b).limit(20),
        ];
        assert_eq!(merge_filters(&different), different);
    }

    #[test]
    fn test_search_only_merges_when_identical() {
        let different = vec![Filter::new().search("search1"), Filter::new().search("search2")];
        assert_eq!(merge_filters(&different), different);

        let same =
            merge_filters(&[Filter::new().search("search1"), Filter::new().search("search1")]);
        assert_eq!(same, vec![Filter::new().search("search1")]);
    }

    #[test]
    fn test_search_with_other_constraints_does_not_union() {
        let (a, b) = (pk(), pk());
        let filters = vec![
            Filter::new().author(a).search("search1"),
            Filter::new().author(b).search("search1"),
        ];
        assert_eq!(merge_filters(&filters), filters);
    }

    #[test]
    fn test_kinds_since_until_must_match() {
        let (a, b) = (pk(), pk());

        let same_kinds = merge_filters(&[
            Filter::new().author(a).kinds([Kind::Metadata, Kind::TextNote]),
            Filter::new().author(b).kinds([Kind::Metadata, Kind::TextNote]),
        ]);
        assert_eq!(
            same_kinds,
            vec![Filter::new()
                .authors([a, b])
                .kinds([Kind::Metadata, Kind::TextNote])]
        );

        let different_kinds = vec![
            Filter::new().author(a).kind(Kind::Metadata),
            Filter::new().author(b).kind(Kind::TextNote),
        ];
        assert_eq!(merge_filters(&different_kinds), different_kinds);

        let different_since = vec![
            Filter::new().author(a).since(Timestamp::from(10)),
            Filter::new().author(b).since(Timestamp::from(20)),
        ];
        assert_eq!(merge_filters(&different_since), different_since);

        let same_until = merge_filters(&[
            Filter::new().author(a).until(Timestamp::from(10)),
            Filter::new().author(b).until(Timestamp::from(10)),
        ]);
        assert_eq!(
            same_until,
            vec![Filter::new().authors([a, b]).until(Timestamp::from(10))]
        );
    }

    #[test]
    fn test_removes_duplicates_when_merging() {
        let (a, b, c) = (pk(), pk(), pk());
        let merged = merge_filters(&[Filter::new().authors([a, b]), Filter::new().authors([b, c])]);
        assert_eq!(merged, vec![Filter::new().authors([a, b, c])]);
    }

    #[test]
    fn test_complex_filters_keep_first_appearance_order() {
        let authors: Vec<PublicKey> = (0..5).map(|_| pk()).collect();
        let since10 = Timestamp::from(10);
        let filters = vec![
            Filter::new().author(authors[0]).kind(Kind::Metadata).since(since10),
            Filter::new().author(authors[1]).kind(Kind::ContactList),
            Filter::new().author(authors[2]).kind(Kind::ContactList),
            Filter::new().custom_tag(p_tag(), "p1").since(since10),
            Filter::new().custom_tag(p_tag(), "p2").since(since10),
            Filter::new().custom_tag(p_tag(), "p4").since(Timestamp::from(20)),
        ];

        let merged = merge_filters(&filters);
        assert_eq!(
            merged,
            vec![
                Filter::new().author(authors[0]).kind(Kind::Metadata).since(since10),
                Filter::new()
                    .authors([authors[1], authors[2]])
                    .kind(Kind::ContactList),
                Filter::new().custom_tags(p_tag(), ["p1", "p2"]).since(since10),
                Filter::new()
                    .custom_tag(p_tag(), "p4")
                    .since(Timestamp::from(20)),
            ]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (a, b) = (pk(), pk());
        let filters = vec![
            Filter::new().author(a).kind(Kind::TextNote),
            Filter::new().author(b).kind(Kind::TextNote),
            Filter::new().search("rust"),
            Filter::new().custom_tag(p_tag(), "x").limit(5),
        ];
        let once = merge_filters(&filters);
        assert_eq!(merge_filters(&once), once);
    }
}
