use nostr_sdk::Filter;

/// Order-independent structural identity of a filter set.
///
/// Two subscriptions whose keys are equal ask for exactly the same data and
/// may share one network query and one set of cached records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterSetKey(String);

impl FilterSetKey {
    pub fn new(filters: &[Filter]) -> Self {
        let mut parts: Vec<String> = filters
            .iter()
            .map(|f| serde_json::to_string(f).unwrap_or_default())
            .collect();
        parts.sort();
        parts.dedup();
        Self(parts.join(","))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    #[test]
    fn test_key_is_order_independent() {
        let a = Filter::new().kind(Kind::TextNote).limit(10);
        let b = Filter::new().kind(Kind::Metadata);

        assert_eq!(
            FilterSetKey::new(&[a.clone(), b.clone()]),
            FilterSetKey::new(&[b, a])
        );
    }

    #[test]
    fn test_key_ignores_constraint_value_order() {
        let k1 = Keys::generate().public_key();
        let k2 = Keys::generate().public_key();

        assert_eq!(
            FilterSetKey::new(&[Filter::new().authors([k1, k2])]),
            FilterSetKey::new(&[Filter::new().authors([k2, k1])])
        );
    }

    #[test]
    fn test_key_distinguishes_limits() {
        let a = Filter::new().kind(Kind::TextNote).limit(10);
        let b = Filter::new().kind(Kind::TextNote).limit(20);
        assert_ne!(FilterSetKey::new(&[a]), FilterSetKey::new(&[b]));
    }
}
