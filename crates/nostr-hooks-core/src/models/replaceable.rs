use nostr_sdk::prelude::*;

use super::tag_utils::identifier;

/// Identity under which replaceable records supersede each other:
/// (author, kind) for replaceable kinds, plus the `d` tag for addressable ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplaceableKey {
    pub author: PublicKey,
    pub kind: u16,
    pub identifier: String,
}

impl ReplaceableKey {
    pub fn of(event: &Event) -> Option<Self> {
        let identifier = if event.kind.is_replaceable() {
            String::new()
        } else if event.kind.is_addressable() {
            identifier(event).unwrap_or_default().to_string()
        } else {
            return None;
        };

        Some(Self {
            author: event.pubkey,
            kind: event.kind.as_u16(),
            identifier,
        })
    }
}

/// True when `candidate` replaces `current`: newer wins, ties go to the lower id.
pub fn supersedes(candidate: &Event, current: &Event) -> bool {
    match candidate.created_at.cmp(&current.created_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.id < current.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_at(keys: &Keys, ts: u64) -> Event {
        EventBuilder::new(Kind::Metadata, "{}")
            .custom_created_at(Timestamp::from(ts))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn test_regular_kinds_have_no_key() {
        let keys = Keys::generate();
        let note = EventBuilder::text_note("hi").sign_with_keys(&keys).unwrap();
        assert!(ReplaceableKey::of(&note).is_none());
    }

    #[test]
    fn test_replaceable_key_ignores_d_tag() {
        let keys = Keys::generate();
        let a = metadata_at(&keys, 10);
        let b = metadata_at(&keys, 20);
        assert_eq!(ReplaceableKey::of(&a), ReplaceableKey::of(&b));
    }

    #[test]
    fn test_addressable_key_uses_d_tag() {
        let keys = Keys::generate();
        let first = EventBuilder::new(Kind::Custom(30023), "a")
            .tag(Tag::identifier("one"))
            .sign_with_keys(&keys)
            .unwrap();
        let second = EventBuilder::new(Kind::Custom(30023), "b")
            .tag(Tag::identifier("two"))
            .sign_with_keys(&keys)
            .unwrap();

        let key = ReplaceableKey::of(&first).unwrap();
        assert_eq!(key.identifier, "one");
        assert_ne!(Some(key), ReplaceableKey::of(&second));
    }

    #[test]
    fn test_supersedes_prefers_newer() {
        let keys = Keys::generate();
        let old = metadata_at(&keys, 10);
        let new = metadata_at(&keys, 20);
        assert!(supersedes(&new, &old));
        assert!(!supersedes(&old, &new));
    }
}
