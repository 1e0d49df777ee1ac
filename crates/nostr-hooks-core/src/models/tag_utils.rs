//! Tag extraction utilities for nostr events
//!
//! Small helpers over `Event::tags` shared by the filter matcher and the cache.

use nostr_sdk::prelude::*;

/// Iterate the values of every single-letter tag `letter` on the event.
pub fn single_letter_values<'a>(
    event: &'a Event,
    letter: &'a SingleLetterTag,
) -> impl Iterator<Item = &'a str> + 'a {
    event
        .tags
        .iter()
        .filter(move |t| t.kind() == TagKind::SingleLetter(letter.clone()))
        .filter_map(|t| t.content())
}

/// The `d` tag of an addressable event, if any.
pub fn identifier(event: &Event) -> Option<&str> {
    let d = SingleLetterTag::lowercase(Alphabet::D);
    event
        .tags
        .iter()
        .find(|t| t.kind() == TagKind::SingleLetter(d.clone()))
        .and_then(|t| t.content())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_reads_d_tag() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::Custom(30023), "article")
            .tag(Tag::identifier("my-article"))
            .sign_with_keys(&keys)
            .unwrap();

        assert_eq!(identifier(&event), Some("my-article"));
    }

    #[test]
    fn test_identifier_missing() {
        let keys = Keys::generate();
        let event = EventBuilder::text_note("hello").sign_with_keys(&keys).unwrap();
        assert_eq!(identifier(&event), None);
    }

    #[test]
    fn test_single_letter_values_collects_all_matching_tags() {
        let keys = Keys::generate();
        let p = SingleLetterTag::lowercase(Alphabet::T);
        let event = EventBuilder::text_note("tagged")
            .tag(Tag::hashtag("rust"))
            .tag(Tag::hashtag("nostr"))
            .sign_with_keys(&keys)
            .unwrap();

        let values: Vec<&str> = single_letter_values(&event, &p).collect();
        assert_eq!(values, vec!["rust", "nostr"]);
    }
}
