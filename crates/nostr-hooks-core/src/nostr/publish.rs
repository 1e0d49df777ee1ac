use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::HooksError;

/// An unsigned event as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDraft {
    pub kind: Option<u16>,
    pub content: String,
    /// Raw tags, e.g. `["t", "nostr"]`
    pub tags: Vec<Vec<String>>,
    /// Unix seconds; now when absent
    pub created_at: Option<u64>,
}

impl EventDraft {
    pub fn new(kind: Kind, content: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.as_u16()),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tag<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(parts.into_iter().map(Into::into).collect());
        self
    }

    pub fn into_builder(self) -> Result<EventBuilder, HooksError> {
        let kind = self.kind.ok_or(HooksError::MissingKind)?;
        let mut tags = Vec::with_capacity(self.tags.len());
        for parts in self.tags {
            let tag = Tag::parse(parts).map_err(|e| HooksError::Signing {
                message: format!("invalid tag: {e}"),
            })?;
            tags.push(tag);
        }

        let mut builder = EventBuilder::new(Kind::from(kind), self.content).tags(tags);
        if let Some(created_at) = self.created_at {
            builder = builder.custom_created_at(Timestamp::from(created_at));
        }
        Ok(builder)
    }
}

/// Turns an unsigned builder into a signed event.
pub trait EventSigner: Send + Sync {
    fn sign(&self, builder: EventBuilder) -> Result<Event, HooksError>;
}

impl EventSigner for Keys {
    fn sign(&self, builder: EventBuilder) -> Result<Event, HooksError> {
        builder.sign_with_keys(self).map_err(|e| HooksError::Signing {
            message: e.to_string(),
        })
    }
}

/// Parse a secret key given as `nsec` bech32 or hex.
pub fn parse_secret_key(secret: &str) -> Result<Keys, HooksError> {
    Keys::parse(secret.trim()).map_err(|e| HooksError::Config {
        message: format!("invalid secret key: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_without_kind_fails() {
        let draft = EventDraft {
            content: "hello".to_string(),
            ..Default::default()
        };
        assert!(matches!(draft.into_builder(), Err(HooksError::MissingKind)));
    }

    #[test]
    fn test_draft_signs_with_keys() {
        let keys = Keys::generate();
        let draft = EventDraft::new(Kind::TextNote, "hello")
            .tag(["t", "nostr"])
            .tag(["d", "x"]);
        let draft = EventDraft {
            created_at: Some(1_700_000_000),
            ..draft
        };

        let event = keys.sign(draft.into_builder().unwrap()).unwrap();
        assert_eq!(event.kind, Kind::TextNote);
        assert_eq!(event.content, "hello");
        assert_eq!(event.created_at.as_u64(), 1_700_000_000);
        assert_eq!(event.pubkey, keys.public_key());
        assert_eq!(event.tags.len(), 2);
        assert!(event.verify().is_ok());
    }

    #[test]
    fn test_parse_secret_key_formats() {
        let keys = Keys::generate();
        let hex = keys.secret_key().to_secret_hex();
        let nsec = keys.secret_key().to_bech32().unwrap();

        assert_eq!(parse_secret_key(&hex).unwrap().public_key(), keys.public_key());
        assert_eq!(parse_secret_key(&nsec).unwrap().public_key(), keys.public_key());
        assert!(parse_secret_key("not-a-key").is_err());
    }

    #[test]
    fn test_parse_draft_json() {
        let json = r#"{"kind": 1, "content": "gm", "tags": [["t", "gm"]]}"#;
        let draft: EventDraft = serde_json::from_str(json).unwrap();
        assert_eq!(draft.kind, Some(1));
        assert_eq!(draft.tags, vec![vec!["t".to_string(), "gm".to_string()]]);
    }
}
