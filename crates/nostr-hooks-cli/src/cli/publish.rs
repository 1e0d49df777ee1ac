use anyhow::{bail, Context, Result};
use nostr_hooks_core::{EventDraft, SubscriptionEngine};
use nostr_sdk::prelude::*;

/// A `publish` command as given on the command line
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub kind: u16,
    /// `name=value` pairs
    pub tags: Vec<String>,
    pub content: String,
}

impl PublishRequest {
    pub fn draft(&self) -> Result<EventDraft> {
        let mut draft = EventDraft::new(Kind::from(self.kind), self.content.clone());
        for tag in &self.tags {
            let Some((name, value)) = tag.split_once('=') else {
                bail!("Tag must look like name=value: {tag}");
            };
            if name.is_empty() {
                bail!("Tag name is empty: {tag}");
            }
            draft = draft.tag([name, value]);
        }
        Ok(draft)
    }
}

pub async fn run_publish(engine: &SubscriptionEngine, request: &PublishRequest) -> Result<Event> {
    let draft = request.draft()?;
    engine
        .publish(draft, Vec::new())
        .await
        .context("Failed to publish event")
}
