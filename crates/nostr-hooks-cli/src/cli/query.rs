use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nostr_hooks_core::{Subscription, SubscriptionEngine, SubscriptionUpdate};
use nostr_sdk::prelude::*;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::output::format_event;

/// How long to wait for relays to finish a page
const PAGE_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A `query` command as given on the command line
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub kinds: Vec<u16>,
    pub authors: Vec<String>,
    pub ids: Vec<String>,
    /// `x=value` pairs
    pub tags: Vec<String>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
    pub search: Option<String>,
    /// Extra older pages to fetch after the first result set
    pub pages: usize,
    pub watch: bool,
    pub json: bool,
}

impl QueryRequest {
    pub fn filter(&self) -> Result<Filter> {
        let mut filter = Filter::new();
        if !self.kinds.is_empty() {
            filter = filter.kinds(self.kinds.iter().map(|k| Kind::from(*k)));
        }
        for author in &self.authors {
            let pubkey =
                PublicKey::parse(author).with_context(|| format!("Invalid author: {author}"))?;
            filter = filter.author(pubkey);
        }
        for id in &self.ids {
            let id = EventId::parse(id).with_context(|| format!("Invalid event id: {id}"))?;
            filter = filter.id(id);
        }
        for tag in &self.tags {
            let (letter, value) = parse_tag_filter(tag)?;
            filter = filter.custom_tag(letter, value);
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since));
        }
        if let Some(until) = self.until {
            filter = filter.until(Timestamp::from(until));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        if let Some(search) = &self.search {
            filter = filter.search(search);
        }
        if filter == Filter::new() {
            bail!("Refusing to run an unbounded query; give at least one constraint");
        }
        Ok(filter)
    }
}

/// Parse `x=value` into a single-letter tag filter
fn parse_tag_filter(raw: &str) -> Result<(SingleLetterTag, String)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("Tag filter must look like x=value: {raw}");
    };
    let mut chars = name.chars();
    let (Some(letter), None) = (chars.next(), chars.next()) else {
        bail!("Tag filter name must be a single letter: {raw}");
    };
    let letter = SingleLetterTag::from_char(letter)
        .with_context(|| format!("Tag filter name must be a single letter: {raw}"))?;
    Ok((letter, value.to_string()))
}

/// Run `request` through the engine, printing results to `out`.
/// Returns the number of events printed.
pub async fn run_query(
    engine: &SubscriptionEngine,
    request: &QueryRequest,
    out: &mut (impl Write + Send),
) -> Result<usize> {
    let mut config = engine.config_for(vec![request.filter()?]);
    config.options.close_after_eose = !request.watch;

    let subscription = engine.subscribe(config);
    let mut updates = subscription.updates();

    if !wait_until_settled(&subscription, &mut updates).await {
        warn!(
            sub_id = %subscription.id(),
            "relays did not finish in time, printing partial results"
        );
    }

    for page in 0..request.pages {
        if !subscription.load_more(None) {
            break;
        }
        info!(page = page + 1, "loading older events");
        if !wait_until_settled(&subscription, &mut updates).await {
            warn!(page = page + 1, "page timed out");
            break;
        }
    }

    let events = subscription.events();
    for event in &events {
        writeln!(out, "{}", format_event(event, request.json))?;
    }
    let mut printed = events.len();

    if request.watch {
        printed += watch(&mut updates, request.json, out).await?;
    }
    Ok(printed)
}

/// Wait until the subscription has EOSE and no network query pending.
async fn wait_until_settled(
    subscription: &Subscription,
    updates: &mut mpsc::UnboundedReceiver<SubscriptionUpdate>,
) -> bool {
    let settled = |s: &Subscription| {
        s.status()
            .is_some_and(|status| status.eose && status.pending_queries == 0)
    };

    let wait = async {
        while !settled(subscription) {
            tokio::select! {
                _ = updates.recv() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    };
    tokio::time::timeout(PAGE_TIMEOUT, wait).await.is_ok()
}

async fn watch(
    updates: &mut mpsc::UnboundedReceiver<SubscriptionUpdate>,
    json: bool,
    out: &mut (impl Write + Send),
) -> Result<usize> {
    let mut printed = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Some(SubscriptionUpdate::Event(event)) => {
                    writeln!(out, "{}", format_event(&event, json))?;
                    out.flush()?;
                    printed += 1;
                }
                Some(_) => {}
                None => break,
            }
        }
    }
    Ok(printed)
}
