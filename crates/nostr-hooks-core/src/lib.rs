//! Reactive Nostr subscriptions over a shared relay pool.
//!
//! The [`SubscriptionEngine`] merges compatible subscriptions into fewer
//! network queries, deduplicates records across subscribers in one cache,
//! tracks end-of-stored-events per subscriber and pages older records on
//! demand.

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod filters;
pub mod models;
pub mod nostr;
pub mod stats;
pub mod store;
pub mod timer;
pub mod tracing_setup;

pub use config::EngineConfig;
pub use engine::{Subscription, SubscriptionEngine};
pub use error::HooksError;
pub use events::{ObserverId, SubscriptionUpdate};
pub use models::{SubId, SubscribeOptions, SubscriptionConfig, SubscriptionStatus};
pub use nostr::{EventDraft, EventSigner, NostrClientPool, RelayPool};
