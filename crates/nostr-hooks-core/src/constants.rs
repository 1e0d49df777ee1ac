//! Engine-wide constants
//!
//! Defaults shared by the engine, its configuration and the CLI.

/// Relays used when neither the subscription nor the engine config names any
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://nos.lol",
    "wss://relay.damus.io",
    "wss://relay.nostr.band",
    "wss://relay.primal.net",
    "wss://purplepag.es",
];

/// Debounce window for coalescing new subscriptions into one network query
pub const DEFAULT_BATCHING_INTERVAL_MS: u64 = 500;

/// Delay between the last unsubscribe and the cache garbage-collection sweep
pub const GC_DELAY_MS: u64 = 10_000;

/// Timeout for the initial relay connection
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
