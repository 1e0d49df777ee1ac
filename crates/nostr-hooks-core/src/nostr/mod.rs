pub mod client_pool;
pub mod pool;
pub mod publish;

pub use client_pool::NostrClientPool;
pub use pool::{PoolNotification, PoolSubId, PoolSubscription, RelayPool};
pub use publish::{parse_secret_key, EventDraft, EventSigner};
