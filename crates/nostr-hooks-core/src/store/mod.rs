pub mod event_cache;
pub mod registry;

pub use event_cache::{AddOutcome, EventCache};
pub use registry::{Registration, SubscriptionRegistry};
