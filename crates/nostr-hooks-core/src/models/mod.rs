pub mod filter_set;
pub mod replaceable;
pub mod subscription;
pub mod tag_utils;

pub use filter_set::FilterSetKey;
pub use replaceable::ReplaceableKey;
pub use subscription::{
    SubId, SubscribeOptions, SubscriptionConfig, SubscriptionState, SubscriptionStatus,
};
