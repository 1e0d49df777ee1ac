pub mod matcher;
pub mod merge;

pub use matcher::{FilterMatcher, Nip01Matcher};
pub use merge::{is_filter_corrupted, merge_filters, valid_filters};
