pub mod config;
pub mod output;
pub mod publish;
pub mod query;

pub use config::CliConfig;
pub use publish::{run_publish, PublishRequest};
pub use query::{run_query, QueryRequest};
