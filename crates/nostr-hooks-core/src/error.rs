/// Errors surfaced by the engine's fallible entry points.
///
/// Subscriptions themselves never fail loudly: a query that cannot reach the
/// network simply never reports EOSE.
#[derive(Debug, thiserror::Error)]
pub enum HooksError {
    #[error("No signer configured")]
    NoSigner,
    #[error("Kind is not provided")]
    MissingKind,
    #[error("Failed to sign event: {message}")]
    Signing { message: String },
    #[error("Relay pool error: {message}")]
    Pool { message: String },
    #[error("No tokio runtime available - create the engine inside a runtime")]
    NoRuntime,
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl HooksError {
    pub fn pool(err: impl std::fmt::Display) -> Self {
        Self::Pool {
            message: err.to_string(),
        }
    }
}
