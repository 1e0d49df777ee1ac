use std::fs::OpenOptions;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable naming an optional debug log file
pub const LOG_FILE_ENV: &str = "NOSTR_HOOKS_LOG_FILE";

pub fn init_tracing() {
    init_tracing_with_service("nostr-hooks");
}

/// Install the global subscriber: stderr output filtered by `RUST_LOG`
/// (default `info`), plus a debug-level file layer when [`LOG_FILE_ENV`] is set.
pub fn init_tracing_with_service(service_name: &str) {
    init_tracing_with_file(service_name, std::env::var(LOG_FILE_ENV).ok());
}

pub fn init_tracing_with_file(service_name: &str, log_file: Option<String>) {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some((path, file)),
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
                None
            }
        }
    });

    if let Some((path, file)) = file {
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG);

        if registry.with(file_layer).try_init().is_ok() {
            tracing::info!(service = service_name, log_file = %path, "file logging enabled");
        }
    } else {
        let _ = registry.try_init();
    }
}
