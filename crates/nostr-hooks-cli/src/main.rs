use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nostr_hooks_cli::cli::{run_publish, run_query, CliConfig, PublishRequest, QueryRequest};
use nostr_hooks_core::constants::CONNECT_TIMEOUT_SECS;
use nostr_hooks_core::nostr::parse_secret_key;
use nostr_hooks_core::tracing_setup::init_tracing_with_file;
use nostr_hooks_core::{NostrClientPool, SubscriptionEngine};

#[derive(Parser)]
#[command(name = "nostr-hooks")]
#[command(about = "Query and publish Nostr events through a batching subscription engine")]
struct Cli {
    /// Path to JSON config file (relays, secretKey, batchingInterval, logFile)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Relay URL (can be specified multiple times, overrides the config)
    #[arg(long, short = 'r', global = true)]
    relay: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch events matching a filter
    Query {
        /// Event kind (can be specified multiple times)
        #[arg(long, short = 'k')]
        kind: Vec<u16>,
        /// Author pubkey, hex or npub (can be specified multiple times)
        #[arg(long, short = 'a')]
        author: Vec<String>,
        /// Event id (can be specified multiple times)
        #[arg(long)]
        id: Vec<String>,
        /// Single-letter tag filter as x=value (can be specified multiple times)
        #[arg(long, short = 't')]
        tag: Vec<String>,
        /// Only events at or after this unix timestamp
        #[arg(long)]
        since: Option<u64>,
        /// Only events at or before this unix timestamp
        #[arg(long)]
        until: Option<u64>,
        /// Maximum events per page
        #[arg(long, short = 'l')]
        limit: Option<usize>,
        /// Full-text search (NIP-50 relays only)
        #[arg(long, short = 's')]
        search: Option<String>,
        /// Older pages to load after the first result set
        #[arg(long, default_value_t = 0)]
        pages: usize,
        /// Keep the query open and stream new events until Ctrl-C
        #[arg(long, short = 'w')]
        watch: bool,
        /// Print raw event JSON, one per line
        #[arg(long)]
        json: bool,
    },

    /// Sign and publish an event with the configured secret key
    Publish {
        /// Event kind
        #[arg(long, short = 'k', default_value_t = 1)]
        kind: u16,
        /// Tag as name=value (can be specified multiple times)
        #[arg(long, short = 't')]
        tag: Vec<String>,
        /// Event content
        content: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = CliConfig::resolve(cli.config.as_deref())?;
    init_tracing_with_file(
        "nostr-hooks",
        config
            .log_file
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| std::env::var(nostr_hooks_core::tracing_setup::LOG_FILE_ENV).ok()),
    );

    let engine_config = config.engine_config(&cli.relay);
    let pool = NostrClientPool::connect(
        &engine_config.default_relays,
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
    )
    .await
    .context("Failed to set up relay pool")?;
    let engine = SubscriptionEngine::new(Arc::new(pool), engine_config)?;

    match cli.command {
        Commands::Query {
            kind,
            author,
            id,
            tag,
            since,
            until,
            limit,
            search,
            pages,
            watch,
            json,
        } => {
            let request = QueryRequest {
                kinds: kind,
                authors: author,
                ids: id,
                tags: tag,
                since,
                until,
                limit,
                search,
                pages,
                watch,
                json,
            };
            let mut stdout = std::io::stdout();
            let printed = run_query(&engine, &request, &mut stdout).await?;
            stdout.flush()?;
            let stats = engine.stats();
            tracing::info!(
                printed,
                queries = stats.queries_dispatched,
                merge_ratio = stats.merge_ratio(),
                kinds = ?stats.kinds_by_count(),
                "query finished"
            );
        }
        Commands::Publish { kind, tag, content } => {
            let secret = config
                .secret_key
                .as_deref()
                .context("No secret key configured; add \"secretKey\" to the config file")?;
            engine.set_signer(Arc::new(parse_secret_key(secret)?));

            let request = PublishRequest {
                kind,
                tags: tag,
                content,
            };
            let event = run_publish(&engine, &request).await?;
            println!("{}", event.id.to_hex());
        }
    }
    Ok(())
}
