//! Torrent Relay CLI
//!
//! Runs the relay, validates configuration, or polls a single source.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use torrent_relay::{
    error::{AppError, Result},
    models::Config,
    pipeline::{self, DedupStore, Orchestrator, SourceRegistry},
    services::{HttpFileFetcher, Sink, TelegramSink, build_source},
    storage::{LocalSeenStorage, SeenStorage},
    utils::http,
};

/// Torrent Relay - feed to chat relay
#[derive(Parser, Debug)]
#[command(name = "torrent-relay", version, about = "Relays new torrent feed items to a chat")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay until interrupted
    Run {
        /// Skip the startup catch-up pass
        #[arg(long)]
        no_catch_up: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Poll one source once and print what would be relayed
    Poll {
        /// Source id from the configuration
        source: String,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env();
    config.validate()?;
    log::info!(
        "Loaded configuration from {} ({} source(s))",
        cli.config.display(),
        config.sources.len()
    );

    match cli.command {
        Command::Run { no_catch_up } => run(config, !no_catch_up).await?,

        Command::Validate => {
            for source in &config.sources {
                log::info!(
                    "✓ {} ({:?}) every {}s",
                    source.id,
                    source.kind,
                    source.interval_secs
                );
            }
            match config.validate_credentials() {
                Ok(()) => log::info!("✓ Sink credentials present"),
                Err(e) => log::warn!("{e}"),
            }
            log::info!("All validations passed!");
        }

        Command::Poll { source } => poll_once(&config, &source).await?,
    }

    Ok(())
}

async fn run(config: Config, catch_up: bool) -> Result<()> {
    config.validate_credentials()?;

    let client = http::create_async_client(&config.crawler)?;
    let sink = Arc::new(TelegramSink::new(&config.sink, client.clone()));
    let bot = sink.get_me().await?;
    log::info!("Connected to the sink as {bot}");

    if let Some(owner) = config.sink.owner_chat_id.as_deref() {
        let outcome = sink.send_text(owner, &format!("{bot} started")).await;
        log::debug!("Startup announcement: {outcome:?}");
    }

    let storage: Option<Arc<dyn SeenStorage>> = config
        .storage
        .seen_file
        .as_ref()
        .map(|path| Arc::new(LocalSeenStorage::new(path)) as Arc<dyn SeenStorage>);
    let dedup = match &storage {
        Some(storage) => Arc::new(DedupStore::from_keys(storage.load().await?)),
        None => Arc::new(DedupStore::new()),
    };

    let registry = SourceRegistry::from_config(&config, &client)?;
    let fetcher = Arc::new(HttpFileFetcher::new(client, config.crawler.file_timeout()));
    let mut orchestrator =
        Orchestrator::new(&config, registry, sink, fetcher, dedup).with_catch_up(catch_up);
    if let Some(storage) = storage {
        orchestrator = orchestrator.with_storage(storage);
    }

    #[cfg(feature = "health")]
    let health = if config.health.enabled {
        Some(torrent_relay::health::serve(&config.health.bind, orchestrator.status()).await?)
    } else {
        None
    };

    orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {e}");
                futures::future::pending::<()>().await;
            }
        })
        .await?;

    #[cfg(feature = "health")]
    if let Some(handle) = health {
        handle.abort();
    }

    log::info!("Stopped");
    Ok(())
}

async fn poll_once(config: &Config, id: &str) -> Result<()> {
    let source_config = config
        .source(id)
        .ok_or_else(|| AppError::config(format!("Unknown source '{id}'")))?;
    let client = http::create_async_client(&config.crawler)?;
    let source = build_source(source_config, &client)?;

    let records = source.poll().await?;
    let items: Vec<_> = records
        .into_iter()
        .take(config.crawler.max_items)
        .map(|raw| pipeline::normalize(raw, id))
        .collect();
    let items = pipeline::ItemFilter::new(&config.filter).apply(items);

    for item in &items {
        println!(
            "{}\n{}\n",
            item.identity_key,
            pipeline::render_text(item, source_config.tag(), config.delivery.footer.as_deref())
        );
    }
    log::info!("{} item(s) would be relayed", items.len());
    Ok(())
}
