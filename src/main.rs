mod cli;

use releaseforge::{
    config::{self, Config},
    coordinator::Coordinator,
    delivery::{DeliveryListener, DeliveryOutcome, DeliveryService, DeliveryTrigger},
    download::SchemeDownloader,
    feed::{FeedProvider, RssFeedProvider, StaticFeed},
    ingest::{AcceptOutcome, Candidate},
    notifications::{self, NotificationChannel},
    pipeline::{Collaborators, ItemOutcome},
    publish::{DirectoryPublisher, PublisherSet},
    store::ReleaseStore,
    tools,
    transcode::FfmpegTranscoder,
};
use releaseforge_common::{Identity, QualityLabel, RecipientId};
use releaseforge_db::pool::{get_conn, init_pool, DbPool};
use releaseforge_db::queries::{ongoing, releases};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

fn open_database(config: &Config) -> Result<DbPool> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }

    let db_path_str = db_path.to_string_lossy();
    tracing::info!("Opening database at {}", db_path_str);
    Ok(init_pool(&db_path_str)?)
}

fn build_collaborators(
    config: &Config,
    notifier: Arc<dyn NotificationChannel>,
) -> Result<Collaborators> {
    let ffmpeg = tools::ffmpeg_path(config.transcoder.ffmpeg_path.as_deref())?;
    let transcoder = FfmpegTranscoder::new(ffmpeg, config.transcoder.progress_interval())?;

    let primary_dir = config
        .publish
        .primary_dir
        .clone()
        .unwrap_or_else(|| config.paths.data_dir.join("public"));
    let mut publishers = PublisherSet::new(Arc::new(DirectoryPublisher::new(
        primary_dir,
        config.publish.public_base_url.clone(),
    )));
    for dir in &config.publish.backup_dirs {
        publishers = publishers.with_backup(Arc::new(DirectoryPublisher::new(dir.clone(), None)));
    }

    Ok(Collaborators {
        downloader: Arc::new(SchemeDownloader::new()),
        transcoder: Arc::new(transcoder),
        publishers,
        notifier,
    })
}

async fn start(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    tracing::info!("Starting releaseforge");

    let pool = open_database(&config)?;
    let (notifier, presses) = notifications::build_channels(&config);
    let coordinator = Coordinator::new(
        &config,
        pool,
        build_collaborators(&config, notifier.clone())?,
    )?;

    let feed: Arc<dyn FeedProvider> = if config.feed.urls.is_empty() {
        Arc::new(StaticFeed::new(Vec::new()))
    } else {
        Arc::new(RssFeedProvider::new(config.feed.urls.clone())?)
    };

    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received interrupt"),
            Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
        }
        shutdown.cancel();
    });

    let listener = presses.map(|source| {
        let service = Arc::new(DeliveryService::new(
            coordinator.store().clone(),
            notifier.clone(),
            config.delivery.fallback_link.clone(),
        ));
        let listener = Arc::new(DeliveryListener::new(
            source,
            service,
            config.delivery.notice_ttl(),
        ));
        tokio::spawn(listener.run(coordinator.shutdown_token()))
    });

    let result = coordinator.clone().run(feed).await;
    coordinator.shutdown_token().cancel();
    if let Some(listener) = listener {
        let _ = listener.await;
    }
    result
}

async fn run_one(
    title: String,
    locator: String,
    config_path: Option<&Path>,
    force: bool,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_database(&config)?;
    let coordinator = Coordinator::new(
        &config,
        pool,
        build_collaborators(&config, notifications::build_channel(&config))?,
    )?;

    let candidate = Candidate::new(title, locator);
    match coordinator.submit(&candidate, force)? {
        AcceptOutcome::Accepted(item) => {
            println!("Accepted {} ({})", item.identity, item.title);
        }
        AcceptOutcome::DuplicateActive => {
            println!("Already in progress. Use --force to run it anyway.");
            return Ok(());
        }
        AcceptOutcome::DuplicateCompleted => {
            println!("Every quality is already released.");
            return Ok(());
        }
        AcceptOutcome::DuplicateFailed => {
            println!("This episode failed before. Use --force to retry it.");
            return Ok(());
        }
    }

    let dispatcher = coordinator.start_dispatcher();
    let shutdown = coordinator.shutdown_token();
    let interrupt = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let outcomes = coordinator.wait_idle().await;
    coordinator.shutdown();
    interrupt.abort();
    let _ = dispatcher.await;

    for outcome in &outcomes {
        match outcome {
            ItemOutcome::Completed { uploaded } => {
                println!("\nProcessing complete!");
                println!("Uploaded: {}", join_labels(uploaded));
            }
            ItemOutcome::Failed {
                uploaded,
                failed,
                error,
            } => {
                println!("\nProcessing failed: {}", error);
                println!("Uploaded: {}", join_labels(uploaded));
                println!("Failed: {}", join_labels(failed));
            }
            ItemOutcome::Cancelled | ItemOutcome::Interrupted => {
                println!("\nProcessing stopped before completion.");
            }
        }
    }

    Ok(())
}

fn join_labels(labels: &[QualityLabel]) -> String {
    if labels.is_empty() {
        return "-".to_string();
    }
    labels
        .iter()
        .map(QualityLabel::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn show_status(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_database(&config)?;
    let conn = get_conn(&pool)?;

    let records = releases::list_releases(&conn)?;
    let in_flight = ongoing::list_ongoing(&conn)?;
    let failures = ongoing::list_all_failures(&conn)?;

    if json {
        let status = serde_json::json!({
            "releases": records,
            "ongoing": in_flight,
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Releases: {}", records.len());
    for record in &records {
        let qualities: Vec<String> = record
            .qualities
            .iter()
            .map(|(label, entry)| format!("{}={}", label, entry.status))
            .collect();
        println!(
            "  {} [{}]{}",
            record.identity,
            qualities.join(" "),
            record
                .title
                .as_deref()
                .map(|t| format!(" - {}", t))
                .unwrap_or_default()
        );
    }

    println!("\nOngoing: {}", in_flight.len());
    for item in &in_flight {
        println!(
            "  {} since {} - {}",
            item.identity,
            item.ingested_at.format("%Y-%m-%d %H:%M:%S"),
            item.title
        );
    }

    println!("\nFailures: {}", failures.len());
    for failure in &failures {
        println!(
            "  {} [{}] {}",
            failure.identity, failure.quality, failure.error_message
        );
    }

    Ok(())
}

async fn deliver(payload: &str, recipient: i64, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let store = ReleaseStore::new(open_database(&config)?);
    let service = DeliveryService::new(
        store,
        notifications::build_channel(&config),
        config.delivery.fallback_link.clone(),
    );

    match service
        .handle_trigger(payload, RecipientId::new(recipient))
        .await?
    {
        DeliveryOutcome::Delivered { artifact } => println!("Delivered {}", artifact),
        DeliveryOutcome::AlreadyReceived { fallback_link } => {
            println!("Already received. Fallback link: {}", fallback_link)
        }
        DeliveryOutcome::NotFound => println!("No uploaded artifact for {}", payload),
    }

    Ok(())
}

async fn reset_delivery(
    identity: String,
    quality: String,
    recipient: i64,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let store = ReleaseStore::new(open_database(&config)?);
    let service = DeliveryService::new(
        store,
        notifications::build_channel(&config),
        config.delivery.fallback_link.clone(),
    );

    let trigger = DeliveryTrigger::new(Identity::new(identity), QualityLabel::new(quality));
    if service.reset(&trigger, RecipientId::new(recipient)).await? {
        println!("Reset delivery of {} [{}] for {}", trigger.identity, trigger.quality, recipient);
    } else {
        println!("No delivery recorded for {} [{}] and {}", trigger.identity, trigger.quality, recipient);
    }
    Ok(())
}

async fn forget(identity: String, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let store = ReleaseStore::new(open_database(&config)?);

    let identity = Identity::new(identity);
    if store.forget(&identity).await? {
        println!("Forgot {}", identity);
    } else {
        println!("No release recorded for {}; cleared ongoing and failure state", identity);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "releaseforge=trace,releaseforge_db=debug,releaseforge_common=debug".to_string()
        } else {
            "releaseforge=info,releaseforge_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start(config_path))
        }
        Commands::Run {
            title,
            locator,
            force,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_one(title, locator, config_path, force))
        }
        Commands::Status { json } => show_status(config_path, json),
        Commands::Deliver { payload, recipient } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(deliver(&payload, recipient, config_path))
        }
        Commands::ResetDelivery {
            identity,
            quality,
            recipient,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(reset_delivery(identity, quality, recipient, config_path))
        }
        Commands::Forget { identity } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(forget(identity, config_path))
        }
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config.clone());
            validate(path.as_deref())
        }
        Commands::Version => {
            println!("releaseforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let configured = config::load_config_or_default(config_path)
        .ok()
        .and_then(|c| c.transcoder.ffmpeg_path);
    let tools = tools::check_tools(configured.as_deref());
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them before starting the pipeline.");
    }

    Ok(())
}

fn validate(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, checking defaults");
            let config = Config::default();
            config::validate_config(&config)?;
            config
        }
    };

    println!("✓ Configuration is valid");
    println!("  Data dir: {}", config.paths.data_dir.display());
    println!("  Database: {}", config.database_path().display());
    println!("  Feeds: {}", config.feed.urls.len());
    println!(
        "  Qualities: {}",
        join_labels(&config.quality_labels())
    );
    println!("  Telegram enabled: {}", config.telegram.enabled);
    println!("  Backup publishers: {}", config.publish.backup_dirs.len());

    Ok(())
}
