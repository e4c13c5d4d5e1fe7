use std::sync::Arc;

use axum::http::HeaderValue;
use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;

use wids_aggregator::alerts::{AlertDeduplicator, DigestSender, Notifier, SmtpNotifier, WebhookNotifier};
use wids_aggregator::api::{create_router, ApiState};
use wids_aggregator::cli::{Cli, Command};
use wids_aggregator::config::Config;
use wids_aggregator::cursor::{seed_cursors, CursorStore};
use wids_aggregator::db::{connect, create_pool, drop_all};
use wids_aggregator::directory::SensorDirectory;
use wids_aggregator::error::AppError;
use wids_aggregator::fanout::Fanout;
use wids_aggregator::fetcher::IncrementalFetcher;
use wids_aggregator::inspector::EventInspector;
use wids_aggregator::logging::init_logging;
use wids_aggregator::metrics::AppMetrics;
use wids_aggregator::reconciler::{KeyRing, SetReconciler};
use wids_aggregator::repository::AggregatorRepository;
use wids_aggregator::retention::{PcapArchive, PcapArchiver, RetentionMirror};
use wids_aggregator::scheduler::{start_aggregation, Intervals, PollScheduler, Pollers};
use wids_aggregator::services::{SensorApi, SensorClient};
use wids_aggregator::snapshot::SnapshotReplacer;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(AppError::Config)
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            std::process::exit(1);
        });
    config.apply_cli(&cli);

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::InitDb => init_db(&config).await,
        Command::CleanDb => clean_db(&config).await,
    };

    if let Err(err) = result {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn init_db(config: &Config) -> Result<(), AppError> {
    let pool = create_pool(&config.database_url).await?;
    pool.close().await;
    tracing::info!(database = %config.database_url, "Database initialised");
    Ok(())
}

async fn clean_db(config: &Config) -> Result<(), AppError> {
    let pool = connect(&config.database_url).await?;
    drop_all(&pool).await?;
    pool.close().await;
    tracing::info!(database = %config.database_url, "Database cleaned");
    Ok(())
}

fn build_notifiers(config: &Config) -> Result<Vec<Arc<dyn Notifier>>, AppError> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(smtp) = &config.smtp {
        notifiers.push(Arc::new(SmtpNotifier::new(smtp)?));
    }
    if let Some(url) = &config.webhook_url {
        notifiers.push(Arc::new(WebhookNotifier::new(url.clone())));
    }
    if notifiers.is_empty() {
        tracing::warn!("No notification transport configured; alerts will only be stored");
    }
    Ok(notifiers)
}

async fn serve(config: Config) -> Result<(), AppError> {
    tracing::info!("Service starting with config: {:?}", config);

    let pool = create_pool(&config.database_url).await?;
    let repository = Arc::new(AggregatorRepository::new(pool));
    let metrics = Arc::new(AppMetrics::new()?);

    let directory = SensorDirectory::new();
    let registered = directory.refresh(&repository).await?;
    metrics.registered_sensors.set(registered as f64);

    let cursors = CursorStore::shared();
    for sensor in directory.snapshot().await {
        seed_cursors(&repository, &cursors, &sensor).await?;
    }
    let keyring = KeyRing::load(&repository).await?;
    tracing::info!(sensors = registered, "Sensor directory loaded");

    let digest = DigestSender::new(repository.clone(), build_notifiers(&config)?, metrics.clone());
    // Alerts left unnotified by a previous run go out before polling starts.
    if let Err(err) = digest.deliver_pending().await {
        tracing::warn!("Startup digest failed: {}", err);
    }

    let api: Arc<dyn SensorApi> = Arc::new(SensorClient::new());
    let pollers = Pollers {
        directory: directory.clone(),
        fanout: Fanout::new(config.fanout_concurrency),
        metrics: metrics.clone(),
        fetcher: IncrementalFetcher::new(api.clone(), repository.clone(), cursors.clone(), metrics.clone()),
        reconciler: SetReconciler::new(api.clone(), repository.clone(), keyring, metrics.clone()),
        snapshots: SnapshotReplacer::new(api.clone(), repository.clone(), metrics.clone()),
        inspector: EventInspector::new(
            repository.clone(),
            metrics.clone(),
            config.notification_cooldown_seconds,
        ),
        dedup: AlertDeduplicator::new(
            repository.clone(),
            digest,
            metrics.clone(),
            config.notification_cooldown_seconds,
        ),
        mirror: config.retention_url.as_deref().map(RetentionMirror::new),
        archiver: config
            .retention_directory
            .clone()
            .map(|root| PcapArchiver::new(api.clone(), root)),
    };

    let mut scheduler = PollScheduler::new();
    start_aggregation(
        &mut scheduler,
        pollers,
        Intervals {
            aggregation: config.aggregation_interval,
            inspection: config.inspection_interval,
            retention: config.retention_interval,
        },
    );

    let origin = match &config.origin_url {
        Some(origin) => Some(
            HeaderValue::from_str(origin)
                .map_err(|err| AppError::Config(format!("Invalid ORIGIN_URL: {}", err)))?,
        ),
        None => None,
    };
    let state = ApiState {
        repository,
        directory,
        cursors,
        metrics,
        archive: config.retention_directory.clone().map(PcapArchive::new),
    };
    let app = create_router(state, origin);

    let listener = TcpListener::bind(config.bind_address).await?;
    tracing::info!(addr = %config.bind_address, "HTTP API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await;

    scheduler.shutdown().await;
    served?;
    tracing::info!("Service stopped");
    Ok(())
}
