use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::{error, info};

use vatstats::atc_detector::{AtcDetector, MatchCriteria};
use vatstats::config::AppConfig;
use vatstats::controller_summarizer::ControllerSummarizer;
use vatstats::controllers_repo::ControllersRepository;
use vatstats::db;
use vatstats::flight_summarizer::FlightSummarizer;
use vatstats::ingest::{IngestService, SharedLastIngest};
use vatstats::metrics_server;
use vatstats::reference_data::ReferenceData;
use vatstats::scheduler::Scheduler;
use vatstats::sector_occupancy_repo::SectorOccupancyRepository;
use vatstats::sector_tracker::SectorTracker;
use vatstats::sweeper::StaleSweeper;
use vatstats::transceivers_repo::TransceiversRepository;
use vatstats::vatsim_client::VatsimClient;
use vatstats::web::{self, AppState};

/// Run the full service: ingestion pipeline, summarizers, sweeper and the
/// read-only API, until a shutdown signal arrives.
pub async fn handle_run(config: AppConfig) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "run");
    });

    let config = Arc::new(config);

    // Two instances against one database would double-write every table.
    let _instance_lock = vatstats::instance_lock::InstanceLock::acquire("vatstats-run")?;

    let pool = db::build_pool(&config)?;
    db::run_migrations(&pool)?;
    info!("Database ready (pool size {})", config.pool_max_size());

    // Reference data is load-once; any failure here aborts startup.
    let reference = Arc::new(ReferenceData::load(&config)?);

    metrics_server::init_metrics();
    metrics_server::initialize_pipeline_metrics();
    if let Some(port) = config.metrics_port {
        tokio::spawn(
            metrics_server::start_metrics_server(port)
                .instrument(tracing::info_span!("metrics_server")),
        );
    }

    // Rebuild the open-sector map before the first tick.
    let tracker = SectorTracker::new(SectorOccupancyRepository::new(pool.clone()));
    let recovered = tracker.initialize_from_database().await?;
    if recovered > 0 {
        info!("Recovered {} open sector rows from a previous run", recovered);
    }

    let last_ingest: SharedLastIngest = Arc::new(RwLock::new(None));
    let sweeper = StaleSweeper::new(pool.clone(), tracker.clone(), &config);
    let client = VatsimClient::new(&config)?;
    let ingest = Arc::new(IngestService::new(
        pool.clone(),
        client,
        Arc::clone(&reference),
        tracker.clone(),
        sweeper,
        &config,
        Arc::clone(&last_ingest),
    ));

    let criteria = MatchCriteria {
        proximity: config.proximity.clone(),
        match_window: config.match_time_window(),
        guard_frequency_hz: config.guard_frequency_hz,
    };
    let detector = AtcDetector::new(
        ControllersRepository::new(pool.clone()),
        TransceiversRepository::new(pool.clone()),
        criteria.clone(),
    );
    let flight_summarizer = Arc::new(FlightSummarizer::new(
        pool.clone(),
        detector,
        tracker.clone(),
        &config,
    ));
    let controller_summarizer = Arc::new(ControllerSummarizer::new(pool.clone(), criteria, &config));

    let cancel = CancellationToken::new();
    let mut scheduler = Scheduler::new(cancel.clone());

    {
        let ingest = Arc::clone(&ingest);
        scheduler.spawn_job("ingest", config.polling_interval(), move |_| {
            let ingest = Arc::clone(&ingest);
            async move { ingest.run_tick().await.map(|_| ()) }
        });
    }
    {
        let summarizer = Arc::clone(&flight_summarizer);
        scheduler.spawn_job(
            "flight-summarizer",
            config.flight_summary_interval(),
            move |cancel| {
                let summarizer = Arc::clone(&summarizer);
                async move { summarizer.run_once(Utc::now(), &cancel).await.map(|_| ()) }
            },
        );
    }
    {
        let summarizer = Arc::clone(&controller_summarizer);
        scheduler.spawn_job(
            "controller-summarizer",
            config.controller_summary_interval(),
            move |cancel| {
                let summarizer = Arc::clone(&summarizer);
                async move { summarizer.run_once(Utc::now(), &cancel).await.map(|_| ()) }
            },
        );
    }

    let state = AppState::new(
        pool,
        Arc::clone(&reference),
        Arc::clone(&config),
        last_ingest,
        scheduler.health(),
    );
    {
        let interface = config.web_interface.clone();
        let port = config.web_port;
        let cancel = cancel.clone();
        tokio::spawn(
            async move {
                if let Err(e) = web::start_web_server(interface, port, state, cancel).await {
                    error!("Web server failed: {:#}", e);
                }
            }
            .instrument(tracing::info_span!("web_server")),
        );
    }

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received, stopping jobs");
    scheduler
        .shutdown(Duration::from_secs(config.shutdown_grace_secs))
        .await;
    info!("Shutdown complete");

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to register SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
            }
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
    }
    Ok(())
}
