use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::atc_detector::{AtcDetector, InteractionReport};
use crate::config::AppConfig;
use crate::db::{self, PgPool};
use crate::flight_summaries::FlightSummary;
use crate::flight_summaries_repo::FlightSummariesRepository;
use crate::flights::Flight;
use crate::flights_repo::FlightsRepository;
use crate::sector_occupancy::{SectorOccupancy, interval_seconds};
use crate::sector_occupancy_repo::SectorOccupancyRepository;
use crate::sector_tracker::SectorTracker;

/// Everything needed to aggregate one completed flight.
pub struct SummaryInputs<'a> {
    pub samples: &'a [Flight],
    pub occupancy: &'a [SectorOccupancy],
    pub report: &'a InteractionReport,
    pub poll_interval_secs: u64,
    pub airborne_threshold_kt: f64,
    pub completion_time: DateTime<Utc>,
}

/// Whether the flight was airborne at an instant, judged from the nearest
/// preceding sample's groundspeed.
fn airborne_at(
    samples_by_time: &[(DateTime<Utc>, Option<i32>)],
    instant: DateTime<Utc>,
    threshold_kt: f64,
) -> bool {
    let idx = samples_by_time.partition_point(|(t, _)| *t <= instant);
    let sample = if idx > 0 {
        samples_by_time.get(idx - 1)
    } else {
        samples_by_time.first()
    };
    sample
        .and_then(|(_, gs)| *gs)
        .is_some_and(|gs| f64::from(gs) >= threshold_kt)
}

fn clamp_percentage(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Aggregate one completed flight into its summary row. Pure: all inputs are
/// in memory.
///
/// Minutes are derived from sample counts at the polling cadence: one
/// matched sample is one poll interval of contact.
pub fn build_flight_summary(inputs: &SummaryInputs<'_>) -> Option<FlightSummary> {
    let latest = inputs.samples.last()?;
    let window_end = latest.last_updated;

    let sample_minutes = inputs.poll_interval_secs as f64 / 60.0;
    let time_online_minutes =
        ((window_end - latest.logon_time).num_seconds() as f64 / 60.0).max(0.0);

    // Per-controller contact minutes.
    let controller_minutes: BTreeMap<&str, f64> = inputs
        .report
        .contacts
        .values()
        .map(|contact| {
            (
                contact.controller_callsign.as_str(),
                contact.matched_samples() as f64 * sample_minutes,
            )
        })
        .collect();

    let matched_minutes = inputs.report.matched_flight_times.len() as f64 * sample_minutes;
    let controller_time_percentage = if time_online_minutes > 0.0 {
        Some(clamp_percentage(100.0 * matched_minutes / time_online_minutes))
    } else {
        None
    };

    // Airborne variant: both numerator and denominator restricted to
    // airborne samples.
    let samples_by_time: Vec<(DateTime<Utc>, Option<i32>)> = inputs
        .samples
        .iter()
        .map(|s| (s.last_updated, s.groundspeed))
        .collect();
    let airborne_sample_count = inputs
        .samples
        .iter()
        .filter(|s| {
            s.groundspeed
                .is_some_and(|gs| f64::from(gs) >= inputs.airborne_threshold_kt)
        })
        .count();
    let airborne_controller_time_percentage = if airborne_sample_count > 0 {
        let airborne_minutes = airborne_sample_count as f64 * sample_minutes;
        let matched_airborne = inputs
            .report
            .matched_flight_times
            .iter()
            .filter(|t| airborne_at(&samples_by_time, **t, inputs.airborne_threshold_kt))
            .count() as f64
            * sample_minutes;
        Some(clamp_percentage(100.0 * matched_airborne / airborne_minutes))
    } else {
        None
    };

    // Sector traversal. Rows still open at summary time are measured up to
    // the window end.
    let mut sector_minutes: BTreeMap<String, f64> = BTreeMap::new();
    for row in inputs.occupancy {
        let seconds = match row.duration_seconds {
            Some(s) => s,
            None => interval_seconds(row.entry_time, window_end.max(row.entry_time)),
        };
        *sector_minutes.entry(row.sector_name.clone()).or_default() += f64::from(seconds) / 60.0;
    }
    let primary_enroute_sector = sector_minutes
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| name.clone());
    let total_enroute_time_minutes: f64 = sector_minutes.values().sum();

    let now = inputs.completion_time;
    Some(FlightSummary {
        id: Uuid::now_v7(),
        callsign: latest.callsign.clone(),
        cid: latest.cid,
        logon_time: latest.logon_time,
        departure: latest.departure.clone(),
        arrival: latest.arrival.clone(),
        aircraft_type: latest.aircraft_type.clone(),
        aircraft_faa: latest.aircraft_faa.clone(),
        aircraft_short: latest.aircraft_short.clone(),
        flight_rules: latest.flight_rules.clone(),
        planned_altitude: latest.planned_altitude.clone(),
        route: latest.route.clone(),
        deptime: latest.deptime.clone(),
        time_online_minutes,
        controller_callsigns: json!(controller_minutes),
        controller_time_percentage,
        airborne_controller_time_percentage,
        primary_enroute_sector,
        total_enroute_sectors: sector_minutes.len() as i32,
        total_enroute_time_minutes,
        sector_breakdown: json!(sector_minutes),
        completion_time: now,
        created_at: now,
        updated_at: now,
    })
}

/// Periodic job that turns quiet flights into summary rows and archives
/// their detail.
pub struct FlightSummarizer {
    pool: PgPool,
    flights_repo: FlightsRepository,
    occupancy_repo: SectorOccupancyRepository,
    detector: AtcDetector,
    tracker: SectorTracker,
    completion_window: chrono::Duration,
    poll_interval_secs: u64,
    airborne_threshold_kt: f64,
    retry_attempts: u32,
}

impl FlightSummarizer {
    pub fn new(
        pool: PgPool,
        detector: AtcDetector,
        tracker: SectorTracker,
        config: &AppConfig,
    ) -> Self {
        Self {
            flights_repo: FlightsRepository::new(pool.clone()),
            occupancy_repo: SectorOccupancyRepository::new(pool.clone()),
            pool,
            detector,
            tracker,
            completion_window: config.flight_completion_window(),
            poll_interval_secs: config.polling_interval_secs,
            airborne_threshold_kt: config.airborne_ground_speed_kt,
            retry_attempts: config.db_retry_attempts,
        }
    }

    /// Summarize every eligible flight. A failure on one flight is logged
    /// with its key and does not stop the others; the flight stays eligible
    /// for the next run.
    pub async fn run_once(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<usize> {
        let cutoff = now - self.completion_window;
        let eligible = self.flights_repo.completed_connections(cutoff).await?;
        if eligible.is_empty() {
            return Ok(0);
        }

        info!("Flight summarizer: {} flights eligible", eligible.len());
        let mut summarized = 0usize;

        for (callsign, logon_time) in eligible {
            if cancel.is_cancelled() {
                warn!("Flight summarizer cancelled mid-run after {} flights", summarized);
                break;
            }
            match self.summarize_one(&callsign, logon_time, now).await {
                Ok(true) => summarized += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Failed to summarize flight {} (logon {}): {:#}",
                        callsign, logon_time, e
                    );
                    metrics::counter!("flight_summarizer.failures").increment(1);
                }
            }
        }

        if summarized > 0 {
            info!("Flight summarizer completed: {} flights summarized", summarized);
        }
        metrics::counter!("flight_summarizer.summarized").increment(summarized as u64);
        Ok(summarized)
    }

    async fn summarize_one(
        &self,
        callsign: &str,
        logon_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // The flight has been quiet for the full completion window, so its
        // rows are static and can be read ahead of the finalize transaction.
        let samples = self
            .flights_repo
            .samples_for_connection(callsign, logon_time)
            .await?;
        let Some(latest) = samples.last() else {
            return Ok(false);
        };
        let window_end = latest.last_updated;

        let report = self
            .detector
            .detect(callsign, logon_time, window_end)
            .await
            .context("ATC interaction detection failed")?;

        let occupancy = self
            .occupancy_repo
            .rows_for_connection(callsign, logon_time)
            .await?;

        let inputs = SummaryInputs {
            samples: &samples,
            occupancy: &occupancy,
            report: &report,
            poll_interval_secs: self.poll_interval_secs,
            airborne_threshold_kt: self.airborne_threshold_kt,
            completion_time: now,
        };
        let Some(summary) = build_flight_summary(&inputs) else {
            return Ok(false);
        };

        // Insert the summary, archive the detail rows, and drop the live
        // rows in one transaction; the flight stays eligible if any step
        // fails.
        let pool = self.pool.clone();
        let retry_attempts = self.retry_attempts;
        let callsign_owned = callsign.to_string();
        tokio::task::spawn_blocking(move || {
            db::with_transient_retry(retry_attempts, "flight finalize", || {
                let mut conn = pool.get()?;
                conn.transaction::<_, anyhow::Error, _>(|conn| {
                    FlightSummariesRepository::insert_in(conn, &summary)?;
                    let moved =
                        FlightsRepository::archive_connection(conn, &callsign_owned, logon_time, now)?;
                    SectorOccupancyRepository::delete_for_connection(
                        conn,
                        &callsign_owned,
                        logon_time,
                    )?;
                    metrics::counter!("flight_summarizer.rows_archived")
                        .increment(moved as u64);
                    Ok(())
                })?;
                Ok(())
            })
        })
        .await??;

        self.tracker.forget_connection(callsign, logon_time);
        Ok(true)
    }
}
