use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::Connection;
use diesel::prelude::*;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::controllers_repo::ControllersRepository;
use crate::db::{self, PgPool};
use crate::flights::Flight;
use crate::flights_repo::FlightsRepository;
use crate::sector_occupancy::{SectorOccupancy, interval_seconds};
use crate::sector_occupancy_repo::SectorOccupancyRepository;
use crate::sector_tracker::SectorTracker;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub sectors_closed: usize,
    pub ended_controller_sessions: i64,
}

/// Periodic cleanup of entities that stopped updating.
///
/// Open sector rows whose flight has gone quiet for longer than the stale
/// timeout are closed at the flight's last sample time. Controller sessions
/// need no writes here: a session is "ended" exactly when its last_updated
/// falls behind the merge window, which the summarizer queries directly; the
/// sweeper only reports the count.
pub struct StaleSweeper {
    pool: PgPool,
    tracker: SectorTracker,
    stale_timeout: chrono::Duration,
    merge_window: chrono::Duration,
    retry_attempts: u32,
}

impl StaleSweeper {
    pub fn new(pool: PgPool, tracker: SectorTracker, config: &AppConfig) -> Self {
        Self {
            pool,
            tracker,
            stale_timeout: config.cleanup_flight_timeout(),
            merge_window: config.controller_merge_window(),
            retry_attempts: config.db_retry_attempts,
        }
    }

    /// One sweep: a single transaction closes every stale open sector row,
    /// then the in-memory tracker forgets the affected connections.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let pool = self.pool.clone();
        let stale_timeout = self.stale_timeout;
        let merge_window = self.merge_window;
        let retry_attempts = self.retry_attempts;

        let (stats, swept_connections) = tokio::task::spawn_blocking(move || {
            db::with_transient_retry(retry_attempts, "stale sweep", || {
                let mut conn = pool.get()?;
                let result = conn.transaction::<_, anyhow::Error, _>(|conn| {
                    sweep_in(conn, now, stale_timeout, merge_window)
                })?;
                Ok(result)
            })
        })
        .await??;

        for (callsign, logon_time) in &swept_connections {
            self.tracker.forget_connection(callsign, *logon_time);
        }

        if stats.sectors_closed > 0 {
            info!(
                "Sweeper closed {} stale sector rows across {} connections ({} ended controller sessions pending summary)",
                stats.sectors_closed,
                swept_connections.len(),
                stats.ended_controller_sessions
            );
        }
        metrics::counter!("sweeper.sectors_closed").increment(stats.sectors_closed as u64);
        metrics::gauge!("sweeper.ended_controller_sessions")
            .set(stats.ended_controller_sessions as f64);

        Ok(stats)
    }
}

type SweptConnections = Vec<(String, DateTime<Utc>)>;

fn sweep_in(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    stale_timeout: chrono::Duration,
    merge_window: chrono::Duration,
) -> Result<(SweepStats, SweptConnections)> {
    let open_rows = SectorOccupancyRepository::open_rows_in(conn)?;

    // The latest sample is looked up once per connection, not per row.
    let mut latest_samples: HashMap<(String, DateTime<Utc>), Option<Flight>> = HashMap::new();
    let mut stats = SweepStats::default();
    let mut swept: SweptConnections = Vec::new();

    for row in open_rows {
        let connection = (row.callsign.clone(), row.logon_time);
        let latest = match latest_samples.get(&connection) {
            Some(cached) => cached.clone(),
            None => {
                let sample =
                    FlightsRepository::latest_sample_in(conn, &row.callsign, row.logon_time)?;
                latest_samples.insert(connection.clone(), sample.clone());
                sample
            }
        };

        let (last_seen, position, altitude) = match &latest {
            Some(sample) => (sample.last_updated, sample.position(), sample.altitude),
            None => {
                // No live samples left for this open row; close it where it
                // was opened.
                warn!(
                    "Open sector row {} for {} has no live flight samples",
                    row.id, row.callsign
                );
                (row.entry_time, entry_position(&row), row.entry_altitude)
            }
        };

        if now - last_seen < stale_timeout {
            continue;
        }

        let exit_time = last_seen.max(row.entry_time);
        let duration = interval_seconds(row.entry_time, exit_time);
        SectorOccupancyRepository::close_row(conn, row.id, exit_time, position, altitude, duration)?;
        stats.sectors_closed += 1;
        if !swept.contains(&connection) {
            swept.push(connection);
        }
    }

    stats.ended_controller_sessions =
        ControllersRepository::count_ended_before_in(conn, now - merge_window)?;

    Ok((stats, swept))
}

fn entry_position(row: &SectorOccupancy) -> Option<(f64, f64)> {
    match (row.entry_latitude, row.entry_longitude) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    }
}
