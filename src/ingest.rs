use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::Connection;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::controllers::Controller;
use crate::controllers_repo::ControllersRepository;
use crate::db::{self, PgPool};
use crate::flight_plan::FlightPlanValidator;
use crate::flights::Flight;
use crate::flights_repo::FlightsRepository;
use crate::reference_data::ReferenceData;
use crate::sector_tracker::{SectorPlan, SectorTracker};
use crate::sweeper::StaleSweeper;
use crate::transceivers;
use crate::transceivers_repo::TransceiversRepository;
use crate::vatsim_client::{VatsimClient, VatsimSnapshot};

/// Last successful ingest time, shared with the health endpoint. Updated
/// atomically at the end of each committed tick.
pub type SharedLastIngest = Arc<RwLock<Option<DateTime<Utc>>>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub pilots_seen: usize,
    pub flights_admitted: usize,
    pub rejected_by_boundary: usize,
    pub rejected_by_flight_plan: usize,
    pub controllers_seen: usize,
    pub controllers_admitted: usize,
    pub transceiver_samples: usize,
    pub sector_rows_opened: usize,
    pub sector_rows_closed: usize,
}

/// Normalize and filter the snapshot's pilots: boundary first, then
/// flight-plan completeness.
pub fn admit_flights(
    snapshot: &VatsimSnapshot,
    reference: &ReferenceData,
    validator: &FlightPlanValidator,
    boundary_filter_enabled: bool,
    ingest_time: DateTime<Utc>,
) -> (Vec<Flight>, TickStats) {
    let mut stats = TickStats {
        pilots_seen: snapshot.pilots.len(),
        ..TickStats::default()
    };

    let mut flights = Vec::with_capacity(snapshot.pilots.len());
    for pilot in &snapshot.pilots {
        let flight = Flight::from_pilot(pilot, ingest_time);

        if boundary_filter_enabled && !reference.fir.contains(flight.latitude, flight.longitude) {
            stats.rejected_by_boundary += 1;
            continue;
        }
        if !validator.is_valid(&flight) {
            stats.rejected_by_flight_plan += 1;
            continue;
        }
        flights.push(flight);
    }
    stats.flights_admitted = flights.len();
    (flights, stats)
}

/// Normalize and filter the snapshot's controllers through the callsign
/// allow-list.
pub fn admit_controllers(
    snapshot: &VatsimSnapshot,
    reference: &ReferenceData,
    ingest_time: DateTime<Utc>,
) -> Vec<Controller> {
    snapshot
        .controllers
        .iter()
        .filter(|entry| reference.controller_allowed(&entry.callsign))
        .map(|entry| Controller::from_entry(entry, ingest_time))
        .collect()
}

/// One execution of the ingest pipeline: fetch, normalize, filter, persist
/// and run sector transitions in a single transaction, then sweep.
pub struct IngestService {
    pool: PgPool,
    client: VatsimClient,
    reference: Arc<ReferenceData>,
    validator: FlightPlanValidator,
    tracker: SectorTracker,
    sweeper: StaleSweeper,
    boundary_filter_enabled: bool,
    sector_tracking_enabled: bool,
    retry_attempts: u32,
    last_ingest: SharedLastIngest,
}

impl IngestService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        client: VatsimClient,
        reference: Arc<ReferenceData>,
        tracker: SectorTracker,
        sweeper: StaleSweeper,
        config: &AppConfig,
        last_ingest: SharedLastIngest,
    ) -> Self {
        Self {
            pool,
            client,
            reference,
            validator: FlightPlanValidator::new(config.flight_plan_validation_enabled),
            tracker,
            sweeper,
            boundary_filter_enabled: config.enable_boundary_filter,
            sector_tracking_enabled: config.sector_tracking_enabled,
            retry_attempts: config.db_retry_attempts,
            last_ingest,
        }
    }

    /// Run one tick. Any error leaves the database untouched (the whole tick
    /// is one transaction) and is reported to the scheduler, which skips the
    /// tick.
    pub async fn run_tick(&self) -> Result<TickStats> {
        let tick_started = std::time::Instant::now();
        let snapshot = self.client.fetch_snapshot().await?;
        let ingest_time = Utc::now();
        let sample_time = snapshot.sample_time();

        let (flights, mut stats) = admit_flights(
            &snapshot,
            &self.reference,
            &self.validator,
            self.boundary_filter_enabled,
            ingest_time,
        );
        let controllers = admit_controllers(&snapshot, &self.reference, ingest_time);
        stats.controllers_seen = snapshot.controllers.len();
        stats.controllers_admitted = controllers.len();

        // Transceiver ownership is resolved against the admitted entities,
        // so rejected flights leave no orphan radio rows.
        let flight_callsigns: HashSet<String> =
            flights.iter().map(|f| f.callsign.clone()).collect();
        let atc_callsigns: HashSet<String> =
            controllers.iter().map(|c| c.callsign.clone()).collect();
        let transceiver_samples = transceivers::split_by_owner(
            &snapshot.transceivers,
            &flight_callsigns,
            &atc_callsigns,
            sample_time,
            ingest_time,
        );
        stats.transceiver_samples = transceiver_samples.len();

        // Sector transitions are planned from the in-memory open-sector map
        // and this tick's samples, written inside the same transaction as
        // the table upserts, and folded into the map only after commit.
        let plans: Vec<SectorPlan> = match (self.sector_tracking_enabled, &self.reference.sectors) {
            (true, Some(sectors)) => flights
                .iter()
                .filter_map(|flight| self.tracker.plan_for_sample(flight, sectors))
                .collect(),
            _ => Vec::new(),
        };
        stats.sector_rows_opened = plans.iter().map(|p| p.opens.len()).sum();
        stats.sector_rows_closed = plans.iter().map(|p| p.closes.len()).sum();

        let pool = self.pool.clone();
        let retry_attempts = self.retry_attempts;
        let plans = tokio::task::spawn_blocking(move || {
            db::with_transient_retry(retry_attempts, "ingest tick", || {
                let mut conn = pool.get()?;
                conn.transaction::<_, anyhow::Error, _>(|conn| {
                    FlightsRepository::upsert_batch(conn, &flights)?;
                    ControllersRepository::upsert_batch(conn, &controllers)?;
                    TransceiversRepository::insert_batch(conn, &transceiver_samples)?;
                    for plan in &plans {
                        SectorTracker::execute_plan(conn, plan)?;
                    }
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok::<_, anyhow::Error>(plans)
        })
        .await??;

        for plan in &plans {
            self.tracker.apply_plan(plan);
        }

        if let Ok(mut guard) = self.last_ingest.write() {
            *guard = Some(ingest_time);
        }

        record_tick_metrics(&stats, tick_started.elapsed());
        debug!(
            "Tick complete: {}/{} pilots admitted ({} boundary, {} flight-plan rejects), {} controllers, {} transceiver samples, sectors +{}/-{}",
            stats.flights_admitted,
            stats.pilots_seen,
            stats.rejected_by_boundary,
            stats.rejected_by_flight_plan,
            stats.controllers_admitted,
            stats.transceiver_samples,
            stats.sector_rows_opened,
            stats.sector_rows_closed,
        );

        // The sweeper runs after every successful tick, in its own
        // transaction; a sweep failure does not fail the committed tick.
        match self.sweeper.sweep(Utc::now()).await {
            Ok(sweep) if sweep.sectors_closed > 0 => {
                info!("Post-tick sweep closed {} stale sector rows", sweep.sectors_closed);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Post-tick sweep failed: {:#}", e);
            }
        }

        Ok(stats)
    }
}

fn record_tick_metrics(stats: &TickStats, elapsed: std::time::Duration) {
    metrics::counter!("ingest.ticks").increment(1);
    metrics::counter!("ingest.pilots_seen").increment(stats.pilots_seen as u64);
    metrics::counter!("ingest.flights_admitted").increment(stats.flights_admitted as u64);
    metrics::counter!("ingest.rejected_boundary").increment(stats.rejected_by_boundary as u64);
    metrics::counter!("ingest.rejected_flight_plan")
        .increment(stats.rejected_by_flight_plan as u64);
    metrics::counter!("ingest.transceiver_samples").increment(stats.transceiver_samples as u64);
    metrics::counter!("ingest.sector_rows_opened").increment(stats.sector_rows_opened as u64);
    metrics::counter!("ingest.sector_rows_closed").increment(stats.sector_rows_closed as u64);
    metrics::histogram!("ingest.tick_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::FirBoundary;
    use serde_json::json;

    /// FIR covering lat/lon 0..10 with no sectors and no allow-list.
    fn reference() -> ReferenceData {
        let fir = FirBoundary::from_geojson(&json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]]
        }))
        .unwrap();
        ReferenceData {
            fir,
            sectors: None,
            controller_allowlist: None,
            icao_states: std::collections::HashMap::new(),
        }
    }

    fn snapshot(lat: f64, lon: f64, flight_rules: &str) -> VatsimSnapshot {
        serde_json::from_value(json!({
            "pilots": [{
                "callsign": "QFA123",
                "cid": 1234567,
                "latitude": lat,
                "longitude": lon,
                "groundspeed": 450,
                "flight_plan": {
                    "flight_rules": flight_rules,
                    "aircraft_faa": "B738",
                    "departure": "YSSY",
                    "arrival": "YMML"
                },
                "logon_time": "2025-06-10T01:00:00Z",
                "last_updated": "2025-06-10T02:00:00Z"
            }],
            "controllers": [],
            "transceivers": []
        }))
        .unwrap()
    }

    #[test]
    fn test_admitted_inside_fir_with_valid_plan() {
        let (flights, stats) = admit_flights(
            &snapshot(5.0, 5.0, "I"),
            &reference(),
            &FlightPlanValidator::new(true),
            true,
            Utc::now(),
        );
        assert_eq!(flights.len(), 1);
        assert_eq!(stats.flights_admitted, 1);
        assert_eq!(stats.rejected_by_boundary, 0);
    }

    #[test]
    fn test_rejected_outside_fir() {
        let (flights, stats) = admit_flights(
            &snapshot(51.5, -0.12, "I"),
            &reference(),
            &FlightPlanValidator::new(true),
            true,
            Utc::now(),
        );
        assert!(flights.is_empty());
        assert_eq!(stats.rejected_by_boundary, 1);
    }

    #[test]
    fn test_rejected_by_flight_plan() {
        let (flights, stats) = admit_flights(
            &snapshot(5.0, 5.0, "X"),
            &reference(),
            &FlightPlanValidator::new(true),
            true,
            Utc::now(),
        );
        assert!(flights.is_empty());
        assert_eq!(stats.rejected_by_flight_plan, 1);
    }

    #[test]
    fn test_boundary_filter_disabled_admits_everywhere() {
        let (flights, _) = admit_flights(
            &snapshot(51.5, -0.12, "I"),
            &reference(),
            &FlightPlanValidator::new(true),
            false,
            Utc::now(),
        );
        assert_eq!(flights.len(), 1);
    }

    #[test]
    fn test_controller_allowlist_filters() {
        let snapshot: VatsimSnapshot = serde_json::from_value(json!({
            "pilots": [],
            "controllers": [
                {
                    "callsign": "SY_APP", "cid": 1, "rating": 5, "facility": 5,
                    "logon_time": "2025-06-10T01:00:00Z",
                    "last_updated": "2025-06-10T02:00:00Z"
                },
                {
                    "callsign": "EGLL_TWR", "cid": 2, "rating": 3, "facility": 4,
                    "logon_time": "2025-06-10T01:00:00Z",
                    "last_updated": "2025-06-10T02:00:00Z"
                }
            ],
            "transceivers": []
        }))
        .unwrap();

        let mut reference = reference();
        reference.controller_allowlist =
            Some(std::collections::HashSet::from(["SY_APP".to_string()]));

        let controllers = admit_controllers(&snapshot, &reference, Utc::now());
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].callsign, "SY_APP");
    }
}
