//! Database-backed end-to-end scenarios for the ingestion pipeline.
//!
//! All tests here require PostgreSQL (see `common::TestDatabase`) and are
//! ignored by default; run them with `cargo test -- --ignored` against a
//! local database.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use diesel::Connection;
use diesel::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::TestDatabase;
use vatstats::atc_detector::{AtcDetector, MatchCriteria};
use vatstats::config::{AppConfig, ProximityConfig};
use vatstats::controller_summarizer::ControllerSummarizer;
use vatstats::controllers::Controller;
use vatstats::controllers_repo::ControllersRepository;
use vatstats::flight_summarizer::FlightSummarizer;
use vatstats::flights::Flight;
use vatstats::flights_repo::FlightsRepository;
use vatstats::sector_index::SectorIndex;
use vatstats::sector_occupancy_repo::SectorOccupancyRepository;
use vatstats::sector_tracker::SectorTracker;
use vatstats::sweeper::StaleSweeper;
use vatstats::transceivers::Transceiver;
use vatstats::transceivers_repo::TransceiversRepository;

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "unused".to_string(),
        database_pool_size: 5,
        database_max_overflow: 5,
        statement_timeout_secs: 60,
        db_retry_attempts: 3,
        vatsim_data_url: "http://localhost/unused".to_string(),
        polling_interval_secs: 60,
        request_timeout_secs: 60,
        fetch_retry_limit: 1,
        fir_polygon_path: "/tmp/unused.geojson".into(),
        sector_data_path: None,
        controller_list_path: None,
        icao_states_path: None,
        enable_boundary_filter: true,
        flight_plan_validation_enabled: true,
        sector_tracking_enabled: true,
        cleanup_flight_timeout_secs: 300,
        flight_completion_hours: 14,
        flight_retention_hours: 168,
        flight_summary_interval_mins: 60,
        controller_completion_minutes: 30,
        controller_summary_interval_mins: 60,
        controller_merge_window_secs: 300,
        proximity: ProximityConfig::default(),
        match_time_window_secs: 180,
        airborne_ground_speed_kt: 50.0,
        guard_frequency_hz: 122_800_000,
        shutdown_grace_secs: 60,
        web_interface: "127.0.0.1".to_string(),
        web_port: 0,
        metrics_port: None,
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 1, 0, 0).unwrap()
}

fn flight_sample(callsign: &str, lon: Option<f64>, minute: i64) -> Flight {
    let t = base_time() + chrono::Duration::minutes(minute);
    Flight {
        id: Uuid::now_v7(),
        callsign: callsign.to_string(),
        cid: 1234567,
        name: Some("Test Pilot".to_string()),
        server: Some("AUSTRALIA".to_string()),
        latitude: lon.map(|_| 5.0),
        longitude: lon,
        altitude: Some(35000),
        heading: Some(120),
        groundspeed: Some(450),
        transponder: Some("3421".to_string()),
        qnh_i_hg: None,
        qnh_mb: None,
        flight_rules: Some("I".to_string()),
        aircraft_type: Some("B738/M".to_string()),
        aircraft_faa: Some("B738".to_string()),
        aircraft_short: Some("B738".to_string()),
        departure: Some("YSSY".to_string()),
        arrival: Some("YMML".to_string()),
        alternate: None,
        cruise_tas: None,
        planned_altitude: Some("37000".to_string()),
        deptime: None,
        enroute_time: None,
        fuel_time: None,
        remarks: None,
        route: Some("DCT".to_string()),
        revision_id: None,
        assigned_transponder: None,
        logon_time: base_time(),
        last_updated: t,
        created_at: t,
        updated_at: t,
    }
}

fn controller_row(callsign: &str, logon_minute: i64, last_seen_minute: i64) -> Controller {
    let logon = base_time() + chrono::Duration::minutes(logon_minute);
    let seen = base_time() + chrono::Duration::minutes(last_seen_minute);
    Controller {
        id: Uuid::now_v7(),
        callsign: callsign.to_string(),
        cid: 7654321,
        name: Some("Test Controller".to_string()),
        rating: 5,
        facility: 5,
        visual_range: Some(150),
        text_atis: None,
        frequency: Some("124.400".to_string()),
        server: Some("AUSTRALIA".to_string()),
        logon_time: logon,
        last_updated: seen,
        created_at: logon,
        updated_at: seen,
    }
}

fn transceiver_sample(callsign: &str, entity_type: &str, minute: i64, frequency: i64) -> Transceiver {
    let t = base_time() + chrono::Duration::minutes(minute);
    Transceiver {
        id: Uuid::now_v7(),
        callsign: callsign.to_string(),
        transceiver_id: 0,
        frequency,
        latitude: Some(-33.9),
        longitude: Some(151.2),
        height_msl_m: Some(11000.0),
        height_agl_m: Some(10900.0),
        entity_type: entity_type.to_string(),
        timestamp: t,
        created_at: t,
    }
}

fn sectors_ab() -> SectorIndex {
    SectorIndex::from_geojson(&json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "name": "A" },
                "geometry": { "type": "Polygon", "coordinates":
                    [[[0.0, 0.0], [6.0, 0.0], [6.0, 10.0], [0.0, 10.0], [0.0, 0.0]]] }
            },
            {
                "type": "Feature",
                "properties": { "name": "B" },
                "geometry": { "type": "Polygon", "coordinates":
                    [[[4.0, 0.0], [10.0, 0.0], [10.0, 10.0], [4.0, 10.0], [4.0, 0.0]]] }
            }
        ]
    }))
    .unwrap()
}

fn run_plans(
    pool: &vatstats::db::PgPool,
    tracker: &SectorTracker,
    sectors: &SectorIndex,
    samples: &[Flight],
) {
    let mut conn = pool.get().unwrap();
    for sample in samples {
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            FlightsRepository::upsert_batch(conn, std::slice::from_ref(sample))?;
            if let Some(plan) = tracker.plan_for_sample(sample, sectors) {
                SectorTracker::execute_plan(conn, &plan)?;
                tracker.apply_plan(&plan);
            }
            Ok(())
        })
        .unwrap();
    }
}

#[tokio::test]
#[ignore] // Requires PostgreSQL via TEST_DATABASE_URL
async fn test_identical_snapshot_reingestion_is_idempotent() {
    let db = TestDatabase::new().await.unwrap();
    let pool = db.pool();
    let repo = FlightsRepository::new(pool.clone());

    for _ in 0..2 {
        // Fresh rows each pass, as each tick produces: new row ids, same
        // (callsign, logon_time, last_updated) sample key.
        let samples = vec![flight_sample("QFA123", Some(2.0), 0)];
        let mut conn = pool.get().unwrap();
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            FlightsRepository::upsert_batch(conn, &samples)?;
            Ok(())
        })
        .unwrap();
    }

    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL via TEST_DATABASE_URL
async fn test_sector_crossing_produces_two_rows() {
    // S4: A-only -> A∩B -> B-only gives a closed A row and an open B row.
    let db = TestDatabase::new().await.unwrap();
    let pool = db.pool();
    let tracker = SectorTracker::new(SectorOccupancyRepository::new(pool.clone()));
    let sectors = sectors_ab();

    let ticks = vec![
        flight_sample("QFA123", Some(2.0), 0),
        flight_sample("QFA123", Some(5.0), 1),
        flight_sample("QFA123", Some(8.0), 2),
    ];
    run_plans(&pool, &tracker, &sectors, &ticks);

    let rows = SectorOccupancyRepository::new(pool.clone())
        .rows_for_connection("QFA123", base_time())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let row_a = rows.iter().find(|r| r.sector_name == "A").unwrap();
    let row_b = rows.iter().find(|r| r.sector_name == "B").unwrap();
    assert!(row_a.exit_time.is_some());
    assert_eq!(row_a.duration_seconds, Some(120));
    assert!(row_b.exit_time.is_none());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL via TEST_DATABASE_URL
async fn test_sweeper_closes_stale_rows_once() {
    // S5 plus the idempotence law: a second sweep closes nothing.
    let db = TestDatabase::new().await.unwrap();
    let pool = db.pool();
    let tracker = SectorTracker::new(SectorOccupancyRepository::new(pool.clone()));
    let sectors = sectors_ab();

    run_plans(&pool, &tracker, &sectors, &[flight_sample("QFA123", Some(5.0), 0)]);

    let sweeper = StaleSweeper::new(pool.clone(), tracker.clone(), &test_config());
    let six_minutes_later = base_time() + chrono::Duration::minutes(6);

    let first = sweeper.sweep(six_minutes_later).await.unwrap();
    assert_eq!(first.sectors_closed, 2); // A and B both cover lon 5.0

    let second = sweeper.sweep(six_minutes_later).await.unwrap();
    assert_eq!(second.sectors_closed, 0);

    let rows = SectorOccupancyRepository::new(pool.clone())
        .rows_for_connection("QFA123", base_time())
        .await
        .unwrap();
    for row in rows {
        let exit = row.exit_time.unwrap();
        assert_eq!(exit, base_time()); // closed at the last sample time
        assert!(row.duration_seconds.unwrap() >= 0);
    }
}

#[tokio::test]
#[ignore] // Requires PostgreSQL via TEST_DATABASE_URL
async fn test_flight_summary_archival_is_atomic_and_idempotent() {
    let db = TestDatabase::new().await.unwrap();
    let pool = db.pool();
    let config = test_config();

    // Ten minutes of samples plus matching controller and transceiver rows.
    let samples: Vec<Flight> = (0..=10).map(|m| flight_sample("QFA123", Some(5.0), m)).collect();
    let controllers = vec![controller_row("SY_APP", 0, 10)];
    let mut transceivers: Vec<Transceiver> = (0..=10)
        .map(|m| transceiver_sample("QFA123", "flight", m, 124_400_000))
        .collect();
    transceivers.extend((0..=10).map(|m| transceiver_sample("SY_APP", "atc", m, 124_400_000)));

    {
        let mut conn = pool.get().unwrap();
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            FlightsRepository::upsert_batch(conn, &samples)?;
            ControllersRepository::upsert_batch(conn, &controllers)?;
            TransceiversRepository::insert_batch(conn, &transceivers)?;
            Ok(())
        })
        .unwrap();
    }

    let criteria = MatchCriteria {
        proximity: ProximityConfig::default(),
        match_window: chrono::Duration::seconds(180),
        guard_frequency_hz: 122_800_000,
    };
    let detector = AtcDetector::new(
        ControllersRepository::new(pool.clone()),
        TransceiversRepository::new(pool.clone()),
        criteria,
    );
    let tracker = SectorTracker::new(SectorOccupancyRepository::new(pool.clone()));
    let summarizer = FlightSummarizer::new(pool.clone(), detector, tracker, &config);

    // 15 hours later the flight is past the completion window.
    let now = base_time() + chrono::Duration::hours(15);
    let cancel = CancellationToken::new();
    assert_eq!(summarizer.run_once(now, &cancel).await.unwrap(), 1);

    // Invariant: summary exists, live rows are gone, archive rows exist.
    let flights_repo = FlightsRepository::new(pool.clone());
    assert_eq!(flights_repo.count().await.unwrap(), 0);

    let summaries = vatstats::flight_summaries_repo::FlightSummariesRepository::new(pool.clone())
        .list(Default::default())
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.callsign, "QFA123");
    let contact_minutes = summary
        .controller_callsigns
        .get("SY_APP")
        .and_then(|v| v.as_f64())
        .unwrap();
    assert!(contact_minutes >= 9.0);
    assert!(summary.controller_time_percentage.unwrap() > 0.0);

    {
        use vatstats::schema::flights_archive::dsl::*;
        let mut conn = pool.get().unwrap();
        let archived: i64 = flights_archive.count().get_result(&mut conn).unwrap();
        assert_eq!(archived, 11);
    }

    // Second run finds nothing to summarize.
    assert_eq!(summarizer.run_once(now, &cancel).await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL via TEST_DATABASE_URL
async fn test_controller_session_merging_scenarios() {
    // S7: a four-minute gap merges into one session; a six-minute gap does
    // not.
    let db = TestDatabase::new().await.unwrap();
    let pool = db.pool();
    let config = test_config();

    let rows = vec![
        // SY_APP: off at T+4, back at T+8 -> one ~10 minute session
        controller_row("SY_APP", 0, 4),
        controller_row("SY_APP", 8, 10),
        // ML_APP: off at T+4, back at T+10 -> two sessions
        controller_row("ML_APP", 0, 4),
        controller_row("ML_APP", 10, 12),
    ];
    {
        let mut conn = pool.get().unwrap();
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            ControllersRepository::upsert_batch(conn, &rows)?;
            Ok(())
        })
        .unwrap();
    }

    let criteria = MatchCriteria {
        proximity: ProximityConfig::default(),
        match_window: chrono::Duration::seconds(180),
        guard_frequency_hz: 122_800_000,
    };
    let summarizer = ControllerSummarizer::new(pool.clone(), criteria, &config);

    let now = base_time() + chrono::Duration::hours(2);
    let cancel = CancellationToken::new();
    assert_eq!(summarizer.run_once(now, &cancel).await.unwrap(), 3);

    let summaries_repo =
        vatstats::controller_summaries_repo::ControllerSummariesRepository::new(pool.clone());

    let sy = summaries_repo
        .list(vatstats::controller_summaries_repo::ControllerSummaryFilter {
            callsign: Some("SY_APP".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sy.len(), 1);
    assert!((sy[0].session_duration_minutes - 10.0).abs() < 0.1);

    let ml = summaries_repo
        .list(vatstats::controller_summaries_repo::ControllerSummaryFilter {
            callsign: Some("ML_APP".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ml.len(), 2);

    // Live controller rows for both callsigns were archived.
    assert_eq!(ControllersRepository::new(pool.clone()).count().await.unwrap(), 0);
}
