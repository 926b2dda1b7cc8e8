use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use diesel::PgConnection;
use diesel::prelude::QueryResult;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::flights::{Flight, FlightKey};
use crate::sector_index::SectorIndex;
use crate::sector_occupancy::{SectorOccupancy, interval_seconds};
use crate::sector_occupancy_repo::SectorOccupancyRepository;

/// In-memory record of one open occupancy row.
#[derive(Debug, Clone)]
pub struct OpenSector {
    pub row_id: Uuid,
    pub entry_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ConnectionState {
    last_sample_time: Option<DateTime<Utc>>,
    open: HashMap<String, OpenSector>,
}

/// (callsign, logon_time) identifies a connection in the tracker.
type ConnectionKey = (String, DateTime<Utc>);

/// The writes one accepted sample implies. Planned outside the database,
/// executed inside the ingest transaction, and applied to the in-memory
/// state only after the transaction commits.
#[derive(Debug)]
pub struct SectorPlan {
    pub key: FlightKey,
    pub sample_time: DateTime<Utc>,
    pub position: Option<(f64, f64)>,
    pub altitude: Option<i32>,
    pub closes: Vec<(String, OpenSector)>,
    pub opens: Vec<SectorOccupancy>,
}

impl SectorPlan {
    pub fn is_noop(&self) -> bool {
        self.closes.is_empty() && self.opens.is_empty()
    }
}

/// Sector names to close and to open, given the previously-open set and the
/// currently-containing set. Sectors in both are left untouched.
pub fn plan_transitions(
    previous: &HashSet<String>,
    current: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut to_close: Vec<String> = previous.difference(current).cloned().collect();
    let mut to_open: Vec<String> = current.difference(previous).cloned().collect();
    to_close.sort();
    to_open.sort();
    (to_close, to_open)
}

/// Per-flight sector occupancy state machine.
///
/// Holds the open-sector map for every live connection. The map is never
/// persisted: it is rebuilt on startup from occupancy rows with a null
/// exit_time.
pub struct SectorTracker {
    occupancy_repo: SectorOccupancyRepository,
    states: Arc<DashMap<ConnectionKey, ConnectionState>>,
}

impl Clone for SectorTracker {
    fn clone(&self) -> Self {
        Self {
            occupancy_repo: self.occupancy_repo.clone(),
            states: Arc::clone(&self.states),
        }
    }
}

impl SectorTracker {
    pub fn new(occupancy_repo: SectorOccupancyRepository) -> Self {
        Self {
            occupancy_repo,
            states: Arc::new(DashMap::new()),
        }
    }

    /// Rebuild the open-sector map from the database. Returns the number of
    /// open rows recovered.
    pub async fn initialize_from_database(&self) -> Result<usize> {
        let open_rows = self.occupancy_repo.open_rows().await?;
        let recovered = open_rows.len();

        for row in open_rows {
            let mut state = self
                .states
                .entry((row.callsign.clone(), row.logon_time))
                .or_default();
            state.open.insert(
                row.sector_name.clone(),
                OpenSector {
                    row_id: row.id,
                    entry_time: row.entry_time,
                },
            );
        }

        info!(
            "Sector tracker recovered {} open sector rows across {} connections",
            recovered,
            self.states.len()
        );
        Ok(recovered)
    }

    /// Plan the sector transitions one accepted sample implies.
    ///
    /// Returns `None` when the sample must be ignored outright (a second
    /// sample with the same timestamp as the previous one). A sample with no
    /// position keeps every open sector open: the flight is assumed still
    /// there until the sweeper says otherwise.
    pub fn plan_for_sample(&self, flight: &Flight, sectors: &SectorIndex) -> Option<SectorPlan> {
        let key = flight.key();
        let connection = (flight.callsign.clone(), flight.logon_time);
        let sample_time = flight.last_updated;

        let state = self.states.get(&connection);
        if let Some(state) = &state
            && state.last_sample_time == Some(sample_time)
        {
            debug!(
                "Ignoring duplicate sample for {} at {}",
                flight.callsign, sample_time
            );
            return None;
        }

        let previous: HashSet<String> = state
            .as_ref()
            .map(|s| s.open.keys().cloned().collect())
            .unwrap_or_default();

        let position = flight.position();
        let (closes, opens) = if position.is_none() && !previous.is_empty() {
            // Conservative: no coordinates, no transitions.
            (Vec::new(), Vec::new())
        } else {
            let current = sectors.sectors_containing(flight.latitude, flight.longitude);
            plan_transitions(&previous, &current)
        };

        let closes = closes
            .into_iter()
            .filter_map(|name| {
                state
                    .as_ref()
                    .and_then(|s| s.open.get(&name).cloned())
                    .map(|open| (name, open))
            })
            .collect();

        let opens = opens
            .into_iter()
            .map(|name| SectorOccupancy::open(&key, name, sample_time, position, flight.altitude))
            .collect();

        Some(SectorPlan {
            key,
            sample_time,
            position,
            altitude: flight.altitude,
            closes,
            opens,
        })
    }

    /// Execute a plan's row writes inside the ingest transaction.
    pub fn execute_plan(conn: &mut PgConnection, plan: &SectorPlan) -> QueryResult<()> {
        for (_, open) in &plan.closes {
            let duration = interval_seconds(open.entry_time, plan.sample_time);
            SectorOccupancyRepository::close_row(
                conn,
                open.row_id,
                plan.sample_time,
                plan.position,
                plan.altitude,
                duration,
            )?;
        }
        for row in &plan.opens {
            SectorOccupancyRepository::insert_open(conn, row)?;
        }
        Ok(())
    }

    /// Fold a committed plan into the in-memory state. Must only be called
    /// after the transaction that executed the plan has committed.
    pub fn apply_plan(&self, plan: &SectorPlan) {
        let connection = (plan.key.callsign.clone(), plan.key.logon_time);
        let mut state = self.states.entry(connection).or_default();
        state.last_sample_time = Some(plan.sample_time);

        for (name, _) in &plan.closes {
            state.open.remove(name);
        }
        for row in &plan.opens {
            state.open.insert(
                row.sector_name.clone(),
                OpenSector {
                    row_id: row.id,
                    entry_time: row.entry_time,
                },
            );
        }
    }

    /// Forget a connection entirely (after its rows were closed by the
    /// sweeper or deleted by summarization).
    pub fn forget_connection(&self, callsign: &str, logon_time: DateTime<Utc>) {
        self.states.remove(&(callsign.to_string(), logon_time));
    }

    /// Number of open sector rows currently tracked, for metrics.
    pub fn open_sector_count(&self) -> usize {
        self.states.iter().map(|entry| entry.value().open.len()).sum()
    }
}
