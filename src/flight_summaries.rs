use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per completed flight: identity of the connection plus the
/// coverage and sector-traversal aggregates. Written once, in the same
/// transaction that archives the flight's detail rows.
#[derive(
    Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::flight_summaries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightSummary {
    pub id: Uuid,
    pub callsign: String,
    pub cid: i32,
    pub logon_time: DateTime<Utc>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub aircraft_type: Option<String>,
    pub aircraft_faa: Option<String>,
    pub aircraft_short: Option<String>,
    pub flight_rules: Option<String>,
    pub planned_altitude: Option<String>,
    pub route: Option<String>,
    pub deptime: Option<String>,
    pub time_online_minutes: f64,
    /// controller callsign -> minutes of co-frequency contact
    pub controller_callsigns: serde_json::Value,
    pub controller_time_percentage: Option<f64>,
    pub airborne_controller_time_percentage: Option<f64>,
    pub primary_enroute_sector: Option<String>,
    pub total_enroute_sectors: i32,
    pub total_enroute_time_minutes: f64,
    /// sector name -> minutes inside
    pub sector_breakdown: serde_json::Value,
    pub completion_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
