use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per completed controller session, written after short-disconnect
/// merging. `session_end_time` is always set: sessions are only summarized
/// once they have ended.
#[derive(
    Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::controller_summaries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ControllerSummary {
    pub id: Uuid,
    pub callsign: String,
    pub cid: i32,
    pub name: Option<String>,
    pub rating: i32,
    pub facility: i32,
    pub server: Option<String>,
    pub session_start_time: DateTime<Utc>,
    pub session_end_time: DateTime<Utc>,
    pub session_duration_minutes: f64,
    pub total_aircraft_handled: i32,
    pub peak_aircraft_count: i32,
    /// UTC hour-of-day ("0".."23") -> distinct aircraft that hour
    pub hourly_aircraft_breakdown: serde_json::Value,
    /// distinct frequencies (Hz) observed on this controller's transceivers
    pub frequencies_used: serde_json::Value,
    /// [{ callsign, first_seen, last_seen }]
    pub aircraft_details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
