use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vatsim_client::PilotEntry;

/// Identity of one pilot connection, shared by sector occupancy rows and
/// summaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlightKey {
    pub callsign: String,
    pub cid: i32,
    pub logon_time: DateTime<Utc>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
}

/// One observed sample of a pilot connection.
///
/// The live `flights` table holds the per-poll sample history of each
/// connection; rows are moved to `flights_archive` when the flight is
/// summarized. Field order matches the table definition.
#[derive(
    Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::flights)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Flight {
    pub id: Uuid,
    pub callsign: String,
    pub cid: i32,
    pub name: Option<String>,
    pub server: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub heading: Option<i32>,
    pub groundspeed: Option<i32>,
    pub transponder: Option<String>,
    pub qnh_i_hg: Option<f64>,
    pub qnh_mb: Option<i32>,
    pub flight_rules: Option<String>,
    pub aircraft_type: Option<String>,
    pub aircraft_faa: Option<String>,
    pub aircraft_short: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub alternate: Option<String>,
    pub cruise_tas: Option<String>,
    pub planned_altitude: Option<String>,
    pub deptime: Option<String>,
    pub enroute_time: Option<String>,
    pub fuel_time: Option<String>,
    pub remarks: Option<String>,
    pub route: Option<String>,
    pub revision_id: Option<i32>,
    pub assigned_transponder: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flight {
    /// Normalize an upstream pilot entry into a canonical sample, stamped
    /// with the ingest time.
    pub fn from_pilot(pilot: &PilotEntry, ingest_time: DateTime<Utc>) -> Self {
        let plan = pilot.flight_plan.as_ref();
        Self {
            id: Uuid::now_v7(),
            callsign: pilot.callsign.clone(),
            cid: pilot.cid,
            name: pilot.name.clone(),
            server: pilot.server.clone(),
            latitude: pilot.latitude,
            longitude: pilot.longitude,
            altitude: pilot.altitude,
            heading: pilot.heading,
            groundspeed: pilot.groundspeed,
            transponder: pilot.transponder.clone(),
            qnh_i_hg: pilot.qnh_i_hg,
            qnh_mb: pilot.qnh_mb,
            flight_rules: plan.and_then(|p| p.flight_rules.clone()),
            aircraft_type: plan.and_then(|p| p.aircraft.clone()),
            aircraft_faa: plan.and_then(|p| p.aircraft_faa.clone()),
            aircraft_short: plan.and_then(|p| p.aircraft_short.clone()),
            departure: plan.and_then(|p| p.departure.clone()),
            arrival: plan.and_then(|p| p.arrival.clone()),
            alternate: plan.and_then(|p| p.alternate.clone()),
            cruise_tas: plan.and_then(|p| p.cruise_tas.clone()),
            planned_altitude: plan.and_then(|p| p.altitude.clone()),
            deptime: plan.and_then(|p| p.deptime.clone()),
            enroute_time: plan.and_then(|p| p.enroute_time.clone()),
            fuel_time: plan.and_then(|p| p.fuel_time.clone()),
            remarks: plan.and_then(|p| p.remarks.clone()),
            route: plan.and_then(|p| p.route.clone()),
            revision_id: plan.and_then(|p| p.revision_id),
            assigned_transponder: plan.and_then(|p| p.assigned_transponder.clone()),
            logon_time: pilot.logon_time,
            last_updated: pilot.last_updated,
            created_at: ingest_time,
            updated_at: ingest_time,
        }
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn key(&self) -> FlightKey {
        FlightKey {
            callsign: self.callsign.clone(),
            cid: self.cid,
            logon_time: self.logon_time,
            departure: self.departure.clone(),
            arrival: self.arrival.clone(),
        }
    }
}

/// Insert model for `flights_archive`; identical to the live row plus the
/// archival stamp.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::flights_archive)]
pub struct ArchivedFlight {
    pub id: Uuid,
    pub callsign: String,
    pub cid: i32,
    pub name: Option<String>,
    pub server: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub heading: Option<i32>,
    pub groundspeed: Option<i32>,
    pub transponder: Option<String>,
    pub qnh_i_hg: Option<f64>,
    pub qnh_mb: Option<i32>,
    pub flight_rules: Option<String>,
    pub aircraft_type: Option<String>,
    pub aircraft_faa: Option<String>,
    pub aircraft_short: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub alternate: Option<String>,
    pub cruise_tas: Option<String>,
    pub planned_altitude: Option<String>,
    pub deptime: Option<String>,
    pub enroute_time: Option<String>,
    pub fuel_time: Option<String>,
    pub remarks: Option<String>,
    pub route: Option<String>,
    pub revision_id: Option<i32>,
    pub assigned_transponder: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedFlight {
    pub fn from_flight(flight: Flight, archived_at: DateTime<Utc>) -> Self {
        Self {
            id: flight.id,
            callsign: flight.callsign,
            cid: flight.cid,
            name: flight.name,
            server: flight.server,
            latitude: flight.latitude,
            longitude: flight.longitude,
            altitude: flight.altitude,
            heading: flight.heading,
            groundspeed: flight.groundspeed,
            transponder: flight.transponder,
            qnh_i_hg: flight.qnh_i_hg,
            qnh_mb: flight.qnh_mb,
            flight_rules: flight.flight_rules,
            aircraft_type: flight.aircraft_type,
            aircraft_faa: flight.aircraft_faa,
            aircraft_short: flight.aircraft_short,
            departure: flight.departure,
            arrival: flight.arrival,
            alternate: flight.alternate,
            cruise_tas: flight.cruise_tas,
            planned_altitude: flight.planned_altitude,
            deptime: flight.deptime,
            enroute_time: flight.enroute_time,
            fuel_time: flight.fuel_time,
            remarks: flight.remarks,
            route: flight.route,
            revision_id: flight.revision_id,
            assigned_transponder: flight.assigned_transponder,
            logon_time: flight.logon_time,
            last_updated: flight.last_updated,
            created_at: flight.created_at,
            updated_at: flight.updated_at,
            archived_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vatsim_client::FlightPlanEntry;

    fn sample_pilot() -> PilotEntry {
        serde_json::from_str(
            r#"{
                "callsign": "QFA123",
                "cid": 1234567,
                "name": "Test Pilot",
                "server": "AUSTRALIA",
                "latitude": -33.87,
                "longitude": 151.21,
                "altitude": 37000,
                "heading": 120,
                "groundspeed": 450,
                "transponder": "3421",
                "logon_time": "2025-06-10T01:00:00Z",
                "last_updated": "2025-06-10T02:00:00Z"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_from_pilot_without_flight_plan() {
        let pilot = sample_pilot();
        let ingest_time = Utc::now();
        let flight = Flight::from_pilot(&pilot, ingest_time);

        assert_eq!(flight.callsign, "QFA123");
        assert_eq!(flight.cid, 1234567);
        assert_eq!(flight.departure, None);
        assert_eq!(flight.flight_rules, None);
        assert_eq!(flight.created_at, ingest_time);
        assert_eq!(flight.position(), Some((-33.87, 151.21)));
    }

    #[test]
    fn test_from_pilot_maps_flight_plan_fields() {
        let mut pilot = sample_pilot();
        pilot.flight_plan = Some(FlightPlanEntry {
            flight_rules: Some("I".to_string()),
            aircraft: Some("B738/M".to_string()),
            aircraft_faa: Some("B738".to_string()),
            departure: Some("YSSY".to_string()),
            arrival: Some("YMML".to_string()),
            altitude: Some("37000".to_string()),
            ..Default::default()
        });

        let flight = Flight::from_pilot(&pilot, Utc::now());
        assert_eq!(flight.flight_rules.as_deref(), Some("I"));
        assert_eq!(flight.aircraft_type.as_deref(), Some("B738/M"));
        assert_eq!(flight.planned_altitude.as_deref(), Some("37000"));

        let key = flight.key();
        assert_eq!(key.departure.as_deref(), Some("YSSY"));
        assert_eq!(key.arrival.as_deref(), Some("YMML"));
    }

    #[test]
    fn test_position_requires_both_coordinates() {
        let mut pilot = sample_pilot();
        pilot.longitude = None;
        let flight = Flight::from_pilot(&pilot, Utc::now());
        assert_eq!(flight.position(), None);
    }
}
