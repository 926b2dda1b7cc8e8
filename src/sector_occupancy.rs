use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flights::FlightKey;

/// A half-open interval during which one flight is inside one named sector.
/// `exit_time` is null while the flight is still inside.
#[derive(
    Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::flight_sector_occupancy)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SectorOccupancy {
    pub id: Uuid,
    pub callsign: String,
    pub cid: i32,
    pub logon_time: DateTime<Utc>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub sector_name: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_latitude: Option<f64>,
    pub entry_longitude: Option<f64>,
    pub exit_latitude: Option<f64>,
    pub exit_longitude: Option<f64>,
    pub entry_altitude: Option<i32>,
    pub exit_altitude: Option<i32>,
    pub duration_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SectorOccupancy {
    /// A freshly-entered sector interval, still open.
    pub fn open(
        key: &FlightKey,
        sector_name: String,
        entry_time: DateTime<Utc>,
        position: Option<(f64, f64)>,
        altitude: Option<i32>,
    ) -> Self {
        let (entry_latitude, entry_longitude) = match position {
            Some((lat, lon)) => (Some(lat), Some(lon)),
            None => (None, None),
        };
        Self {
            id: Uuid::now_v7(),
            callsign: key.callsign.clone(),
            cid: key.cid,
            logon_time: key.logon_time,
            departure: key.departure.clone(),
            arrival: key.arrival.clone(),
            sector_name,
            entry_time,
            exit_time: None,
            entry_latitude,
            entry_longitude,
            exit_latitude: None,
            exit_longitude: None,
            entry_altitude: altitude,
            exit_altitude: None,
            duration_seconds: None,
            created_at: entry_time,
            updated_at: entry_time,
        }
    }
}

/// Seconds between entry and exit, rounded to the nearest whole second.
/// Zero-duration intervals (entered and left within one tick) are valid.
pub fn interval_seconds(entry_time: DateTime<Utc>, exit_time: DateTime<Utc>) -> i32 {
    ((exit_time - entry_time).num_milliseconds() as f64 / 1000.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> FlightKey {
        FlightKey {
            callsign: "QFA123".to_string(),
            cid: 1234567,
            logon_time: Utc.with_ymd_and_hms(2025, 6, 10, 1, 0, 0).unwrap(),
            departure: Some("YSSY".to_string()),
            arrival: Some("YMML".to_string()),
        }
    }

    #[test]
    fn test_open_row_has_no_exit() {
        let t = Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap();
        let row = SectorOccupancy::open(&key(), "ARL".to_string(), t, Some((-34.0, 150.0)), Some(35000));
        assert_eq!(row.sector_name, "ARL");
        assert_eq!(row.entry_time, t);
        assert!(row.exit_time.is_none());
        assert!(row.duration_seconds.is_none());
        assert_eq!(row.entry_latitude, Some(-34.0));
    }

    #[test]
    fn test_interval_seconds_rounds() {
        let entry = Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap();
        let exit = entry + chrono::Duration::milliseconds(90_400);
        assert_eq!(interval_seconds(entry, exit), 90);
        let exit = entry + chrono::Duration::milliseconds(90_600);
        assert_eq!(interval_seconds(entry, exit), 91);
    }

    #[test]
    fn test_zero_duration_permitted() {
        let t = Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap();
        assert_eq!(interval_seconds(t, t), 0);
    }
}
