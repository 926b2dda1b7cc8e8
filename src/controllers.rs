use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vatsim_client::ControllerEntry;

/// One ATC connection. Upserted by (callsign, logon_time): the row is
/// refreshed while the controller stays connected, and a reconnect (new
/// logon_time) creates a new row. Rows remain until the connection is
/// summarized and archived.
#[derive(
    Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::controllers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Controller {
    pub id: Uuid,
    pub callsign: String,
    pub cid: i32,
    pub name: Option<String>,
    pub rating: i32,
    pub facility: i32,
    pub visual_range: Option<i32>,
    pub text_atis: Option<String>,
    pub frequency: Option<String>,
    pub server: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Controller {
    pub fn from_entry(entry: &ControllerEntry, ingest_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            callsign: entry.callsign.clone(),
            cid: entry.cid,
            name: entry.name.clone(),
            rating: entry.rating.unwrap_or(0),
            facility: entry.facility.unwrap_or(0),
            visual_range: entry.visual_range,
            text_atis: entry.text_atis.clone(),
            frequency: entry.frequency.clone(),
            server: entry.server.clone(),
            logon_time: entry.logon_time,
            last_updated: entry.last_updated,
            created_at: ingest_time,
            updated_at: ingest_time,
        }
    }

    /// Observers and ATIS stations carry facility 0 and never control
    /// traffic; everything else is a controlling position.
    pub fn is_controlling_position(&self) -> bool {
        self.facility != 0
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::controllers_archive)]
pub struct ArchivedController {
    pub id: Uuid,
    pub callsign: String,
    pub cid: i32,
    pub name: Option<String>,
    pub rating: i32,
    pub facility: i32,
    pub visual_range: Option<i32>,
    pub text_atis: Option<String>,
    pub frequency: Option<String>,
    pub server: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedController {
    pub fn from_controller(controller: Controller, archived_at: DateTime<Utc>) -> Self {
        Self {
            id: controller.id,
            callsign: controller.callsign,
            cid: controller.cid,
            name: controller.name,
            rating: controller.rating,
            facility: controller.facility,
            visual_range: controller.visual_range,
            text_atis: controller.text_atis,
            frequency: controller.frequency,
            server: controller.server,
            logon_time: controller.logon_time,
            last_updated: controller.last_updated,
            created_at: controller.created_at,
            updated_at: controller.updated_at,
            archived_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(facility: i32) -> ControllerEntry {
        serde_json::from_str(&format!(
            r#"{{
                "callsign": "SY_APP",
                "cid": 7654321,
                "name": "Test Controller",
                "rating": 5,
                "facility": {facility},
                "visual_range": 150,
                "frequency": "124.400",
                "server": "AUSTRALIA",
                "logon_time": "2025-06-10T00:30:00Z",
                "last_updated": "2025-06-10T02:00:00Z"
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_from_entry() {
        let controller = Controller::from_entry(&sample_entry(5), Utc::now());
        assert_eq!(controller.callsign, "SY_APP");
        assert_eq!(controller.facility, 5);
        assert!(controller.is_controlling_position());
    }

    #[test]
    fn test_observer_is_not_controlling() {
        let controller = Controller::from_entry(&sample_entry(0), Utc::now());
        assert!(!controller.is_controlling_position());
    }
}
