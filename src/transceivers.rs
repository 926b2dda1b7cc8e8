use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::vatsim_client::TransceiverGroup;

/// Which kind of connection owns a transceiver. Stored as a short string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Flight,
    Atc,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Flight => "flight",
            EntityType::Atc => "atc",
        }
    }
}

/// One radio endpoint sample. Append-only; deduplicated on
/// (callsign, transceiver_id, timestamp) so re-ingesting an identical
/// snapshot is a no-op.
#[derive(
    Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::transceivers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Transceiver {
    pub id: Uuid,
    pub callsign: String,
    pub transceiver_id: i32,
    pub frequency: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height_msl_m: Option<f64>,
    pub height_agl_m: Option<f64>,
    pub entity_type: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Transceiver {
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Split the snapshot's transceiver groups into samples tagged with the kind
/// of connection that owns them.
///
/// A callsign appearing in neither the pilot nor the controller list has no
/// known owner; those rows are dropped. Rows without a strictly positive
/// frequency are dropped too (the table enforces frequency > 0).
pub fn split_by_owner(
    groups: &[TransceiverGroup],
    flight_callsigns: &HashSet<String>,
    atc_callsigns: &HashSet<String>,
    sample_time: DateTime<Utc>,
    ingest_time: DateTime<Utc>,
) -> Vec<Transceiver> {
    let mut samples = Vec::new();
    let mut unknown_owners = 0usize;

    for group in groups {
        let entity_type = if flight_callsigns.contains(&group.callsign) {
            EntityType::Flight
        } else if atc_callsigns.contains(&group.callsign) {
            EntityType::Atc
        } else {
            unknown_owners += 1;
            continue;
        };

        for entry in &group.transceivers {
            let frequency = match entry.frequency {
                Some(f) if f > 0 => f,
                _ => {
                    warn!(
                        "Dropping transceiver {} of {} with missing or non-positive frequency",
                        entry.id, group.callsign
                    );
                    continue;
                }
            };

            samples.push(Transceiver {
                id: Uuid::now_v7(),
                callsign: group.callsign.clone(),
                transceiver_id: entry.id,
                frequency,
                latitude: entry.lat_lat,
                longitude: entry.lat_lon,
                height_msl_m: entry.height_msl_m,
                height_agl_m: entry.height_agl_m,
                entity_type: entity_type.as_str().to_string(),
                timestamp: sample_time,
                created_at: ingest_time,
            });
        }
    }

    if unknown_owners > 0 {
        debug!(
            "Dropped transceiver groups for {} callsigns with no matching pilot or controller",
            unknown_owners
        );
        metrics::counter!("ingest.transceivers.unknown_owner").increment(unknown_owners as u64);
    }

    samples
}
