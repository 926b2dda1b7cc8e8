use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::config::ProximityConfig;
use crate::controllers_repo::ControllersRepository;
use crate::transceivers::Transceiver;
use crate::transceivers_repo::TransceiversRepository;

pub const METERS_PER_NM: f64 = 1852.0;

/// Great-circle distance between two points in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Controller position type, classified by callsign suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerType {
    Ground,
    Tower,
    Approach,
    Center,
    FlightService,
    Other,
}

impl ControllerType {
    pub fn from_callsign(callsign: &str) -> Self {
        match callsign.rsplit('_').next() {
            Some("GND") => ControllerType::Ground,
            Some("TWR") => ControllerType::Tower,
            Some("APP") => ControllerType::Approach,
            Some("CTR") => ControllerType::Center,
            Some("FSS") => ControllerType::FlightService,
            _ => ControllerType::Other,
        }
    }

    pub fn range_nm(&self, proximity: &ProximityConfig) -> f64 {
        match self {
            ControllerType::Ground => proximity.ground_nm,
            ControllerType::Tower => proximity.tower_nm,
            ControllerType::Approach => proximity.approach_nm,
            ControllerType::Center => proximity.center_nm,
            ControllerType::FlightService => proximity.fss_nm,
            ControllerType::Other => proximity.default_nm,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchCriteria {
    pub proximity: ProximityConfig,
    pub match_window: chrono::Duration,
    pub guard_frequency_hz: i64,
}

/// One controller's co-frequency contact with a flight.
#[derive(Debug, Clone)]
pub struct ControllerContact {
    pub controller_callsign: String,
    /// Distinct flight-transceiver sample timestamps that matched. At the
    /// polling cadence this is proportional to contact time.
    pub matched_sample_times: Vec<DateTime<Utc>>,
    pub first_match: DateTime<Utc>,
    pub last_match: DateTime<Utc>,
}

impl ControllerContact {
    pub fn matched_samples(&self) -> usize {
        self.matched_sample_times.len()
    }
}

/// The detector's result for one flight window.
#[derive(Debug, Default)]
pub struct InteractionReport {
    /// Contact per controller callsign.
    pub contacts: HashMap<String, ControllerContact>,
    /// Flight sample timestamps matched by any controller; drives the
    /// flight's overall coverage percentage.
    pub matched_flight_times: HashSet<DateTime<Utc>>,
}

/// Whether one flight sample and one ATC sample are in contact: same
/// non-guard frequency, within the match window, and within the controller
/// type's range. Samples without a position never match.
fn samples_match(
    flight: &Transceiver,
    atc: &Transceiver,
    range_m: f64,
    criteria: &MatchCriteria,
) -> bool {
    if flight.frequency != atc.frequency || flight.frequency == criteria.guard_frequency_hz {
        return false;
    }

    let delta = (flight.timestamp - atc.timestamp).abs();
    if delta > criteria.match_window {
        return false;
    }

    let (Some((flight_lat, flight_lon)), Some((atc_lat, atc_lon))) =
        (flight.position(), atc.position())
    else {
        return false;
    };

    haversine_distance(flight_lat, flight_lon, atc_lat, atc_lon) <= range_m
}

/// Correlate a flight's transceiver samples against candidate ATC samples.
/// Pure in-memory pass; the SQL pre-filter has already bounded both inputs.
pub fn correlate(
    flight_samples: &[Transceiver],
    atc_samples: &[Transceiver],
    criteria: &MatchCriteria,
) -> InteractionReport {
    // Group ATC samples per controller so each contact accumulates
    // independently.
    let mut atc_by_callsign: BTreeMap<&str, Vec<&Transceiver>> = BTreeMap::new();
    for sample in atc_samples {
        atc_by_callsign
            .entry(sample.callsign.as_str())
            .or_default()
            .push(sample);
    }

    let mut report = InteractionReport::default();

    for (controller_callsign, candidates) in atc_by_callsign {
        let controller_type = ControllerType::from_callsign(controller_callsign);
        let range_m = controller_type.range_nm(&criteria.proximity) * METERS_PER_NM;

        let mut matched_times: Vec<DateTime<Utc>> = Vec::new();
        let mut seen: HashSet<DateTime<Utc>> = HashSet::new();

        for flight_sample in flight_samples {
            if seen.contains(&flight_sample.timestamp) {
                continue;
            }
            if candidates
                .iter()
                .any(|atc| samples_match(flight_sample, atc, range_m, criteria))
            {
                seen.insert(flight_sample.timestamp);
                matched_times.push(flight_sample.timestamp);
                report.matched_flight_times.insert(flight_sample.timestamp);
            }
        }

        if let (Some(&first), Some(&last)) = (matched_times.first(), matched_times.last()) {
            report.contacts.insert(
                controller_callsign.to_string(),
                ControllerContact {
                    controller_callsign: controller_callsign.to_string(),
                    matched_sample_times: matched_times,
                    first_match: first,
                    last_match: last,
                },
            );
        }
    }

    report
}

/// ATC interaction detector.
///
/// The expensive path is deliberately two-step: first pick the candidate
/// controller callsigns from the (small) controllers table, then load only
/// their transceiver samples for the window. Joining the full transceivers
/// table against the controllers table over a wide window blows up on
/// long-lived sessions; the result set here is identical.
pub struct AtcDetector {
    controllers_repo: ControllersRepository,
    transceivers_repo: TransceiversRepository,
    criteria: MatchCriteria,
}

impl AtcDetector {
    pub fn new(
        controllers_repo: ControllersRepository,
        transceivers_repo: TransceiversRepository,
        criteria: MatchCriteria,
    ) -> Self {
        Self {
            controllers_repo,
            transceivers_repo,
            criteria,
        }
    }

    /// Compute the contact report for one flight window.
    pub async fn detect(
        &self,
        flight_callsign: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<InteractionReport> {
        let candidates = self
            .controllers_repo
            .active_controlling_callsigns_since(window_start)
            .await?;

        if candidates.is_empty() {
            return Ok(InteractionReport::default());
        }

        let flight_samples = self
            .transceivers_repo
            .flight_samples_in_window(flight_callsign, window_start, window_end)
            .await?;
        if flight_samples.is_empty() {
            return Ok(InteractionReport::default());
        }

        let atc_samples = self
            .transceivers_repo
            .atc_samples_for_callsigns(&candidates, window_start, window_end)
            .await?;

        debug!(
            "Detecting interactions for {}: {} flight samples, {} candidate controllers, {} ATC samples",
            flight_callsign,
            flight_samples.len(),
            candidates.len(),
            atc_samples.len()
        );

        Ok(correlate(&flight_samples, &atc_samples, &self.criteria))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn criteria() -> MatchCriteria {
        MatchCriteria {
            proximity: ProximityConfig::default(),
            match_window: chrono::Duration::seconds(180),
            guard_frequency_hz: 122_800_000,
        }
    }

    fn sample(
        callsign: &str,
        entity_type: &str,
        frequency: i64,
        lat: f64,
        lon: f64,
        offset_secs: i64,
    ) -> Transceiver {
        let base = Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap();
        let t = base + chrono::Duration::seconds(offset_secs);
        Transceiver {
            id: Uuid::now_v7(),
            callsign: callsign.to_string(),
            transceiver_id: 0,
            frequency,
            latitude: Some(lat),
            longitude: Some(lon),
            height_msl_m: None,
            height_agl_m: None,
            entity_type: entity_type.to_string(),
            timestamp: t,
            created_at: t,
        }
    }

    #[test]
    fn test_controller_type_classification() {
        assert_eq!(ControllerType::from_callsign("SY_GND"), ControllerType::Ground);
        assert_eq!(ControllerType::from_callsign("SY_TWR"), ControllerType::Tower);
        assert_eq!(ControllerType::from_callsign("SY_APP"), ControllerType::Approach);
        assert_eq!(ControllerType::from_callsign("ML-ELW_CTR"), ControllerType::Center);
        assert_eq!(ControllerType::from_callsign("AU_FSS"), ControllerType::FlightService);
        assert_eq!(ControllerType::from_callsign("SY_ATIS"), ControllerType::Other);
        assert_eq!(ControllerType::from_callsign("NOSUFFIX"), ControllerType::Other);
    }

    #[test]
    fn test_range_mapping() {
        let proximity = ProximityConfig::default();
        assert_eq!(ControllerType::Ground.range_nm(&proximity), 15.0);
        assert_eq!(ControllerType::Tower.range_nm(&proximity), 15.0);
        assert_eq!(ControllerType::Approach.range_nm(&proximity), 60.0);
        assert_eq!(ControllerType::Center.range_nm(&proximity), 400.0);
        assert_eq!(ControllerType::FlightService.range_nm(&proximity), 1000.0);
        assert_eq!(ControllerType::Other.range_nm(&proximity), 30.0);
    }

    #[test]
    fn test_matching_contact() {
        // SY_APP at Sydney, flight ~40 NM away on the same frequency
        let flight = vec![
            sample("QFA123", "flight", 124_400_000, -33.30, 151.21, 0),
            sample("QFA123", "flight", 124_400_000, -33.35, 151.21, 60),
        ];
        let atc = vec![sample("SY_APP", "atc", 124_400_000, -33.95, 151.18, 30)];

        let report = correlate(&flight, &atc, &criteria());
        let contact = report.contacts.get("SY_APP").expect("contact expected");
        assert_eq!(contact.matched_samples(), 2);
        assert_eq!(report.matched_flight_times.len(), 2);
        assert!(contact.first_match <= contact.last_match);
    }

    #[test]
    fn test_frequency_mismatch_no_contact() {
        let flight = vec![sample("QFA123", "flight", 124_400_000, -33.30, 151.21, 0)];
        let atc = vec![sample("SY_APP", "atc", 125_000_000, -33.95, 151.18, 0)];
        assert!(correlate(&flight, &atc, &criteria()).contacts.is_empty());
    }

    #[test]
    fn test_guard_frequency_never_matches() {
        let flight = vec![sample("QFA123", "flight", 122_800_000, -33.95, 151.18, 0)];
        let atc = vec![sample("SY_APP", "atc", 122_800_000, -33.95, 151.18, 0)];
        assert!(correlate(&flight, &atc, &criteria()).contacts.is_empty());
    }

    #[test]
    fn test_time_window_boundary() {
        let flight = vec![sample("QFA123", "flight", 124_400_000, -33.95, 151.18, 0)];

        let atc_at_limit = vec![sample("SY_APP", "atc", 124_400_000, -33.95, 151.18, 180)];
        assert_eq!(correlate(&flight, &atc_at_limit, &criteria()).contacts.len(), 1);

        let atc_past_limit = vec![sample("SY_APP", "atc", 124_400_000, -33.95, 151.18, 181)];
        assert!(correlate(&flight, &atc_past_limit, &criteria()).contacts.is_empty());
    }

    #[test]
    fn test_exact_range_boundary() {
        // Flight due north of the controller; distance computed with the same
        // haversine the matcher uses, then the range is tuned around it.
        let atc_pos = (-33.95, 151.18);
        let flight_pos = (-33.00, 151.18);
        let distance_m = haversine_distance(flight_pos.0, flight_pos.1, atc_pos.0, atc_pos.1);

        let flight = vec![sample("QFA123", "flight", 124_400_000, flight_pos.0, flight_pos.1, 0)];
        let atc = vec![sample("SY_APP", "atc", 124_400_000, atc_pos.0, atc_pos.1, 0)];

        // Range exactly at the separation: match.
        let mut at_range = criteria();
        at_range.proximity.approach_nm = distance_m / METERS_PER_NM;
        assert_eq!(correlate(&flight, &atc, &at_range).contacts.len(), 1);

        // One meter short: no match.
        let mut short = criteria();
        short.proximity.approach_nm = (distance_m - 1.0) / METERS_PER_NM;
        assert!(correlate(&flight, &atc, &short).contacts.is_empty());
    }

    #[test]
    fn test_out_of_range_controller_type() {
        // 40 NM contact works for approach (60 NM) but not tower (15 NM)
        let flight = vec![sample("QFA123", "flight", 120_500_000, -33.30, 151.21, 0)];
        let atc = vec![sample("SY_TWR", "atc", 120_500_000, -33.95, 151.18, 0)];
        assert!(correlate(&flight, &atc, &criteria()).contacts.is_empty());
    }

    #[test]
    fn test_missing_position_never_matches() {
        let mut flight_sample = sample("QFA123", "flight", 124_400_000, -33.95, 151.18, 0);
        flight_sample.latitude = None;
        let atc = vec![sample("SY_APP", "atc", 124_400_000, -33.95, 151.18, 0)];
        assert!(correlate(&[flight_sample], &atc, &criteria()).contacts.is_empty());
    }
}
