use crate::flights::Flight;

/// Flight-plan completeness filter.
///
/// A flight is admitted only when it has a departure, an arrival, IFR or VFR
/// flight rules and an aircraft code. When disabled by configuration every
/// flight passes.
#[derive(Debug, Clone, Copy)]
pub struct FlightPlanValidator {
    enabled: bool,
}

impl FlightPlanValidator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_valid(&self, flight: &Flight) -> bool {
        if !self.enabled {
            return true;
        }

        let has = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());

        has(&flight.departure)
            && has(&flight.arrival)
            && matches!(flight.flight_rules.as_deref(), Some("I") | Some("V"))
            && has(&flight.aircraft_faa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn complete_flight() -> Flight {
        let now = Utc::now();
        Flight {
            id: Uuid::now_v7(),
            callsign: "QFA123".to_string(),
            cid: 1234567,
            name: None,
            server: None,
            latitude: Some(-33.87),
            longitude: Some(151.21),
            altitude: Some(37000),
            heading: None,
            groundspeed: Some(450),
            transponder: None,
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
            planned_altitude: None,
            deptime: None,
            enroute_time: None,
            fuel_time: None,
            remarks: None,
            route: None,
            revision_id: None,
            assigned_transponder: None,
            logon_time: now,
            last_updated: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_complete_plan_is_valid() {
        let validator = FlightPlanValidator::new(true);
        assert!(validator.is_valid(&complete_flight()));
    }

    #[test]
    fn test_vfr_is_valid() {
        let validator = FlightPlanValidator::new(true);
        let mut flight = complete_flight();
        flight.flight_rules = Some("V".to_string());
        assert!(validator.is_valid(&flight));
    }

    #[test]
    fn test_unknown_flight_rules_rejected() {
        let validator = FlightPlanValidator::new(true);
        let mut flight = complete_flight();
        flight.flight_rules = Some("X".to_string());
        assert!(!validator.is_valid(&flight));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let validator = FlightPlanValidator::new(true);

        let mut flight = complete_flight();
        flight.departure = None;
        assert!(!validator.is_valid(&flight));

        let mut flight = complete_flight();
        flight.arrival = Some("  ".to_string());
        assert!(!validator.is_valid(&flight));

        let mut flight = complete_flight();
        flight.aircraft_faa = None;
        assert!(!validator.is_valid(&flight));
    }

    #[test]
    fn test_disabled_admits_everything() {
        let validator = FlightPlanValidator::new(false);
        let mut flight = complete_flight();
        flight.departure = None;
        flight.flight_rules = None;
        assert!(validator.is_valid(&flight));
    }
}
