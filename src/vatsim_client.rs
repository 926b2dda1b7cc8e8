use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AppConfig;

/// Upstream numeric fields are occasionally emitted as strings; coerce them
/// and null the field (with a warning) when coercion fails.
mod flexible {
    use super::*;

    fn coerce_f64(v: Option<Value>) -> Option<f64> {
        match v {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(x) => Some(x),
                Err(_) => {
                    warn!("Failed to coerce numeric field from string {:?}, nulling", s);
                    None
                }
            },
            Some(other) => {
                warn!("Unexpected JSON type for numeric field: {}, nulling", other);
                None
            }
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(coerce_f64(Option::<Value>::deserialize(d)?))
    }

    pub fn opt_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
        Ok(coerce_f64(Option::<Value>::deserialize(d)?).map(|x| x.round() as i32))
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(coerce_f64(Option::<Value>::deserialize(d)?).map(|x| x.round() as i64))
    }

    /// ATIS text arrives as either a string or an array of lines.
    pub fn opt_text_lines<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(Value::Array(lines)) => {
                let joined = lines
                    .into_iter()
                    .filter_map(|line| match line {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(if joined.is_empty() { None } else { Some(joined) })
            }
            Some(other) => {
                warn!("Unexpected JSON type for text field: {}, nulling", other);
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneralInfo {
    pub update_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightPlanEntry {
    pub flight_rules: Option<String>,
    pub aircraft: Option<String>,
    pub aircraft_faa: Option<String>,
    pub aircraft_short: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub alternate: Option<String>,
    pub cruise_tas: Option<String>,
    pub altitude: Option<String>,
    pub deptime: Option<String>,
    pub enroute_time: Option<String>,
    pub fuel_time: Option<String>,
    pub remarks: Option<String>,
    pub route: Option<String>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub revision_id: Option<i32>,
    pub assigned_transponder: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PilotEntry {
    pub callsign: String,
    pub cid: i32,
    pub name: Option<String>,
    pub server: Option<String>,
    #[serde(default, deserialize_with = "flexible::opt_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "flexible::opt_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub altitude: Option<i32>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub heading: Option<i32>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub groundspeed: Option<i32>,
    pub transponder: Option<String>,
    #[serde(default, deserialize_with = "flexible::opt_f64")]
    pub qnh_i_hg: Option<f64>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub qnh_mb: Option<i32>,
    pub flight_plan: Option<FlightPlanEntry>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerEntry {
    pub callsign: String,
    pub cid: i32,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub rating: Option<i32>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub facility: Option<i32>,
    #[serde(default, deserialize_with = "flexible::opt_i32")]
    pub visual_range: Option<i32>,
    #[serde(default, deserialize_with = "flexible::opt_text_lines")]
    pub text_atis: Option<String>,
    pub frequency: Option<String>,
    pub server: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransceiverEntry {
    pub id: i32,
    #[serde(default, deserialize_with = "flexible::opt_i64")]
    pub frequency: Option<i64>,
    #[serde(rename = "latLat", default, deserialize_with = "flexible::opt_f64")]
    pub lat_lat: Option<f64>,
    #[serde(rename = "latLon", default, deserialize_with = "flexible::opt_f64")]
    pub lat_lon: Option<f64>,
    #[serde(rename = "heightMslM", default, deserialize_with = "flexible::opt_f64")]
    pub height_msl_m: Option<f64>,
    #[serde(rename = "heightAglM", default, deserialize_with = "flexible::opt_f64")]
    pub height_agl_m: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransceiverGroup {
    pub callsign: String,
    #[serde(default)]
    pub transceivers: Vec<TransceiverEntry>,
}

/// One parsed upstream snapshot. The three arrays are required; a document
/// missing any of them fails to parse and the tick is treated as a failed
/// fetch. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct VatsimSnapshot {
    #[serde(default)]
    pub general: GeneralInfo,
    pub pilots: Vec<PilotEntry>,
    pub controllers: Vec<ControllerEntry>,
    pub transceivers: Vec<TransceiverGroup>,
}

impl VatsimSnapshot {
    /// The timestamp all samples from this snapshot are stamped with.
    pub fn sample_time(&self) -> DateTime<Utc> {
        self.general.update_timestamp.unwrap_or_else(Utc::now)
    }
}

/// Exponential backoff delay for a 1-based attempt number: 1s, 2s, 4s ...
/// capped at 30s.
fn backoff_delay(attempt: u32) -> std::time::Duration {
    let secs = 1u64 << attempt.saturating_sub(1).min(5);
    std::time::Duration::from_secs(secs.min(30))
}

pub struct VatsimClient {
    client: reqwest::Client,
    url: String,
    retry_limit: u32,
}

impl VatsimClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.vatsim_data_url.clone(),
            retry_limit: config.fetch_retry_limit.max(1),
        })
    }

    /// Fetch and parse one snapshot.
    ///
    /// Timeouts, connection errors and 5xx responses are retried with
    /// exponential backoff up to the configured attempt limit. Other HTTP
    /// statuses and unparseable documents fail immediately; the caller skips
    /// the tick.
    pub async fn fetch_snapshot(&self) -> Result<VatsimSnapshot> {
        let mut last_error = None;

        for attempt in 1..=self.retry_limit {
            match self.client.get(&self.url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .text()
                            .await
                            .context("Failed to read snapshot body")?;
                        let snapshot: VatsimSnapshot = serde_json::from_str(&body)
                            .context("Snapshot document failed strict parse")?;
                        debug!(
                            "Fetched snapshot: {} pilots, {} controllers, {} transceiver groups",
                            snapshot.pilots.len(),
                            snapshot.controllers.len(),
                            snapshot.transceivers.len()
                        );
                        metrics::counter!("vatsim.fetch.success").increment(1);
                        return Ok(snapshot);
                    } else if status.is_server_error() {
                        last_error =
                            Some(anyhow::anyhow!("HTTP error {} from {}", status, self.url));
                        metrics::counter!("vatsim.fetch.server_error").increment(1);
                        if attempt < self.retry_limit {
                            warn!(
                                "HTTP error {} fetching snapshot, retrying (attempt {}/{})",
                                status, attempt, self.retry_limit
                            );
                            tokio::time::sleep(backoff_delay(attempt)).await;
                        }
                    } else {
                        anyhow::bail!("Unexpected HTTP status {} from {}", status, self.url);
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Request failed for {}: {}", self.url, e));
                    metrics::counter!("vatsim.fetch.request_error").increment(1);
                    if attempt < self.retry_limit {
                        warn!(
                            "Snapshot request failed, retrying (attempt {}/{}): {}",
                            attempt, self.retry_limit, e
                        );
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }

        metrics::counter!("vatsim.fetch.exhausted").increment(1);
        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("All snapshot fetch attempts failed for {}", self.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "general": { "version": 3, "update_timestamp": "2025-06-10T02:00:00Z" },
        "pilots": [
            {
                "callsign": "QFA123",
                "cid": 1234567,
                "name": "Test Pilot",
                "server": "AUSTRALIA",
                "latitude": -33.87,
                "longitude": "151.21",
                "altitude": "37000",
                "heading": 120,
                "groundspeed": 450,
                "transponder": "3421",
                "qnh_i_hg": 29.92,
                "qnh_mb": 1013,
                "flight_plan": {
                    "flight_rules": "I",
                    "aircraft": "B738/M-SDE3FGHIM2RWXY/LB1",
                    "aircraft_faa": "B738",
                    "aircraft_short": "B738",
                    "departure": "YSSY",
                    "arrival": "YMML",
                    "alternate": "YMAV",
                    "cruise_tas": "450",
                    "altitude": "37000",
                    "deptime": "0100",
                    "enroute_time": "0130",
                    "fuel_time": "0300",
                    "remarks": "/V/",
                    "route": "DCT WOL H65 RAZZI Q158 LIZZI",
                    "revision_id": 2,
                    "assigned_transponder": "3421"
                },
                "logon_time": "2025-06-10T01:00:00Z",
                "last_updated": "2025-06-10T02:00:00Z"
            }
        ],
        "controllers": [
            {
                "callsign": "SY_APP",
                "cid": 7654321,
                "name": "Test Controller",
                "rating": 5,
                "facility": 5,
                "visual_range": 150,
                "text_atis": ["Sydney Approach", "Expect vectors"],
                "frequency": "124.400",
                "server": "AUSTRALIA",
                "logon_time": "2025-06-10T00:30:00Z",
                "last_updated": "2025-06-10T02:00:00Z"
            }
        ],
        "transceivers": [
            {
                "callsign": "QFA123",
                "transceivers": [
                    { "id": 0, "frequency": 124400000, "latLat": -33.9, "latLon": 151.1,
                      "heightMslM": 11000.0, "heightAglM": 10900.0 }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_snapshot() {
        let snapshot: VatsimSnapshot = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(snapshot.pilots.len(), 1);
        assert_eq!(snapshot.controllers.len(), 1);
        assert_eq!(snapshot.transceivers.len(), 1);
        assert_eq!(
            snapshot.sample_time(),
            "2025-06-10T02:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        let pilot = &snapshot.pilots[0];
        assert_eq!(pilot.callsign, "QFA123");
        // String-typed numerics are coerced
        assert_eq!(pilot.longitude, Some(151.21));
        assert_eq!(pilot.altitude, Some(37000));
        let plan = pilot.flight_plan.as_ref().unwrap();
        assert_eq!(plan.departure.as_deref(), Some("YSSY"));
        assert_eq!(plan.revision_id, Some(2));

        let controller = &snapshot.controllers[0];
        assert_eq!(
            controller.text_atis.as_deref(),
            Some("Sydney Approach\nExpect vectors")
        );

        let group = &snapshot.transceivers[0];
        assert_eq!(group.transceivers[0].frequency, Some(124_400_000));
    }

    #[test]
    fn test_missing_required_array_is_parse_error() {
        let doc = r#"{ "pilots": [], "controllers": [] }"#;
        assert!(serde_json::from_str::<VatsimSnapshot>(doc).is_err());
    }

    #[test]
    fn test_uncoercible_string_nulls_field() {
        let doc = r#"{
            "callsign": "QFA1",
            "cid": 1,
            "latitude": "not-a-number",
            "logon_time": "2025-06-10T01:00:00Z",
            "last_updated": "2025-06-10T01:01:00Z"
        }"#;
        let pilot: PilotEntry = serde_json::from_str(doc).unwrap();
        assert_eq!(pilot.latitude, None);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let doc = r#"{
            "callsign": "ML_CTR",
            "cid": 2,
            "rating": 7,
            "facility": 6,
            "something_new": { "nested": true },
            "logon_time": "2025-06-10T01:00:00Z",
            "last_updated": "2025-06-10T01:01:00Z"
        }"#;
        let controller: ControllerEntry = serde_json::from_str(doc).unwrap();
        assert_eq!(controller.facility, Some(6));
    }

    #[test]
    fn test_backoff_delay_caps_at_thirty_seconds() {
        assert_eq!(backoff_delay(1).as_secs(), 1);
        assert_eq!(backoff_delay(2).as_secs(), 2);
        assert_eq!(backoff_delay(5).as_secs(), 16);
        assert_eq!(backoff_delay(6).as_secs(), 30);
        assert_eq!(backoff_delay(20).as_secs(), 30);
    }
}
