use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Default VATSIM v3 combined snapshot endpoint.
pub const DEFAULT_VATSIM_DATA_URL: &str = "https://data.vatsim.net/v3/vatsim-data.json";

/// Per-controller-type proximity ranges in nautical miles.
///
/// A flight transceiver sample only counts as "in contact" with a controller
/// when it is within the range for that controller's position type.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityConfig {
    pub ground_nm: f64,
    pub tower_nm: f64,
    pub approach_nm: f64,
    pub center_nm: f64,
    pub fss_nm: f64,
    pub default_nm: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            ground_nm: 15.0,
            tower_nm: 15.0,
            approach_nm: 60.0,
            center_nm: 400.0,
            fss_nm: 1000.0,
            default_nm: 30.0,
        }
    }
}

/// Service configuration, loaded once from the environment at startup.
///
/// Durations are stored in the unit their variable is named in (seconds,
/// minutes, hours); the accessor methods build `std::time::Duration` or
/// `chrono::Duration` values for call sites.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,
    pub database_pool_size: u32,
    pub database_max_overflow: u32,
    pub statement_timeout_secs: u64,
    pub db_retry_attempts: u32,

    // Upstream
    pub vatsim_data_url: String,
    pub polling_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub fetch_retry_limit: u32,

    // Reference data
    pub fir_polygon_path: PathBuf,
    pub sector_data_path: Option<PathBuf>,
    pub controller_list_path: Option<PathBuf>,
    pub icao_states_path: Option<PathBuf>,

    // Filters
    pub enable_boundary_filter: bool,
    pub flight_plan_validation_enabled: bool,
    pub sector_tracking_enabled: bool,

    // Lifecycle timing
    pub cleanup_flight_timeout_secs: i64,
    pub flight_completion_hours: i64,
    pub flight_retention_hours: i64,
    pub flight_summary_interval_mins: u64,
    pub controller_completion_minutes: i64,
    pub controller_summary_interval_mins: u64,
    pub controller_merge_window_secs: i64,

    // ATC interaction matching
    pub proximity: ProximityConfig,
    pub match_time_window_secs: i64,
    pub airborne_ground_speed_kt: f64,
    pub guard_frequency_hz: i64,

    // Process
    pub shutdown_grace_secs: u64,
    pub web_interface: String,
    pub web_port: u16,
    pub metrics_port: Option<u16>,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "true" || v == "1" || v == "yes"
        })
        .unwrap_or(default)
}

fn env_opt_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// `DATABASE_URL` and `FIR_POLYGON_PATH` are required. `SECTOR_DATA_PATH`
    /// is required when `SECTOR_TRACKING_ENABLED` is on. Everything else has
    /// a documented default.
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL must be set in the environment")?;

        let fir_polygon_path = env::var("FIR_POLYGON_PATH")
            .context("FIR_POLYGON_PATH must be set in the environment")?;

        let sector_tracking_enabled = env_bool("SECTOR_TRACKING_ENABLED", true);
        let sector_data_path = env_opt_path("SECTOR_DATA_PATH");
        if sector_tracking_enabled && sector_data_path.is_none() {
            anyhow::bail!("SECTOR_DATA_PATH must be set when SECTOR_TRACKING_ENABLED is on");
        }

        let proximity = ProximityConfig {
            ground_nm: env_parse("CONTROLLER_PROXIMITY_GROUND_NM", 15.0)?,
            tower_nm: env_parse("CONTROLLER_PROXIMITY_TOWER_NM", 15.0)?,
            approach_nm: env_parse("CONTROLLER_PROXIMITY_APPROACH_NM", 60.0)?,
            center_nm: env_parse("CONTROLLER_PROXIMITY_CENTER_NM", 400.0)?,
            fss_nm: env_parse("CONTROLLER_PROXIMITY_FSS_NM", 1000.0)?,
            default_nm: env_parse("CONTROLLER_PROXIMITY_DEFAULT_NM", 30.0)?,
        };

        Ok(Self {
            database_url,
            database_pool_size: env_parse("DATABASE_POOL_SIZE", 20)?,
            database_max_overflow: env_parse("DATABASE_MAX_OVERFLOW", 40)?,
            statement_timeout_secs: env_parse("DATABASE_STATEMENT_TIMEOUT_SEC", 60)?,
            db_retry_attempts: env_parse("DATABASE_RETRY_ATTEMPTS", 3)?,

            vatsim_data_url: env::var("VATSIM_DATA_URL")
                .unwrap_or_else(|_| DEFAULT_VATSIM_DATA_URL.to_string()),
            polling_interval_secs: env_parse("VATSIM_POLLING_INTERVAL_SEC", 60)?,
            request_timeout_secs: env_parse("VATSIM_REQUEST_TIMEOUT_SEC", 60)?,
            fetch_retry_limit: env_parse("VATSIM_FETCH_RETRY_LIMIT", 20)?,

            fir_polygon_path: PathBuf::from(fir_polygon_path),
            sector_data_path,
            controller_list_path: env_opt_path("CONTROLLER_LIST_PATH"),
            icao_states_path: env_opt_path("ICAO_STATES_PATH"),

            enable_boundary_filter: env_bool("ENABLE_BOUNDARY_FILTER", true),
            flight_plan_validation_enabled: env_bool("FLIGHT_PLAN_VALIDATION_ENABLED", true),
            sector_tracking_enabled,

            cleanup_flight_timeout_secs: env_parse("CLEANUP_FLIGHT_TIMEOUT_SEC", 300)?,
            flight_completion_hours: env_parse("FLIGHT_COMPLETION_HOURS", 14)?,
            flight_retention_hours: env_parse("FLIGHT_RETENTION_HOURS", 168)?,
            flight_summary_interval_mins: env_parse("FLIGHT_SUMMARY_INTERVAL_MIN", 60)?,
            controller_completion_minutes: env_parse("CONTROLLER_COMPLETION_MINUTES", 30)?,
            controller_summary_interval_mins: env_parse("CONTROLLER_SUMMARY_INTERVAL_MIN", 60)?,
            controller_merge_window_secs: env_parse("CONTROLLER_MERGE_WINDOW_SEC", 300)?,

            proximity,
            match_time_window_secs: env_parse("MATCH_TIME_WINDOW_SEC", 180)?,
            airborne_ground_speed_kt: env_parse("AIRBORNE_GROUND_SPEED_KT", 50.0)?,
            guard_frequency_hz: env_parse("GUARD_FREQUENCY_HZ", 122_800_000)?,

            shutdown_grace_secs: env_parse("SHUTDOWN_GRACE_SEC", 60)?,
            web_interface: env::var("WEB_INTERFACE").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env_parse("WEB_PORT", 8080)?,
            metrics_port: match env::var("METRICS_PORT") {
                Ok(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                    anyhow::anyhow!("invalid value for METRICS_PORT: {:?}", raw)
                })?),
                Err(_) => None,
            },
        })
    }

    /// Pool size handed to r2d2: base pool plus overflow headroom.
    pub fn pool_max_size(&self) -> u32 {
        self.database_pool_size + self.database_max_overflow
    }

    pub fn polling_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.polling_interval_secs)
    }

    pub fn flight_summary_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.flight_summary_interval_mins * 60)
    }

    pub fn controller_summary_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.controller_summary_interval_mins * 60)
    }

    pub fn cleanup_flight_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cleanup_flight_timeout_secs)
    }

    pub fn flight_completion_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.flight_completion_hours)
    }

    pub fn controller_completion_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.controller_completion_minutes)
    }

    pub fn controller_merge_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.controller_merge_window_secs)
    }

    pub fn match_time_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.match_time_window_secs)
    }
}
