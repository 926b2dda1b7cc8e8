use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::boundary::FirBoundary;
use crate::config::AppConfig;
use crate::sector_index::SectorIndex;

/// Static reference data, loaded once at startup and held immutably for the
/// life of the process. Any parse failure is fatal: the process refuses to
/// start rather than run with partial reference data. A reload requires a
/// restart.
pub struct ReferenceData {
    pub fir: FirBoundary,
    pub sectors: Option<SectorIndex>,
    /// Exact-match controller callsign allow-list; `None` disables the
    /// callsign filter entirely.
    pub controller_allowlist: Option<HashSet<String>>,
    /// ICAO prefix -> state name, used only by reporting.
    pub icao_states: HashMap<String, String>,
}

fn load_allowlist(path: &Path) -> Result<HashSet<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read controller list {}", path.display()))?;
    let callsigns: HashSet<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_uppercase())
        .collect();
    if callsigns.is_empty() {
        anyhow::bail!("controller list {} contains no callsigns", path.display());
    }
    Ok(callsigns)
}

fn load_icao_states(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to read ICAO state table {}", path.display()))?;

    let mut states = HashMap::new();
    for record in reader.records() {
        let record = record.context("malformed row in ICAO state table")?;
        let (Some(icao), Some(state)) = (record.get(0), record.get(1)) else {
            anyhow::bail!("ICAO state table row does not have two columns: {:?}", record);
        };
        let icao = icao.trim().to_uppercase();
        if icao == "ICAO" {
            // Tolerate a header line
            continue;
        }
        states.insert(icao, state.trim().to_string());
    }
    Ok(states)
}

impl ReferenceData {
    pub fn load(config: &AppConfig) -> Result<Self> {
        let fir = FirBoundary::from_file(&config.fir_polygon_path)?;
        info!(
            "Loaded FIR boundary from {}",
            config.fir_polygon_path.display()
        );

        let sectors = match (config.sector_tracking_enabled, &config.sector_data_path) {
            (true, Some(path)) => {
                let index = SectorIndex::from_file(path)?;
                info!("Loaded {} sectors from {}", index.len(), path.display());
                Some(index)
            }
            _ => {
                info!("Sector tracking disabled; no sector file loaded");
                None
            }
        };

        let controller_allowlist = match &config.controller_list_path {
            Some(path) => {
                let list = load_allowlist(path)?;
                info!(
                    "Loaded {} controller callsigns from {}",
                    list.len(),
                    path.display()
                );
                Some(list)
            }
            None => None,
        };

        let icao_states = match &config.icao_states_path {
            Some(path) => {
                let states = load_icao_states(path)?;
                info!("Loaded {} ICAO state mappings from {}", states.len(), path.display());
                states
            }
            None => HashMap::new(),
        };

        Ok(Self {
            fir,
            sectors,
            controller_allowlist,
            icao_states,
        })
    }

    /// Whether a controller callsign passes the allow-list filter.
    pub fn controller_allowed(&self, callsign: &str) -> bool {
        match &self.controller_allowlist {
            Some(list) => list.contains(&callsign.to_uppercase()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_allowlist() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Australian positions").unwrap();
        writeln!(file, "SY_APP").unwrap();
        writeln!(file, "ml_ctr").unwrap();
        writeln!(file).unwrap();

        let list = load_allowlist(file.path()).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains("SY_APP"));
        assert!(list.contains("ML_CTR"));
    }

    #[test]
    fn test_empty_allowlist_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# only comments").unwrap();
        assert!(load_allowlist(file.path()).is_err());
    }

    #[test]
    fn test_load_icao_states_with_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "icao,state").unwrap();
        writeln!(file, "YSSY,New South Wales").unwrap();
        writeln!(file, "YMML,Victoria").unwrap();

        let states = load_icao_states(file.path()).unwrap();
        assert_eq!(states.get("YSSY").map(String::as_str), Some("New South Wales"));
        assert_eq!(states.len(), 2);
    }
}
