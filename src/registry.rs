// ABOUTME: Stations and their selected tables, as read by the scheduler
// ABOUTME: Static registry built from the config file plus the station-count entitlement gate

use serde::{Deserialize, Serialize};

/// Maximum length of a station id (the target tag column is VARCHAR(50)).
pub const MAX_STATION_ID_LEN: usize = 50;

/// One station: a remote source database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    pub station_id: String,
    #[serde(default)]
    pub name: String,
    pub source_url: String,
    /// Tables selected for replication.
    #[serde(default)]
    pub tables: Vec<String>,
}

/// A (station, table) pair selected for replication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSyncConfig {
    pub station_id: String,
    pub table_name: String,
}

/// Read-only view of stations and table selections.
pub trait StationRegistry: Send + Sync {
    fn stations(&self) -> Vec<StationConfig>;

    fn station(&self, station_id: &str) -> Option<StationConfig> {
        self.stations()
            .into_iter()
            .find(|s| s.station_id == station_id)
    }

    fn tables(&self, station_id: &str) -> Vec<TableSyncConfig>;
}

/// Registry over a fixed station list.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    stations: Vec<StationConfig>,
}

impl StaticRegistry {
    pub fn new(stations: Vec<StationConfig>) -> Self {
        Self { stations }
    }
}

impl StationRegistry for StaticRegistry {
    fn stations(&self) -> Vec<StationConfig> {
        self.stations.clone()
    }

    fn tables(&self, station_id: &str) -> Vec<TableSyncConfig> {
        self.stations
            .iter()
            .filter(|s| s.station_id == station_id)
            .flat_map(|s| {
                s.tables.iter().map(|t| TableSyncConfig {
                    station_id: s.station_id.clone(),
                    table_name: t.clone(),
                })
            })
            .collect()
    }
}

/// Keep only the first `max_stations` stations when a limit is set.
pub fn apply_entitlement(
    mut stations: Vec<StationConfig>,
    max_stations: Option<usize>,
) -> Vec<StationConfig> {
    if let Some(max) = max_stations {
        if stations.len() > max {
            tracing::warn!(
                "Station limit is {}, skipping {} of {} configured stations",
                max,
                stations.len() - max,
                stations.len()
            );
            stations.truncate(max);
        }
    }
    stations
}
