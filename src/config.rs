// ABOUTME: TOML configuration for the replicator: target, timings, stations and tables
// ABOUTME: Defaults are applied on load and the whole file is validated before use

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::{StationConfig, MAX_STATION_ID_LEN};
use crate::store::DEFAULT_VERSION_RETENTION_DAYS;
use crate::sync::orchestrator::{DEFAULT_PAGE_DELAY, DEFAULT_PAGE_SIZE};
use crate::sync::SyncSettings;
use crate::utils::validate_identifier;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "station-replicator.toml";

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_page_delay_secs() -> u64 {
    DEFAULT_PAGE_DELAY.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_revalidate_interval_secs() -> u64 {
    86400
}

fn default_version_retention_days() -> u32 {
    DEFAULT_VERSION_RETENTION_DAYS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    pub target_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_page_delay_secs")]
    pub page_delay_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub full_sync_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub incremental_interval_secs: u64,
    /// Interval of the job that forces every table back to a full re-scan; 0 disables it.
    #[serde(default = "default_revalidate_interval_secs")]
    pub revalidate_interval_secs: u64,
    #[serde(default = "default_version_retention_days")]
    pub version_retention_days: u32,
    /// Only the first N stations are processed when set.
    #[serde(default)]
    pub max_stations: Option<usize>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

impl ReplicatorConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: ReplicatorConfig =
            toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_url.trim().is_empty() {
            bail!("target_url must not be empty");
        }
        if self.page_size == 0 {
            bail!("page_size must be greater than 0");
        }
        if self.full_sync_interval_secs == 0 || self.incremental_interval_secs == 0 {
            bail!("sweep intervals must be greater than 0 seconds");
        }

        let mut seen = HashSet::new();
        for station in &self.stations {
            let id = station.station_id.trim();
            if id.is_empty() {
                bail!("station_id must not be empty");
            }
            if id.len() > MAX_STATION_ID_LEN {
                bail!(
                    "station_id '{}' is longer than {} characters",
                    id,
                    MAX_STATION_ID_LEN
                );
            }
            if !seen.insert(id.to_string()) {
                bail!("Duplicate station_id '{}'", id);
            }
            if station.source_url.trim().is_empty() {
                bail!("Station '{}' has no source_url", id);
            }
            for table in &station.tables {
                validate_identifier(table)
                    .with_context(|| format!("Station '{}' has an invalid table name", id))?;
            }
        }
        Ok(())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            page_size: self.page_size,
            page_delay: Duration::from_secs(self.page_delay_secs),
        }
    }

    pub fn station(&self, station_id: &str) -> Option<&StationConfig> {
        self.stations.iter().find(|s| s.station_id == station_id)
    }
}
