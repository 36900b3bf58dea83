// ABOUTME: Opens the target and station connections a sweep needs
// ABOUTME: PgConnector wires tokio-postgres clients into the source, target and store traits

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::postgres::connect_with_retry;
use crate::registry::StationConfig;
use crate::source::{PgSource, SourceDatabase};
use crate::store::{FullSyncStateStore, PgFullSyncStateStore, PgVersionStore, VersionStore};
use crate::target::{PgTarget, TargetDatabase};
use crate::utils::sanitize_url;

/// Everything that lives on the shared target database.
#[derive(Clone)]
pub struct TargetHandles {
    pub target: Arc<dyn TargetDatabase>,
    pub versions: Arc<dyn VersionStore>,
    pub states: Arc<dyn FullSyncStateStore>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_target(&self) -> Result<TargetHandles>;

    async fn connect_source(&self, station: &StationConfig) -> Result<Arc<dyn SourceDatabase>>;
}

pub struct PgConnector {
    target_url: String,
    retention_days: u32,
}

impl PgConnector {
    pub fn new(target_url: impl Into<String>, retention_days: u32) -> Self {
        Self {
            target_url: target_url.into(),
            retention_days,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect_target(&self) -> Result<TargetHandles> {
        let client = Arc::new(
            connect_with_retry(&self.target_url)
                .await
                .with_context(|| {
                    format!(
                        "Failed to connect to target database {}",
                        sanitize_url(&self.target_url)
                    )
                })?,
        );

        let versions = PgVersionStore::new(client.clone(), self.retention_days);
        versions.ensure_table().await?;
        let states = PgFullSyncStateStore::new(client.clone());
        states.ensure_table().await?;

        Ok(TargetHandles {
            target: Arc::new(PgTarget::new(client)),
            versions: Arc::new(versions),
            states: Arc::new(states),
        })
    }

    async fn connect_source(&self, station: &StationConfig) -> Result<Arc<dyn SourceDatabase>> {
        let client = connect_with_retry(&station.source_url)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to station {} at {}",
                    station.station_id,
                    sanitize_url(&station.source_url)
                )
            })?;
        Ok(Arc::new(PgSource::new(client)))
    }
}
