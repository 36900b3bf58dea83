// ABOUTME: Library root for station-replicator
// ABOUTME: Replicates station PostgreSQL tables into one shared target tagged by station

pub mod config;
pub mod connector;
pub mod postgres;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod source;
pub mod sql;
pub mod store;
pub mod sync;
pub mod target;
pub mod utils;
pub mod value;

pub use config::ReplicatorConfig;
pub use connector::{Connector, PgConnector, TargetHandles};
pub use registry::{StaticRegistry, StationConfig, StationRegistry, TableSyncConfig};
pub use scheduler::{ScheduleIntervals, Scheduler, SweepStats};
pub use schema::{ColumnDef, TableSchema, TargetType};
pub use source::{ChangeRecord, SourceDatabase};
pub use sync::{SyncMode, SyncOrchestrator, SyncOutcome, SyncSettings};
pub use target::TargetDatabase;
pub use value::{Row, SqlValue};
