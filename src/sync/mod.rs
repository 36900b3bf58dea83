// ABOUTME: Replication engine: full-copy pager, change fetcher, row applier and orchestrator
// ABOUTME: Components borrow trait objects so one table sync needs no shared state

pub mod applier;
pub mod change;
pub mod consistency;
pub mod fetcher;
pub mod orchestrator;
pub mod pager;

pub use applier::{ApplyStats, RowApplier};
pub use change::{ChangeBatch, ChangeKind, ChangeOperation};
pub use consistency::{Consistency, ConsistencyChecker};
pub use fetcher::{ChangeFetcher, ChangeSet};
pub use orchestrator::{SyncMode, SyncOrchestrator, SyncOutcome, SyncSettings};
pub use pager::{FullSyncPager, PagerOutcome};
