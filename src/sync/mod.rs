//! Three-way sync between a local tree and an object storage prefix.
//!
//! Reconciliation compares each path's local state, remote state and the
//! snapshot recorded after the last successful action, then the engine
//! executes the resulting actions one at a time.

pub mod action;
pub mod conflict;
pub mod engine;
pub mod exclude;
pub mod executor;
pub mod reconcile;
pub mod snapshot;
pub mod throttle;

pub use action::{ConflictResolution, SyncAction, SyncActionKind, SyncActionRequest};
pub use conflict::{ConflictResolver, ConflictStrategy, PolicyResolver};
pub use engine::{SyncEngine, SyncFailure, SyncProgress, SyncReport, SyncStats};
pub use exclude::ExcludePatterns;
pub use executor::{ActionExecutor, ExecutedAction};
pub use reconcile::{classify, reconcile};
pub use snapshot::{JsonSnapshotStore, MemorySnapshotStore, SnapshotEntry, SnapshotStore};
pub use throttle::{BandwidthLimit, BandwidthLimiter, ThrottledReader, TransferStats};
