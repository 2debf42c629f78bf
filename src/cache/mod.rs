//! Query cache: entries, the registry that owns them, expiry timers and
//! snapshot persistence.
//!
//! - One [`QueryEntry`] per canonical request URL
//! - Freshness judged against the entry's retention window
//! - Eviction driven by a [`Scheduler`] once nobody observes an entry
//! - Snapshots (`extract`/`hydrate`) optionally persisted through [`SnapshotStorage`]

mod entry;
mod layer;
mod storage;
mod timer;
mod traits;

pub use entry::{QueryEntry, SharedFetch};
pub use layer::{has_errors, QueryCache};
pub use storage::{key_hash, NoopStorage, SqliteStorage};
pub use timer::{ManualScheduler, Scheduler, Task, TimerHandle, TokioScheduler};
pub use traits::{Snapshot, SnapshotStorage};
