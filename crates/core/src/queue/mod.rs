//! The install queue: dedup by entry, bounded FIFO, one worker.
//!
//! - Submission claims each entry; duplicates are skipped, overflow dropped
//! - The worker warms up once, then runs one session at a time with a
//!   cooldown between attempts
//! - Stopping discards queued requests without notifying

mod accounts;
mod config;
mod in_flight;
mod types;
mod worker;

pub use accounts::InvalidAccountSet;
pub use config::QueueConfig;
pub use in_flight::{InFlightGuard, InFlightSet};
pub use types::{
    BatchId, DeviceClaim, DroppedRequest, EntryClaim, InstallingEntry, QueueError, QueueStatus,
    RefreshCallback, RefreshEvent, RefreshRequest, SubmitReport,
};
pub use worker::InstallQueue;
