//! Refresh scheduling.
//!
//! Two triggers feed the install queue: a cron sweep over every enabled
//! entry (one notifying batch per run) and the device-connect path (one
//! silent batch per device, with the device claimed until it completes).

mod config;
mod cron;
mod runner;
mod types;

pub use config::SchedulerConfig;
pub use cron::{next_fire, parse_cron};
pub use runner::{is_sweep_candidate, Scheduler};
pub use types::{ConnectedDevice, DeviceConnectedCallback, SchedulerError, SweepReport};
