//! Refresh orchestrator.
//!
//! Owns the install queue, its worker and the scheduler, and exposes the
//! lifecycle (`start`, `stop`, `reload`) and triggers used by the API:
//! - **Sweep**: cron or manual, one notifying batch
//! - **Device connect**: per-device silent batch after a settle delay
//! - **Single entry**: one silent batch, or an interactive install claimed
//!   outside the queue

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::RefreshOrchestrator;
pub use types::{OrchestratorError, OrchestratorStatus};
