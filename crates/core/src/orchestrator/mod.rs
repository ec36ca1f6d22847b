//! Pipeline runner: worker pools, lease keeping and crash recovery.
//!
//! - **Workers**: per queue, `concurrency` tasks each looping claim →
//!   execute → complete/fail → chain.
//! - **Reaper**: periodically recovers jobs whose worker stopped
//!   heartbeating and re-chains completions that never got a next stage.
//! - **Maintenance**: purges old terminal jobs when retention is set.

mod reaper;
mod runner;
mod types;
mod worker;

pub use runner::PipelineRunner;
pub use types::{PoolStatus, ReaperReport, RunnerStatus};
