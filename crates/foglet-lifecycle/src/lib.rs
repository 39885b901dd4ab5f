//! foglet-lifecycle — the workload lifecycle engine.
//!
//! Turns declarative desired-state transitions (ADD / UPDATE / REMOVE /
//! REMOVE_WITH_CLEAN_UP / STOP) into idempotent operations against the
//! container runtime, with registry fall-back to the local image cache
//! and per-workload state reporting.
//!
//! Commands for one workload uuid run in submission order; commands for
//! distinct uuids run concurrently. All removals serialize under one
//! process-wide delete mutex so two removal attempts for the same uuid
//! cannot race.

mod engine;
mod error;

pub use engine::LifecycleEngine;
pub use error::{LifecycleError, LifecycleResult};
