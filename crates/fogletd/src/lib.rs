//! fogletd — the foglet agent daemon.
//!
//! Wires the subsystems together into a top-level [`agent::Agent`]
//! context (explicitly constructed values, no process globals), runs
//! them under the [`supervisor::Supervisor`], and serves the local API.

pub mod agent;
pub mod dispatcher;
pub mod logging;
pub mod supervisor;
