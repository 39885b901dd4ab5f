//! foglet-core — shared types for the foglet agent.
//!
//! Holds the domain model used across the agent crates: workloads and
//! their reported states, registries, routes and receivers, container
//! tasks, the message envelope, the monotonic message ID generator, and
//! the agent configuration file.

pub mod config;
pub mod idgen;
pub mod message;
pub mod types;

pub use config::AgentConfig;
pub use idgen::MessageIdGenerator;
pub use message::Message;
pub use types::*;
