//! foglet-broker — the in-process message broker.
//!
//! Hosts one queue per consumer, addressed by workload uuid. Producers
//! enqueue onto any consumer queue; consumers drain non-blockingly and
//! can attach a real-time listener that is fed on every arrival.
//!
//! The routing core owns endpoint lifecycles: it creates producers and
//! consumers during (re)initialization, checks their closed flags from
//! the liveness watchdog, and removes them on route changes.

pub mod error;
mod server;

pub use error::{BrokerError, BrokerResult};
pub use server::{BrokerConsumer, BrokerProducer, BrokerServer, BrokerStats};
