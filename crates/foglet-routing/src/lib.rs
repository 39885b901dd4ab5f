//! foglet-routing — the message routing core.
//!
//! Owns the `routes` / `publishers` / `receivers` tables, dispatches
//! published messages to every receiver of the producing workload's
//! route (in-process via the broker, off-node via connector sessions),
//! and reconfigures itself atomically when the controller changes the
//! routing.
//!
//! Two supervised loops keep the fabric alive: a speed sampler that
//! publishes average message throughput, and a liveness watchdog that
//! restarts the broker server and rebuilds individual endpoints when
//! they drop.

mod error;
mod publisher;
mod receiver;
mod router;
mod supervisor;

pub use error::{RoutingError, RoutingResult};
pub use publisher::MessagePublisher;
pub use receiver::MessageReceiver;
pub use router::MessageRouter;
pub use supervisor::{run_speed_sampler, run_watchdog};
