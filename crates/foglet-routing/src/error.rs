//! Error types of the routing core.

use thiserror::Error;

use foglet_broker::BrokerError;

pub type RoutingResult<T> = Result<T, RoutingError>;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no publisher for {0}")]
    UnknownPublisher(String),

    #[error("no receiver for {0}")]
    UnknownReceiver(String),

    #[error("endpoint for {0} is closed")]
    EndpointClosed(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
