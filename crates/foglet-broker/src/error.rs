//! Error types for broker operations.

use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker server is not active")]
    Inactive,

    #[error("endpoint for {0} is closed")]
    EndpointClosed(String),

    #[error("no producer for {0}")]
    UnknownProducer(String),

    #[error("no consumer for {0}")]
    UnknownConsumer(String),

    #[error("message of {size} bytes exceeds the broker memory limit of {limit} bytes")]
    LimitExceeded { size: u64, limit: u64 },
}
