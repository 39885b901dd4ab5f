//! Error types for connector operations.

use thiserror::Error;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Session factory could not be built (bad cert, unresolvable host).
    #[error("connector factory error: {0}")]
    Factory(String),

    /// A session-level network failure; the session is dropped and
    /// recreated on the next watchdog tick.
    #[error("connector session error: {0}")]
    Session(String),

    /// The client or session has been closed.
    #[error("connector {0} is closed")]
    Closed(String),

    /// Trust-store materialization failed.
    #[error("trust store error: {0}")]
    TrustStore(String),
}
