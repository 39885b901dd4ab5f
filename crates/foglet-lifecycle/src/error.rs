//! Error taxonomy of the lifecycle engine.

use thiserror::Error;

use foglet_runtime::RuntimeError;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Fatal outcomes of a container task. Recoverable conditions (pull
/// transport failure, start failure, image-removal conflicts) never
/// reach this type; they are logged and absorbed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Required registry configuration is missing.
    #[error("registry {0} is not configured")]
    Config(i32),

    /// The image could be neither pulled nor found in the local cache.
    #[error("image \"{0}\" unavailable from registry and local cache")]
    ImageUnavailable(String),

    /// The runtime definitively rejected the container create.
    #[error("container create failed: {0}")]
    Create(#[source] RuntimeError),

    /// Any other runtime failure that aborts the task.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
