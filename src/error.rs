use thiserror::Error;

use crate::bus::BusError;
use crate::registry::RegistryError;

/// Result type for application-manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the application manager
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid application name: {0}")]
    InvalidName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A signal or method call could not be built.
    #[error("failed to construct bus message: {0}")]
    SignalConstruction(String),

    #[error("bus transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("bus transport error: {0}")]
    Transport(#[from] BusError),

    #[error("launch failed with code {code} (instance id {instance_id})")]
    LaunchFailed { code: i32, instance_id: i32 },

    #[error("system is shutting down")]
    SystemShuttingDown,

    #[error("registration succeeded but no post-init handler was supplied")]
    NoPostInitHandler,

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("{operation} returned error code {code}")]
    Daemon { operation: &'static str, code: i32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),
}
