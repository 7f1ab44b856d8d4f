//! Error types for the service layer.

use bossfight_core::BossError;
use thiserror::Error;

/// Errors raised by the periodic systems and the daemon bootstrap.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The engine reported a failure.
    #[error(transparent)]
    Engine(#[from] BossError),

    /// A blocking storage task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Nobody is listening for engine events any more.
    #[error("Engine event channel closed")]
    ChannelClosed,
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ServiceError>;
