//! Unified error handling for the agent.

/// Sync error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Clock has not been synchronized")]
    ClockUnsynced,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Engine error: {0}")]
    Engine(fieldsync_engine::Error),
}

impl From<fieldsync_engine::Error> for SyncError {
    fn from(err: fieldsync_engine::Error) -> Self {
        match err {
            fieldsync_engine::Error::ClockUnsynced => SyncError::ClockUnsynced,
            fieldsync_engine::Error::InvalidPayload(msg) => SyncError::InvalidPayload(msg),
            other => SyncError::Engine(other),
        }
    }
}

impl SyncError {
    /// Whether the failure is a transport problem worth retrying on the next
    /// connectivity transition.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::NetworkUnreachable(_) | SyncError::Timeout(_))
    }
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, SyncError>;
