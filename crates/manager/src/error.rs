//! Manager errors

use thiserror::Error;

/// Errors returned by session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("Session {0} is not initialized")]
    NotInitialized(String),

    #[error("Session {0} has an active stream")]
    StreamActive(String),

    #[error("Failed to load session {session_id}: {message}")]
    SessionLoad { session_id: String, message: String },

    #[error("Session actor for {0} has shut down")]
    ActorGone(String),
}
