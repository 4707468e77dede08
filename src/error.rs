use std::time::Duration;

/// Errors returned by [`WaitSession`][crate::WaitSession].
///
/// Keys are carried in their `Debug` rendering so the error does not depend on the key type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A live session is already registered under this key.
    #[error("session {key} already exists")]
    AlreadyExists { key: String },
    /// No session is registered under this key, or it has already been consumed.
    #[error("session {key} does not exist")]
    NotFound { key: String },
    /// The session already holds a value that no one has waited for yet.
    #[error("session {key} has already been completed")]
    AlreadyDone { key: String },
    /// No value arrived before the timeout. The session has been removed.
    #[error("wait for session {key} timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
