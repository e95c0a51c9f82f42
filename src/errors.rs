/// Error taxonomy for the confinement engine.
///
/// Decisions resolve synchronously and locally; the only errors that cross
/// module boundaries are the ones an administrator or interception layer can
/// act on. Internal race signals (a profile observed stale mid-operation)
/// never appear here: they are retried inside the lifecycle module.
use thiserror::Error;

/// Errors surfaced by the confinement engine
#[derive(Error, Debug)]
pub enum ConfineError {
    /// Insufficient granted permissions for the requested operation
    #[error("permission denied: {info} (errno {errno})")]
    PolicyDenied { info: String, errno: i32 },

    /// A mandatory exec-transition target does not exist
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// Store mutation collided with an existing profile of the same name
    #[error("profile already exists: {0}")]
    AlreadyExists(String),

    /// Store mutation referenced a profile that is not loaded
    #[error("no such profile: {0}")]
    NotFound(String),

    /// A profile's bound-task limit was exceeded
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Hat-cookie mismatch. Fatal for the offending process; the caller must
    /// terminate it, not merely deny the operation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Profile document failed to deserialize or validate
    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map engine errors to CLI exit codes
impl From<&ConfineError> for i32 {
    fn from(err: &ConfineError) -> i32 {
        match err {
            ConfineError::PolicyDenied { .. } => 1,
            ConfineError::ProfileNotFound(_) => 2,
            ConfineError::AlreadyExists(_) => 3,
            ConfineError::NotFound(_) => 4,
            ConfineError::ResourceExhausted(_) => 5,
            ConfineError::ProtocolViolation(_) => 6,
            ConfineError::Parse(_) => 65,
            ConfineError::Io(_) => 74,
        }
    }
}

/// Result type alias for confinement operations
pub type Result<T> = std::result::Result<T, ConfineError>;
