//! Error taxonomy for the test platform.
//!
//! Every failure the orchestration core reports is a [`PlatformError`]. Each variant belongs to exactly one
//! [`ErrorKind`], and the kind decides how the request orchestrator treats it:
//!
//! - **Usage** (`InvalidOperation`, `Disposed`): the caller drove a request through an illegal transition.
//! - **Settings** (`Settings`): malformed run settings or a missing provider.
//! - **Platform** (`Platform`, `Timeout`, `Channel`, `Io`, `Serialization`): host launch or channel failures.
//!
//! All three kinds are caught once at the orchestrator boundary and reported to the registrar. Anything that is not
//! a `PlatformError` (a panic) is a defect and is allowed to unwind.

use thiserror::Error;

/// Classify a [`PlatformError`] for boundary handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Usage,
    Settings,
    Platform,
}

impl ErrorKind {
    /// Return the canonical spelling used in log messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Usage => "usage",
            ErrorKind::Settings => "settings",
            ErrorKind::Platform => "platform",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the test platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// An operation was attempted from a state that does not allow it.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An operation was attempted on an object that has already been disposed.
    #[error("Cannot access a disposed object: {0}")]
    Disposed(&'static str),

    /// Run settings are malformed or name something that cannot be provided.
    #[error("Settings error: {0}")]
    Settings(String),

    /// The test host could not be launched or misbehaved.
    #[error("Test platform error: {0}")]
    Platform(String),

    /// A bounded wait elapsed.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The communication channel failed or was closed.
    #[error("Communication channel error: {0}")]
    Channel(String),

    /// File or socket I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for platform errors
pub type PlatformResult<T> = Result<T, PlatformError>;

impl PlatformError {
    /// Create an invalid-operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a settings error
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    /// Create a platform error
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Return the boundary classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::InvalidOperation(_) | PlatformError::Disposed(_) => ErrorKind::Usage,
            PlatformError::Settings(_) => ErrorKind::Settings,
            PlatformError::Platform(_)
            | PlatformError::Timeout(_)
            | PlatformError::Channel(_)
            | PlatformError::Io(_)
            | PlatformError::Serialization(_) => ErrorKind::Platform,
        }
    }
}
