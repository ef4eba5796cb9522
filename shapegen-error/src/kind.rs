//! Error kinds for shapegen operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide whether an iteration is skipped
/// or the whole process must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Invalid configuration or parameters
    ConfigInvalid,

    // =========================================================================
    // Language model errors
    // =========================================================================
    /// The requested model is not installed on the service
    ModelNotFound,

    /// LLM inference failed
    InferenceFailed,

    /// Rate limit exceeded
    RateLimited,

    /// Service reply could not be decoded
    ParseFailed,

    // =========================================================================
    // Code execution errors
    // =========================================================================
    /// Generated code raised or produced no figure
    ExecutionFailed,

    /// Generated code ran past its time limit
    ExecutionTimeout,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",

            // Language model
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::ParseFailed => "ParseFailed",

            // Execution
            ErrorKind::ExecutionFailed => "ExecutionFailed",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ExecutionFailed
                | ErrorKind::ExecutionTimeout
        )
    }

    /// A missing model cannot be fixed by retrying; the process has to stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::ModelNotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
