//! Core error types
//!
//! Re-exports shapegen-error and provides core-specific conveniences.

pub use shapegen_error::{Error, ErrorKind, ErrorStatus, Result};

/// Create a ModelNotFound error
pub fn model_not_found(model: impl Into<String>) -> Error {
    Error::model_not_found(model)
}

/// Create an InferenceFailed error
pub fn inference_failed(reason: impl Into<String>) -> Error {
    Error::inference_failed(reason)
}

/// Create an ExecutionFailed error
pub fn execution_failed(reason: impl Into<String>) -> Error {
    Error::execution_failed(reason)
}

/// Create an ExecutionTimeout error
pub fn execution_timeout(secs: u64) -> Error {
    Error::execution_timeout(secs)
}

/// Create a ParseFailed error
pub fn parse_error(message: impl Into<String>) -> Error {
    Error::parse_failed(message)
}

/// Create an IoFailed error
pub fn io_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::IoFailed, message)
}
