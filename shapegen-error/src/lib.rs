//! # shapegen-error
//!
//! Unified error handling for shapegen.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., ModelNotFound, ExecutionFailed)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use shapegen_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ModelNotFound, "model 'llama2' not found")
//!         .with_operation("ollama::chat")
//!         .with_context("model", "llama2"))
//! }
//! ```
//!
//! ## Principles
//!
//! - Library functions return `Result<T, shapegen_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Only `ErrorKind::ModelNotFound` is fatal to the run loop

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using shapegen Error
pub type Result<T> = std::result::Result<T, Error>;
