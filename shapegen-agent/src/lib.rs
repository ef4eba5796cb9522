//! # shapegen agent
//!
//! The generator drives the shape loop:
//! 1. Sample a (dimensionality, shape, color) request
//! 2. Ask the model for matplotlib code
//! 3. Render the code to a PNG
//! 4. Ask the model whether the image matches
//! 5. Report, wait, repeat
//!
//! Only a missing model or an operator interrupt ends the loop early.

mod generator;

pub use generator::{Generator, GeneratorConfig, Outcome, RunStats};
