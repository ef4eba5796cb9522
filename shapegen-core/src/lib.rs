//! # shapegen core
//!
//! Building blocks for the shape generation loop.
//!
//! ## Core Concepts
//! - **ShapeRequest**: the sampled (dimensionality, shape, color) for one iteration
//! - **Prompts**: code-generation instruction and verification question
//! - **Provider**: trait-based LLM communication (Ollama chat endpoint)
//! - **Executor**: runs generated plotting code and captures the figure as PNG
//! - **Verifier**: asks the model whether the rendered image matches the request

pub mod error;
pub mod shape;
pub mod prompt;
pub mod provider;
pub mod executor;
pub mod verifier;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use shape::{Color, Dimensionality, Shape, ShapeRequest};
pub use prompt::{code_prompt, verification_message, verification_prompt};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, OllamaProvider,
    ProviderConfig, ProviderError, Role, Usage, UsageTracker,
};
pub use executor::{
    extract_code, CodeExecutor, CodeRunner, EncodedImage, ExecutorConfig, PythonRunner, Surface,
};
pub use verifier::{is_affirmative, ImageDelivery, Verdict, Verifier};
