//! Inference engine access.
//!
//! - [`client`]: `InferenceClient` trait and the Ollama implementation
//! - [`streaming`]: NDJSON decoding and terminal-fragment guarantee
//! - [`types`]: `ChatFragment` and Ollama wire types
//! - [`errors`]: `EngineError`

pub mod client;
pub mod errors;
pub mod streaming;
pub mod types;

pub use client::{FragmentStream, InferenceClient, OllamaClient, TerminatedStream};
pub use errors::EngineError;
pub use types::{ChatFragment, PullAck};
