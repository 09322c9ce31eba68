//! ollama-gateway: HTTP gateway for a local Ollama inference engine.
//!
//! Translates JSON requests into Ollama chat calls and relays the answers
//! either as a single JSON body or as a live Server-Sent-Events stream.
//! Also reports engine availability and triggers model downloads.

pub mod config;
pub mod inference;
pub mod server;
