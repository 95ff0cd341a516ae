//! chatrelay - OpenAI-compatible gateway over ChatGPT, Grok, OpenRouter and Qwen
//!
//! This library provides admission control, upstream dispatch with 429
//! retry, request normalization and streaming response translation.

pub mod admission;
pub mod config;
pub mod error;
pub mod normalize;
pub mod proxy;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
