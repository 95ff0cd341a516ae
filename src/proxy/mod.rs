//! HTTP proxy server module.
//!
//! This module provides the OpenAI-compatible HTTP API that accepts
//! requests, admits them through the gate and translates upstream replies.

mod handlers;
pub mod metrics;
mod server;
pub mod stream;
pub mod translate;
pub mod types;

pub use handlers::ProviderQuery;
pub use metrics::{Metrics, MetricsSnapshot};
pub use server::{create_router, run_server, AppState, UPSTREAM_TIMEOUT};
pub use stream::{accumulate_output_text, SseLineBuffer, TranslatedStream};
pub use translate::{EventTranslator, Flow, Surface};
pub use types::{ChatCompletionResponse, ChatMessage, CompletionRequest, Usage};
