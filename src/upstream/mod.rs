//! Upstream dispatch.
//!
//! One [`Backend`] per supported upstream. Each variant builds its own
//! request (credentials, headers, payload, model mapping); [`Backend::send`]
//! runs it under the shared 429 retry policy.

mod chatgpt;
pub mod credentials;
mod openai_compat;
mod qwen;
pub mod reasoning;
pub mod redact;
pub mod retry;

pub use chatgpt::ChatGptBackend;
pub use openai_compat::{openrouter_model, GrokBackend, OpenRouterBackend};
pub use qwen::QwenBackend;

use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;

use crate::config::{BackendKind, Config};
use crate::error::{Error, Result};
use crate::proxy::stream::accumulate_output_text;
use crate::proxy::types::{ChatMessage, Usage};
use redact::redact;
use retry::retry_on_429;

/// Request options forwarded to the backends that understand them.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub tools: Option<Value>,
    pub tool_choice: Option<Value>,
    pub parallel_tool_calls: Option<bool>,
    pub temperature: Option<f32>,
    pub reasoning: Option<Value>,
}

/// A logical upstream call, independent of backend.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Model as requested by the client (before any backend mapping)
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: SendOptions,
}

/// Wire format of a backend's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Responses-API events (`response.output_text.delta`, ...)
    Responses,
    /// OpenAI chat-completion chunks
    OpenAi,
    /// Qwen `{content, finished}` events
    Qwen,
}

/// A non-streaming answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub id: Option<String>,
    pub content: String,
    pub usage: Option<Usage>,
}

pub enum Backend {
    ChatGpt(ChatGptBackend),
    Grok(GrokBackend),
    OpenRouter(OpenRouterBackend),
    Qwen(QwenBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::ChatGpt(_) => BackendKind::Chatgpt,
            Backend::Grok(_) => BackendKind::Grok,
            Backend::OpenRouter(_) => BackendKind::Openrouter,
            Backend::Qwen(_) => BackendKind::Qwen,
        }
    }

    pub fn stream_format(&self) -> StreamFormat {
        match self {
            Backend::ChatGpt(_) => StreamFormat::Responses,
            Backend::Grok(_) | Backend::OpenRouter(_) => StreamFormat::OpenAi,
            Backend::Qwen(_) => StreamFormat::Qwen,
        }
    }

    /// Build the outbound request. Missing credentials fail here, before any I/O.
    pub fn build(&self, client: &Client, request: &UpstreamRequest) -> Result<RequestBuilder> {
        match self {
            Backend::ChatGpt(backend) => backend.build(client, request),
            Backend::Grok(backend) => backend.build(client, request),
            Backend::OpenRouter(backend) => backend.build(client, request),
            Backend::Qwen(backend) => backend.build(client, request),
        }
    }

    /// Send `request`, retrying 429 replies.
    ///
    /// Any other status is returned as-is, as is the final 429 once the
    /// attempt budget is spent. A transport failure is not retried.
    pub async fn send(&self, client: &Client, request: &UpstreamRequest) -> Result<Response> {
        let builder = self.build(client, request)?;
        let backend = self.kind();

        retry_on_429(|attempt| {
            let attempt_builder = builder.try_clone();
            async move {
                let builder = attempt_builder
                    .ok_or_else(|| Error::Internal("Upstream request body is not replayable".to_string()))?;
                tracing::debug!(backend = %backend, attempt, "Sending upstream request");
                builder.send().await.map_err(|e| transport_error(backend, &e))
            }
        })
        .await
    }

    /// Send with `stream` forced off and collect the whole answer.
    ///
    /// The ChatGPT backend still streams; its `output_text` deltas are
    /// accumulated. The others return a chat-completion JSON body.
    pub async fn get_response(&self, client: &Client, request: &UpstreamRequest) -> Result<Completion> {
        let request = UpstreamRequest {
            stream: false,
            ..request.clone()
        };
        let response = ensure_success(self.kind(), self.send(client, &request).await?).await?;
        self.read_completion(response).await
    }

    /// Collect a successful non-streaming reply.
    pub async fn read_completion(&self, response: Response) -> Result<Completion> {
        let backend = self.kind();
        if self.stream_format() == StreamFormat::Responses {
            let body = response
                .bytes_stream()
                .map_err(|e| transport_error(backend, &e));
            let (content, usage) = accumulate_output_text(body).await?;
            return Ok(Completion {
                id: None,
                content,
                usage,
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            tracing::error!(backend = %backend, error = %redact(&e.to_string()), "Failed to parse upstream response");
            Error::Upstream {
                status: 502,
                message: format!("Invalid response from {}: {}", backend, e),
                retry_after: None,
            }
        })?;
        Ok(completion_from_json(&body))
    }
}

fn transport_error(backend: BackendKind, error: &reqwest::Error) -> Error {
    let message = redact(&error.to_string());
    tracing::error!(backend = %backend, error = %message, "Upstream request failed");
    Error::Transport(format!("Upstream {} request failed: {}", backend, message))
}

/// Turn a non-2xx upstream reply into an [`Error::Upstream`].
///
/// The message is `error.message` from a JSON body, else "Upstream error".
/// `Retry-After` is carried through.
pub async fn ensure_success(backend: BackendKind, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        backend = %backend,
        status = %status,
        body = %redact(&body),
        "Upstream returned error"
    );

    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|json| {
            json.get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Upstream error".to_string());

    Err(Error::Upstream {
        status: status.as_u16(),
        message,
        retry_after,
    })
}

/// Content, id and usage of an OpenAI-shaped completion body.
pub fn completion_from_json(body: &Value) -> Completion {
    let choice = body.get("choices").and_then(|c| c.get(0));
    let content = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .or_else(|| choice.and_then(|c| c.get("text")).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    Completion {
        id: body.get("id").and_then(Value::as_str).map(str::to_string),
        content,
        usage: Usage::from_openai(body),
    }
}

/// Models advertised for a backend on `/v1/models`.
pub fn advertised_models(kind: BackendKind) -> &'static [&'static str] {
    match kind {
        BackendKind::Chatgpt => &["gpt-5"],
        BackendKind::Grok => &["grok-beta"],
        BackendKind::Openrouter => &["sonoma/sky", "sonoma/dusk"],
        BackendKind::Qwen => &["qwen3-max-preview"],
    }
}

/// Every backend, built once at startup.
pub struct Backends {
    chatgpt: Backend,
    grok: Backend,
    openrouter: Backend,
    qwen: Backend,
}

impl Backends {
    pub fn from_config(config: &Config, instructions: Arc<str>) -> Self {
        Self {
            grok: Backend::Grok(GrokBackend::from_config(config, &instructions)),
            openrouter: Backend::OpenRouter(OpenRouterBackend::from_config(config, &instructions)),
            qwen: Backend::Qwen(QwenBackend::from_config(config, &instructions)),
            chatgpt: Backend::ChatGpt(ChatGptBackend::from_config(config, instructions)),
        }
    }

    pub fn get(&self, kind: BackendKind) -> &Backend {
        match kind {
            BackendKind::Chatgpt => &self.chatgpt,
            BackendKind::Grok => &self.grok,
            BackendKind::Openrouter => &self.openrouter,
            BackendKind::Qwen => &self.qwen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_from_chat_body() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        });
        let completion = completion_from_json(&body);
        assert_eq!(completion.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(completion.content, "Hello");
        assert_eq!(completion.usage.unwrap().total_tokens, 3);
    }

    #[test]
    fn test_completion_from_text_body_and_empty() {
        let completion = completion_from_json(&json!({"choices": [{"text": "abc"}]}));
        assert_eq!(completion.content, "abc");
        assert_eq!(completion_from_json(&json!({})), Completion::default());
    }

    #[test]
    fn test_backends_lookup() {
        let backends = Backends::from_config(&Config::default(), Arc::from(""));
        for kind in BackendKind::ALL {
            assert_eq!(backends.get(kind).kind(), kind);
            assert!(!advertised_models(kind).is_empty());
        }
        assert_eq!(
            backends.get(BackendKind::Qwen).stream_format(),
            StreamFormat::Qwen
        );
    }
}
