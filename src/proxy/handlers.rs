//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::server::AppState;
use super::stream::TranslatedStream;
use super::translate::{EventTranslator, OpenAiTranslator, QwenTranslator, ResponsesTranslator, Surface};
use super::types::{ChatCompletionResponse, ChatMessage, CompletionRequest, Role, TextCompletionResponse};
use crate::config::BackendKind;
use crate::error::{Error, Result};
use crate::upstream::{advertised_models, ensure_success, SendOptions, StreamFormat, UpstreamRequest};

const FALLBACK_MODEL: &str = "gpt-5";

/// `?provider=` selects the backend for one request.
#[derive(Debug, Default, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
}

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
    body: Bytes,
) -> Response {
    respond(&state, complete(&state, &query, &body, Surface::Chat).await)
}

/// Handle POST /v1/completions
pub async fn completions(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
    body: Bytes,
) -> Response {
    respond(&state, complete(&state, &query, &body, Surface::Text).await)
}

fn respond(state: &AppState, result: Result<Response>) -> Response {
    match result {
        Ok(response) => response,
        Err(e) => {
            state.metrics.record_error();
            tracing::warn!(status = %e.status(), kind = e.kind(), error = %e, "Request failed");
            e.into_response()
        }
    }
}

async fn complete(
    state: &AppState,
    query: &ProviderQuery,
    body: &[u8],
    surface: Surface,
) -> Result<Response> {
    let kind = match query.provider.as_deref() {
        Some(name) => name.parse::<BackendKind>().map_err(Error::BadRequest)?,
        None => state.config.server.default_backend,
    };
    let request = CompletionRequest::from_body(body)?;

    let requested_model = request
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .or_else(|| state.config.server.default_model.clone());
    let model = requested_model.unwrap_or_else(|| FALLBACK_MODEL.to_string());
    let is_stream = request.is_stream();
    let include_usage = request.include_usage();

    let (messages, options) = match surface {
        Surface::Chat => (
            request.chat_messages()?,
            SendOptions {
                tools: request.tools.clone(),
                tool_choice: request.tool_choice.clone(),
                parallel_tool_calls: request.parallel_tool_calls,
                temperature: request.temperature,
                reasoning: request.reasoning.clone(),
            },
        ),
        Surface::Text => (
            vec![ChatMessage::text(
                Role::User,
                request.prompt_text().unwrap_or_default(),
            )],
            SendOptions {
                temperature: request.temperature,
                ..SendOptions::default()
            },
        ),
    };

    tracing::info!(
        backend = %kind,
        model = %model,
        stream = is_stream,
        messages = messages.len(),
        "Received completion request"
    );
    state.metrics.record_request(is_stream);

    let permit = state
        .gate
        .acquire(Some(state.config.admission.queue_timeout()))
        .await
        .map_err(|busy| {
            state.metrics.record_rate_limited();
            tracing::warn!(retry_after_secs = busy.retry_after_secs, "Admission refused");
            Error::from(busy)
        })?;

    let backend = state.backends.get(kind);
    let upstream_request = UpstreamRequest {
        model: model.clone(),
        messages,
        stream: is_stream,
        options,
    };
    let response = backend.send(&state.http_client, &upstream_request).await?;
    let response = ensure_success(kind, response).await?;
    let created = chrono::Utc::now().timestamp();

    if is_stream {
        let translator: Box<dyn EventTranslator> = match backend.stream_format() {
            StreamFormat::Responses => Box::new(ResponsesTranslator::new(
                surface,
                model.as_str(),
                created,
                state.config.reasoning.compat,
                include_usage,
            )),
            StreamFormat::OpenAi => {
                Box::new(OpenAiTranslator::new(surface, model.as_str(), created, include_usage))
            }
            StreamFormat::Qwen => Box::new(QwenTranslator::new(surface, model.as_str(), created)),
        };
        let stream = TranslatedStream::new(response.bytes_stream(), translator, Some(permit));

        return Ok((
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(stream),
        )
            .into_response());
    }

    let completion = backend.read_completion(response).await?;
    drop(permit);

    Ok(match surface {
        Surface::Chat => Json(ChatCompletionResponse::new(
            completion.id.unwrap_or_else(|| format!("chatcmpl-{}", created)),
            created,
            model,
            completion.content,
            completion.usage,
        ))
        .into_response(),
        Surface::Text => Json(TextCompletionResponse::new(
            format!("cmpl-{}", created),
            created,
            model,
            completion.content,
            completion.usage,
        ))
        .into_response(),
    })
}

/// Handle GET /v1/models
pub async fn list_models() -> impl IntoResponse {
    let models: Vec<serde_json::Value> = BackendKind::ALL
        .into_iter()
        .flat_map(|kind| {
            advertised_models(kind).iter().map(move |id| {
                serde_json::json!({
                    "id": id,
                    "object": "model",
                    "owned_by": kind.as_str(),
                })
            })
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": models
    }))
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatrelay",
        "admission": {
            "max_concurrency": state.gate.max_concurrency(),
            "available": state.gate.available(),
            "queued": state.gate.queued(),
        }
    }))
}

/// Handle GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
