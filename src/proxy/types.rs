//! OpenAI-compatible request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

/// A chat message.
///
/// Only assistant messages carry `tool_calls`; only tool messages carry `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            name: None,
            tool_call_id: None,
            id: None,
            tool_calls: None,
        }
    }
}

/// Message content: plain text or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    ImageUrl {
        image_url: ImageRef,
    },
    #[serde(other)]
    Unsupported,
}

impl ContentPart {
    /// Text carried by a part, preferring `text` over `content`.
    pub fn text_value(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text, content } => text
                .as_deref()
                .filter(|t| !t.is_empty())
                .or(content.as_deref())
                .filter(|t| !t.is_empty()),
            _ => None,
        }
    }
}

/// `image_url` is either a bare string or `{url, detail?}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ImageRef {
    Url(String),
    Object {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ImageRef {
    pub fn url(&self) -> &str {
        match self {
            ImageRef::Url(url) => url,
            ImageRef::Object { url, .. } => url,
        }
    }
}

/// A tool call recorded on an assistant message.
///
/// Fields are optional on input so malformed calls can be skipped instead of
/// rejecting the whole request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// JSON-encoded string on well-formed input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Options controlling streaming response behavior (OpenAI-compatible).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
}

/// Inbound body for both `/v1/chat/completions` and `/v1/completions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    /// String or list of strings
    #[serde(default)]
    pub prompt: Option<Value>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub reasoning: Option<Value>,
}

impl CompletionRequest {
    /// Parse a raw request body, distinguishing malformed JSON from a bad shape.
    pub fn from_body(body: &[u8]) -> Result<Self, Error> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|_| Error::BadRequest("Invalid JSON body".to_string()))?;
        serde_json::from_value(value)
            .map_err(|e| Error::BadRequest(format!("Invalid request: {}", e)))
    }

    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn include_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .and_then(|o| o.include_usage)
            .unwrap_or(false)
    }

    /// `prompt` flattened to one string (lists are concatenated).
    pub fn prompt_text(&self) -> Option<String> {
        match self.prompt.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Chat messages, or a single user message built from `prompt`.
    pub fn chat_messages(&self) -> Result<Vec<ChatMessage>, Error> {
        if let Some(messages) = &self.messages {
            return Ok(messages.clone());
        }
        match self.prompt_text() {
            Some(prompt) => Ok(vec![ChatMessage::text(Role::User, prompt)]),
            None => Err(Error::BadRequest(
                "Request must include messages: []".to_string(),
            )),
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Read usage from a Responses-API event (`response.usage`).
    ///
    /// `total_tokens` falls back to prompt + completion when absent or zero.
    pub fn from_responses_event(event: &Value) -> Option<Self> {
        let usage = event.get("response")?.get("usage")?.as_object()?;
        let read = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
        let prompt_tokens = read("input_tokens");
        let completion_tokens = read("output_tokens");
        let total_tokens = match read("total_tokens") {
            0 => prompt_tokens + completion_tokens,
            total => total,
        };
        Some(Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })
    }

    /// Read an OpenAI-shaped `usage` object.
    pub fn from_openai(value: &Value) -> Option<Self> {
        serde_json::from_value(value.get("usage")?.clone()).ok()
    }
}

/// Non-streaming chat completion (OpenAI-compatible).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    pub fn new(id: String, created: i64, model: String, content: String, usage: Option<Usage>) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

/// Non-streaming text completion (OpenAI-compatible).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<TextChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextCompletionResponse {
    pub fn new(id: String, created: i64, model: String, text: String, usage: Option<Usage>) -> Self {
        Self {
            id,
            object: "text_completion".to_string(),
            created,
            model,
            choices: vec![TextChoice {
                index: 0,
                text,
                finish_reason: Some("stop".to_string()),
            }],
            usage,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextChoice {
    pub index: u32,
    pub text: String,
    pub finish_reason: Option<String>,
}

/// Streaming chat chunk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A streaming choice delta. `finish_reason` serializes as `null` when unset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming chat chunk.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Plain string, or `{content: [{type, text}]}` in o3 mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

impl Delta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDelta,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionDelta {
    pub name: String,
    pub arguments: String,
}

/// Streaming text-completion chunk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<TextChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}
