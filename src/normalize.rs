//! Chat messages and tools to the Responses-API input shape.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::Value;

use crate::proxy::types::{ChatMessage, ContentPart, MessageContent, Role};

/// Role carried by an upstream `message` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputRole {
    User,
    Assistant,
}

/// One content item of an upstream `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
}

impl ContentItem {
    fn text(role: Role, text: String) -> Self {
        if role == Role::Assistant {
            ContentItem::OutputText { text }
        } else {
            ContentItem::InputText { text }
        }
    }
}

/// One item of the upstream `input` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamInputItem {
    Message {
        role: InputRole,
        content: Vec<ContentItem>,
    },
    FunctionCall {
        name: String,
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

/// A function tool in Responses-API form. Serializes with `"type": "function"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "function")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub strict: bool,
    pub parameters: Value,
}

/// Convert chat messages to upstream input items, preserving order.
///
/// System messages are dropped; function calls of an assistant turn precede
/// that turn's message item; messages without content items are omitted.
pub fn normalize_messages(messages: &[ChatMessage]) -> Vec<UpstreamInputItem> {
    let mut items = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => continue,
            Role::Tool => {
                if let Some(item) = tool_output(message) {
                    items.push(item);
                }
                continue;
            }
            Role::Assistant => {
                for call in message.tool_calls.iter().flatten() {
                    if call.kind.as_deref().unwrap_or("function") != "function" {
                        continue;
                    }
                    let call_id = call.id.as_deref().or(call.call_id.as_deref());
                    let function = call.function.as_ref();
                    let name = function.and_then(|f| f.name.as_deref());
                    let arguments = function
                        .and_then(|f| f.arguments.as_ref())
                        .and_then(Value::as_str);
                    if let (Some(call_id), Some(name), Some(arguments)) = (call_id, name, arguments) {
                        items.push(UpstreamInputItem::FunctionCall {
                            name: name.to_string(),
                            arguments: arguments.to_string(),
                            call_id: call_id.to_string(),
                        });
                    }
                }
            }
            Role::User | Role::Developer => {}
        }

        let content = content_items(message);
        if content.is_empty() {
            continue;
        }
        let role = match message.role {
            Role::Assistant => InputRole::Assistant,
            _ => InputRole::User,
        };
        items.push(UpstreamInputItem::Message { role, content });
    }

    items
}

fn tool_output(message: &ChatMessage) -> Option<UpstreamInputItem> {
    let call_id = message
        .tool_call_id
        .as_deref()
        .or(message.id.as_deref())
        .filter(|id| !id.is_empty())?;

    let output = match &message.content {
        Some(MessageContent::Text(text)) => text.clone(),
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .filter_map(ContentPart::text_value)
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };

    Some(UpstreamInputItem::FunctionCallOutput {
        call_id: call_id.to_string(),
        output,
    })
}

fn content_items(message: &ChatMessage) -> Vec<ContentItem> {
    match &message.content {
        Some(MessageContent::Text(text)) if !text.is_empty() => {
            vec![ContentItem::text(message.role, text.clone())]
        }
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { .. } => part
                    .text_value()
                    .map(|text| ContentItem::text(message.role, text.to_string())),
                ContentPart::ImageUrl { image_url } => {
                    Some(image_url.url()).filter(|url| !url.is_empty()).map(|url| {
                        ContentItem::InputImage {
                            image_url: normalize_image_data_url(url),
                        }
                    })
                }
                ContentPart::Unsupported => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Canonicalize a base64 image data URL.
///
/// The payload is percent-decoded, stripped of whitespace, moved from the
/// URL-safe to the standard alphabet and re-padded. Anything that is not a
/// base64 image data URL, or does not decode afterwards, is returned unchanged.
pub fn normalize_image_data_url(url: &str) -> String {
    if !url.starts_with("data:image/") || !url.contains(";base64,") {
        return url.to_string();
    }
    let Some((header, data)) = url.split_once(',') else {
        return url.to_string();
    };

    let decoded = percent_decode_str(data).decode_utf8_lossy();
    let mut payload: String = decoded
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while payload.len() % 4 != 0 {
        payload.push('=');
    }

    if STANDARD.decode(&payload).is_err() {
        return url.to_string();
    }
    format!("{},{}", header, payload)
}

/// Convert chat-completions tool definitions. Entries that are not named
/// function tools are skipped.
pub fn normalize_tools(tools: Option<&Value>) -> Vec<ToolDefinition> {
    let Some(Value::Array(tools)) = tools else {
        return Vec::new();
    };

    tools
        .iter()
        .filter(|tool| tool.get("type").and_then(Value::as_str) == Some("function"))
        .filter_map(|tool| {
            let function = tool.get("function").filter(|f| f.is_object());
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())?;
            let description = function
                .and_then(|f| f.get("description"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let parameters = function
                .and_then(|f| f.get("parameters"))
                .filter(|p| p.is_object())
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));

            Some(ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                strict: false,
                parameters,
            })
        })
        .collect()
}

/// Move the first system message to the front as a user message.
///
/// The Responses input drops system messages, so the ChatGPT backend keeps
/// the caller's system prompt this way.
pub fn hoist_system_prompt(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    if let Some(index) = messages.iter().position(|m| m.role == Role::System) {
        let system = messages.remove(index);
        let content = system
            .content
            .unwrap_or_else(|| MessageContent::Text(String::new()));
        messages.insert(
            0,
            ChatMessage {
                content: Some(content),
                ..ChatMessage::text(Role::User, String::new())
            },
        );
    }
    messages
}

/// Prepend `instructions` as a system message unless one is already present.
pub fn inject_base_prompt(mut messages: Vec<ChatMessage>, instructions: &str) -> Vec<ChatMessage> {
    if instructions.trim().is_empty() || messages.iter().any(|m| m.role == Role::System) {
        return messages;
    }
    messages.insert(0, ChatMessage::text(Role::System, instructions));
    messages
}
