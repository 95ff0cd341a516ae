//! Backends speaking the OpenAI chat-completions protocol: Grok and OpenRouter.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;

use super::UpstreamRequest;
use crate::config::{Config, Secret};
use crate::error::{Error, Result};
use crate::normalize::inject_base_prompt;
use crate::proxy::types::ChatMessage;

const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
pub(super) struct ChatPayload<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f32,
}

/// Base prompt prepended to generic backends' messages, when enabled.
pub(super) fn base_prompt(config: &Config, instructions: &Arc<str>) -> Option<Arc<str>> {
    config
        .prompt
        .inject_base_prompt
        .then(|| instructions.clone())
        .filter(|text| !text.trim().is_empty())
}

pub(super) fn with_base_prompt(messages: &[ChatMessage], base_prompt: Option<&str>) -> Vec<ChatMessage> {
    match base_prompt {
        Some(prompt) => inject_base_prompt(messages.to_vec(), prompt),
        None => messages.to_vec(),
    }
}

fn require_key<'a>(key: Option<&'a Secret>, variable: &str) -> Result<&'a str> {
    key.filter(|k| !k.is_empty())
        .map(Secret::expose_secret)
        .ok_or_else(|| Error::Auth(format!("Missing {} environment variable.", variable)))
}

/// xAI Grok. Every request is served by the configured model.
pub struct GrokBackend {
    url: String,
    api_key: Option<Secret>,
    model: String,
    base_prompt: Option<Arc<str>>,
}

impl GrokBackend {
    pub fn from_config(config: &Config, instructions: &Arc<str>) -> Self {
        let grok = &config.backends.grok;
        Self {
            url: grok.url.clone(),
            api_key: grok.api_key.clone(),
            model: grok.model.clone(),
            base_prompt: base_prompt(config, instructions),
        }
    }

    pub(super) fn build(&self, client: &Client, request: &UpstreamRequest) -> Result<RequestBuilder> {
        let api_key = require_key(self.api_key.as_ref(), "XAI_API_KEY")?;

        let payload = ChatPayload {
            model: &self.model,
            messages: with_base_prompt(&request.messages, self.base_prompt.as_deref()),
            stream: request.stream,
            temperature: request.options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };

        Ok(client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&payload))
    }
}

/// OpenRouter, limited to the Sonoma models.
pub struct OpenRouterBackend {
    url: String,
    api_key: Option<Secret>,
    app_title: String,
    base_prompt: Option<Arc<str>>,
}

impl OpenRouterBackend {
    pub fn from_config(config: &Config, instructions: &Arc<str>) -> Self {
        let openrouter = &config.backends.openrouter;
        Self {
            url: openrouter.url.clone(),
            api_key: openrouter.api_key.clone(),
            app_title: openrouter.app_title.clone(),
            base_prompt: base_prompt(config, instructions),
        }
    }

    pub(super) fn build(&self, client: &Client, request: &UpstreamRequest) -> Result<RequestBuilder> {
        let api_key = require_key(self.api_key.as_ref(), "OPENROUTER_API_KEY")?;

        let payload = ChatPayload {
            model: openrouter_model(&request.model),
            messages: with_base_prompt(&request.messages, self.base_prompt.as_deref()),
            stream: request.stream,
            temperature: request.options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };

        Ok(client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .header(CONTENT_TYPE, "application/json")
            .header("HTTP-Referer", &self.app_title)
            .header("X-Title", &self.app_title)
            .json(&payload))
    }
}

/// `sonoma-dusk` selects Dusk; anything else is served by Sky.
pub fn openrouter_model(requested: &str) -> &'static str {
    if requested.to_ascii_lowercase().contains("sonoma-dusk") {
        "sonoma/dusk"
    } else {
        "sonoma/sky"
    }
}
