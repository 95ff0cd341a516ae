//! ChatGPT Responses-API backend.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::credentials::{CredentialProvider, StaticCredentials};
use super::reasoning::{build_reasoning_param, normalize_model_name, ReasoningParam};
use super::UpstreamRequest;
use crate::config::{Config, ReasoningConfig};
use crate::error::{Error, Result};
use crate::normalize::{hoist_system_prompt, normalize_messages, normalize_tools, ToolDefinition, UpstreamInputItem};

const MISSING_CREDENTIALS: &str =
    "Missing ChatGPT credentials. Configure backends.chatgpt.access_token and account_id.";

#[derive(Debug, Serialize)]
struct ResponsesPayload<'a> {
    model: String,
    instructions: &'a str,
    input: Vec<UpstreamInputItem>,
    tools: Vec<ToolDefinition>,
    tool_choice: Value,
    parallel_tool_calls: bool,
    store: bool,
    stream: bool,
    prompt_cache_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include: Option<Vec<&'static str>>,
}

pub struct ChatGptBackend {
    url: String,
    credentials: Arc<dyn CredentialProvider>,
    instructions: Arc<str>,
    reasoning: ReasoningConfig,
    debug_model: Option<String>,
}

impl ChatGptBackend {
    pub fn from_config(config: &Config, instructions: Arc<str>) -> Self {
        Self::with_credentials(
            config,
            instructions,
            Arc::new(StaticCredentials::from_config(&config.backends.chatgpt)),
        )
    }

    pub fn with_credentials(
        config: &Config,
        instructions: Arc<str>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            url: config.backends.chatgpt.url.clone(),
            credentials,
            instructions,
            reasoning: config.reasoning.clone(),
            debug_model: config.server.debug_model.clone(),
        }
    }

    pub(super) fn build(&self, client: &Client, request: &UpstreamRequest) -> Result<RequestBuilder> {
        let credentials = self
            .credentials
            .credentials()
            .ok_or_else(|| Error::Auth(MISSING_CREDENTIALS.to_string()))?;

        let input = normalize_messages(&hoist_system_prompt(request.messages.clone()));
        let session_id = prompt_cache_key(&self.instructions, &input);
        let options = &request.options;

        let payload = ResponsesPayload {
            model: normalize_model_name(&request.model, self.debug_model.as_deref()),
            instructions: &self.instructions,
            input,
            tools: normalize_tools(options.tools.as_ref()),
            tool_choice: options
                .tool_choice
                .clone()
                .unwrap_or_else(|| Value::String("auto".to_string())),
            parallel_tool_calls: options.parallel_tool_calls.unwrap_or(false),
            store: false,
            // Always an event stream upstream; non-streaming callers accumulate it
            stream: true,
            prompt_cache_key: session_id.clone(),
            reasoning: Some(build_reasoning_param(
                &self.reasoning,
                options.reasoning.as_ref(),
                Some(&request.model),
            )),
            include: Some(vec!["reasoning.encrypted_content"]),
        };

        tracing::debug!(
            model = %payload.model,
            input_items = payload.input.len(),
            tools = payload.tools.len(),
            "Built ChatGPT request"
        );

        Ok(client
            .post(&self.url)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", credentials.access_token.expose_secret()),
            )
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .header("chatgpt-account-id", credentials.account_id)
            .header("OpenAI-Beta", "responses=experimental")
            .header("session_id", &session_id)
            .json(&payload))
    }
}

/// Stable cache key for one conversation prefix.
fn prompt_cache_key(instructions: &str, input: &[UpstreamInputItem]) -> String {
    let mut seed = instructions.as_bytes().to_vec();
    if let Some(first) = input.first() {
        seed.extend(serde_json::to_vec(first).unwrap_or_default());
    }
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &seed).to_string()
}
