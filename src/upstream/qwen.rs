//! Qwen web-chat backend.

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::openai_compat::{base_prompt, with_base_prompt};
use super::UpstreamRequest;
use crate::config::{Config, Secret};
use crate::error::{Error, Result};
use crate::proxy::types::ChatMessage;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";
const ACCEPTED_LANGUAGES: &str = "en-GB,en-US;q=0.9,en;q=0.8,bg;q=0.7,zh-TW;q=0.6,zh;q=0.5";
const QWEN_ORIGIN: &str = "https://chat.qwen.ai";
const BX_VERSION: &str = "2.5.31";
const WEB_VERSION: &str = "0.0.209";

#[derive(Debug, Serialize)]
struct QwenPayload<'a> {
    messages: Vec<ChatMessage>,
    stream: bool,
    incremental_output: bool,
    chat_mode: &'static str,
    model: &'a str,
}

pub struct QwenBackend {
    url: String,
    auth_token: Option<Secret>,
    cookies: Option<Secret>,
    chat_id: String,
    model: Option<String>,
    base_prompt: Option<Arc<str>>,
}

impl QwenBackend {
    pub fn from_config(config: &Config, instructions: &Arc<str>) -> Self {
        let qwen = &config.backends.qwen;
        Self {
            url: qwen.url.clone(),
            auth_token: qwen.auth_token.clone(),
            cookies: qwen.cookies.clone(),
            chat_id: qwen.chat_id.clone(),
            model: qwen.model.clone(),
            base_prompt: base_prompt(config, instructions),
        }
    }

    pub(super) fn build(&self, client: &Client, request: &UpstreamRequest) -> Result<RequestBuilder> {
        let auth_token = self
            .auth_token
            .as_ref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Auth(
                    "Missing QWEN_AUTH_TOKEN environment variable. \
                     Please set it to your Qwen authorization token."
                        .to_string(),
                )
            })?;
        let cookies = self
            .cookies
            .as_ref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                Error::Auth(
                    "Missing QWEN_COOKIES environment variable. \
                     Please set it to your Qwen cookies string."
                        .to_string(),
                )
            })?;

        let payload = QwenPayload {
            messages: with_base_prompt(&request.messages, self.base_prompt.as_deref()),
            stream: request.stream,
            incremental_output: true,
            chat_mode: "normal",
            model: self.model.as_deref().unwrap_or(&request.model),
        };
        let request_id = Uuid::new_v4().to_string();
        let timezone = chrono::Utc::now()
            .format("%a %b %d %Y %H:%M:%S GMT%z")
            .to_string();

        tracing::debug!(
            chat_id = %self.chat_id,
            request_id = %request_id,
            model = %payload.model,
            "Built Qwen request"
        );

        Ok(client
            .post(&self.url)
            .query(&[("chat_id", self.chat_id.as_str())])
            .header(ACCEPT, "application/json")
            .header(ACCEPT_LANGUAGE, ACCEPTED_LANGUAGES)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(REFERER, format!("{}/c/{}", QWEN_ORIGIN, self.chat_id))
            .header(ORIGIN, QWEN_ORIGIN)
            .header("DNT", "1")
            .header("bx-v", BX_VERSION)
            .header("source", "web")
            .header("timezone", timezone)
            .header("version", WEB_VERSION)
            .header("x-accel-buffering", "no")
            .header("x-request-id", request_id)
            .header(AUTHORIZATION, format!("Bearer {}", auth_token.expose_secret()))
            .header(COOKIE, cookies.expose_secret())
            .json(&payload))
    }
}
