//! ChatGPT credential lookup.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::config::{ChatGptConfig, Secret};

/// JWT claim namespace carrying the ChatGPT account id.
const AUTH_CLAIM: &str = "https://api.openai.com/auth";

/// Bearer token plus the account it acts for.
#[derive(Debug, Clone)]
pub struct ChatGptCredentials {
    pub access_token: Secret,
    pub account_id: String,
}

/// Source of ChatGPT credentials. `None` means "not logged in".
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Option<ChatGptCredentials>;
}

/// Credentials fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    access_token: Option<Secret>,
    account_id: Option<Secret>,
    id_token: Option<Secret>,
}

impl StaticCredentials {
    pub fn from_config(config: &ChatGptConfig) -> Self {
        Self {
            access_token: config.access_token.clone(),
            account_id: config.account_id.clone(),
            id_token: config.id_token.clone(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Option<ChatGptCredentials> {
        let access_token = self.access_token.clone().filter(|t| !t.is_empty())?;
        let account_id = match self.account_id.as_ref().filter(|a| !a.is_empty()) {
            Some(id) => id.expose_secret().to_string(),
            None => account_id_from_id_token(self.id_token.as_ref()?.expose_secret())?,
        };
        Some(ChatGptCredentials {
            access_token,
            account_id,
        })
    }
}

/// Read `chatgpt_account_id` from the auth claim of an unverified JWT.
pub fn account_id_from_id_token(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_, payload, _) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims
        .get(AUTH_CLAIM)?
        .get("chatgpt_account_id")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
