//! Configuration parsing and validation for chatrelay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

/// Upstream ChatGPT Responses endpoint used by the Codex backend.
pub const CHATGPT_RESPONSES_URL: &str = "https://chatgpt.com/backend-api/codex/responses";
const GROK_URL: &str = "https://api.x.ai/v1/chat/completions";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const QWEN_URL: &str = "https://chat.qwen.ai/api/v2/chat/completions";
const QWEN_DEFAULT_CHAT_ID: &str = "25e701db-821b-4299-b6b7-8306cbe40eb4";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub admission: AdmissionConfig,
    pub reasoning: ReasoningConfig,
    pub prompt: PromptConfig,
    pub backends: BackendsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    pub listen: String,
    /// Backend used when a request does not name one via `?provider=`
    pub default_backend: BackendKind,
    /// Model used when a request omits `model`
    pub default_model: Option<String>,
    /// Forcibly replaces the requested model for the ChatGPT backend
    pub debug_model: Option<String>,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
            default_backend: BackendKind::Chatgpt,
            default_model: None,
            debug_model: None,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Admission controller settings (concurrency gate + token bucket).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_concurrency: usize,
    pub queue_limit: usize,
    pub queue_timeout_secs: u64,
    /// Requests per second; burst capacity is twice this. Zero disables rate limiting.
    pub rate_limit_rps: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            queue_limit: 100,
            queue_timeout_secs: 120,
            rate_limit_rps: 8,
        }
    }
}

impl AdmissionConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }

    pub fn burst(&self) -> u32 {
        self.rate_limit_rps.saturating_mul(2)
    }
}

/// How reasoning text is surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningCompat {
    Legacy,
    Current,
    O3,
    #[default]
    ThinkTags,
}

impl std::str::FromStr for ReasoningCompat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "current" => Ok(Self::Current),
            "o3" => Ok(Self::O3),
            "think-tags" => Ok(Self::ThinkTags),
            other => Err(ConfigError::Validation(format!(
                "Unknown reasoning compat mode '{}'",
                other
            ))),
        }
    }
}

/// Reasoning defaults for the ChatGPT backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// minimal | low | medium | high
    pub effort: String,
    /// auto | concise | detailed | none
    pub summary: String,
    pub compat: ReasoningCompat,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            effort: "medium".to_string(),
            summary: "auto".to_string(),
            compat: ReasoningCompat::ThinkTags,
        }
    }
}

/// Base instruction prompt settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub instructions_path: Option<String>,
    /// Prepend the base instructions as a system message for generic backends
    pub inject_base_prompt: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            instructions_path: None,
            inject_base_prompt: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The fixed set of upstream backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Chatgpt,
    Grok,
    Openrouter,
    Qwen,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Chatgpt,
        BackendKind::Grok,
        BackendKind::Openrouter,
        BackendKind::Qwen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Chatgpt => "chatgpt",
            BackendKind::Grok => "grok",
            BackendKind::Openrouter => "openrouter",
            BackendKind::Qwen => "qwen",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "Invalid provider: {}. Available: chatgpt, grok, openrouter, qwen",
                    s
                )
            })
    }
}

/// Per-backend settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub chatgpt: ChatGptConfig,
    pub grok: GrokConfig,
    pub openrouter: OpenRouterConfig,
    pub qwen: QwenConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatGptConfig {
    pub url: String,
    pub access_token: Option<Secret>,
    pub account_id: Option<Secret>,
    /// Used to derive `account_id` when it is not configured directly
    pub id_token: Option<Secret>,
}

impl Default for ChatGptConfig {
    fn default() -> Self {
        Self {
            url: CHATGPT_RESPONSES_URL.to_string(),
            access_token: None,
            account_id: None,
            id_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrokConfig {
    pub url: String,
    pub api_key: Option<Secret>,
    pub model: String,
}

impl Default for GrokConfig {
    fn default() -> Self {
        Self {
            url: GROK_URL.to_string(),
            api_key: None,
            model: "grok-beta".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub url: String,
    pub api_key: Option<Secret>,
    /// Sent as `HTTP-Referer` and `X-Title`
    pub app_title: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            url: OPENROUTER_URL.to_string(),
            api_key: None,
            app_title: "chatrelay".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QwenConfig {
    pub url: String,
    pub auth_token: Option<Secret>,
    pub cookies: Option<Secret>,
    pub chat_id: String,
    /// Overrides the requested model when set
    pub model: Option<String>,
}

impl Default for QwenConfig {
    fn default() -> Self {
        Self {
            url: QWEN_URL.to_string(),
            auth_token: None,
            cookies: None,
            chat_id: QWEN_DEFAULT_CHAT_ID.to_string(),
            model: None,
        }
    }
}

/// Credential wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Access the raw value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Secret(SecretString::from(s)))
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(SecretString::from(s))
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret(SecretString::from(s.to_string()))
    }
}

/// How a credential slot was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Literal string in config (no ${} references)
    Literal,
    /// Contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Picked up from the slot's conventional env var (holds var name)
    Convention(String),
    /// Nothing configured
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{slot}': {message}")]
    EnvVar {
        var: String,
        slot: String,
        message: String,
    },
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Secret values containing `${VAR}` are expanded; absent secrets fall back
    /// to their conventional variable (e.g. `XAI_API_KEY`). Returns the config
    /// and the source of every credential slot.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = read_file(path.as_ref())?;
        let mut config = Self::parse_str(&content)?;
        let sources = config.resolve_secrets_with(|name| std::env::var(name).ok())?;
        Ok((config, sources))
    }

    fn resolve_secrets_with<F>(&mut self, lookup: F) -> Result<Vec<(String, KeySource)>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backends = &mut self.backends;
        let slots: [(&str, &str, &mut Option<Secret>); 7] = [
            ("chatgpt.access_token", "CHATGPT_ACCESS_TOKEN", &mut backends.chatgpt.access_token),
            ("chatgpt.account_id", "CHATGPT_ACCOUNT_ID", &mut backends.chatgpt.account_id),
            ("chatgpt.id_token", "CHATGPT_ID_TOKEN", &mut backends.chatgpt.id_token),
            ("grok.api_key", "XAI_API_KEY", &mut backends.grok.api_key),
            ("openrouter.api_key", "OPENROUTER_API_KEY", &mut backends.openrouter.api_key),
            ("qwen.auth_token", "QWEN_AUTH_TOKEN", &mut backends.qwen.auth_token),
            ("qwen.cookies", "QWEN_COOKIES", &mut backends.qwen.cookies),
        ];

        let mut sources = Vec::with_capacity(slots.len());
        for (slot, convention, value) in slots {
            let source = match value.as_ref().map(|s| s.expose_secret().to_string()) {
                Some(raw) if raw.contains("${") => {
                    *value = Some(Secret::from(expand_env_vars_with(&raw, slot, &lookup)?));
                    KeySource::EnvExpanded
                }
                Some(_) => KeySource::Literal,
                None => match lookup(convention).filter(|v| !v.is_empty()) {
                    Some(found) => {
                        *value = Some(Secret::from(found));
                        KeySource::Convention(convention.to_string())
                    }
                    None => KeySource::None,
                },
            };
            sources.push((slot.to_string(), source));
        }
        Ok(sources)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.admission.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "admission.max_concurrency must be at least 1".to_string(),
            ));
        }

        let urls = [
            ("chatgpt", &self.backends.chatgpt.url),
            ("grok", &self.backends.grok.url),
            ("openrouter", &self.backends.openrouter.url),
            ("qwen", &self.backends.qwen.url),
        ];
        for (name, url) in urls {
            if url.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Backend '{}' has empty URL",
                    name
                )));
            }
        }

        if self.admission.rate_limit_rps == 0 {
            tracing::warn!("Rate limiting disabled (admission.rate_limit_rps = 0)");
        }

        Ok(())
    }

    /// Load the base instructions sent with every ChatGPT request.
    ///
    /// An explicit `instructions_path` must exist and be non-empty. Without one,
    /// `prompt.md` in the working directory is used if present, else the empty string.
    pub fn load_base_instructions(&self) -> Result<String, ConfigError> {
        if let Some(path) = &self.prompt.instructions_path {
            let content = read_file(Path::new(path))?;
            if content.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Base prompt file '{}' is empty",
                    path
                )));
            }
            return Ok(content);
        }

        match std::fs::read_to_string("prompt.md") {
            Ok(content) if !content.trim().is_empty() => Ok(content),
            _ => {
                tracing::warn!("No base instructions found; sending empty instructions");
                Ok(String::new())
            }
        }
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple references in one string. Fails on the first missing
/// variable, an unclosed `${`, or an empty variable name.
fn expand_env_vars_with<F>(input: &str, slot: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            slot: slot.to_string(),
            message: "Unclosed '${' in config value".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: String::new(),
                slot: slot.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            slot: slot.to_string(),
            message: format!("'{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_str("").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8000");
        assert_eq!(config.server.default_backend, BackendKind::Chatgpt);
        assert_eq!(config.admission.max_concurrency, 1);
        assert_eq!(config.admission.queue_limit, 100);
        assert_eq!(config.admission.burst(), 16);
        assert_eq!(config.reasoning.compat, ReasoningCompat::ThinkTags);
        assert_eq!(config.backends.chatgpt.url, CHATGPT_RESPONSES_URL);
        assert!(config.prompt.inject_base_prompt);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:9000"
            default_backend = "qwen"
            default_model = "qwen3-max-preview"

            [admission]
            max_concurrency = 4
            queue_limit = 10
            queue_timeout_secs = 5
            rate_limit_rps = 0

            [reasoning]
            effort = "high"
            summary = "none"
            compat = "o3"

            [backends.grok]
            api_key = "xai-literal"
            model = "grok-2"

            [backends.qwen]
            chat_id = "abc"
        "#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(config.server.default_backend, BackendKind::Qwen);
        assert_eq!(config.admission.max_concurrency, 4);
        assert_eq!(config.admission.queue_timeout(), Duration::from_secs(5));
        assert_eq!(config.reasoning.compat, ReasoningCompat::O3);
        assert_eq!(config.backends.grok.model, "grok-2");
        assert_eq!(
            config.backends.grok.api_key.as_ref().unwrap().expose_secret(),
            "xai-literal"
        );
        assert_eq!(config.backends.qwen.chat_id, "abc");
        assert_eq!(config.backends.qwen.url, QWEN_URL);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = Config::parse_str("[admission]\nmax_concurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_unknown_compat_rejected() {
        assert!(Config::parse_str("[reasoning]\ncompat = \"xml\"\n").is_err());
        assert_eq!(
            "Think-Tags".parse::<ReasoningCompat>().unwrap(),
            ReasoningCompat::ThinkTags
        );
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("OpenRouter".parse::<BackendKind>(), Ok(BackendKind::Openrouter));
        let err = "claude".parse::<BackendKind>().unwrap_err();
        assert!(err.contains("Invalid provider: claude"));
    }

    #[test]
    fn test_secret_redaction() {
        let secret = Secret::from("sk-super-secret");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[REDACTED]\"");
        assert_eq!(secret.expose_secret(), "sk-super-secret");

        let config = Config::parse_str("[backends.qwen]\ncookies = \"session=abc123\"\n").unwrap();
        let debug = format!("{:?}", config.backends.qwen);
        assert!(!debug.contains("abc123"));
    }

    #[test]
    fn test_expand_multiple_vars() {
        let lookup = |name: &str| match name {
            "A" => Some("one".to_string()),
            "B" => Some("two".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${A}-${B}-tail", "slot", lookup).unwrap();
        assert_eq!(result, "one-two-tail");
    }

    #[test]
    fn test_expand_failures() {
        let lookup = |_: &str| None;
        let err = expand_env_vars_with("${MISSING}", "grok.api_key", lookup)
            .unwrap_err()
            .to_string();
        assert!(err.contains("MISSING"));
        assert!(err.contains("grok.api_key"));

        let err = expand_env_vars_with("${OPEN", "slot", lookup).unwrap_err().to_string();
        assert!(err.to_lowercase().contains("unclosed"));

        let err = expand_env_vars_with("${}", "slot", lookup).unwrap_err().to_string();
        assert!(err.to_lowercase().contains("empty"));
    }

    #[test]
    fn test_resolve_secrets_sources() {
        let mut config = Config::parse_str(
            r#"
            [backends.grok]
            api_key = "literal"

            [backends.openrouter]
            api_key = "${OR_KEY}"
            "#,
        )
        .unwrap();

        let lookup = |name: &str| match name {
            "OR_KEY" => Some("or-expanded".to_string()),
            "QWEN_COOKIES" => Some("c=1".to_string()),
            _ => None,
        };
        let sources = config.resolve_secrets_with(lookup).unwrap();
        let source_of = |slot: &str| {
            sources
                .iter()
                .find(|(name, _)| name == slot)
                .map(|(_, s)| s.clone())
                .unwrap()
        };

        assert_eq!(source_of("grok.api_key"), KeySource::Literal);
        assert_eq!(source_of("openrouter.api_key"), KeySource::EnvExpanded);
        assert_eq!(
            source_of("qwen.cookies"),
            KeySource::Convention("QWEN_COOKIES".to_string())
        );
        assert_eq!(source_of("qwen.auth_token"), KeySource::None);
        assert_eq!(
            config.backends.openrouter.api_key.unwrap().expose_secret(),
            "or-expanded"
        );
    }
}
