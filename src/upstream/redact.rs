//! Redaction of credentials from text bound for the logs.

use regex::Regex;
use std::sync::LazyLock;

static SECRET_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"(authorization|cookie|token|access_token|id_token|api_key)"\s*:\s*"[^"]*""#)
        .expect("valid secret-field pattern")
});

static BEARER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bBearer\s+[^\s"]+"#).expect("valid bearer pattern")
});

/// Mask authorization/cookie/token JSON fields and bearer tokens.
pub fn redact(message: &str) -> String {
    let masked = SECRET_FIELDS.replace_all(message, r#""$1": "[REDACTED]""#);
    BEARER.replace_all(&masked, "Bearer [REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_json_fields() {
        let input = r#"{"Authorization": "Bearer abc.def", "cookie":"sid=1; x=2", "token": "t0k", "model": "qwen"}"#;
        let output = redact(input);
        assert!(!output.contains("abc.def"));
        assert!(!output.contains("sid=1"));
        assert!(!output.contains("t0k"));
        assert!(output.contains(r#""Authorization": "[REDACTED]""#));
        assert!(output.contains(r#""model": "qwen""#));
    }

    #[test]
    fn test_redacts_bearer_in_text() {
        let output = redact("request failed: header Bearer sk-live-123 rejected");
        assert_eq!(output, "request failed: header Bearer [REDACTED] rejected");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(redact("connection refused"), "connection refused");
    }
}
