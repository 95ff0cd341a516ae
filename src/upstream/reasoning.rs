//! Reasoning parameters and model-name handling for the ChatGPT backend.

use serde::Serialize;
use serde_json::Value;

use crate::config::ReasoningConfig;

const EFFORTS: [&str; 4] = ["minimal", "low", "medium", "high"];
const SUMMARIES: [&str; 4] = ["auto", "concise", "detailed", "none"];
const DEFAULT_MODEL: &str = "gpt-5";

/// `reasoning` object sent upstream. `summary` is omitted when set to `none`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasoningParam {
    pub effort: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Split a trailing effort suffix off a model name: `gpt-5-high` -> (`gpt-5`, `high`).
pub fn split_effort_suffix(model: &str) -> (&str, Option<&'static str>) {
    let trimmed = model.trim();
    for effort in EFFORTS {
        for sep in ['-', ':', '_'] {
            if let Some(base) = trimmed
                .strip_suffix(effort)
                .and_then(|rest| rest.strip_suffix(sep))
                .filter(|base| !base.is_empty())
            {
                return (base, Some(effort));
            }
        }
    }
    (trimmed, None)
}

fn known(value: Option<&str>, allowed: &[&str]) -> Option<String> {
    let value = value?.trim().to_ascii_lowercase();
    allowed.contains(&value.as_str()).then_some(value)
}

/// Resolve effort and summary: request `reasoning` object first, then the
/// model-name suffix, then configuration. Unknown values are ignored.
pub fn build_reasoning_param(
    defaults: &ReasoningConfig,
    request: Option<&Value>,
    model: Option<&str>,
) -> ReasoningParam {
    let from_request = |key: &str| request.and_then(|r| r.get(key)).and_then(Value::as_str);
    let model_effort = model.and_then(|m| split_effort_suffix(m).1);

    let effort = known(from_request("effort"), &EFFORTS)
        .or_else(|| model_effort.map(str::to_string))
        .or_else(|| known(Some(defaults.effort.as_str()), &EFFORTS))
        .unwrap_or_else(|| "medium".to_string());
    let summary = known(from_request("summary"), &SUMMARIES)
        .or_else(|| known(Some(defaults.summary.as_str()), &SUMMARIES))
        .unwrap_or_else(|| "auto".to_string());

    ReasoningParam {
        effort,
        summary: (summary != "none").then_some(summary),
    }
}

/// Model name sent upstream. `debug_model`, when set, replaces whatever was requested.
pub fn normalize_model_name(model: &str, debug_model: Option<&str>) -> String {
    if let Some(forced) = debug_model.map(str::trim).filter(|m| !m.is_empty()) {
        return forced.to_string();
    }

    let (base, _) = split_effort_suffix(model);
    match base.to_ascii_lowercase().as_str() {
        "" | "gpt5" | "gpt-5-latest" => DEFAULT_MODEL.to_string(),
        "codex" => "codex-mini-latest".to_string(),
        _ => base.to_string(),
    }
}
