//! Upstream event translators.
//!
//! Each translator turns upstream SSE payloads into OpenAI-compatible
//! chunk events for one response surface (chat or text completion):
//! - [`ResponsesTranslator`]: ChatGPT Responses-API events, including
//!   reasoning (per [`ReasoningCompat`]) and tool calls
//! - [`OpenAiTranslator`]: OpenAI-shaped chunks (Grok, OpenRouter)
//! - [`QwenTranslator`]: Qwen `{content, finished}` events
//!
//! The terminating `data: [DONE]` is written by the stream, not here.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};

use super::types::{
    ChatCompletionChunk, ChunkChoice, Delta, FunctionDelta, TextChoice, TextCompletionChunk,
    ToolCallDelta, Usage,
};
use crate::config::ReasoningCompat;

/// Whether to keep reading after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finish,
}

/// Re-encodes upstream payloads into client events.
pub trait EventTranslator: Send {
    /// Handle one `data:` payload other than `[DONE]`.
    fn on_data(&mut self, data: &str, out: &mut Vec<Bytes>) -> Flow;

    /// Upstream sent `data: [DONE]`.
    fn on_done_marker(&mut self, _out: &mut Vec<Bytes>) -> Flow {
        Flow::Finish
    }

    /// Last chance to emit before the terminator, on every exit path.
    fn on_end(&mut self, _out: &mut Vec<Bytes>) {}
}

/// Which OpenAI response shape to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Chat,
    Text,
}

/// Encode one SSE event.
pub fn sse_event<T: Serialize>(value: &T) -> Bytes {
    match serde_json::to_string(value) {
        Ok(json) => Bytes::from(format!("data: {}\n\n", json)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream chunk");
            Bytes::new()
        }
    }
}

/// Inline `{"error":{"message":...}}` event.
pub fn error_event(message: &str) -> Bytes {
    sse_event(&json!({"error": {"message": message}}))
}

/// Builds chunks of one surface with a shared id/model/created.
#[derive(Debug, Clone)]
struct ChunkWriter {
    surface: Surface,
    id: String,
    model: String,
    created: i64,
}

impl ChunkWriter {
    fn chat(&self, delta: Delta, finish_reason: Option<&str>, usage: Option<Usage>) -> Bytes {
        sse_event(&ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage,
        })
    }

    fn text(&self, text: &str, finish_reason: Option<&str>, usage: Option<Usage>) -> Bytes {
        sse_event(&TextCompletionChunk {
            id: self.id.clone(),
            object: "text_completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![TextChoice {
                index: 0,
                text: text.to_string(),
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage,
        })
    }

    fn content(&self, content: &str) -> Bytes {
        match self.surface {
            Surface::Chat => self.chat(Delta::content(content), None, None),
            Surface::Text => self.text(content, None, None),
        }
    }

    fn finish(&self, reason: &str) -> Bytes {
        match self.surface {
            Surface::Chat => self.chat(Delta::default(), Some(reason), None),
            Surface::Text => self.text("", Some(reason), None),
        }
    }

    fn usage(&self, usage: Usage) -> Bytes {
        match self.surface {
            Surface::Chat => self.chat(Delta::default(), None, Some(usage)),
            Surface::Text => self.text("", None, Some(usage)),
        }
    }
}

/// Progress of the synthetic `<think>` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkState {
    #[default]
    Closed,
    Open,
    Done,
}

/// Per-stream translation state.
#[derive(Debug, Default)]
pub struct StreamState {
    pub think: ThinkState,
    pub saw_any_summary: bool,
    /// A paragraph break is owed before the next summary delta
    pub pending_paragraph: bool,
    pub usage: Option<Usage>,
}

/// Responses-API events to chat or text-completion chunks.
///
/// The text surface only carries output text; reasoning and tool-call
/// events are dropped there.
pub struct ResponsesTranslator {
    writer: ChunkWriter,
    compat: ReasoningCompat,
    include_usage: bool,
    state: StreamState,
    stop_sent: bool,
}

impl ResponsesTranslator {
    pub fn new(
        surface: Surface,
        model: impl Into<String>,
        created: i64,
        compat: ReasoningCompat,
        include_usage: bool,
    ) -> Self {
        let id = match surface {
            Surface::Chat => "chatcmpl-stream",
            Surface::Text => "cmpl-stream",
        };
        Self {
            writer: ChunkWriter {
                surface,
                id: id.to_string(),
                model: model.into(),
                created,
            },
            compat,
            include_usage,
            state: StreamState::default(),
            stop_sent: false,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    fn close_think(&mut self, out: &mut Vec<Bytes>) {
        if self.state.think == ThinkState::Open {
            out.push(self.writer.content("</think>"));
            self.state.think = ThinkState::Done;
        }
    }

    fn on_reasoning(&mut self, summary: bool, text: &str, out: &mut Vec<Bytes>) {
        let owes_break = summary && self.state.pending_paragraph;

        match self.compat {
            ReasoningCompat::O3 => {
                if owes_break {
                    out.push(self.writer.chat(o3_reasoning("\n"), None, None));
                    self.state.pending_paragraph = false;
                }
                out.push(self.writer.chat(o3_reasoning(text), None, None));
            }
            ReasoningCompat::ThinkTags => {
                if self.state.think == ThinkState::Closed {
                    out.push(self.writer.content("<think>"));
                    self.state.think = ThinkState::Open;
                }
                if self.state.think == ThinkState::Open {
                    if owes_break {
                        out.push(self.writer.content("\n"));
                        self.state.pending_paragraph = false;
                    }
                    out.push(self.writer.content(text));
                }
            }
            ReasoningCompat::Legacy | ReasoningCompat::Current => {
                let delta = Delta {
                    reasoning: Some(Value::String(text.to_string())),
                    reasoning_summary: summary.then(|| text.to_string()),
                    ..Delta::default()
                };
                out.push(self.writer.chat(delta, None, None));
            }
        }
    }

    fn on_output_item_done(&self, event: &Value, out: &mut Vec<Bytes>) {
        let Some(item) = event.get("item").filter(|i| i.get("type") == Some(&json!("function_call")))
        else {
            return;
        };
        let field = |key: &str| item.get(key).and_then(Value::as_str);
        let call_id = field("call_id").or_else(|| field("id")).unwrap_or_default();
        let name = field("name").unwrap_or_default();
        let arguments = field("arguments").unwrap_or_default();

        let delta = Delta {
            tool_calls: Some(vec![ToolCallDelta {
                index: 0,
                id: call_id.to_string(),
                kind: "function".to_string(),
                function: FunctionDelta {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            ..Delta::default()
        };
        out.push(self.writer.chat(delta, None, None));
        out.push(self.writer.finish("tool_calls"));
    }
}

fn o3_reasoning(text: &str) -> Delta {
    Delta {
        reasoning: Some(json!({"content": [{"type": "text", "text": text}]})),
        ..Delta::default()
    }
}

impl EventTranslator for ResponsesTranslator {
    fn on_data(&mut self, data: &str, out: &mut Vec<Bytes>) -> Flow {
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            tracing::debug!("Skipping malformed upstream event");
            return Flow::Continue;
        };

        if let Some(id) = event
            .get("response")
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            self.writer.id = id.to_string();
        }

        let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
        let chat = self.writer.surface == Surface::Chat;

        match kind {
            "response.output_text.delta" => {
                self.close_think(out);
                out.push(self.writer.content(delta));
            }
            "response.output_item.done" if chat => self.on_output_item_done(&event, out),
            "response.reasoning_summary_part.added" => {
                if self.state.saw_any_summary {
                    self.state.pending_paragraph = true;
                } else {
                    self.state.saw_any_summary = true;
                }
            }
            "response.reasoning_summary_text.delta" if chat => self.on_reasoning(true, delta, out),
            "response.reasoning_text.delta" if chat => self.on_reasoning(false, delta, out),
            "response.output_text.done" => {
                out.push(self.writer.finish("stop"));
                self.stop_sent = true;
            }
            "response.failed" => {
                let message = event
                    .get("response")
                    .and_then(|r| r.get("error"))
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("response.failed");
                tracing::warn!(message, "Upstream reported response.failed");
                out.push(error_event(message));
            }
            "response.completed" => {
                if let Some(usage) = Usage::from_responses_event(&event) {
                    self.state.usage = Some(usage);
                }
                self.close_think(out);
                if self.include_usage {
                    if let Some(usage) = self.state.usage {
                        out.push(self.writer.usage(usage));
                    }
                }
                return Flow::Finish;
            }
            _ => {}
        }
        Flow::Continue
    }

    fn on_done_marker(&mut self, out: &mut Vec<Bytes>) -> Flow {
        if self.writer.surface == Surface::Text && !self.stop_sent {
            out.push(self.writer.finish("stop"));
            self.stop_sent = true;
        }
        Flow::Finish
    }

    fn on_end(&mut self, out: &mut Vec<Bytes>) {
        self.close_think(out);
    }
}

/// OpenAI-shaped upstream chunks (Grok, OpenRouter), re-encoded so every
/// event carries a full chunk envelope.
pub struct OpenAiTranslator {
    writer: ChunkWriter,
    include_usage: bool,
}

impl OpenAiTranslator {
    pub fn new(surface: Surface, model: impl Into<String>, created: i64, include_usage: bool) -> Self {
        let id = match surface {
            Surface::Chat => format!("chatcmpl-{}", created),
            Surface::Text => format!("cmpl-{}", created),
        };
        Self {
            writer: ChunkWriter {
                surface,
                id,
                model: model.into(),
                created,
            },
            include_usage,
        }
    }
}

impl EventTranslator for OpenAiTranslator {
    fn on_data(&mut self, data: &str, out: &mut Vec<Bytes>) -> Flow {
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            tracing::debug!("Skipping malformed upstream chunk");
            return Flow::Continue;
        };

        if let Some(id) = chunk.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) {
            self.writer.id = id.to_string();
        }
        if let Some(message) = chunk
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            out.push(error_event(message));
            return Flow::Continue;
        }

        let choice = chunk.get("choices").and_then(|c| c.get(0));
        let content = choice
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .or_else(|| choice.and_then(|c| c.get("text")).and_then(Value::as_str))
            .filter(|text| !text.is_empty());
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str);

        if let Some(content) = content {
            out.push(self.writer.content(content));
        }
        if let Some(reason) = finish_reason {
            out.push(self.writer.finish(reason));
        }
        if self.include_usage {
            if let Some(usage) = Usage::from_openai(&chunk) {
                out.push(self.writer.usage(usage));
            }
        }
        Flow::Continue
    }
}

/// Qwen `{content, finished}` events.
pub struct QwenTranslator {
    writer: ChunkWriter,
    finished: bool,
}

impl QwenTranslator {
    pub fn new(surface: Surface, model: impl Into<String>, created: i64) -> Self {
        Self {
            writer: ChunkWriter {
                surface,
                id: format!("chatcmpl-qwen-{}", created),
                model: model.into(),
                created,
            },
            finished: false,
        }
    }

    fn stop(&mut self, out: &mut Vec<Bytes>) -> Flow {
        if !self.finished {
            out.push(self.writer.finish("stop"));
            self.finished = true;
        }
        Flow::Finish
    }
}

impl EventTranslator for QwenTranslator {
    fn on_data(&mut self, data: &str, out: &mut Vec<Bytes>) -> Flow {
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            tracing::warn!(preview = %data.chars().take(100).collect::<String>(), "Failed to parse Qwen stream data");
            return Flow::Continue;
        };

        let content = event.get("content").and_then(Value::as_str).unwrap_or_default();
        let finished = event.get("finished").and_then(Value::as_bool).unwrap_or(false);
        tracing::trace!(content_len = content.len(), finished, "Qwen chunk");

        if !content.is_empty() {
            out.push(self.writer.content(content));
        }
        if finished {
            return self.stop(out);
        }
        Flow::Continue
    }

    fn on_done_marker(&mut self, out: &mut Vec<Bytes>) -> Flow {
        self.stop(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(translator: &mut dyn EventTranslator, events: &[Value]) -> (Vec<Value>, Flow) {
        let mut out = Vec::new();
        let mut flow = Flow::Continue;
        for event in events {
            flow = translator.on_data(&event.to_string(), &mut out);
            if flow == Flow::Finish {
                break;
            }
        }
        if flow == Flow::Continue {
            translator.on_end(&mut out);
        }
        (out.iter().map(parse_event).collect(), flow)
    }

    fn parse_event(bytes: &Bytes) -> Value {
        let text = std::str::from_utf8(bytes).unwrap();
        let json = text.strip_prefix("data: ").unwrap().trim_end();
        serde_json::from_str(json).unwrap()
    }

    fn contents(chunks: &[Value]) -> Vec<&str> {
        chunks
            .iter()
            .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
            .collect()
    }

    fn chat(compat: ReasoningCompat, include_usage: bool) -> ResponsesTranslator {
        ResponsesTranslator::new(Surface::Chat, "gpt-5", 1_700_000_000, compat, include_usage)
    }

    #[test]
    fn test_think_tags_sequence() {
        let mut translator = chat(ReasoningCompat::ThinkTags, false);
        let (chunks, flow) = run(
            &mut translator,
            &[
                json!({"type": "response.reasoning_text.delta", "delta": "a"}),
                json!({"type": "response.output_text.delta", "delta": "b"}),
                json!({"type": "response.output_text.done"}),
                json!({"type": "response.completed", "response": {}}),
            ],
        );
        assert_eq!(flow, Flow::Finish);
        assert_eq!(contents(&chunks), vec!["<think>", "a", "</think>", "b"]);
        assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
        assert_eq!(translator.state().think, ThinkState::Done);
    }

    #[test]
    fn test_think_tags_paragraph_breaks_and_late_reasoning_dropped() {
        let mut translator = chat(ReasoningCompat::ThinkTags, false);
        let (chunks, _) = run(
            &mut translator,
            &[
                json!({"type": "response.reasoning_summary_part.added"}),
                json!({"type": "response.reasoning_summary_text.delta", "delta": "one"}),
                json!({"type": "response.reasoning_summary_part.added"}),
                json!({"type": "response.reasoning_summary_text.delta", "delta": "two"}),
                json!({"type": "response.output_text.delta", "delta": "answer"}),
                json!({"type": "response.reasoning_text.delta", "delta": "late"}),
            ],
        );
        assert_eq!(
            contents(&chunks),
            vec!["<think>", "one", "\n", "two", "</think>", "answer"]
        );
    }

    #[test]
    fn test_think_block_closed_on_completion() {
        let mut translator = chat(ReasoningCompat::ThinkTags, false);
        let (chunks, _) = run(
            &mut translator,
            &[
                json!({"type": "response.reasoning_text.delta", "delta": "only thinking"}),
                json!({"type": "response.completed", "response": {}}),
            ],
        );
        assert_eq!(contents(&chunks), vec!["<think>", "only thinking", "</think>"]);
    }

    #[test]
    fn test_o3_structured_reasoning() {
        let mut translator = chat(ReasoningCompat::O3, false);
        let (chunks, _) = run(
            &mut translator,
            &[
                json!({"type": "response.reasoning_summary_part.added"}),
                json!({"type": "response.reasoning_summary_text.delta", "delta": "x"}),
                json!({"type": "response.reasoning_summary_part.added"}),
                json!({"type": "response.reasoning_summary_text.delta", "delta": "y"}),
            ],
        );
        let texts: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c["choices"][0]["delta"]["reasoning"]["content"][0]["text"].as_str())
            .collect();
        assert_eq!(texts, vec!["x", "\n", "y"]);
        assert!(contents(&chunks).is_empty());
    }

    #[test]
    fn test_legacy_reasoning_fields() {
        let mut translator = chat(ReasoningCompat::Legacy, false);
        let (chunks, _) = run(
            &mut translator,
            &[
                json!({"type": "response.reasoning_summary_text.delta", "delta": "sum"}),
                json!({"type": "response.reasoning_text.delta", "delta": "raw"}),
            ],
        );
        assert_eq!(
            chunks[0]["choices"][0]["delta"],
            json!({"reasoning": "sum", "reasoning_summary": "sum"})
        );
        assert_eq!(chunks[1]["choices"][0]["delta"], json!({"reasoning": "raw"}));
    }

    #[test]
    fn test_tool_call_then_finish() {
        let mut translator = chat(ReasoningCompat::ThinkTags, false);
        let (chunks, _) = run(
            &mut translator,
            &[json!({
                "type": "response.output_item.done",
                "item": {"type": "function_call", "call_id": "call_1", "name": "lookup", "arguments": "{\"q\":1}"}
            })],
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0]["choices"][0]["delta"]["tool_calls"][0],
            json!({"index": 0, "id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":1}"}})
        );
        assert_eq!(chunks[1]["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn test_response_id_and_usage_chunk() {
        let mut translator = chat(ReasoningCompat::Current, true);
        let (chunks, _) = run(
            &mut translator,
            &[
                json!({"type": "response.created", "response": {"id": "resp_abc"}}),
                json!({"type": "response.output_text.delta", "delta": "hi"}),
                json!({"type": "response.completed", "response": {"id": "resp_abc", "usage": {"input_tokens": 2, "output_tokens": 3}}}),
            ],
        );
        assert!(chunks.iter().all(|c| c["id"] == "resp_abc"));
        let usage_chunk = chunks.last().unwrap();
        assert_eq!(usage_chunk["usage"]["total_tokens"], 5);
        assert_eq!(usage_chunk["choices"][0]["delta"], json!({}));
        assert_eq!(usage_chunk["choices"][0]["finish_reason"], Value::Null);
    }

    #[test]
    fn test_usage_omitted_unless_requested() {
        let mut translator = chat(ReasoningCompat::Current, false);
        let (chunks, _) = run(
            &mut translator,
            &[json!({"type": "response.completed", "response": {"usage": {"input_tokens": 2, "output_tokens": 3}}})],
        );
        assert!(chunks.is_empty());
        assert_eq!(translator.state().usage.unwrap().prompt_tokens, 2);
    }

    #[test]
    fn test_failed_emits_error_and_continues() {
        let mut translator = chat(ReasoningCompat::Current, false);
        let (chunks, flow) = run(
            &mut translator,
            &[
                json!({"type": "response.failed", "response": {"error": {"message": "quota"}}}),
                json!({"type": "response.output_text.delta", "delta": "still here"}),
            ],
        );
        assert_eq!(flow, Flow::Continue);
        assert_eq!(chunks[0], json!({"error": {"message": "quota"}}));
        assert_eq!(contents(&chunks), vec!["still here"]);
    }

    #[test]
    fn test_malformed_and_other_done_events_ignored() {
        let mut translator = chat(ReasoningCompat::Current, false);
        let mut out = Vec::new();
        assert_eq!(translator.on_data("{not json", &mut out), Flow::Continue);
        assert_eq!(
            translator.on_data(r#"{"type":"response.content_part.done"}"#, &mut out),
            Flow::Continue
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_text_surface() {
        let mut translator =
            ResponsesTranslator::new(Surface::Text, "gpt-5", 1, ReasoningCompat::ThinkTags, false);
        let (chunks, _) = run(
            &mut translator,
            &[
                json!({"type": "response.reasoning_text.delta", "delta": "hidden"}),
                json!({"type": "response.output_text.delta", "delta": "Hi"}),
                json!({"type": "response.output_text.done"}),
            ],
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0]["object"], "text_completion.chunk");
        assert_eq!(chunks[0]["choices"][0]["text"], "Hi");
        assert_eq!(chunks[1]["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_text_surface_done_marker_emits_single_stop() {
        let mut translator =
            ResponsesTranslator::new(Surface::Text, "gpt-5", 1, ReasoningCompat::ThinkTags, false);
        let mut out = Vec::new();
        translator.on_data(
            r#"{"type":"response.output_text.delta","delta":"Hi"}"#,
            &mut out,
        );
        assert_eq!(translator.on_done_marker(&mut out), Flow::Finish);

        let chunks: Vec<Value> = out.iter().map(parse_event).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1]["choices"][0]["text"], "");
        assert_eq!(chunks[1]["choices"][0]["finish_reason"], "stop");

        let mut again = Vec::new();
        let mut translator =
            ResponsesTranslator::new(Surface::Text, "gpt-5", 1, ReasoningCompat::ThinkTags, false);
        translator.on_data(r#"{"type":"response.output_text.done"}"#, &mut again);
        translator.on_done_marker(&mut again);
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_chat_surface_done_marker_adds_nothing() {
        let mut translator = chat(ReasoningCompat::ThinkTags, false);
        let mut out = Vec::new();
        assert_eq!(translator.on_done_marker(&mut out), Flow::Finish);
        assert!(out.is_empty());
    }

    #[test]
    fn test_openai_passthrough() {
        let mut translator = OpenAiTranslator::new(Surface::Chat, "grok-beta", 5, false);
        let (chunks, _) = run(
            &mut translator,
            &[
                json!({"id": "x1", "choices": [{"index": 0, "delta": {"role": "assistant"}}]}),
                json!({"id": "x1", "choices": [{"index": 0, "delta": {"content": "Hey"}}]}),
                json!({"id": "x1", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
            ],
        );
        assert_eq!(contents(&chunks), vec!["Hey"]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1]["choices"][0]["finish_reason"], "stop");
        assert!(chunks.iter().all(|c| c["id"] == "x1" && c["model"] == "grok-beta"));
    }

    #[test]
    fn test_openai_passthrough_text_surface() {
        let mut translator = OpenAiTranslator::new(Surface::Text, "sonoma/sky", 5, false);
        let (chunks, _) = run(
            &mut translator,
            &[json!({"choices": [{"delta": {"content": "abc"}}]})],
        );
        assert_eq!(chunks[0]["choices"][0]["text"], "abc");
    }

    #[test]
    fn test_qwen_content_then_finished() {
        let mut translator = QwenTranslator::new(Surface::Chat, "qwen3", 9);
        let (chunks, flow) = run(
            &mut translator,
            &[
                json!({"content": "Ni", "finished": false}),
                json!({"content": 7}),
                json!({"content": "hao", "finished": true}),
                json!({"content": "after"}),
            ],
        );
        assert_eq!(flow, Flow::Finish);
        assert_eq!(contents(&chunks), vec!["Ni", "hao"]);
        assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
        assert_eq!(chunks[0]["id"], "chatcmpl-qwen-9");
    }

    #[test]
    fn test_qwen_done_marker_finishes_once() {
        let mut translator = QwenTranslator::new(Surface::Chat, "qwen3", 9);
        let mut out = Vec::new();
        assert_eq!(translator.on_done_marker(&mut out), Flow::Finish);
        assert_eq!(translator.on_done_marker(&mut out), Flow::Finish);
        assert_eq!(out.len(), 1);
    }
}
