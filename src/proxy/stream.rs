//! SSE framing and the translated response stream.
//!
//! [`SseLineBuffer`] reassembles `data:` payloads across TCP chunk
//! boundaries. [`TranslatedStream`] drives an [`EventTranslator`] over an
//! upstream byte stream and owns the request's admission [`Permit`], so the
//! slot is returned however the stream ends, including client disconnect.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::translate::{error_event, EventTranslator, Flow};
use super::types::Usage;
use crate::admission::Permit;

/// Unterminated lines longer than this are discarded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const DONE_MARKER: &str = "[DONE]";
const DONE_EVENT: &[u8] = b"data: [DONE]\n\n";

/// Line buffer yielding the payloads of complete `data:` lines.
///
/// Accepts LF and CRLF endings and `data:` with or without a following
/// space. Other SSE fields (`event:`, `id:`, comments) are skipped.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
    /// Dropping the rest of an over-long line until its newline arrives
    discarding: bool,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes and collect the payloads it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut payloads = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }
            self.buffer.extend_from_slice(line);
            payloads.extend(data_payload(&self.buffer));
            self.buffer.clear();
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > MAX_LINE_BYTES {
                tracing::warn!(
                    buffered = self.buffer.len(),
                    "SSE line exceeds {} bytes, discarding",
                    MAX_LINE_BYTES
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        payloads
    }

    /// Flush a final line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let payload = if self.discarding {
            None
        } else {
            data_payload(&self.buffer)
        };
        self.buffer.clear();
        self.discarding = false;
        payload
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches('\r').strip_prefix("data:")?.trim();
    (!data.is_empty()).then(|| data.to_string())
}

/// OpenAI-compatible chunk stream translated from an upstream SSE body.
///
/// Always ends with exactly one `data: [DONE]`. On finish (or drop) the
/// upstream body is dropped, closing the connection, and the permit is
/// released.
pub struct TranslatedStream<S> {
    upstream: Option<Pin<Box<S>>>,
    lines: SseLineBuffer,
    translator: Box<dyn EventTranslator>,
    pending: VecDeque<Bytes>,
    permit: Option<Permit>,
    finished: bool,
}

impl<S, E> TranslatedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    pub fn new(upstream: S, translator: Box<dyn EventTranslator>, permit: Option<Permit>) -> Self {
        Self {
            upstream: Some(Box::pin(upstream)),
            lines: SseLineBuffer::new(),
            translator,
            pending: VecDeque::new(),
            permit,
            finished: false,
        }
    }

    fn handle_payload(&mut self, payload: &str) -> Flow {
        let mut out = Vec::new();
        let flow = if payload == DONE_MARKER {
            self.translator.on_done_marker(&mut out)
        } else {
            self.translator.on_data(payload, &mut out)
        };
        self.pending.extend(out);
        flow
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        let mut out = Vec::new();
        self.translator.on_end(&mut out);
        self.pending.extend(out);
        self.pending.push_back(Bytes::from_static(DONE_EVENT));
        self.finished = true;
        self.upstream = None;
        if let Some(mut permit) = self.permit.take() {
            permit.release();
        }
    }
}

impl<S, E> Stream for TranslatedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(bytes) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(bytes)));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            let Some(upstream) = this.upstream.as_mut() else {
                this.finish();
                continue;
            };

            match upstream.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(bytes))) => {
                    for payload in this.lines.push(&bytes) {
                        if this.handle_payload(&payload) == Flow::Finish {
                            this.finish();
                            break;
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Upstream stream failed mid-response");
                    this.pending
                        .push_back(error_event(&format!("Upstream stream error: {}", e)));
                    this.finish();
                }
                Poll::Ready(None) => {
                    if let Some(payload) = this.lines.finish() {
                        this.handle_payload(&payload);
                    }
                    this.finish();
                }
            }
        }
    }
}

/// Collect the `response.output_text.delta` text of a Responses-API stream.
///
/// Reading stops at `[DONE]`, `response.completed` or end of stream. Usage
/// is returned when the completion event carried it.
pub async fn accumulate_output_text<S, E>(upstream: S) -> Result<(String, Option<Usage>), E>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut lines = SseLineBuffer::new();
    let mut text = String::new();
    let mut usage = None;

    let mut on_payload = |payload: &str| -> bool {
        if payload == DONE_MARKER {
            return false;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(payload) else {
            return true;
        };
        match event.get("type").and_then(|t| t.as_str()) {
            Some("response.output_text.delta") => {
                if let Some(delta) = event.get("delta").and_then(|d| d.as_str()) {
                    text.push_str(delta);
                }
                true
            }
            Some("response.completed") => {
                usage = Usage::from_responses_event(&event);
                false
            }
            _ => true,
        }
    };

    let mut ended = false;
    'read: while let Some(chunk) = upstream.next().await {
        for payload in lines.push(&chunk?) {
            if !on_payload(&payload) {
                ended = true;
                break 'read;
            }
        }
    }
    if !ended {
        if let Some(payload) = lines.finish() {
            on_payload(&payload);
        }
    }

    Ok((text, usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Gate;
    use crate::proxy::translate::{ResponsesTranslator, Surface};
    use crate::config::ReasoningCompat;

    /// Build SSE data from event lines, then split at the given byte positions.
    fn split_sse_at_positions(events: &[&str], split_positions: &[usize]) -> Vec<Vec<u8>> {
        let full: Vec<u8> = events
            .iter()
            .flat_map(|e| format!("{}\n\n", e).into_bytes())
            .collect();

        let mut chunks = Vec::new();
        let mut prev = 0;
        for &pos in split_positions {
            if pos > prev && pos < full.len() {
                chunks.push(full[prev..pos].to_vec());
                prev = pos;
            }
        }
        chunks.push(full[prev..].to_vec());
        chunks
    }

    fn upstream_of(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes, String>> {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn collect_events<S: Stream<Item = Result<Bytes, Infallible>>>(stream: S) -> Vec<String> {
        let chunks: Vec<_> = stream.collect().await;
        let joined: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| match c {
                Ok(bytes) => bytes.to_vec(),
                Err(never) => match never {},
            })
            .collect();
        String::from_utf8(joined)
            .unwrap()
            .split("\n\n")
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_start_matches("data: ").to_string())
            .collect()
    }

    fn chat_translator(compat: ReasoningCompat) -> Box<dyn EventTranslator> {
        Box::new(ResponsesTranslator::new(Surface::Chat, "gpt-5", 1, compat, false))
    }

    #[test]
    fn test_payloads_split_across_chunks() {
        let events = [
            r#"data: {"type":"response.output_text.delta","delta":"Hel"}"#,
            r#"data: {"type":"response.output_text.delta","delta":"lo"}"#,
            "data: [DONE]",
        ];
        let mut buffer = SseLineBuffer::new();
        let mut payloads = Vec::new();
        for chunk in split_sse_at_positions(&events, &[10, 45, 70]) {
            payloads.extend(buffer.push(&chunk));
        }
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[2], "[DONE]");
        assert!(payloads[1].contains("\"lo\""));
    }

    #[test]
    fn test_non_data_fields_skipped() {
        let raw = b"event: message\nid: 123\nretry: 5000\n: comment\ndata: {\"a\":1}\n\n";
        let mut buffer = SseLineBuffer::new();
        assert_eq!(buffer.push(raw), vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_crlf_and_no_space() {
        let raw = b"data:{\"a\":1}\r\n\r\ndata: [DONE]\r\n\r\n";
        let mut buffer = SseLineBuffer::new();
        assert_eq!(
            buffer.push(raw),
            vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]
        );
    }

    #[test]
    fn test_unterminated_final_line_flushed() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: [DONE]").is_empty());
        assert_eq!(buffer.finish(), Some("[DONE]".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_buffer_cap() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(&vec![b'x'; 65 * 1024]).is_empty());
        // Remainder of the oversized line is dropped with it
        assert!(buffer.push(b"data: tail-of-huge-line\n").is_empty());
        assert_eq!(buffer.push(b"data: ok\n"), vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_appends_single_done_on_eof() {
        let events = [r#"data: {"type":"response.output_text.delta","delta":"hi"}"#];
        let stream = TranslatedStream::new(
            upstream_of(split_sse_at_positions(&events, &[])),
            chat_translator(ReasoningCompat::ThinkTags),
            None,
        );
        let out = collect_events(stream).await;
        assert_eq!(out.last().map(String::as_str), Some("[DONE]"));
        assert_eq!(out.iter().filter(|e| *e == "[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn test_stream_stops_reading_after_completed() {
        let events = [
            r#"data: {"type":"response.output_text.delta","delta":"a"}"#,
            r#"data: {"type":"response.completed","response":{"id":"resp_1"}}"#,
            r#"data: {"type":"response.output_text.delta","delta":"ignored"}"#,
        ];
        let stream = TranslatedStream::new(
            upstream_of(split_sse_at_positions(&events, &[])),
            chat_translator(ReasoningCompat::Current),
            None,
        );
        let out = collect_events(stream).await;
        assert!(out.iter().all(|e| !e.contains("ignored")));
        assert_eq!(out.iter().filter(|e| *e == "[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_emits_inline_error_then_done() {
        let upstream = futures::stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"type\":\"response.output_text.delta\",\"delta\":\"a\"}\n\n",
            )),
            Err("connection reset".to_string()),
        ]);
        let stream = TranslatedStream::new(upstream, chat_translator(ReasoningCompat::Current), None);
        let out = collect_events(stream).await;

        let n = out.len();
        assert!(out[n - 2].contains("\"error\""));
        assert!(out[n - 2].contains("connection reset"));
        assert_eq!(out[n - 1], "[DONE]");
    }

    #[tokio::test]
    async fn test_permit_released_when_stream_completes() {
        let gate = Gate::new(1, 10, None);
        let permit = gate.acquire(None).await.unwrap();
        assert_eq!(gate.available(), 0);

        let events = [r#"data: {"type":"response.completed","response":{}}"#];
        let stream = TranslatedStream::new(
            upstream_of(split_sse_at_positions(&events, &[])),
            chat_translator(ReasoningCompat::ThinkTags),
            Some(permit),
        );
        let _ = collect_events(stream).await;
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_permit_released_when_client_disconnects() {
        let gate = Gate::new(1, 10, None);
        let permit = gate.acquire(None).await.unwrap();

        // Upstream that never finishes
        let upstream = futures::stream::pending::<Result<Bytes, String>>();
        let stream = TranslatedStream::new(upstream, chat_translator(ReasoningCompat::ThinkTags), Some(permit));
        assert_eq!(gate.available(), 0);

        drop(stream);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_accumulate_output_text() {
        let events = [
            r#"data: {"type":"response.created","response":{"id":"resp_1"}}"#,
            r#"data: {"type":"response.output_text.delta","delta":"He"}"#,
            r#"data: {"type":"response.reasoning_text.delta","delta":"hmm"}"#,
            r#"data: {"type":"response.output_text.delta","delta":"llo"}"#,
            "data: [DONE]",
            r#"data: {"type":"response.output_text.delta","delta":"!"}"#,
        ];
        let (text, usage) = accumulate_output_text(upstream_of(split_sse_at_positions(&events, &[30, 90])))
            .await
            .unwrap();
        assert_eq!(text, "Hello");
        assert!(usage.is_none());
    }

    #[tokio::test]
    async fn test_accumulate_captures_usage() {
        let events = [
            r#"data: {"type":"response.output_text.delta","delta":"ok"}"#,
            r#"data: {"type":"response.completed","response":{"usage":{"input_tokens":3,"output_tokens":1}}}"#,
        ];
        let (text, usage) = accumulate_output_text(upstream_of(split_sse_at_positions(&events, &[])))
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(usage.unwrap().total_tokens, 4);
    }
}
