//! SSE (Server-Sent Events) frame parsing for recorded upstream bodies.
//!
//! Handles buffering partial lines across chunk boundaries and the field
//! semantics of the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html)
//! that matter for replay (`event`, multi-line `data`, comments).

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use serde_json::Value;

use crate::error::{CanonicalError, ProxyError};
use crate::util::extract_sse_data_payload;

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE line parser.
///
/// Feed it text chunks split at arbitrary boundaries and it yields fully
/// assembled [`SseEvent`] frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events parsed.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing line and a frame left open at end of input.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        if self.read_offset < self.buffer.len() {
            let rest = self.buffer.split_off(self.read_offset);
            let line = rest.strip_suffix('\r').unwrap_or(&rest);
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
        }
        self.buffer.clear();
        self.read_offset = 0;
        Self::process_line(
            "",
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            out,
        );
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                });
                *has_data = false;
            } else {
                *event_type = None;
            }
            return;
        }

        // comment
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        }
        // id, retry and unknown fields are irrelevant for replay
    }
}

/// Parse an event's JSON payload. The SSE event name fills in `event` when
/// the payload carries neither `type` nor `event`.
fn decode_event(event: SseEvent) -> Result<Value, ProxyError> {
    let mut value: Value = serde_json::from_str(&event.data)
        .map_err(|e| CanonicalError::translation("sse data", e))?;
    if let (Some(name), Value::Object(obj)) = (event.event, &mut value) {
        if !obj.contains_key("type") && !obj.contains_key("event") {
            obj.insert("event".into(), Value::String(name));
        }
    }
    Ok(value)
}

/// Feed the decodable part of `pending` to the parser.
///
/// Invalid bytes are replaced with U+FFFD. Only an incomplete code point at
/// the end is kept back for the next chunk.
fn feed_utf8(parser: &mut SseParser, pending: &mut Vec<u8>, out: &mut Vec<SseEvent>) {
    let mut text = String::new();
    let mut rest = pending.as_slice();
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                // the prefix was just validated
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }
    let consumed = pending.len() - rest.len();
    pending.drain(..consumed);
    if !text.is_empty() {
        parser.feed_into(&text, out);
    }
}

/// Read a line-oriented capture: JSON lines, or SSE with single-line `data:`
/// payloads.
pub fn json_line_events(capture: &str) -> impl Iterator<Item = Result<Value, ProxyError>> + '_ {
    capture.lines().filter_map(extract_sse_data_payload).map(|payload| {
        serde_json::from_str::<Value>(payload)
            .map_err(|e| ProxyError::from(CanonicalError::translation("capture line", e)))
    })
}

/// Turn a byte stream carrying SSE frames into JSON events.
///
/// `[DONE]` sentinels are dropped. A frame whose data is not JSON yields a
/// translation error and the stream continues.
pub fn sse_event_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Value, ProxyError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseParser::new(),
            Vec::<u8>::new(),
            Vec::<SseEvent>::with_capacity(8),
            VecDeque::<SseEvent>::new(),
            false,
        ),
        |(mut stream, mut parser, mut pending, mut parsed, mut queue, mut ended)| async move {
            loop {
                if let Some(event) = queue.pop_front() {
                    if event.is_done() {
                        continue;
                    }
                    let item = decode_event(event);
                    return Some((item, (stream, parser, pending, parsed, queue, ended)));
                }
                if ended {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        pending.extend_from_slice(&bytes);
                        feed_utf8(&mut parser, &mut pending, &mut parsed);
                    }
                    Some(Err(e)) => {
                        let err = ProxyError::from(CanonicalError::Internal(format!(
                            "upstream body read failed: {e}"
                        )));
                        return Some((Err(err), (stream, parser, pending, parsed, queue, ended)));
                    }
                    None => {
                        ended = true;
                        if !pending.is_empty() {
                            let tail = String::from_utf8_lossy(&pending).into_owned();
                            pending.clear();
                            parser.feed_into(&tail, &mut parsed);
                        }
                        parser.finish_into(&mut parsed);
                    }
                }
                queue.extend(parsed.drain(..));
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_parser_handles_split_frames() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: response.created\nda").is_empty());
        let events = parser.feed("ta: {\"a\":1}\r\n\r\n: keepalive\n\ndata: x\ndata: y\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: Some("response.created".into()),
                    data: "{\"a\":1}".into(),
                },
                SseEvent {
                    event: None,
                    data: "x\ny".into(),
                },
            ]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut parser = SseParser::new();
        let mut out = Vec::new();
        parser.feed_into("data: {\"b\":2}", &mut out);
        assert!(out.is_empty());
        parser.finish_into(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "{\"b\":2}");
    }

    #[test]
    fn test_json_line_events() {
        let capture = "{\"type\":\"response.created\"}\n\n: ping\ndata: {\"choices\":[]}\ndata: [DONE]\n{oops\n";
        let events: Vec<_> = json_line_events(capture).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().unwrap()["type"], "response.created");
        assert!(events[1].as_ref().unwrap()["choices"].is_array());
        assert!(events[2].is_err());
    }

    #[tokio::test]
    async fn test_event_stream_decodes_json() {
        let body = "event: response.output_text.delta\ndata: {\"delta\":\"h\u{e9}\"}\n\ndata: not json\n\ndata: [DONE]\n\n";
        let bytes = body.as_bytes();
        // split inside the two-byte code point
        let split = body.find('\u{e9}').unwrap() + 1;
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];
        let items: Vec<_> = sse_event_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first["delta"], "h\u{e9}");
        assert_eq!(first["event"], "response.output_text.delta");
        assert!(items[1].is_err());
    }

    #[test]
    fn test_event_name_only_fills_untyped_payloads() {
        let named = |data: &str| SseEvent {
            event: Some("response.output_text.delta".into()),
            data: data.into(),
        };
        let untyped = decode_event(named("{\"delta\":\"x\"}")).unwrap();
        assert_eq!(untyped["event"], "response.output_text.delta");

        let typed = decode_event(named("{\"type\":\"response.completed\"}")).unwrap();
        assert!(typed.get("event").is_none());

        let own = decode_event(named("{\"event\":\"response.created\"}")).unwrap();
        assert_eq!(own["event"], "response.created");
    }

    #[test]
    fn test_invalid_byte_does_not_hold_back_later_frames() {
        let mut parser = SseParser::new();
        let mut pending = b"data: {\"a\":\"\xff\"}\n\n".to_vec();
        let mut out = Vec::new();
        feed_utf8(&mut parser, &mut pending, &mut out);
        assert!(pending.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "{\"a\":\"\u{fffd}\"}");

        pending.extend_from_slice(b"data: {\"b\":2}\n\n");
        feed_utf8(&mut parser, &mut pending, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].data, "{\"b\":2}");
    }

    #[test]
    fn test_split_code_point_is_kept_for_next_chunk() {
        let mut parser = SseParser::new();
        let mut pending = b"data: \xc3".to_vec();
        let mut out = Vec::new();
        feed_utf8(&mut parser, &mut pending, &mut out);
        assert_eq!(pending, b"\xc3");
        pending.extend_from_slice(b"\xa9\n\n");
        feed_utf8(&mut parser, &mut pending, &mut out);
        assert!(pending.is_empty());
        assert_eq!(out[0].data, "\u{e9}");
    }

    #[tokio::test]
    async fn test_event_stream_keeps_flowing_after_invalid_byte() {
        use futures_util::FutureExt;

        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"data: {\"a\":\"\xff\"}\n\n")),
            Ok(Bytes::from_static(b"data: {\"b\":2}\n\n")),
        ])
        .chain(futures_util::stream::pending());
        let mut events = Box::pin(sse_event_stream(chunks));

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first["a"], "\u{fffd}");
        let second = events.next().now_or_never();
        assert_eq!(
            second.map(|item| item.map(|res| res.unwrap())),
            Some(Some(serde_json::json!({"b": 2})))
        );
    }
}
