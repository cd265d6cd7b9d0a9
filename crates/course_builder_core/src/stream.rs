//! crates/course_builder_core/src/stream.rs
//!
//! Turns the raw byte stream of a lesson generation response into the ordered
//! sequence of content deltas it carries.
//!
//! The wire format is line framed: `data: <JSON>` records terminated by a
//! newline, optional `:` comment lines, and a `data: [DONE]` sentinel. Chunk
//! boundaries carry no meaning, so both UTF-8 sequences and records can be split
//! across chunks.

use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ports::{ByteStream, PortResult};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// How many times a truncated record is retried before it is dropped.
pub const DEFAULT_MAX_PENDING_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub max_pending_retries: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_pending_retries: DEFAULT_MAX_PENDING_RETRIES,
        }
    }
}

//=========================================================================================
// Wire Records
//=========================================================================================

#[derive(Deserialize)]
struct ChunkRecord {
    #[serde(default)]
    choices: Vec<ChoiceRecord>,
}

#[derive(Deserialize)]
struct ChoiceRecord {
    #[serde(default)]
    delta: Option<DeltaRecord>,
}

#[derive(Deserialize)]
struct DeltaRecord {
    #[serde(default)]
    content: Option<String>,
}

impl ChunkRecord {
    fn into_delta(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
    }
}

enum LineOutcome {
    Skip,
    Delta(String),
    Truncated,
}

//=========================================================================================
// The Decoder
//=========================================================================================

/// An incremental decoder for `data: <JSON>` framed streams.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    config: DecoderConfig,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending_bytes: Vec<u8>,
    buffer: String,
    /// Failed attempts for the record currently pushed back at the buffer front.
    retries: u32,
    closing: bool,
}

impl StreamDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Feeds one chunk and returns the deltas completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode_utf8(chunk);
        self.drain_lines()
    }

    /// Flushes the decoder at end of stream.
    ///
    /// Complete lines still queued are decoded without waiting on truncated
    /// records. An unterminated remainder is a protocol violation and is dropped.
    pub fn finish(&mut self) -> Vec<String> {
        self.closing = true;
        let deltas = self.drain_lines();
        if !self.buffer.is_empty() || !self.pending_bytes.is_empty() {
            debug!(
                remainder_len = self.buffer.len() + self.pending_bytes.len(),
                "Discarding unterminated stream remainder"
            );
            self.buffer.clear();
            self.pending_bytes.clear();
        }
        deltas
    }

    /// Text decoded so far that has not formed a complete record yet.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending_bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => {
                            self.pending_bytes.drain(..valid);
                            return;
                        }
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(newline + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }

            match decode_line(&line) {
                LineOutcome::Skip => self.retries = 0,
                LineOutcome::Delta(delta) => {
                    self.retries = 0;
                    deltas.push(delta);
                }
                LineOutcome::Truncated => {
                    self.retries += 1;
                    if self.closing || self.retries > self.config.max_pending_retries {
                        warn!(
                            attempts = self.retries,
                            "Dropping stream record that never became parseable"
                        );
                        self.retries = 0;
                        continue;
                    }
                    line.push('\n');
                    line.push_str(&self.buffer);
                    self.buffer = line;
                    break;
                }
            }
        }

        deltas
    }
}

fn decode_line(line: &str) -> LineOutcome {
    if line.trim().is_empty() || line.starts_with(':') {
        return LineOutcome::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return LineOutcome::Skip;
    }

    match serde_json::from_str::<ChunkRecord>(payload) {
        Ok(record) => record
            .into_delta()
            .map_or(LineOutcome::Skip, LineOutcome::Delta),
        Err(e) if e.is_eof() => LineOutcome::Truncated,
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream record");
            LineOutcome::Skip
        }
    }
}

/// Adapts a raw byte stream into a stream of content deltas.
///
/// A transport error is forwarded and ends the stream.
pub fn decode_stream(
    mut bytes: ByteStream,
    config: DecoderConfig,
) -> impl Stream<Item = PortResult<String>> + Send {
    async_stream::try_stream! {
        let mut decoder = StreamDecoder::new(config);
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for delta in decoder.push(&chunk) {
                yield delta;
            }
        }
        for delta in decoder.finish() {
            yield delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use bytes::Bytes;
    use futures::stream;

    fn record(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    fn sample_stream() -> String {
        let mut body = String::from(": keep-alive\n\n");
        body.push_str(&record("Ownership "));
        body.push_str(&record("moves values, "));
        body.push_str("data: {\"choices\":[{\"delta\":{}}]}\r\n\r\n");
        body.push_str(&record("borrowing lends them. "));
        body.push_str(&record("Héllo → wörld ✓"));
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn decode_in_chunks(body: &[u8], cuts: &[usize]) -> String {
        let mut decoder = StreamDecoder::new(DecoderConfig::default());
        let mut out = String::new();
        let mut start = 0;
        for &cut in cuts {
            out.extend(decoder.push(&body[start..cut]));
            start = cut;
        }
        out.extend(decoder.push(&body[start..]));
        out.extend(decoder.finish());
        out
    }

    #[test]
    fn whole_body_decodes_in_order() {
        let body = sample_stream();
        assert_eq!(
            decode_in_chunks(body.as_bytes(), &[]),
            "Ownership moves values, borrowing lends them. Héllo → wörld ✓"
        );
    }

    #[test]
    fn result_is_independent_of_chunk_boundaries() {
        let body = sample_stream();
        let bytes = body.as_bytes();
        let expected = decode_in_chunks(bytes, &[]);

        for cut in 1..bytes.len() {
            assert_eq!(decode_in_chunks(bytes, &[cut]), expected, "cut at {cut}");
        }
        for width in [1, 2, 3, 7, 13] {
            let cuts: Vec<usize> = (width..bytes.len()).step_by(width).collect();
            assert_eq!(decode_in_chunks(bytes, &cuts), expected, "width {width}");
        }
    }

    #[test]
    fn record_split_before_closing_brace_waits_for_second_chunk() {
        let line = record("split");
        let brace = line.rfind('}').unwrap();
        let mut decoder = StreamDecoder::default();

        assert!(decoder.push(line[..brace].as_bytes()).is_empty());
        assert_eq!(decoder.push(line[brace..].as_bytes()), vec!["split"]);
    }

    #[test]
    fn chunk_without_complete_line_only_grows_buffer() {
        let mut decoder = StreamDecoder::default();
        assert!(decoder.push(b"data: {\"choi").is_empty());
        assert_eq!(decoder.pending(), "data: {\"choi");
    }

    #[test]
    fn ignores_comments_foreign_fields_and_sentinel() {
        let mut decoder = StreamDecoder::default();
        let body = "\n: comment\nevent: message\nid: 4\ndata: [DONE]\ndata:  [DONE] \n";
        assert!(decoder.push(body.as_bytes()).is_empty());
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn malformed_record_is_skipped_not_fatal() {
        let mut decoder = StreamDecoder::default();
        let mut body = String::from("data: {\"choices\": oops}\n");
        body.push_str(&record("after"));
        assert_eq!(decoder.push(body.as_bytes()), vec!["after"]);
    }

    #[test]
    fn truncated_record_is_retried_then_dropped() {
        let mut decoder = StreamDecoder::new(DecoderConfig {
            max_pending_retries: 2,
        });

        assert!(decoder.push(b"data: {\"choices\":[\n").is_empty());
        assert!(decoder.pending().starts_with("data: {\"choices\":["));

        assert!(decoder.push(record("queued").as_bytes()).is_empty());
        assert_eq!(decoder.push(b"\n"), vec!["queued"]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn finish_drops_unterminated_remainder_but_keeps_queued_lines() {
        let mut decoder = StreamDecoder::default();
        let mut body = String::from("data: {\"choices\":[\n");
        body.push_str(&record("tail"));
        body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"lost\"");

        assert!(decoder.push(body.as_bytes()).is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn utf8_sequence_split_across_chunks_is_preserved() {
        let line = record("ü");
        let bytes = line.as_bytes();
        let split = line.find('ü').unwrap() + 1;
        let mut decoder = StreamDecoder::default();

        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["ü"]);
    }

    #[tokio::test]
    async fn decode_stream_yields_deltas_then_forwards_transport_error() {
        let body = record("one");
        let (first, second) = body.split_at(10);
        let chunks: Vec<PortResult<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(first.as_bytes())),
            Ok(Bytes::copy_from_slice(second.as_bytes())),
            Err(PortError::Unexpected("connection reset".to_string())),
        ];

        let decoded: Vec<PortResult<String>> =
            decode_stream(Box::pin(stream::iter(chunks)), DecoderConfig::default())
                .collect()
                .await;

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].as_deref().ok(), Some("one"));
        assert!(matches!(decoded[1], Err(PortError::Unexpected(_))));
    }
}
