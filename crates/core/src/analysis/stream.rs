//! # Analysis Event Stream
//!
//! Server-Sent-Events framing for analysis results. The server emits
//! `sources` (optional, first), one `text` per delta, then `done`; a failure
//! mid-stream becomes a terminal `error` event.
//!
//! [`SseDecoder`] is also used for the upstream model stream, which uses the
//! same framing with bare `data:` lines.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;

use crate::state::project::GroundingSource;

/// Boxed stream of decoded analysis events
pub type EventStream = BoxStream<'static, anyhow::Result<AnalysisEvent>>;

/// One dispatched SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, `None` for the default `message` type
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Incremental SSE parser. Bytes may be split at any point, including
/// inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush a trailing line without newline and any frame not yet
    /// terminated by a blank line
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            if let Some(frame) = self.process_line(rest.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        if let Some(frame) = self.dispatch() {
            frames.push(frame);
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Decoded analysis stream event
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    Sources(Vec<GroundingSource>),
    Text(String),
    Done,
    Error(String),
}

#[derive(Serialize, Deserialize)]
struct SourcesPayload {
    sources: Vec<GroundingSource>,
}

#[derive(Serialize, Deserialize)]
struct TextPayload {
    text: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    error: String,
}

impl AnalysisEvent {
    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Sources(_) => "sources",
            Self::Text(_) => "text",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }

    /// JSON data payload for this event
    pub fn data(&self) -> String {
        let value = match self {
            Self::Sources(sources) => serde_json::to_string(&SourcesPayload {
                sources: sources.clone(),
            }),
            Self::Text(text) => serde_json::to_string(&TextPayload { text: text.clone() }),
            Self::Done => Ok("{}".to_string()),
            Self::Error(error) => serde_json::to_string(&ErrorPayload {
                error: error.clone(),
            }),
        };
        value.unwrap_or_else(|_| "{}".to_string())
    }

    /// Interpret a frame. Unknown or malformed frames are logged and skipped.
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        let parsed = match frame.event.as_deref() {
            Some("sources") => serde_json::from_str::<SourcesPayload>(&frame.data)
                .map(|p| Self::Sources(p.sources)),
            Some("text") => {
                serde_json::from_str::<TextPayload>(&frame.data).map(|p| Self::Text(p.text))
            }
            Some("done") => Ok(Self::Done),
            Some("error") => serde_json::from_str::<ErrorPayload>(&frame.data)
                .map(|p| Self::Error(p.error))
                .or_else(|_| Ok(Self::Error(frame.data.clone()))),
            other => {
                tracing::debug!(event = ?other, "Ignoring unrecognized stream event");
                return None;
            }
        };

        match parsed {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, data = %frame.data, "Skipping malformed stream chunk");
                None
            }
        }
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    queue: VecDeque<AnalysisEvent>,
    finished: bool,
}

/// Decode an SSE byte stream into analysis events
pub fn decode_events<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.queue.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = st.decoder.push(chunk.as_ref());
                    st.queue
                        .extend(frames.iter().filter_map(AnalysisEvent::from_frame));
                }
                Some(Err(e)) => {
                    st.finished = true;
                    let err = anyhow::Error::new(e).context("Analysis stream interrupted");
                    return Some((Err(err), st));
                }
                None => {
                    st.finished = true;
                    let frames = st.decoder.finish();
                    st.queue
                        .extend(frames.iter().filter_map(AnalysisEvent::from_frame));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE: &str = "event: sources\ndata: {\"sources\":[{\"title\":\"T\",\"uri\":\"https://t.example\"}]}\n\n\
event: text\ndata: {\"text\":\"Hé\"}\n\n\
: keep-alive\n\n\
event: text\ndata: {\"text\":\"llo\"}\n\n\
event: done\ndata: {}\n\n";

    fn expected() -> Vec<AnalysisEvent> {
        vec![
            AnalysisEvent::Sources(vec![GroundingSource {
                title: "T".into(),
                uri: "https://t.example".into(),
            }]),
            AnalysisEvent::Text("Hé".into()),
            AnalysisEvent::Text("llo".into()),
            AnalysisEvent::Done,
        ]
    }

    fn decode_all(chunks: Vec<Vec<u8>>) -> Vec<AnalysisEvent> {
        let body = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        futures::executor::block_on(decode_events(body).map(|e| e.unwrap()).collect())
    }

    #[test]
    fn test_decode_whole_body() {
        assert_eq!(decode_all(vec![WIRE.as_bytes().to_vec()]), expected());
    }

    #[test]
    fn test_decode_insensitive_to_chunk_boundaries() {
        let bytes = WIRE.as_bytes();
        for size in [1, 2, 3, 7, 16] {
            let chunks = bytes.chunks(size).map(|c| c.to_vec()).collect();
            assert_eq!(decode_all(chunks), expected(), "chunk size {}", size);
        }
    }

    #[test]
    fn test_crlf_and_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":1}\r\n").is_empty());
        let frames = decoder.push(b"\r\ndata: [DONE]");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, "{\"a\":1}");

        let tail = decoder.finish();
        assert_eq!(tail[0].data, "[DONE]");
    }

    #[test]
    fn test_malformed_chunk_skipped() {
        let body = "event: text\ndata: not json\n\nevent: text\ndata: {\"text\":\"ok\"}\n\n";
        assert_eq!(
            decode_all(vec![body.as_bytes().to_vec()]),
            vec![AnalysisEvent::Text("ok".into())]
        );
    }

    #[test]
    fn test_event_payload_shapes() {
        assert_eq!(AnalysisEvent::Text("x".into()).data(), r#"{"text":"x"}"#);
        assert_eq!(AnalysisEvent::Error("boom".into()).event_name(), "error");

        let frame = SseFrame {
            event: Some("error".into()),
            data: r#"{"error":"boom"}"#.into(),
        };
        assert_eq!(
            AnalysisEvent::from_frame(&frame),
            Some(AnalysisEvent::Error("boom".into()))
        );
    }
}
