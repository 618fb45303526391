//! Shared SSE plumbing for streaming adapters.
//!
//! SSE events arrive chunked; [`SseBuffer`] accumulates bytes and yields
//! complete `data:` payloads, and [`event_stream`] turns a
//! `reqwest::Response` plus a payload parser into a [`BoxStream`].

use drost_domain::stream::{BoxStream, StreamEvent};
use drost_domain::{Error, Result};

/// Accumulates raw SSE bytes and yields complete `data:` payloads.
#[derive(Default)]
pub struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain every complete event's `data:` lines.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        self.drain_complete()
    }

    /// Flush a trailing partial event after the body closed.
    pub fn flush(&mut self) -> Vec<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return Vec::new();
        }
        self.buf.push_str("\n\n");
        self.drain_complete()
    }

    fn drain_complete(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(..pos).collect();
            self.buf.drain(..2);
            for line in block.lines() {
                if let Some(data) = line.trim().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_owned());
                    }
                }
            }
        }
        payloads
    }
}

/// Build a [`BoxStream`] from an SSE response and a payload parser.
///
/// The parser is `FnMut` because streaming tool-call assembly needs state
/// across payloads. A trailing `Done` is synthesized if the parser never
/// produced one.
pub fn event_stream<F>(
    response: reqwest::Response,
    provider_id: String,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::new();
        let mut done_emitted = false;

        loop {
            let payloads = match response.chunk().await {
                Ok(Some(bytes)) => buffer.push(&String::from_utf8_lossy(&bytes)),
                Ok(None) => {
                    let tail = buffer.flush();
                    for data in tail {
                        for event in parse(&data) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::ProviderTransport {
                        provider: provider_id.clone(),
                        message: e.to_string(),
                    });
                    break;
                }
            };

            for data in payloads {
                for event in parse(&data) {
                    if matches!(&event, Ok(StreamEvent::Done { .. })) {
                        done_emitted = true;
                    }
                    yield event;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_event_drained() {
        let mut buf = SseBuffer::new();
        let payloads = buf.push("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn partial_event_waits_for_more() {
        let mut buf = SseBuffer::new();
        assert!(buf.push("data: par").is_empty());
        let payloads = buf.push("tial\n\ndata: next\n\n");
        assert_eq!(payloads, vec!["partial", "next"]);
    }

    #[test]
    fn flush_recovers_trailing_payload() {
        let mut buf = SseBuffer::new();
        assert!(buf.push("data: tail").is_empty());
        assert_eq!(buf.flush(), vec!["tail"]);
        assert!(buf.flush().is_empty());
    }

    #[test]
    fn non_data_lines_ignored() {
        let mut buf = SseBuffer::new();
        let payloads = buf.push("event: ping\nid: 3\nretry: 100\ndata: x\n\n");
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn empty_data_skipped() {
        let mut buf = SseBuffer::new();
        assert!(buf.push("data: \n\n").is_empty());
    }
}
