//! Server-sent events over a chunked byte stream.
//!
//! Network chunks do not respect line boundaries (nor UTF-8 boundaries), so
//! bytes are buffered until a full line is available.

use super::FragmentStream;
use crate::error::CompletionError;
use async_stream::stream;
use futures::{Stream, StreamExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// What a provider makes of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delta {
    Text(String),
    Skip,
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed one chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is left once the byte stream ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.line(rest.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

/// Decode `bytes` as SSE and map each event through `parse` into text deltas.
/// The stream ends at `Delta::Done`, on the first error, or when the body ends.
pub(crate) fn text_deltas<S, B, F>(bytes: S, mut parse: F) -> FragmentStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    F: FnMut(&SseEvent) -> Result<Delta, CompletionError> + Send + 'static,
{
    Box::pin(stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::default();
        let mut done = false;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(CompletionError::Stream(e.to_string()));
                    done = true;
                    break 'read;
                }
            };
            for event in decoder.push(chunk.as_ref()) {
                match parse(&event) {
                    Ok(Delta::Text(text)) => yield Ok(text),
                    Ok(Delta::Skip) => {}
                    Ok(Delta::Done) => {
                        done = true;
                        break 'read;
                    }
                    Err(e) => {
                        yield Err(e);
                        done = true;
                        break 'read;
                    }
                }
            }
        }

        if !done {
            if let Some(event) = decoder.finish() {
                match parse(&event) {
                    Ok(Delta::Text(text)) => yield Ok(text),
                    Ok(_) => {}
                    Err(e) => yield Err(e),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_chunks() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\":").is_empty());
        assert!(d.push(b"1}\n").is_empty());
        let events = d.push(b"\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent { event: None, data: "{\"a\":1}".to_string() },
                SseEvent { event: None, data: "[DONE]".to_string() },
            ]
        );
    }

    #[test]
    fn multibyte_characters_survive_chunking() {
        let mut d = SseDecoder::default();
        let payload = "data: café\n\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(d.push(&payload[..split]).is_empty());
        let events = d.push(&payload[split..]);
        assert_eq!(events[0].data, "café");
    }

    #[test]
    fn named_events_crlf_and_comments() {
        let mut d = SseDecoder::default();
        let events = d.push(b": ping\r\nevent: message_stop\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_stop"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn unterminated_tail_is_flushed() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: last").is_empty());
        assert_eq!(d.finish().map(|e| e.data), Some("last".to_string()));
        assert!(d.finish().is_none());
    }

    #[tokio::test]
    async fn text_deltas_stop_at_done() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"data: one\n\ndata: two\n\n".to_vec()),
            Ok(b"data: [DONE]\n\ndata: ignored\n\n".to_vec()),
        ];
        let stream = text_deltas(futures::stream::iter(chunks), |event| {
            Ok(match event.data.as_str() {
                "[DONE]" => Delta::Done,
                other => Delta::Text(other.to_string()),
            })
        });
        let collected: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(collected, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn parse_errors_end_the_stream() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> =
            vec![Ok(b"data: ok\n\ndata: bad\n\ndata: never\n\n".to_vec())];
        let stream = text_deltas(futures::stream::iter(chunks), |event| {
            if event.data == "bad" {
                Err(CompletionError::Provider("bad".to_string()))
            } else {
                Ok(Delta::Text(event.data.clone()))
            }
        });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(CompletionError::Provider(_))));
    }
}
