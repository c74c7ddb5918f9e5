//! Server-sent-events plumbing shared by streaming providers.
//!
//! [`SseDecoder`] turns raw body bytes into `data:` payloads; a
//! provider-specific parser turns each payload into [`SseEvent`]s; and
//! [`sse_response_stream`] numbers the resulting text into [`Chunk`]s and
//! guarantees exactly one terminal chunk.

use futures_util::{Stream, StreamExt};

use crate::util::from_reqwest;
use cp_domain::error::Result;
use cp_domain::stream::{BoxStream, Chunk, Usage};

/// What a provider parser extracts from one `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseEvent {
    Text(String),
    /// Usage report; may arrive before or after the finish marker.
    Usage(Usage),
    /// End of generation.
    Done,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental SSE decoder.
///
/// Events end at a blank line. Only `data:` fields are kept; several of
/// them in one event are joined with `\n`. Events without data yield
/// nothing. CRLF line endings are accepted.
///
/// Bytes are buffered until an event is complete, so a multi-byte UTF-8
/// character split across network reads decodes intact.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Feed body bytes; returns the payload of every event they complete.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        // CR never occurs inside a multi-byte sequence.
        self.pending
            .extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = self.pending.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.pending.drain(..end + 2).collect();
            payloads.extend(payload_of(&String::from_utf8_lossy(&event)));
        }
        payloads
    }

    /// End of body: an event the server did not terminate still counts.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        payload_of(&String::from_utf8_lossy(&rest)).into_iter().collect()
    }
}

fn payload_of(event: &str) -> Option<String> {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    (!data.is_empty()).then(|| data.join("\n"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chunks from a streaming HTTP response.
pub(crate) fn sse_response_stream<F>(
    provider: String,
    response: reqwest::Response,
    parse_data: F,
) -> BoxStream<'static, Result<Chunk>>
where
    F: FnMut(&str) -> Vec<Result<SseEvent>> + Send + 'static,
{
    let body = response
        .bytes_stream()
        .map(move |r| r.map_err(|e| from_reqwest(&provider, e)));
    chunk_stream(body, parse_data)
}

/// Text events are numbered from 0 in arrival order. The latest usage
/// report rides on the terminal chunk, which is emitted on `Done` or when
/// the body ends without one. The stream ends after its first error.
fn chunk_stream<S, B, F>(body: S, mut parse_data: F) -> BoxStream<'static, Result<Chunk>>
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    F: FnMut(&str) -> Vec<Result<SseEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();
        let mut sequence: u64 = 0;
        let mut usage: Option<Usage> = None;

        'read: loop {
            let (payloads, at_end) = match body.next().await {
                Some(Ok(bytes)) => (decoder.push(bytes.as_ref()), false),
                Some(Err(e)) => {
                    yield Err(e);
                    return;
                }
                None => (decoder.finish(), true),
            };

            for payload in payloads {
                for event in parse_data(&payload) {
                    match event {
                        Ok(SseEvent::Text(text)) => {
                            yield Ok(Chunk::text(sequence, text));
                            sequence += 1;
                        }
                        Ok(SseEvent::Usage(u)) => usage = Some(u),
                        Ok(SseEvent::Done) => break 'read,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if at_end {
                break;
            }
        }

        yield Ok(Chunk::terminal(sequence, usage));
    })
}
