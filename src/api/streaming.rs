//! Streaming response support for inference backends

use super::sse::{parse_stream_line, WireFormat};
use super::TokenUsage;
use futures_util::{pin_mut, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::debug;

/// A chunk of a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A text delta (partial content)
    TextDelta(String),
    /// Token counts reported before the end of the stream
    Usage(TokenUsage),
    /// Stream completed
    Done(StreamEnd),
    /// An error occurred during streaming
    Error(String),
}

impl StreamChunk {
    fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done(_) | StreamChunk::Error(_))
    }
}

/// Final stats carried by the last chunk of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamEnd {
    pub usage: TokenUsage,
    /// The provider stopped at its output token limit
    pub truncated: bool,
}

impl StreamEnd {
    pub fn new(usage: TokenUsage, truncated: bool) -> Self {
        Self { usage, truncated }
    }
}

/// Pump a streamed body into a channel of chunks.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across network reads decode intact. The spawned task stops at the
/// first Done/Error chunk, at end of body, or as soon as the receiver is
/// dropped.
pub(crate) fn forward_body<S, B, E>(body: S, format: WireFormat) -> mpsc::Receiver<StreamChunk>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        pin_mut!(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!("Stream receiver dropped, aborting transfer");
                    return;
                }
                next = body.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    let _ = tx
                        .send(StreamChunk::Error(format!("Stream error: {}", e)))
                        .await;
                    return;
                }
                None => break,
            };

            buffer.extend_from_slice(bytes.as_ref());

            while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                if let Some(chunk) = decode_line(line, format) {
                    let terminal = chunk.is_terminal();
                    if tx.send(chunk).await.is_err() || terminal {
                        return;
                    }
                }
            }
        }

        // Trailing line without newline
        if let Some(chunk) = decode_line(buffer, format) {
            let terminal = chunk.is_terminal();
            if tx.send(chunk).await.is_err() || terminal {
                return;
            }
        }

        let _ = tx.send(StreamChunk::Done(StreamEnd::default())).await;
    });

    rx
}

fn decode_line(line: Vec<u8>, format: WireFormat) -> Option<StreamChunk> {
    match String::from_utf8(line) {
        Ok(line) => parse_stream_line(&line, format),
        Err(e) => Some(StreamChunk::Error(format!("Invalid UTF-8 in stream: {}", e))),
    }
}
