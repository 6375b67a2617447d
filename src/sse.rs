//! Server-Sent Events (SSE) processing for streaming responses.
//!
//! `streamGenerateContent?alt=sse` answers with a sequence of `data:` events, each carrying one
//! JSON-encoded [`GenerateContentResponse`] chunk.  This module turns the raw byte stream into a
//! stream of parsed chunks, handling buffering, CRLF line endings and UTF-8 sequences split
//! across network reads.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::observability::STREAM_BYTES;
use crate::{Error, GenerateContentResponse, Result};

/// Process a stream of bytes into a stream of response chunks.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<GenerateContentResponse>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + Send + 'static,
{
    // Convert reqwest errors to our error type
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    let buffer = SseBuffer::default();

    stream::unfold(
        (stream, buffer),
        move |(mut stream, mut buffer)| async move {
            loop {
                // First check if we have a complete event in the buffer
                if let Some(event) = buffer.next_event() {
                    match parse_event(&event) {
                        Some(item) => return Some((item, (stream, buffer))),
                        None => continue,
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        if let Err(e) = buffer.push(&bytes) {
                            return Some((Err(e), (stream, buffer)));
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer)));
                    }
                    None => {
                        // End of stream: deliver a trailing event that lacks its blank line.
                        let event = buffer.take_rest();
                        if let Some(item) = parse_event(&event) {
                            return Some((item, (stream, buffer)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Accumulates decoded text and splits it into events.
#[derive(Debug, Default)]
struct SseBuffer {
    text: String,
    pending: Vec<u8>,
    /// A read ended on `\r`; it may pair with a `\n` at the start of the next read.
    held_cr: bool,
}

impl SseBuffer {
    /// Appends bytes, holding back an incomplete trailing UTF-8 sequence.
    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        let checked = std::str::from_utf8(&self.pending).map(str::len);
        let valid_up_to = match checked {
            Ok(len) => len,
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                self.pending.clear();
                return Err(Error::encoding(
                    format!("Invalid UTF-8 in stream: {e}"),
                    Some(Box::new(e)),
                ));
            }
        };
        let rest = self.pending.split_off(valid_up_to);
        let mut decoded = String::with_capacity(self.pending.len() + 1);
        if std::mem::take(&mut self.held_cr) {
            decoded.push('\r');
        }
        decoded.push_str(std::str::from_utf8(&self.pending)?);
        if decoded.ends_with('\r') {
            decoded.pop();
            self.held_cr = true;
        }
        self.text.push_str(&decoded.replace("\r\n", "\n"));
        self.pending = rest;
        Ok(())
    }

    /// Removes and returns the next complete event, if the buffer holds one.
    fn next_event(&mut self) -> Option<String> {
        let end = self.text.find("\n\n")?;
        let event = self.text[..end].to_string();
        self.text.drain(..end + 2);
        Some(event)
    }

    fn take_rest(&mut self) -> String {
        self.held_cr = false;
        std::mem::take(&mut self.text)
    }
}

/// Parse one event; `None` means the event carries nothing to deliver.
fn parse_event(event: &str) -> Option<Result<GenerateContentResponse>> {
    let mut data: Option<String> = None;
    for line in event.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }
    let data = data?;
    if data.trim().is_empty() {
        return None;
    }
    Some(parse_chunk(&data))
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

fn parse_chunk(data: &str) -> Result<GenerateContentResponse> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(data) {
        let detail = envelope.error;
        return Err(Error::api(
            detail.code.unwrap_or(500),
            detail.status,
            detail.message.unwrap_or_else(|| data.to_string()),
        ));
    }
    serde_json::from_str::<GenerateContentResponse>(data).map_err(|e| {
        Error::serialization(
            format!("Failed to parse stream chunk: {e}"),
            Some(Box::new(e)),
        )
    })
}
