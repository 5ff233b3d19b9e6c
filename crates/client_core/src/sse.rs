//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks; [`SseDecoder::feed`] buffers partial lines
//! and returns every message completed by the chunk. Line endings may be
//! `\n`, `\r\n` or `\r`, including a `\r\n` pair split across two chunks.

use std::time::Duration;

use thiserror::Error;

const DEFAULT_EVENT_TYPE: &str = "message";
const BYTE_ORDER_MARK: char = '\u{feff}';
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
}

/// A message kept growing past the decoder's limit without being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event stream message exceeded {limit} bytes")]
pub struct MessageTooLarge {
    pub limit: usize,
}

impl SseMessage {
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT_TYPE)
    }
}

#[derive(Debug)]
pub struct SseDecoder {
    line: Vec<u8>,
    after_cr: bool,
    first_line_seen: bool,
    event: Option<String>,
    data: String,
    last_id: Option<String>,
    retry: Option<Duration>,
    max_message_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `max_message_bytes` bounds the pending line plus the buffered data.
    pub fn with_limit(max_message_bytes: usize) -> Self {
        Self {
            line: Vec::new(),
            after_cr: false,
            first_line_seen: false,
            event: None,
            data: String::new(),
            last_id: None,
            retry: None,
            max_message_bytes,
        }
    }

    /// Last `id` field seen on the stream; it persists across messages.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Reconnection delay most recently requested with a `retry` field.
    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.retry
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseMessage>, MessageTooLarge> {
        let mut messages = Vec::new();
        for &byte in chunk {
            if self.after_cr {
                self.after_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' => {
                    self.after_cr = true;
                    messages.extend(self.end_line());
                }
                b'\n' => messages.extend(self.end_line()),
                _ => self.line.push(byte),
            }
            if self.line.len() + self.data.len() > self.max_message_bytes {
                self.line.clear();
                self.data.clear();
                return Err(MessageTooLarge {
                    limit: self.max_message_bytes,
                });
            }
        }
        Ok(messages)
    }

    fn end_line(&mut self) -> Option<SseMessage> {
        let raw = std::mem::take(&mut self.line);
        let decoded = String::from_utf8_lossy(&raw);
        let mut line: &str = &decoded;
        if !self.first_line_seen {
            self.first_line_seen = true;
            line = line.strip_prefix(BYTE_ORDER_MARK).unwrap_or(line);
        }

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
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(millis) = value.parse() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        data.pop();
        Some(SseMessage { event, data })
    }
}

#[cfg(test)]
#[path = "tests/sse_tests.rs"]
mod tests;
