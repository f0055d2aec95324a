//! Server-Sent Events (SSE) parsing.
//!
//! [`SseParser`] is fed raw body chunks and yields complete events. Lines
//! end in `\n` or `\r\n`; a chunk boundary may fall anywhere, including in
//! the middle of a UTF-8 sequence, since only complete lines are decoded.

use crate::codec::FramingError;
use bytes::{Buf, BytesMut};

/// The event type MCP messages are sent under.
pub const MESSAGE_EVENT: &str = "message";

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `id:` field, if the event carried one.
    pub id: Option<String>,
    /// The `event:` field, `"message"` when absent.
    pub event: String,
    /// The `data:` lines joined with `\n`.
    pub data: String,
    /// The `retry:` field in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Whether this event carries an MCP message.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.event == MESSAGE_EVENT
    }
}

/// Incremental SSE parser.
#[derive(Debug)]
pub struct SseParser {
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no `\n`.
    scan_from: usize,
    max_line_length: usize,
    discarding: bool,
    id: Option<String>,
    event: Option<String>,
    data: String,
    retry: Option<u64>,
    has_fields: bool,
}

impl SseParser {
    /// Create a parser that rejects lines longer than `max_line_length`.
    #[must_use]
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scan_from: 0,
            max_line_length,
            discarding: false,
            id: None,
            event: None,
            data: String::new(),
            retry: None,
            has_fields: false,
        }
    }

    /// Append a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Parse buffered lines until an event completes.
    ///
    /// Returns `Ok(None)` when more input is needed.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::LineTooLong`] when a line or an event's data
    /// exceeds the limit. The offending input is dropped and later calls
    /// continue with what follows.
    pub fn next_event(&mut self) -> Result<Option<SseEvent>, FramingError> {
        while let Some(offset) = self.buf[self.scan_from..].iter().position(|b| *b == b'\n') {
            let pos = self.scan_from + offset;
            self.scan_from = 0;
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > self.max_line_length {
                return Err(FramingError::LineTooLong {
                    size: line.len(),
                    max: self.max_line_length,
                });
            }
            if let Some(event) = self.process_line(&line)? {
                return Ok(Some(event));
            }
        }

        self.scan_from = self.buf.len();
        if self.buf.len() > self.max_line_length {
            let size = self.buf.len();
            self.buf.advance(size);
            self.scan_from = 0;
            self.discarding = true;
            return Err(FramingError::LineTooLong {
                size,
                max: self.max_line_length,
            });
        }
        Ok(None)
    }

    /// Whether a partial line or event is pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty() || self.has_fields
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<SseEvent>, FramingError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line[0] == b':' {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "data" => {
                if self.data.len() + value.len() > self.max_line_length {
                    let size = self.data.len() + value.len();
                    self.reset();
                    return Err(FramingError::LineTooLong {
                        size,
                        max: self.max_line_length,
                    });
                }
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = Some(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok();
                }
            }
            _ => return Ok(None),
        }
        self.has_fields = true;
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if !self.has_fields {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        let event = SseEvent {
            id: self.id.take(),
            event: self
                .event
                .take()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| MESSAGE_EVENT.to_string()),
            data,
            retry: self.retry.take(),
        };
        self.has_fields = false;
        Some(event)
    }

    fn reset(&mut self) {
        self.id = None;
        self.event = None;
        self.data.clear();
        self.retry = None;
        self.has_fields = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LIMIT: usize = 16 * 1024 * 1024;

    fn feed(parser: &mut SseParser, chunk: &[u8]) -> Result<Vec<SseEvent>, FramingError> {
        parser.push(chunk);
        let mut events = Vec::new();
        while let Some(event) = parser.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    #[test]
    fn test_single_event() -> Result<(), Box<dyn std::error::Error>> {
        let mut parser = SseParser::new(LIMIT);
        let events =
            feed(&mut parser, b"id: evt-001\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n")?;

        assert_eq!(
            events,
            vec![SseEvent {
                id: Some("evt-001".to_string()),
                event: "message".to_string(),
                data: "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}".to_string(),
                retry: None,
            }]
        );
        assert!(!parser.has_pending());
        Ok(())
    }

    #[test]
    fn test_multiline_data_and_crlf() -> Result<(), Box<dyn std::error::Error>> {
        let mut parser = SseParser::new(LIMIT);
        let events = feed(&mut parser, b"event: message\r\ndata: line one\r\ndata:line two\r\n\r\n")?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
        assert!(events[0].is_message());
        Ok(())
    }

    #[test]
    fn test_chunk_boundaries_and_split_utf8() -> Result<(), Box<dyn std::error::Error>> {
        let input = "id: 7\ndata: {\"text\":\"h\u{e9}llo \u{1f980}\"}\n\n".as_bytes();
        let mut parser = SseParser::new(LIMIT);
        let mut events = Vec::new();
        for byte in input {
            events.extend(feed(&mut parser, std::slice::from_ref(byte))?);
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].data, "{\"text\":\"h\u{e9}llo \u{1f980}\"}");
        Ok(())
    }

    #[test]
    fn test_comments_retry_and_custom_events() -> Result<(), Box<dyn std::error::Error>> {
        let mut parser = SseParser::new(LIMIT);
        let events = feed(&mut parser, 
            b": keep-alive\n\nretry: 2500\nevent: endpoint\ndata: /messages\n\nretry: soon\ndata: x\n\n",
        )?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].retry, Some(2500));
        assert_eq!(events[0].event, "endpoint");
        assert!(!events[0].is_message());
        assert_eq!(events[1].retry, None);
        assert_eq!(events[1].data, "x");
        Ok(())
    }

    #[test]
    fn test_id_only_event_is_dispatched() -> Result<(), Box<dyn std::error::Error>> {
        let mut parser = SseParser::new(LIMIT);
        let events = feed(&mut parser, b"id: 42\n\n")?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert!(events[0].data.is_empty());
        Ok(())
    }

    #[test]
    fn test_incomplete_event_is_held() -> Result<(), Box<dyn std::error::Error>> {
        let mut parser = SseParser::new(LIMIT);
        assert!(feed(&mut parser, b"id: evt-001\ndata: {\"jsonrpc\":\"2.0\"")?.is_empty());
        assert!(parser.has_pending());
        let events = feed(&mut parser, b"}\n\n")?;
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
        Ok(())
    }

    #[test]
    fn test_large_event_in_small_chunks_is_scanned_once() -> Result<(), Box<dyn std::error::Error>> {
        let payload = "x".repeat(1024 * 1024);
        let input = format!("id: big\ndata: {payload}\n\n");
        let mut parser = SseParser::new(LIMIT);
        let mut events = Vec::new();
        for chunk in input.as_bytes().chunks(4096) {
            events.extend(feed(&mut parser, chunk)?);
            // Nothing before the scan offset is looked at again.
            assert_eq!(parser.scan_from, parser.buf.len());
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.len(), payload.len());
        assert!(!parser.has_pending());
        Ok(())
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let mut parser = SseParser::new(10);
        let err = feed(&mut parser, b"data: 0123456789abcdef").unwrap_err();
        assert!(matches!(err, FramingError::LineTooLong { max: 10, .. }));

        let events = feed(&mut parser, b"tail\ndata: ok\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }
}
