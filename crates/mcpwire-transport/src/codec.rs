//! Newline-delimited JSON framing.
//!
//! Used by the stdio transport. Each frame is one JSON document (a single
//! message or a batch array) terminated by `\n`. A trailing `\r` is
//! tolerated and blank lines are ignored.
//!
//! A malformed line is consumed before the error is returned, so a reader
//! can report it and keep calling [`Decoder::decode`] on the same buffer.

use bytes::{BufMut, BytesMut};
use mcpwire_core::{Payload, PayloadError};
use miette::Diagnostic;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum length of a single line: 16 MiB.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Errors produced while framing messages.
//
// `Diagnostic` is implemented by hand: the derive's `transparent` forwarding
// calls `field.code()`, which resolves to the inherent `PayloadError::code`.
#[derive(Error, Debug)]
pub enum FramingError {
    /// The line was not a valid JSON-RPC message or batch.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// A line exceeded the configured maximum length.
    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    LineTooLong {
        /// Bytes seen so far.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Underlying I/O error.
    #[error("I/O error while framing: {0}")]
    Io(#[from] std::io::Error),
}

impl Diagnostic for FramingError {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            Self::Payload(e) => Diagnostic::code(e),
            Self::LineTooLong { .. } => Some(Box::new("mcpwire::framing::line_too_long")),
            Self::Io(_) => Some(Box::new("mcpwire::framing::io")),
        }
    }

    fn severity(&self) -> Option<miette::Severity> {
        match self {
            Self::Payload(e) => Diagnostic::severity(e),
            _ => None,
        }
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            Self::Payload(e) => Diagnostic::help(e),
            Self::LineTooLong { .. } => Some(Box::new(
                "Raise max_line_length if the peer legitimately sends large messages",
            )),
            Self::Io(_) => None,
        }
    }

    fn url<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            Self::Payload(e) => Diagnostic::url(e),
            _ => None,
        }
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        match self {
            Self::Payload(e) => Diagnostic::source_code(e),
            _ => None,
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        match self {
            Self::Payload(e) => Diagnostic::labels(e),
            _ => None,
        }
    }

    fn related<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn Diagnostic> + 'a>> {
        match self {
            Self::Payload(e) => Diagnostic::related(e),
            _ => None,
        }
    }

    fn diagnostic_source(&self) -> Option<&dyn Diagnostic> {
        match self {
            Self::Payload(e) => Diagnostic::diagnostic_source(e),
            _ => None,
        }
    }
}

/// A codec for newline-delimited JSON-RPC payloads.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    max_line_length: usize,
    /// Offset already scanned for a newline.
    next_index: usize,
    /// Dropping the remainder of an oversized line.
    discarding: bool,
}

impl JsonLineCodec {
    /// Create a codec with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub const fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
            discarding: false,
        }
    }

    /// The configured line limit.
    #[must_use]
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    fn parse_line(line: &[u8]) -> Result<Option<Payload>, FramingError> {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(Payload::parse(trimmed)?))
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = Payload;
    type Error = FramingError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Payload>, FramingError> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(pos) = newline else {
                if self.discarding {
                    buf.clear();
                    self.next_index = 0;
                } else if buf.len() > self.max_line_length {
                    let size = buf.len();
                    buf.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Err(FramingError::LineTooLong {
                        size,
                        max: self.max_line_length,
                    });
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            let line = buf.split_to(pos + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() - 1 > self.max_line_length {
                return Err(FramingError::LineTooLong {
                    size: line.len() - 1,
                    max: self.max_line_length,
                });
            }
            match Self::parse_line(&line[..pos])? {
                Some(payload) => return Ok(Some(payload)),
                None => continue,
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Payload>, FramingError> {
        if let Some(payload) = self.decode(buf)? {
            return Ok(Some(payload));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            self.discarding = false;
            self.next_index = 0;
            return Ok(None);
        }
        let rest = buf.split();
        self.next_index = 0;
        Self::parse_line(&rest)
    }
}

impl Encoder<Payload> for JsonLineCodec {
    type Error = FramingError;

    fn encode(&mut self, payload: Payload, dst: &mut BytesMut) -> Result<(), FramingError> {
        let json = payload.to_vec()?;
        if json.len() > self.max_line_length {
            return Err(FramingError::LineTooLong {
                size: json.len(),
                max: self.max_line_length,
            });
        }
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
