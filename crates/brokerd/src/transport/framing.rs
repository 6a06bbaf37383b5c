//! Request framing over a byte stream.
//!
//! Requests are newline-delimited JSON. Older clients send a single JSON
//! object without a terminator and wait for the reply, so an unterminated
//! buffer is also accepted once it holds one complete object, or at EOF. A
//! newline trailing such an object is absorbed rather than read as an empty
//! request.

use std::io::{self, Read};

use serde::de::IgnoredAny;
use thiserror::Error;

const READ_CHUNK: usize = 8 * 1024;

/// One request's worth of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// Newline-terminated line, terminator stripped.
    Line(Vec<u8>),
    /// Complete unterminated object.
    Unterminated(Vec<u8>),
}

impl Frame {
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Self::Line(bytes) | Self::Unterminated(bytes) => bytes,
        }
    }
}

/// Errors raised while reading a frame.
#[derive(Debug, Error)]
pub(crate) enum FrameError {
    /// The frame exceeded the configured maximum. The reader skips to the
    /// next newline before yielding another frame.
    #[error("request too large: {size} bytes exceeds {max} byte limit")]
    TooLarge { size: usize, max: usize },
    /// The underlying stream failed or timed out.
    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),
}

/// Splits a stream into request frames.
#[derive(Debug)]
pub(crate) struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
    max_bytes: usize,
    discarding: bool,
    absorb_whitespace: bool,
}

impl<R: Read> FrameReader<R> {
    pub(crate) fn new(reader: R, max_bytes: usize) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            max_bytes,
            discarding: false,
            absorb_whitespace: false,
        }
    }

    /// Returns the next frame, or `None` at a clean EOF.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.take_buffered()? {
                return Ok(Some(frame));
            }
            let read = read_with_retry(&mut self.reader, &mut chunk)?;
            if read == 0 {
                return Ok(self.finish());
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn take_buffered(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.discarding {
            match newline_position(&self.buffer) {
                Some(position) => {
                    self.buffer.drain(..=position);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }
        }
        if self.absorb_whitespace {
            let skip = self
                .buffer
                .iter()
                .take_while(|byte| byte.is_ascii_whitespace())
                .count();
            self.buffer.drain(..skip);
            if self.buffer.is_empty() {
                return Ok(None);
            }
            self.absorb_whitespace = false;
        }

        if let Some(position) = newline_position(&self.buffer) {
            let mut line: Vec<u8> = self.buffer.drain(..=position).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_bytes {
                return Err(FrameError::TooLarge {
                    size: line.len(),
                    max: self.max_bytes,
                });
            }
            return Ok(Some(Frame::Line(line)));
        }
        if self.buffer.len() > self.max_bytes {
            let size = self.buffer.len();
            self.buffer.clear();
            self.discarding = true;
            return Err(FrameError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        if is_complete_object(&self.buffer) {
            self.absorb_whitespace = true;
            return Ok(Some(Frame::Unterminated(std::mem::take(&mut self.buffer))));
        }
        Ok(None)
    }

    fn finish(&mut self) -> Option<Frame> {
        if self.discarding || self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            return None;
        }
        Some(Frame::Unterminated(std::mem::take(&mut self.buffer)))
    }
}

fn newline_position(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|byte| *byte == b'\n')
}

// Parsing is only attempted once the buffer ends in `}`.
fn is_complete_object(buffer: &[u8]) -> bool {
    let trimmed = buffer.trim_ascii_end();
    trimmed.last() == Some(&b'}') && serde_json::from_slice::<IgnoredAny>(trimmed).is_ok()
}

/// Reads from the stream, retrying on interrupts.
fn read_with_retry<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}
