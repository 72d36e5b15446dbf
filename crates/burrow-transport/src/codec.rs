//! Frame decoding for process output.
//!
//! A process writes newline-delimited records, possibly interleaved with
//! terminal control sequences and split arbitrarily across reads. The
//! [`FrameDecoder`] reassembles complete lines from text chunks; the
//! [`FrameCodec`] drives it from a byte stream via `tokio_util`.

use bytes::{Buf, BytesMut};
use regex::Regex;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::LazyLock;
use tokio_util::codec::Decoder;

/// Longest accepted frame in bytes (10 MB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// `ESC [ <params> <letter>` sequences (colors, cursor movement, erase).
static CONTROL_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid control sequence regex"));

/// Remove terminal control sequences, then stray carriage returns and escapes.
pub fn strip_control(text: &str) -> Cow<'_, str> {
    let stripped = CONTROL_SEQUENCE.replace_all(text, "");
    if stripped.contains(['\r', '\x1b']) {
        Cow::Owned(stripped.replace(['\r', '\x1b'], ""))
    } else {
        stripped
    }
}

/// Reassembles newline-delimited lines from text chunks.
///
/// Only complete lines are cleaned and emitted; the unterminated tail stays
/// buffered untouched, so the output does not depend on where chunk
/// boundaries fall. Lines longer than the configured maximum are dropped.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: String,
    max_frame_bytes: usize,
    /// Set after the buffered tail overflowed; the rest of that line is dropped.
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a decoder that drops lines longer than `max_frame_bytes`.
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Text received after the last newline.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Append a chunk and return the lines it completed.
    pub fn feed(&mut self, chunk: &str) -> Frames {
        self.buffer.push_str(chunk);

        let complete = match self.buffer.rfind('\n') {
            Some(pos) => {
                let tail = self.buffer.split_off(pos + 1);
                std::mem::replace(&mut self.buffer, tail)
            }
            None => String::new(),
        };

        let skip_first = self.discarding && !complete.is_empty();
        if !complete.is_empty() {
            self.discarding = false;
        }

        if self.buffer.len() > self.max_frame_bytes {
            tracing::warn!(
                buffered = self.buffer.len(),
                max = self.max_frame_bytes,
                "Frame exceeds maximum size, discarding until next newline"
            );
            self.buffer.clear();
            self.discarding = true;
        }

        Frames {
            text: complete,
            pos: 0,
            skip_first,
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    /// Extract the unterminated tail at end of stream.
    ///
    /// Returns `None` when the tail is blank or belongs to a discarded frame.
    pub fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        let line = strip_control(&tail);
        if line.trim().is_empty() {
            None
        } else {
            Some(line.into_owned())
        }
    }
}

/// Lines completed by one [`FrameDecoder::feed`] call, produced lazily.
#[derive(Debug)]
pub struct Frames {
    text: String,
    pos: usize,
    skip_first: bool,
    max_frame_bytes: usize,
}

impl Iterator for Frames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            let end = rest.find('\n').unwrap_or(rest.len());
            let raw = &rest[..end];
            self.pos += end + 1;

            if std::mem::take(&mut self.skip_first) {
                tracing::trace!(len = raw.len(), "Dropping remainder of oversized frame");
                continue;
            }
            if raw.len() > self.max_frame_bytes {
                tracing::warn!(
                    len = raw.len(),
                    max = self.max_frame_bytes,
                    "Dropping oversized frame"
                );
                continue;
            }

            let line = strip_control(raw);
            if line.trim().is_empty() {
                continue;
            }
            return Some(line.into_owned());
        }
        None
    }
}

/// `tokio_util` decoder yielding cleaned lines from a process byte stream.
///
/// UTF-8 sequences split across reads are held back until complete; invalid
/// bytes are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct FrameCodec {
    decoder: FrameDecoder,
    ready: VecDeque<String>,
}

impl FrameCodec {
    /// Create a codec with the default frame limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that drops lines longer than `max_frame_bytes`.
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            decoder: FrameDecoder::with_max_frame_bytes(max_frame_bytes),
            ready: VecDeque::new(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if self.ready.is_empty() {
            if let Some(text) = take_text(src) {
                self.ready.extend(self.decoder.feed(&text));
            }
        }
        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            let rest = src.split();
            let text = String::from_utf8_lossy(&rest).into_owned();
            self.ready.extend(self.decoder.feed(&text));
        }
        if let Some(tail) = self.decoder.flush() {
            self.ready.push_back(tail);
        }
        Ok(self.ready.pop_front())
    }
}

/// Consume all decodable text from `src`, leaving an incomplete trailing
/// UTF-8 sequence in place.
fn take_text(src: &mut BytesMut) -> Option<String> {
    let mut text = String::new();
    loop {
        let (valid, invalid) = match std::str::from_utf8(src) {
            Ok(s) => (s.len(), None),
            Err(e) => (e.valid_up_to(), Some(e.error_len())),
        };
        text.push_str(&String::from_utf8_lossy(&src[..valid]));

        match invalid {
            None => {
                src.clear();
                break;
            }
            Some(Some(len)) => {
                text.push(char::REPLACEMENT_CHARACTER);
                src.advance(valid + len);
            }
            Some(None) => {
                src.advance(valid);
                break;
            }
        }
    }
    (!text.is_empty()).then_some(text)
}
