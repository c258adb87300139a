//! `Content-Length` frame codec for both relay directions.
//!
//! Each frame is a textual header block terminated by `\r\n\r\n`, followed by
//! exactly `Content-Length` bytes of UTF-8 body:
//!
//! ```text
//! Content-Length: 47\r\n
//! \r\n
//! {"jsonrpc":"2.0","method":"initialized","params":{}}
//! ```
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] on stdin and on the peer socket, and call
//! [`Encoder::encode`] directly to serialize outgoing frames.
//!
//! Lengths are always byte lengths of the UTF-8 encoding, never character
//! counts, so bodies with multi-byte characters are sliced at the right offset.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{AppError, Result};

/// Terminator between the header block and the body.
pub const HEADER_DELIMITER: &[u8; 4] = b"\r\n\r\n";

/// Header field naming the body length (matched case-insensitively).
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Upper bound on the buffer growth requested ahead of a partial body.
const MAX_RESERVE_BYTES: usize = 1_048_576;

/// One complete protocol message.
///
/// The declared length always equals the UTF-8 byte length of `payload`; a
/// frame only exists once its whole body has been received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: String,
}

impl Frame {
    /// Wrap a payload.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Decoded body text.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Consume the frame, returning its body.
    #[must_use]
    pub fn into_payload(self) -> String {
        self.payload
    }

    /// Length written to the `Content-Length` header: encoded bytes, not chars.
    #[must_use]
    pub fn declared_length(&self) -> usize {
        self.payload.len()
    }
}

/// Incremental decoder and serializer for `Content-Length` framed messages.
///
/// # Decoder
///
/// - No delimiter yet: returns `Ok(None)` and leaves the buffer untouched.
/// - Header without a usable length: the header and delimiter are dropped
///   and decoding resumes with the following bytes.
/// - Body incomplete: returns `Ok(None)`; the header stays in the buffer.
/// - Body not valid UTF-8: the frame is dropped and decoding resumes.
///
/// # Encoder
///
/// Emits `Content-Length: <n>\r\n\r\n<payload>`.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Buffer prefix already searched for a delimiter without success.
    scanned: usize,
}

impl FrameCodec {
    /// Create a codec with an empty scan position.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract every complete frame in `src`, handing each to `on_frame` in
    /// order. Incomplete trailing bytes stay in `src` for the next call.
    ///
    /// # Errors
    ///
    /// Propagates decoder errors; malformed headers are not errors.
    pub fn extract_frames(
        &mut self,
        src: &mut BytesMut,
        mut on_frame: impl FnMut(Frame),
    ) -> Result<()> {
        while let Some(frame) = self.decode(src)? {
            on_frame(frame);
        }
        Ok(())
    }

    /// Locate the header delimiter, skipping the prefix already searched.
    fn find_delimiter(&mut self, src: &BytesMut) -> Option<usize> {
        // Back up so a delimiter split across two reads is still found.
        let start = self
            .scanned
            .min(src.len())
            .saturating_sub(HEADER_DELIMITER.len() - 1);
        let found = src[start..]
            .windows(HEADER_DELIMITER.len())
            .position(|window| window == HEADER_DELIMITER)
            .map(|offset| start + offset);
        if found.is_none() {
            self.scanned = src.len();
        }
        found
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(header_end) = self.find_delimiter(src) else {
                return Ok(None);
            };
            let body_start = header_end + HEADER_DELIMITER.len();

            let Some(body_len) = parse_content_length(&src[..header_end]) else {
                warn!(
                    header = %String::from_utf8_lossy(&src[..header_end]),
                    "frame codec: header without usable Content-Length, skipping"
                );
                src.advance(body_start);
                self.scanned = 0;
                continue;
            };

            let Some(frame_end) = body_start.checked_add(body_len) else {
                warn!(body_len, "frame codec: Content-Length out of range, skipping");
                src.advance(body_start);
                self.scanned = 0;
                continue;
            };
            if src.len() < frame_end {
                // Header is complete; everything before it has been scanned.
                self.scanned = header_end;
                src.reserve((frame_end - src.len()).min(MAX_RESERVE_BYTES));
                return Ok(None);
            }

            let mut raw = src.split_to(frame_end);
            raw.advance(body_start);
            self.scanned = 0;

            match String::from_utf8(raw.to_vec()) {
                Ok(payload) => return Ok(Some(Frame { payload })),
                Err(err) => {
                    warn!(error = %err, body_len, "frame codec: body is not valid UTF-8, skipping");
                }
            }
        }
    }

    /// Decode what remains when the stream ends; a trailing partial frame is
    /// discarded rather than reported as an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            warn!(
                remaining = src.len(),
                "frame codec: stream ended inside a frame, discarding partial bytes"
            );
            src.clear();
            self.scanned = 0;
        }
        Ok(None)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        write_frame(&item, dst);
        Ok(())
    }
}

/// Serialize a single frame into a fresh buffer.
#[must_use]
pub fn encode_frame(frame: Frame) -> BytesMut {
    let mut dst = BytesMut::new();
    write_frame(&frame, &mut dst);
    dst
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn write_frame(frame: &Frame, dst: &mut BytesMut) {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", frame.declared_length());
    dst.reserve(header.len() + frame.declared_length());
    dst.put_slice(header.as_bytes());
    dst.put_slice(frame.payload.as_bytes());
}

/// Find a `Content-Length` line in a header block and parse its value.
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
