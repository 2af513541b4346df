//! Length-prefixed frame codec for batchexecute response bodies.
//!
//! After the anti-XSSI prefix line is removed, a response body is a sequence
//! of frames, each introduced by a decimal length line:
//!
//! ```text
//! )]}'                 <- anti-XSSI prefix, stripped first
//!
//! 55                   <- length in characters
//! [["wrb.fr","wXbhsf","[[\"nb1\",\"Title\"]]",null,null]]
//! 25
//! [["di",91],["af.httprm"]]
//! ```
//!
//! Lengths count Unicode scalar values of the chunk, so the codec walks UTF-8
//! sequences instead of raw bytes.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::DecodeError;

/// Fixed prefix the service puts in front of every response body
pub const ANTI_XSSI_PREFIX: &str = ")]}'";

/// Maximum declared frame length (64 Mi characters)
pub const MAX_FRAME_CHARS: usize = 64 * 1024 * 1024;

/// One length-prefixed chunk of a response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    declared_length: usize,
    chunk: String,
}

impl Frame {
    #[must_use]
    pub fn new(chunk: impl Into<String>) -> Self {
        let chunk = chunk.into();
        Self {
            declared_length: chunk.chars().count(),
            chunk,
        }
    }

    #[must_use]
    pub fn declared_length(&self) -> usize {
        self.declared_length
    }

    #[must_use]
    pub fn chunk(&self) -> &str {
        &self.chunk
    }

    #[must_use]
    pub fn into_chunk(self) -> String {
        self.chunk
    }
}

/// Remove the anti-XSSI prefix line if present.
///
/// A body without the prefix is passed through unchanged.
#[must_use]
pub fn strip_anti_xssi(body: &str) -> &str {
    let Some(rest) = body.strip_prefix(ANTI_XSSI_PREFIX) else {
        tracing::debug!("Response body has no anti-XSSI prefix");
        return body;
    };

    match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => "",
    }
}

/// Codec for the chunked response format
#[derive(Debug, Default)]
pub struct FrameCodec {
    current_length: Option<usize>,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.current_length.is_none() {
            let blank = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
            src.advance(blank);

            let Some(newline) = src.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };

            let line = src.split_to(newline + 1);
            let text = std::str::from_utf8(&line[..newline])?.trim();
            let length = parse_length(text)?;
            self.current_length = Some(length);
        }

        let Some(length) = self.current_length else {
            return Ok(None);
        };

        let Some(end) = byte_offset_after_chars(src, length) else {
            return Ok(None);
        };

        let payload = src.split_to(end);
        self.current_length = None;

        let chunk = std::str::from_utf8(&payload)?.to_string();
        Ok(Some(Frame {
            declared_length: length,
            chunk,
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        if let Some(expected) = self.current_length.take() {
            let available = String::from_utf8_lossy(buf).chars().count();
            buf.clear();
            return Err(DecodeError::TruncatedFrame {
                expected,
                available,
            });
        }

        // A final length line with no trailing newline
        let rest = String::from_utf8_lossy(buf).trim().to_string();
        buf.clear();
        if rest.is_empty() {
            return Ok(None);
        }

        match parse_length(&rest)? {
            0 => Ok(Some(Frame::new(String::new()))),
            expected => Err(DecodeError::TruncatedFrame {
                expected,
                available: 0,
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = DecodeError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.declared_length > MAX_FRAME_CHARS {
            return Err(DecodeError::FrameTooLarge(item.declared_length));
        }

        let header = format!("{}\n", item.declared_length);
        dst.reserve(header.len() + item.chunk.len() + 1);
        dst.put_slice(header.as_bytes());
        dst.put_slice(item.chunk.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn parse_length(text: &str) -> Result<usize, DecodeError> {
    let length: usize = text
        .parse()
        .map_err(|_| DecodeError::InvalidLength(text.to_string()))?;

    if length > MAX_FRAME_CHARS {
        return Err(DecodeError::FrameTooLarge(length));
    }
    Ok(length)
}

/// Byte offset just past `chars` complete UTF-8 sequences, or `None` if the
/// buffer does not hold that many yet.
fn byte_offset_after_chars(bytes: &[u8], chars: usize) -> Option<usize> {
    let mut offset = 0;
    for _ in 0..chars {
        let lead = *bytes.get(offset)?;
        let width = utf8_width(lead);
        if offset + width > bytes.len() {
            return None;
        }
        offset += width;
    }
    Some(offset)
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        // ASCII, and invalid lead bytes which fail UTF-8 validation later
        _ => 1,
    }
}

/// Split a prefix-stripped body into frames.
///
/// # Errors
///
/// Returns a [`DecodeError`] if a length line is not a non-negative integer,
/// a declared length exceeds what remains, or a chunk is not valid UTF-8.
pub fn read_frames(body: &str) -> Result<Vec<Frame>, DecodeError> {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(body.as_bytes());
    let mut frames = Vec::new();

    while let Some(frame) = codec.decode(&mut buf)? {
        frames.push(frame);
    }
    while let Some(frame) = codec.decode_eof(&mut buf)? {
        frames.push(frame);
    }

    tracing::trace!(count = frames.len(), "Read response frames");
    Ok(frames)
}

/// Produce a complete response body (prefix included) from raw chunks, the
/// way the service does.
///
/// # Errors
///
/// Returns [`DecodeError::FrameTooLarge`] for an oversized chunk.
pub fn write_frames<I, S>(chunks: I) -> Result<String, DecodeError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    buf.put_slice(ANTI_XSSI_PREFIX.as_bytes());
    buf.put_slice(b"\n\n");

    for chunk in chunks {
        codec.encode(Frame::new(chunk), &mut buf)?;
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}
