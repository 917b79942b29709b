//! NDJSON framing codec for protocol streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length to
//! prevent memory exhaustion caused by unterminated or maliciously large
//! frames from a misbehaving peer, and parses each line into a [`Message`].
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound). The writer task calls
//! [`Encoder::encode`] directly into a reusable buffer.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_harness::rpc::codec::FrameCodec;
//!
//! let frames = FramedRead::new(child_stdout, FrameCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::rpc::message::Message;
use crate::{AppError, Result};

/// Maximum line length accepted by the codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited JSON codec producing [`Message`]s.
///
/// # Decoder
///
/// - `Ok(None)` while `src` holds no complete line (partial frames are
///   buffered across reads).
/// - Blank lines are skipped.
/// - A line that is not a well-formed message, or exceeds
///   [`MAX_LINE_BYTES`], yields [`AppError::Framing`].
/// - At EOF a trailing unterminated fragment is parsed as a final message;
///   if it is not a complete message the decoder yields
///   [`AppError::Framing`].
///
/// # Encoder
///
/// Messages are encoded as `json\n`. The max-length limit is a decoder-side
/// concern and is not enforced during encoding.
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a new `FrameCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => {}
                Some(line) => return Message::from_line(&line).map(Some),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src).map_err(map_codec_error)? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    return Message::from_line(&line).map(Some).map_err(|e| {
                        AppError::Framing(format!("incomplete frame at end of stream: {e}"))
                    })
                }
            }
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let line = item.to_line()?;
        self.0.encode(line, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Framing(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}
