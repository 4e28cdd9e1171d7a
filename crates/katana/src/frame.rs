//! Multipart message framing.
//!
//! Every message is a list of opaque parts. On the wire a message is the part
//! count followed by each part, each prefixed with its length:
//!
//! ```text
//! [count: u32 BE] ([len: u32 BE] [bytes; len])*
//! ```
//!
//! Requests travel as `[action, command]` or `[action, command, mappings]`
//! and replies as `[meta, payload]`.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Largest message accepted, headers included.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Largest number of parts accepted in one message.
pub const MAX_PARTS: usize = 8;

const HEADER_SIZE: usize = 4;

/// Errors raised while framing messages.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame I/O failed: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("message has {count} parts, at most {max} are accepted")]
    TooManyParts { count: usize, max: usize },
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

/// One message made of opaque parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    parts: Vec<Bytes>,
}

impl Multipart {
    /// A message holding `parts` in order.
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns `true` for a message without parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The part at `index`.
    #[must_use]
    pub fn part(&self, index: usize) -> Option<&Bytes> {
        self.parts.get(index)
    }

    /// Every part, in order.
    #[must_use]
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    /// Releases the parts.
    #[must_use]
    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }

    fn encoded_len(&self) -> usize {
        self.parts
            .iter()
            .fold(HEADER_SIZE, |total, part| total + HEADER_SIZE + part.len())
    }
}

fn read_len(cursor: &mut &[u8]) -> Option<usize> {
    if cursor.remaining() < HEADER_SIZE {
        return None;
    }
    Some(usize::try_from(cursor.get_u32()).unwrap_or(usize::MAX))
}

/// [`Decoder`] and [`Encoder`] for [`Multipart`] messages.
#[derive(Debug, Clone, Copy)]
pub struct MultipartCodec {
    max_message_size: usize,
}

impl Default for MultipartCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl MultipartCodec {
    /// A codec refusing messages larger than `max_message_size` bytes.
    #[must_use]
    pub const fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    fn check_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_message_size {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Length of the complete message at the head of `src`, if buffered.
    fn complete_len(&self, src: &[u8]) -> Result<Option<usize>, FrameError> {
        let mut cursor = src;
        let Some(count) = read_len(&mut cursor) else {
            return Ok(None);
        };
        if count > MAX_PARTS {
            return Err(FrameError::TooManyParts {
                count,
                max: MAX_PARTS,
            });
        }
        let mut total = HEADER_SIZE;
        for _ in 0..count {
            let Some(size) = read_len(&mut cursor) else {
                return Ok(None);
            };
            total = total.saturating_add(HEADER_SIZE).saturating_add(size);
            self.check_size(total)?;
            if cursor.remaining() < size {
                return Ok(None);
            }
            cursor.advance(size);
        }
        Ok(Some(total))
    }
}

impl Decoder for MultipartCodec {
    type Item = Multipart;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Multipart>, FrameError> {
        let Some(total) = self.complete_len(src)? else {
            src.reserve(HEADER_SIZE);
            return Ok(None);
        };
        let mut frame = src.split_to(total);
        let count = frame.get_u32();
        let mut parts = Vec::new();
        for _ in 0..count {
            let size = usize::try_from(frame.get_u32()).unwrap_or(usize::MAX);
            parts.push(frame.split_to(size).freeze());
        }
        Ok(Some(Multipart { parts }))
    }
}

impl Encoder<Multipart> for MultipartCodec {
    type Error = FrameError;

    fn encode(&mut self, message: Multipart, dst: &mut BytesMut) -> Result<(), FrameError> {
        if message.len() > MAX_PARTS {
            return Err(FrameError::TooManyParts {
                count: message.len(),
                max: MAX_PARTS,
            });
        }
        let total = message.encoded_len();
        self.check_size(total)?;
        let header = |len: usize| {
            u32::try_from(len).map_err(|_| FrameError::TooLarge {
                size: len,
                max: self.max_message_size,
            })
        };
        dst.reserve(total);
        dst.put_u32(header(message.len())?);
        for part in message.parts {
            dst.put_u32(header(part.len())?);
            dst.put_slice(&part);
        }
        Ok(())
    }
}
