//! Encoding and decoding for the `DataChat` wire protocol.
//!
//! Wire format, all integers big-endian:
//!
//! ```text
//! string  := u16 length, UTF-8 bytes
//! payload := u32 length, raw bytes
//!
//! CONNECT    name
//! DISCONNECT name
//! TEXT       sender dest timestamp body
//! IMG|AUDIO|FILE sender dest filename payload
//! LISTE      "name1,name2,...,"
//! ```
//!
//! Every frame starts with its tag encoded as a string. One frame fills one
//! datagram exactly; leftover bytes are rejected.

use crate::frame::{BinaryKind, Frame, MAX_DATAGRAM_SIZE, ROSTER_SEPARATOR, tag};

/// Errors produced while encoding or decoding a frame.
///
/// All of them concern a single frame; the caller drops it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A declared length runs past the end of the buffer.
    #[error("truncated frame: need {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the length prefix asked for.
        needed: usize,
        /// Bytes actually left in the buffer.
        available: usize,
    },

    /// The leading tag is not one of the known frame types.
    #[error("unknown frame type: {0:?}")]
    UnknownType(String),

    /// A field or the whole frame is larger than allowed.
    #[error("declared length {declared} exceeds limit {limit}")]
    OversizeDeclaredLength {
        /// Length that was requested.
        declared: usize,
        /// Largest length permitted.
        limit: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Bytes remain after a complete frame.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// A roster name contains the roster separator and cannot be listed.
    #[error("roster name {0:?} contains the separator")]
    InvalidRosterName(String),
}

/// Encodes a [`Frame`] into a datagram payload.
///
/// `max_payload` bounds the attachment of a [`Frame::Binary`]; the whole
/// frame is additionally bounded by [`MAX_DATAGRAM_SIZE`].
///
/// # Errors
///
/// Returns [`FrameError::OversizeDeclaredLength`] if the payload, a string
/// field, or the encoded frame is too large, and
/// [`FrameError::InvalidRosterName`] if a roster name contains the
/// separator. Nothing is produced on error.
pub fn encode(frame: &Frame, max_payload: usize) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(64);
    put_str(&mut out, frame.tag())?;

    match frame {
        Frame::Connect { name } | Frame::Disconnect { name } => put_str(&mut out, name)?,
        Frame::Text {
            sender,
            dest,
            timestamp,
            body,
        } => {
            put_str(&mut out, sender)?;
            put_str(&mut out, dest)?;
            put_str(&mut out, timestamp)?;
            put_str(&mut out, body)?;
        }
        Frame::Binary {
            kind: _,
            sender,
            dest,
            filename,
            payload,
        } => {
            let limit = max_payload.min(MAX_DATAGRAM_SIZE);
            if payload.len() > limit {
                return Err(FrameError::OversizeDeclaredLength {
                    declared: payload.len(),
                    limit,
                });
            }
            put_str(&mut out, sender)?;
            put_str(&mut out, dest)?;
            put_str(&mut out, filename)?;
            put_bytes(&mut out, payload)?;
        }
        Frame::Roster { names } => put_str(&mut out, &join_roster(names)?)?,
    }

    if out.len() > MAX_DATAGRAM_SIZE {
        return Err(FrameError::OversizeDeclaredLength {
            declared: out.len(),
            limit: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(out)
}

/// Decodes one [`Frame`] from a datagram payload.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] when a length prefix overruns the
/// buffer, [`FrameError::UnknownType`] for an unrecognized tag,
/// [`FrameError::InvalidUtf8`] for a malformed string, and
/// [`FrameError::TrailingBytes`] when the buffer holds more than one frame.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let mut reader = Reader::new(bytes);
    let tag = reader.string()?;

    let frame = match tag.as_str() {
        tag::CONNECT => Frame::Connect {
            name: reader.string()?,
        },
        tag::DISCONNECT => Frame::Disconnect {
            name: reader.string()?,
        },
        tag::TEXT => Frame::Text {
            sender: reader.string()?,
            dest: reader.string()?,
            timestamp: reader.string()?,
            body: reader.string()?,
        },
        tag::ROSTER => Frame::Roster {
            names: split_roster(&reader.string()?),
        },
        other => {
            let Some(kind) = BinaryKind::from_tag(other) else {
                return Err(FrameError::UnknownType(tag));
            };
            Frame::Binary {
                kind,
                sender: reader.string()?,
                dest: reader.string()?,
                filename: reader.string()?,
                payload: reader.bytes()?,
            }
        }
    };

    match reader.remaining() {
        0 => Ok(frame),
        n => Err(FrameError::TrailingBytes(n)),
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<(), FrameError> {
    let len = u16::try_from(s.len()).map_err(|_| FrameError::OversizeDeclaredLength {
        declared: s.len(),
        limit: usize::from(u16::MAX),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_bytes(out: &mut Vec<u8>, data: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(data.len()).map_err(|_| FrameError::OversizeDeclaredLength {
        declared: data.len(),
        limit: u32::MAX as usize,
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

fn join_roster(names: &[String]) -> Result<String, FrameError> {
    let mut joined = String::new();
    for name in names {
        if name.contains(ROSTER_SEPARATOR) {
            return Err(FrameError::InvalidRosterName(name.clone()));
        }
        joined.push_str(name);
        joined.push(ROSTER_SEPARATOR);
    }
    Ok(joined)
}

fn split_roster(list: &str) -> Vec<String> {
    if list.is_empty() {
        return Vec::new();
    }
    // The last name carries a separator too; tolerate senders that omit it.
    let list = list.strip_suffix(ROSTER_SEPARATOR).unwrap_or(list);
    list.split(ROSTER_SEPARATOR).map(str::to_owned).collect()
}

/// Cursor over a received datagram.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    const fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if n > self.buf.len() {
            return Err(FrameError::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    fn string(&mut self) -> Result<String, FrameError> {
        let len = u16::from_be_bytes(self.take_array()?);
        let raw = self.take(usize::from(len))?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| FrameError::InvalidUtf8)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, FrameError> {
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        Ok(self.take(len)?.to_vec())
    }
}
