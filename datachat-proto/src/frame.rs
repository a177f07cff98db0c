//! Frame types for the `DataChat` wire protocol.
//!
//! A [`Frame`] is one application message carried by exactly one UDP
//! datagram. The set of variants is closed: every tag on the wire maps to
//! exactly one variant, and the relay matches on them exhaustively.

use std::fmt;

/// Recommended ceiling for a binary payload, in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 60_000;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Default reserved destination meaning "every session except the sender".
pub const DEFAULT_BROADCAST_TOKEN: &str = "TOUS";

/// Separator placed after each name in a roster frame.
pub const ROSTER_SEPARATOR: char = ',';

/// Wire tags, each sent as a length-prefixed string at the start of a frame.
pub mod tag {
    /// Session registration.
    pub const CONNECT: &str = "CONNECT";
    /// Session departure.
    pub const DISCONNECT: &str = "DISCONNECT";
    /// Chat text.
    pub const TEXT: &str = "TEXT";
    /// Image attachment.
    pub const IMAGE: &str = "IMG";
    /// Audio clip.
    pub const AUDIO: &str = "AUDIO";
    /// Arbitrary file.
    pub const FILE: &str = "FILE";
    /// Participant list, server to client only.
    pub const ROSTER: &str = "LISTE";
}

/// Kind of binary attachment carried by [`Frame::Binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    /// An image to be displayed inline.
    Image,
    /// A recorded audio clip.
    Audio,
    /// Any other file, saved under its declared filename.
    File,
}

impl BinaryKind {
    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Image => tag::IMAGE,
            Self::Audio => tag::AUDIO,
            Self::File => tag::FILE,
        }
    }

    /// Maps a wire tag back to a binary kind, if it is one.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            tag::IMAGE => Some(Self::Image),
            tag::AUDIO => Some(Self::Audio),
            tag::FILE => Some(Self::File),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::File => write!(f, "file"),
        }
    }
}

/// One decoded application message.
///
/// String fields are carried verbatim. Names and filenames may be empty;
/// sanitizing them is up to whoever displays or stores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Registers `name` at the datagram's source address.
    Connect {
        /// Participant name (case-sensitive identity key).
        name: String,
    },

    /// Removes the session registered under `name`.
    Disconnect {
        /// Participant name.
        name: String,
    },

    /// A chat line.
    Text {
        /// Name of the sending participant.
        sender: String,
        /// Recipient name, or the broadcast token.
        dest: String,
        /// Sender-supplied timestamp, opaque to the relay.
        timestamp: String,
        /// Message body.
        body: String,
    },

    /// An image, audio clip, or file.
    Binary {
        /// What the payload represents.
        kind: BinaryKind,
        /// Name of the sending participant.
        sender: String,
        /// Recipient name, or the broadcast token.
        dest: String,
        /// Name the receiver should store the payload under.
        filename: String,
        /// Raw bytes, forwarded without inspection.
        payload: Vec<u8>,
    },

    /// Current participant names. Order carries no meaning.
    Roster {
        /// Registered names.
        names: Vec<String>,
    },
}

impl Frame {
    /// Returns the wire tag that introduces this frame.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Connect { .. } => tag::CONNECT,
            Self::Disconnect { .. } => tag::DISCONNECT,
            Self::Text { .. } => tag::TEXT,
            Self::Binary { kind, .. } => kind.tag(),
            Self::Roster { .. } => tag::ROSTER,
        }
    }

    /// Returns the sender and destination of a relayable frame.
    ///
    /// Only `Text` and `Binary` frames are addressed; everything else
    /// returns `None`.
    #[must_use]
    pub fn route(&self) -> Option<(&str, &str)> {
        match self {
            Self::Text { sender, dest, .. } | Self::Binary { sender, dest, .. } => {
                Some((sender, dest))
            }
            Self::Connect { .. } | Self::Disconnect { .. } | Self::Roster { .. } => None,
        }
    }
}

/// Returns `true` if `dest` names the broadcast audience.
///
/// The comparison ignores ASCII case, so `tous` and `Tous` both broadcast
/// when the token is `TOUS`.
#[must_use]
pub fn is_broadcast(dest: &str, token: &str) -> bool {
    dest.eq_ignore_ascii_case(token)
}
