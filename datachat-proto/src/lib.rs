//! Shared protocol definitions for the `DataChat` wire format.

pub mod codec;
pub mod frame;

pub use codec::{FrameError, decode, encode};
pub use frame::{BinaryKind, Frame};
