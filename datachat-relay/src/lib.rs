//! `DataChat` relay server library.
//!
//! Exposes the relay for use in tests and embedding. The relay receives
//! frames over UDP, tracks which participant name lives at which address,
//! and forwards chat text and attachments to one recipient or to everyone.
//! A participant that stops answering is dropped the first time a send to
//! it fails.

pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod roster;
pub mod router;
pub mod server;
pub mod transport;
