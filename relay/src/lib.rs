//! A length-prefixed message relay over TCP.
//!
//! Clients send opaque byte payloads framed as `[u32 big-endian length][bytes]`;
//! the server rebroadcasts each payload to every other connected client. Each
//! module focuses on one responsibility:
//!
//! - [`frame`] encodes and decodes frames, including the one-byte disconnect
//!   sentinel.
//! - [`registry`] tracks live connections under a single lock and hands out
//!   registration guards.
//! - [`broadcast`] fans one frame out to every connection but its sender.
//! - [`server`] accepts sockets and runs one handler task per connection.
//! - [`session`] is the client: a sender reading operator lines and a receiver
//!   printing relayed messages, sharing one socket.
//! - [`cli`] parses the command lines of the two binaries.
//!
//! Integration tests under `tests/` drive the server over real sockets.

pub mod broadcast;
pub mod cli;
pub mod frame;
pub mod registry;
pub mod server;
pub mod session;
