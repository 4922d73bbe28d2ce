//! Reusable WebSocket endpoint engine for the Tokio stack.
//!
//! This library implements the message layer of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! shared by client and server roles: an incremental frame parser, a
//! stateful frame compiler with masking and permessage-deflate support, and
//! a [`client::Client`] that turns a duplex byte transport into a stream of
//! typed messages with a bounded close handshake.
//!
//! The HTTP upgrade, TLS and socket establishment are deliberately outside:
//! anything implementing [`transport::Transport`] can carry a connection,
//! and compression is negotiated through the headers produced and parsed in
//! [`compression`]. Heartbeat pings and inbound rate limits are optional
//! collaborators shared across many clients.

pub mod client;
pub mod close;
pub mod compiler;
pub mod compression;
pub mod config;
pub mod error;
pub mod extensions;
pub mod frame;
pub mod heartbeat;
pub mod limiter;
pub mod message;
pub mod metadata;
pub mod parser;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
