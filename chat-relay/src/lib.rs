//! Minimal TCP chat relay.
//!
//! A server accepts TCP connections and rebroadcasts every message any client
//! sends to all connected clients, the sender included. Messages travel as
//! length-prefixed frames (`[u64 LE length][payload]`) whose payload is a JSON
//! object `{"sender": .., "body": ..}`.
//!
//! - [`frame`] reads and writes length-prefixed frames on any async stream.
//! - [`message`] encodes and decodes the chat payload.
//! - [`registry`] tracks live connections; safe to mutate while the relay
//!   iterates a snapshot.
//! - [`relay`] owns the registry and the intake queue, and fans each payload
//!   out to every connection.
//! - [`handler`] is the per-connection read loop feeding the relay.
//! - [`server`] accepts connections and wires them to handlers.
//! - [`client`] is the interactive stdin/stdout client role.
//! - [`cli`] and [`config`] describe the command line and relay settings.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod message;
pub mod registry;
pub mod relay;
pub mod server;

pub use error::{Error, Result};
pub use message::ChatMessage;
pub use relay::Relay;
pub use server::Server;
