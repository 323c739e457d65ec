use std::io;

use thiserror::Error;

/// Errors surfaced by the relay library.
#[derive(Debug, Error)]
pub enum Error {
    /// Stream read/write failure, including a peer closing the connection.
    #[error("connection i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The listener could not bind; the server cannot start.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The relay worker is gone and no longer takes payloads.
    #[error("relay intake is closed")]
    RelayClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
