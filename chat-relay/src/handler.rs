//! Per-connection read loop.
//!
//! A handler stays in its reading loop, taking one frame at a time, logging
//! it as a chat message and forwarding the raw payload to the relay. The first
//! failure closes it for good: the connection is removed from the registry,
//! its write side is shut down and [`ConnectionHandler::run`] returns.

use std::{io, sync::Arc};

use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    frame::read_frame_limited,
    message::ChatMessage,
    registry::Connection,
    relay::Relay,
};

pub struct ConnectionHandler<R> {
    reader: R,
    connection: Arc<Connection>,
    relay: Relay,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin,
{
    /// `connection` is expected to be registered with `relay` already.
    pub fn new(reader: R, connection: Arc<Connection>, relay: Relay) -> Self {
        Self {
            reader,
            connection,
            relay,
        }
    }

    /// Reads until the stream fails, then retires the connection. Returns the
    /// error that ended the loop.
    pub async fn run(mut self) -> Error {
        let reason = loop {
            if let Err(err) = self.step().await {
                break err;
            }
        };
        self.close(&reason).await;
        reason
    }

    async fn step(&mut self) -> Result<()> {
        let max_frame_len = self.relay.settings().max_frame_len;
        let payload = read_frame_limited(&mut self.reader, max_frame_len).await?;
        self.inspect(&payload);
        self.relay.submit(payload)
    }

    // Decoding is only for the server log; the raw bytes are relayed either way.
    fn inspect(&self, payload: &[u8]) {
        let conn = self.connection.id();
        match ChatMessage::decode(payload) {
            Ok(message) => info!(conn, "{message}"),
            Err(err) => warn!(conn, error = %err, "relaying payload that is not a chat message"),
        }
    }

    async fn close(&self, reason: &Error) {
        let conn = self.connection.id();
        let peer = self.connection.peer();
        match reason {
            Error::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                info!(conn, ?peer, "connection closed by peer");
            }
            other => warn!(conn, ?peer, error = %other, "connection closed"),
        }

        self.relay.detach(conn);
        if let Err(err) = self.connection.shutdown().await {
            debug!(conn, error = %err, "write side already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{duplex, DuplexStream},
        time::timeout,
    };

    use super::*;
    use crate::{
        config::RelaySettings,
        frame::{read_frame, write_frame},
    };

    const WAIT: Duration = Duration::from_secs(1);

    /// Wires a handler to two one-way pipes: `inbound` feeds the handler,
    /// `outbound` receives whatever the relay writes to this connection.
    fn pipes(relay: &Relay) -> (ConnectionHandler<DuplexStream>, DuplexStream, DuplexStream) {
        let (inbound, handler_reader) = duplex(4096);
        let (handler_writer, outbound) = duplex(4096);
        let connection = relay.attach(handler_writer, None);
        let handler = ConnectionHandler::new(handler_reader, connection, relay.clone());
        (handler, inbound, outbound)
    }

    #[tokio::test]
    async fn forwards_frames_and_echoes_to_sender() {
        let (relay, _worker) = Relay::spawn(RelaySettings::default());
        let (handler, mut inbound, mut outbound) = pipes(&relay);
        let running = tokio::spawn(handler.run());

        let payload = ChatMessage::new("alice", "hi").encode().expect("encode");
        write_frame(&mut inbound, &payload).await.expect("write");

        let echoed = timeout(WAIT, read_frame(&mut outbound))
            .await
            .expect("echo in time")
            .expect("echo frame");
        assert_eq!(echoed, payload);

        drop(inbound);
        let reason = timeout(WAIT, running)
            .await
            .expect("handler stops")
            .expect("handler task");
        assert!(matches!(reason, Error::Io(ref err) if err.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn relays_payloads_that_fail_to_decode() {
        let (relay, _worker) = Relay::spawn(RelaySettings::default());
        let (handler, mut inbound, mut outbound) = pipes(&relay);
        tokio::spawn(handler.run());

        write_frame(&mut inbound, b"not a chat message")
            .await
            .expect("write");

        let echoed = timeout(WAIT, read_frame(&mut outbound))
            .await
            .expect("echo in time")
            .expect("echo frame");
        assert_eq!(echoed, b"not a chat message");
    }

    #[tokio::test]
    async fn silent_close_unregisters_without_touching_others() {
        let (relay, _worker) = Relay::spawn(RelaySettings::default());
        let (quiet, quiet_inbound, _quiet_outbound) = pipes(&relay);
        let (_other, _other_inbound, mut other_outbound) = pipes(&relay);
        assert_eq!(relay.connection_count(), 2);

        // Zero bytes, then EOF.
        drop(quiet_inbound);
        let reason = timeout(WAIT, quiet.run()).await.expect("handler stops");
        assert!(matches!(reason, Error::Io(ref err) if err.kind() == io::ErrorKind::UnexpectedEof));
        assert_eq!(relay.connection_count(), 1);

        relay.submit(b"still flowing".to_vec()).expect("submit");
        let frame = timeout(WAIT, read_frame(&mut other_outbound))
            .await
            .expect("frame in time")
            .expect("frame");
        assert_eq!(frame, b"still flowing");
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let settings = RelaySettings {
            max_frame_len: Some(8),
            ..RelaySettings::default()
        };
        let (relay, _worker) = Relay::spawn(settings);
        let (handler, mut inbound, _outbound) = pipes(&relay);

        write_frame(&mut inbound, b"way more than eight bytes")
            .await
            .expect("write");

        let reason = timeout(WAIT, handler.run()).await.expect("handler stops");
        assert!(matches!(reason, Error::Io(ref err) if err.kind() == io::ErrorKind::InvalidData));
        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn closed_relay_ends_the_loop() {
        let (relay, worker) = Relay::new(RelaySettings::default());
        drop(worker);
        let (handler, mut inbound, _outbound) = pipes(&relay);

        write_frame(&mut inbound, b"nowhere to go").await.expect("write");

        let reason = timeout(WAIT, handler.run()).await.expect("handler stops");
        assert!(matches!(reason, Error::RelayClosed));
        assert_eq!(relay.connection_count(), 0);
    }
}
