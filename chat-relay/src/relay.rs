//! Broadcast fan-out.
//!
//! [`Relay`] is the cheap, cloneable handle given to the listener and every
//! handler: it registers connections and queues payloads. [`RelayWorker`] is
//! the single consumer of that queue. It takes one payload at a time, frames
//! it to every connection in a registry snapshot (the sender included), and
//! only then takes the next payload.
//!
//! The queue is an unbounded `mpsc` channel, so `submit` never waits on
//! delivery and payloads from one handler keep their order. Payloads from
//! different handlers interleave in whatever order they reach the channel.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{io::AsyncWrite, sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    config::RelaySettings,
    error::{Error, Result},
    registry::{Connection, ConnectionId, ConnectionRegistry},
};

/// Handle for registering connections and queueing payloads.
#[derive(Clone)]
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    intake: mpsc::UnboundedSender<Vec<u8>>,
    settings: RelaySettings,
}

/// Outcome of broadcasting one payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl Relay {
    /// Creates the handle and the worker that drains its queue. The worker
    /// must be driven with [`RelayWorker::run`] for anything to be delivered.
    pub fn new(settings: RelaySettings) -> (Self, RelayWorker) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (intake, inbox) = mpsc::unbounded_channel();
        let relay = Self {
            registry: Arc::clone(&registry),
            intake,
            settings,
        };
        let worker = RelayWorker {
            registry,
            inbox,
            write_timeout: settings.write_timeout,
        };
        (relay, worker)
    }

    /// Convenience for `new` followed by spawning the worker on the runtime.
    pub fn spawn(settings: RelaySettings) -> (Self, JoinHandle<()>) {
        let (relay, worker) = Self::new(settings);
        (relay, tokio::spawn(worker.run()))
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Wraps `writer` in a new [`Connection`] and registers it for broadcasts.
    pub fn attach<W>(&self, writer: W, peer: Option<SocketAddr>) -> Arc<Connection>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let connection = Arc::new(Connection::new(self.registry.next_id(), peer, writer));
        self.registry.register(Arc::clone(&connection));
        connection
    }

    /// Stops broadcasting to `id`. Returns whether it was still registered.
    pub fn detach(&self, id: ConnectionId) -> bool {
        self.registry.unregister(id).is_some()
    }

    /// Queues `payload` for broadcast without waiting for delivery.
    pub fn submit(&self, payload: Vec<u8>) -> Result<()> {
        self.intake.send(payload).map_err(|_| Error::RelayClosed)
    }
}

/// Single consumer of the relay queue.
pub struct RelayWorker {
    registry: Arc<ConnectionRegistry>,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    write_timeout: Option<Duration>,
}

impl RelayWorker {
    /// Broadcasts queued payloads until every [`Relay`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(payload) = self.inbox.recv().await {
            let report = self.deliver(&payload).await;
            debug!(
                bytes = payload.len(),
                delivered = report.delivered,
                failed = report.failed,
                "payload broadcast"
            );
        }
        info!("relay intake closed");
    }

    /// Frames `payload` to every currently registered connection.
    ///
    /// Writes run concurrently, each bounded by the write timeout, so one
    /// stalled peer cannot hold up the rest. A failing destination is counted
    /// and logged, and its write side is shut down; its own handler retires it
    /// from the registry when its read fails.
    pub async fn deliver(&self, payload: &[u8]) -> DeliveryReport {
        let targets = self.registry.snapshot();
        let results = join_all(
            targets
                .iter()
                .map(|connection| self.send_to(connection, payload)),
        )
        .await;

        let mut report = DeliveryReport::default();
        for (connection, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        conn = connection.id(),
                        peer = ?connection.peer(),
                        error = %err,
                        "failed to deliver payload"
                    );
                }
            }
        }
        report
    }

    async fn send_to(&self, connection: &Connection, payload: &[u8]) -> io::Result<()> {
        let was_broken = connection.is_broken();
        let result = self.write_bounded(connection, payload).await;

        // A partial frame is on the wire; close the stream instead of letting
        // the peer misread whatever comes next.
        if result.is_err() && !was_broken && connection.is_broken() {
            if let Err(err) = connection.shutdown().await {
                debug!(conn = connection.id(), error = %err, "shutdown after failed write");
            }
        }
        result
    }

    async fn write_bounded(&self, connection: &Connection, payload: &[u8]) -> io::Result<()> {
        let Some(limit) = self.write_timeout else {
            return connection.send(payload).await;
        };

        match timeout(limit, connection.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write did not complete within {limit:?}"),
            )),
        }
    }
}
