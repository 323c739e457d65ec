//! Live server-side connections and the set the relay broadcasts to.
//!
//! A [`Connection`] owns the write side of one accepted stream; the read side
//! stays with its handler. The [`ConnectionRegistry`] is the only state touched
//! from several tasks at once: the listener registers, handlers unregister on
//! close, and the relay takes snapshots to iterate without holding the lock.

use std::{
    collections::BTreeMap,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::frame::write_frame;

pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half of an accepted stream plus its transient identity.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    // Set while a frame is being written; stays set if that write never finished.
    broken: AtomicBool,
}

impl Connection {
    pub fn new<W>(id: ConnectionId, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            broken: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Frames `payload` onto the stream. Concurrent senders are serialised so
    /// frames from different payloads never interleave on the wire.
    ///
    /// A write that fails, or whose future is dropped before the frame is
    /// complete, leaves the receiver mid-frame. The connection is then broken
    /// and every later `send` fails with `BrokenPipe` without writing.
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        if self.is_broken() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream lost frame alignment",
            ));
        }
        self.broken.store(true, Ordering::Release);
        write_frame(&mut *writer, payload).await?;
        self.broken.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Best-effort shutdown of the write side. Skipped while a send is in
    /// flight; the stream closes once the last handle is dropped anyway.
    pub async fn shutdown(&self) -> io::Result<()> {
        match self.writer.try_lock() {
            Ok(mut writer) => writer.shutdown().await,
            Err(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

/// Set of connections eligible to receive broadcasts.
///
/// Keyed by [`ConnectionId`], which is allocated monotonically, so iteration
/// follows registration order and one stream can never appear twice.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
    last_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh id for a connection about to be registered.
    pub fn next_id(&self) -> ConnectionId {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adds `connection`. Returns `false` if its id was already present, in
    /// which case the existing entry is kept.
    pub fn register(&self, connection: Arc<Connection>) -> bool {
        let mut connections = self.lock();
        let id = connection.id();
        if connections.contains_key(&id) {
            return false;
        }
        connections.insert(id, connection);
        true
    }

    /// Removes the connection with `id`; absent ids are ignored.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().remove(&id)
    }

    /// Point-in-time copy of the members, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    // The map stays consistent even if a holder panicked, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
