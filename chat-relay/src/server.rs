use std::{future::Future, io, net::SocketAddr, time::Duration};

use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelaySettings,
    error::{Error, Result},
    handler::ConnectionHandler,
    relay::{Relay, RelayWorker},
};

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections and relays every frame to all of them.
pub struct Server {
    listener: TcpListener,
    relay: Relay,
    worker: RelayWorker,
}

impl Server {
    pub fn new(listener: TcpListener, settings: RelaySettings) -> Self {
        let (relay, worker) = Relay::new(settings);
        Self {
            listener,
            relay,
            worker,
        }
    }

    /// Binds `host:port`. Failure here is fatal for the server role.
    pub async fn bind(host: &str, port: u16, settings: RelaySettings) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| Error::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        Ok(Self::new(listener, settings))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle onto the relay this server feeds, e.g. to watch the registry.
    pub fn relay(&self) -> Relay {
        self.relay.clone()
    }

    /// Runs the accept loop and the relay worker until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            relay,
            worker,
        } = self;
        let worker = tokio::spawn(worker.run());
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(connections = relay.connection_count(), "server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    handle_accept_result(accepted, &relay).await;
                }
            }
        }

        worker.abort();
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_accept_result(result: io::Result<(TcpStream, SocketAddr)>, relay: &Relay) {
    match result {
        Ok((stream, peer)) => spawn_handler(stream, peer, relay),
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            sleep(ACCEPT_BACKOFF).await;
        }
    }
}

fn spawn_handler(stream: TcpStream, peer: SocketAddr, relay: &Relay) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%peer, error = ?err, "could not disable nagle");
    }

    let (reader, writer) = stream.into_split();
    let connection = relay.attach(writer, Some(peer));
    info!(
        conn = connection.id(),
        %peer,
        connections = relay.connection_count(),
        "connection accepted"
    );

    let handler = ConnectionHandler::new(BufReader::new(reader), connection, relay.clone());
    tokio::spawn(handler.run());
}
