//! The relay server: accepts clients and rebroadcasts every frame they send.
//!
//! Each accepted socket moves through `Accepted → Registered → Relaying →
//! Closing → Removed`. Registration is a guard owned by the handler task, so
//! the connection leaves the registry on every exit path.

use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpSocket, TcpStream, tcp::OwnedReadHalf},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::broadcast,
    frame::{self, FrameError, MAX_PAYLOAD_LEN},
    registry::{Connection, ConnectionId, Registration, Registry},
};

pub const DEFAULT_PORT: u16 = 1337;
pub const DEFAULT_BACKLOG: u32 = 32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub backlog: u32,
    pub max_connections: Option<usize>,
    pub max_frame_len: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            max_connections: None,
            max_frame_len: MAX_PAYLOAD_LEN,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("could not listen on {addr}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("accept failed")]
    Accept(#[source] io::Error),
}

/// Decides at accept time whether a new socket gets a handler.
///
/// Consulted before the connection is registered, so a policy never touches
/// the registry or broadcast paths.
pub trait Admission: Send + Sync {
    fn admit(&self, peer: SocketAddr, live: usize) -> bool;
}

/// Serves every connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl Admission for Unbounded {
    fn admit(&self, _peer: SocketAddr, _live: usize) -> bool {
        true
    }
}

/// Refuses new sockets once the given number of connections are live.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimit(pub usize);

impl Admission for ConnectionLimit {
    fn admit(&self, _peer: SocketAddr, live: usize) -> bool {
        live < self.0
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    admission: Box<dyn Admission>,
}

struct ServerState {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    max_frame_len: u32,
}

impl ServerState {
    fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Server {
    /// Binds a listening socket as described by `config`.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|source| ServerError::Bind { addr, source })?;

        socket
            .set_reuseaddr(true)
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket
            .bind(addr)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let listener = socket
            .listen(config.backlog)
            .map_err(|source| ServerError::Listen { addr, source })?;

        Ok(Self::new(listener, config))
    }

    /// Wraps an already listening socket.
    pub fn new(listener: TcpListener, config: &ServerConfig) -> Self {
        let admission: Box<dyn Admission> = match config.max_connections {
            Some(limit) => Box::new(ConnectionLimit(limit)),
            None => Box::new(Unbounded),
        };
        Self {
            listener,
            state: Arc::new(ServerState {
                registry: Arc::new(Registry::new()),
                next_id: AtomicU64::new(1),
                max_frame_len: config.max_frame_len,
            }),
            admission,
        }
    }

    pub fn with_admission<A>(mut self, admission: A) -> Self
    where
        A: Admission + 'static,
    {
        self.admission = Box::new(admission);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the live membership, mostly useful for observing the server.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.state.registry)
    }

    /// Accepts connections forever. Only an accept failure ends the loop.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            state,
            admission,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(live = state.registry.len(), "relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    let (stream, peer) = accept_result.map_err(ServerError::Accept)?;
                    handle_accept(stream, peer, &state, admission.as_ref());
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn handle_accept(
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<ServerState>,
    admission: &dyn Admission,
) {
    if !admission.admit(peer, state.registry.len()) {
        warn!(%peer, "connection refused by admission policy");
        return;
    }

    let (reader, writer) = stream.into_split();
    let connection = Arc::new(Connection::new(state.next_id(), peer, writer));
    let registration = Registry::register(&state.registry, connection);
    info!(%peer, "client connected");

    let state = Arc::clone(state);
    tokio::spawn(async move {
        handle_connection(reader, registration, state).await;
    });
}

/// Why a handler left the relaying loop.
#[derive(Debug)]
enum Departure {
    Sentinel,
    Closed,
    Failed(FrameError),
}

async fn handle_connection(
    reader: OwnedReadHalf,
    registration: Registration,
    state: Arc<ServerState>,
) {
    let connection = Arc::clone(registration.connection());
    let peer = connection.peer();
    let mut reader = BufReader::new(reader);

    let departure = relay_frames(&mut reader, &connection, &state).await;
    match &departure {
        Departure::Failed(err) => warn!(%peer, error = ?err, "client connection failed"),
        other => debug!(%peer, reason = ?other, "client leaving"),
    }

    // Deregister first: later broadcasts must not target a closing socket.
    drop(registration);
    if let Err(err) = connection.close().await {
        debug!(%peer, error = ?err, "failed to close client socket");
    }
    drop(reader);
    info!(%peer, "client disconnected");
}

async fn relay_frames(
    reader: &mut BufReader<OwnedReadHalf>,
    connection: &Connection,
    state: &ServerState,
) -> Departure {
    loop {
        let payload = match frame::read_frame_limited(reader, state.max_frame_len).await {
            Ok(payload) => payload,
            Err(FrameError::ConnectionClosed) => return Departure::Closed,
            Err(err) => return Departure::Failed(err),
        };

        if frame::is_disconnect(&payload) {
            return Departure::Sentinel;
        }

        let encoded = match frame::encode(&payload) {
            Ok(encoded) => encoded,
            Err(err) => return Departure::Failed(err),
        };

        match broadcast(&state.registry, connection.id(), &encoded).await {
            Ok(delivered) => {
                debug!(peer = %connection.peer(), bytes = payload.len(), delivered, "relayed frame");
            }
            Err(failure) => {
                for target in &failure.failed {
                    warn!(
                        sender = %connection.peer(),
                        target = %target.peer,
                        error = ?target.error,
                        "dropping unreachable client"
                    );
                }
            }
        }
    }
}
