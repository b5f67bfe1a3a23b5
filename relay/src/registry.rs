//! Shared membership of live connections.
//!
//! Every handler task adds its connection on arrival and removes it on
//! departure, while any handler may be walking the members to broadcast. One
//! mutex guards the whole collection for all three operations. It is a plain
//! `std::sync::Mutex` and is never held across an `.await`: broadcasters copy
//! the members out with [`Registry::snapshot`] and write outside the lock.
//!
//! Writes to a single connection go through its own send lock instead, so two
//! broadcasters targeting the same peer cannot interleave frame bytes. Closing
//! a connection does not queue behind that lock: it flips a watch flag that
//! every in-flight send is racing against.

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{Mutex as SendLock, watch},
};

use crate::frame::{self, EncodedFrame, FrameError};

pub type ConnectionId = u64;

type FrameSink = Box<dyn AsyncWrite + Send + Unpin>;

/// The sending side of one accepted client.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: SendLock<FrameSink>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new<W>(id: ConnectionId, peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer,
            writer: SendLock::new(Box::new(writer)),
            closed: watch::Sender::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Writes one whole frame while holding this connection's send lock.
    ///
    /// Fails with [`FrameError::ConnectionClosed`] as soon as the connection is
    /// closed, including while waiting for the lock or stuck on a peer that
    /// stopped reading. A write cut short this way leaves a partial frame on a
    /// socket that is being shut down anyway.
    pub async fn send(&self, frame: &EncodedFrame) -> Result<(), FrameError> {
        let mut closed = self.closed.subscribe();
        select! {
            biased;
            _ = async move { let _ = closed.wait_for(|closed| *closed).await; } => {
                Err(FrameError::ConnectionClosed)
            }
            result = async {
                let mut writer = self.writer.lock().await;
                frame::write_encoded(&mut *writer, frame).await
            } => result,
        }
    }

    /// Marks the connection closed and shuts down the write direction.
    ///
    /// Pending and future sends fail right away, so the lock is free by the
    /// time the shutdown needs it. Calling this more than once is harmless.
    pub async fn close(&self) -> Result<(), FrameError> {
        self.closed.send_replace(true);
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<Members>,
}

/// Members in insertion order, plus their ids for constant-time lookups.
#[derive(Debug, Default)]
struct Members {
    order: Vec<Arc<Connection>>,
    ids: HashSet<ConnectionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a connection. Returns `false` if it was already a member.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let mut members = self.members();
        if !members.ids.insert(connection.id) {
            return false;
        }
        members.order.push(connection);
        true
    }

    /// Removes a connection by identity, keeping the order of the rest.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut members = self.members();
        if !members.ids.remove(&id) {
            return None;
        }
        let index = members.order.iter().position(|member| member.id == id)?;
        Some(members.order.remove(index))
    }

    /// Copies the current members, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members().order.clone()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members().ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().order.is_empty()
    }

    /// Adds `connection` and returns a guard that removes it again when
    /// dropped, whichever way the owning handler exits.
    pub fn register(registry: &Arc<Self>, connection: Arc<Connection>) -> Registration {
        registry.add(Arc::clone(&connection));
        Registration {
            registry: Arc::clone(registry),
            connection,
        }
    }

    // No operation can panic between updating `ids` and `order`, so a poisoned
    // lock still guards a consistent list.
    fn members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership of one connection, held by its handler for the handler's life.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<Registry>,
    connection: Arc<Connection>,
}

impl Registration {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.connection.id);
    }
}
