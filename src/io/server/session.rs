//! Per-client server state
//!
//! A [`ServerClient`] lives from admission until teardown and is shared
//! between the session table and the connection's I/O tasks. Handlers only
//! ever see [`ClientInfo`] snapshots of it.

use crate::io::identity::ClientId;
use crate::io::server::udp::DatagramBinding;
use crate::io::stream::{SessionState, StreamSession};
use parking_lot::Mutex;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of a connected client
///
/// Returned by [`Server::get_client_info`](crate::io::Server::get_client_info)
/// and handed to handler callbacks. Later changes to the session are not
/// reflected in an existing snapshot.
#[derive(Clone)]
pub struct ClientInfo {
    /// Identity assigned by the server
    pub id: ClientId,
    /// Remote address of the stream connection
    pub tcp_endpoint: SocketAddr,
    /// Remote address datagrams are accepted from, once learned
    pub udp_endpoint: Option<SocketAddr>,
    pub has_active_tcp_connection: bool,
    pub has_active_udp_connection: bool,
    /// When the stream connection was accepted
    pub connected_at: Instant,
    data: Option<Arc<dyn Any + Send + Sync>>,
}

impl ClientInfo {
    pub(crate) fn new(id: ClientId, tcp_endpoint: SocketAddr) -> Self {
        ClientInfo {
            id,
            tcp_endpoint,
            udp_endpoint: None,
            has_active_tcp_connection: true,
            has_active_udp_connection: false,
            connected_at: Instant::now(),
            data: None,
        }
    }

    /// Application data attached with
    /// [`Server::set_client_data`](crate::io::Server::set_client_data)
    ///
    /// Returns `None` when nothing is attached or the data is not a `T`.
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data.as_deref()?.downcast_ref::<T>()
    }

    /// Time elapsed since the connection was accepted
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientInfo")
            .field("id", &self.id)
            .field("tcp_endpoint", &self.tcp_endpoint)
            .field("udp_endpoint", &self.udp_endpoint)
            .field("has_active_tcp_connection", &self.has_active_tcp_connection)
            .field("has_active_udp_connection", &self.has_active_udp_connection)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

/// Server-side session of one client
pub(crate) struct ServerClient {
    pub id: ClientId,
    pub tcp: Arc<StreamSession>,
    pub udp: DatagramBinding,
    connected_at: Instant,
    data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    torn_down: AtomicBool,
}

impl ServerClient {
    pub fn new(info: &ClientInfo) -> Self {
        ServerClient {
            id: info.id,
            tcp: Arc::new(StreamSession::new(info.tcp_endpoint)),
            udp: DatagramBinding::new(),
            connected_at: info.connected_at,
            data: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Current state as a handler-facing snapshot
    pub fn info(&self) -> ClientInfo {
        let udp_endpoint = self.udp.endpoint();
        ClientInfo {
            id: self.id,
            tcp_endpoint: self.tcp.peer(),
            udp_endpoint,
            has_active_tcp_connection: self.tcp.state() != SessionState::Disconnected,
            has_active_udp_connection: udp_endpoint.is_some(),
            connected_at: self.connected_at,
            data: self.data.lock().clone(),
        }
    }

    pub fn set_data(&self, data: Arc<dyn Any + Send + Sync>) {
        *self.data.lock() = Some(data);
    }

    /// Mark the session as torn down
    ///
    /// # Returns
    /// `true` only for the first call
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }
}
