//! Server façade
//!
//! A [`Server`] listens for stream connections and/or datagrams, gives each
//! stream client an identity from a fixed pool, and reports every event to a
//! [`ServerHandler`] on its dispatch thread.
//!
//! # Examples
//!
//! ```no_run
//! use simple_networking::io::{ClientId, Server, ServerHandler, ServerOptions};
//! use simple_networking::protocol::Packet;
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_data(&mut self, server: &Server, id: ClientId, packet: Packet) {
//!         let _ = server.send_tcp(id, packet);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerOptions::new(7777), Echo)?;
//!     server.listen().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop();
//!     Ok(())
//! }
//! ```

mod session;
mod tcp;
mod udp;

pub use session::ClientInfo;

use crate::error::{NetError, Result};
use crate::io::common::{encode_datagram, encode_frame};
use crate::io::dispatch::{DispatchQueue, DispatchStats};
use crate::io::handler::ServerHandler;
use crate::io::identity::{ClientId, IdentityPool};
use crate::io::options::{Protocol, ServerOptions};
use crate::io::stream::StreamSettings;
use crate::protocol::Packet;
use parking_lot::{Mutex, RwLock};
use session::ServerClient;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// State owned by the dispatch thread
struct ServerDispatch {
    handler: Box<dyn ServerHandler>,
    server: Weak<ServerShared>,
}

/// Datagram socket handles kept while listening
struct DatagramEndpoint {
    local_addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<udp::Outgoing>,
}

pub(crate) struct ServerShared {
    options: ServerOptions,
    settings: StreamSettings,
    identities: IdentityPool,
    sessions: RwLock<HashMap<ClientId, Arc<ServerClient>>>,
    queue: DispatchQueue<ServerDispatch>,
    tcp_addr: Mutex<Option<SocketAddr>>,
    udp: Mutex<Option<DatagramEndpoint>>,
    tasks: Mutex<Vec<AbortHandle>>,
    listening: AtomicBool,
    stopped: AtomicBool,
}

impl ServerShared {
    /// Run `job` with the handler on the dispatch thread
    pub(crate) fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&mut dyn ServerHandler, &Server) + Send + 'static,
    {
        self.queue.execute(move |ctx: &mut ServerDispatch| {
            if let Some(shared) = ctx.server.upgrade() {
                let server = Server { shared };
                job(ctx.handler.as_mut(), &server);
            }
        });
    }

    pub(crate) fn session(&self, id: ClientId) -> Option<Arc<ServerClient>> {
        self.sessions.read().get(&id).cloned()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// End a session, or only its datagram binding for [`Protocol::Udp`]
    ///
    /// A session object is torn down at most once; its identity is released
    /// exactly then. Stale calls for a session already replaced under the same
    /// identity are no-ops.
    ///
    /// # Returns
    /// `true` if this call changed anything
    pub(crate) fn teardown(
        &self,
        client: &Arc<ServerClient>,
        protocol: Protocol,
        notify: bool,
    ) -> bool {
        if protocol == Protocol::Udp {
            if !client.udp.clear() {
                return false;
            }
            debug!(client_id = client.id, "Datagram binding cleared");
            if notify {
                let info = client.info();
                self.dispatch(move |handler, server| {
                    handler.on_client_disconnected(server, &info, Protocol::Udp)
                });
            }
            return true;
        }

        if !client.begin_teardown() {
            return false;
        }

        client.tcp.close();
        client.udp.clear();
        {
            let mut sessions = self.sessions.write();
            if sessions
                .get(&client.id)
                .is_some_and(|current| Arc::ptr_eq(current, client))
            {
                sessions.remove(&client.id);
            }
        }
        info!(client_id = client.id, protocol = %protocol, "Client disconnected");

        // Queued before the release so a reused identity is announced after this
        if notify {
            let info = client.info();
            self.dispatch(move |handler, server| {
                handler.on_client_disconnected(server, &info, protocol)
            });
        }
        self.identities.release(client.id);
        true
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn shutdown(&self) {
        self.listening.store(false, Ordering::Release);
        self.abort_tasks();
        self.udp.lock().take();

        let clients: Vec<_> = self.sessions.read().values().cloned().collect();
        for client in &clients {
            self.teardown(client, Protocol::Both, false);
        }
    }
}

impl Drop for ServerShared {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown();
    }
}

/// TCP/UDP server
///
/// Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    /// Validate `options` and start the dispatch thread
    ///
    /// The server does not bind anything until [`listen`](Self::listen).
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidOptions`] - The options are unusable
    /// - [`NetError::Io`] - The dispatch thread could not be spawned
    pub fn new<H: ServerHandler>(options: ServerOptions, handler: H) -> Result<Self> {
        options.validate()?;

        let settings = StreamSettings {
            receive_buffer_size: options.receive_buffer_size,
            send_buffer_size: options.send_buffer_size,
            receive_timeout: options.receive_timeout,
            send_timeout: options.send_timeout,
            max_frame_length: options.max_frame_length,
            disconnect_on_error: options.disconnect_client_on_error,
        };
        let queue = DispatchQueue::start(
            "server-dispatch",
            options.refresh_interval,
            ServerDispatch {
                handler: Box::new(handler),
                server: Weak::new(),
            },
        )?;

        let shared = Arc::new(ServerShared {
            identities: IdentityPool::new(options.max_clients),
            options,
            settings,
            sessions: RwLock::new(HashMap::new()),
            queue,
            tcp_addr: Mutex::new(None),
            udp: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            listening: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        // First job in the queue, so every later job can reach the server
        let weak = Arc::downgrade(&shared);
        shared.queue.execute(move |ctx| ctx.server = weak);

        Ok(Server { shared })
    }

    /// Bind the configured transports and start accepting
    ///
    /// With port 0 the stream listener picks an ephemeral port and the
    /// datagram socket binds the same port.
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidState`] - Already listening, or stopped
    /// - [`NetError::Io`] - Binding failed
    pub async fn listen(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.is_stopped() {
            return Err(NetError::InvalidState("server has been stopped".to_string()));
        }
        if shared.listening.swap(true, Ordering::AcqRel) {
            return Err(NetError::InvalidState("server is already listening".to_string()));
        }

        match self.bind().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Failed to start listening");
                shared.abort_tasks();
                shared.udp.lock().take();
                shared.tcp_addr.lock().take();
                shared.listening.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn bind(&self) -> Result<()> {
        let shared = &self.shared;
        let protocol = shared.options.protocol;
        let mut port = shared.options.port;

        if protocol.uses_tcp() {
            let listener = TcpListener::bind((shared.options.address, port)).await?;
            let local_addr = listener.local_addr()?;
            port = local_addr.port();
            *shared.tcp_addr.lock() = Some(local_addr);

            let task = tokio::spawn(tcp::accept_loop(listener, Arc::downgrade(shared)));
            shared.tasks.lock().push(task.abort_handle());
            info!(addr = %local_addr, "Listening for TCP connections");
        }

        if protocol.uses_udp() {
            let socket = Arc::new(UdpSocket::bind((shared.options.address, port)).await?);
            let local_addr = socket.local_addr()?;
            let (tx, rx) = mpsc::unbounded_channel();

            let receiver = tokio::spawn(udp::receive_loop(socket.clone(), Arc::downgrade(shared)));
            let sender = tokio::spawn(udp::send_loop(socket, rx, Arc::downgrade(shared)));
            shared
                .tasks
                .lock()
                .extend([receiver.abort_handle(), sender.abort_handle()]);
            *shared.udp.lock() = Some(DatagramEndpoint {
                local_addr,
                outgoing: tx,
            });
            info!(
                addr = %local_addr,
                identified = shared.options.require_client_id_in_udp_data,
                "Listening for UDP datagrams"
            );
        }

        Ok(())
    }

    /// Stop listening, drop every client and stop the dispatch thread
    ///
    /// No disconnect notifications are delivered and pending callbacks are
    /// discarded. A stopped server cannot listen again. Safe to call from a
    /// handler.
    pub fn stop(&self) {
        let shared = &self.shared;
        if shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.shutdown();
        shared.queue.stop();
        info!("Server stopped");
    }

    /// Send a frame to one client over its stream connection
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidProtocol`] - The server does not use TCP
    /// - [`NetError::ClientNotFound`] - No session with this identity
    /// - [`NetError::NotConnected`] - The session is closing
    pub fn send_tcp(&self, id: ClientId, packet: Packet) -> Result<()> {
        self.require(Protocol::Tcp)?;
        let client = self.shared.session(id).ok_or(NetError::ClientNotFound(id))?;
        client.tcp.send(encode_frame(packet)?)
    }

    /// Send a datagram to one client's bound endpoint
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidProtocol`] - The server does not use UDP
    /// - [`NetError::ClientNotFound`] - No session with this identity
    /// - [`NetError::NotConnected`] - No datagram endpoint bound yet
    /// - [`NetError::DatagramTooLarge`] - Packet does not fit a datagram
    pub fn send_udp(&self, id: ClientId, packet: Packet) -> Result<()> {
        self.require(Protocol::Udp)?;
        let client = self.shared.session(id).ok_or(NetError::ClientNotFound(id))?;
        let target = client.udp.endpoint().ok_or(NetError::NotConnected)?;
        self.queue_datagram(encode_datagram(packet, None)?, target, Some(id))
    }

    /// Send a datagram to an arbitrary endpoint
    ///
    /// Meant for replying to `on_unidentified_udp_data`.
    pub fn send_udp_to(&self, target: SocketAddr, packet: Packet) -> Result<()> {
        self.require(Protocol::Udp)?;
        self.queue_datagram(encode_datagram(packet, None)?, target, None)
    }

    /// Send a frame to every connected client, optionally skipping one
    ///
    /// Per-client failures are logged and do not stop the broadcast.
    pub fn send_tcp_to_all(&self, packet: Packet, except: Option<ClientId>) -> Result<()> {
        self.require(Protocol::Tcp)?;
        let frame = encode_frame(packet)?;
        for client in self.clients_except(except) {
            if let Err(e) = client.tcp.send(frame.clone()) {
                debug!(client_id = client.id, error = %e, "Broadcast skipped client");
            }
        }
        Ok(())
    }

    /// Send a datagram to every client with a bound endpoint, optionally skipping one
    pub fn send_udp_to_all(&self, packet: Packet, except: Option<ClientId>) -> Result<()> {
        self.require(Protocol::Udp)?;
        let datagram = encode_datagram(packet, None)?;
        for client in self.clients_except(except) {
            if let Some(target) = client.udp.endpoint() {
                self.queue_datagram(datagram.clone(), target, Some(client.id))?;
            }
        }
        Ok(())
    }

    /// Disconnect a client
    ///
    /// [`Protocol::Udp`] only forgets the datagram endpoint; `Tcp` and `Both`
    /// end the whole session. The handler is notified with `protocol`.
    ///
    /// # Returns
    /// `true` if something was disconnected
    pub fn disconnect_client(&self, id: ClientId, protocol: Protocol) -> bool {
        match self.shared.session(id) {
            Some(client) => self.shared.teardown(&client, protocol, true),
            None => false,
        }
    }

    /// Snapshot of a connected client
    pub fn get_client_info(&self, id: ClientId) -> Option<ClientInfo> {
        self.shared.session(id).map(|client| client.info())
    }

    /// Attach application data to a client, readable through [`ClientInfo::data`]
    ///
    /// # Returns
    /// `false` if no session holds `id`
    pub fn set_client_data<T: Any + Send + Sync>(&self, id: ClientId, data: T) -> bool {
        match self.shared.session(id) {
            Some(client) => {
                client.set_data(Arc::new(data));
                true
            }
            None => false,
        }
    }

    pub fn client_count(&self) -> usize {
        self.shared.sessions.read().len()
    }

    /// Identities of all connected clients, ascending
    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.shared.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn local_tcp_addr(&self) -> Option<SocketAddr> {
        *self.shared.tcp_addr.lock()
    }

    pub fn local_udp_addr(&self) -> Option<SocketAddr> {
        self.shared.udp.lock().as_ref().map(|udp| udp.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    /// Counters of the dispatch queue
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.shared.queue.stats()
    }

    fn require(&self, transport: Protocol) -> Result<()> {
        let configured = self.shared.options.protocol;
        let available = match transport {
            Protocol::Tcp => configured.uses_tcp(),
            Protocol::Udp => configured.uses_udp(),
            Protocol::Both => configured == Protocol::Both,
        };
        if available {
            Ok(())
        } else {
            Err(NetError::InvalidProtocol(format!(
                "server is configured for {configured}, not {transport}"
            )))
        }
    }

    fn clients_except(&self, except: Option<ClientId>) -> Vec<Arc<ServerClient>> {
        self.shared
            .sessions
            .read()
            .values()
            .filter(|client| Some(client.id) != except)
            .cloned()
            .collect()
    }

    fn queue_datagram(
        &self,
        data: bytes::Bytes,
        target: SocketAddr,
        client: Option<ClientId>,
    ) -> Result<()> {
        let udp = self.shared.udp.lock();
        let endpoint = udp.as_ref().ok_or(NetError::NotConnected)?;
        endpoint
            .outgoing
            .send(udp::Outgoing {
                data,
                target,
                client,
            })
            .map_err(|_| NetError::NotConnected)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("tcp_addr", &self.local_tcp_addr())
            .field("udp_addr", &self.local_udp_addr())
            .field("clients", &self.client_count())
            .field("listening", &self.is_listening())
            .finish()
    }
}
