//! Client façade
//!
//! A [`Client`] holds at most one stream connection and one datagram session
//! to a server and reports their events to a [`ClientHandler`] on its
//! dispatch thread.
//!
//! # Examples
//!
//! ```no_run
//! use simple_networking::io::{Client, ClientHandler, ClientOptions};
//! use simple_networking::protocol::Packet;
//!
//! struct Printer;
//!
//! impl ClientHandler for Printer {
//!     fn on_data(&mut self, _client: &Client, mut packet: Packet) {
//!         if let Ok(text) = packet.read::<String>() {
//!             println!("server says: {text}");
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions::new("127.0.0.1".parse()?, 7777);
//!     let client = Client::new(options, Printer)?;
//!     client.connect().await?;
//!
//!     let mut hello = Packet::new();
//!     hello.write("hello");
//!     client.send_tcp(hello)?;
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

mod udp;

use crate::error::{NetError, Result};
use crate::io::common::{encode_datagram, encode_frame};
use crate::io::dispatch::{DispatchQueue, DispatchStats};
use crate::io::handler::{ClientHandler, FailedOperation};
use crate::io::identity::ClientId;
use crate::io::options::{ClientOptions, Protocol};
use crate::io::stream::{self, SessionState, StreamEvents, StreamSession, StreamSettings};
use crate::protocol::Packet;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use udp::ClientUdp;

struct ClientDispatch {
    handler: Box<dyn ClientHandler>,
    client: Weak<ClientInner>,
}

pub(crate) struct ClientInner {
    options: ClientOptions,
    settings: StreamSettings,
    id: AtomicU32,
    queue: DispatchQueue<ClientDispatch>,
    tcp: Mutex<Option<Arc<StreamSession>>>,
    udp: Mutex<Option<Arc<ClientUdp>>>,
    closed: AtomicBool,
}

impl ClientInner {
    /// Run `job` with the handler on the dispatch thread
    pub(crate) fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&mut dyn ClientHandler, &Client) + Send + 'static,
    {
        self.queue.execute(move |ctx: &mut ClientDispatch| {
            if let Some(inner) = ctx.client.upgrade() {
                let client = Client { inner };
                job(ctx.handler.as_mut(), &client);
            }
        });
    }

    fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.options.address, self.options.port)
    }

    /// Close both transports
    ///
    /// # Returns
    /// `true` if anything was open
    fn disconnect(&self, notify: bool) -> bool {
        let tcp = self.tcp.lock().take();
        let udp = self.udp.lock().take();

        let mut closed = false;
        if let Some(tcp) = tcp {
            closed |= tcp.close();
        }
        if let Some(udp) = udp {
            closed |= udp.close();
        }

        if closed {
            info!(server = %self.server_addr(), "Disconnected");
            if notify {
                self.dispatch(|handler, client| handler.on_disconnected(client, Protocol::Both));
            }
        }
        closed
    }

    /// Close only the stream connection, notifying `on_disconnected(Tcp)`
    fn close_tcp(&self) {
        let Some(tcp) = self.tcp.lock().take() else {
            return;
        };
        if tcp.close() {
            self.dispatch(|handler, client| handler.on_disconnected(client, Protocol::Tcp));
        }
    }

    /// Disconnect because `session` ended, unless it was already replaced
    fn drop_tcp(&self, session: &Arc<StreamSession>) {
        let current = self
            .tcp
            .lock()
            .as_ref()
            .is_some_and(|tcp| Arc::ptr_eq(tcp, session));
        if current {
            self.disconnect(true);
        } else {
            session.close();
        }
    }

    /// Close the datagram session `udp` if it is still the current one
    pub(crate) fn drop_udp(&self, udp: &Arc<ClientUdp>) {
        let current = {
            let mut slot = self.udp.lock();
            if slot.as_ref().is_some_and(|u| Arc::ptr_eq(u, udp)) {
                slot.take()
            } else {
                None
            }
        };
        if current.is_some() && udp.close() {
            self.dispatch(|handler, client| handler.on_disconnected(client, Protocol::Udp));
        } else {
            udp.close();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.disconnect(false);
    }
}

/// TCP/UDP client
///
/// Cloning yields another handle to the same client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Validate `options` and start the dispatch thread
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidOptions`] - The options are unusable
    /// - [`NetError::Io`] - The dispatch thread could not be spawned
    pub fn new<H: ClientHandler>(options: ClientOptions, handler: H) -> Result<Self> {
        options.validate()?;

        let settings = StreamSettings {
            receive_buffer_size: options.receive_buffer_size,
            send_buffer_size: options.send_buffer_size,
            receive_timeout: options.receive_timeout,
            send_timeout: options.send_timeout,
            max_frame_length: options.max_frame_length,
            disconnect_on_error: options.disconnect_on_error,
        };
        let queue = DispatchQueue::start(
            "client-dispatch",
            options.refresh_interval,
            ClientDispatch {
                handler: Box::new(handler),
                client: Weak::new(),
            },
        )?;

        let inner = Arc::new(ClientInner {
            options,
            settings,
            id: AtomicU32::new(0),
            queue,
            tcp: Mutex::new(None),
            udp: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.queue.execute(move |ctx| ctx.client = weak);

        Ok(Client { inner })
    }

    /// Connect every transport selected by the options
    ///
    /// With [`Protocol::Both`], a datagram failure closes the stream
    /// connection opened by this call again (`on_disconnected(Tcp)`), so the
    /// client is never left half connected.
    pub async fn connect(&self) -> Result<()> {
        let protocol = self.inner.options.protocol;
        if protocol.uses_tcp() {
            self.connect_tcp().await?;
        }
        if protocol.uses_udp() {
            if let Err(e) = self.connect_udp().await {
                if protocol.uses_tcp() {
                    warn!(error = %e, "UDP connect failed, closing TCP");
                    self.inner.close_tcp();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Open the stream connection
    ///
    /// On failure the error is returned and also reported to the handler as
    /// [`FailedOperation::ConnectTcp`]. There is no automatic retry.
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidProtocol`] - The client does not use TCP
    /// - [`NetError::InvalidState`] - Closed, or already connected
    /// - [`NetError::Io`] - Connecting failed or timed out
    pub async fn connect_tcp(&self) -> Result<()> {
        self.require(Protocol::Tcp)?;
        self.ensure_open()?;
        if self.is_tcp_connected() {
            return Err(NetError::InvalidState("TCP is already connected".to_string()));
        }

        let inner = &self.inner;
        let addr = inner.server_addr();
        debug!(addr = %addr, "Connecting (TCP)");

        let connected = match inner.options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(addr))
                .await
                .unwrap_or_else(|_| {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ))
                }),
            None => TcpStream::connect(addr).await,
        };
        let configured =
            connected.and_then(|s| stream::configure(&s, &inner.settings).map(|_| s));
        let stream = match configured {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %addr, error = %e, "Connection failed");
                let reported = NetError::Io(std::io::Error::new(e.kind(), e.to_string()));
                inner.dispatch(move |handler, client| {
                    handler.on_network_operation_failed(
                        client,
                        FailedOperation::ConnectTcp,
                        &reported,
                    )
                });
                return Err(e.into());
            }
        };

        let session = Arc::new(StreamSession::new(addr));
        *inner.tcp.lock() = Some(session.clone());
        inner.dispatch(|handler, client| handler.on_connected(client, Protocol::Tcp));

        let events = Arc::new(ClientStreamEvents {
            client: Arc::downgrade(inner),
            session: session.clone(),
        });
        session.attach(stream, &inner.settings, events);
        info!(addr = %addr, "Connected (TCP)");
        Ok(())
    }

    /// Open the datagram session
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidProtocol`] - The client does not use UDP
    /// - [`NetError::InvalidState`] - Closed, or already connected
    /// - [`NetError::Io`] - Binding or connecting the socket failed
    pub async fn connect_udp(&self) -> Result<()> {
        self.require(Protocol::Udp)?;
        self.ensure_open()?;
        if self.is_udp_connected() {
            return Err(NetError::InvalidState("UDP is already connected".to_string()));
        }

        let inner = &self.inner;
        let addr = inner.server_addr();
        let udp = ClientUdp::connect(addr, Arc::downgrade(inner)).await?;
        let local = udp.local_addr();
        *inner.udp.lock() = Some(udp);
        inner.dispatch(|handler, client| handler.on_connected(client, Protocol::Udp));

        info!(addr = %addr, local = %local, "Connected (UDP)");
        Ok(())
    }

    /// Send a frame over the stream connection
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidProtocol`] - The client does not use TCP
    /// - [`NetError::NotConnected`] - No stream connection
    pub fn send_tcp(&self, packet: Packet) -> Result<()> {
        self.require(Protocol::Tcp)?;
        let session = self.inner.tcp.lock().clone().ok_or(NetError::NotConnected)?;
        session.send(encode_frame(packet)?)
    }

    /// Send a datagram, prefixed with [`id`](Self::id) when `include_id` is set
    ///
    /// Servers that correlate datagrams with clients drop datagrams without a
    /// valid identity.
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidProtocol`] - The client does not use UDP
    /// - [`NetError::NotConnected`] - No datagram session
    /// - [`NetError::DatagramTooLarge`] - Packet does not fit a datagram
    pub fn send_udp(&self, packet: Packet, include_id: bool) -> Result<()> {
        self.require(Protocol::Udp)?;
        let udp = self.inner.udp.lock().clone().ok_or(NetError::NotConnected)?;

        let id = include_id.then(|| self.id());
        if id == Some(0) {
            warn!("Sending datagram with client id 0, the server will not recognise it");
        }
        udp.send(encode_datagram(packet, id)?)
    }

    /// Close both transports
    ///
    /// The handler receives one `on_disconnected(Both)` if anything was open.
    ///
    /// # Returns
    /// `true` if anything was open
    pub fn disconnect(&self) -> bool {
        self.inner.disconnect(true)
    }

    /// Disconnect without notification and stop the dispatch thread
    ///
    /// Pending callbacks are discarded. The client cannot connect again.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.disconnect(false);
        self.inner.queue.stop();
        debug!("Client closed");
    }

    /// Identity used by [`send_udp`](Self::send_udp)
    ///
    /// Starts at 0; the application sets it to the value its server assigned.
    pub fn id(&self) -> ClientId {
        self.inner.id.load(Ordering::Acquire)
    }

    pub fn set_id(&self, id: ClientId) {
        self.inner.id.store(id, Ordering::Release);
    }

    /// Whether any transport is connected
    pub fn is_connected(&self) -> bool {
        self.is_tcp_connected() || self.is_udp_connected()
    }

    /// State of the stream connection, `Idle` before the first connect
    pub fn tcp_state(&self) -> SessionState {
        self.inner
            .tcp
            .lock()
            .as_ref()
            .map_or(SessionState::Idle, |tcp| tcp.state())
    }

    pub fn is_tcp_connected(&self) -> bool {
        self.inner
            .tcp
            .lock()
            .as_ref()
            .is_some_and(|tcp| tcp.is_connected())
    }

    pub fn is_udp_connected(&self) -> bool {
        self.inner
            .udp
            .lock()
            .as_ref()
            .is_some_and(|udp| udp.is_open())
    }

    /// Local address of the datagram socket
    pub fn local_udp_addr(&self) -> Option<SocketAddr> {
        self.inner.udp.lock().as_ref().map(|udp| udp.local_addr())
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Counters of the dispatch queue
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.queue.stats()
    }

    fn require(&self, transport: Protocol) -> Result<()> {
        let configured = self.inner.options.protocol;
        let available = match transport {
            Protocol::Tcp => configured.uses_tcp(),
            Protocol::Udp => configured.uses_udp(),
            Protocol::Both => configured == Protocol::Both,
        };
        if available {
            Ok(())
        } else {
            Err(NetError::InvalidProtocol(format!(
                "client is configured for {configured}, not {transport}"
            )))
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(NetError::InvalidState("client has been closed".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server", &self.inner.server_addr())
            .field("id", &self.id())
            .field("tcp_connected", &self.is_tcp_connected())
            .field("udp_connected", &self.is_udp_connected())
            .finish()
    }
}

/// Routes stream session events to the client
struct ClientStreamEvents {
    client: Weak<ClientInner>,
    session: Arc<StreamSession>,
}

impl StreamEvents for ClientStreamEvents {
    fn frame(&self, packet: Packet) {
        if let Some(inner) = self.client.upgrade() {
            inner.dispatch(move |handler, client| handler.on_data(client, packet));
        }
    }

    fn closed(&self) {
        if let Some(inner) = self.client.upgrade() {
            inner.drop_tcp(&self.session);
        }
    }

    fn failed(&self, operation: FailedOperation, error: NetError) {
        if let Some(inner) = self.client.upgrade() {
            inner.dispatch(move |handler, client| {
                handler.on_network_operation_failed(client, operation, &error)
            });
        }
    }
}
