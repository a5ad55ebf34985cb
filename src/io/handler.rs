//! Application callbacks
//!
//! A [`Server`] or [`Client`] owns one handler and invokes it from its
//! dispatch thread only, so every method takes `&mut self`. Receiving data is
//! the one required capability; every other notification has an empty default.

use crate::error::NetError;
use crate::io::client::Client;
use crate::io::identity::ClientId;
use crate::io::options::Protocol;
use crate::io::server::{ClientInfo, Server};
use crate::protocol::Packet;
use std::net::SocketAddr;

/// Network operation that failed, as reported to `on_network_operation_failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailedOperation {
    /// Establishing the stream connection
    ConnectTcp,
    /// Writing to the stream
    SendDataTcp,
    /// Reading from the stream or decoding its frames
    ReceiveDataTcp,
    /// Sending a datagram
    SendDataUdp,
    /// Receiving a datagram
    ReceiveDataUdp,
}

impl std::fmt::Display for FailedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailedOperation::ConnectTcp => "connect (TCP)",
            FailedOperation::SendDataTcp => "send (TCP)",
            FailedOperation::ReceiveDataTcp => "receive (TCP)",
            FailedOperation::SendDataUdp => "send (UDP)",
            FailedOperation::ReceiveDataUdp => "receive (UDP)",
        };
        f.write_str(name)
    }
}

/// Server-side event handler
///
/// The `server` argument can be used to reply, broadcast or disconnect from
/// inside a callback.
///
/// # Examples
///
/// ```no_run
/// use simple_networking::io::{ClientId, Server, ServerHandler};
/// use simple_networking::protocol::Packet;
///
/// struct Echo;
///
/// impl ServerHandler for Echo {
///     fn on_data(&mut self, server: &Server, id: ClientId, mut packet: Packet) {
///         if let Ok(text) = packet.read::<String>() {
///             let mut reply = Packet::new();
///             reply.write(text);
///             let _ = server.send_tcp(id, reply);
///         }
///     }
/// }
/// ```
pub trait ServerHandler: Send + 'static {
    /// A complete frame or identified datagram arrived from client `id`
    fn on_data(&mut self, server: &Server, id: ClientId, packet: Packet);

    /// A datagram arrived while the server runs without UDP identities
    ///
    /// The packet holds the whole datagram.
    fn on_unidentified_udp_data(&mut self, _server: &Server, _from: SocketAddr, _packet: Packet) {}

    /// Admission check for a new stream connection
    ///
    /// Returning `false` closes the connection and frees its identity.
    fn accept_client(&mut self, _server: &Server, _info: &ClientInfo) -> bool {
        true
    }

    fn on_client_connected(&mut self, _server: &Server, _info: &ClientInfo) {}

    /// A session, or only its datagram binding when `protocol` is `Udp`, ended
    fn on_client_disconnected(
        &mut self,
        _server: &Server,
        _info: &ClientInfo,
        _protocol: Protocol,
    ) {
    }

    /// A network operation failed
    ///
    /// `info` is `None` for failures not tied to a session.
    fn on_network_operation_failed(
        &mut self,
        _server: &Server,
        _info: Option<&ClientInfo>,
        _operation: FailedOperation,
        _error: &NetError,
    ) {
    }

    /// A connection was refused because every identity is in use
    fn on_server_full(&mut self, _server: &Server) {}
}

/// Client-side event handler
pub trait ClientHandler: Send + 'static {
    /// A complete frame or datagram arrived from the server
    fn on_data(&mut self, client: &Client, packet: Packet);

    fn on_connected(&mut self, _client: &Client, _protocol: Protocol) {}

    fn on_disconnected(&mut self, _client: &Client, _protocol: Protocol) {}

    fn on_network_operation_failed(
        &mut self,
        _client: &Client,
        _operation: FailedOperation,
        _error: &NetError,
    ) {
    }
}
