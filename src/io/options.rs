//! Client and server configuration
//!
//! Options are plain structs with public fields and `with_*` builder methods.
//! They are validated once, when the [`Client`](crate::io::Client) or
//! [`Server`](crate::io::Server) is created.

use crate::error::{NetError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_LENGTH;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Default socket buffer size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default maximum number of simultaneous clients on a server
pub const DEFAULT_MAX_CLIENTS: usize = 100;

/// Default time between two drains of the dispatch queue
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(30);

/// Transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Protocol {
    /// Stream transport only
    Tcp,
    /// Datagram transport only
    Udp,
    /// Both transports
    #[default]
    Both,
}

impl Protocol {
    /// Whether the stream transport is included
    pub fn uses_tcp(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Both)
    }

    /// Whether the datagram transport is included
    pub fn uses_udp(self) -> bool {
        matches!(self, Protocol::Udp | Protocol::Both)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Both => "TCP+UDP",
        };
        f.write_str(name)
    }
}

/// Server configuration
///
/// # Examples
///
/// ```
/// use simple_networking::io::{Protocol, ServerOptions};
/// use std::time::Duration;
///
/// let options = ServerOptions::new(7777)
///     .with_max_clients(16)
///     .with_protocol(Protocol::Tcp)
///     .with_receive_timeout(Duration::from_secs(30));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Local address to bind
    pub address: IpAddr,
    /// Local port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Maximum number of simultaneously connected clients
    pub max_clients: usize,
    /// Socket receive buffer size in bytes
    pub receive_buffer_size: usize,
    /// Socket send buffer size in bytes
    pub send_buffer_size: usize,
    /// Upper bound for one stream read
    pub receive_timeout: Option<Duration>,
    /// Upper bound for one stream write
    pub send_timeout: Option<Duration>,
    /// Transports to listen on
    pub protocol: Protocol,
    /// Time between two drains of the dispatch queue
    pub refresh_interval: Duration,
    /// Tear a session down after a failed network operation
    pub disconnect_client_on_error: bool,
    /// Expect `[id][length][payload]` datagrams correlated with stream sessions
    ///
    /// When `false`, every datagram is forwarded verbatim to
    /// `on_unidentified_udp_data`.
    pub require_client_id_in_udp_data: bool,
    /// Largest accepted stream frame in bytes
    pub max_frame_length: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_clients: DEFAULT_MAX_CLIENTS,
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            receive_timeout: None,
            send_timeout: None,
            protocol: Protocol::Both,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            disconnect_client_on_error: true,
            require_client_id_in_udp_data: true,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ServerOptions {
    /// Options listening on all IPv4 interfaces at `port`
    pub fn new(port: u16) -> Self {
        ServerOptions {
            port,
            ..Default::default()
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_buffer_sizes(mut self, receive: usize, send: usize) -> Self {
        self.receive_buffer_size = receive;
        self.send_buffer_size = send;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_disconnect_client_on_error(mut self, disconnect: bool) -> Self {
        self.disconnect_client_on_error = disconnect;
        self
    }

    pub fn with_require_client_id_in_udp_data(mut self, require: bool) -> Self {
        self.require_client_id_in_udp_data = require;
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Check the options for values the server cannot run with
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidOptions`] - The first offending field
    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(invalid("max_clients cannot be 0"));
        }
        validate_common(
            self.receive_buffer_size,
            self.send_buffer_size,
            self.receive_timeout,
            self.send_timeout,
            self.refresh_interval,
            self.max_frame_length,
        )?;
        if self.protocol == Protocol::Udp && self.require_client_id_in_udp_data {
            return Err(invalid(
                "require_client_id_in_udp_data needs the TCP transport to assign identities",
            ));
        }
        Ok(())
    }
}

/// Client configuration
///
/// # Examples
///
/// ```
/// use simple_networking::io::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions::new("127.0.0.1".parse().unwrap(), 7777)
///     .with_connect_timeout(Duration::from_secs(5));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Server address
    pub address: IpAddr,
    /// Server port
    pub port: u16,
    /// Socket receive buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub receive_buffer_size: usize,
    /// Socket send buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: usize,
    /// Upper bound for one stream read
    #[serde(default)]
    pub receive_timeout: Option<Duration>,
    /// Upper bound for one stream write
    #[serde(default)]
    pub send_timeout: Option<Duration>,
    /// Upper bound for establishing the stream connection
    #[serde(default)]
    pub connect_timeout: Option<Duration>,
    /// Transports used by `connect`
    #[serde(default)]
    pub protocol: Protocol,
    /// Time between two drains of the dispatch queue
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: Duration,
    /// Disconnect after a failed network operation
    #[serde(default = "default_true")]
    pub disconnect_on_error: bool,
    /// Largest accepted stream frame in bytes
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

impl ClientOptions {
    /// Options targeting `address:port` with defaults for everything else
    pub fn new(address: IpAddr, port: u16) -> Self {
        ClientOptions {
            address,
            port,
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            receive_timeout: None,
            send_timeout: None,
            connect_timeout: None,
            protocol: Protocol::Both,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            disconnect_on_error: true,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    pub fn with_buffer_sizes(mut self, receive: usize, send: usize) -> Self {
        self.receive_buffer_size = receive;
        self.send_buffer_size = send;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_disconnect_on_error(mut self, disconnect: bool) -> Self {
        self.disconnect_on_error = disconnect;
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Check the options for values the client cannot run with
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidOptions`] - The first offending field
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(invalid("port cannot be 0"));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(invalid("connect_timeout cannot be 0"));
        }
        validate_common(
            self.receive_buffer_size,
            self.send_buffer_size,
            self.receive_timeout,
            self.send_timeout,
            self.refresh_interval,
            self.max_frame_length,
        )
    }
}

fn validate_common(
    receive_buffer_size: usize,
    send_buffer_size: usize,
    receive_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    refresh_interval: Duration,
    max_frame_length: usize,
) -> Result<()> {
    if receive_buffer_size == 0 {
        return Err(invalid("receive_buffer_size cannot be 0"));
    }
    if send_buffer_size == 0 {
        return Err(invalid("send_buffer_size cannot be 0"));
    }
    if receive_timeout == Some(Duration::ZERO) {
        return Err(invalid("receive_timeout cannot be 0"));
    }
    if send_timeout == Some(Duration::ZERO) {
        return Err(invalid("send_timeout cannot be 0"));
    }
    if refresh_interval.is_zero() {
        return Err(invalid("refresh_interval cannot be 0"));
    }
    if max_frame_length == 0 {
        return Err(invalid("max_frame_length cannot be 0"));
    }
    Ok(())
}

fn invalid(reason: &str) -> NetError {
    NetError::InvalidOptions(reason.to_string())
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_refresh_interval() -> Duration {
    DEFAULT_REFRESH_INTERVAL
}

fn default_true() -> bool {
    true
}

fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}
