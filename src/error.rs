//! Error types for client/server networking operations
//!
//! This module defines every error the crate can produce: configuration
//! validation, protocol misuse at the call site, packet decoding, and
//! transport I/O failures reported through the handler callbacks.

use crate::io::identity::ClientId;
use thiserror::Error;

/// Networking error types
///
/// Construction of a [`Client`](crate::io::Client) or
/// [`Server`](crate::io::Server) and the send operations return
/// `Result<T, NetError>`. Failures that happen inside an I/O task are never
/// returned to a caller; they are delivered to
/// `on_network_operation_failed` instead.
#[derive(Error, Debug)]
pub enum NetError {
    /// Invalid client or server options
    ///
    /// This error occurs when:
    /// - A buffer size, `max_clients` or `max_frame_length` is zero
    /// - A timeout or the refresh interval is zero
    /// - The client has no target port
    /// - A UDP-only server is asked to correlate datagrams with identities
    ///
    /// The object is never constructed when this error is returned.
    ///
    /// # Example
    /// ```no_run
    /// # use simple_networking::error::NetError;
    /// let err = NetError::InvalidOptions("max_clients cannot be 0".to_string());
    /// ```
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Operation on a transport the instance was not configured to use
    ///
    /// For example calling `send_udp` on a server created with
    /// [`Protocol::Tcp`](crate::io::Protocol::Tcp).
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),

    /// Operation not valid in the current lifecycle state
    ///
    /// Returned when listening twice, listening after `stop()`, or connecting a
    /// transport that is already connected.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No live session holds the given identity
    #[error("Client {0} not found")]
    ClientNotFound(ClientId),

    /// The transport has no live connection
    #[error("Not connected")]
    NotConnected,

    /// Not enough unread bytes to decode the requested value
    ///
    /// Guard with [`Packet::unread_length`](crate::protocol::Packet::unread_length)
    /// when the input may be truncated.
    #[error("Not enough data: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the decode
        needed: usize,
        /// Bytes left after the read cursor
        available: usize,
    },

    /// A frame length prefix was zero or negative
    ///
    /// The byte stream cannot be resynchronized after this, so the stream
    /// session that received it is always torn down.
    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(i32),

    /// A frame exceeds the configured or representable maximum
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared or actual frame size in bytes
        size: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// A datagram would not fit in a single UDP packet
    #[error("Datagram too large: {size} bytes (max: {max})")]
    DatagramTooLarge {
        /// Encoded datagram size in bytes
        size: usize,
        /// Maximum UDP payload size in bytes
        max: usize,
    },

    /// A string length prefix was negative
    #[error("Invalid string length: {0}")]
    InvalidStringLength(i32),

    /// I/O error occurred during network communication
    ///
    /// This error wraps standard library I/O errors and occurs when:
    /// - TCP connection failed or was refused
    /// - Connection lost during transmission (broken pipe)
    /// - A configured send or receive timeout elapsed
    /// - Binding a listener failed (address in use, permission denied)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error while reading a string
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Result type alias for networking operations
pub type Result<T> = std::result::Result<T, NetError>;
