//! Stream connection session shared by the client and server
//!
//! A [`StreamSession`] owns one TCP connection once it is attached: a reader
//! task that feeds the [`StreamReassembler`] and a writer task that drains an
//! outgoing queue. What happens to frames, failures and remote closes is left
//! to the owner through [`StreamEvents`].

use crate::error::{NetError, Result};
use crate::io::handler::FailedOperation;
use crate::protocol::{Packet, StreamReassembler};
use bytes::Bytes;
use parking_lot::Mutex;
use socket2::SockRef;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// Lifecycle of a stream session
///
/// `Disconnected` is terminal; reconnecting creates a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            _ => SessionState::Disconnected,
        }
    }
}

/// Socket and framing settings taken from the client or server options
#[derive(Debug, Clone)]
pub(crate) struct StreamSettings {
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    pub receive_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    pub max_frame_length: usize,
    pub disconnect_on_error: bool,
}

/// Callbacks from the I/O tasks of a [`StreamSession`]
///
/// Called from tokio tasks; implementations forward to the dispatch queue.
pub(crate) trait StreamEvents: Send + Sync + 'static {
    /// A complete frame was received
    fn frame(&self, packet: Packet);

    /// The session must be torn down (peer closed, or a failure that ends it)
    fn closed(&self);

    /// A read or write failed
    fn failed(&self, operation: FailedOperation, error: NetError);
}

/// Apply buffer sizes and disable Nagle's algorithm on a connected stream
pub(crate) fn configure(stream: &TcpStream, settings: &StreamSettings) -> std::io::Result<()> {
    let socket = SockRef::from(stream);
    socket.set_recv_buffer_size(settings.receive_buffer_size)?;
    socket.set_send_buffer_size(settings.send_buffer_size)?;
    stream.set_nodelay(true)?;
    Ok(())
}

/// One TCP connection with its reader and writer tasks
pub(crate) struct StreamSession {
    state: AtomicU8,
    peer: SocketAddr,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    outgoing: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl StreamSession {
    /// Create a session in the `Connecting` state
    ///
    /// Frames sent before [`attach`](Self::attach) are queued.
    pub fn new(peer: SocketAddr) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        StreamSession {
            state: AtomicU8::new(SessionState::Connecting as u8),
            peer,
            writer: Mutex::new(Some(tx)),
            outgoing: Mutex::new(Some(rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Start the reader and writer tasks on `stream`
    ///
    /// Must be called from within a tokio runtime. Does nothing if the session
    /// was closed in the meantime; the stream is then dropped.
    pub fn attach<E: StreamEvents>(
        self: &Arc<Self>,
        stream: TcpStream,
        settings: &StreamSettings,
        events: Arc<E>,
    ) {
        let Some(outgoing) = self.outgoing.lock().take() else {
            return;
        };
        if self
            .state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!(peer = %self.peer, "Session closed before attach");
            return;
        }

        let (reader, writer) = stream.into_split();

        let reader_task = tokio::spawn(read_loop(
            self.clone(),
            reader,
            settings.clone(),
            events.clone(),
        ));
        let writer_task = tokio::spawn(write_loop(
            self.clone(),
            writer,
            outgoing,
            settings.clone(),
            events,
        ));

        self.tasks
            .lock()
            .extend([reader_task.abort_handle(), writer_task.abort_handle()]);

        // A close racing the spawn above found no tasks to abort
        if !self.is_connected() {
            self.abort_tasks();
        }
        debug!(peer = %self.peer, "Stream session attached");
    }

    /// Queue bytes for the writer task
    ///
    /// # Errors
    ///
    /// - [`NetError::NotConnected`] - The session is closed
    pub fn send(&self, data: Bytes) -> Result<()> {
        if self.state() == SessionState::Disconnected {
            return Err(NetError::NotConnected);
        }
        match self.writer.lock().as_ref() {
            Some(tx) => tx.send(data).map_err(|_| NetError::NotConnected),
            None => Err(NetError::NotConnected),
        }
    }

    /// Close the connection
    ///
    /// # Returns
    /// `true` for the call that performed the close, `false` afterwards
    pub fn close(&self) -> bool {
        let previous = self
            .state
            .swap(SessionState::Disconnected as u8, Ordering::AcqRel);
        if previous == SessionState::Disconnected as u8 {
            return false;
        }

        self.writer.lock().take();
        self.outgoing.lock().take();
        self.abort_tasks();
        debug!(peer = %self.peer, "Stream session closed");
        true
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

fn is_remote_close(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

fn timed_out(operation: &str) -> std::io::Error {
    std::io::Error::new(ErrorKind::TimedOut, format!("{operation} timed out"))
}

async fn read_loop<E: StreamEvents>(
    session: Arc<StreamSession>,
    mut reader: OwnedReadHalf,
    settings: StreamSettings,
    events: Arc<E>,
) {
    let mut reassembler = StreamReassembler::with_max_frame_length(settings.max_frame_length);
    let mut buf = vec![0u8; settings.receive_buffer_size];

    loop {
        let read = match settings.receive_timeout {
            Some(limit) => tokio::time::timeout(limit, reader.read(&mut buf))
                .await
                .unwrap_or_else(|_| Err(timed_out("read"))),
            None => reader.read(&mut buf).await,
        };

        if !session.is_connected() {
            return;
        }

        match read {
            Ok(0) => {
                debug!(peer = %session.peer, "Peer closed the connection");
                events.closed();
                return;
            }
            Ok(n) => {
                trace!(peer = %session.peer, bytes = n, "Stream data received");
                let pushed = reassembler.push(&buf[..n], |frame| events.frame(frame));
                if let Err(e) = pushed {
                    warn!(peer = %session.peer, error = %e, "Framing error, dropping connection");
                    events.failed(FailedOperation::ReceiveDataTcp, e);
                    events.closed();
                    return;
                }
            }
            Err(e) if is_remote_close(e.kind()) => {
                debug!(peer = %session.peer, error = %e, "Connection reset by peer");
                events.closed();
                return;
            }
            Err(e) => {
                let kind = e.kind();
                warn!(peer = %session.peer, error = %e, "Stream read failed");
                events.failed(FailedOperation::ReceiveDataTcp, e.into());
                if settings.disconnect_on_error {
                    events.closed();
                    return;
                }
                if kind != ErrorKind::TimedOut {
                    return;
                }
            }
        }
    }
}

async fn write_loop<E: StreamEvents>(
    session: Arc<StreamSession>,
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
    settings: StreamSettings,
    events: Arc<E>,
) {
    while let Some(data) = outgoing.recv().await {
        let written = match settings.send_timeout {
            Some(limit) => tokio::time::timeout(limit, writer.write_all(&data))
                .await
                .unwrap_or_else(|_| Err(timed_out("write"))),
            None => writer.write_all(&data).await,
        };

        if !session.is_connected() {
            return;
        }

        match written {
            Ok(()) => trace!(peer = %session.peer, bytes = data.len(), "Stream data sent"),
            Err(e) => {
                warn!(peer = %session.peer, error = %e, "Stream write failed");
                events.failed(FailedOperation::SendDataTcp, e.into());
                if settings.disconnect_on_error {
                    events.closed();
                    return;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
}
