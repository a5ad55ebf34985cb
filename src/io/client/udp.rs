//! Client datagram session

use crate::error::{NetError, Result};
use crate::io::client::ClientInner;
use crate::io::common::{decode_datagram_payload, is_runt, MAX_UDP_DATAGRAM_SIZE};
use crate::io::handler::FailedOperation;
use crate::protocol::Packet;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// UDP socket connected to the server, with its receive and send tasks
pub(crate) struct ClientUdp {
    local_addr: SocketAddr,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    tasks: Mutex<Vec<AbortHandle>>,
    open: AtomicBool,
}

impl ClientUdp {
    /// Bind an ephemeral port of the server's address family and connect it
    pub async fn connect(server: SocketAddr, client: Weak<ClientInner>) -> Result<Arc<Self>> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        socket.connect(server).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let udp = Arc::new(ClientUdp {
            local_addr: socket.local_addr()?,
            outgoing: Mutex::new(Some(tx)),
            tasks: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        });

        let receiver = tokio::spawn(receive_loop(udp.clone(), socket.clone(), client.clone()));
        let sender = tokio::spawn(send_loop(udp.clone(), socket, rx, client));
        udp.tasks
            .lock()
            .extend([receiver.abort_handle(), sender.abort_handle()]);

        debug!(local = %udp.local_addr, server = %server, "Datagram session opened");
        Ok(udp)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue an encoded datagram
    pub fn send(&self, data: Bytes) -> Result<()> {
        match self.outgoing.lock().as_ref() {
            Some(tx) if self.is_open() => tx.send(data).map_err(|_| NetError::NotConnected),
            _ => Err(NetError::NotConnected),
        }
    }

    /// Close the socket
    ///
    /// # Returns
    /// `true` for the call that performed the close
    pub fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.outgoing.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!(local = %self.local_addr, "Datagram session closed");
        true
    }
}

async fn receive_loop(
    udp: Arc<ClientUdp>,
    socket: Arc<UdpSocket>,
    client: Weak<ClientInner>,
) {
    let mut buf = vec![0u8; MAX_UDP_DATAGRAM_SIZE + 1];
    loop {
        let received = socket.recv(&mut buf).await;
        if !udp.is_open() {
            return;
        }
        let Some(inner) = client.upgrade() else {
            return;
        };

        match received {
            Ok(n) => {
                let data = &buf[..n];
                if is_runt(data) {
                    warn!(bytes = n, "Datagram too short, dropped");
                    continue;
                }
                let mut datagram = Packet::from_bytes(data);
                match decode_datagram_payload(&mut datagram) {
                    Ok(payload) => {
                        trace!(bytes = n, "Datagram received");
                        inner.dispatch(move |handler, client| handler.on_data(client, payload));
                    }
                    Err(e) => warn!(error = %e, "Malformed datagram, dropped"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Datagram receive failed, closing UDP");
                let error = NetError::from(e);
                inner.dispatch(move |handler, client| {
                    handler.on_network_operation_failed(
                        client,
                        FailedOperation::ReceiveDataUdp,
                        &error,
                    )
                });
                inner.drop_udp(&udp);
                return;
            }
        }
    }
}

async fn send_loop(
    udp: Arc<ClientUdp>,
    socket: Arc<UdpSocket>,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
    client: Weak<ClientInner>,
) {
    while let Some(data) = outgoing.recv().await {
        let sent = socket.send(&data).await;
        if !udp.is_open() {
            return;
        }
        if let Err(e) = sent {
            warn!(error = %e, "Datagram send failed");
            let Some(inner) = client.upgrade() else {
                return;
            };
            let error = NetError::from(e);
            inner.dispatch(move |handler, client| {
                handler.on_network_operation_failed(client, FailedOperation::SendDataUdp, &error)
            });
            if inner.options.disconnect_on_error {
                inner.drop_udp(&udp);
                return;
            }
        }
    }
}
