//! Server stream transport: accept loop and per-connection admission

use crate::error::NetError;
use crate::io::handler::FailedOperation;
use crate::io::identity::ClientId;
use crate::io::options::Protocol;
use crate::io::server::session::{ClientInfo, ServerClient};
use crate::io::server::ServerShared;
use crate::io::stream::{self, StreamEvents};
use crate::protocol::Packet;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Pause after a failed accept; errors like EMFILE persist until a descriptor is freed
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Accept connections until the listener task is aborted or the server is gone
pub(super) async fn accept_loop(listener: TcpListener, server: Weak<ServerShared>) {
    loop {
        let accepted = listener.accept().await;
        let Some(shared) = server.upgrade() else {
            return;
        };

        match accepted {
            Ok((stream, peer)) => {
                let Some(id) = shared.identities.acquire() else {
                    warn!(peer = %peer, "Server full, refusing connection");
                    drop(stream);
                    shared.dispatch(|handler, server| handler.on_server_full(server));
                    continue;
                };
                debug!(client_id = id, peer = %peer, "Connection accepted");
                tokio::spawn(admit(shared, stream, peer, id));
            }
            Err(e) => accept_failed(shared, e).await,
        }
    }
}

/// Report a failed accept, then back off before the next attempt
async fn accept_failed(shared: Arc<ServerShared>, e: std::io::Error) {
    warn!(error = %e, "Accept failed");
    let error = NetError::from(e);
    shared.dispatch(move |handler, server| {
        handler.on_network_operation_failed(server, None, FailedOperation::ConnectTcp, &error)
    });

    drop(shared);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Run the admission check and turn an accepted connection into a session
async fn admit(shared: Arc<ServerShared>, stream: TcpStream, peer: SocketAddr, id: ClientId) {
    let candidate = ClientInfo::new(id, peer);

    let (verdict_tx, verdict_rx) = oneshot::channel();
    let info = candidate.clone();
    shared.dispatch(move |handler, server| {
        let _ = verdict_tx.send(handler.accept_client(server, &info));
    });

    // A stopped dispatch queue drops the job and with it the sender
    let accepted = verdict_rx.await.unwrap_or(false);
    if !accepted || shared.is_stopped() {
        shared.identities.release(id);
        info!(client_id = id, peer = %peer, "Connection refused by admission check");
        return;
    }

    if let Err(e) = stream::configure(&stream, &shared.settings) {
        shared.identities.release(id);
        warn!(client_id = id, peer = %peer, error = %e, "Failed to configure socket");
        let error = NetError::from(e);
        shared.dispatch(move |handler, server| {
            handler.on_network_operation_failed(
                server,
                Some(&candidate),
                FailedOperation::ConnectTcp,
                &error,
            )
        });
        return;
    }

    let client = Arc::new(ServerClient::new(&candidate));
    shared.sessions.write().insert(id, client.clone());
    if shared.is_stopped() {
        shared.teardown(&client, Protocol::Both, false);
        return;
    }

    let snapshot = client.info();
    shared.dispatch(move |handler, server| handler.on_client_connected(server, &snapshot));

    let events = Arc::new(ServerStreamEvents {
        server: Arc::downgrade(&shared),
        client: client.clone(),
    });
    client.tcp.attach(stream, &shared.settings, events);
    info!(client_id = id, peer = %peer, "Client connected");
}

/// Routes stream session events of one client to the server
struct ServerStreamEvents {
    server: Weak<ServerShared>,
    client: Arc<ServerClient>,
}

impl StreamEvents for ServerStreamEvents {
    fn frame(&self, packet: Packet) {
        let Some(shared) = self.server.upgrade() else {
            return;
        };
        let id = self.client.id;
        shared.dispatch(move |handler, server| handler.on_data(server, id, packet));
    }

    fn closed(&self) {
        if let Some(shared) = self.server.upgrade() {
            shared.teardown(&self.client, Protocol::Both, true);
        }
    }

    fn failed(&self, operation: FailedOperation, error: NetError) {
        let Some(shared) = self.server.upgrade() else {
            return;
        };
        let info = self.client.info();
        shared.dispatch(move |handler, server| {
            handler.on_network_operation_failed(server, Some(&info), operation, &error)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::handler::ServerHandler;
    use crate::io::options::ServerOptions;
    use crate::io::server::Server;
    use std::io::ErrorKind;
    use std::time::Instant;
    use tokio::sync::mpsc;

    struct Failures(mpsc::UnboundedSender<(Option<ClientId>, FailedOperation)>);

    impl ServerHandler for Failures {
        fn on_data(&mut self, _server: &Server, _id: ClientId, _packet: Packet) {}

        fn on_network_operation_failed(
            &mut self,
            _server: &Server,
            info: Option<&ClientInfo>,
            operation: FailedOperation,
            _error: &NetError,
        ) {
            let _ = self.0.send((info.map(|i| i.id), operation));
        }
    }

    #[tokio::test]
    async fn test_accept_error_is_reported_once_and_backs_off() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Server::new(ServerOptions::new(0), Failures(tx)).unwrap();

        let started = Instant::now();
        let error = std::io::Error::new(ErrorKind::Other, "too many open files");
        accept_failed(server.shared.clone(), error).await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);

        let reported = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reported, (None, FailedOperation::ConnectTcp));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );

        server.stop();
    }
}
