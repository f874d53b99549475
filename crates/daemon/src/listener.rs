//! TLS accept loop.
//!
//! One task per accepted connection performs the handshake, registers the
//! session and runs it. On shutdown the accept socket is closed first, then
//! every live session is cancelled, then the loop waits for all connection
//! tasks to finish.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use protocol::{Connection, Message};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::session::{Session, SessionContext, SessionRegistry};

/// Accepts TLS connections and runs a session for each.
pub struct Listener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    context: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    slots: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
    sessions_root: CancellationToken,
}

impl Listener {
    /// Bind `addr`. A `max_sessions` of 0 means no cap.
    pub async fn bind(
        addr: SocketAddr,
        acceptor: TlsAcceptor,
        context: Arc<SessionContext>,
        registry: Arc<SessionRegistry>,
        max_sessions: usize,
    ) -> io::Result<Self> {
        let tcp = TcpListener::bind(addr).await?;
        tracing::info!(addr = %tcp.local_addr()?, max_sessions, "Listening");

        Ok(Self {
            tcp,
            acceptor,
            context,
            registry,
            slots: (max_sessions > 0).then(|| Arc::new(Semaphore::new(max_sessions))),
            tracker: TaskTracker::new(),
            sessions_root: CancellationToken::new(),
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// The registry sessions are recorded in.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept connections until `shutdown` is cancelled, then close every
    /// session and wait for their tasks.
    pub async fn run(self, shutdown: CancellationToken) {
        let Listener {
            tcp,
            acceptor,
            context,
            registry,
            slots,
            tracker,
            sessions_root,
        } = self;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Accepted connection");
                        tracker.spawn(handle_connection(
                            stream,
                            peer,
                            acceptor.clone(),
                            Arc::clone(&context),
                            Arc::clone(&registry),
                            slots.clone(),
                            sessions_root.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        drop(tcp);
        tracing::info!(sessions = registry.len(), "Listener stopping");

        registry.cancel_all();
        sessions_root.cancel();
        tracker.close();
        tracker.wait().await;

        tracing::info!("Listener stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    context: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    slots: Option<Arc<Semaphore>>,
    sessions_root: CancellationToken,
) {
    let tls_stream = tokio::select! {
        _ = sessions_root.cancelled() => return,
        accepted = acceptor.accept(stream) => match accepted {
            Ok(tls_stream) => tls_stream,
            Err(e) => {
                tracing::warn!(peer = %peer, "TLS handshake failed: {}", e);
                return;
            }
        },
    };

    let permit = match slots {
        Some(slots) => match slots.try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(peer = %peer, "Session limit reached, rejecting connection");
                let mut conn = Connection::new(tls_stream);
                let _ = conn.send(&Message::AuthFailed).await;
                let _ = conn.shutdown().await;
                return;
            }
        },
        None => None,
    };

    let guard = registry.register(peer, &sessions_root);
    let session = Session::new(tls_stream, Arc::clone(guard.handle()), context);
    session.run().await;

    drop(guard);
    drop(permit);
}
