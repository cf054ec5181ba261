//! The TCP accept loop (§4.6): binds a listener, spawns one session task per
//! connection, and tracks live sessions so a `CancelRequest` connection can
//! reach the right one.

use crate::backend::BackendClient;
use crate::connection::{Session, SessionConfig};
use proxy_translate::Translator;
use proxy_wire::codec::{self, StartupOutcome};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;

#[derive(Default)]
struct SessionRegistry {
    sessions: Mutex<HashMap<(i32, i32), Arc<Notify>>>,
}

impl SessionRegistry {
    fn register(&self, process_id: i32, secret_key: i32, cancel: Arc<Notify>) {
        self.sessions.lock().unwrap().insert((process_id, secret_key), cancel);
    }

    fn unregister(&self, process_id: i32, secret_key: i32) {
        self.sessions.lock().unwrap().remove(&(process_id, secret_key));
    }

    fn cancel(&self, process_id: i32, secret_key: i32) {
        if let Some(cancel) = self.sessions.lock().unwrap().get(&(process_id, secret_key)) {
            cancel.notify_one();
        }
    }
}

/// Accepts connections on a bound TCP port and spawns one task per session.
pub struct Server {
    listener: TcpListener,
    backend: Arc<dyn BackendClient>,
    translator: Arc<Translator>,
    session_config: SessionConfig,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<Notify>,
    next_process_id: AtomicI32,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        backend: Arc<dyn BackendClient>,
        translator: Arc<Translator>,
        session_config: SessionConfig,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            backend,
            translator,
            session_config,
            registry: Arc::new(SessionRegistry::default()),
            shutdown: Arc::new(Notify::new()),
            next_process_id: AtomicI32::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Callers use this to request a graceful shutdown. Stops the accept
    /// loop and cancels any backend operation a live session is waiting on;
    /// see DESIGN.md for the gap between this and a proactive `AdminShutdown`.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = accepted?;
                    self.spawn_session(socket, peer);
                }
            }
        }
    }

    fn spawn_session(&self, socket: TcpStream, peer: SocketAddr) {
        let _ = socket.set_nodelay(true);
        let backend = self.backend.clone();
        let translator = self.translator.clone();
        let config = self.session_config.clone();
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let my_process_id = self.next_process_id.fetch_add(1, Ordering::Relaxed);
        let my_secret_key = random_secret();

        tokio::spawn(async move {
            let span = tracing::info_span!("session", %peer, process_id = my_process_id);
            let _enter = span.enter();
            let mut stream = socket;
            let outcome = match codec::read_startup(&mut stream).await {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(error = %e, "startup handshake failed");
                    return;
                }
            };
            match outcome {
                StartupOutcome::CancelRequest { process_id, secret_key } => {
                    tracing::info!(target_process_id = process_id, "cancel request received");
                    registry.cancel(process_id, secret_key);
                }
                StartupOutcome::Startup { user, database, .. } => {
                    let cancel = Arc::new(Notify::new());
                    registry.register(my_process_id, my_secret_key, cancel.clone());
                    metrics::gauge!("proxy_sessions_active").increment(1.0);
                    let session = Session::new(
                        stream,
                        my_process_id,
                        my_secret_key,
                        user,
                        database,
                        config,
                        backend,
                        translator,
                        cancel,
                        shutdown,
                    );
                    if let Err(e) = session.run().await {
                        tracing::warn!(error = %e, "session ended with error");
                    }
                    metrics::gauge!("proxy_sessions_active").decrement(1.0);
                    registry.unregister(my_process_id, my_secret_key);
                }
            }
        });
    }
}

/// Not cryptographically strong — matches real PostgreSQL's own `BackendKeyData`
/// secret, which only needs to be hard to guess within the cancel-request window.
fn random_secret() -> i32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().subsec_nanos();
    nanos as i32
}
