//! TCP server: accept loop, client ID assignment, and shutdown.
//!
//! One task runs the accept loop; each accepted socket gets its own
//! worker task. The accept loop never waits on any single client's
//! I/O, and per-connection failures never reach it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::connection::{self, Connection};
use crate::dispatcher::Dispatcher;
use crate::registry::Registry;

/// Maximum number of concurrent connections.
const MAX_CONNECTIONS: usize = 1024;

/// How long one accept call may block before the stop flag is
/// re-checked.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A bound server, ready to run its accept loop.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    dispatcher: Arc<dyn Dispatcher>,
    connection_limit: Arc<Semaphore>,
    next_client_id: AtomicI32,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle returned by [`Server::start`]; the only way to stop the
/// server.
pub struct ServerHandle {
    registry: Arc<Registry>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Bind the listening socket. Fail-fast: a bind error propagates
    /// to the caller and no partial listening state remains.
    pub async fn bind(
        host: &str,
        port: u16,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        info!(addr = %listener.local_addr()?, "Server is successfully started");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            dispatcher,
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            next_client_id: AtomicI32::new(0),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawn the accept loop on its own task and return immediately.
    pub fn start(self) -> ServerHandle {
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown_tx.clone();
        let accept_task = tokio::spawn(self.run());

        ServerHandle {
            registry,
            shutdown,
            accept_task,
        }
    }

    /// Accept loop. Exits when the stop flag is raised, then waits for
    /// every connection worker to finish its teardown.
    async fn run(self) {
        let mut workers = JoinSet::new();

        info!("No active connections. Waiting for clients");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let (stream, peer) = match timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await
            {
                // Poll tick expired; go re-check the stop flag.
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };

            let permit = match Arc::clone(&self.connection_limit).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(peer = %peer, "connection limit reached, refusing client");
                    continue;
                }
            };

            // Monotonic, never reused for the life of the process.
            let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            debug!(client_id, peer = %peer, "new connection");

            let conn = Arc::new(Connection::new(client_id, Arc::clone(&self.registry)));
            self.registry.add(Arc::clone(&conn));

            let dispatcher = Arc::clone(&self.dispatcher);
            let shutdown = self.shutdown_rx.clone();
            workers.spawn(async move {
                connection::run(conn, stream, dispatcher, shutdown).await;
                drop(permit);
            });
        }

        // The raised flag has already unblocked every worker's read;
        // log who is still mid-teardown, then wait them out.
        for conn in self.registry.snapshot() {
            debug!(
                client_id = conn.client_id(),
                user = conn.user_name().unwrap_or(""),
                "waiting for connection to stop"
            );
        }
        while workers.join_next().await.is_some() {}
        info!("server stopped");
    }
}

impl ServerHandle {
    /// Raise the cooperative stop flag and return immediately. The
    /// accept loop observes it within one poll interval; every worker's
    /// in-progress read is unblocked by the same signal.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop and wait until the accept loop and all connection workers
    /// have exited. This is the observable-completion variant used by
    /// shutdown-sensitive callers and tests.
    pub async fn stop_and_join(self) {
        self.stop();
        let _ = self.accept_task.await;
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, Frame, UNASSIGNED_ID};
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    struct TestClient {
        stream: TcpStream,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
            }
        }

        /// Connect and perform the name handshake; returns the client
        /// and the server-assigned ID from the welcome envelope.
        async fn handshake(addr: SocketAddr, name: &str) -> (Self, i32) {
            let mut client = Self::connect(addr).await;
            client.send(UNASSIGNED_ID, name).await;
            let welcome = client.recv().await.unwrap();
            assert_eq!(
                welcome.text,
                format!("Hello, {name}! You are successfully connected to server!")
            );
            let id = welcome.client_id;
            (client, id)
        }

        async fn send(&mut self, client_id: i32, text: &str) {
            protocol::write_frame(&mut self.stream, client_id, text)
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Option<Frame> {
            protocol::read_frame(&mut self.stream).await.unwrap()
        }
    }

    async fn start_server(dispatcher: Arc<dyn Dispatcher>) -> (ServerHandle, SocketAddr) {
        let server = Server::bind("127.0.0.1", 0, dispatcher).await.unwrap();
        let addr = server.local_addr().unwrap();
        (server.start(), addr)
    }

    fn echo() -> Arc<dyn Dispatcher> {
        Arc::new(|msg: &str, _conn: &Connection| format!("echo: {msg}"))
    }

    async fn wait_for_registry(registry: &Registry, expected: usize) {
        for _ in 0..250 {
            if registry.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "registry stuck at {} waiting for {expected}",
            registry.len()
        );
    }

    #[tokio::test]
    async fn bind_failure_propagates() {
        let first = Server::bind("127.0.0.1", 0, echo()).await.unwrap();
        let port = first.local_addr().unwrap().port();

        assert!(Server::bind("127.0.0.1", port, echo()).await.is_err());
    }

    #[tokio::test]
    async fn basic_exchange() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(move |msg: &str, conn: &Connection| {
            record.lock().unwrap().push(msg.to_string());
            format!("{} says {msg}", conn.user_name().unwrap_or(""))
        });

        let (handle, addr) = start_server(dispatcher).await;
        let (mut client, id) = TestClient::handshake(addr, "Alice").await;
        assert_eq!(id, 0);

        client.send(id, "hello").await;
        let reply = client.recv().await.unwrap();
        assert_eq!(reply, Frame::new(0, "Alice says hello"));
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);

        handle.stop_and_join().await;
    }

    #[tokio::test]
    async fn client_ids_are_unique_and_monotonic() {
        let (handle, addr) = start_server(echo()).await;

        let mut clients = Vec::new();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            let (client, id) = TestClient::handshake(addr, name).await;
            assert_eq!(id, i as i32);
            clients.push(client);
        }
        assert_eq!(handle.registry().len(), 4);

        handle.stop_and_join().await;
    }

    #[tokio::test]
    async fn dispatch_is_ordered_per_connection() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(move |msg: &str, _conn: &Connection| {
            record.lock().unwrap().push(msg.to_string());
            msg.to_string()
        });

        let (handle, addr) = start_server(dispatcher).await;
        let (mut client, id) = TestClient::handshake(addr, "Alice").await;

        // Push all three without waiting for replies; responses must
        // still come back in send order.
        client.send(id, "M1").await;
        client.send(id, "M2").await;
        client.send(id, "M3").await;

        for expected in ["M1", "M2", "M3"] {
            assert_eq!(client.recv().await.unwrap().text, expected);
        }
        assert_eq!(*seen.lock().unwrap(), vec!["M1", "M2", "M3"]);

        handle.stop_and_join().await;
    }

    #[tokio::test]
    async fn quit_closes_and_unregisters() {
        let (handle, addr) = start_server(echo()).await;

        let (_other, _) = TestClient::handshake(addr, "Alice").await;
        let (mut quitter, id) = TestClient::handshake(addr, "Bob").await;
        wait_for_registry(handle.registry(), 2).await;

        quitter.send(id, "quit").await;
        assert_eq!(quitter.recv().await.unwrap().text, "echo: quit");
        // Server closes its end after the final response.
        assert!(quitter.recv().await.is_none());

        wait_for_registry(handle.registry(), 1).await;
        handle.stop_and_join().await;
    }

    #[tokio::test]
    async fn protocol_error_tears_down_one_connection_only() {
        let (handle, addr) = start_server(echo()).await;

        let (mut healthy, healthy_id) = TestClient::handshake(addr, "Alice").await;
        let (mut broken, _) = TestClient::handshake(addr, "Mallory").await;
        wait_for_registry(handle.registry(), 2).await;

        // A negative declared length is a framing error, fatal to that
        // connection alone.
        broken.stream.write_all(&(-9i32).to_be_bytes()).await.unwrap();
        broken.stream.flush().await.unwrap();
        wait_for_registry(handle.registry(), 1).await;

        healthy.send(healthy_id, "still there?").await;
        assert_eq!(
            healthy.recv().await.unwrap().text,
            "echo: still there?"
        );

        handle.stop_and_join().await;
    }

    #[tokio::test]
    async fn forced_shutdown_converges_to_empty_registry() {
        let (handle, addr) = start_server(echo()).await;

        let mut clients = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            clients.push(TestClient::handshake(addr, name).await);
        }
        wait_for_registry(handle.registry(), 5).await;

        let registry = Arc::clone(handle.registry());
        handle.stop_and_join().await;
        assert_eq!(registry.len(), 0);

        // Every blocked client read observes end-of-stream.
        for (mut client, _) in clients {
            assert!(client.recv().await.is_none());
        }
    }
}
