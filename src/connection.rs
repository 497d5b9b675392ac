//! Per-client connection: the data handle dispatchers see, plus the
//! worker loop that services one socket.
//!
//! A connection is plain data owned by the server; the worker is a
//! free function run on its own task. The loop is strictly sequential
//! for one client (read one envelope, dispatch, write the response),
//! so per-connection ordering needs no extra synchronization.

use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::protocol::{read_frame, write_frame, ProtocolError};
use crate::registry::Registry;

/// Payload that ends a session (matched case-insensitively).
pub const QUIT_COMMAND: &str = "quit";

/// One live client connection.
///
/// The same value serves as the handle passed to the dispatcher.
/// The accessors themselves are safe from any thread.
pub struct Connection {
    client_id: i32,
    user_name: OnceLock<String>,
    registry: Arc<Registry>,
}

// Manual impl: the registry holds this connection back, so deriving
// Debug would recurse through the cycle.
impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("user_name", &self.user_name.get())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(client_id: i32, registry: Arc<Registry>) -> Self {
        Self {
            client_id,
            user_name: OnceLock::new(),
            registry,
        }
    }

    /// Server-assigned ID, unique for the life of the process.
    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    /// Name from the client's first envelope; `None` until received.
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.get().map(String::as_str)
    }

    pub fn is_name_received(&self) -> bool {
        self.user_name.get().is_some()
    }

    /// Total live connections on the server.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// This connection's position in the registry, or `None` once it
    /// has been removed.
    pub fn connection_index(&self) -> Option<usize> {
        self.registry.index_of(self)
    }

    /// The name transitions from unset to set exactly once; later
    /// calls are ignored.
    pub(crate) fn set_user_name(&self, name: String) {
        let _ = self.user_name.set(name);
    }
}

/// Service one client socket until quit, end-of-stream, error, or
/// server shutdown.
///
/// All failures are handled here; nothing propagates to the accept
/// loop. Whatever the exit path, the connection is removed from the
/// registry exactly once, on the way out.
pub async fn run(
    conn: Arc<Connection>,
    stream: TcpStream,
    dispatcher: Arc<dyn Dispatcher>,
    shutdown: watch::Receiver<bool>,
) {
    let client_id = conn.client_id();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    if let Err(e) = exchange(&conn, &mut reader, &mut writer, &dispatcher, shutdown).await {
        match conn.user_name() {
            Some(user) => error!(
                client_id,
                user,
                error = %e,
                "connection failed during message exchange"
            ),
            None => error!(
                client_id,
                error = %e,
                "unestablished connection failed during message exchange"
            ),
        }
    }

    conn.registry.remove(&conn);
    debug!(client_id, "connection closed");
}

/// The receive/dispatch/send loop.
///
/// First envelope carries the user name and is answered with a
/// synthesized welcome instead of being dispatched. Every later
/// envelope is dispatched and answered with the dispatcher's text,
/// tagged with this connection's ID. A quit payload still gets its
/// final dispatched response before the loop ends.
async fn exchange<R, W>(
    conn: &Connection,
    reader: &mut R,
    writer: &mut W,
    dispatcher: &Arc<dyn Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            res = read_frame(reader) => res?,
            _ = shutdown.changed() => {
                debug!(client_id = conn.client_id(), "shutdown signal received");
                return Ok(());
            }
        };

        // EOF at an envelope boundary: clean close from the client.
        let Some(frame) = frame else {
            return Ok(());
        };

        if !conn.is_name_received() {
            let name = frame.text;
            info!(client_id = conn.client_id(), user = %name, "user connected");
            conn.set_user_name(name.clone());
            write_frame(
                writer,
                conn.client_id(),
                &format!("Hello, {name}! You are successfully connected to server!"),
            )
            .await?;
            continue;
        }

        debug!(
            client_id = conn.client_id(),
            user = conn.user_name().unwrap_or(""),
            message = %frame.text,
            "message received"
        );

        let reply = dispatcher.respond(&frame.text, conn);
        write_frame(writer, conn.client_id(), &reply).await?;

        if frame.text.eq_ignore_ascii_case(QUIT_COMMAND) {
            info!(
                client_id = conn.client_id(),
                user = conn.user_name().unwrap_or(""),
                "user disconnected"
            );
            return Ok(());
        }
    }
}
