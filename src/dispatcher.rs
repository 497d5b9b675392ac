//! Response callback contract.
//!
//! The server core never decides what to say back; that is supplied
//! by the caller as a [`Dispatcher`]. The contract is total: a
//! dispatcher always produces a response string and never fails; any
//! fallible implementation must fold its failures into the returned
//! text itself.

use crate::connection::Connection;

/// Maps an incoming message and its connection handle to the outgoing
/// response text.
///
/// Called concurrently from multiple connection workers, so
/// implementations holding shared mutable state must synchronize it
/// themselves. Calls for a single connection are strictly sequential.
pub trait Dispatcher: Send + Sync {
    fn respond(&self, msg: &str, conn: &Connection) -> String;
}

/// Plain functions and closures are dispatchers.
impl<F> Dispatcher for F
where
    F: Fn(&str, &Connection) -> String + Send + Sync,
{
    fn respond(&self, msg: &str, conn: &Connection) -> String {
        self(msg, conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::sync::Arc;

    #[test]
    fn closures_are_dispatchers() {
        let registry = Arc::new(Registry::new());
        let conn = Connection::new(5, registry);

        let dispatcher: Arc<dyn Dispatcher> =
            Arc::new(|msg: &str, conn: &Connection| format!("[{}] {msg}", conn.client_id()));
        assert_eq!(dispatcher.respond("ping", &conn), "[5] ping");
    }
}
