//! quipd: a multi-client framed-message chat server.
//!
//! Clients exchange length-prefixed envelopes with the server and get
//! keyword-matched synthetic replies. Each connection runs on its own
//! task. The crate ships two binaries: the server (`quipd`) and a
//! console client (`client`).

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod responder;
pub mod server;
