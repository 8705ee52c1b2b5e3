//! gdomapd: the gdomap name server and peer discovery daemon.
//!
//! The binary in `main.rs` only wires configuration to [`Server`]; the
//! integration tests drive the same pieces in-process.

pub mod connection;
pub mod daemon;
pub mod probe;
pub mod send_queue;
pub mod server;

pub use daemon::{Channel, Daemon, Outcome};
pub use server::Server;
