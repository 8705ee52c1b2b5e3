//! gdomap-core: wire format and configuration shared by the daemon,
//! its service layer and the command-line client.

pub mod config;
pub mod wire;

pub use config::GdomapConfig;
pub use wire::{PortType, Request, WireError};
