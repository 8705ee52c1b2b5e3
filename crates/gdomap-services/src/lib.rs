//! gdomap-services: the state a gdomap daemon keeps and the client used
//! to talk to one.

pub mod client;
pub mod interfaces;
pub mod liveness;
pub mod peer;
pub mod port;
pub mod registry;

pub use client::{Client, ClientError, Deadlines};
pub use interfaces::{Interface, InterfaceError, InterfaceTable};
pub use liveness::{BindProbe, LivenessProbe};
pub use peer::{PeerTable, SweepState, PEER_STALE_AFTER};
pub use port::well_known_port;
pub use registry::{Registry, RegistryEntry};
