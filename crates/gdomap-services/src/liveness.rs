//! Liveness bind-probe.
//!
//! When a name is re-registered at a different port, the only evidence the
//! previous holder is gone is that its port can be bound again. This is a
//! heuristic: the OS may not have released the port yet (false negative,
//! registration fails), and a third process may grab the port between the
//! probe and the registry update.

use std::net::{Ipv4Addr, SocketAddrV4};

use gdomap_core::wire::Transport;
use socket2::{Domain, Protocol, Socket, Type};

/// Decides whether the recorded holder of a port has gone away.
pub trait LivenessProbe {
    /// True if nothing holds `port` for `transport` on this host.
    fn is_port_free(&self, port: u32, transport: Transport) -> bool;
}

/// Binds a throwaway socket to the port and drops it again.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindProbe;

impl LivenessProbe for BindProbe {
    fn is_port_free(&self, port: u32, transport: Transport) -> bool {
        let Ok(port) = u16::try_from(port) else {
            return false;
        };
        match try_bind(port, transport) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(port, ?transport, error = %e, "bind-probe: port still held");
                false
            }
        }
    }
}

fn try_bind(port: u16, transport: Transport) -> std::io::Result<()> {
    let (ty, proto) = match transport {
        Transport::Tcp => (Type::STREAM, Protocol::TCP),
        Transport::Udp => (Type::DGRAM, Protocol::UDP),
    };
    let socket = Socket::new(Domain::IPV4, ty, Some(proto))?;
    if transport == Transport::Tcp {
        // Ignore TIME_WAIT leftovers; a listening holder still blocks the bind.
        socket.set_reuse_address(true)?;
    }
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(())
}
