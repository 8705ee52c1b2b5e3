//! Interface table: this host's IPv4 addresses and the networks they sit on.
//!
//! Built once at startup, either from `getifaddrs` or from the
//! `[[interfaces]]` table of the config file, and never refreshed.

use std::net::{Ipv4Addr, SocketAddrV4};

use gdomap_core::config::InterfaceConfig;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

/// One configured IPv4 address of this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Present only when the interface can broadcast.
    pub broadcast: Option<Ipv4Addr>,
    pub loopback: bool,
}

impl Interface {
    pub fn new(addr: Ipv4Addr, netmask: Ipv4Addr, broadcast: Option<Ipv4Addr>) -> Self {
        Self {
            name: addr.to_string(),
            addr,
            netmask,
            broadcast,
            loopback: addr.is_loopback(),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & u32::from(self.netmask))
    }

    /// True if `addr` is on the same network as this interface.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(addr) & mask == u32::from(self.addr) & mask
    }

    /// Number of usable host numbers, excluding the network and broadcast
    /// addresses.
    pub fn host_count(&self) -> u64 {
        let span = (!u32::from(self.netmask)) as u64 + 1;
        span.saturating_sub(2)
    }

    /// Every usable host address on this network, in ascending order.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let network = u32::from(self.network()) as u64;
        let count = self.host_count();
        (1..=count).map(move |i| Ipv4Addr::from((network + i) as u32))
    }
}

impl From<&InterfaceConfig> for Interface {
    fn from(c: &InterfaceConfig) -> Self {
        Interface::new(c.addr, c.netmask, c.broadcast)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("getifaddrs failed: {0}")]
    Enumerate(#[from] nix::Error),
    #[error("no IPv4 interfaces are up")]
    NoInterfaces,
}

/// The fixed set of interfaces this daemon serves.
#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    interfaces: Vec<Interface>,
}

impl InterfaceTable {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    /// Build from an explicit config table. Loopback is added if the table
    /// leaves it out, so local clients can always register.
    pub fn from_config(entries: &[InterfaceConfig]) -> Self {
        let mut interfaces: Vec<Interface> = entries.iter().map(Interface::from).collect();
        if !interfaces.iter().any(|i| i.loopback) {
            interfaces.push(Interface::new(
                Ipv4Addr::LOCALHOST,
                Ipv4Addr::new(255, 0, 0, 0),
                None,
            ));
        }
        Self { interfaces }
    }

    /// Ask the OS for every IPv4 address on an interface that is up.
    pub fn from_os() -> Result<Self, InterfaceError> {
        let mut interfaces = Vec::new();
        for ifa in getifaddrs()? {
            if !ifa.flags.contains(InterfaceFlags::IFF_UP) {
                continue;
            }
            let Some(addr) = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
                continue;
            };
            let Some(netmask) = ifa.netmask.as_ref().and_then(|a| a.as_sockaddr_in()) else {
                continue;
            };
            let broadcast = if ifa.flags.contains(InterfaceFlags::IFF_BROADCAST) {
                ifa.broadcast
                    .as_ref()
                    .and_then(|a| a.as_sockaddr_in())
                    .map(|b| *SocketAddrV4::from(*b).ip())
            } else {
                None
            };
            interfaces.push(Interface {
                name: ifa.interface_name.clone(),
                addr: *SocketAddrV4::from(*addr).ip(),
                netmask: *SocketAddrV4::from(*netmask).ip(),
                broadcast,
                loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
            });
        }
        if interfaces.is_empty() {
            return Err(InterfaceError::NoInterfaces);
        }
        Ok(Self { interfaces })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// True if `addr` is one of this host's own addresses.
    pub fn is_own_address(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|i| i.addr == addr)
    }

    /// True if `addr` is on a network reachable through a non-loopback
    /// interface.
    pub fn is_local_network(&self, addr: Ipv4Addr) -> bool {
        self.interfaces
            .iter()
            .any(|i| !i.loopback && i.contains(addr))
    }

    /// Our address on the network `remote` sits on, or the first
    /// non-loopback address when no network matches.
    pub fn best_match(&self, remote: Ipv4Addr) -> Option<Ipv4Addr> {
        self.interfaces
            .iter()
            .find(|i| !i.loopback && i.contains(remote))
            .or_else(|| self.interfaces.iter().find(|i| !i.loopback))
            .or_else(|| self.interfaces.first())
            .map(|i| i.addr)
    }

    /// Non-loopback addresses of this host.
    pub fn external_addresses(&self) -> Vec<Ipv4Addr> {
        self.interfaces
            .iter()
            .filter(|i| !i.loopback)
            .map(|i| i.addr)
            .collect()
    }
}
