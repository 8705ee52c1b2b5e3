//! Name registry: the `name -> (port, type)` map served by the daemon.
//!
//! Entries are kept sorted by name so every operation is a binary search,
//! and there is never more than one entry per name. Checking that a caller
//! is allowed to mutate the registry is the request handler's job.

use gdomap_core::wire::{NameEntry, PortType, Transport, NAME_MAX_LEN};

use crate::liveness::LivenessProbe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: Vec<u8>,
    pub port: u32,
    pub port_type: PortType,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.name.as_slice().cmp(name))
    }

    /// Register `name` at `port`. Returns the port on success, 0 on failure.
    ///
    /// A name already held at another port (or type) is only taken over if
    /// `probe` says the recorded port is free.
    pub fn register(
        &mut self,
        name: &[u8],
        port: u32,
        port_type: PortType,
        probe: &dyn LivenessProbe,
    ) -> u32 {
        if name.is_empty() || name.len() > NAME_MAX_LEN || port == 0 || port > u16::MAX as u32 {
            return 0;
        }
        match self.position(name) {
            Ok(i) => {
                let entry = &mut self.entries[i];
                if entry.port == port && entry.port_type == port_type {
                    return port;
                }
                if !probe.is_port_free(entry.port, entry.port_type.transport) {
                    tracing::info!(
                        name = %String::from_utf8_lossy(name),
                        held = entry.port,
                        requested = port,
                        "registration refused: name still held"
                    );
                    return 0;
                }
                tracing::info!(
                    name = %String::from_utf8_lossy(name),
                    old = entry.port,
                    new = port,
                    "previous holder gone, re-registered"
                );
                entry.port = port;
                entry.port_type = port_type;
                port
            }
            Err(i) => {
                self.entries.insert(
                    i,
                    RegistryEntry {
                        name: name.to_vec(),
                        port,
                        port_type,
                    },
                );
                tracing::debug!(name = %String::from_utf8_lossy(name), port, %port_type, "registered");
                port
            }
        }
    }

    /// Port registered for `name` under exactly `port_type`, else 0.
    pub fn lookup(&self, name: &[u8], port_type: PortType) -> u32 {
        match self.position(name) {
            Ok(i) if self.entries[i].port_type == port_type => self.entries[i].port,
            _ => 0,
        }
    }

    /// Like [`lookup`](Self::lookup), but a TCP entry whose port `probe`
    /// finds free is removed and reported as 0. UDP entries are served as
    /// recorded: a bound datagram socket is no proof of a live registrant
    /// either way.
    pub fn lookup_live(&mut self, name: &[u8], port_type: PortType, probe: &dyn LivenessProbe) -> u32 {
        let i = match self.position(name) {
            Ok(i) if self.entries[i].port_type == port_type => i,
            _ => return 0,
        };
        let entry = &self.entries[i];
        if entry.port_type.transport == Transport::Tcp && probe.is_port_free(entry.port, Transport::Tcp) {
            tracing::info!(
                name = %String::from_utf8_lossy(name),
                port = entry.port,
                "registrant gone, entry evicted"
            );
            self.entries.remove(i);
            return 0;
        }
        self.entries[i].port
    }

    /// Remove `name` if it is registered at `port` and `port_type`.
    /// An empty `name` removes every entry at that port and type.
    /// Returns `port` if anything was removed, else 0.
    pub fn unregister(&mut self, name: &[u8], port: u32, port_type: PortType) -> u32 {
        if name.is_empty() {
            let before = self.entries.len();
            self.entries
                .retain(|e| !(e.port == port && e.port_type == port_type));
            let removed = before - self.entries.len();
            if removed > 0 {
                tracing::debug!(port, removed, "unregistered all names at port");
                return port;
            }
            return 0;
        }
        match self.position(name) {
            Ok(i) if self.entries[i].port == port && self.entries[i].port_type == port_type => {
                self.entries.remove(i);
                tracing::debug!(name = %String::from_utf8_lossy(name), port, "unregistered");
                port
            }
            _ => 0,
        }
    }

    pub fn list_names(&self) -> Vec<NameEntry> {
        self.entries
            .iter()
            .map(|e| NameEntry {
                name: e.name.clone(),
                port_type: e.port_type,
            })
            .collect()
    }

    pub fn get(&self, name: &[u8]) -> Option<&RegistryEntry> {
        self.position(name).ok().map(|i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
