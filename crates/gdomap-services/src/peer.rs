//! Peer table: hosts believed to run gdomap, most recently heard first.
//!
//! Populated by PROBE and PREPLY traffic. Only hosts on one of our own
//! networks are admitted, and never this host itself.

use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::interfaces::InterfaceTable;

/// Peers not heard from for this long are dropped.
pub const PEER_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub addr: Ipv4Addr,
    /// Other addresses the same host announced in its PREPLY.
    pub aliases: Vec<Ipv4Addr>,
    pub last_contact: Instant,
}

impl PeerRecord {
    fn answers_to(&self, addr: Ipv4Addr) -> bool {
        self.addr == addr || self.aliases.contains(&addr)
    }
}

/// Where the probe driver stands, as far as eviction cares.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepState {
    /// When the most recent sweep started.
    pub started: Option<Instant>,
    /// Probes of that sweep are still queued or answers may still arrive.
    pub in_flight: bool,
}

#[derive(Debug)]
pub struct PeerTable {
    interfaces: Arc<InterfaceTable>,
    peers: Vec<PeerRecord>,
}

impl PeerTable {
    pub fn new(interfaces: Arc<InterfaceTable>) -> Self {
        Self {
            interfaces,
            peers: Vec::new(),
        }
    }

    /// Record that `addr` was heard from. Returns false if the address was
    /// ignored (ourselves, or not on a local network).
    ///
    /// An address already known as an alias refreshes that host's record.
    pub fn note_contact(&mut self, addr: Ipv4Addr, now: Instant) -> bool {
        if self.interfaces.is_own_address(addr) || !self.interfaces.is_local_network(addr) {
            tracing::trace!(%addr, "ignoring contact from self or remote network");
            return false;
        }
        let mut record = match self.peers.iter().position(|p| p.answers_to(addr)) {
            Some(i) => self.peers.remove(i),
            None => {
                tracing::info!(%addr, "peer discovered");
                PeerRecord {
                    addr,
                    aliases: Vec::new(),
                    last_contact: now,
                }
            }
        };
        record.last_contact = now;
        self.peers.insert(0, record);
        true
    }

    /// Record a host heard from at `addr` that also answers to `aliases`.
    /// The aliases join that host's record; standalone records for them
    /// are folded in, so one host is listed once.
    pub fn note_host(&mut self, addr: Ipv4Addr, aliases: &[Ipv4Addr], now: Instant) -> bool {
        if !self.note_contact(addr, now) {
            return false;
        }
        for &alias in aliases {
            if alias == addr || self.interfaces.is_own_address(alias) {
                continue;
            }
            if let Some(i) = self.peers.iter().skip(1).position(|p| p.answers_to(alias)) {
                let merged = self.peers.remove(i + 1);
                tracing::debug!(host = %addr, alias = %merged.addr, "folding peer record into host");
                for a in std::iter::once(merged.addr).chain(merged.aliases) {
                    if a != addr && !self.peers[0].aliases.contains(&a) {
                        self.peers[0].aliases.push(a);
                    }
                }
            }
            if !self.peers[0].aliases.contains(&alias) {
                self.peers[0].aliases.push(alias);
            }
        }
        true
    }

    /// Drop peers idle past the staleness window that have also stayed
    /// silent since the last sweep started. Nothing is dropped while a sweep
    /// is in flight. Returns how many were removed.
    pub fn evict_stale(&mut self, now: Instant, sweep: SweepState) -> usize {
        if sweep.in_flight {
            return 0;
        }
        let before = self.peers.len();
        self.peers.retain(|p| {
            let idle = now.saturating_duration_since(p.last_contact) > PEER_STALE_AFTER;
            let silent_since_sweep = sweep.started.map_or(true, |s| p.last_contact < s);
            !(idle && silent_since_sweep)
        });
        let removed = before - self.peers.len();
        if removed > 0 {
            tracing::debug!(removed, "evicted stale peers");
        }
        removed
    }

    /// One address per peer host, most recently heard first.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.peers.iter().map(|p| p.addr).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Human-readable table of peers and how long each has been silent.
    pub fn dump(&self, out: &mut impl Write, now: Instant) -> std::io::Result<()> {
        writeln!(out, "# gdomap peer table ({} peers)", self.peers.len())?;
        writeln!(out, "# address          idle-secs  aliases")?;
        for p in &self.peers {
            let idle = now.saturating_duration_since(p.last_contact).as_secs();
            if p.aliases.is_empty() {
                writeln!(out, "{:<18} {}", p.addr.to_string(), idle)?;
            } else {
                let aliases: Vec<String> = p.aliases.iter().map(|a| a.to_string()).collect();
                writeln!(out, "{:<18} {:<10} {}", p.addr.to_string(), idle, aliases.join(","))?;
            }
        }
        Ok(())
    }
}
