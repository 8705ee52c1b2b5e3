//! Probe/gossip driver.
//!
//! A sweep sends one PROBE per candidate host on every local network. Each
//! interface gets exactly one strategy: broadcast if it can, enumerate the
//! host numbers if the network is small enough, otherwise the configured
//! peer list. Answers arrive as PREPLY datagrams and land in the peer table
//! through the request handler.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;

use gdomap_core::config::ProbeConfig;
use gdomap_core::wire::Request;
use gdomap_services::{Interface, InterfaceTable};

use crate::daemon::Daemon;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Broadcast(Ipv4Addr),
    Enumerate,
    Static(Vec<Ipv4Addr>),
    Skip,
}

pub fn choose_strategy(iface: &Interface, config: &ProbeConfig) -> Strategy {
    if iface.loopback {
        return Strategy::Skip;
    }
    if let (true, Some(bcast)) = (config.broadcast, iface.broadcast) {
        return Strategy::Broadcast(bcast);
    }
    if iface.host_count() > 0 && iface.host_count() <= config.max_unicast_hosts as u64 {
        return Strategy::Enumerate;
    }
    let peers: Vec<Ipv4Addr> = config
        .peers
        .iter()
        .copied()
        .filter(|p| iface.contains(*p) && *p != iface.addr)
        .collect();
    if peers.is_empty() {
        Strategy::Skip
    } else {
        Strategy::Static(peers)
    }
}

/// Every `(our address, target)` pair one sweep will probe.
pub fn plan_sweep(interfaces: &InterfaceTable, config: &ProbeConfig) -> Vec<(Ipv4Addr, Ipv4Addr)> {
    let mut plan = Vec::new();
    for iface in interfaces.iter() {
        let strategy = choose_strategy(iface, config);
        tracing::debug!(interface = %iface.name, addr = %iface.addr, ?strategy, "probe strategy");
        match strategy {
            Strategy::Broadcast(bcast) => plan.push((iface.addr, bcast)),
            Strategy::Enumerate => plan.extend(
                iface
                    .hosts()
                    .filter(|h| *h != iface.addr)
                    .map(|h| (iface.addr, h)),
            ),
            Strategy::Static(peers) => plan.extend(peers.into_iter().map(|p| (iface.addr, p))),
            Strategy::Skip => {}
        }
    }
    plan
}

impl Daemon {
    /// Queue a PROBE to every planned target and mark the sweep started.
    pub fn start_sweep(&mut self, now: Instant) -> usize {
        let plan = plan_sweep(&self.interfaces, &self.probe);
        for (from, to) in &plan {
            let frame = Request::probe(*from, *to).to_bytes();
            self.send_queue.push_probe(SocketAddrV4::new(*to, self.port), frame);
        }
        self.sweep_started = Some(now);
        tracing::info!(probes = plan.len(), "probe sweep started");
        plan.len()
    }

    /// Periodic work run on every reactor tick: evict stale peers, then
    /// start a sweep if one is due and nothing is still queued.
    pub fn tick(&mut self, now: Instant) {
        let sweep = self.sweep_state(now);
        self.peers.evict_stale(now, sweep);

        if !self.probe.enabled || !self.send_queue.is_empty() {
            return;
        }
        let due = match self.sweep_started {
            None => true,
            Some(s) => now.saturating_duration_since(s) >= self.probe_interval(),
        };
        if due {
            self.start_sweep(now);
        }
    }

    fn probe_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.probe.interval_secs)
    }
}
