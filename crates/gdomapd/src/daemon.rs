//! Daemon state and the request protocol state machine.
//!
//! `Daemon` owns the registry, the peer table and the UDP send queue. The
//! reactor feeds it one request at a time; nothing else touches it.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gdomap_core::config::ProbeConfig;
use gdomap_core::wire::{self, Opcode, PortType, Request};
use gdomap_services::{InterfaceTable, LivenessProbe, PeerTable, Registry, SweepState};

use crate::send_queue::SendQueue;

/// How long after a sweep starts its answers are still expected.
pub const SWEEP_GRACE: Duration = Duration::from_secs(10);

/// Which socket a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Tcp,
    Udp,
}

/// What to do with the connection or datagram that carried a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send these bytes back.
    Reply(Vec<u8>),
    /// Close the connection / drop the datagram without answering.
    Close,
}

pub struct Daemon {
    pub(crate) interfaces: Arc<InterfaceTable>,
    pub(crate) registry: Registry,
    pub(crate) peers: PeerTable,
    pub(crate) send_queue: SendQueue,
    pub(crate) port: u16,
    pub(crate) probe: ProbeConfig,
    pub(crate) liveness: Box<dyn LivenessProbe + Send>,
    pub(crate) sweep_started: Option<Instant>,
}

impl Daemon {
    pub fn new(
        interfaces: Arc<InterfaceTable>,
        port: u16,
        probe: ProbeConfig,
        liveness: Box<dyn LivenessProbe + Send>,
    ) -> Self {
        Self {
            peers: PeerTable::new(interfaces.clone()),
            interfaces,
            registry: Registry::new(),
            send_queue: SendQueue::new(),
            port,
            probe,
            liveness,
            sweep_started: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerTable {
        &mut self.peers
    }

    pub fn send_queue(&self) -> &SendQueue {
        &self.send_queue
    }

    pub fn send_queue_mut(&mut self) -> &mut SendQueue {
        &mut self.send_queue
    }

    /// The well-known port this daemon serves and probes on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// A sweep stays in flight while any of its PROBEs are queued and for
    /// [`SWEEP_GRACE`] after it started. Queued replies do not count.
    pub fn sweep_state(&self, now: Instant) -> SweepState {
        let recent = self
            .sweep_started
            .is_some_and(|s| now.saturating_duration_since(s) < SWEEP_GRACE);
        SweepState {
            started: self.sweep_started,
            in_flight: recent || self.send_queue.pending_probes() > 0,
        }
    }

    /// Decode and handle one UDP datagram. Any reply is queued back to
    /// the sender; malformed datagrams are dropped.
    pub fn handle_datagram(&mut self, bytes: &[u8], src: SocketAddrV4, now: Instant) {
        let req = match Request::decode(bytes) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(%src, error = %e, "dropping malformed datagram");
                return;
            }
        };
        if let Outcome::Reply(reply) = self.handle(&req, src, Channel::Udp, now) {
            self.send_queue.push(src, reply);
        }
    }

    /// Handle one decoded request.
    pub fn handle(&mut self, req: &Request, src: SocketAddrV4, channel: Channel, now: Instant) -> Outcome {
        tracing::trace!(%src, opcode = ?req.opcode, ?channel, "request");
        match req.opcode {
            Opcode::Register => self.handle_register(req, src),
            Opcode::Lookup => self.handle_lookup(req),
            Opcode::Unregister => self.handle_unregister(req, src),
            Opcode::Servers => self.handle_servers(channel),
            Opcode::Names => self.handle_names(channel),
            Opcode::Probe => self.handle_probe(req, src, channel, now),
            Opcode::ProbeReply => self.handle_probe_reply(req, src, channel, now),
        }
    }

    fn typed(req: &Request) -> Option<PortType> {
        match req.typed_port() {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::debug!(error = %e, opcode = ?req.opcode, "bad port type, closing");
                None
            }
        }
    }

    fn is_local_source(&self, src: SocketAddrV4, what: &str) -> bool {
        if self.interfaces.is_own_address(*src.ip()) {
            return true;
        }
        tracing::warn!(%src, request = what, "rejecting request from non-local host");
        false
    }

    fn handle_register(&mut self, req: &Request, src: SocketAddrV4) -> Outcome {
        if !self.is_local_source(src, "register") {
            return Outcome::Close;
        }
        let Some(port_type) = Self::typed(req) else {
            return Outcome::Close;
        };
        let port = self
            .registry
            .register(&req.name, req.port, port_type, self.liveness.as_ref());
        Outcome::Reply(wire::encode_port_reply(port).to_vec())
    }

    fn handle_lookup(&mut self, req: &Request) -> Outcome {
        let Some(port_type) = Self::typed(req) else {
            return Outcome::Close;
        };
        let port = self
            .registry
            .lookup_live(&req.name, port_type, self.liveness.as_ref());
        Outcome::Reply(wire::encode_port_reply(port).to_vec())
    }

    fn handle_unregister(&mut self, req: &Request, src: SocketAddrV4) -> Outcome {
        if !self.is_local_source(src, "unregister") {
            return Outcome::Close;
        }
        let Some(port_type) = Self::typed(req) else {
            return Outcome::Close;
        };
        let port = self.registry.unregister(&req.name, req.port, port_type);
        Outcome::Reply(wire::encode_port_reply(port).to_vec())
    }

    fn handle_servers(&self, channel: Channel) -> Outcome {
        if channel == Channel::Udp {
            return Outcome::Close;
        }
        Outcome::Reply(wire::encode_servers_reply(&self.peers.addresses()))
    }

    fn handle_names(&self, channel: Channel) -> Outcome {
        if channel == Channel::Udp {
            return Outcome::Close;
        }
        Outcome::Reply(wire::encode_names_reply(&self.registry.list_names()))
    }

    fn handle_probe(&mut self, req: &Request, src: SocketAddrV4, channel: Channel, now: Instant) -> Outcome {
        let from = *src.ip();
        match channel {
            Channel::Tcp => {
                self.peers.note_contact(from, now);
                Outcome::Reply(wire::encode_port_reply(self.port as u32).to_vec())
            }
            Channel::Udp => {
                if src.port() != self.port {
                    tracing::debug!(%src, "ignoring probe from foreign port");
                    return Outcome::Close;
                }
                if self.interfaces.is_own_address(from) || !self.interfaces.is_local_network(from) {
                    return Outcome::Close;
                }
                if req.addresses().is_err() {
                    tracing::debug!(%src, "malformed probe payload");
                    return Outcome::Close;
                }
                self.peers.note_contact(from, now);
                Outcome::Reply(self.probe_reply_for(from).to_bytes())
            }
        }
    }

    /// PREPLY: `[our address on their network][their address][our others]`.
    fn probe_reply_for(&self, to: Ipv4Addr) -> Request {
        let ours = self.interfaces.best_match(to).unwrap_or(Ipv4Addr::UNSPECIFIED);
        let extra: Vec<Ipv4Addr> = self
            .interfaces
            .external_addresses()
            .into_iter()
            .filter(|a| *a != ours)
            .collect();
        Request::probe_reply(ours, to, &extra)
    }

    /// Never answered: answering replies is how two daemons would ping-pong.
    fn handle_probe_reply(&mut self, req: &Request, src: SocketAddrV4, channel: Channel, now: Instant) -> Outcome {
        if channel == Channel::Tcp || src.port() != self.port {
            return Outcome::Close;
        }
        // The payload lists the replier's own addresses (and ours, which the
        // peer table skips): they are aliases of one host, not extra peers.
        let aliases = req.addresses().unwrap_or_else(|e| {
            tracing::debug!(%src, error = %e, "malformed probe reply payload");
            Vec::new()
        });
        self.peers.note_host(*src.ip(), &aliases, now);
        Outcome::Close
    }
}
