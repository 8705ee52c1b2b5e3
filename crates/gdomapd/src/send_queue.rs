//! Outgoing UDP datagrams waiting for the socket to become writable.

use std::collections::VecDeque;
use std::net::SocketAddrV4;

/// Why a datagram was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    /// Answer to a request that arrived over UDP.
    Reply,
    /// PROBE of the current sweep.
    Probe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub dest: SocketAddrV4,
    pub payload: Vec<u8>,
    pub kind: DatagramKind,
}

/// FIFO of datagrams. Sent strictly in enqueue order.
#[derive(Debug, Default)]
pub struct SendQueue {
    queue: VecDeque<Datagram>,
    probes: usize,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dest: SocketAddrV4, payload: Vec<u8>) {
        self.queue.push_back(Datagram {
            dest,
            payload,
            kind: DatagramKind::Reply,
        });
    }

    pub fn push_probe(&mut self, dest: SocketAddrV4, payload: Vec<u8>) {
        self.probes += 1;
        self.queue.push_back(Datagram {
            dest,
            payload,
            kind: DatagramKind::Probe,
        });
    }

    pub fn front(&self) -> Option<&Datagram> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<Datagram> {
        let d = self.queue.pop_front()?;
        if d.kind == DatagramKind::Probe {
            self.probes -= 1;
        }
        Some(d)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// PROBEs still waiting to be sent.
    pub fn pending_probes(&self) -> usize {
        self.probes
    }

    /// Take everything queued, oldest first.
    pub fn drain(&mut self) -> Vec<Datagram> {
        self.probes = 0;
        self.queue.drain(..).collect()
    }
}
