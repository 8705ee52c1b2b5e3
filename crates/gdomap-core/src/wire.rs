//! gdomap wire format: on-wire types for every request and reply.
//!
//! Every request, over TCP or UDP, is one fixed-size frame: an 8-byte header
//! followed by a zero-padded 256-byte name field. Only the first `name_len`
//! bytes of that field are meaningful. All integers are big-endian.
//!
//! Replies are not framed: a 4-byte port for REGISTER, LOOKUP, UNREG and
//! PROBE, and length-prefixed arrays for SERVERS and NAMES. Nothing here
//! trusts a wire-supplied length without checking it against the bytes
//! actually present.

use std::fmt;
use std::net::Ipv4Addr;

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Longest name (or probe payload) a frame can carry.
pub const NAME_MAX_LEN: usize = 255;

/// Size of every request frame on the wire.
pub const FRAME_SIZE: usize = 264;

/// Size of an IPv4 address inside probe payloads and SERVERS replies.
pub const ADDR_SIZE: usize = 4;

/// Service database entry consulted for the well-known port.
pub const SERVICE_NAME: &str = "gdomap";

/// Well-known port used when the service database has no entry.
pub const DEFAULT_PORT: u16 = 538;

/// Upper bound on addresses accepted in a SERVERS reply.
pub const MAX_SERVERS: usize = 1 << 16;

/// Upper bound on the body of a NAMES reply, in bytes.
pub const MAX_NAMES_BYTES: usize = 1 << 24;

// ── Frame ─────────────────────────────────────────────────────────────────────

/// The fixed request frame exactly as it travels on the wire.
///
/// Wire size: 264 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RawFrame {
    /// Request opcode (see [`Opcode`]).
    pub opcode: u8,
    /// Number of meaningful bytes in `name`.
    pub name_len: u8,
    /// Transport and service class (see [`PortType`]).
    pub port_type: u8,
    /// Reserved, sent as zero and ignored on receipt.
    pub reserved: u8,
    /// Port being registered, looked up or withdrawn.
    pub port: U32<NetworkEndian>,
    /// Name or probe payload, zero padded.
    pub name: [u8; NAME_MAX_LEN + 1],
}

assert_eq_size!(RawFrame, [u8; FRAME_SIZE]);

// ── Opcode ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Register = b'R',
    Lookup = b'L',
    Unregister = b'U',
    Servers = b'S',
    Names = b'N',
    /// Peer discovery request, sent daemon to daemon.
    Probe = b'P',
    /// Answer to a PROBE. Never answered itself.
    ProbeReply = b'p',
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'R' => Ok(Opcode::Register),
            b'L' => Ok(Opcode::Lookup),
            b'U' => Ok(Opcode::Unregister),
            b'S' => Ok(Opcode::Servers),
            b'N' => Ok(Opcode::Names),
            b'P' => Ok(Opcode::Probe),
            b'p' => Ok(Opcode::ProbeReply),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

// ── Port type ─────────────────────────────────────────────────────────────────

const NET_MASK: u8 = 0x70;
const NET_TCP: u8 = 0x10;
const NET_UDP: u8 = 0x20;
const SVC_MASK: u8 = 0x0f;
const SVC_NATIVE: u8 = 0x01;
const SVC_FOREIGN: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Whether the registered port speaks the native object protocol or
/// something else entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceClass {
    Native,
    Foreign,
}

/// Transport × service class, packed into one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortType {
    pub transport: Transport,
    pub service: ServiceClass,
}

impl PortType {
    pub const TCP_NATIVE: PortType = PortType {
        transport: Transport::Tcp,
        service: ServiceClass::Native,
    };
    pub const UDP_NATIVE: PortType = PortType {
        transport: Transport::Udp,
        service: ServiceClass::Native,
    };
    pub const TCP_FOREIGN: PortType = PortType {
        transport: Transport::Tcp,
        service: ServiceClass::Foreign,
    };
    pub const UDP_FOREIGN: PortType = PortType {
        transport: Transport::Udp,
        service: ServiceClass::Foreign,
    };
}

impl TryFrom<u8> for PortType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & !(NET_MASK | SVC_MASK) != 0 {
            return Err(WireError::InvalidPortType(value));
        }
        let transport = match value & NET_MASK {
            NET_TCP => Transport::Tcp,
            NET_UDP => Transport::Udp,
            _ => return Err(WireError::InvalidPortType(value)),
        };
        let service = match value & SVC_MASK {
            SVC_NATIVE => ServiceClass::Native,
            SVC_FOREIGN => ServiceClass::Foreign,
            _ => return Err(WireError::InvalidPortType(value)),
        };
        Ok(PortType { transport, service })
    }
}

impl From<PortType> for u8 {
    fn from(t: PortType) -> u8 {
        let net = match t.transport {
            Transport::Tcp => NET_TCP,
            Transport::Udp => NET_UDP,
        };
        let svc = match t.service {
            ServiceClass::Native => SVC_NATIVE,
            ServiceClass::Foreign => SVC_FOREIGN,
        };
        net | svc
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = match self.transport {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        };
        let svc = match self.service {
            ServiceClass::Native => "gdo",
            ServiceClass::Foreign => "foreign",
        };
        write!(f, "{net}_{svc}")
    }
}

impl std::str::FromStr for PortType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp_gdo" | "tcp" => Ok(PortType::TCP_NATIVE),
            "udp_gdo" | "udp" => Ok(PortType::UDP_NATIVE),
            "tcp_foreign" => Ok(PortType::TCP_FOREIGN),
            "udp_foreign" => Ok(PortType::UDP_FOREIGN),
            _ => Err(WireError::UnknownPortTypeName(s.to_string())),
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// A decoded request frame.
///
/// `port_type` is kept raw: only REGISTER, LOOKUP and UNREG require a valid
/// one, and the handler decides what a bad one means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub port_type: u8,
    pub port: u32,
    pub name: Vec<u8>,
}

impl Request {
    fn build(opcode: Opcode, port_type: u8, port: u32, name: &[u8]) -> Result<Self, WireError> {
        if name.len() > NAME_MAX_LEN {
            return Err(WireError::NameTooLong(name.len()));
        }
        Ok(Self {
            opcode,
            port_type,
            port,
            name: name.to_vec(),
        })
    }

    pub fn register(name: &[u8], port: u32, port_type: PortType) -> Result<Self, WireError> {
        Self::build(Opcode::Register, port_type.into(), port, name)
    }

    pub fn lookup(name: &[u8], port_type: PortType) -> Result<Self, WireError> {
        Self::build(Opcode::Lookup, port_type.into(), 0, name)
    }

    /// An empty `name` withdraws every name registered at `port`.
    pub fn unregister(name: &[u8], port: u32, port_type: PortType) -> Result<Self, WireError> {
        Self::build(Opcode::Unregister, port_type.into(), port, name)
    }

    pub fn servers() -> Self {
        Self {
            opcode: Opcode::Servers,
            port_type: 0,
            port: 0,
            name: Vec::new(),
        }
    }

    pub fn names() -> Self {
        Self {
            opcode: Opcode::Names,
            port_type: 0,
            port: 0,
            name: Vec::new(),
        }
    }

    /// PROBE payload: `[sender address][target address]`.
    pub fn probe(from: Ipv4Addr, to: Ipv4Addr) -> Self {
        Self {
            opcode: Opcode::Probe,
            port_type: 0,
            port: 0,
            name: encode_addresses(&[from, to]),
        }
    }

    /// PREPLY payload: `[our address][prober address]` then any other
    /// addresses of the replying host.
    pub fn probe_reply(from: Ipv4Addr, to: Ipv4Addr, extra: &[Ipv4Addr]) -> Self {
        let mut addrs = vec![from, to];
        // What doesn't fit in the name field is dropped.
        let room = NAME_MAX_LEN / ADDR_SIZE - 2;
        addrs.extend(extra.iter().take(room));
        Self {
            opcode: Opcode::ProbeReply,
            port_type: 0,
            port: 0,
            name: encode_addresses(&addrs),
        }
    }

    /// The validated port type, for opcodes that need one.
    pub fn typed_port(&self) -> Result<PortType, WireError> {
        PortType::try_from(self.port_type)
    }

    /// Interpret the payload as a list of IPv4 addresses.
    pub fn addresses(&self) -> Result<Vec<Ipv4Addr>, WireError> {
        if self.name.len() % ADDR_SIZE != 0 {
            return Err(WireError::MalformedAddressList(self.name.len()));
        }
        Ok(self
            .name
            .chunks_exact(ADDR_SIZE)
            .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
            .collect())
    }

    /// Decode one frame. `bytes` must be exactly [`FRAME_SIZE`] long.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != FRAME_SIZE {
            return Err(WireError::BadFrameLength(bytes.len()));
        }
        let raw = RawFrame::read_from(bytes).ok_or(WireError::BadFrameLength(bytes.len()))?;
        let opcode = Opcode::try_from(raw.opcode)?;
        let len = raw.name_len as usize;
        if len > NAME_MAX_LEN {
            return Err(WireError::NameTooLong(len));
        }
        Ok(Self {
            opcode,
            port_type: raw.port_type,
            port: raw.port.get(),
            name: raw.name[..len].to_vec(),
        })
    }

    pub fn encode(&self) -> RawFrame {
        let mut raw = RawFrame::new_zeroed();
        raw.opcode = self.opcode.into();
        let len = self.name.len().min(NAME_MAX_LEN);
        raw.name_len = len as u8;
        raw.port_type = self.port_type;
        raw.port = U32::new(self.port);
        raw.name[..len].copy_from_slice(&self.name[..len]);
        raw
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().as_bytes().to_vec()
    }
}

fn encode_addresses(addrs: &[Ipv4Addr]) -> Vec<u8> {
    addrs.iter().flat_map(|a| a.octets()).collect()
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// One `(name, type)` tuple of a NAMES reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub name: Vec<u8>,
    pub port_type: PortType,
}

pub fn encode_port_reply(port: u32) -> [u8; 4] {
    port.to_be_bytes()
}

pub fn decode_port_reply(bytes: &[u8]) -> Result<u32, WireError> {
    let word: [u8; 4] = bytes
        .try_into()
        .map_err(|_| WireError::ShortReply { expected: 4, got: bytes.len() })?;
    Ok(u32::from_be_bytes(word))
}

/// `count:u32` followed by `count` IPv4 addresses.
pub fn encode_servers_reply(addrs: &[Ipv4Addr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + addrs.len() * ADDR_SIZE);
    out.extend_from_slice(&(addrs.len() as u32).to_be_bytes());
    for a in addrs {
        out.extend_from_slice(&a.octets());
    }
    out
}

/// Number of addresses announced by a SERVERS reply header.
pub fn servers_reply_count(header: [u8; 4]) -> Result<usize, WireError> {
    let count = u32::from_be_bytes(header) as usize;
    if count > MAX_SERVERS {
        return Err(WireError::ReplyTooLarge(count));
    }
    Ok(count)
}

pub fn decode_servers_body(body: &[u8], count: usize) -> Result<Vec<Ipv4Addr>, WireError> {
    let expected = count * ADDR_SIZE;
    if body.len() != expected {
        return Err(WireError::ShortReply { expected, got: body.len() });
    }
    Ok(body
        .chunks_exact(ADDR_SIZE)
        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
        .collect())
}

/// `length:u32` followed by `length` bytes of `(len:u8, type:u8, name)` tuples.
pub fn encode_names_reply(entries: &[NameEntry]) -> Vec<u8> {
    let body_len: usize = entries.iter().map(|e| 2 + e.name.len()).sum();
    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    for e in entries {
        out.push(e.name.len() as u8);
        out.push(e.port_type.into());
        out.extend_from_slice(&e.name);
    }
    out
}

/// Body length announced by a NAMES reply header.
pub fn names_reply_len(header: [u8; 4]) -> Result<usize, WireError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_NAMES_BYTES {
        return Err(WireError::ReplyTooLarge(len));
    }
    Ok(len)
}

pub fn decode_names_body(mut body: &[u8]) -> Result<Vec<NameEntry>, WireError> {
    let mut entries = Vec::new();
    while !body.is_empty() {
        if body.len() < 2 {
            return Err(WireError::TruncatedNames);
        }
        let len = body[0] as usize;
        let port_type = PortType::try_from(body[1])?;
        let rest = &body[2..];
        if rest.len() < len {
            return Err(WireError::TruncatedNames);
        }
        entries.push(NameEntry {
            name: rest[..len].to_vec(),
            port_type,
        });
        body = &rest[len..];
    }
    Ok(entries)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame is {0} bytes, expected {FRAME_SIZE}")]
    BadFrameLength(usize),

    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("invalid port type: 0x{0:02x}")]
    InvalidPortType(u8),

    #[error("unknown port type name: {0}")]
    UnknownPortTypeName(String),

    #[error("name length {0} exceeds maximum {NAME_MAX_LEN}")]
    NameTooLong(usize),

    #[error("address payload of {0} bytes is not a whole number of addresses")]
    MalformedAddressList(usize),

    #[error("short reply: expected {expected} bytes, got {got}")]
    ShortReply { expected: usize, got: usize },

    #[error("reply announces {0} items, over the limit")]
    ReplyTooLarge(usize),

    #[error("NAMES reply truncated mid-entry")]
    TruncatedNames,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
