//! Client helper: one request, one reply, bounded in time.
//!
//! Every call connects, writes one frame, reads the complete reply and
//! disconnects. Connect, write and read each have their own deadline, so no
//! single call can stall for longer than their sum.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use bytes::BytesMut;
use gdomap_core::config::TimeoutConfig;
use gdomap_core::wire::{self, NameEntry, PortType, Request, WireError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("timed out during {0}")]
    Timeout(&'static str),
    #[error("server closed the connection before replying")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad reply: {0}")]
    Wire(#[from] WireError),
}

/// Deadlines for the three phases of an exchange.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub connect: Duration,
    pub write: Duration,
    pub read: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for Deadlines {
    fn from(t: &TimeoutConfig) -> Self {
        Self {
            connect: t.connect(),
            write: t.write(),
            read: t.read(),
        }
    }
}

/// Talks to the gdomap daemon at one address.
#[derive(Debug, Clone)]
pub struct Client {
    addr: SocketAddr,
    deadlines: Deadlines,
}

impl Client {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            deadlines: Deadlines::default(),
        }
    }

    pub fn with_deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn register(&self, name: &[u8], port: u32, port_type: PortType) -> Result<u32, ClientError> {
        self.port_exchange(&Request::register(name, port, port_type)?).await
    }

    pub async fn lookup(&self, name: &[u8], port_type: PortType) -> Result<u32, ClientError> {
        self.port_exchange(&Request::lookup(name, port_type)?).await
    }

    pub async fn unregister(&self, name: &[u8], port: u32, port_type: PortType) -> Result<u32, ClientError> {
        self.port_exchange(&Request::unregister(name, port, port_type)?).await
    }

    /// Round-trip PROBE. Returns the well-known port the daemon reports.
    pub async fn probe(&self, from: Ipv4Addr) -> Result<u32, ClientError> {
        let to = match self.addr {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        self.port_exchange(&Request::probe(from, to)).await
    }

    /// Addresses of every peer the daemon knows about.
    pub async fn servers(&self) -> Result<Vec<Ipv4Addr>, ClientError> {
        let mut stream = self.send(&Request::servers()).await?;
        let header = self.read_header(&mut stream).await?;
        let count = wire::servers_reply_count(header)?;
        let body = self.read_body(&mut stream, count * wire::ADDR_SIZE).await?;
        Ok(wire::decode_servers_body(&body, count)?)
    }

    /// Every name registered with the daemon.
    pub async fn names(&self) -> Result<Vec<NameEntry>, ClientError> {
        let mut stream = self.send(&Request::names()).await?;
        let header = self.read_header(&mut stream).await?;
        let len = wire::names_reply_len(header)?;
        let body = self.read_body(&mut stream, len).await?;
        Ok(wire::decode_names_body(&body)?)
    }

    /// Look `name` up on this host first, then on every peer it knows
    /// about. Returns the first host that has it, with its port.
    pub async fn lookup_anywhere(
        &self,
        name: &[u8],
        port_type: PortType,
    ) -> Result<Option<(Ipv4Addr, u32)>, ClientError> {
        let here = match self.addr {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => Ipv4Addr::LOCALHOST,
        };
        let port = self.lookup(name, port_type).await?;
        if port != 0 {
            return Ok(Some((here, port)));
        }
        for peer in self.servers().await? {
            let remote = Client::new(SocketAddrV4::new(peer, self.addr.port()).into())
                .with_deadlines(self.deadlines);
            match remote.lookup(name, port_type).await {
                Ok(0) => continue,
                Ok(port) => return Ok(Some((peer, port))),
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "peer lookup failed, skipping");
                }
            }
        }
        Ok(None)
    }

    async fn port_exchange(&self, req: &Request) -> Result<u32, ClientError> {
        let mut stream = self.send(req).await?;
        let header = self.read_header(&mut stream).await?;
        Ok(wire::decode_port_reply(&header)?)
    }

    async fn send(&self, req: &Request) -> Result<TcpStream, ClientError> {
        let mut stream = timeout(self.deadlines.connect, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ClientError::Timeout("connect"))??;
        timeout(self.deadlines.write, stream.write_all(&req.to_bytes()))
            .await
            .map_err(|_| ClientError::Timeout("write"))??;
        Ok(stream)
    }

    async fn read_header(&self, stream: &mut TcpStream) -> Result<[u8; 4], ClientError> {
        let mut header = [0u8; 4];
        self.read_exact(stream, &mut header).await?;
        Ok(header)
    }

    async fn read_body(&self, stream: &mut TcpStream, len: usize) -> Result<BytesMut, ClientError> {
        let mut body = BytesMut::zeroed(len);
        self.read_exact(stream, &mut body).await?;
        Ok(body)
    }

    async fn read_exact(&self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), ClientError> {
        match timeout(self.deadlines.read, stream.read_exact(buf)).await {
            Err(_) => Err(ClientError::Timeout("read")),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ClientError::Closed),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(_)) => Ok(()),
        }
    }
}
