//! The reactor.
//!
//! One task owns the daemon state and waits on everything at once: the
//! periodic tick, the TCP listener, the UDP socket, requests forwarded by
//! connection tasks, UDP writability while datagrams are queued, and the
//! operator signals. Requests are handled strictly one at a time.

use std::future::Future;
use std::io::ErrorKind;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use gdomap_core::config::GdomapConfig;
use gdomap_services::{InterfaceTable, LivenessProbe};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::connection::{self, Command, ConnectionTimeouts};
use crate::daemon::{Channel, Daemon};
use crate::send_queue::SendQueue;

/// Interval between periodic housekeeping runs.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Largest datagram we bother reading; anything longer is malformed anyway.
const RECV_BUF_SIZE: usize = 2048;

pub struct Server {
    daemon: Daemon,
    listener: TcpListener,
    udp: UdpSocket,
    timeouts: ConnectionTimeouts,
    dump_path: PathBuf,
}

impl Server {
    /// Bind the TCP listener and UDP socket on `addr`. Port 0 picks a free
    /// TCP port and binds UDP to the same number.
    pub async fn bind(
        addr: SocketAddrV4,
        interfaces: Arc<InterfaceTable>,
        config: &GdomapConfig,
        liveness: Box<dyn LivenessProbe + Send>,
    ) -> Result<Self> {
        let listener = make_listener(addr).context("failed to bind TCP listener")?;
        let listener = TcpListener::from_std(listener).context("failed to register TCP listener")?;
        let port = listener.local_addr()?.port();

        let udp = make_udp_socket(SocketAddrV4::new(*addr.ip(), port))
            .context("failed to bind UDP socket")?;
        let udp = UdpSocket::from_std(udp).context("failed to register UDP socket")?;

        tracing::info!(%addr, port, interfaces = interfaces.len(), "gdomap sockets bound");

        Ok(Self {
            daemon: Daemon::new(interfaces, port, config.probe.clone(), liveness),
            listener,
            udp,
            timeouts: ConnectionTimeouts {
                request: config.timeouts.request(),
                write: config.timeouts.write(),
            },
            dump_path: config.dump_path.clone(),
        })
    }

    pub fn port(&self) -> u16 {
        self.daemon.port()
    }

    /// Run until `shutdown` resolves or the listening socket fails.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Server {
            mut daemon,
            listener,
            udp,
            timeouts,
            dump_path,
        } = self;

        let (command_tx, mut command_rx) = mpsc::channel::<Command>(64);
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut dump_signal = signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("reactor shutting down");
                    return Ok(());
                }

                _ = tick.tick() => daemon.tick(Instant::now()),

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(connection::serve(stream, peer, command_tx.clone(), timeouts));
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::warn!(error = %e, "accept failed, continuing");
                    }
                    Err(e) => return Err(e).context("listening socket failed"),
                },

                received = udp.recv_from(&mut buf) => match received {
                    Ok((len, SocketAddr::V4(src))) => {
                        daemon.handle_datagram(&buf[..len], src, Instant::now());
                    }
                    Ok((_, other)) => tracing::debug!(%other, "ignoring non-IPv4 datagram"),
                    Err(e) => tracing::warn!(error = %e, "recv_from failed"),
                },

                Some(command) = command_rx.recv() => {
                    let outcome = daemon.handle(&command.request, command.src, Channel::Tcp, Instant::now());
                    // The connection may have given up already; nothing to do then.
                    let _ = command.reply.send(outcome);
                }

                ready = udp.writable(), if !daemon.send_queue().is_empty() => {
                    ready.context("UDP socket failed")?;
                    flush_udp(&udp, daemon.send_queue_mut());
                }

                _ = dump_signal.recv() => write_dump(&daemon, &dump_path),
            }
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

/// Send queued datagrams until the socket would block. A datagram the OS
/// refuses outright is dropped; UDP delivery is best effort anyway.
fn flush_udp(udp: &UdpSocket, queue: &mut SendQueue) {
    while let Some(d) = queue.front() {
        match udp.try_send_to(&d.payload, SocketAddr::V4(d.dest)) {
            Ok(_) => {
                queue.pop();
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                tracing::warn!(dest = %d.dest, error = %e, "send_to failed, dropping datagram");
                queue.pop();
            }
        }
    }
}

fn write_dump(daemon: &Daemon, path: &Path) {
    let result = std::fs::File::create(path)
        .and_then(|mut f| daemon.peers().dump(&mut f, Instant::now()));
    match result {
        Ok(()) => tracing::info!(path = %path.display(), peers = daemon.peers().len(), "peer table dumped"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to dump peer table"),
    }
}

fn make_listener(addr: SocketAddrV4) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.bind(&addr.into()).context("bind()")?;
    socket.listen(128).context("listen()")?;
    Ok(socket.into())
}

fn make_udp_socket(addr: SocketAddrV4) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_broadcast(true).context("SO_BROADCAST")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.bind(&addr.into()).context("bind()")?;
    Ok(socket.into())
}
