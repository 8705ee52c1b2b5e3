//! gdomap integration test harness.
//!
//! Every test starts its own daemon in-process on 127.0.0.1 with an
//! ephemeral port and talks to it through the real TCP and UDP sockets.
//! Nothing here needs root or a particular network setup.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use gdomap_core::config::GdomapConfig;
use gdomap_core::wire::Transport;
use gdomap_services::{BindProbe, Client, Deadlines, Interface, InterfaceTable, LivenessProbe};
use gdomapd::Server;

mod discovery;
mod names;
mod protocol;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A running daemon. Dropping it shuts the reactor down.
pub struct DaemonGuard {
    pub ip: Ipv4Addr,
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl DaemonGuard {
    pub fn addr(&self) -> SocketAddr {
        SocketAddrV4::new(self.ip, self.port).into()
    }

    pub fn client(&self) -> Client {
        Client::new(self.addr()).with_deadlines(quick_deadlines())
    }

    /// Stop the daemon and surface any error the reactor returned.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn quick_deadlines() -> Deadlines {
    Deadlines {
        connect: Duration::from_secs(2),
        write: Duration::from_secs(2),
        read: Duration::from_secs(2),
    }
}

/// Loopback only, as `from_config` builds it with an empty table.
pub fn loopback_only() -> InterfaceTable {
    InterfaceTable::from_config(&[])
}

/// Treat 127.0.0.0/8 as an ordinary LAN so other 127.x addresses can play
/// peer daemons.
pub fn loopback_as_lan() -> InterfaceTable {
    InterfaceTable::new(vec![Interface {
        name: "lo-lan".to_string(),
        addr: Ipv4Addr::LOCALHOST,
        netmask: Ipv4Addr::new(255, 0, 0, 0),
        broadcast: None,
        loopback: false,
    }])
}

/// Registrants in these tests register ports nobody listens on; treat
/// every one of them as alive so lookups never evict.
pub struct RegistrantsAlive;

impl LivenessProbe for RegistrantsAlive {
    fn is_port_free(&self, _port: u32, _transport: Transport) -> bool {
        false
    }
}

pub fn test_config() -> GdomapConfig {
    let mut config = GdomapConfig::default();
    config.probe.enabled = false;
    config.timeouts.request_secs = 1;
    config.dump_path = std::env::temp_dir().join(format!("gdomap-it-{}.dump", std::process::id()));
    config
}

/// Daemon on 127.0.0.1 with an ephemeral port, probing off.
pub async fn spawn_daemon(interfaces: InterfaceTable) -> DaemonGuard {
    spawn_daemon_with(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        interfaces,
        test_config(),
        Box::new(RegistrantsAlive),
    )
    .await
}

/// Same, but the real bind-probe decides whether registrants are alive.
pub async fn spawn_daemon_bind_checked(interfaces: InterfaceTable) -> DaemonGuard {
    spawn_daemon_with(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        interfaces,
        test_config(),
        Box::new(BindProbe),
    )
    .await
}

pub async fn spawn_daemon_with(
    bind: SocketAddrV4,
    interfaces: InterfaceTable,
    config: GdomapConfig,
    liveness: Box<dyn LivenessProbe + Send>,
) -> DaemonGuard {
    let server = Server::bind(bind, Arc::new(interfaces), &config, liveness)
        .await
        .expect("daemon should bind on loopback");
    let port = server.port();

    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run(async {
        let _ = rx.await;
    }));

    DaemonGuard {
        ip: *bind.ip(),
        port,
        shutdown: Some(tx),
        task: Some(task),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_daemon_starts_and_stops() {
    let daemon = spawn_daemon(loopback_only()).await;
    assert_ne!(daemon.port, 0);
    assert!(daemon.client().names().await.unwrap().is_empty());
    daemon.stop().await.expect("reactor should exit cleanly");
}
