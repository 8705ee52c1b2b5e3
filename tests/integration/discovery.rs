use std::time::Duration;

use gdomap_core::wire::{Opcode, Request};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::*;

/// A fake peer daemon on another loopback address, sending from the
/// well-known port as a real one would.
async fn fake_peer(daemon: &DaemonGuard, last_octet: u8) -> (UdpSocket, Ipv4Addr) {
    let ip = Ipv4Addr::new(127, 0, 0, last_octet);
    let socket = UdpSocket::bind(SocketAddrV4::new(ip, daemon.port))
        .await
        .expect("bind fake peer on 127.0.0.x");
    (socket, ip)
}

#[tokio::test]
async fn test_probe_is_answered_and_peer_recorded() {
    let daemon = spawn_daemon(loopback_as_lan()).await;
    let (peer, peer_ip) = fake_peer(&daemon, 2).await;

    let probe = Request::probe(peer_ip, Ipv4Addr::LOCALHOST).to_bytes();
    peer.send_to(&probe, daemon.addr()).await.unwrap();

    let mut buf = [0u8; 512];
    let (len, _) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .expect("probe should get a reply")
        .unwrap();
    let reply = Request::decode(&buf[..len]).unwrap();
    assert_eq!(reply.opcode, Opcode::ProbeReply);
    assert_eq!(reply.addresses().unwrap()[..2], [Ipv4Addr::LOCALHOST, peer_ip]);

    assert_eq!(daemon.client().servers().await.unwrap(), vec![peer_ip]);
}

#[tokio::test]
async fn test_probe_reply_is_not_answered() {
    let daemon = spawn_daemon(loopback_as_lan()).await;
    let (peer, peer_ip) = fake_peer(&daemon, 3).await;

    let reply = Request::probe_reply(peer_ip, Ipv4Addr::LOCALHOST, &[]).to_bytes();
    peer.send_to(&reply, daemon.addr()).await.unwrap();

    let mut buf = [0u8; 512];
    let got = timeout(Duration::from_millis(300), peer.recv_from(&mut buf)).await;
    assert!(got.is_err(), "a PREPLY must never be answered");
    assert_eq!(daemon.client().servers().await.unwrap(), vec![peer_ip]);
}

#[tokio::test]
async fn test_always_replying_peer_converges() {
    let daemon = spawn_daemon(loopback_as_lan()).await;
    let (peer, peer_ip) = fake_peer(&daemon, 4).await;

    peer.send_to(&Request::probe(peer_ip, Ipv4Addr::LOCALHOST).to_bytes(), daemon.addr())
        .await
        .unwrap();

    // Answer every PROBE with a PREPLY, whatever else arrives; count traffic.
    let mut received = 0;
    let mut buf = [0u8; 512];
    while let Ok(Ok((len, _))) = timeout(Duration::from_millis(500), peer.recv_from(&mut buf)).await {
        received += 1;
        assert!(received < 10, "daemon keeps talking: probe/reply loop");
        let req = Request::decode(&buf[..len]).unwrap();
        if req.opcode == Opcode::Probe {
            let answer = Request::probe_reply(peer_ip, Ipv4Addr::LOCALHOST, &[]).to_bytes();
            peer.send_to(&answer, daemon.addr()).await.unwrap();
        }
    }
    assert_eq!(received, 1, "exactly one PREPLY for our one PROBE");
}

#[tokio::test]
async fn test_probe_from_foreign_port_is_ignored() {
    let daemon = spawn_daemon(loopback_as_lan()).await;
    let socket = UdpSocket::bind("127.0.0.5:0").await.unwrap();

    let probe = Request::probe(Ipv4Addr::new(127, 0, 0, 5), Ipv4Addr::LOCALHOST).to_bytes();
    socket.send_to(&probe, daemon.addr()).await.unwrap();

    let mut buf = [0u8; 512];
    let got = timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(got.is_err());
    assert!(daemon.client().servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tcp_probe_reports_port() {
    let daemon = spawn_daemon(loopback_only()).await;
    let port = daemon.client().probe(Ipv4Addr::LOCALHOST).await.unwrap();
    assert_eq!(port, daemon.port as u32);
}
