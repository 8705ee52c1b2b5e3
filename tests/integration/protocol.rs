use std::time::Duration;

use gdomap_core::wire::{PortType, Request, FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::*;

/// Write `bytes`, then collect whatever the daemon sends before closing.
async fn raw_exchange(daemon: &DaemonGuard, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(daemon.addr()).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    let mut reply = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .expect("daemon must close the connection")
        .ok();
    reply
}

#[tokio::test]
async fn test_unknown_opcode_closes_connection() {
    let daemon = spawn_daemon(loopback_only()).await;
    let mut frame = Request::names().to_bytes();
    frame[0] = b'Z';
    assert!(raw_exchange(&daemon, &frame).await.is_empty());
}

#[tokio::test]
async fn test_bad_port_type_closes_connection() {
    let daemon = spawn_daemon(loopback_only()).await;
    let mut frame = Request::lookup(b"svc", PortType::TCP_NATIVE).unwrap().to_bytes();
    frame[2] = 0x7f;
    assert!(raw_exchange(&daemon, &frame).await.is_empty());
}

#[tokio::test]
async fn test_short_frame_times_out_and_closes() {
    let daemon = spawn_daemon(loopback_only()).await;
    let frame = Request::names().to_bytes();
    // Half a frame, then silence: the daemon gives up after its request timeout.
    assert!(raw_exchange(&daemon, &frame[..FRAME_SIZE / 2]).await.is_empty());

    // And keeps serving everyone else.
    assert!(daemon.client().names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_frame_split_across_writes_is_reassembled() {
    let daemon = spawn_daemon(loopback_only()).await;
    daemon.client().register(b"split", 7100, PortType::TCP_NATIVE).await.unwrap();

    let frame = Request::lookup(b"split", PortType::TCP_NATIVE).unwrap().to_bytes();
    let mut stream = TcpStream::connect(daemon.addr()).await.unwrap();
    for chunk in frame.chunks(50) {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(u32::from_be_bytes(reply), 7100);
}

#[tokio::test]
async fn test_udp_lookup_is_answered() {
    let daemon = spawn_daemon(loopback_only()).await;
    daemon.client().register(b"dgram", 7200, PortType::TCP_NATIVE).await.unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = Request::lookup(b"dgram", PortType::TCP_NATIVE).unwrap().to_bytes();
    socket.send_to(&frame, daemon.addr()).await.unwrap();

    let mut buf = [0u8; 16];
    let (len, from) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("udp lookup should be answered")
        .unwrap();
    assert_eq!(from, daemon.addr());
    assert_eq!(&buf[..len], &7200u32.to_be_bytes());
}

#[tokio::test]
async fn test_malformed_datagram_is_dropped() {
    let daemon = spawn_daemon(loopback_only()).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    socket.send_to(b"not a frame", daemon.addr()).await.unwrap();
    let mut buf = [0u8; 16];
    let got = timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(got.is_err(), "malformed datagram must not be answered");

    // The daemon survived.
    assert!(daemon.client().names().await.unwrap().is_empty());
}
