use gdomap_core::wire::PortType;

use crate::*;

const TCP_GDO: PortType = PortType::TCP_NATIVE;

#[tokio::test]
async fn test_register_lookup_unregister_round_trip() {
    let daemon = spawn_daemon(loopback_only()).await;
    let client = daemon.client();

    assert_eq!(client.register(b"Control", 5003, TCP_GDO).await.unwrap(), 5003);
    assert_eq!(client.lookup(b"Control", TCP_GDO).await.unwrap(), 5003);
    assert_eq!(client.unregister(b"Control", 5003, TCP_GDO).await.unwrap(), 5003);
    assert_eq!(client.lookup(b"Control", TCP_GDO).await.unwrap(), 0);
}

#[tokio::test]
async fn test_registered_name_is_listed() {
    let daemon = spawn_daemon(loopback_only()).await;
    let client = daemon.client();

    for (name, port) in [("beta", 6001u32), ("alpha", 6002), ("gamma", 6003)] {
        assert_eq!(client.register(name.as_bytes(), port, TCP_GDO).await.unwrap(), port);
        assert_eq!(client.lookup(name.as_bytes(), TCP_GDO).await.unwrap(), port);
    }
    client.register(b"dns-ish", 6004, PortType::UDP_FOREIGN).await.unwrap();

    let names = client.names().await.unwrap();
    let listed: Vec<String> = names
        .iter()
        .map(|n| String::from_utf8_lossy(&n.name).into_owned())
        .collect();
    assert_eq!(listed, ["alpha", "beta", "dns-ish", "gamma"]);
    assert_eq!(names[2].port_type, PortType::UDP_FOREIGN);
}

#[tokio::test]
async fn test_lookup_with_wrong_type_misses() {
    let daemon = spawn_daemon(loopback_only()).await;
    let client = daemon.client();

    client.register(b"svc", 6100, TCP_GDO).await.unwrap();
    assert_eq!(client.lookup(b"svc", PortType::UDP_NATIVE).await.unwrap(), 0);
    assert_eq!(client.lookup(b"svc", TCP_GDO).await.unwrap(), 6100);
}

#[tokio::test]
async fn test_unregister_wrong_port_leaves_entry() {
    let daemon = spawn_daemon(loopback_only()).await;
    let client = daemon.client();

    client.register(b"svc", 6200, TCP_GDO).await.unwrap();
    assert_eq!(client.unregister(b"svc", 6201, TCP_GDO).await.unwrap(), 0);
    assert_eq!(client.lookup(b"svc", TCP_GDO).await.unwrap(), 6200);
    assert_eq!(client.unregister(b"svc", 6200, TCP_GDO).await.unwrap(), 6200);
    assert_eq!(client.lookup(b"svc", TCP_GDO).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unregister_all_names_at_port() {
    let daemon = spawn_daemon(loopback_only()).await;
    let client = daemon.client();

    client.register(b"one", 6300, TCP_GDO).await.unwrap();
    client.register(b"two", 6300, TCP_GDO).await.unwrap();
    client.register(b"keep", 6301, TCP_GDO).await.unwrap();

    assert_eq!(client.unregister(b"", 6300, TCP_GDO).await.unwrap(), 6300);
    let names = client.names().await.unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].name, b"keep");
}

#[tokio::test]
async fn test_register_from_non_local_source_is_rejected() {
    // The daemon believes it lives on 10.9.9.9 only, so 127.0.0.1 is foreign.
    let daemon = spawn_daemon(InterfaceTable::new(vec![Interface::new(
        Ipv4Addr::new(10, 9, 9, 9),
        Ipv4Addr::new(255, 255, 255, 0),
        None,
    )]))
    .await;
    let client = daemon.client();

    let err = client.register(b"intruder", 6400, TCP_GDO).await.unwrap_err();
    assert!(
        matches!(err, gdomap_services::ClientError::Closed),
        "expected the channel to be closed, got {err:?}"
    );
    assert_eq!(client.lookup(b"intruder", TCP_GDO).await.unwrap(), 0);
    assert!(client.names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lookup_anywhere_finds_local_name() {
    let daemon = spawn_daemon(loopback_only()).await;
    let client = daemon.client();

    client.register(b"wide", 6500, TCP_GDO).await.unwrap();
    let found = client.lookup_anywhere(b"wide", TCP_GDO).await.unwrap();
    assert_eq!(found, Some((Ipv4Addr::LOCALHOST, 6500)));
    assert_eq!(client.lookup_anywhere(b"nowhere", TCP_GDO).await.unwrap(), None);
}

#[tokio::test]
async fn test_lookup_anywhere_asks_known_peers() {
    let home = spawn_daemon(loopback_as_lan()).await;

    // A second daemon on 127.0.0.2, same well-known port, configured to
    // sweep 127.0.0.1 so the two find each other.
    let remote_ip = Ipv4Addr::new(127, 0, 0, 2);
    let mut config = test_config();
    config.probe.enabled = true;
    config.probe.peers = vec![Ipv4Addr::LOCALHOST];
    let remote = spawn_daemon_with(
        SocketAddrV4::new(remote_ip, home.port),
        InterfaceTable::new(vec![
            Interface {
                name: "lo-lan2".to_string(),
                addr: remote_ip,
                netmask: Ipv4Addr::new(255, 0, 0, 0),
                broadcast: None,
                loopback: false,
            },
            Interface::new(Ipv4Addr::LOCALHOST, Ipv4Addr::new(255, 0, 0, 0), None),
        ]),
        config,
        Box::new(RegistrantsAlive),
    )
    .await;
    assert_eq!(remote.port, home.port);

    let client = home.client();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !client.servers().await.unwrap().contains(&remote_ip) {
        assert!(tokio::time::Instant::now() < deadline, "peer was never recorded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(remote.client().register(b"Elsewhere", 6600, TCP_GDO).await.unwrap(), 6600);
    assert_eq!(client.lookup(b"Elsewhere", TCP_GDO).await.unwrap(), 0);
    assert_eq!(
        client.lookup_anywhere(b"Elsewhere", TCP_GDO).await.unwrap(),
        Some((remote_ip, 6600))
    );
}
