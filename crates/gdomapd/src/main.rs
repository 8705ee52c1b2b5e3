//! gdomapd: gdomap name server daemon.

use std::net::SocketAddrV4;
use std::sync::Arc;

use anyhow::{Context, Result};

use gdomap_core::config::GdomapConfig;
use gdomap_services::{well_known_port, BindProbe, InterfaceTable};
use gdomapd::Server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    let config_path = GdomapConfig::file_path();
    if let Err(e) = GdomapConfig::write_default_if_missing(&config_path) {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GdomapConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GdomapConfig::default()
    });

    let interfaces = if config.interfaces.is_empty() {
        InterfaceTable::from_os().context("failed to enumerate network interfaces")?
    } else {
        tracing::info!(count = config.interfaces.len(), "using configured interface table");
        InterfaceTable::from_config(&config.interfaces)
    };
    for iface in interfaces.iter() {
        tracing::info!(
            name = %iface.name,
            addr = %iface.addr,
            netmask = %iface.netmask,
            broadcast = ?iface.broadcast,
            "interface"
        );
    }

    let port = well_known_port(config.network.port);
    tracing::info!(port, probing = config.probe.enabled, "gdomapd starting");

    let server = Server::bind(
        SocketAddrV4::new(config.network.bind_addr, port),
        Arc::new(interfaces),
        &config,
        Box::new(BindProbe),
    )
    .await
    .context("failed to create well-known sockets")?;

    server
        .run(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
        })
        .await
}
