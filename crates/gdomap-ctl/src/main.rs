//! gdomap-ctl: command-line client for the gdomap daemon.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use gdomap_core::config::GdomapConfig;
use gdomap_core::wire::PortType;
use gdomap_services::{well_known_port, Client, Deadlines};

// ── Output types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct NameInfo {
    name: String,
    port_type: String,
}

#[derive(Serialize)]
struct LookupInfo {
    name: String,
    host: String,
    port: u32,
}

// ── Options ───────────────────────────────────────────────────────────────────

struct Options {
    host: String,
    port: u16,
    port_type: PortType,
    json: bool,
}

impl Options {
    fn client(&self) -> Result<Client> {
        let ip: Ipv4Addr = self
            .host
            .parse()
            .with_context(|| format!("--host must be an IPv4 address, got '{}'", self.host))?;
        let deadlines = Deadlines::from(&GdomapConfig::load().unwrap_or_default().timeouts);
        Ok(Client::new(SocketAddrV4::new(ip, self.port).into()).with_deadlines(deadlines))
    }
}

fn parse_port(s: &str) -> Result<u32> {
    let port: u32 = s.parse().with_context(|| format!("'{s}' is not a port number"))?;
    if port == 0 || port > u16::MAX as u32 {
        bail!("port {port} out of range");
    }
    Ok(port)
}

fn local_ipv4(client: &Client) -> Ipv4Addr {
    // The address a connection to the daemon would leave from.
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.connect(client.addr()).map(|_| s))
        .and_then(|s| s.local_addr())
        .ok()
        .and_then(|a| match a.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_register(opts: &Options, name: &str, port: &str) -> Result<()> {
    let port = parse_port(port)?;
    let got = opts.client()?.register(name.as_bytes(), port, opts.port_type).await?;
    if got == 0 {
        bail!("registration of '{name}' at {port} refused (name held by a live process?)");
    }
    println!("Registered '{}' at port {} ({})", name, got, opts.port_type);
    Ok(())
}

async fn cmd_unregister(opts: &Options, name: &str, port: &str) -> Result<()> {
    let port = parse_port(port)?;
    let got = opts.client()?.unregister(name.as_bytes(), port, opts.port_type).await?;
    if got == 0 {
        bail!("nothing registered at port {port} under that name and type");
    }
    if name.is_empty() {
        println!("Unregistered every name at port {}", got);
    } else {
        println!("Unregistered '{}' from port {}", name, got);
    }
    Ok(())
}

async fn cmd_lookup(opts: &Options, name: &str) -> Result<()> {
    let client = if opts.host == "*" {
        Options { host: "127.0.0.1".to_string(), ..*opts }.client()?
    } else {
        opts.client()?
    };

    let found = if opts.host == "*" {
        client.lookup_anywhere(name.as_bytes(), opts.port_type).await?
    } else {
        let port = client.lookup(name.as_bytes(), opts.port_type).await?;
        let host = match client.addr() {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        (port != 0).then_some((host, port))
    };

    let Some((host, port)) = found else {
        bail!("'{name}' is not registered ({})", opts.port_type);
    };

    if opts.json {
        let info = LookupInfo { name: name.to_string(), host: host.to_string(), port };
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("'{}' is at {}:{}", name, host, port);
    }
    Ok(())
}

async fn cmd_names(opts: &Options) -> Result<()> {
    let names = opts.client()?.names().await?;

    if opts.json {
        let infos: Vec<NameInfo> = names
            .iter()
            .map(|n| NameInfo {
                name: String::from_utf8_lossy(&n.name).into_owned(),
                port_type: n.port_type.to_string(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if names.is_empty() {
        println!("No names registered.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Registered Names ({})", names.len());
    println!("═══════════════════════════════════════");
    for n in &names {
        println!("  {:<32} {}", String::from_utf8_lossy(&n.name), n.port_type);
    }
    Ok(())
}

async fn cmd_servers(opts: &Options) -> Result<()> {
    let servers = opts.client()?.servers().await?;

    if opts.json {
        let addrs: Vec<String> = servers.iter().map(|a| a.to_string()).collect();
        println!("{}", serde_json::to_string_pretty(&addrs)?);
        return Ok(());
    }

    if servers.is_empty() {
        println!("No peers discovered yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Known gdomap Servers ({})", servers.len());
    println!("═══════════════════════════════════════");
    for addr in &servers {
        println!("  {}", addr);
    }
    Ok(())
}

async fn cmd_probe(opts: &Options) -> Result<()> {
    let client = opts.client()?;
    let from = local_ipv4(&client);
    let port = client.probe(from).await?;
    println!("gdomap at {} is alive (serving port {})", client.addr(), port);
    Ok(())
}

fn print_usage() {
    println!("Usage: gdomap-ctl [options] <command>");
    println!();
    println!("Commands:");
    println!("  register <name> <port>     Register a name (local daemon only)");
    println!("  unregister <name> <port>   Withdraw a name");
    println!("  unregister-all <port>      Withdraw every name at a port");
    println!("  lookup <name>              Look a name up (--host '*' searches all peers)");
    println!("  names                      List registered names");
    println!("  servers                    List known gdomap peers");
    println!("  probe                      Check that a daemon answers");
    println!();
    println!("Options:");
    println!("  --host <addr>   Daemon address (default: 127.0.0.1)");
    println!("  --port <port>   Daemon port (default: service database, then 538)");
    println!("  --type <type>   tcp_gdo, udp_gdo, tcp_foreign, udp_foreign (default: tcp_gdo)");
    println!("  --json          Machine-readable output");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut opts = Options {
        host: "127.0.0.1".to_string(),
        port: 0,
        port_type: PortType::TCP_NATIVE,
        json: false,
    };
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                opts.host = args.get(i).context("--host requires a value")?.clone();
            }
            "--port" => {
                i += 1;
                opts.port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--type" => {
                i += 1;
                opts.port_type = args
                    .get(i)
                    .context("--type requires a value")?
                    .parse()
                    .context("unknown --type")?;
            }
            "--json" => opts.json = true,
            other => remaining.push(other),
        }
        i += 1;
    }
    opts.port = well_known_port(opts.port);

    match remaining.as_slice() {
        ["register", name, port]          => cmd_register(&opts, name, port).await,
        ["unregister", name, port]        => cmd_unregister(&opts, name, port).await,
        ["unregister-all", port]          => cmd_unregister(&opts, "", port).await,
        ["lookup", name]                  => cmd_lookup(&opts, name).await,
        ["names"] | []                    => cmd_names(&opts).await,
        ["servers"]                       => cmd_servers(&opts).await,
        ["probe"]                         => cmd_probe(&opts).await,
        ["help"] | ["--help"] | ["-h"]    => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
