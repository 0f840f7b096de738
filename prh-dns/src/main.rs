//! Proxy Replay Harness - Mock DNS Server
//!
//! Answers A queries over UDP from a static record table generated by
//! the runner. Unknown hostnames get NXDOMAIN, never a synthetic
//! address, so the resolver logic under test sees realistic failure
//! semantics.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use prh_common::dnswire::{DnsRecordTable, build_response, parse_query};
use prh_common::readiness::{PortFact, publish_port_file};
use prh_common::{LogConfig, init_logging};

#[derive(Parser)]
#[command(name = "prh-dns")]
#[command(author, version, about = "Mock DNS server answering from a static record table")]
struct Cli {
    /// Server name used in the port file and logs
    #[arg(long, default_value = "dns")]
    name: String,

    /// Path to the generated record table (JSON)
    #[arg(long)]
    records: PathBuf,

    /// Where to publish the bound port once listening
    #[arg(long)]
    port_file: PathBuf,

    /// Listen address; port 0 requests an ephemeral port
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    init_logging(&log_config)?;

    let bytes = std::fs::read(&cli.records)
        .with_context(|| format!("reading record table {}", cli.records.display()))?;
    let table: DnsRecordTable = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing record table {}", cli.records.display()))?;

    let socket = UdpSocket::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    let port = socket.local_addr()?.port();

    publish_port_file(&cli.port_file, &PortFact::udp(&cli.name, port))
        .with_context(|| format!("publishing port file {}", cli.port_file.display()))?;

    info!(name = %cli.name, port, "dns server listening");

    serve(socket, table).await
}

async fn serve(socket: UdpSocket, table: DnsRecordTable) -> Result<()> {
    let mut buffer = [0u8; 512];
    loop {
        let (len, peer) = socket.recv_from(&mut buffer).await?;
        let query = match parse_query(&buffer[..len]) {
            Ok(query) => query,
            Err(error) => {
                // Undecodable datagrams are dropped; a stub resolver
                // retries on its own schedule.
                warn!(%peer, %error, "dropping undecodable query");
                continue;
            }
        };

        let outcome = table.lookup(&query.name);
        debug!(%peer, name = %query.name, qtype = query.qtype, ?outcome, "query");

        let response = build_response(&query, &outcome);
        if let Err(error) = socket.send_to(&response, peer).await {
            warn!(%peer, %error, "failed to send response");
        }
    }
}
