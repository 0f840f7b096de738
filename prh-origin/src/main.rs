//! Proxy Replay Harness - Mock Origin Server
//!
//! Answers HTTP-shaped requests from a scripted first-match-wins table.
//! The table is generated by the runner ahead of time; requests nothing
//! matches get a deterministic synthetic failure response so the system
//! under test never stalls on the mock. Every exchange is appended to a
//! JSONL session log for post-run correlation.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use prh_common::httpwire::{read_body, read_request_head, write_response};
use prh_common::matching::{MatchOutcome, OriginScript};
use prh_common::readiness::{PortFact, publish_port_file};
use prh_common::session::{ExchangeRecord, SessionLog};
use prh_common::{LogConfig, init_logging};

#[derive(Parser)]
#[command(name = "prh-origin")]
#[command(author, version, about = "Scripted mock origin server")]
struct Cli {
    /// Server name used in the port file and logs
    #[arg(long, default_value = "origin")]
    name: String,

    /// Path to the generated exchange table (JSON)
    #[arg(long)]
    script: PathBuf,

    /// Where to publish the bound port once listening
    #[arg(long)]
    port_file: PathBuf,

    /// Where to append the session log (JSONL)
    #[arg(long)]
    session_log: PathBuf,

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

    let script = OriginScript::load_file(&cli.script)
        .with_context(|| format!("loading exchange table {}", cli.script.display()))?;
    let session_log = SessionLog::create(&cli.session_log)
        .with_context(|| format!("creating session log {}", cli.session_log.display()))?;

    let listener = TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    let port = listener.local_addr()?.port();

    // Ready only once the listener is bound; dependents read the port
    // from this file.
    publish_port_file(&cli.port_file, &PortFact::tcp(&cli.name, port))
        .with_context(|| format!("publishing port file {}", cli.port_file.display()))?;

    info!(name = %cli.name, port, entries = script.table.len(), "origin server listening");

    serve(listener, script, session_log).await
}

async fn serve(listener: TcpListener, script: OriginScript, session_log: SessionLog) -> Result<()> {
    let script = Arc::new(script);
    let session_log = Arc::new(session_log);
    let connection_counter = AtomicU64::new(0);

    loop {
        let (stream, peer) = listener.accept().await?;
        let connection = connection_counter.fetch_add(1, Ordering::SeqCst);
        debug!(connection, %peer, "accepted connection");

        let script = Arc::clone(&script);
        let session_log = Arc::clone(&session_log);
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, connection, script, session_log).await {
                warn!(connection, %error, "connection handler failed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    connection: u64,
    script: Arc<OriginScript>,
    session_log: Arc<SessionLog>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut sequence = 0u64;

    while let Some(head) = read_request_head(&mut reader).await? {
        // Body is drained so the next request head starts clean; the
        // match key never inspects it.
        let _ = read_body(&mut reader, head.content_length()).await?;

        let (response, matched) = match script.table.lookup(&head) {
            MatchOutcome::Match(entry) => (entry.response.clone(), true),
            MatchOutcome::NoMatch => {
                debug!(connection, method = %head.method, path = %head.path, "no scripted match");
                (script.no_match_response(), false)
            }
        };

        session_log.append(&ExchangeRecord {
            connection,
            sequence,
            timestamp: chrono::Utc::now(),
            method: head.method.clone(),
            path: head.path.clone(),
            host: head.header("host").map(str::to_string),
            uuid: head.correlation_id().map(str::to_string),
            response_status: response.status,
            matched,
        })?;
        sequence += 1;

        write_response(&mut write_half, &response).await?;

        let close = response
            .headers
            .iter()
            .any(|(n, v)| n.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"));
        if close {
            break;
        }
    }

    write_half.shutdown().await.ok();
    debug!(connection, exchanges = sequence, "connection closed");
    Ok(())
}
