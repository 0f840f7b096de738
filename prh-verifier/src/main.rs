//! Proxy Replay Harness - Replay Verifier Server
//!
//! Plays a replay description transaction by transaction and, unlike the
//! plain origin mock, validates the shape of each incoming request:
//! method/url, header directives, correlation identifier. Violations are
//! recorded to a queryable report file without stopping the server, so a
//! misbehaving proxy still gets bounded responses while the run is
//! guaranteed to fail at verification time.
//!
//! Transactions are consulted in declaration order per connection, not
//! globally: every new connection starts at the first transaction.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use prh_common::httpwire::{read_body, read_request_head, write_response};
use prh_common::matching::ScriptedResponse;
use prh_common::readiness::{PortFact, publish_port_file};
use prh_common::replay::{ReplayContext, ReplayDescription};
use prh_common::session::{ExchangeRecord, SessionLog};
use prh_common::verify::{VerifierReport, Violation, ViolationKind, validate_request};
use prh_common::{LogConfig, init_logging};

#[derive(Parser)]
#[command(name = "prh-verifier")]
#[command(author, version, about = "Replay verifier server with request-shape validation")]
struct Cli {
    /// Server name used in the port file and logs
    #[arg(long, default_value = "verifier")]
    name: String,

    /// Path to the replay description (YAML)
    #[arg(long)]
    replay: PathBuf,

    /// Context variables, repeatable: --context name=value
    #[arg(long = "context", value_name = "NAME=VALUE")]
    context: Vec<String>,

    /// Where to publish the bound port once listening
    #[arg(long)]
    port_file: PathBuf,

    /// Where to write the violations report (JSON)
    #[arg(long)]
    report: PathBuf,

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

fn parse_context(pairs: &[String]) -> Result<ReplayContext> {
    let mut context = ReplayContext::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("context entry {pair:?} is not NAME=VALUE");
        };
        context.set(name, value);
    }
    Ok(context)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    init_logging(&log_config)?;

    // Load (and substitute) before binding anything: an unresolved
    // placeholder must never leave a half-started server behind.
    let context = parse_context(&cli.context)?;
    let replay = ReplayDescription::load_file(&cli.replay, &context)
        .with_context(|| format!("loading replay description {}", cli.replay.display()))?;

    let session_log = SessionLog::create(&cli.session_log)
        .with_context(|| format!("creating session log {}", cli.session_log.display()))?;

    // An empty report is written up front so the runner can always read
    // one, even if no request ever arrives.
    let report = VerifierReport::default();
    report
        .write_to(&cli.report)
        .with_context(|| format!("writing report {}", cli.report.display()))?;

    let listener = TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    let port = listener.local_addr()?.port();

    publish_port_file(&cli.port_file, &PortFact::tcp(&cli.name, port))
        .with_context(|| format!("publishing port file {}", cli.port_file.display()))?;

    info!(
        name = %cli.name,
        port,
        transactions = replay.transactions.len(),
        "verifier listening"
    );

    serve(listener, replay, session_log, report, cli.report).await
}

struct ServerState {
    replay: ReplayDescription,
    session_log: SessionLog,
    report: Mutex<VerifierReport>,
    report_path: PathBuf,
}

impl ServerState {
    /// Record violations and the served transaction, then persist the
    /// report so it is inspectable the moment the client completes.
    fn record(&self, violations: Vec<Violation>, served: bool) {
        let mut report = self.report.lock().expect("report lock poisoned");
        if served {
            report.transactions_served += 1;
        }
        report.violations.extend(violations);
        if let Err(error) = report.write_to(&self.report_path) {
            warn!(%error, "failed to persist verifier report");
        }
    }
}

async fn serve(
    listener: TcpListener,
    replay: ReplayDescription,
    session_log: SessionLog,
    report: VerifierReport,
    report_path: PathBuf,
) -> Result<()> {
    let state = Arc::new(ServerState {
        replay,
        session_log,
        report: Mutex::new(report),
        report_path,
    });
    let connection_counter = AtomicU64::new(0);

    loop {
        let (stream, peer) = listener.accept().await?;
        let connection = connection_counter.fetch_add(1, Ordering::SeqCst);
        debug!(connection, %peer, "accepted connection");

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, connection, state).await {
                warn!(connection, %error, "connection handler failed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    connection: u64,
    state: Arc<ServerState>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut cursor = 0usize;
    let mut sequence = 0u64;

    while let Some(head) = read_request_head(&mut reader).await? {
        let _ = read_body(&mut reader, head.content_length()).await?;

        let (response, matched) = match state.replay.transactions.get(cursor) {
            Some(transaction) => {
                let violations =
                    validate_request(connection, cursor, &transaction.request, &head);
                if !violations.is_empty() {
                    debug!(connection, cursor, count = violations.len(), "violations");
                }
                state.record(violations, true);
                (transaction.response.clone(), true)
            }
            None => {
                state.record(
                    vec![Violation {
                        connection,
                        transaction: None,
                        kind: ViolationKind::UnexpectedRequest,
                        detail: format!(
                            "request {} {} beyond the {} scripted transactions",
                            head.method,
                            head.path,
                            state.replay.transactions.len()
                        ),
                    }],
                    false,
                );
                (ScriptedResponse::no_match_default(), false)
            }
        };
        cursor += 1;

        state.session_log.append(&ExchangeRecord {
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
