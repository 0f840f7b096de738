//! Port-file readiness protocol.
//!
//! Ports are late-bound facts: a mock binds `127.0.0.1:0`, learns its
//! port, and only then can dependents be configured. The mock publishes
//! a small JSON port file once its listener is bound; the orchestrator
//! treats the file's appearance as the readiness signal and reads the
//! port out of it. Publication is write-then-rename so a waiter never
//! observes a partial file.

use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, HarnessResult};

/// The runtime facts a mock publishes when it is ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortFact {
    pub name: String,
    pub port: u16,
    /// "tcp" or "udp".
    pub protocol: String,
    pub pid: u32,
}

impl PortFact {
    pub fn tcp(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            protocol: "tcp".to_string(),
            pid: std::process::id(),
        }
    }

    pub fn udp(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            protocol: "udp".to_string(),
            pid: std::process::id(),
        }
    }
}

/// Publish the port file atomically.
pub fn publish_port_file(path: &Path, fact: &PortFact) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(fact)?)?;
    std::fs::rename(&tmp, path)
}

/// Wait for a port file to appear and parse, with exponential backoff.
///
/// The backoff starts at 10ms and doubles to a 250ms ceiling, the same
/// shape used for socket waits, so fast-starting mocks are detected
/// quickly without spinning.
pub fn await_port_file(path: &Path, name: &str, timeout: Duration) -> HarnessResult<PortFact> {
    let start = Instant::now();
    let mut delay = Duration::from_millis(10);
    let ceiling = Duration::from_millis(250);

    loop {
        if path.exists()
            && let Ok(bytes) = std::fs::read(path)
            && let Ok(fact) = serde_json::from_slice::<PortFact>(&bytes)
        {
            tracing::debug!(name, port = fact.port, "port file ready");
            return Ok(fact);
        }
        if start.elapsed() >= timeout {
            return Err(HarnessError::ReadinessTimeout {
                name: name.to_string(),
                timeout,
            });
        }
        std::thread::sleep(delay);
        delay = (delay * 2).min(ceiling);
    }
}

/// Wait until a TCP endpoint accepts connections. A bound-but-dead
/// listener from a previous run cannot satisfy this; the probe actually
/// connects.
pub fn await_tcp(addr: &str, name: &str, timeout: Duration) -> HarnessResult<()> {
    let start = Instant::now();
    let mut delay = Duration::from_millis(10);
    let ceiling = Duration::from_millis(250);

    loop {
        if TcpStream::connect(addr).is_ok() {
            tracing::debug!(name, addr, "tcp endpoint ready");
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(HarnessError::ReadinessTimeout {
                name: name.to_string(),
                timeout,
            });
        }
        std::thread::sleep(delay);
        delay = (delay * 2).min(ceiling);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_then_await_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("origin.port");
        publish_port_file(&path, &PortFact::tcp("origin", 8123)).unwrap();

        let fact = await_port_file(&path, "origin", Duration::from_secs(1)).unwrap();
        assert_eq!(fact.port, 8123);
        assert_eq!(fact.protocol, "tcp");
    }

    #[test]
    fn test_await_times_out_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.port");
        let err = await_port_file(&path, "never", Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { .. }));
    }

    #[test]
    fn test_await_sees_late_publication() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.port");
        let publish_path = path.clone();

        let publisher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            publish_port_file(&publish_path, &PortFact::udp("dns", 5353)).unwrap();
        });

        let fact = await_port_file(&path, "dns", Duration::from_secs(2)).unwrap();
        assert_eq!(fact.port, 5353);
        publisher.join().unwrap();
    }

    #[test]
    fn test_await_tcp_connects_to_live_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        await_tcp(&addr, "listener", Duration::from_secs(1)).unwrap();
    }
}
