//! Mock declarations and their materialization into processes.
//!
//! A test declares mocks in terms of scripted content (exchange tables,
//! DNS records, replay descriptions). Before the corresponding server
//! process is spawned, the declaration is materialized: generated input
//! files are written under the run directory and a [`ProcessSpec`] is
//! built that points the mock binary at them, with the port file as its
//! readiness probe.
//!
//! Ports are late-bound, so materialization is two-phased: origin and
//! DNS mocks first (they produce port facts), verifiers second (their
//! replay contexts consume those facts and are fully resolved and
//! validated before the verifier process exists).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use prh_common::dnswire::DnsRecordTable;
use prh_common::matching::{HttpMatchKey, OriginScript, ScriptedResponse};
use prh_common::replay::{ReplayContext, ReplayDescription, substitute};
use prh_common::{HarnessError, HarnessResult};

use crate::config::RunnerConfig;
use crate::process::{ProcessSpec, ReadinessProbe};

/// Which protocol engine a mock runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockKind {
    Origin,
    Dns,
    Verifier,
}

/// Per-mock generated file locations under the run directory.
#[derive(Debug, Clone)]
pub struct MockPaths {
    pub dir: PathBuf,
    pub input: PathBuf,
    pub port_file: PathBuf,
    pub session_log: PathBuf,
    pub report: PathBuf,
}

impl MockPaths {
    pub fn for_mock(run_dir: &Path, name: &str, kind: MockKind) -> Self {
        let dir = run_dir.join(name);
        let input = match kind {
            MockKind::Origin => dir.join("exchanges.json"),
            MockKind::Dns => dir.join("records.json"),
            MockKind::Verifier => dir.join("replay.yaml"),
        };
        Self {
            input,
            port_file: dir.join("port.json"),
            session_log: dir.join("session.log"),
            report: dir.join("report.json"),
            dir,
        }
    }
}

/// A scripted mock origin server.
#[derive(Debug, Clone)]
pub struct OriginMock {
    pub name: String,
    pub script: OriginScript,
}

impl OriginMock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: OriginScript::new(),
        }
    }

    /// Script one exchange; the table is first-match-wins in the order
    /// exchanges are added.
    pub fn add_exchange(mut self, key: HttpMatchKey, response: ScriptedResponse) -> Self {
        self.script.add_exchange(key, response);
        self
    }

    /// Override the synthetic response played when nothing matches.
    pub fn on_no_match(mut self, response: ScriptedResponse) -> Self {
        self.script.no_match = Some(response);
        self
    }

    pub fn materialize(
        &self,
        run_dir: &Path,
        config: &RunnerConfig,
    ) -> HarnessResult<(ProcessSpec, MockPaths)> {
        let paths = MockPaths::for_mock(run_dir, &self.name, MockKind::Origin);
        self.script.write_to(&paths.input)?;

        let spec = ProcessSpec::new(&self.name, &config.origin_binary)
            .args([
                "--name".to_string(),
                self.name.clone(),
                "--script".to_string(),
                paths.input.display().to_string(),
                "--port-file".to_string(),
                paths.port_file.display().to_string(),
                "--session-log".to_string(),
                paths.session_log.display().to_string(),
            ])
            .readiness(ReadinessProbe::PortFile(paths.port_file.clone()));
        Ok((spec, paths))
    }
}

/// A scripted mock DNS server.
#[derive(Debug, Clone)]
pub struct DnsMock {
    pub name: String,
    pub records: DnsRecordTable,
}

impl DnsMock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: DnsRecordTable::new(),
        }
    }

    pub fn add_record(mut self, hostname: impl Into<String>, addresses: &[Ipv4Addr]) -> Self {
        self.records.add_record(hostname, addresses);
        self
    }

    pub fn materialize(
        &self,
        run_dir: &Path,
        config: &RunnerConfig,
    ) -> HarnessResult<(ProcessSpec, MockPaths)> {
        let paths = MockPaths::for_mock(run_dir, &self.name, MockKind::Dns);
        std::fs::create_dir_all(&paths.dir)?;
        let rendered = serde_json::to_vec_pretty(&self.records).map_err(std::io::Error::from)?;
        std::fs::write(&paths.input, rendered)?;

        let spec = ProcessSpec::new(&self.name, &config.dns_binary)
            .args([
                "--name".to_string(),
                self.name.clone(),
                "--records".to_string(),
                paths.input.display().to_string(),
                "--port-file".to_string(),
                paths.port_file.display().to_string(),
            ])
            .readiness(ReadinessProbe::PortFile(paths.port_file.clone()));
        Ok((spec, paths))
    }
}

/// Where a verifier context variable gets its value.
#[derive(Debug, Clone)]
pub enum ContextSource {
    Literal(String),
    /// The port another mock bound, available once that mock started.
    PortOf(String),
}

/// A replay verifier server declaration.
#[derive(Debug, Clone)]
pub struct VerifierMock {
    pub name: String,
    pub replay_yaml: String,
    pub context: Vec<(String, ContextSource)>,
}

impl VerifierMock {
    pub fn new(name: impl Into<String>, replay_yaml: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replay_yaml: replay_yaml.into(),
            context: Vec::new(),
        }
    }

    /// Bind a placeholder to another mock's late-bound port.
    pub fn with_context_port(mut self, placeholder: impl Into<String>, mock: impl Into<String>) -> Self {
        self.context
            .push((placeholder.into(), ContextSource::PortOf(mock.into())));
        self
    }

    pub fn with_context_value(
        mut self,
        placeholder: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        self.context
            .push((placeholder.into(), ContextSource::Literal(value.to_string())));
        self
    }

    /// Names of mocks whose ports this verifier consumes; they must be
    /// running before the verifier is loaded.
    pub fn port_prerequisites(&self) -> Vec<&str> {
        self.context
            .iter()
            .filter_map(|(_, source)| match source {
                ContextSource::PortOf(name) => Some(name.as_str()),
                ContextSource::Literal(_) => None,
            })
            .collect()
    }

    /// Resolve the context, render the replay, and validate it fully.
    /// An unresolved placeholder fails here, before any verifier
    /// process exists, so no partial startup can occur.
    pub fn materialize(
        &self,
        run_dir: &Path,
        config: &RunnerConfig,
        ports: &HashMap<String, u16>,
    ) -> HarnessResult<(ProcessSpec, MockPaths)> {
        let mut context = ReplayContext::new();
        for (placeholder, source) in &self.context {
            match source {
                ContextSource::Literal(value) => {
                    context.set(placeholder, value);
                }
                ContextSource::PortOf(mock) => {
                    let port = ports.get(mock).ok_or_else(|| {
                        HarnessError::UnknownPrerequisite {
                            process: self.name.clone(),
                            prerequisite: mock.clone(),
                        }
                    })?;
                    context.set(placeholder, port);
                }
            }
        }

        let rendered = substitute(&self.replay_yaml, &context)?;
        // Full parse of the rendered document; a description that would
        // fail the verifier's own load fails the run here instead.
        ReplayDescription::load(&rendered, &ReplayContext::new())?;

        let paths = MockPaths::for_mock(run_dir, &self.name, MockKind::Verifier);
        std::fs::create_dir_all(&paths.dir)?;
        std::fs::write(&paths.input, rendered)?;

        let spec = ProcessSpec::new(&self.name, &config.verifier_binary)
            .args([
                "--name".to_string(),
                self.name.clone(),
                "--replay".to_string(),
                paths.input.display().to_string(),
                "--port-file".to_string(),
                paths.port_file.display().to_string(),
                "--report".to_string(),
                paths.report.display().to_string(),
                "--session-log".to_string(),
                paths.session_log.display().to_string(),
            ])
            .readiness(ReadinessProbe::PortFile(paths.port_file.clone()));
        Ok((spec, paths))
    }
}

/// Runtime facts about a started mock.
#[derive(Debug, Clone)]
pub struct MockRuntime {
    pub name: String,
    pub kind: MockKind,
    pub port: u16,
    pub paths: MockPaths,
}

/// Reserve a local TCP port by binding and immediately releasing it.
/// Used to pre-assign a port the proxy under test should listen on.
pub fn reserve_local_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
