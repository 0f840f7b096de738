//! The top-level test-run driver.
//!
//! A [`TestRun`] wires generated configuration into the proxy under
//! test, starts mocks and the proxy through the orchestrator in
//! dependency order, executes the client command, and judges the
//! captured streams, exit code, liveness assertions, and verifier
//! reports.
//!
//! State machine: `Configuring → Starting → Executing → Verifying →
//! TearingDown`, ending in exactly one of `Passed`, `Failed` (assertion
//! mismatches, with explanations), or `Error` (harness faults). Teardown
//! runs no matter which earlier state failed.

use std::collections::HashMap;
use std::path::PathBuf;

use prh_common::gold::{self, GoldExpectation, StreamSelector, Verdict};
use prh_common::readiness::await_port_file;
use prh_common::replay::{ReplayContext, substitute};
use prh_common::session::{ExchangeRecord, SessionLog};
use prh_common::verify::VerifierReport;
use prh_common::{ConfigRecords, HarnessError, HarnessResult, RemapConfig};

use crate::config::RunnerConfig;
use crate::exec::{CommandResult, run_command};
use crate::mocks::{DnsMock, MockKind, MockRuntime, OriginMock, VerifierMock};
use crate::orchestrator::ProcessOrchestrator;
use crate::process::{ProcessSpec, ReadinessProbe};

/// States a run passes through, recorded for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configuring,
    Starting,
    Executing,
    Verifying,
    TearingDown,
}

/// Final outcome of a run. Exactly one of these is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunVerdict {
    Passed,
    /// Assertion mismatches after the system under test actually ran.
    Failed(Vec<String>),
    /// Harness-level fault: timeout, unresolved placeholder, launch
    /// failure, dependency problem.
    Error(String),
}

/// The proxy under test: an external command plus its generated
/// configuration. Records and remap values, the argument list, and the
/// readiness endpoint all support `{name}` placeholders resolved from
/// the run context (mock ports and user-declared values).
#[derive(Debug, Clone)]
pub struct ProxyUnderTest {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub records: ConfigRecords,
    pub remap: RemapConfig,
    pub readiness: ReadinessProbe,
}

impl ProxyUnderTest {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            records: ConfigRecords::new(),
            remap: RemapConfig::new(),
            readiness: ReadinessProbe::None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn records(mut self, records: ConfigRecords) -> Self {
        self.records = records;
        self
    }

    pub fn remap(mut self, remap: RemapConfig) -> Self {
        self.remap = remap;
        self
    }

    pub fn readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = probe;
        self
    }
}

/// Builder and driver for one test run.
pub struct TestRun {
    name: String,
    config: RunnerConfig,
    origins: Vec<OriginMock>,
    dns: Vec<DnsMock>,
    verifiers: Vec<VerifierMock>,
    proxy: Option<ProxyUnderTest>,
    context_values: Vec<(String, String)>,
    client_program: Option<String>,
    client_args: Vec<String>,
    client_env: HashMap<String, String>,
    expected_exit_code: i32,
    golds: Vec<(StreamSelector, GoldExpectation)>,
    liveness: Vec<String>,
}

/// Everything a finished run exposes for inspection.
#[derive(Debug)]
pub struct RunReport {
    pub verdict: RunVerdict,
    pub client: Option<CommandResult>,
    pub run_dir: PathBuf,
    pub states: Vec<RunState>,
    mocks: Vec<MockRuntime>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict == RunVerdict::Passed
    }

    pub fn mock_port(&self, name: &str) -> Option<u16> {
        self.mocks.iter().find(|m| m.name == name).map(|m| m.port)
    }

    /// A mock's recorded exchanges, arrival-ordered.
    pub fn session_log(&self, name: &str) -> std::io::Result<Vec<ExchangeRecord>> {
        let mock = self
            .mocks
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, name.to_string()))?;
        if !mock.paths.session_log.exists() {
            return Ok(Vec::new());
        }
        SessionLog::read_file(&mock.paths.session_log)
    }

    /// A verifier's violations report.
    pub fn verifier_report(&self, name: &str) -> std::io::Result<VerifierReport> {
        let mock = self
            .mocks
            .iter()
            .find(|m| m.name == name && m.kind == MockKind::Verifier)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, name.to_string()))?;
        VerifierReport::read_file(&mock.paths.report)
    }
}

impl TestRun {
    pub fn new(name: impl Into<String>, config: RunnerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            origins: Vec::new(),
            dns: Vec::new(),
            verifiers: Vec::new(),
            proxy: None,
            context_values: Vec::new(),
            client_program: None,
            client_args: Vec::new(),
            client_env: HashMap::new(),
            expected_exit_code: 0,
            golds: Vec::new(),
            liveness: Vec::new(),
        }
    }

    pub fn origin_server(mut self, mock: OriginMock) -> Self {
        self.origins.push(mock);
        self
    }

    pub fn dns_server(mut self, mock: DnsMock) -> Self {
        self.dns.push(mock);
        self
    }

    pub fn verifier_server(mut self, mock: VerifierMock) -> Self {
        self.verifiers.push(mock);
        self
    }

    pub fn proxy(mut self, proxy: ProxyUnderTest) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a literal to the run context, usable as `{name}` in configs,
    /// replay descriptions, and the client command line.
    pub fn context_value(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.context_values.push((name.into(), value.to_string()));
        self
    }

    /// The client command whose exit code and streams are the primary
    /// observable. Arguments support `{name}` placeholders.
    pub fn client_command<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_program = Some(program.into());
        self.client_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn client_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client_env.insert(key.into(), value.into());
        self
    }

    pub fn expect_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = code;
        self
    }

    pub fn gold(mut self, stream: StreamSelector, expectation: GoldExpectation) -> Self {
        self.golds.push((stream, expectation));
        self
    }

    /// Liveness assertion: the named process must still be running
    /// after the client command completes.
    pub fn still_running_after(mut self, process: impl Into<String>) -> Self {
        self.liveness.push(process.into());
        self
    }

    /// Drive the run to completion. Teardown of every started process
    /// is unconditional.
    pub fn run(mut self) -> RunReport {
        let run_dir = self
            .config
            .temp_dir
            .join(format!("{}_{}", self.name, uuid::Uuid::new_v4().simple()));

        let mut states = vec![RunState::Configuring];
        let mut orchestrator = ProcessOrchestrator::new(&self.config);
        let mut mocks = Vec::new();
        let mut client = None;

        let outcome = self.drive(
            &run_dir,
            &mut states,
            &mut orchestrator,
            &mut mocks,
            &mut client,
        );

        states.push(RunState::TearingDown);
        let teardown = orchestrator.stop_all();

        let verdict = match outcome {
            Err(error) => RunVerdict::Error(error.to_string()),
            Ok(failures) if !failures.is_empty() => RunVerdict::Failed(failures),
            Ok(_) => match teardown {
                // A run is only Passed if its teardown released
                // everything cleanly.
                Err(error) => RunVerdict::Error(error.to_string()),
                Ok(()) => RunVerdict::Passed,
            },
        };

        tracing::info!(name = %self.name, ?verdict, "run finished");
        RunReport {
            verdict,
            client,
            run_dir,
            states,
            mocks,
        }
    }

    fn drive(
        &mut self,
        run_dir: &std::path::Path,
        states: &mut Vec<RunState>,
        orchestrator: &mut ProcessOrchestrator,
        mocks: &mut Vec<MockRuntime>,
        client: &mut Option<CommandResult>,
    ) -> HarnessResult<Vec<String>> {
        std::fs::create_dir_all(run_dir)?;

        states.push(RunState::Starting);

        // Phase 1: context-producing mocks (origin, DNS). Their ports
        // are the late-bound facts everything else consumes.
        let mut phase1 = Vec::new();
        for mock in &self.origins {
            let (spec, paths) = mock.materialize(run_dir, &self.config)?;
            orchestrator.register(spec)?;
            phase1.push((mock.name.clone(), MockKind::Origin, paths));
        }
        for mock in &self.dns {
            let (spec, paths) = mock.materialize(run_dir, &self.config)?;
            orchestrator.register(spec)?;
            phase1.push((mock.name.clone(), MockKind::Dns, paths));
        }
        orchestrator.start_all()?;

        let mut ports = HashMap::new();
        for (name, kind, paths) in phase1 {
            let fact = await_port_file(&paths.port_file, &name, self.config.readiness_timeout)?;
            ports.insert(name.clone(), fact.port);
            mocks.push(MockRuntime {
                name,
                kind,
                port: fact.port,
                paths,
            });
        }

        // Phase 2: verifiers. Render and validate their replays against
        // the gathered facts, then start them.
        for mock in &self.verifiers {
            let (mut spec, paths) = mock.materialize(run_dir, &self.config, &ports)?;
            for prerequisite in mock.port_prerequisites() {
                spec = spec.starts_after(prerequisite);
            }
            orchestrator.register(spec)?;
            let name = mock.name.clone();
            orchestrator.start_all()?;
            let fact = await_port_file(&paths.port_file, &name, self.config.readiness_timeout)?;
            ports.insert(name.clone(), fact.port);
            mocks.push(MockRuntime {
                name,
                kind: MockKind::Verifier,
                port: fact.port,
                paths,
            });
        }

        // The full run context: every mock's port plus user literals.
        let mut context = ReplayContext::new();
        for (name, port) in &ports {
            context.set(format!("{}_port", name.replace('-', "_")), port);
        }
        for (name, value) in &self.context_values {
            context.set(name, value);
        }

        // Phase 3: the proxy under test, configured against the now
        // known mock endpoints.
        if let Some(proxy) = &self.proxy {
            let proxy_dir = run_dir.join(&proxy.name);
            let records_text = substitute(&proxy.records.render(), &context)?;
            let remap_text = substitute(&proxy.remap.render(), &context)?;
            std::fs::create_dir_all(&proxy_dir)?;
            std::fs::write(proxy_dir.join("records.config"), records_text)?;
            std::fs::write(proxy_dir.join("remap.config"), remap_text)?;

            let mut spec = ProcessSpec::new(&proxy.name, &proxy.program)
                .current_dir(&proxy_dir)
                .readiness(resolve_probe(&proxy.readiness, &context)?);
            for arg in &proxy.args {
                spec = spec.arg(substitute(arg, &context)?);
            }
            for (key, value) in &proxy.env {
                spec = spec.env(key, substitute(value, &context)?);
            }
            for mock in orchestrator.started_names().to_vec() {
                spec = spec.starts_after(mock);
            }
            orchestrator.register(spec)?;
            orchestrator.start_all()?;
        }

        // Execute the client command against the proxy.
        let mut failures = Vec::new();
        if let Some(program) = &self.client_program {
            states.push(RunState::Executing);
            let program = substitute(program, &context)?;
            let mut args = Vec::with_capacity(self.client_args.len());
            for arg in &self.client_args {
                args.push(substitute(arg, &context)?);
            }

            let result = run_command(
                &program,
                &args,
                &self.client_env,
                Some(run_dir),
                self.config.command_timeout,
            )?;
            if result.timed_out {
                *client = Some(result);
                return Err(HarnessError::ClientTimeout(self.config.command_timeout));
            }

            states.push(RunState::Verifying);
            if result.exit_code != self.expected_exit_code {
                failures.push(format!(
                    "client exit code: expected {}, got {}\nstderr:\n{}",
                    self.expected_exit_code, result.exit_code, result.stderr
                ));
            }
            for (stream, expectation) in &self.golds {
                if let Verdict::Fail(diff) = gold::compare(&result.stream(*stream), expectation) {
                    failures.push(format!("gold mismatch on {stream}: {diff}"));
                }
            }
            *client = Some(result);
        } else {
            states.push(RunState::Verifying);
        }

        // Liveness assertions: processes that must have survived the
        // client command.
        for name in &self.liveness {
            if !orchestrator.is_running(name) {
                failures.push(format!(
                    "liveness violation: process '{name}' is not running at checkpoint"
                ));
            }
        }

        // Verifier reports: recorded violations fail the run.
        for mock in mocks.iter().filter(|m| m.kind == MockKind::Verifier) {
            let report = VerifierReport::read_file(&mock.paths.report)?;
            for violation in &report.violations {
                failures.push(format!(
                    "verifier '{}': {:?} on connection {}: {}",
                    mock.name, violation.kind, violation.connection, violation.detail
                ));
            }
        }

        Ok(failures)
    }
}

/// Substitute placeholders inside a readiness probe's parameters.
fn resolve_probe(probe: &ReadinessProbe, context: &ReplayContext) -> HarnessResult<ReadinessProbe> {
    Ok(match probe {
        ReadinessProbe::TcpEndpoint(addr) => {
            ReadinessProbe::TcpEndpoint(substitute(addr, context)?)
        }
        ReadinessProbe::LogLine { path, needle } => ReadinessProbe::LogLine {
            path: path.clone(),
            needle: substitute(needle, context)?,
        },
        other => other.clone(),
    })
}
