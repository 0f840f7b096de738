//! Process lifecycle orchestration.
//!
//! The orchestrator owns every process of a run: mocks, the proxy under
//! test, and anything else a test declares. It builds a dependency DAG
//! from the declared prerequisites, starts processes in topological
//! order gated on readiness signals, answers liveness queries, and
//! guarantees teardown of everything it started.
//!
//! The orchestrator itself is single-threaded control logic: launches
//! are non-blocking and readiness is awaited by bounded polling, so the
//! only parallelism in the harness is the OS process model itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use prh_common::{HarnessError, HarnessResult};

use crate::config::RunnerConfig;
use crate::process::{ManagedProcess, ProcessSpec, ReadinessProbe};

/// Per-run process registry and lifecycle driver.
#[derive(Debug)]
pub struct ProcessOrchestrator {
    readiness_timeout: Duration,
    termination_timeout: Duration,
    poll_interval: Duration,
    base_env: HashMap<String, String>,
    specs: Vec<ProcessSpec>,
    running: HashMap<String, ManagedProcess>,
    /// Names in the order they were started, for reverse-order teardown.
    started_order: Vec<String>,
}

impl ProcessOrchestrator {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            readiness_timeout: config.readiness_timeout,
            termination_timeout: config.termination_timeout,
            poll_interval: config.poll_interval,
            base_env: config.env_vars.clone(),
            specs: Vec::new(),
            running: HashMap::new(),
            started_order: Vec::new(),
        }
    }

    /// Register a process. Duplicate names and prerequisite edges that
    /// close a cycle are rejected here, before anything starts.
    /// Prerequisites may reference processes registered later; unknown
    /// names are checked at start time.
    pub fn register(&mut self, spec: ProcessSpec) -> HarnessResult<()> {
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(HarnessError::DuplicateProcess(spec.name));
        }
        self.specs.push(spec);
        if let Some(name) = self.find_cycle() {
            self.specs.pop();
            return Err(HarnessError::DependencyCycle(name));
        }
        Ok(())
    }

    /// DFS cycle check over the registered prerequisite edges. Edges to
    /// names not yet registered cannot close a cycle and are skipped.
    fn find_cycle(&self) -> Option<String> {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;

        let index: HashMap<&str, usize> = self
            .specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let mut color = vec![WHITE; self.specs.len()];

        fn visit(
            node: usize,
            specs: &[ProcessSpec],
            index: &HashMap<&str, usize>,
            color: &mut [u8],
        ) -> Option<String> {
            color[node] = GREY;
            for prerequisite in &specs[node].prerequisites {
                let Some(&next) = index.get(prerequisite.as_str()) else {
                    continue;
                };
                match color[next] {
                    GREY => return Some(specs[next].name.clone()),
                    WHITE => {
                        if let Some(found) = visit(next, specs, index, color) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            color[node] = BLACK;
            None
        }

        for node in 0..self.specs.len() {
            if color[node] == WHITE
                && let Some(found) = visit(node, &self.specs, &index, &mut color)
            {
                return Some(found);
            }
        }
        None
    }

    /// Start every registered, not-yet-started process in topological
    /// order. Each process is launched only once all of its
    /// prerequisites are observably Running, and each start blocks on
    /// the process's readiness signal with a bounded timeout. On any
    /// failure every already-started process is torn down before the
    /// error is returned.
    pub fn start_all(&mut self) -> HarnessResult<()> {
        let result = self.start_all_inner();
        if result.is_err() {
            // Setup failed: release everything we already started. The
            // original setup error stays the reported one.
            if let Err(teardown) = self.stop_all() {
                tracing::warn!(%teardown, "teardown after failed start also failed");
            }
        }
        result
    }

    fn start_all_inner(&mut self) -> HarnessResult<()> {
        for spec in &self.specs {
            for prerequisite in &spec.prerequisites {
                if !self.specs.iter().any(|s| &s.name == prerequisite) {
                    return Err(HarnessError::UnknownPrerequisite {
                        process: spec.name.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        loop {
            let next = self.specs.iter().position(|spec| {
                !self.running.contains_key(&spec.name)
                    && spec
                        .prerequisites
                        .iter()
                        .all(|p| self.running.contains_key(p))
            });
            let Some(position) = next else {
                let unstarted: Vec<&str> = self
                    .specs
                    .iter()
                    .filter(|s| !self.running.contains_key(&s.name))
                    .map(|s| s.name.as_str())
                    .collect();
                if unstarted.is_empty() {
                    return Ok(());
                }
                // Unreachable when registration did its job.
                return Err(HarnessError::DependencyCycle(unstarted[0].to_string()));
            };

            let spec = self.specs[position].clone();
            self.start_one(&spec)?;
        }
    }

    fn start_one(&mut self, spec: &ProcessSpec) -> HarnessResult<()> {
        let mut process = ManagedProcess::spawn(spec, &self.base_env)?;
        self.wait_ready(&mut process, &spec.readiness)?;

        tracing::info!(name = %spec.name, pid = process.pid, "process running");
        self.started_order.push(spec.name.clone());
        self.running.insert(spec.name.clone(), process);
        Ok(())
    }

    fn wait_ready(
        &self,
        process: &mut ManagedProcess,
        probe: &ReadinessProbe,
    ) -> HarnessResult<()> {
        let start = Instant::now();
        loop {
            if probe_satisfied(probe) {
                return Ok(());
            }
            if let Some(status) = process.try_exit_status() {
                return Err(HarnessError::PrematureExit {
                    name: process.name.clone(),
                    code: status.code(),
                });
            }
            if start.elapsed() >= self.readiness_timeout {
                let _ = process.kill();
                return Err(HarnessError::ReadinessTimeout {
                    name: process.name.clone(),
                    timeout: self.readiness_timeout,
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Terminate every started process, newest first. Idempotent; a
    /// failure to terminate one process never prevents the attempt on
    /// the others, and the earliest failure is the one reported.
    pub fn stop_all(&mut self) -> HarnessResult<()> {
        let mut first_failure: Option<HarnessError> = None;

        for name in self.started_order.drain(..).rev() {
            let Some(mut process) = self.running.remove(&name) else {
                continue;
            };
            tracing::info!(name = %name, pid = process.pid, "stopping process");

            if let Err(error) = process.kill() {
                tracing::warn!(name = %name, %error, "kill failed");
            }
            match process.wait_timeout(self.termination_timeout) {
                Ok(Some(status)) => {
                    tracing::debug!(name = %name, ?status, "process exited");
                }
                Ok(None) => {
                    let failure = HarnessError::TerminationFailed(
                        name.clone(),
                        format!("still alive after {:?}", self.termination_timeout),
                    );
                    tracing::warn!(name = %name, "termination wait timed out");
                    first_failure.get_or_insert(failure);
                }
                Err(error) => {
                    first_failure
                        .get_or_insert(HarnessError::TerminationFailed(name, error.to_string()));
                }
            }
        }

        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Live OS-level status of a named process. Unregistered and
    /// already-exited processes both answer false.
    pub fn is_running(&mut self, name: &str) -> bool {
        match self.running.get_mut(name) {
            Some(process) => process.is_running(),
            None => false,
        }
    }

    /// Names started so far, in start order.
    pub fn started_names(&self) -> &[String] {
        &self.started_order
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.specs.iter().any(|s| s.name == name)
    }
}

fn probe_satisfied(probe: &ReadinessProbe) -> bool {
    match probe {
        ReadinessProbe::None => true,
        ReadinessProbe::PortFile(path) => std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<prh_common::PortFact>(&bytes).ok())
            .is_some(),
        ReadinessProbe::TcpEndpoint(addr) => std::net::TcpStream::connect(addr).is_ok(),
        ReadinessProbe::LogLine { path, needle } => std::fs::read_to_string(path)
            .map(|text| text.contains(needle))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(dir: &Path) -> RunnerConfig {
        RunnerConfig::default()
            .with_readiness_timeout(Duration::from_secs(5))
            .with_temp_dir(dir)
    }

    fn touch_then_sleep(name: &str, marker: &Path) -> ProcessSpec {
        ProcessSpec::new(name, "/bin/sh")
            .arg("-c")
            .arg(format!("echo ready > {}; sleep 30", marker.display()))
            .readiness(ReadinessProbe::LogLine {
                path: marker.to_path_buf(),
                needle: "ready".to_string(),
            })
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));
        orchestrator
            .register(ProcessSpec::new("dns", "/bin/true"))
            .unwrap();
        let err = orchestrator
            .register(ProcessSpec::new("dns", "/bin/true"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateProcess(_)));
    }

    #[test]
    fn test_cycle_rejected_at_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));
        orchestrator
            .register(ProcessSpec::new("a", "/bin/true").starts_after("b"))
            .unwrap();
        let err = orchestrator
            .register(ProcessSpec::new("b", "/bin/true").starts_after("a"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::DependencyCycle(_)));
        // The registry is unchanged by the rejected registration.
        assert!(!orchestrator.is_registered("b"));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));
        let err = orchestrator
            .register(ProcessSpec::new("a", "/bin/true").starts_after("a"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::DependencyCycle(_)));
    }

    #[test]
    fn test_unknown_prerequisite_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));
        orchestrator
            .register(ProcessSpec::new("proxy", "/bin/true").starts_after("ghost"))
            .unwrap();
        let err = orchestrator.start_all().unwrap_err();
        assert!(matches!(err, HarnessError::UnknownPrerequisite { .. }));
    }

    #[test]
    fn test_start_order_respects_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));

        let dns_marker = dir.path().join("dns.ready");
        let origin_marker = dir.path().join("origin.ready");

        // Register the dependent first; the orchestrator must reorder.
        orchestrator
            .register(
                touch_then_sleep("proxy", &dir.path().join("proxy.ready"))
                    .starts_after("dns")
                    .starts_after("origin"),
            )
            .unwrap();
        orchestrator
            .register(touch_then_sleep("dns", &dns_marker))
            .unwrap();
        orchestrator
            .register(touch_then_sleep("origin", &origin_marker))
            .unwrap();

        orchestrator.start_all().unwrap();
        assert_eq!(orchestrator.started_names(), &["dns", "origin", "proxy"]);
        assert!(orchestrator.is_running("proxy"));
        assert!(orchestrator.is_running("dns"));

        orchestrator.stop_all().unwrap();
        assert!(!orchestrator.is_running("proxy"));
    }

    #[test]
    fn test_each_process_starts_exactly_once_across_phases() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));

        let marker = dir.path().join("first.ready");
        orchestrator
            .register(touch_then_sleep("first", &marker))
            .unwrap();
        orchestrator.start_all().unwrap();

        // A later phase registers more processes; the earlier one is
        // not started again.
        orchestrator
            .register(touch_then_sleep("second", &dir.path().join("second.ready")))
            .unwrap();
        orchestrator.start_all().unwrap();

        assert_eq!(orchestrator.started_names(), &["first", "second"]);
        orchestrator.stop_all().unwrap();
    }

    #[test]
    fn test_premature_exit_is_setup_error_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));

        let marker = dir.path().join("dns.ready");
        orchestrator
            .register(touch_then_sleep("dns", &marker))
            .unwrap();
        // Exits immediately while the orchestrator waits for a marker
        // that will never appear.
        orchestrator
            .register(
                ProcessSpec::new("crasher", "/bin/sh")
                    .args(["-c", "exit 9"])
                    .readiness(ReadinessProbe::LogLine {
                        path: dir.path().join("crasher.ready"),
                        needle: "ready".to_string(),
                    }),
            )
            .unwrap();

        let err = orchestrator.start_all().unwrap_err();
        assert!(matches!(
            err,
            HarnessError::PrematureExit { code: Some(9), .. }
        ));
        // Everything already started was released.
        assert!(!orchestrator.is_running("dns"));
    }

    #[test]
    fn test_readiness_timeout_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path()).with_readiness_timeout(Duration::from_millis(200));
        let mut orchestrator = ProcessOrchestrator::new(&config);

        orchestrator
            .register(
                ProcessSpec::new("never-ready", "/bin/sh")
                    .args(["-c", "sleep 30"])
                    .readiness(ReadinessProbe::LogLine {
                        path: dir.path().join("never.ready"),
                        needle: "ready".to_string(),
                    }),
            )
            .unwrap();

        let err = orchestrator.start_all().unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { .. }));
    }

    #[test]
    fn test_stop_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));
        orchestrator
            .register(ProcessSpec::new("sleeper", "/bin/sh").args(["-c", "sleep 30"]))
            .unwrap();
        orchestrator.start_all().unwrap();

        orchestrator.stop_all().unwrap();
        orchestrator.stop_all().unwrap();
        assert!(!orchestrator.is_running("sleeper"));
    }

    #[test]
    fn test_is_running_reflects_external_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = ProcessOrchestrator::new(&config(dir.path()));
        orchestrator
            .register(ProcessSpec::new("brief", "/bin/sh").args(["-c", "sleep 0.1"]))
            .unwrap();
        orchestrator.start_all().unwrap();

        std::thread::sleep(Duration::from_millis(500));
        assert!(!orchestrator.is_running("brief"));
        orchestrator.stop_all().unwrap();
    }
}
