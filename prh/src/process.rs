//! Process specifications and managed child processes.
//!
//! A [`ProcessSpec`] declares everything the orchestrator needs to start
//! a process: command line, environment, prerequisites, and the signal
//! that marks it ready for dependents. A [`ManagedProcess`] wraps the
//! spawned child; it is owned exclusively by the orchestrator and is
//! terminated at the end of the run no matter how the run went.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use prh_common::{HarnessError, HarnessResult};

/// The observable event that marks a process ready to accept
/// dependents.
#[derive(Debug, Clone)]
pub enum ReadinessProbe {
    /// Considered ready as soon as the spawn succeeds.
    None,
    /// Ready when this port file exists and parses.
    PortFile(PathBuf),
    /// Ready when a TCP connect to this address succeeds.
    TcpEndpoint(String),
    /// Ready when this file contains the given substring.
    LogLine { path: PathBuf, needle: String },
}

/// Declaration of one process in a run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub current_dir: Option<PathBuf>,
    /// Names of processes that must be Running before this one starts.
    pub prerequisites: Vec<String>,
    pub readiness: ReadinessProbe,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
            prerequisites: Vec::new(),
            readiness: ReadinessProbe::None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Declare "prerequisite starts before self" (deduplicated, order
    /// preserved).
    pub fn starts_after(mut self, prerequisite: impl Into<String>) -> Self {
        let prerequisite = prerequisite.into();
        if !self.prerequisites.contains(&prerequisite) {
            self.prerequisites.push(prerequisite);
        }
        self
    }

    pub fn readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = probe;
        self
    }
}

/// A spawned process under orchestrator ownership.
#[derive(Debug)]
pub struct ManagedProcess {
    pub name: String,
    pub pid: u32,
    pub started_at: Instant,
    child: Child,
}

impl ManagedProcess {
    /// Spawn the process described by the spec. Output goes to null:
    /// mocks log to files, and an unread pipe would fill and block a
    /// long-running child.
    pub fn spawn(
        spec: &ProcessSpec,
        base_env: &HashMap<String, String>,
    ) -> HarnessResult<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in base_env {
            cmd.env(k, v);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        tracing::info!(name = %spec.name, program = %spec.program.display(), "spawning process");

        let child = cmd.spawn().map_err(|e| {
            HarnessError::ProcessStartFailed(format!("{}: {e}", spec.program.display()))
        })?;

        Ok(Self {
            name: spec.name.clone(),
            pid: child.id(),
            started_at: Instant::now(),
            child,
        })
    }

    /// Live OS-level status.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit status if the process has already exited (non-blocking).
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }

    /// Wait for exit, bounded. `None` means the deadline passed with the
    /// process still alive.
    pub fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
