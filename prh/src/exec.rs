//! Client-command execution with full output capture.
//!
//! The client command's exit code and output streams are the primary
//! observable of a run, so both pipes are drained by reader threads
//! while the parent polls for exit with a bounded timeout. A command
//! that outlives its timeout is killed and reported with exit code 124.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use prh_common::HarnessResult;
use prh_common::gold::StreamSelector;

/// Captured result of a completed (or killed) command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The captured text a stream selector refers to.
    pub fn stream(&self, selector: StreamSelector) -> String {
        match selector {
            StreamSelector::Stdout => self.stdout.clone(),
            StreamSelector::Stderr => self.stderr.clone(),
            StreamSelector::All => format!("{}{}", self.stdout, self.stderr),
        }
    }
}

/// Run a command to completion, capturing both streams.
pub fn run_command(
    program: &str,
    args: &[String],
    env: &HashMap<String, String>,
    current_dir: Option<&Path>,
    timeout: Duration,
) -> HarnessResult<CommandResult> {
    tracing::debug!(program, ?args, "executing client command");

    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }

    let mut child = cmd.spawn()?;
    let stdout_handle = child
        .stdout
        .take()
        .map(|mut stdout| thread::spawn(move || read_to_string(&mut stdout)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|mut stderr| thread::spawn(move || read_to_string(&mut stderr)));

    let mut timed_out = false;
    let exit_status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= timeout {
            timed_out = true;
            let _ = child.kill();
            break child.wait().ok();
        }
        thread::sleep(Duration::from_millis(10));
    };

    let duration = start.elapsed();
    let stdout = join_output(stdout_handle);
    let stderr = join_output(stderr_handle);
    let exit_code = exit_status
        .and_then(|status| status.code())
        .unwrap_or(if timed_out { 124 } else { -1 });

    tracing::debug!(exit_code, timed_out, ?duration, "client command finished");

    Ok(CommandResult {
        exit_code,
        stdout,
        stderr,
        duration,
        timed_out,
    })
}

fn read_to_string<R: Read>(reader: &mut R) -> String {
    let mut buffer = Vec::new();
    if reader.read_to_end(&mut buffer).is_ok() {
        String::from_utf8_lossy(&buffer).to_string()
    } else {
        String::new()
    }
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}
