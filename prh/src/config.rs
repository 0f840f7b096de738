//! Runner configuration: timeouts, scratch space, and mock binary
//! locations.
//!
//! Every timeout is a tunable with a conservative default, overridable
//! per run through the builder, a TOML file, or environment variables
//! (`PRH_READINESS_TIMEOUT` etc., humantime syntax such as `10s`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use prh_common::{HarnessError, HarnessResult};

/// Configuration for a test run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Base directory for per-run scratch directories.
    pub temp_dir: PathBuf,
    /// How long a process may take to reach its readiness signal.
    pub readiness_timeout: Duration,
    /// How long a termination wait may take before it is a failure.
    pub termination_timeout: Duration,
    /// Bound on the client command's execution.
    pub command_timeout: Duration,
    /// Liveness/readiness poll interval.
    pub poll_interval: Duration,
    /// Path to the prh-origin binary.
    pub origin_binary: PathBuf,
    /// Path to the prh-dns binary.
    pub dns_binary: PathBuf,
    /// Path to the prh-verifier binary.
    pub verifier_binary: PathBuf,
    /// Environment variables set for every spawned process.
    pub env_vars: HashMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        fn cargo_bin_exe(candidates: &[&str]) -> Option<PathBuf> {
            for candidate in candidates {
                let key = format!("CARGO_BIN_EXE_{candidate}");
                if let Ok(value) = std::env::var(&key) {
                    let trimmed = value.trim();
                    if !trimmed.is_empty() {
                        return Some(PathBuf::from(trimmed));
                    }
                }
            }
            None
        }

        // Resolve binaries relative to the workspace target dir, not the
        // per-run scratch dir processes are spawned in.
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")));
        let manifest_dir = manifest_dir.canonicalize().unwrap_or(manifest_dir);
        let workspace_root = manifest_dir
            .parent()
            .unwrap_or(manifest_dir.as_path())
            .to_path_buf();
        let cargo_target = std::env::var("CARGO_TARGET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| workspace_root.join("target"));
        let cargo_target = if cargo_target.is_absolute() {
            cargo_target
        } else {
            workspace_root.join(cargo_target)
        };

        let profile = if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        };
        let bin_dir = cargo_target.join(profile);

        let mut config = Self {
            temp_dir: std::env::temp_dir().join("prh_runs"),
            readiness_timeout: Duration::from_secs(30),
            termination_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
            origin_binary: cargo_bin_exe(&["prh-origin"])
                .unwrap_or_else(|| bin_dir.join("prh-origin")),
            dns_binary: cargo_bin_exe(&["prh-dns"]).unwrap_or_else(|| bin_dir.join("prh-dns")),
            verifier_binary: cargo_bin_exe(&["prh-verifier"])
                .unwrap_or_else(|| bin_dir.join("prh-verifier")),
            env_vars: HashMap::new(),
        };
        config.apply_env_overrides();
        config
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawRunnerConfig {
    readiness_timeout: Option<String>,
    termination_timeout: Option<String>,
    command_timeout: Option<String>,
    temp_dir: Option<PathBuf>,
}

impl RunnerConfig {
    /// Load overrides from a TOML file on top of the defaults.
    pub fn load(path: &std::path::Path) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawRunnerConfig = toml::from_str(&text).map_err(|e| {
            HarnessError::ProcessStartFailed(format!("bad runner config {}: {e}", path.display()))
        })?;

        let mut config = Self::default();
        if let Some(value) = raw.readiness_timeout {
            config.readiness_timeout = parse_duration("readiness_timeout", &value)?;
        }
        if let Some(value) = raw.termination_timeout {
            config.termination_timeout = parse_duration("termination_timeout", &value)?;
        }
        if let Some(value) = raw.command_timeout {
            config.command_timeout = parse_duration("command_timeout", &value)?;
        }
        if let Some(dir) = raw.temp_dir {
            config.temp_dir = dir;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        for (key, slot) in [
            ("PRH_READINESS_TIMEOUT", &mut self.readiness_timeout),
            ("PRH_TERMINATION_TIMEOUT", &mut self.termination_timeout),
            ("PRH_COMMAND_TIMEOUT", &mut self.command_timeout),
        ] {
            if let Ok(value) = std::env::var(key)
                && let Ok(duration) = humantime::parse_duration(value.trim())
            {
                *slot = duration;
            }
        }
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}

fn parse_duration(field: &str, value: &str) -> HarnessResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        HarnessError::ProcessStartFailed(format!("bad {field} duration {value:?}: {e}"))
    })
}
