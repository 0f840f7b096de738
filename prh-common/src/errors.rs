//! Error taxonomy for the harness.
//!
//! Two families matter to callers and must never be conflated in
//! reporting:
//! - setup/harness faults (`HarnessError`): dependency cycles, readiness
//!   timeouts, unresolved replay placeholders, launch failures
//! - assertion mismatches (wrong exit code, gold diff, liveness
//!   violation), which are carried in the run verdict, not as errors

use std::path::PathBuf;
use std::time::Duration;

/// Harness-level failure. A run that hits one of these reports `Error`,
/// never `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("process failed to start: {0}")]
    ProcessStartFailed(String),

    #[error("process not registered: {0}")]
    ProcessNotFound(String),

    #[error("duplicate process name: {0}")]
    DuplicateProcess(String),

    #[error("dependency cycle involving process '{0}'")]
    DependencyCycle(String),

    #[error("unknown prerequisite '{prerequisite}' declared by '{process}'")]
    UnknownPrerequisite {
        process: String,
        prerequisite: String,
    },

    #[error("process '{name}' not ready after {timeout:?}")]
    ReadinessTimeout { name: String, timeout: Duration },

    #[error("process '{name}' exited during startup with code {code:?}")]
    PrematureExit { name: String, code: Option<i32> },

    #[error("termination of '{0}' failed: {1}")]
    TerminationFailed(String, String),

    #[error("client command still running after {0:?}")]
    ClientTimeout(Duration),

    #[error("replay load failed: {0}")]
    ReplayLoad(#[from] ReplayLoadError),

    #[error("config render failed for {path}: {source}")]
    ConfigRender {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the harness crates.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Load-time failure of a replay description. Raised before any server
/// binds, so a bad description can never cause a partial startup.
#[derive(Debug, thiserror::Error)]
pub enum ReplayLoadError {
    #[error("unresolved placeholder '{{{name}}}'")]
    UnresolvedPlaceholder { name: String },

    #[error("replay description is not valid YAML: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("replay description has no transactions")]
    Empty,

    #[error("invalid verify directive '{directive}' on header field '{field}'")]
    InvalidDirective { field: String, directive: String },

    #[error("failed to read replay description {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
