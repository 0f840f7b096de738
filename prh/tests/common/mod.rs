pub mod assertions;
pub mod logging;

pub use assertions::assert_contains;
pub use logging::init_test_logging;

use std::time::Duration;

use prh::RunnerConfig;

/// Runner config pointed at a per-test scratch dir, with timeouts short
/// enough to keep failing tests fast.
pub fn test_config(dir: &std::path::Path) -> RunnerConfig {
    RunnerConfig::default()
        .with_readiness_timeout(Duration::from_secs(10))
        .with_command_timeout(Duration::from_secs(10))
        .with_temp_dir(dir)
}

/// The mock server binaries are built as sibling workspace members;
/// skip traffic tests when they are not present (e.g. a single-package
/// test invocation).
pub fn mock_binaries_built(config: &RunnerConfig) -> bool {
    let present = config.origin_binary.exists()
        && config.dns_binary.exists()
        && config.verifier_binary.exists();
    if !present {
        eprintln!(
            "skipping: mock binaries not built (expected at {})",
            config.origin_binary.display()
        );
    }
    present
}
