//! Proxy Replay Harness - test-run driver and process orchestrator.
//!
//! Integration tests for a forward/reverse proxy declare a set of
//! cooperating processes: the proxy under test, scripted mock origin
//! servers, a mock DNS resolver, and replay verifier servers. This
//! crate wires them together:
//!
//! - [`orchestrator::ProcessOrchestrator`] starts and stops processes
//!   in dependency order, gated on readiness signals, with guaranteed
//!   teardown
//! - [`mocks`] declares the scripted mocks and materializes them into
//!   spawned server processes
//! - [`testrun::TestRun`] drives a whole run: configuration, startup,
//!   the client command, gold/liveness verification, teardown
//!
//! The mock server engines themselves live in the `prh-origin`,
//! `prh-dns`, and `prh-verifier` binaries; shared protocol code is in
//! `prh-common`.

pub mod config;
pub mod exec;
pub mod mocks;
pub mod orchestrator;
pub mod process;
pub mod testrun;

pub use config::RunnerConfig;
pub use exec::{CommandResult, run_command};
pub use mocks::{ContextSource, DnsMock, MockKind, OriginMock, VerifierMock, reserve_local_port};
pub use orchestrator::ProcessOrchestrator;
pub use process::{ManagedProcess, ProcessSpec, ReadinessProbe};
pub use testrun::{ProxyUnderTest, RunReport, RunState, RunVerdict, TestRun};

pub use prh_common::gold::{GoldExpectation, StreamSelector};
pub use prh_common::matching::{HttpMatchKey, ScriptedResponse};
pub use prh_common::{ConfigRecords, ConfigValue, HarnessError, HarnessResult, RemapConfig};
