//! Shared protocol engines and types for the proxy replay harness.
//!
//! This crate holds everything the runner and the mock server binaries
//! have in common:
//! - Request match tables with pluggable key extraction
//! - The replay description model and its context substitution
//! - Gold-file comparison
//! - Generated-configuration rendering (records + remap overlay)
//! - HTTP and DNS wire codecs for the mock servers
//! - Session logging and the port-file readiness protocol

pub mod config;
pub mod dnswire;
pub mod errors;
pub mod gold;
pub mod httpwire;
pub mod logging;
pub mod matching;
pub mod readiness;
pub mod replay;
pub mod session;
pub mod verify;

pub use config::{ConfigRecords, ConfigValue, RemapConfig};
pub use errors::{HarnessError, HarnessResult, ReplayLoadError};
pub use gold::{GoldExpectation, StreamSelector, Verdict};
pub use logging::{LogConfig, init_logging};
pub use matching::{
    HttpMatchKey, MatchEntry, MatchOutcome, RequestKey, RequestMatchTable, ScriptedResponse,
};
pub use readiness::{PortFact, await_port_file, await_tcp, publish_port_file};
pub use replay::{ReplayContext, ReplayDescription, Transaction, VerifyDirective};
pub use session::{ExchangeRecord, SessionLog};
pub use verify::{VerifierReport, Violation, ViolationKind};
