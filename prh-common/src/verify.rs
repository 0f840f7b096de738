//! Request-shape validation for the verifier server.
//!
//! Unlike the origin mock's key lookup, the verifier consults its
//! transactions in declaration order and checks structural expectations
//! of each incoming request: method/url, header directives, correlation
//! identifier. A violated expectation is recorded, not fatal: the mock
//! keeps serving so the run stays bounded, and the recorded violations
//! fail the run at verification time.

use serde::{Deserialize, Serialize};

use crate::httpwire::HttpRequestHead;
use crate::replay::{RequestExpectation, VerifyDirective};

/// What went wrong with one incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Method/url did not match the consulted transaction.
    RequestMismatch,
    /// A header required present (or equal) was absent.
    MissingHeader,
    /// A header was present with the wrong value.
    HeaderValueMismatch,
    /// A header required absent was present.
    UnexpectedHeader,
    /// More requests arrived than transactions were scripted.
    UnexpectedRequest,
}

/// One recorded validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub connection: u64,
    /// Index of the consulted transaction, if one was available.
    pub transaction: Option<usize>,
    pub kind: ViolationKind,
    pub detail: String,
}

/// The queryable outcome of a verifier's run, written as JSON and read
/// back by the runner at verification time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierReport {
    pub transactions_served: u64,
    pub violations: Vec<Violation>,
}

impl VerifierReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn write_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)
    }

    pub fn read_file(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Validate one incoming request against the consulted transaction's
/// expectation. Returns every violation found, not just the first.
pub fn validate_request(
    connection: u64,
    transaction: usize,
    expectation: &RequestExpectation,
    request: &HttpRequestHead,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !expectation.matches_transport(request) {
        violations.push(Violation {
            connection,
            transaction: Some(transaction),
            kind: ViolationKind::RequestMismatch,
            detail: format!(
                "expected {} {}, got {} {}",
                expectation.method, expectation.url, request.method, request.path
            ),
        });
    }

    for field in &expectation.fields {
        let Some(directive) = field.directive else {
            continue;
        };
        let actual = request.header(&field.name);
        match directive {
            VerifyDirective::Present => {
                if actual.is_none() {
                    violations.push(Violation {
                        connection,
                        transaction: Some(transaction),
                        kind: ViolationKind::MissingHeader,
                        detail: format!("header '{}' required but absent", field.name),
                    });
                }
            }
            VerifyDirective::Absent => {
                if let Some(value) = actual {
                    violations.push(Violation {
                        connection,
                        transaction: Some(transaction),
                        kind: ViolationKind::UnexpectedHeader,
                        detail: format!("header '{}' must be absent, got {value:?}", field.name),
                    });
                }
            }
            VerifyDirective::Equal => match actual {
                None => violations.push(Violation {
                    connection,
                    transaction: Some(transaction),
                    kind: ViolationKind::MissingHeader,
                    detail: format!("header '{}' required but absent", field.name),
                }),
                Some(value) if Some(value) != field.value.as_deref() => {
                    violations.push(Violation {
                        connection,
                        transaction: Some(transaction),
                        kind: ViolationKind::HeaderValueMismatch,
                        detail: format!(
                            "header '{}': expected {:?}, got {value:?}",
                            field.name,
                            field.value.as_deref().unwrap_or("")
                        ),
                    });
                }
                Some(_) => {}
            },
        }
    }

    violations
}
