//! Replay descriptions: ordered request/response transactions plus a
//! context of named substitution variables.
//!
//! A replay description is a YAML document scripting what a verifier
//! server should see and say, transaction by transaction:
//!
//! ```yaml
//! meta:
//!   version: "1.0"
//! sessions:
//!   - transactions:
//!       - client-request:
//!           method: GET
//!           url: /ping
//!           headers:
//!             fields:
//!               - [ Host, foo.test ]
//!               - [ uuid, issue2742, equal ]
//!         server-response:
//!           status: 302
//!           reason: Found
//!           headers:
//!             fields:
//!               - [ Location, "http://bar.test:{bar_http_port}/pong" ]
//! ```
//!
//! `{name}` tokens anywhere in the document are substituted from the
//! load context before parsing; a token whose name the context does not
//! define fails the load. Context values are typically ports assigned
//! when another mock bound, so descriptions are loaded only after the
//! mocks they reference are running.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::errors::ReplayLoadError;
use crate::httpwire::HttpRequestHead;
use crate::matching::ScriptedResponse;

/// Only `{identifier}` is treated as a placeholder, so YAML flow syntax
/// and JSON-ish bodies pass through untouched.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

/// Named substitution variables available to a replay description.
#[derive(Debug, Clone, Default)]
pub struct ReplayContext {
    values: HashMap<String, String>,
}

impl ReplayContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.values.insert(name.into(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

impl<N: Into<String>, V: ToString> FromIterator<(N, V)> for ReplayContext {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut context = Self::new();
        for (name, value) in iter {
            context.set(name, value);
        }
        context
    }
}

/// How a header field expectation is checked against an incoming
/// request. Fields without a directive are informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyDirective {
    /// Header must be present with exactly this value.
    Equal,
    /// Header must be present; value is not checked.
    Present,
    /// Header must be absent.
    Absent,
}

/// One header field of a request expectation.
#[derive(Debug, Clone)]
pub struct FieldExpectation {
    pub name: String,
    pub value: Option<String>,
    pub directive: Option<VerifyDirective>,
}

/// The request side of a transaction: what the next incoming request is
/// expected to look like.
#[derive(Debug, Clone)]
pub struct RequestExpectation {
    pub method: String,
    pub url: String,
    pub fields: Vec<FieldExpectation>,
}

impl RequestExpectation {
    /// Transport-level match: method and url equality. Header directive
    /// checks are the verifier's job and are reported separately.
    pub fn matches_transport(&self, request: &HttpRequestHead) -> bool {
        self.method.eq_ignore_ascii_case(&request.method) && self.url == request.path
    }
}

/// One scripted transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub request: RequestExpectation,
    pub response: ScriptedResponse,
}

/// A fully loaded, fully substituted replay description.
#[derive(Debug, Clone)]
pub struct ReplayDescription {
    pub transactions: Vec<Transaction>,
}

impl ReplayDescription {
    /// Load from YAML text, substituting every `{name}` token from the
    /// context first. Any unresolved token fails the load; nothing binds
    /// on a bad description.
    pub fn load(source: &str, context: &ReplayContext) -> Result<Self, ReplayLoadError> {
        let substituted = substitute(source, context)?;
        let raw: RawReplay = serde_yaml_ng::from_str(&substituted)?;

        let mut transactions = Vec::new();
        for session in raw.sessions {
            for transaction in session.transactions {
                transactions.push(transaction.try_into()?);
            }
        }
        if transactions.is_empty() {
            return Err(ReplayLoadError::Empty);
        }
        Ok(Self { transactions })
    }

    pub fn load_file(path: &Path, context: &ReplayContext) -> Result<Self, ReplayLoadError> {
        let source = std::fs::read_to_string(path).map_err(|source| ReplayLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load(&source, context)
    }
}

/// Replace `{name}` tokens from the context; error on the first token
/// the context cannot resolve.
pub fn substitute(source: &str, context: &ReplayContext) -> Result<String, ReplayLoadError> {
    let mut unresolved = None;
    let result = PLACEHOLDER.replace_all(source, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match context.get(name) {
            Some(value) => value.to_string(),
            None => {
                if unresolved.is_none() {
                    unresolved = Some(name.to_string());
                }
                caps[0].to_string()
            }
        }
    });
    match unresolved {
        Some(name) => Err(ReplayLoadError::UnresolvedPlaceholder { name }),
        None => Ok(result.into_owned()),
    }
}

// Raw serde shapes for the YAML document.

#[derive(Debug, Deserialize)]
struct RawReplay {
    #[serde(default)]
    #[allow(dead_code)]
    meta: Option<RawMeta>,
    sessions: Vec<RawSession>,
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    #[allow(dead_code)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    #[serde(rename = "client-request")]
    client_request: RawRequest,
    #[serde(rename = "server-response")]
    server_response: RawResponse,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Option<RawHeaders>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    status: u16,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    headers: Option<RawHeaders>,
    #[serde(default)]
    body: Option<String>,
    #[serde(rename = "delay-ms", default)]
    delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawHeaders {
    #[serde(default)]
    fields: Vec<Vec<serde_yaml_ng::Value>>,
}

fn scalar_to_string(value: &serde_yaml_ng::Value) -> String {
    match value {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        other => serde_yaml_ng::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

fn parse_fields(headers: Option<RawHeaders>) -> Result<Vec<FieldExpectation>, ReplayLoadError> {
    let Some(headers) = headers else {
        return Ok(Vec::new());
    };
    let mut fields = Vec::new();
    for raw in headers.fields {
        let mut parts = raw.iter();
        let name = parts.next().map(scalar_to_string).unwrap_or_default();
        let value = parts.next().map(scalar_to_string);
        let directive = match parts.next().map(scalar_to_string) {
            None => None,
            Some(directive) => Some(match directive.as_str() {
                "equal" => VerifyDirective::Equal,
                "present" => VerifyDirective::Present,
                "absent" => VerifyDirective::Absent,
                other => {
                    return Err(ReplayLoadError::InvalidDirective {
                        field: name,
                        directive: other.to_string(),
                    });
                }
            }),
        };
        fields.push(FieldExpectation {
            name,
            value,
            directive,
        });
    }
    Ok(fields)
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = ReplayLoadError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let request = RequestExpectation {
            method: raw.client_request.method,
            url: raw.client_request.url,
            fields: parse_fields(raw.client_request.headers)?,
        };

        let mut response = ScriptedResponse::new(raw.server_response.status);
        response.reason = raw.server_response.reason;
        response.body = raw.server_response.body.unwrap_or_default();
        response.delay_ms = raw.server_response.delay_ms;
        for field in parse_fields(raw.server_response.headers)? {
            response
                .headers
                .push((field.name, field.value.unwrap_or_default()));
        }

        Ok(Self { request, response })
    }
}
