//! Minimal RFC 1035 wire codec for the mock DNS server.
//!
//! Scope is a scripted stub resolver: parse the first question of a UDP
//! query, answer A lookups from a static record table, and return a name
//! error (NXDOMAIN) for hostnames the table does not know. Compression is
//! emitted for answers (pointer to the question name) but not accepted in
//! queries, which real resolvers never compress.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
const RCODE_NAME_ERROR: u8 = 3;
const ANSWER_TTL: u32 = 60;

/// Static hostname → ordered address table, loaded from a generated JSON
/// file before the server binds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsRecordTable {
    #[serde(default)]
    records: HashMap<String, Vec<Ipv4Addr>>,
}

/// Outcome of a table lookup. Unknown hostnames are a distinct outcome
/// mapped to NXDOMAIN, never a synthetic address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsLookupOutcome {
    Records(Vec<Ipv4Addr>),
    NameError,
}

impl DnsRecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add addresses for a hostname, preserving order. Repeated calls
    /// append.
    pub fn add_record(&mut self, hostname: impl Into<String>, addresses: &[Ipv4Addr]) {
        self.records
            .entry(normalize_name(&hostname.into()))
            .or_default()
            .extend_from_slice(addresses);
    }

    /// Addresses in table order, or the name-error outcome.
    pub fn lookup(&self, hostname: &str) -> DnsLookupOutcome {
        match self.records.get(&normalize_name(hostname)) {
            Some(addresses) => DnsLookupOutcome::Records(addresses.clone()),
            None => DnsLookupOutcome::NameError,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Decode failure for an incoming datagram. Undecodable datagrams are
/// dropped by the server; a stub resolver retries.
#[derive(Debug, thiserror::Error)]
pub enum DnsWireError {
    #[error("datagram truncated at offset {0}")]
    Truncated(usize),

    #[error("query has no question")]
    NoQuestion,

    #[error("label exceeds datagram bounds")]
    BadLabel,
}

/// The parts of a query the responder needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub id: u16,
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    pub recursion_desired: bool,
    /// Raw question section, echoed back in the response.
    question: Vec<u8>,
}

/// Parse the header and first question of a query datagram.
pub fn parse_query(datagram: &[u8]) -> Result<DnsQuery, DnsWireError> {
    if datagram.len() < HEADER_LEN {
        return Err(DnsWireError::Truncated(datagram.len()));
    }
    let id = u16::from_be_bytes([datagram[0], datagram[1]]);
    let recursion_desired = datagram[2] & 0x01 != 0;
    let qdcount = u16::from_be_bytes([datagram[4], datagram[5]]);
    if qdcount == 0 {
        return Err(DnsWireError::NoQuestion);
    }

    let mut offset = HEADER_LEN;
    let mut labels = Vec::new();
    loop {
        let len = *datagram.get(offset).ok_or(DnsWireError::BadLabel)? as usize;
        offset += 1;
        if len == 0 {
            break;
        }
        let label = datagram
            .get(offset..offset + len)
            .ok_or(DnsWireError::BadLabel)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        offset += len;
    }
    let qtype_end = offset + 4;
    if datagram.len() < qtype_end {
        return Err(DnsWireError::Truncated(datagram.len()));
    }
    let qtype = u16::from_be_bytes([datagram[offset], datagram[offset + 1]]);
    let qclass = u16::from_be_bytes([datagram[offset + 2], datagram[offset + 3]]);

    Ok(DnsQuery {
        id,
        name: labels.join("."),
        qtype,
        qclass,
        recursion_desired,
        question: datagram[HEADER_LEN..qtype_end].to_vec(),
    })
}

/// Build the response datagram for a query and its lookup outcome.
///
/// A queries (and ANY) for known names get the table's addresses in
/// order; known names with other query types get an empty NOERROR
/// answer; unknown names get NXDOMAIN.
pub fn build_response(query: &DnsQuery, outcome: &DnsLookupOutcome) -> Vec<u8> {
    let answers: &[Ipv4Addr] = match outcome {
        DnsLookupOutcome::Records(addresses)
            if (query.qtype == TYPE_A || query.qtype == TYPE_ANY) && query.qclass == CLASS_IN =>
        {
            addresses
        }
        _ => &[],
    };
    let rcode = match outcome {
        DnsLookupOutcome::NameError => RCODE_NAME_ERROR,
        DnsLookupOutcome::Records(_) => 0,
    };

    let mut out = Vec::with_capacity(HEADER_LEN + query.question.len() + answers.len() * 16);
    out.extend_from_slice(&query.id.to_be_bytes());
    // QR=1, AA=1, RD copied; RA=1.
    let flags_hi = 0x84 | if query.recursion_desired { 0x01 } else { 0x00 };
    out.push(flags_hi);
    out.push(0x80 | rcode);
    out.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    out.extend_from_slice(&(answers.len() as u16).to_be_bytes()); // ANCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    out.extend_from_slice(&query.question);

    for address in answers {
        out.extend_from_slice(&[0xC0, HEADER_LEN as u8]); // pointer to question name
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&address.octets());
    }

    out
}
