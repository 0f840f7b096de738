//! End-to-end tests of the mock server binaries over localhost.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream, UdpSocket};
use std::time::Duration;

use prh::{HttpMatchKey, OriginMock, ProcessOrchestrator, ScriptedResponse, VerifierMock};
use prh_common::readiness::await_port_file;
use prh_common::session::SessionLog;
use prh_common::verify::{VerifierReport, ViolationKind};

use crate::common::{assert_contains, init_test_logging, mock_binaries_built, test_config};

fn http_exchange(port: u16, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to mock");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn test_origin_server_plays_scripted_exchanges_and_logs_sessions() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    let mock = OriginMock::new("foo")
        .add_exchange(
            HttpMatchKey::host_path("foo.test", "/ping"),
            ScriptedResponse::new(302)
                .with_reason("Found")
                .with_header("Location", "http://bar.test:9999/pong")
                .with_header("Connection", "close"),
        )
        .add_exchange(
            HttpMatchKey::host_path("foo.test", "/health"),
            ScriptedResponse::new(200)
                .with_body("ok")
                .with_header("Connection", "close"),
        );
    let (spec, paths) = mock.materialize(dir.path(), &config).unwrap();

    let mut orchestrator = ProcessOrchestrator::new(&config);
    orchestrator.register(spec).unwrap();
    orchestrator.start_all().unwrap();
    let fact = await_port_file(&paths.port_file, "foo", Duration::from_secs(10)).unwrap();

    // A scripted exchange comes back exactly as declared.
    let response = http_exchange(
        fact.port,
        "GET /ping HTTP/1.1\r\nHost: foo.test\r\nuuid: run-1\r\n\r\n",
    );
    assert_contains(&response, "HTTP/1.1 302 Found");
    assert_contains(&response, "Location: http://bar.test:9999/pong");

    // A request nothing matches gets the synthetic failure, not a hang.
    let response = http_exchange(fact.port, "GET /nope HTTP/1.1\r\nHost: foo.test\r\n\r\n");
    assert_contains(&response, "HTTP/1.1 404 Not Found");
    assert_contains(&response, "x-prh-no-match: 1");

    orchestrator.stop_all().unwrap();

    // Both exchanges were recorded, arrival-ordered, with correlation.
    let records = SessionLog::read_file(&paths.session_log).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].path, "/ping");
    assert_eq!(records[0].uuid.as_deref(), Some("run-1"));
    assert!(records[0].matched);
    assert_eq!(records[1].path, "/nope");
    assert!(!records[1].matched);
}

#[test]
fn test_origin_redirect_hop_correlates_across_mocks() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    // Mock B first; its port goes into mock A's Location header.
    let bar = OriginMock::new("bar").add_exchange(
        HttpMatchKey::host_path("bar.test", "/pong"),
        ScriptedResponse::new(200)
            .with_body("pong")
            .with_header("Connection", "close"),
    );
    let (bar_spec, bar_paths) = bar.materialize(dir.path(), &config).unwrap();

    let mut orchestrator = ProcessOrchestrator::new(&config);
    orchestrator.register(bar_spec).unwrap();
    orchestrator.start_all().unwrap();
    let bar_fact = await_port_file(&bar_paths.port_file, "bar", Duration::from_secs(10)).unwrap();

    let foo = OriginMock::new("foo").add_exchange(
        HttpMatchKey::host_path("foo.test", "/ping"),
        ScriptedResponse::new(302)
            .with_reason("Found")
            .with_header(
                "Location",
                format!("http://127.0.0.1:{}/pong", bar_fact.port),
            )
            .with_header("Connection", "close"),
    );
    let (foo_spec, foo_paths) = foo.materialize(dir.path(), &config).unwrap();
    orchestrator.register(foo_spec).unwrap();
    orchestrator.start_all().unwrap();
    let foo_fact = await_port_file(&foo_paths.port_file, "foo", Duration::from_secs(10)).unwrap();

    // Client that follows exactly one redirect.
    let response = http_exchange(
        foo_fact.port,
        "GET /ping HTTP/1.1\r\nHost: foo.test\r\nuuid: issue2742\r\n\r\n",
    );
    assert_contains(&response, "HTTP/1.1 302 Found");
    let location = response
        .lines()
        .find_map(|line| line.strip_prefix("Location: "))
        .expect("redirect must carry a location header");
    let target_port: u16 = location
        .trim_start_matches("http://127.0.0.1:")
        .split('/')
        .next()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(target_port, bar_fact.port);

    let response = http_exchange(
        target_port,
        "GET /pong HTTP/1.1\r\nHost: bar.test\r\nuuid: issue2742\r\n\r\n",
    );
    assert_contains(&response, "HTTP/1.1 200 OK");
    assert_contains(&response, "pong");

    orchestrator.stop_all().unwrap();

    // Exactly one exchange on mock B, correlated to the original id.
    let bar_records = SessionLog::read_file(&bar_paths.session_log).unwrap();
    assert_eq!(bar_records.len(), 1);
    assert_eq!(bar_records[0].uuid.as_deref(), Some("issue2742"));
}

#[test]
fn test_origin_without_redirect_following_leaves_second_mock_untouched() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    let bar = OriginMock::new("bar").add_exchange(
        HttpMatchKey::path_only("/pong"),
        ScriptedResponse::new(200).with_header("Connection", "close"),
    );
    let (bar_spec, bar_paths) = bar.materialize(dir.path(), &config).unwrap();
    let foo = OriginMock::new("foo").add_exchange(
        HttpMatchKey::path_only("/ping"),
        ScriptedResponse::new(302)
            .with_header("Location", "http://bar.test/pong")
            .with_header("Connection", "close"),
    );
    let (foo_spec, foo_paths) = foo.materialize(dir.path(), &config).unwrap();

    let mut orchestrator = ProcessOrchestrator::new(&config);
    orchestrator.register(bar_spec).unwrap();
    orchestrator.register(foo_spec).unwrap();
    orchestrator.start_all().unwrap();
    let foo_fact = await_port_file(&foo_paths.port_file, "foo", Duration::from_secs(10)).unwrap();

    // Client that does not follow redirects: the 302 is the final
    // response and mock B sees nothing.
    let response = http_exchange(foo_fact.port, "GET /ping HTTP/1.1\r\nHost: foo.test\r\n\r\n");
    assert_contains(&response, "HTTP/1.1 302");
    assert_contains(&response, "Location: http://bar.test/pong");

    orchestrator.stop_all().unwrap();
    let bar_records = SessionLog::read_file(&bar_paths.session_log).unwrap();
    assert!(bar_records.is_empty());
}

fn dns_query(id: u16, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&[0x01, 0x00]);
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out.extend_from_slice(&1u16.to_be_bytes()); // A
    out.extend_from_slice(&1u16.to_be_bytes()); // IN
    out
}

#[test]
fn test_dns_server_answers_known_and_unknown_names() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    let mock = prh::DnsMock::new("dns").add_record("foo.test", &[Ipv4Addr::new(127, 0, 0, 1)]);
    let (spec, paths) = mock.materialize(dir.path(), &config).unwrap();

    let mut orchestrator = ProcessOrchestrator::new(&config);
    orchestrator.register(spec).unwrap();
    orchestrator.start_all().unwrap();
    let fact = await_port_file(&paths.port_file, "dns", Duration::from_secs(10)).unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    // Known name: one A answer, address as scripted.
    socket
        .send_to(&dns_query(0x0101, "foo.test"), ("127.0.0.1", fact.port))
        .unwrap();
    let mut buffer = [0u8; 512];
    let (len, _) = socket.recv_from(&mut buffer).unwrap();
    let response = &buffer[..len];
    assert_eq!(response[3] & 0x0F, 0, "expected NOERROR");
    assert_eq!(u16::from_be_bytes([response[6], response[7]]), 1);
    assert_eq!(&response[len - 4..], &[127, 0, 0, 1]);

    // Unknown name: NXDOMAIN, no synthetic address.
    socket
        .send_to(&dns_query(0x0202, "missing.test"), ("127.0.0.1", fact.port))
        .unwrap();
    let (len, _) = socket.recv_from(&mut buffer).unwrap();
    let response = &buffer[..len];
    assert_eq!(response[3] & 0x0F, 3, "expected NXDOMAIN");
    assert_eq!(u16::from_be_bytes([response[6], response[7]]), 0);

    orchestrator.stop_all().unwrap();
}

const VERIFIER_REPLAY: &str = r#"
sessions:
  - transactions:
      - client-request:
          method: GET
          url: /pong
          headers:
            fields:
              - [ uuid, issue2742, equal ]
        server-response:
          status: 200
          body: pong
          headers:
            fields:
              - [ Connection, close ]
"#;

#[test]
fn test_verifier_records_clean_run_and_violations() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    let mock = VerifierMock::new("bar", VERIFIER_REPLAY);
    let (spec, paths) = mock
        .materialize(dir.path(), &config, &std::collections::HashMap::new())
        .unwrap();

    let mut orchestrator = ProcessOrchestrator::new(&config);
    orchestrator.register(spec).unwrap();
    orchestrator.start_all().unwrap();
    let fact = await_port_file(&paths.port_file, "bar", Duration::from_secs(10)).unwrap();

    // Conforming request: scripted response, clean report.
    let response = http_exchange(
        fact.port,
        "GET /pong HTTP/1.1\r\nHost: bar.test\r\nuuid: issue2742\r\n\r\n",
    );
    assert_contains(&response, "HTTP/1.1 200 OK");
    assert_contains(&response, "pong");
    let report = VerifierReport::read_file(&paths.report).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.transactions_served, 1);

    // New connection, wrong correlation id: the response still plays
    // but the violation is recorded.
    let response = http_exchange(
        fact.port,
        "GET /pong HTTP/1.1\r\nHost: bar.test\r\nuuid: other\r\n\r\n",
    );
    assert_contains(&response, "HTTP/1.1 200 OK");
    let report = VerifierReport::read_file(&paths.report).unwrap();
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::HeaderValueMismatch);

    orchestrator.stop_all().unwrap();
}

#[test]
fn test_verifier_flags_requests_beyond_script() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    // One keep-alive transaction; the second pipelined request on the
    // same connection is beyond the script. The synthetic no-match
    // response closes the connection, so the client reads to EOF.
    let replay = r#"
sessions:
  - transactions:
      - client-request:
          method: GET
          url: /pong
        server-response:
          status: 200
          body: pong
"#;
    let mock = VerifierMock::new("bar", replay);
    let (spec, paths) = mock
        .materialize(dir.path(), &config, &std::collections::HashMap::new())
        .unwrap();

    let mut orchestrator = ProcessOrchestrator::new(&config);
    orchestrator.register(spec).unwrap();
    orchestrator.start_all().unwrap();
    let fact = await_port_file(&paths.port_file, "bar", Duration::from_secs(10)).unwrap();

    let response = http_exchange(
        fact.port,
        "GET /pong HTTP/1.1\r\nHost: bar.test\r\n\r\n\
         GET /extra HTTP/1.1\r\nHost: bar.test\r\n\r\n",
    );
    assert_contains(&response, "HTTP/1.1 200 OK");
    assert_contains(&response, "HTTP/1.1 404 Not Found");

    orchestrator.stop_all().unwrap();

    let report = VerifierReport::read_file(&paths.report).unwrap();
    assert_eq!(report.transactions_served, 1);
    assert!(
        report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::UnexpectedRequest)
    );
}
