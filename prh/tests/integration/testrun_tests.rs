//! TestRun state-machine and verdict tests.
//!
//! The proxy under test is stood in for by plain shell processes where
//! the scenario allows it; traffic-generating scenarios are guarded on
//! the tools they need.

use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use prh::{
    ConfigRecords, DnsMock, GoldExpectation, HttpMatchKey, OriginMock, ProxyUnderTest,
    ReadinessProbe, RunState, RunVerdict, ScriptedResponse, StreamSelector, TestRun, VerifierMock,
};

use crate::common::{init_test_logging, mock_binaries_built, test_config};

fn assert_port_released(port: u16) {
    assert!(
        TcpStream::connect(("127.0.0.1", port)).is_err(),
        "mock on port {port} should have been terminated"
    );
}

#[test]
fn test_passing_run_reports_passed_and_tears_down() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    let report = TestRun::new("passing_run", config)
        .origin_server(OriginMock::new("foo").add_exchange(
            HttpMatchKey::path_only("/ping"),
            ScriptedResponse::new(200).with_header("Connection", "close"),
        ))
        .client_command("/bin/sh", ["-c", "echo all good"])
        .gold(StreamSelector::Stdout, GoldExpectation::contains("all good"))
        .run();

    assert_eq!(report.verdict, RunVerdict::Passed);
    assert_eq!(
        report.states,
        vec![
            RunState::Configuring,
            RunState::Starting,
            RunState::Executing,
            RunState::Verifying,
            RunState::TearingDown,
        ]
    );

    let port = report.mock_port("foo").expect("origin port");
    assert_port_released(port);
}

#[test]
fn test_wrong_exit_code_is_failed_and_mocks_still_die() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    let report = TestRun::new("wrong_exit", config)
        .origin_server(OriginMock::new("foo").add_exchange(
            HttpMatchKey::path_only("/ping"),
            ScriptedResponse::new(200),
        ))
        .client_command("/bin/sh", ["-c", "exit 3"])
        .run();

    match &report.verdict {
        RunVerdict::Failed(failures) => {
            assert!(failures.iter().any(|f| f.contains("exit code")));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    // Teardown is unconditional.
    assert!(report.states.contains(&RunState::TearingDown));
    let port = report.mock_port("foo").expect("origin port");
    assert_port_released(port);
}

#[test]
fn test_gold_mismatch_carries_nonempty_diff() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let report = TestRun::new("gold_mismatch", config)
        .client_command("/bin/sh", ["-c", "echo actual output"])
        .gold(
            StreamSelector::Stdout,
            GoldExpectation::literal("expected output\n"),
        )
        .run();

    match &report.verdict {
        RunVerdict::Failed(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("gold mismatch on stdout"));
            assert!(failures[0].contains("expected output"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[test]
fn test_liveness_assertion_passes_for_surviving_proxy() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let marker = dir.path().join("proxy.started");
    let report = TestRun::new("liveness_pass", config)
        .proxy(
            ProxyUnderTest::new("proxy", "/bin/sh")
                .arg("-c")
                .arg(format!("echo started > {}; sleep 30", marker.display()))
                .readiness(ReadinessProbe::LogLine {
                    path: marker.clone(),
                    needle: "started".to_string(),
                }),
        )
        .client_command("/bin/sh", ["-c", "true"])
        .still_running_after("proxy")
        .run();

    assert_eq!(report.verdict, RunVerdict::Passed);
}

#[test]
fn test_liveness_violation_fails_even_with_clean_exit_code() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let marker = dir.path().join("proxy.started");
    let report = TestRun::new("liveness_fail", config)
        .proxy(
            ProxyUnderTest::new("proxy", "/bin/sh")
                .arg("-c")
                .arg(format!("echo started > {}; sleep 0.2", marker.display()))
                .readiness(ReadinessProbe::LogLine {
                    path: marker.clone(),
                    needle: "started".to_string(),
                }),
        )
        // The client succeeds and takes long enough for the proxy to be
        // gone by checkpoint time.
        .client_command("/bin/sh", ["-c", "sleep 0.5"])
        .still_running_after("proxy")
        .run();

    match &report.verdict {
        RunVerdict::Failed(failures) => {
            assert!(failures.iter().any(|f| f.contains("liveness violation")));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[test]
fn test_unresolved_replay_placeholder_is_error_before_startup() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let replay = r#"
sessions:
  - transactions:
      - client-request:
          method: GET
          url: /pong
        server-response:
          status: 200
          headers:
            fields:
              - [ x-upstream, "127.0.0.1:{missing_port}" ]
"#;

    let report = TestRun::new("unresolved_placeholder", config)
        .verifier_server(VerifierMock::new("bar", replay))
        .client_command("/bin/sh", ["-c", "true"])
        .run();

    match &report.verdict {
        RunVerdict::Error(cause) => assert!(cause.contains("missing_port")),
        other => panic!("expected Error, got {other:?}"),
    }
    // The verifier never started: no port fact was ever published.
    assert!(report.mock_port("bar").is_none());
    assert!(report.states.contains(&RunState::TearingDown));
}

#[test]
fn test_client_timeout_is_harness_error() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path()).with_command_timeout(Duration::from_millis(300));

    let report = TestRun::new("client_timeout", config)
        .client_command("/bin/sh", ["-c", "sleep 30"])
        .run();

    match &report.verdict {
        RunVerdict::Error(cause) => assert!(cause.contains("client command")),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(report.states.contains(&RunState::TearingDown));
}

#[test]
fn test_proxy_config_substitutes_late_bound_dns_port() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    let mut records = ConfigRecords::new();
    records
        .set("proxy.config.dns.nameservers", "127.0.0.1:{dns_port}")
        .set("proxy.config.dns.resolv_conf", "NULL");

    let report = TestRun::new("config_substitution", config)
        .dns_server(DnsMock::new("dns").add_record("foo.test", &[std::net::Ipv4Addr::LOCALHOST]))
        .proxy(
            ProxyUnderTest::new("proxy", "/bin/sh")
                .arg("-c")
                .arg("sleep 30")
                .records(records),
        )
        // The client inspects the rendered artifact the proxy was given.
        .client_command("/bin/sh", ["-c", "cat proxy/records.config"])
        .gold(
            StreamSelector::Stdout,
            GoldExpectation::matches(r"proxy\.config\.dns\.nameservers 127\.0\.0\.1:\d+").unwrap(),
        )
        .gold(
            StreamSelector::Stdout,
            GoldExpectation::not_contains("{dns_port}"),
        )
        .run();

    assert_eq!(report.verdict, RunVerdict::Passed);
    let dns_port = report.mock_port("dns").expect("dns port");
    let stdout = &report.client.as_ref().unwrap().stdout;
    assert!(stdout.contains(&format!("127.0.0.1:{dns_port}")));
}

#[test]
fn test_full_traffic_run_with_redirect_gold() {
    init_test_logging();
    if !Path::new("/bin/bash").exists() {
        eprintln!("skipping: /bin/bash not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    if !mock_binaries_built(&config) {
        return;
    }

    // A client that speaks one HTTP exchange over /dev/tcp stands in
    // for curl; the redirect target port comes from the run context.
    let script = "exec 3<>/dev/tcp/127.0.0.1/{foo_port}; \
                  printf 'GET /ping HTTP/1.1\\r\\nHost: foo.test\\r\\nuuid: run-42\\r\\nConnection: close\\r\\n\\r\\n' >&3; \
                  cat <&3";

    let report = TestRun::new("traffic_run", config)
        .origin_server(OriginMock::new("foo").add_exchange(
            HttpMatchKey::host_path("foo.test", "/ping"),
            ScriptedResponse::new(302)
                .with_reason("Found")
                .with_header("Location", "http://bar.test/pong")
                .with_header("Connection", "close"),
        ))
        .client_command("/bin/bash", ["-c", script])
        .gold(
            StreamSelector::Stdout,
            GoldExpectation::contains("HTTP/1.1 302 Found"),
        )
        .gold(
            StreamSelector::Stdout,
            GoldExpectation::contains("Location: http://bar.test/pong"),
        )
        .run();

    assert_eq!(report.verdict, RunVerdict::Passed);

    // The exchange is in the origin's session log, correlated.
    let records = report.session_log("foo").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].uuid.as_deref(), Some("run-42"));
    assert_eq!(records[0].response_status, 302);
}
