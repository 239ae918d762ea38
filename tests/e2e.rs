//! End-to-end tests against an in-process mock MOO server
//!
//! These drive the full stack: suite loading, session login, the step
//! executor, the codec, and expectation matching, over a real TCP
//! socket.

mod support;

use std::time::Instant;

use moo_conformance::common::config::HarnessConfig;
use moo_conformance::protocol::session::Session;
use moo_conformance::runner::report::{SuiteReport, TestOutcome};
use moo_conformance::runner::{SideChannels, SuiteRunner};
use moo_conformance::suite::loader;

use support::{rule, MockMoo, Rule};

async fn run_yaml(mock: &MockMoo, yaml: &str, side: SideChannels) -> SuiteReport {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.yaml");
    std::fs::write(&path, yaml).unwrap();
    let suite = loader::load_suite(&path).unwrap();

    let mut config = HarnessConfig::default();
    config.target.host = mock.host();
    config.target.port = mock.port();

    let session = Session::connect(&config, "wizard").await.unwrap();
    let mut runner = SuiteRunner::new(session, config, side);
    let report = runner.run_suite(&suite).await.unwrap();
    runner.into_session().close();
    report
}

fn outcome_of<'a>(report: &'a SuiteReport, name: &str) -> &'a TestOutcome {
    &report
        .tests
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("no test named {name}"))
        .outcome
}

async fn start_mock(rules: Vec<Rule>) -> MockMoo {
    MockMoo::start(rules).await
}

#[tokio::test]
async fn test_eval_error_expectations() {
    let mock = start_mock(vec![rule("1 / 0", &["=> E_DIV"])]).await;
    let report = run_yaml(
        &mock,
        r#"
name: arithmetic
tests:
  - name: expected_error_passes
    permission: wizard
    code: "1 / 0"
    expect:
      error: E_DIV
  - name: wrong_value_fails
    permission: wizard
    code: "1 / 0"
    expect:
      value: 0
"#,
        SideChannels::default(),
    )
    .await;

    assert_eq!(outcome_of(&report, "expected_error_passes"), &TestOutcome::Passed);
    assert_eq!(outcome_of(&report, "wrong_value_fails"), &TestOutcome::Failed);

    let failed = report.tests.iter().find(|t| t.failed()).unwrap();
    assert_eq!(failed.diagnostics.len(), 1);
    assert!(failed.diagnostics[0].message.contains("E_DIV"));
}

#[tokio::test]
async fn test_capture_substitutes_object_literal_verbatim() {
    let mock = start_mock(vec![
        rule("create($nothing)", &["=> #128"]),
        rule("valid(#128)", &["=> 1"]),
    ])
    .await;
    let report = run_yaml(
        &mock,
        r#"
name: lifecycle
tests:
  - name: create_and_check
    permission: wizard
    steps:
      - run: "create($nothing)"
        capture: obj
      - run: "valid({obj})"
        expect:
          value: 1
    cleanup:
      - run: "recycle({obj})"
"#,
        SideChannels::default(),
    )
    .await;

    assert_eq!(outcome_of(&report, "create_and_check"), &TestOutcome::Passed);
    // the placeholder expanded to the bare object literal, not a string
    assert_eq!(mock.count_containing("; return valid(#128);"), 1);
    assert_eq!(mock.count_containing("; return recycle(#128);"), 1);
}

#[tokio::test]
async fn test_failure_skips_remaining_steps_and_cleanup_runs_once() {
    let mock = start_mock(vec![rule("explode()", &["=> E_INVARG"])]).await;
    let report = run_yaml(
        &mock,
        r#"
name: ordering
tests:
  - name: fail_fast
    permission: wizard
    steps:
      - run: "explode()"
        expect:
          value: 1
      - run: "never_runs()"
      - run: "never_runs_either()"
    cleanup:
      - run: "cleanup_marker()"
"#,
        SideChannels::default(),
    )
    .await;

    let test = &report.tests[0];
    assert!(test.failed());
    assert_eq!(test.steps_run, 0);
    assert_eq!(test.steps_total, 3);
    assert_eq!(mock.count_containing("never_runs"), 0);
    assert_eq!(mock.count_containing("cleanup_marker"), 1);
}

#[tokio::test]
async fn test_wait_blocks_without_protocol_traffic() {
    let mock = start_mock(vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.yaml");
    std::fs::write(
        &path,
        r#"
name: timing
tests:
  - name: wait_half_second
    permission: wizard
    steps:
      - wait: 500
"#,
    )
    .unwrap();
    let suite = loader::load_suite(&path).unwrap();

    let mut config = HarnessConfig::default();
    config.target.host = mock.host();
    config.target.port = mock.port();
    let session = Session::connect(&config, "wizard").await.unwrap();
    let mut runner = SuiteRunner::new(session, config, SideChannels::default());

    // time only the run itself, not the login handshake
    let started = Instant::now();
    let report = runner.run_suite(&suite).await.unwrap();
    let elapsed = started.elapsed();
    runner.into_session().close();

    assert_eq!(outcome_of(&report, "wait_half_second"), &TestOutcome::Passed);
    assert!(elapsed.as_millis() >= 500, "waited only {elapsed:?}");
    assert!(elapsed.as_millis() < 700, "waited too long: {elapsed:?}");
    // the only line the server ever saw is the login
    assert_eq!(mock.received(), vec!["connect Wizard".to_string()]);
}

#[tokio::test]
async fn test_reporter_verb_command_output() {
    let mock = start_mock(vec![
        rule("add_verb", &["=> {}"]),
        rule(
            "put ball in box",
            &[
                "VERB:put",
                "ARGSTR:ball in box",
                "DOBJSTR:ball",
                "PREPSTR:in",
                "IOBJSTR:box",
            ],
        ),
    ])
    .await;
    let report = run_yaml(
        &mock,
        r##"
name: command_dispatch
tests:
  - name: parser_reports_parts
    permission: wizard
    steps:
      - verb_setup:
          object: "#100"
          name: report
          args: [any, in, any]
          code: |
            notify(player, "VERB:" + verb);
            notify(player, "ARGSTR:" + argstr);
      - command: "put ball in box"
        expect:
          output:
            - "VERB:put"
            - "ARGSTR:ball in box"
            - "DOBJSTR:ball"
            - "PREPSTR:in"
            - "IOBJSTR:box"
"##,
        SideChannels::default(),
    )
    .await;

    assert_eq!(outcome_of(&report, "parser_reports_parts"), &TestOutcome::Passed);
    // the command went through the parser, not the eval escape
    assert_eq!(mock.count_containing("; put ball in box"), 0);
    assert_eq!(mock.count_containing("put ball in box"), 1);
}

#[tokio::test]
async fn test_assert_log_fails_when_marker_absent() {
    let mock = start_mock(vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("server.log");
    std::fs::write(&log, "boot noise\n").unwrap();

    let report = run_yaml(
        &mock,
        r#"
name: logs
tests:
  - name: marker_missing
    permission: wizard
    steps:
      - assert_log:
          contains: MARKER
"#,
        SideChannels {
            server_dir: None,
            log_file: Some(log),
        },
    )
    .await;

    assert_eq!(outcome_of(&report, "marker_missing"), &TestOutcome::Failed);
}

#[tokio::test]
async fn test_assert_log_skips_when_unconfigured() {
    let mock = start_mock(vec![]).await;
    let report = run_yaml(
        &mock,
        r#"
name: logs
tests:
  - name: no_log_configured
    permission: wizard
    steps:
      - assert_log:
          contains: MARKER
"#,
        SideChannels::default(),
    )
    .await;

    match outcome_of(&report, "no_log_configured") {
        TestOutcome::Skipped { reason } => assert!(reason.contains("log_file")),
        other => panic!("expected skip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_write_file_then_assert_log_scoped_to_test_start() {
    let mock = start_mock(vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let side = SideChannels {
        server_dir: Some(dir.path().to_path_buf()),
        log_file: Some(dir.path().join("server.log")),
    };

    let report = run_yaml(
        &mock,
        r#"
name: logs
tests:
  - name: sees_fresh_marker
    permission: wizard
    steps:
      - write_file:
          path: server.log
          content: "task MARKER finished\n"
      - assert_log:
          contains: MARKER
      - assert_file:
          path: server.log
          contains: finished
"#,
        side,
    )
    .await;

    assert_eq!(outcome_of(&report, "sees_fresh_marker"), &TestOutcome::Passed);
}

#[tokio::test]
async fn test_write_file_rejects_traversal() {
    let mock = start_mock(vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let side = SideChannels {
        server_dir: Some(dir.path().to_path_buf()),
        log_file: None,
    };

    let report = run_yaml(
        &mock,
        r#"
name: sandbox
tests:
  - name: escape_attempt
    permission: wizard
    steps:
      - write_file:
          path: "../escape.txt"
          content: "nope"
"#,
        side,
    )
    .await;

    let test = &report.tests[0];
    assert!(test.failed());
    assert!(test.diagnostics[0].message.contains("escapes"));
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn test_named_connection_lifecycle() {
    let mock = start_mock(vec![]).await;
    let report = run_yaml(
        &mock,
        r#"
name: connections
tests:
  - name: raw_login_flow
    permission: wizard
    steps:
      - new_connection: lifecycle
      - send:
          text: "connect Wizard"
          connection: lifecycle
        expect:
          output:
            contains: Connected
      - close_connection: lifecycle
  - name: closing_unknown_fails
    permission: wizard
    steps:
      - close_connection: ghost
"#,
        SideChannels::default(),
    )
    .await;

    assert_eq!(outcome_of(&report, "raw_login_flow"), &TestOutcome::Passed);

    let failed = report
        .tests
        .iter()
        .find(|t| t.name == "closing_unknown_fails")
        .unwrap();
    assert!(failed.failed());
    assert!(failed.diagnostics[0].message.contains("Unknown connection 'ghost'"));
}

#[tokio::test]
async fn test_failed_provider_skips_consumer() {
    let mock = start_mock(vec![rule("broken_fork()", &["=> E_INVARG"])]).await;
    let report = run_yaml(
        &mock,
        r#"
name: capabilities
tests:
  - name: fork_consumer
    permission: wizard
    assumes: fork
    code: "1"
  - name: fork_provider
    permission: wizard
    provides: fork
    code: "broken_fork()"
    expect:
      value: 1
"#,
        SideChannels::default(),
    )
    .await;

    // provider runs first despite declaration order
    assert_eq!(report.tests[0].name, "fork_provider");
    assert!(report.tests[0].failed());

    match outcome_of(&report, "fork_consumer") {
        TestOutcome::Skipped { reason } => assert!(reason.contains("failed verification")),
        other => panic!("expected skip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_requires_config_skips_suite() {
    let mock = start_mock(vec![]).await;
    let report = run_yaml(
        &mock,
        r#"
name: file_suite
requires:
  config: [server_dir]
tests:
  - name: needs_files
    permission: wizard
    code: "1"
"#,
        SideChannels::default(),
    )
    .await;

    match outcome_of(&report, "needs_files") {
        TestOutcome::Skipped { reason } => assert!(reason.contains("server_dir")),
        other => panic!("expected skip, got {other:?}"),
    }
    // the skip happened before any test traffic; only the login reached
    // the server
    assert_eq!(mock.received(), vec!["connect Wizard".to_string()]);
}

#[tokio::test]
async fn test_requires_missing_builtin_skips_suite() {
    let mock = start_mock(vec![rule("function_info(\"frobnicate\")", &["E_INVARG"])]).await;
    let report = run_yaml(
        &mock,
        r#"
name: builtins
requires:
  builtins: [frobnicate]
tests:
  - name: uses_frobnicate
    permission: wizard
    code: "frobnicate()"
"#,
        SideChannels::default(),
    )
    .await;

    match outcome_of(&report, "uses_frobnicate") {
        TestOutcome::Skipped { reason } => assert!(reason.contains("frobnicate")),
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(mock.count_containing("; return frobnicate()"), 0);
}

#[tokio::test]
async fn test_suite_setup_runs_once_and_ignores_errors() {
    let mock = start_mock(vec![rule("add_property", &["E_INVARG"])]).await;
    let report = run_yaml(
        &mock,
        r#"
name: with_setup
setup:
  permission: wizard
  code: |
    add_property(#0, "marker", 0, {#0, "rc"});
tests:
  - name: first
    permission: wizard
    code: "1"
  - name: second
    permission: wizard
    code: "2"
"#,
        SideChannels::default(),
    )
    .await;

    assert!(report.tests.iter().all(|t| t.passed()));
    assert_eq!(mock.count_containing("add_property"), 1);
}
