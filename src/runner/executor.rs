//! Test execution engine
//!
//! Runs suites against a live session. Each test walks the
//! `Setup -> Running -> Cleanup -> Done` state machine: a step failure
//! jumps straight to Cleanup, skipping the remaining main steps, but
//! cleanup always runs to completion and its failures accumulate as
//! secondary diagnostics instead of overwriting the primary one.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use tracing::debug;

use crate::common::config::HarnessConfig;
use crate::common::{Error, Result};
use crate::protocol::codec::Reply;
use crate::protocol::session::Session;
use crate::runner::capabilities::{CapabilityManager, SkipCondition};
use crate::runner::matcher;
use crate::runner::report::{Diagnostic, SuiteReport, TestOutcome, TestReport};
use crate::runner::subst::{substitute, VariableStore};
use crate::suite::schema::{
    FileAssert, LogAssert, Requirements, StepAction, TestCase, TestStep, TestSuite, VerbSetup,
    WriteFileSpec,
};

/// Filesystem side channels: the target's working directory and log
/// file. Both optional; steps that need a missing one skip their test
/// with a diagnostic naming the option.
#[derive(Debug, Default, Clone)]
pub struct SideChannels {
    pub server_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

/// Runs suites one after another against a single session
pub struct SuiteRunner {
    session: Session,
    config: HarnessConfig,
    side: SideChannels,
    caps: CapabilityManager,
    builtin_probes: HashMap<String, bool>,
    server_version: Option<Option<semver::Version>>,
    /// Log length recorded when the current test started
    log_offset: u64,
}

impl SuiteRunner {
    pub fn new(session: Session, config: HarnessConfig, side: SideChannels) -> Self {
        Self {
            session,
            config,
            side,
            caps: CapabilityManager::new(),
            builtin_probes: HashMap::new(),
            server_version: None,
            log_offset: 0,
        }
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Run the configured bootstrap statements once, before any suite.
    /// Failures other than connection loss are ignored; the statements
    /// typically add properties that may already exist.
    pub async fn bootstrap(&mut self) -> Result<()> {
        let statements = self.config.bootstrap.clone();
        for line in statements {
            if let Err(e) = self.session.eval(&line).await {
                if e.is_fatal() {
                    return Err(e);
                }
                debug!("bootstrap statement failed (ignored): {e}");
            }
        }
        Ok(())
    }

    /// Run one suite: requirement checks, setup once, tests in
    /// provider-first order, teardown always.
    pub async fn run_suite(&mut self, suite: &TestSuite) -> Result<SuiteReport> {
        println!(
            "\n{} {}",
            "Suite:".blue().bold(),
            suite.name.white().bold()
        );
        let mut report = SuiteReport::new(&suite.name);

        if suite.skip.is_set() {
            let reason = suite
                .skip
                .reason()
                .unwrap_or("skipped in suite definition")
                .to_string();
            for test in &suite.tests {
                let skipped = self.report_skip(test, reason.clone());
                print_test_line(&skipped);
                report.tests.push(skipped);
            }
            return Ok(report);
        }

        if let Some(reason) = self.check_requirements(&suite.requires).await? {
            for test in &suite.tests {
                let skipped = self.report_skip(test, reason.clone());
                print_test_line(&skipped);
                report.tests.push(skipped);
            }
            return Ok(report);
        }

        for test in &suite.tests {
            if let Some(cap) = test.provides.as_deref().or(suite.provides.as_deref()) {
                self.caps
                    .register_provider(cap, &format!("{}::{}", suite.name, test.name));
            }
        }

        if let Some(setup) = &suite.setup {
            self.session.switch_identity(setup.permission()).await?;
            // setup statements run individually with errors ignored;
            // add_property on an existing property is fine
            for line in setup.code_lines() {
                if let Err(e) = self.session.eval(&line).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    debug!("suite setup statement failed (ignored): {e}");
                }
            }
        }

        for test in order_tests(suite) {
            let result = self.run_test(suite, test).await;
            self.record_capability(suite, test, &result);
            print_test_line(&result);
            report.tests.push(result);
        }

        if let Some(teardown) = &suite.teardown {
            let _ = self.session.switch_identity(teardown.permission()).await;
            for line in teardown.code_lines() {
                if let Err(e) = self.session.eval(&line).await {
                    debug!("suite teardown statement failed (ignored): {e}");
                }
            }
        }

        Ok(report)
    }

    /// Run a single test through the step state machine
    pub async fn run_test(&mut self, suite: &TestSuite, test: &TestCase) -> TestReport {
        // Skip checks run before any network traffic for this test
        if test.skip.is_set() {
            let reason = test
                .skip
                .reason()
                .unwrap_or("skipped in suite definition")
                .to_string();
            return self.report_skip(test, reason);
        }
        if let Some(condition) = &test.skip_if {
            match self.evaluate_skip_if(condition).await {
                Ok(Some(reason)) => return self.report_skip(test, reason),
                Ok(None) => {}
                Err(e) => return self.report_error(test, e),
            }
        }
        let assumes = if test.assumes.is_empty() {
            suite.assumes.as_vec()
        } else {
            test.assumes.as_vec()
        };
        if let Err(reason) = self.caps.can_run(&assumes) {
            return self.report_skip(test, reason);
        }

        let (steps, cleanup) = match materialize_steps(test) {
            Ok(pair) => pair,
            Err(message) => return self.report_error(test, Error::InvalidStep(message)),
        };
        let steps_total = steps.len();

        self.log_offset = self.current_log_len();

        if let Err(e) = self.session.switch_identity(&test.permission).await {
            return self.report_error(test, e);
        }

        let mut vars = VariableStore::new();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut outcome = TestOutcome::Passed;
        let mut steps_run = 0usize;

        // Running: strictly in declared order; first failure jumps to
        // Cleanup and the remaining steps never execute
        for (i, step) in steps.iter().enumerate() {
            match self.execute_step(step, &mut vars).await {
                Ok(()) => steps_run += 1,
                Err(e) if e.is_skip() => {
                    outcome = TestOutcome::Skipped {
                        reason: e.to_string(),
                    };
                    break;
                }
                Err(e) => {
                    outcome = TestOutcome::Failed;
                    diagnostics.push(Diagnostic {
                        context: format!("step {}: {}", i + 1, step.describe()),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        // Cleanup: always runs to completion; failures are collected,
        // never escalated
        for (i, step) in cleanup.iter().enumerate() {
            if let Err(e) = self.execute_step(step, &mut vars).await {
                diagnostics.push(Diagnostic {
                    context: format!("cleanup {}: {}", i + 1, step.describe()),
                    message: e.to_string(),
                });
            }
        }
        self.session.close_named();
        if let Err(e) = self.session.ensure_primary().await {
            diagnostics.push(Diagnostic {
                context: "session".to_string(),
                message: e.to_string(),
            });
        }

        TestReport {
            name: test.name.clone(),
            outcome,
            steps_run,
            steps_total,
            diagnostics,
        }
    }

    /// Execute one step against the session and variable store
    async fn execute_step(&mut self, step: &TestStep, vars: &mut VariableStore) -> Result<()> {
        if let Some(identity) = &step.acting {
            self.session.switch_identity(identity).await?;
        }

        let action = step.action().map_err(Error::InvalidStep)?;
        match action {
            StepAction::Run(code) => {
                let code = substitute(code, vars)?;
                let code = if step.verbatim {
                    code
                } else {
                    wrap_expression(&code)
                };
                let reply = self.session.eval(&code).await?;
                self.finish_value_step(step, reply, vars)
            }
            StepAction::VerbSetup(vs) => {
                let code = verb_setup_code(vs, vars)?;
                let reply = self.session.eval(&code).await?;
                self.finish_value_step(step, reply, vars)
            }
            StepAction::Command(text) => {
                let text = substitute(text, vars)?;
                let lines = self.session.command(&text).await?;
                self.finish_output_step(step, lines, vars)
            }
            StepAction::Send(spec) => {
                let text = substitute(&spec.text, vars)?;
                let lines = self.session.send_on(&spec.connection, &text).await?;
                self.finish_output_step(step, lines, vars)
            }
            StepAction::NewConnection(nc) => {
                self.session
                    .open_connection(nc.capture_name(), nc.identity())
                    .await
            }
            StepAction::CloseConnection(name) => {
                let name = substitute(name, vars)?;
                self.session.close_connection(Some(&name))
            }
            StepAction::Wait(ms) => {
                // cooperative pause; no traffic on any connection
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            StepAction::AssertLog(assert) => self.assert_log(assert, vars),
            StepAction::AssertFile(assert) => self.assert_file(assert, vars),
            StepAction::WriteFile(spec) => self.write_file(spec, vars),
        }
    }

    fn finish_value_step(
        &mut self,
        step: &TestStep,
        reply: Reply,
        vars: &mut VariableStore,
    ) -> Result<()> {
        if let Some(name) = &step.capture {
            vars.insert(name, reply.capture_value());
        }
        if let Some(expect) = &step.expect {
            matcher::verify_reply(expect, &reply)
                .map_err(|m| Error::Assertion(m.to_string()))?;
        }
        Ok(())
    }

    fn finish_output_step(
        &mut self,
        step: &TestStep,
        lines: Vec<String>,
        vars: &mut VariableStore,
    ) -> Result<()> {
        let reply = Reply::CommandOutput(lines);
        if let Some(name) = &step.capture {
            vars.insert(name, reply.capture_value());
        }
        if let Some(expect) = &step.expect {
            matcher::verify_reply(expect, &reply)
                .map_err(|m| Error::Assertion(m.to_string()))?;
        }
        Ok(())
    }

    /// Check the server log appended since this test started
    fn assert_log(&self, assert: &LogAssert, vars: &VariableStore) -> Result<()> {
        let Some(log_file) = &self.side.log_file else {
            return Err(Error::Skipped(
                "assert_log requires the log_file option".to_string(),
            ));
        };
        let content = std::fs::read(log_file).map_err(|e| Error::FileRead {
            path: log_file.display().to_string(),
            error: e.to_string(),
        })?;
        let offset = (self.log_offset as usize).min(content.len());
        let region = String::from_utf8_lossy(&content[offset..]);

        if let Some(needle) = &assert.contains {
            let needle = substitute(needle, vars)?;
            if !region.contains(&needle) {
                return Err(Error::Assertion(format!(
                    "[log] expected log to contain {needle:?} since test start, got {:?}",
                    region.as_ref()
                )));
            }
        }
        if let Some(pattern) = &assert.pattern {
            let re = regex::Regex::new(pattern)
                .map_err(|e| Error::InvalidStep(format!("bad assert_log pattern: {e}")))?;
            if !re.is_match(&region) {
                return Err(Error::Assertion(format!(
                    "[log] expected log matching /{pattern}/ since test start, got {:?}",
                    region.as_ref()
                )));
            }
        }
        Ok(())
    }

    fn assert_file(&self, assert: &FileAssert, vars: &VariableStore) -> Result<()> {
        let Some(server_dir) = &self.side.server_dir else {
            return Err(Error::Skipped(
                "assert_file requires the server_dir option".to_string(),
            ));
        };
        let rel = substitute(&assert.path, vars)?;
        let path = sandboxed_path(server_dir, &rel)?;

        let should_exist = assert.exists.unwrap_or(true);
        if !should_exist {
            if path.exists() {
                return Err(Error::Assertion(format!(
                    "[file] expected {rel:?} to not exist, but it does"
                )));
            }
            return Ok(());
        }
        if !path.exists() {
            return Err(Error::Assertion(format!(
                "[file] expected {rel:?} to exist under the server directory"
            )));
        }

        if assert.contains.is_some() || assert.pattern.is_some() {
            let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
            if let Some(needle) = &assert.contains {
                let needle = substitute(needle, vars)?;
                if !content.contains(&needle) {
                    return Err(Error::Assertion(format!(
                        "[file] expected {rel:?} to contain {needle:?}"
                    )));
                }
            }
            if let Some(pattern) = &assert.pattern {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| Error::InvalidStep(format!("bad assert_file pattern: {e}")))?;
                if !re.is_match(&content) {
                    return Err(Error::Assertion(format!(
                        "[file] expected {rel:?} to match /{pattern}/"
                    )));
                }
            }
        }
        Ok(())
    }

    fn write_file(&self, spec: &WriteFileSpec, vars: &VariableStore) -> Result<()> {
        let Some(server_dir) = &self.side.server_dir else {
            return Err(Error::Skipped(
                "write_file requires the server_dir option".to_string(),
            ));
        };
        let rel = substitute(&spec.path, vars)?;
        let path = sandboxed_path(server_dir, &rel)?;
        let content = substitute(&spec.content, vars)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(())
    }

    async fn evaluate_skip_if(&mut self, condition: &str) -> Result<Option<String>> {
        let condition = SkipCondition::parse(condition).map_err(Error::InvalidStep)?;
        let triggered = match &condition {
            SkipCondition::Feature(name) => self.config.has_feature(name),
            SkipCondition::NotFeature(name) => !self.config.has_feature(name),
            SkipCondition::MissingBuiltin(name) => !self.probe_builtin(name).await?,
        };
        Ok(triggered.then(|| condition.reason()))
    }

    async fn check_requirements(&mut self, requires: &Requirements) -> Result<Option<String>> {
        if requires.is_empty() {
            return Ok(None);
        }
        for feature in &requires.features {
            if !self.config.has_feature(feature) {
                return Ok(Some(format!("requires feature '{feature}'")));
            }
        }
        for key in &requires.config {
            let present = match key.as_str() {
                "server_dir" => self.side.server_dir.is_some(),
                "log_file" => self.side.log_file.is_some(),
                other => {
                    return Ok(Some(format!("unknown config requirement '{other}'")));
                }
            };
            if !present {
                return Ok(Some(format!("requires the {key} option")));
            }
        }
        for builtin in &requires.builtins {
            if !self.probe_builtin(builtin).await? {
                return Ok(Some(format!("requires builtin '{builtin}'")));
            }
        }
        if let Some(min) = &requires.min_version {
            let min = semver::Version::parse(min)
                .map_err(|e| Error::Config(format!("bad requires.min_version {min:?}: {e}")))?;
            match self.probe_server_version().await? {
                Some(actual) if actual >= min => {}
                Some(actual) => {
                    return Ok(Some(format!(
                        "requires server >= {min}, found {actual}"
                    )));
                }
                None => {
                    return Ok(Some(format!(
                        "requires server >= {min}, version unavailable"
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Probe once whether the server implements a builtin
    async fn probe_builtin(&mut self, name: &str) -> Result<bool> {
        if let Some(known) = self.builtin_probes.get(name) {
            return Ok(*known);
        }
        let reply = self
            .session
            .eval(&format!("return function_info(\"{name}\");"))
            .await?;
        let present = matches!(reply, Reply::EvalOk(_));
        self.builtin_probes.insert(name.to_string(), present);
        Ok(present)
    }

    async fn probe_server_version(&mut self) -> Result<Option<semver::Version>> {
        if let Some(cached) = &self.server_version {
            return Ok(cached.clone());
        }
        let reply = self.session.eval("return server_version();").await?;
        let version = match reply {
            Reply::EvalOk(crate::protocol::value::MooValue::Str(s)) => parse_version(&s),
            _ => None,
        };
        self.server_version = Some(version.clone());
        Ok(version)
    }

    fn current_log_len(&self) -> u64 {
        self.side
            .log_file
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn report_skip(&self, test: &TestCase, reason: String) -> TestReport {
        TestReport {
            name: test.name.clone(),
            outcome: TestOutcome::Skipped { reason },
            steps_run: 0,
            steps_total: 0,
            diagnostics: Vec::new(),
        }
    }

    fn report_error(&self, test: &TestCase, error: Error) -> TestReport {
        TestReport {
            name: test.name.clone(),
            outcome: TestOutcome::Failed,
            steps_run: 0,
            steps_total: 0,
            diagnostics: vec![Diagnostic {
                context: "setup".to_string(),
                message: error.to_string(),
            }],
        }
    }

    fn record_capability(&mut self, suite: &TestSuite, test: &TestCase, report: &TestReport) {
        let Some(cap) = test.provides.as_deref().or(suite.provides.as_deref()) else {
            return;
        };
        let test_id = format!("{}::{}", suite.name, test.name);
        match report.outcome {
            TestOutcome::Passed => self.caps.mark_passed(cap, &test_id),
            TestOutcome::Failed => self.caps.mark_failed(cap, &test_id),
            TestOutcome::Skipped { .. } => {}
        }
    }
}

/// Providers run first, consumers last, everything else in between,
/// each group in declared order
fn order_tests(suite: &TestSuite) -> Vec<&TestCase> {
    let mut providers = Vec::new();
    let mut normal = Vec::new();
    let mut consumers = Vec::new();
    for test in &suite.tests {
        if test.provides.is_some() || suite.provides.is_some() {
            providers.push(test);
        } else if !test.assumes.is_empty() || !suite.assumes.is_empty() {
            consumers.push(test);
        } else {
            normal.push(test);
        }
    }
    providers.into_iter().chain(normal).chain(consumers).collect()
}

/// Turn a test into its main and cleanup step lists. Single-action
/// tests become one synthesized run step (setup lines folded in so
/// captured MOO variables stay in scope) plus teardown cleanup steps.
fn materialize_steps(test: &TestCase) -> std::result::Result<(Vec<TestStep>, Vec<TestStep>), String> {
    if test.has_steps() {
        let mut cleanup = test.cleanup.clone();
        if let Some(teardown) = &test.teardown {
            cleanup.extend(teardown.code_lines().into_iter().map(run_step));
        }
        return Ok((test.steps.clone(), cleanup));
    }

    let mut code_parts = Vec::new();
    if let Some(setup) = &test.setup {
        code_parts.extend(setup.code_lines());
    }
    code_parts.push(test.action_code()?);

    let step = TestStep {
        run: Some(code_parts.join("\n")),
        expect: test.expect.clone(),
        verbatim: true,
        ..Default::default()
    };

    let mut cleanup: Vec<TestStep> = test.cleanup.clone();
    if let Some(teardown) = &test.teardown {
        cleanup.extend(teardown.code_lines().into_iter().map(run_step));
    }
    Ok((vec![step], cleanup))
}

fn run_step(code: String) -> TestStep {
    TestStep {
        run: Some(code),
        verbatim: true,
        ..Default::default()
    }
}

/// Wrap a bare expression as `return <expr>;` so its value comes back.
/// Code that already returns, or that starts with a statement keyword,
/// is left as written.
fn wrap_expression(code: &str) -> String {
    let stripped = code.trim();
    let has_return = stripped.starts_with("return") || stripped.contains("return ");
    let is_statement = ["if", "for", "while", "try", "fork"]
        .iter()
        .any(|kw| stripped.starts_with(kw));
    if has_return || is_statement {
        return stripped.to_string();
    }
    format!("return {};", stripped.trim_end_matches(';'))
}

/// Expand a declarative verb_setup into the server's native calls.
/// add_verb and set_verb_code go in one statement since the server
/// keeps no variable scope between evals.
fn verb_setup_code(vs: &VerbSetup, vars: &VariableStore) -> Result<String> {
    let object = substitute(&vs.object, vars)?;
    let args = vs
        .args
        .iter()
        .map(|a| format!("\"{a}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let code_list = vs
        .code
        .lines()
        .map(|line| {
            let escaped = line.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        })
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "add_verb({object}, {{player, \"xd\", \"{name}\"}}, {{{args}}}); \
         return set_verb_code({object}, \"{name}\", {{{code_list}}});",
        name = vs.name,
    ))
}

/// Resolve a suite-relative path inside the server directory. Absolute
/// paths and any `..` component are rejected before touching the
/// filesystem.
fn sandboxed_path(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(Error::SandboxEscape(rel.to_string()));
    }
    for component in rel_path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(Error::SandboxEscape(rel.to_string())),
        }
    }
    Ok(root.join(rel_path))
}

fn parse_version(s: &str) -> Option<semver::Version> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    semver::Version::parse(&s[..end]).ok()
}

fn print_test_line(report: &TestReport) {
    match &report.outcome {
        TestOutcome::Passed => {
            println!("  {} {}", "✓".green(), report.name.dimmed());
        }
        TestOutcome::Failed => {
            let detail = report
                .diagnostics
                .first()
                .map(|d| format!("{}: {}", d.context, d.message))
                .unwrap_or_default();
            println!("  {} {}: {}", "✗".red(), report.name, detail);
        }
        TestOutcome::Skipped { reason } => {
            println!(
                "  {} {} ({})",
                "-".yellow(),
                report.name.dimmed(),
                reason.yellow()
            );
        }
    }
}
