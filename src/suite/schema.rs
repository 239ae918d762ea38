//! YAML schema for conformance test suites
//!
//! Defines the data structures for deserializing suite documents, plus
//! the exactly-one rules the format imposes: a step carries exactly one
//! action, an expectation exactly one matcher kind. Violations are
//! configuration errors caught at load time, never at match time.

use serde::Deserialize;

use crate::protocol::value::{ErrorCode, MooValue};

/// A complete test suite loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct TestSuite {
    /// Name of the suite
    pub name: String,
    /// What this suite verifies
    #[serde(default)]
    pub description: String,
    /// Suite format version
    #[serde(default = "default_version")]
    pub version: String,
    /// Skip the whole suite (bool, or a string giving the reason)
    #[serde(default)]
    pub skip: SkipFlag,
    /// Prerequisites causing a suite-wide skip when unmet
    #[serde(default)]
    pub requires: Requirements,
    /// Capability this suite's tests verify
    #[serde(default)]
    pub provides: Option<String>,
    /// Capabilities this suite's tests depend on
    #[serde(default)]
    pub assumes: StringList,
    /// Code run once before the first test
    #[serde(default)]
    pub setup: Option<SetupTeardown>,
    /// Code run after the last test, best effort
    #[serde(default)]
    pub teardown: Option<SetupTeardown>,
    /// The test cases
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// `skip: true` or `skip: "reason"`
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SkipFlag {
    Flag(bool),
    Reason(String),
}

impl Default for SkipFlag {
    fn default() -> Self {
        SkipFlag::Flag(false)
    }
}

impl SkipFlag {
    pub fn is_set(&self) -> bool {
        match self {
            SkipFlag::Flag(b) => *b,
            SkipFlag::Reason(_) => true,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SkipFlag::Reason(r) => Some(r),
            SkipFlag::Flag(_) => None,
        }
    }
}

/// A string or a list of strings
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum StringList {
    One(String),
    Many(Vec<String>),
}

impl Default for StringList {
    fn default() -> Self {
        StringList::Many(Vec::new())
    }
}

impl StringList {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            StringList::One(s) => vec![s.clone()],
            StringList::Many(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StringList::One(_) => false,
            StringList::Many(v) => v.is_empty(),
        }
    }
}

/// Suite prerequisites
#[derive(Deserialize, Debug, Default, Clone)]
pub struct Requirements {
    /// Builtin functions the suite calls; probed via `function_info()`
    #[serde(default)]
    pub builtins: Vec<String>,
    /// Server features the suite needs (from the harness config)
    #[serde(default)]
    pub features: Vec<String>,
    /// Minimum server version (semver)
    #[serde(default)]
    pub min_version: Option<String>,
    /// Harness config keys the suite needs ("server_dir", "log_file")
    #[serde(default)]
    pub config: Vec<String>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.builtins.is_empty()
            && self.features.is_empty()
            && self.min_version.is_none()
            && self.config.is_empty()
    }
}

/// Setup or teardown block: a bare code string, or `{permission, code}`
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SetupTeardown {
    Code(CodeLines),
    Block {
        #[serde(default = "default_permission")]
        permission: String,
        #[serde(default)]
        code: CodeLines,
    },
}

fn default_permission() -> String {
    "programmer".to_string()
}

impl SetupTeardown {
    pub fn permission(&self) -> &str {
        match self {
            SetupTeardown::Code(_) => "programmer",
            SetupTeardown::Block { permission, .. } => permission,
        }
    }

    pub fn code_lines(&self) -> Vec<String> {
        let code = match self {
            SetupTeardown::Code(code) => code,
            SetupTeardown::Block { code, .. } => code,
        };
        code.lines()
    }
}

/// Code as a multi-line string or an explicit list of statements
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum CodeLines {
    One(String),
    Many(Vec<String>),
}

impl Default for CodeLines {
    fn default() -> Self {
        CodeLines::Many(Vec::new())
    }
}

impl CodeLines {
    pub fn lines(&self) -> Vec<String> {
        match self {
            CodeLines::One(s) => s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            CodeLines::Many(v) => v.clone(),
        }
    }
}

/// A single test case
#[derive(Deserialize, Debug, Clone)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skip: SkipFlag,
    /// Conditional skip: `feature.X`, `not feature.X`, `missing builtin.f`
    #[serde(default)]
    pub skip_if: Option<String>,
    /// Default identity the test runs under
    #[serde(default = "default_permission")]
    pub permission: String,
    #[serde(default)]
    pub setup: Option<SetupTeardown>,
    #[serde(default)]
    pub teardown: Option<SetupTeardown>,

    // Exactly one of these four drives the test:
    /// Expression, wrapped in `return <code>;`
    #[serde(default)]
    pub code: Option<String>,
    /// Statement(s), executed as written
    #[serde(default)]
    pub statement: Option<String>,
    /// Verb spec like `#0:do_login_command`, called with `args`
    #[serde(default)]
    pub verb: Option<String>,
    /// Multi-step test
    #[serde(default)]
    pub steps: Vec<TestStep>,

    /// Arguments for a `verb` call
    #[serde(default)]
    pub args: Vec<serde_yaml::Value>,

    /// Expected outcome (single-action tests only; steps carry their own)
    #[serde(default)]
    pub expect: Option<Expectation>,

    /// Steps that always run, even after a failure
    #[serde(default)]
    pub cleanup: Vec<TestStep>,

    /// Capability this test verifies
    #[serde(default)]
    pub provides: Option<String>,
    /// Capabilities this test depends on
    #[serde(default)]
    pub assumes: StringList,
}

impl TestCase {
    pub fn has_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    /// The code a single-action test executes, with the appropriate
    /// wrapping applied
    pub fn action_code(&self) -> Result<String, String> {
        if self.has_steps() {
            return Err(format!("test '{}' is a multi-step test", self.name));
        }
        if let Some(code) = &self.code {
            let code = code.trim();
            if code.starts_with("return ") {
                return Ok(ensure_semicolon(code));
            }
            return Ok(format!("return {};", code.trim_end_matches(';')));
        }
        if let Some(stmt) = &self.statement {
            return Ok(ensure_semicolon(stmt.trim()));
        }
        if let Some(verb) = &self.verb {
            let args = self
                .args
                .iter()
                .map(|a| yaml_to_value(a).map(|v| v.to_string()))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            return Ok(format!("return {verb}({args});"));
        }
        Err(format!(
            "test '{}' has no code, statement, verb, or steps",
            self.name
        ))
    }

    /// Enforce the schema's structural rules
    pub fn validate(&self) -> Result<(), String> {
        let actions = [
            self.code.is_some(),
            self.statement.is_some(),
            self.verb.is_some(),
            self.has_steps(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if actions != 1 {
            return Err(format!(
                "test '{}' must have exactly one of code, statement, verb, or steps",
                self.name
            ));
        }
        if self.has_steps() && self.expect.is_some() {
            return Err(format!(
                "test '{}' uses steps; put expectations on the steps themselves",
                self.name
            ));
        }
        if let Some(expect) = &self.expect {
            expect.validate().map_err(|e| format!("test '{}': {e}", self.name))?;
        }
        for (i, step) in self.steps.iter().chain(self.cleanup.iter()).enumerate() {
            step.validate()
                .map_err(|e| format!("test '{}' step {}: {e}", self.name, i + 1))?;
        }
        Ok(())
    }
}

fn ensure_semicolon(code: &str) -> String {
    if code.ends_with(';') {
        code.to_string()
    } else {
        format!("{code};")
    }
}

/// A single step in a multi-step test. Exactly one action field is set.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct TestStep {
    /// MOO code to evaluate
    #[serde(default)]
    pub run: Option<String>,
    /// Raw command sent through the command parser
    #[serde(default)]
    pub command: Option<String>,
    /// Declarative verb creation
    #[serde(default)]
    pub verb_setup: Option<VerbSetup>,
    /// Open a named connection
    #[serde(default)]
    pub new_connection: Option<NewConnection>,
    /// Send raw text on a named connection
    #[serde(default)]
    pub send: Option<SendSpec>,
    /// Close a connection by name
    #[serde(default)]
    pub close_connection: Option<String>,
    /// Pause for the given milliseconds; no protocol traffic
    #[serde(default)]
    pub wait: Option<u64>,
    /// Assert against the server log (scoped to this test's start offset)
    #[serde(default)]
    pub assert_log: Option<LogAssert>,
    /// Assert against a file under the server directory
    #[serde(default)]
    pub assert_file: Option<FileAssert>,
    /// Write a file under the server directory
    #[serde(default)]
    pub write_file: Option<WriteFileSpec>,

    /// Set on steps the runner synthesizes from single-action tests:
    /// their code runs exactly as written, with no expression wrapping
    #[serde(skip)]
    pub verbatim: bool,

    /// Variable name to store this step's result under
    #[serde(default)]
    pub capture: Option<String>,
    /// Identity this step acts as
    #[serde(default, rename = "as")]
    pub acting: Option<String>,
    /// Assertion on this step's result
    #[serde(default)]
    pub expect: Option<Expectation>,
}

impl TestStep {
    /// Resolve which action this step performs; errors unless exactly one
    /// action field is set
    pub fn action(&self) -> Result<StepAction<'_>, String> {
        let mut actions: Vec<StepAction<'_>> = Vec::new();
        if let Some(code) = &self.run {
            actions.push(StepAction::Run(code));
        }
        if let Some(text) = &self.command {
            actions.push(StepAction::Command(text));
        }
        if let Some(vs) = &self.verb_setup {
            actions.push(StepAction::VerbSetup(vs));
        }
        if let Some(nc) = &self.new_connection {
            actions.push(StepAction::NewConnection(nc));
        }
        if let Some(send) = &self.send {
            actions.push(StepAction::Send(send));
        }
        if let Some(name) = &self.close_connection {
            actions.push(StepAction::CloseConnection(name));
        }
        if let Some(ms) = self.wait {
            actions.push(StepAction::Wait(ms));
        }
        if let Some(la) = &self.assert_log {
            actions.push(StepAction::AssertLog(la));
        }
        if let Some(fa) = &self.assert_file {
            actions.push(StepAction::AssertFile(fa));
        }
        if let Some(wf) = &self.write_file {
            actions.push(StepAction::WriteFile(wf));
        }
        match actions.len() {
            0 => Err("step must have an action field (run, command, verb_setup, \
                      new_connection, send, close_connection, wait, assert_log, \
                      assert_file, or write_file)"
                .to_string()),
            1 => Ok(actions.pop().expect("len checked")),
            _ => Err("step must have exactly one action field".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.action()?;
        if let Some(expect) = &self.expect {
            expect.validate()?;
        }
        Ok(())
    }

    /// Short human description for diagnostics
    pub fn describe(&self) -> String {
        match self.action() {
            Ok(StepAction::Run(code)) => format!("run '{}'", truncate(code, 40)),
            Ok(StepAction::Command(text)) => format!("command '{}'", truncate(text, 40)),
            Ok(StepAction::VerbSetup(vs)) => format!("verb_setup '{}'", vs.name),
            Ok(StepAction::NewConnection(nc)) => format!("new_connection '{}'", nc.capture_name()),
            Ok(StepAction::Send(s)) => format!("send on '{}'", s.connection),
            Ok(StepAction::CloseConnection(name)) => format!("close_connection '{name}'"),
            Ok(StepAction::Wait(ms)) => format!("wait {ms}ms"),
            Ok(StepAction::AssertLog(_)) => "assert_log".to_string(),
            Ok(StepAction::AssertFile(fa)) => format!("assert_file '{}'", fa.path),
            Ok(StepAction::WriteFile(wf)) => format!("write_file '{}'", wf.path),
            Err(_) => "invalid step".to_string(),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

/// The single action a step performs
#[derive(Debug)]
pub enum StepAction<'a> {
    Run(&'a str),
    Command(&'a str),
    VerbSetup(&'a VerbSetup),
    NewConnection(&'a NewConnection),
    Send(&'a SendSpec),
    CloseConnection(&'a str),
    Wait(u64),
    AssertLog(&'a LogAssert),
    AssertFile(&'a FileAssert),
    WriteFile(&'a WriteFileSpec),
}

/// Declarative verb creation, expanded into the server's native
/// `add_verb` + `set_verb_code` calls
#[derive(Deserialize, Debug, Clone)]
pub struct VerbSetup {
    /// Object ref, `{var}` placeholders allowed
    pub object: String,
    /// Verb name
    pub name: String,
    /// Verb argument spec like `["this", "none", "this"]`
    pub args: Vec<String>,
    /// Verb body
    pub code: String,
}

/// `new_connection: conn1` or `new_connection: {capture: conn1, identity: wizard}`
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum NewConnection {
    Name(String),
    Spec {
        capture: String,
        #[serde(default)]
        identity: Option<String>,
    },
}

impl NewConnection {
    pub fn capture_name(&self) -> &str {
        match self {
            NewConnection::Name(name) => name,
            NewConnection::Spec { capture, .. } => capture,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            NewConnection::Name(_) => None,
            NewConnection::Spec { identity, .. } => identity.as_deref(),
        }
    }
}

/// Send raw text on a specific connection
#[derive(Deserialize, Debug, Clone)]
pub struct SendSpec {
    pub text: String,
    pub connection: String,
}

/// Assertion against the server log since test start
#[derive(Deserialize, Debug, Clone)]
pub struct LogAssert {
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default, rename = "match")]
    pub pattern: Option<String>,
}

/// Assertion against a file under the server directory
#[derive(Deserialize, Debug, Clone)]
pub struct FileAssert {
    pub path: String,
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default, rename = "match")]
    pub pattern: Option<String>,
}

/// Write a file under the server directory
#[derive(Deserialize, Debug, Clone)]
pub struct WriteFileSpec {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// Expected outcome. Exactly one matcher kind is set.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Expectation {
    /// Exact value match (structural, not textual)
    #[serde(default)]
    pub value: Option<serde_yaml::Value>,
    /// Expected error code (E_TYPE, E_DIV, ...)
    #[serde(default)]
    pub error: Option<String>,
    /// Runtime type tag (int, float, str, list, map, obj, anon, err)
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    /// Regex applied to the textual form of the result
    #[serde(default, rename = "match")]
    pub pattern: Option<String>,
    /// List element / map key / substring containment
    #[serde(default)]
    pub contains: Option<serde_yaml::Value>,
    /// Inclusive numeric range `[low, high]`
    #[serde(default)]
    pub range: Option<Vec<f64>>,
    /// Notification messages expected somewhere in the output (unordered)
    #[serde(default)]
    pub notifications: Option<Vec<String>>,
    /// Output-line expectation for raw commands
    #[serde(default)]
    pub output: Option<OutputExpect>,
}

impl Expectation {
    /// Enforce the exactly-one-matcher rule and per-kind constraints
    pub fn validate(&self) -> Result<(), String> {
        let kinds = [
            self.value.is_some(),
            self.error.is_some(),
            self.type_name.is_some(),
            self.pattern.is_some(),
            self.contains.is_some(),
            self.range.is_some(),
            self.notifications.is_some(),
            self.output.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if kinds == 0 {
            return Err("expect block must set a matcher (value, error, type, match, \
                        contains, range, notifications, or output)"
                .to_string());
        }
        if kinds > 1 {
            return Err("expect block must set exactly one matcher kind".to_string());
        }
        if let Some(error) = &self.error {
            if ErrorCode::parse(error).is_none() {
                return Err(format!("unknown error code {error:?}"));
            }
        }
        if let Some(range) = &self.range {
            if range.len() != 2 {
                return Err("range must be [low, high]".to_string());
            }
        }
        if let Some(pattern) = &self.pattern {
            regex::Regex::new(pattern).map_err(|e| format!("bad match pattern: {e}"))?;
        }
        if let Some(output) = &self.output {
            output.validate()?;
        }
        Ok(())
    }
}

/// Output expectation: a bare string or line list is an exact ordered
/// match; the detailed form picks exactly one of exact/match/contains.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum OutputExpect {
    Lines(Vec<String>),
    Joined(String),
    Detailed {
        #[serde(default)]
        exact: Option<ExactOutput>,
        #[serde(default, rename = "match")]
        pattern: Option<String>,
        #[serde(default)]
        contains: Option<String>,
    },
}

/// Exact output as a line list or a joined string
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ExactOutput {
    Lines(Vec<String>),
    Joined(String),
}

impl OutputExpect {
    pub fn validate(&self) -> Result<(), String> {
        if let OutputExpect::Detailed {
            exact,
            pattern,
            contains,
        } = self
        {
            let kinds = [exact.is_some(), pattern.is_some(), contains.is_some()]
                .iter()
                .filter(|b| **b)
                .count();
            if kinds != 1 {
                return Err(
                    "output expectation must set exactly one of exact, match, contains"
                        .to_string(),
                );
            }
            if let Some(pattern) = pattern {
                regex::Regex::new(pattern).map_err(|e| format!("bad output pattern: {e}"))?;
            }
        }
        Ok(())
    }
}

/// Convert a YAML expectation value to a MOO value. Strings shaped like
/// object references (`"#8"`), anonymous references (`"*#3"`), or error
/// codes (`"E_PERM"`) promote to their typed forms, mirroring how those
/// values are written in suite files.
pub fn yaml_to_value(yaml: &serde_yaml::Value) -> Result<MooValue, String> {
    use serde_yaml::Value as Y;
    match yaml {
        Y::Null => Err("null is not a MOO value".to_string()),
        Y::Bool(b) => Ok(MooValue::Int(i64::from(*b))),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(MooValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(MooValue::Float(f))
            } else {
                Err(format!("unrepresentable number {n}"))
            }
        }
        Y::String(s) => Ok(promote_string(s)),
        Y::Sequence(items) => Ok(MooValue::List(
            items.iter().map(yaml_to_value).collect::<Result<_, _>>()?,
        )),
        Y::Mapping(pairs) => Ok(MooValue::Map(
            pairs
                .iter()
                .map(|(k, v)| Ok::<_, String>((yaml_to_value(k)?, yaml_to_value(v)?)))
                .collect::<Result<_, _>>()?,
        )),
        Y::Tagged(_) => Err("tagged YAML values are not supported".to_string()),
    }
}

fn promote_string(s: &str) -> MooValue {
    if let Some(num) = s.strip_prefix('#') {
        if let Ok(n) = num.parse::<i64>() {
            return MooValue::Obj(n);
        }
    }
    if let Some(num) = s.strip_prefix("*#") {
        if let Ok(n) = num.parse::<i64>() {
            return MooValue::Anon(Some(n));
        }
    }
    if s.starts_with("E_") {
        if let Some(code) = ErrorCode::parse(s) {
            return MooValue::Err(code);
        }
    }
    MooValue::Str(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_exactly_one_action() {
        let step: TestStep = serde_yaml::from_str("run: \"1 + 1\"").unwrap();
        assert!(step.validate().is_ok());

        let step: TestStep = serde_yaml::from_str("capture: x").unwrap();
        assert!(step.validate().is_err());

        let step: TestStep =
            serde_yaml::from_str("run: \"1\"\ncommand: \"look\"").unwrap();
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_expectation_exactly_one_matcher() {
        let e: Expectation = serde_yaml::from_str("value: 5").unwrap();
        assert!(e.validate().is_ok());

        let e: Expectation = serde_yaml::from_str("value: 5\nerror: E_DIV").unwrap();
        assert!(e.validate().is_err());

        let e: Expectation = serde_yaml::from_str("error: E_BOGUS").unwrap();
        assert!(e.validate().is_err());

        let e: Expectation = serde_yaml::from_str("range: [1, 2, 3]").unwrap();
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_case_wrapping() {
        let t: TestCase =
            serde_yaml::from_str("name: t\ncode: \"1 + 1\"").unwrap();
        assert_eq!(t.action_code().unwrap(), "return 1 + 1;");

        let t: TestCase =
            serde_yaml::from_str("name: t\ncode: \"return 5;\"").unwrap();
        assert_eq!(t.action_code().unwrap(), "return 5;");

        let t: TestCase =
            serde_yaml::from_str("name: t\nstatement: \"x = 1\"").unwrap();
        assert_eq!(t.action_code().unwrap(), "x = 1;");

        let t: TestCase = serde_yaml::from_str(
            "name: t\nverb: \"#0:do_login_command\"\nargs: [\"connect\", \"#2\"]",
        )
        .unwrap();
        assert_eq!(
            t.action_code().unwrap(),
            "return #0:do_login_command(\"connect\", #2);"
        );
    }

    #[test]
    fn test_case_action_rules() {
        let t: TestCase = serde_yaml::from_str("name: t").unwrap();
        assert!(t.validate().is_err());

        let t: TestCase =
            serde_yaml::from_str("name: t\ncode: \"1\"\nstatement: \"x = 1;\"").unwrap();
        assert!(t.validate().is_err());

        let t: TestCase = serde_yaml::from_str(
            "name: t\nsteps:\n  - run: \"1\"\nexpect:\n  value: 1",
        )
        .unwrap();
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_new_connection_forms() {
        let step: TestStep = serde_yaml::from_str("new_connection: conn1").unwrap();
        match step.action().unwrap() {
            StepAction::NewConnection(nc) => {
                assert_eq!(nc.capture_name(), "conn1");
                assert_eq!(nc.identity(), None);
            }
            other => panic!("unexpected action {other:?}"),
        }

        let step: TestStep =
            serde_yaml::from_str("new_connection:\n  capture: w\n  identity: wizard")
                .unwrap();
        match step.action().unwrap() {
            StepAction::NewConnection(nc) => {
                assert_eq!(nc.capture_name(), "w");
                assert_eq!(nc.identity(), Some("wizard"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_yaml_value_promotion() {
        assert_eq!(
            yaml_to_value(&serde_yaml::from_str("\"#8\"").unwrap()).unwrap(),
            MooValue::Obj(8)
        );
        assert_eq!(
            yaml_to_value(&serde_yaml::from_str("E_PERM").unwrap()).unwrap(),
            MooValue::Err(ErrorCode::EPerm)
        );
        assert_eq!(
            yaml_to_value(&serde_yaml::from_str("\"plain\"").unwrap()).unwrap(),
            MooValue::Str("plain".to_string())
        );
        assert_eq!(
            yaml_to_value(&serde_yaml::from_str("[1, 2.5]").unwrap()).unwrap(),
            MooValue::List(vec![MooValue::Int(1), MooValue::Float(2.5)])
        );
    }

    #[test]
    fn test_full_suite_parses() {
        let suite: TestSuite = serde_yaml::from_str(
            r#"
            name: arithmetic
            requires:
              builtins: [abs]
            setup:
              permission: wizard
              code: |
                add_property(#0, "t", 0, {#0, "rc"});
            tests:
              - name: division_by_zero
                code: "1 / 0"
                expect:
                  error: E_DIV
              - name: multi
                steps:
                  - run: "create($nothing)"
                    capture: obj
                    as: wizard
                  - run: "valid({obj})"
                    expect:
                      value: 1
                cleanup:
                  - run: "recycle({obj})"
                    as: wizard
            "#,
        )
        .unwrap();
        assert_eq!(suite.name, "arithmetic");
        assert_eq!(suite.tests.len(), 2);
        for t in &suite.tests {
            t.validate().unwrap();
        }
        assert_eq!(suite.setup.as_ref().unwrap().permission(), "wizard");
    }
}
