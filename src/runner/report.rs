//! Test outcomes, diagnostics, and run reporting

use colored::Colorize;
use serde::Serialize;

/// One named diagnostic attached to a test result. Diagnostics
/// accumulate; a cleanup failure never overwrites the primary one.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Where it happened ("step 3: run '1/0'", "cleanup 1", ...)
    pub context: String,
    pub message: String,
}

/// Final outcome of one test
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped { reason: String },
}

/// Result of one test case
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub name: String,
    pub outcome: TestOutcome,
    pub steps_run: usize,
    pub steps_total: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.outcome == TestOutcome::Passed
    }

    pub fn failed(&self) -> bool {
        self.outcome == TestOutcome::Failed
    }
}

/// Result of one suite
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub tests: Vec<TestReport>,
}

impl SuiteReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tests: Vec::new(),
        }
    }
}

/// Result of the whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub suites: Vec<SuiteReport>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.tests().filter(|t| t.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.tests().filter(|t| t.failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.tests()
            .filter(|t| matches!(t.outcome, TestOutcome::Skipped { .. }))
            .count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    fn tests(&self) -> impl Iterator<Item = &TestReport> {
        self.suites.iter().flat_map(|s| s.tests.iter())
    }

    /// Print the end-of-run summary
    pub fn print_summary(&self) {
        let (passed, failed, skipped) = (self.passed(), self.failed(), self.skipped());
        println!();
        let verdict = if failed == 0 {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };
        println!(
            "{} {} passed, {} failed, {} skipped",
            verdict,
            passed.to_string().green(),
            failed.to_string().red(),
            skipped.to_string().yellow(),
        );

        for suite in &self.suites {
            for test in &suite.tests {
                if test.failed() {
                    println!("\n{} {}::{}", "✗".red(), suite.name, test.name);
                    for diag in &test.diagnostics {
                        println!("    {}: {}", diag.context.dimmed(), diag.message);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut report = RunReport::default();
        let mut suite = SuiteReport::new("s");
        suite.tests.push(TestReport {
            name: "a".to_string(),
            outcome: TestOutcome::Passed,
            steps_run: 1,
            steps_total: 1,
            diagnostics: vec![],
        });
        suite.tests.push(TestReport {
            name: "b".to_string(),
            outcome: TestOutcome::Failed,
            steps_run: 1,
            steps_total: 2,
            diagnostics: vec![Diagnostic {
                context: "step 1".to_string(),
                message: "boom".to_string(),
            }],
        });
        suite.tests.push(TestReport {
            name: "c".to_string(),
            outcome: TestOutcome::Skipped {
                reason: "no log file configured".to_string(),
            },
            steps_run: 0,
            steps_total: 1,
            diagnostics: vec![],
        });
        report.suites.push(suite);

        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(!report.all_passed());
    }

    #[test]
    fn test_json_shape() {
        let report = RunReport {
            suites: vec![SuiteReport {
                name: "s".to_string(),
                tests: vec![TestReport {
                    name: "t".to_string(),
                    outcome: TestOutcome::Skipped {
                        reason: "because".to_string(),
                    },
                    steps_run: 0,
                    steps_total: 0,
                    diagnostics: vec![],
                }],
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["suites"][0]["tests"][0]["outcome"]["status"], "skipped");
        assert_eq!(json["suites"][0]["tests"][0]["outcome"]["reason"], "because");
    }
}
