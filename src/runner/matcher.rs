//! Expectation matching
//!
//! Compares a decoded reply against a declared expectation and produces
//! a pass/fail verdict. A failed match is a structured [`Mismatch`]
//! (expectation kind, expected, actual) returned to the executor; it is
//! never propagated as a panic.

use std::fmt;

use regex::Regex;

use crate::protocol::codec::Reply;
use crate::protocol::value::{ErrorCode, MooValue};
use crate::suite::schema::{yaml_to_value, ExactOutput, Expectation, OutputExpect};

/// A structured expectation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Which matcher kind failed ("value", "error", "output", ...)
    pub kind: &'static str,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    fn new(kind: &'static str, expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self {
            kind,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] expected {}, got {}",
            self.kind, self.expected, self.actual
        )
    }
}

/// Verify a reply against an expectation. Exactly one matcher kind is
/// set (enforced at load time).
pub fn verify_reply(expect: &Expectation, reply: &Reply) -> Result<(), Mismatch> {
    if let Some(error) = &expect.error {
        return verify_error(error, reply);
    }
    if let Some(output) = &expect.output {
        let lines = output_lines(reply, "output")?;
        return verify_output(output, lines);
    }
    if let Some(notifications) = &expect.notifications {
        let lines = output_lines(reply, "notifications")?;
        return verify_notifications(notifications, lines);
    }

    // The remaining kinds apply to a successful value, with one
    // exception: a regex may match an exception's message.
    let value = match (reply, expect.pattern.as_deref()) {
        (Reply::EvalOk(value), _) => value,
        (Reply::EvalException { message, code, .. }, Some(pattern)) => {
            return verify_pattern_text(pattern, message).map_err(|_| {
                Mismatch::new(
                    "match",
                    format!("text matching /{pattern}/"),
                    format!("{} ({message})", describe_error(*code)),
                )
            });
        }
        (other, _) => {
            return Err(Mismatch::new(
                "success",
                "a successful result",
                describe_reply(other),
            ))
        }
    };

    if let Some(expected) = &expect.value {
        let expected = yaml_to_value(expected)
            .map_err(|e| Mismatch::new("value", "a representable value", e))?;
        if &expected != value {
            return Err(Mismatch::new("value", &expected, value));
        }
        return Ok(());
    }

    if let Some(type_name) = &expect.type_name {
        if value.type_name() != type_name {
            return Err(Mismatch::new(
                "type",
                type_name,
                format!("{} ({value})", value.type_name()),
            ));
        }
        return Ok(());
    }

    if let Some(pattern) = &expect.pattern {
        return verify_match(pattern, value);
    }

    if let Some(expected) = &expect.contains {
        return verify_contains(expected, value);
    }

    if let Some(range) = &expect.range {
        return verify_range(range, value);
    }

    // No matcher left: the expectation was empty, which load-time
    // validation rejects. Treat as structurally passing.
    Ok(())
}

fn verify_error(expected: &str, reply: &Reply) -> Result<(), Mismatch> {
    let expected_code = ErrorCode::parse(expected)
        .ok_or_else(|| Mismatch::new("error", "a known error code", expected))?;
    match reply.error_code() {
        Some(code) if code == expected_code => Ok(()),
        Some(code) => Err(Mismatch::new("error", expected_code, code)),
        None => Err(Mismatch::new(
            "error",
            expected_code,
            describe_reply(reply),
        )),
    }
}

fn verify_match(pattern: &str, value: &MooValue) -> Result<(), Mismatch> {
    let re = compile(pattern)?;
    match value {
        MooValue::Str(s) => {
            if re.is_match(s) {
                return Ok(());
            }
        }
        MooValue::List(items) => {
            // pattern matches if any element's textual form does
            if items.iter().any(|item| re.is_match(&text_form(item))) {
                return Ok(());
            }
        }
        other => {
            if re.is_match(&other.to_string()) {
                return Ok(());
            }
        }
    }
    Err(Mismatch::new(
        "match",
        format!("text matching /{pattern}/"),
        value,
    ))
}

fn verify_contains(expected: &serde_yaml::Value, actual: &MooValue) -> Result<(), Mismatch> {
    let expected = yaml_to_value(expected)
        .map_err(|e| Mismatch::new("contains", "a representable value", e))?;
    let found = match actual {
        MooValue::List(items) => items.iter().any(|item| item == &expected),
        MooValue::Map(pairs) => pairs.iter().any(|(k, _)| k == &expected),
        MooValue::Str(s) => match &expected {
            MooValue::Str(sub) => s.contains(sub.as_str()),
            _ => false,
        },
        _ => {
            return Err(Mismatch::new(
                "contains",
                format!("a list, map, or string containing {expected}"),
                actual,
            ))
        }
    };
    if found {
        Ok(())
    } else {
        Err(Mismatch::new(
            "contains",
            format!("a container holding {expected}"),
            actual,
        ))
    }
}

fn verify_range(range: &[f64], value: &MooValue) -> Result<(), Mismatch> {
    let (low, high) = (range[0], range[1]);
    // a non-numeric value is a mismatch, never a coercion
    let Some(v) = value.as_f64() else {
        return Err(Mismatch::new(
            "range",
            format!("a number in [{low}, {high}]"),
            format!("{} ({value})", value.type_name()),
        ));
    };
    if low <= v && v <= high {
        Ok(())
    } else {
        Err(Mismatch::new(
            "range",
            format!("a number in [{low}, {high}]"),
            value,
        ))
    }
}

/// Verify collected output lines against an output expectation
pub fn verify_output(expect: &OutputExpect, lines: &[String]) -> Result<(), Mismatch> {
    match expect {
        OutputExpect::Lines(expected) => verify_exact_lines(expected, lines),
        OutputExpect::Joined(expected) => verify_exact_joined(expected, lines),
        OutputExpect::Detailed {
            exact,
            pattern,
            contains,
        } => {
            if let Some(exact) = exact {
                return match exact {
                    ExactOutput::Lines(expected) => verify_exact_lines(expected, lines),
                    ExactOutput::Joined(expected) => verify_exact_joined(expected, lines),
                };
            }
            let joined = lines.join("\n");
            if let Some(pattern) = pattern {
                let re = compile(pattern)?;
                if !re.is_match(&joined) {
                    return Err(Mismatch::new(
                        "output",
                        format!("output matching /{pattern}/"),
                        format!("{joined:?}"),
                    ));
                }
                return Ok(());
            }
            if let Some(sub) = contains {
                if !joined.contains(sub.as_str()) {
                    return Err(Mismatch::new(
                        "output",
                        format!("output containing {sub:?}"),
                        format!("{joined:?}"),
                    ));
                }
            }
            Ok(())
        }
    }
}

fn verify_exact_lines(expected: &[String], actual: &[String]) -> Result<(), Mismatch> {
    if expected == actual {
        return Ok(());
    }
    // report both sequences, lengths first, for diagnosis
    Err(Mismatch::new(
        "output",
        format!("{} line(s) {expected:?}", expected.len()),
        format!("{} line(s) {actual:?}", actual.len()),
    ))
}

fn verify_exact_joined(expected: &str, actual: &[String]) -> Result<(), Mismatch> {
    let joined = actual.join("\n");
    if joined == expected {
        Ok(())
    } else {
        Err(Mismatch::new(
            "output",
            format!("{expected:?}"),
            format!("{joined:?}"),
        ))
    }
}

/// Each expected message must appear (as a substring) in some output
/// line; order does not matter.
pub fn verify_notifications(expected: &[String], lines: &[String]) -> Result<(), Mismatch> {
    for message in expected {
        if !lines.iter().any(|line| line.contains(message.as_str())) {
            return Err(Mismatch::new(
                "notifications",
                format!("a notification containing {message:?}"),
                format!("{lines:?}"),
            ));
        }
    }
    Ok(())
}

fn output_lines<'a>(reply: &'a Reply, kind: &'static str) -> Result<&'a [String], Mismatch> {
    match reply {
        Reply::CommandOutput(lines) | Reply::RawText(lines) => Ok(lines),
        other => Err(Mismatch::new(
            kind,
            "collected output lines",
            describe_reply(other),
        )),
    }
}

fn verify_pattern_text(pattern: &str, text: &str) -> Result<(), Mismatch> {
    let re = compile(pattern)?;
    if re.is_match(text) {
        Ok(())
    } else {
        Err(Mismatch::new(
            "match",
            format!("text matching /{pattern}/"),
            format!("{text:?}"),
        ))
    }
}

fn compile(pattern: &str) -> Result<Regex, Mismatch> {
    // patterns are validated at load time; this guards direct callers
    Regex::new(pattern)
        .map_err(|e| Mismatch::new("match", "a valid pattern", e))
}

fn text_form(value: &MooValue) -> String {
    match value {
        MooValue::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe_reply(reply: &Reply) -> String {
    match reply {
        Reply::EvalOk(v) => format!("success with value {v}"),
        Reply::EvalError(code) => format!("error {code}"),
        Reply::EvalException { code, message, .. } => {
            format!("{} ({message})", describe_error(*code))
        }
        Reply::CommandOutput(lines) => format!("command output {lines:?}"),
        Reply::RawText(lines) => format!("raw output {lines:?}"),
    }
}

fn describe_error(code: Option<ErrorCode>) -> String {
    match code {
        Some(code) => format!("exception {code}"),
        None => "compile error".to_string(),
    }
}
