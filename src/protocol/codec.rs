//! Request encoding and reply classification
//!
//! Requests are bracketed by sentinel marker lines set via the server's
//! `PREFIX`/`SUFFIX` output-delimiter commands. Markers are regenerated
//! per request so that echoed test output can never collide with them.
//!
//! Reply regions are classified into one of the eval-result shapes or,
//! failing that, treated as raw notification text. A region that looks
//! like an eval result but fails literal parsing is a protocol error with
//! the raw lines attached; it is never coerced to empty output.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{Error, Result};
use crate::protocol::value::{parse_literal, ErrorCode, MooValue};

/// A parsed server response. Produced once per request; never partially
/// valid.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Evaluation succeeded with a value
    EvalOk(MooValue),
    /// Evaluation failed with a bare error code
    EvalError(ErrorCode),
    /// Evaluation raised: code (absent for compile errors), message, and
    /// the partial value some servers attach
    EvalException {
        code: Option<ErrorCode>,
        message: String,
        partial: Option<MooValue>,
    },
    /// Output lines collected from a raw command dispatch
    CommandOutput(Vec<String>),
    /// Unclassifiable region: notification text seen during an eval
    RawText(Vec<String>),
}

impl Reply {
    /// The error code carried by this reply, if it is an error shape
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Reply::EvalError(code) => Some(*code),
            Reply::EvalException { code, .. } => *code,
            _ => None,
        }
    }

    /// The value to capture from this reply: the result value on success,
    /// the error code as a value on failure, the output lines as a list
    /// of strings for raw text.
    pub fn capture_value(&self) -> MooValue {
        match self {
            Reply::EvalOk(v) => v.clone(),
            Reply::EvalError(code) => MooValue::Err(*code),
            Reply::EvalException { code, .. } => {
                MooValue::Err(code.unwrap_or(ErrorCode::ENone))
            }
            Reply::CommandOutput(lines) | Reply::RawText(lines) => MooValue::List(
                lines.iter().cloned().map(MooValue::Str).collect(),
            ),
        }
    }
}

static MARKER_SEQ: AtomicU64 = AtomicU64::new(0);

/// A per-request pair of sentinel lines bounding the reply region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerPair {
    pub prefix: String,
    pub suffix: String,
}

impl MarkerPair {
    /// Generate a fresh pair. The pid + sequence number keep markers
    /// unique across requests and across concurrent harness processes.
    pub fn generate() -> Self {
        let seq = MARKER_SEQ.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        Self {
            prefix: format!("-=!{pid:x}.{seq:x}^!=-"),
            suffix: format!("-=!{pid:x}.{seq:x}v!=-"),
        }
    }

    /// The `PREFIX` delimiter command installing this pair's prefix
    pub fn prefix_command(&self) -> String {
        format!("PREFIX {}", self.prefix)
    }

    /// The `SUFFIX` delimiter command installing this pair's suffix
    pub fn suffix_command(&self) -> String {
        format!("SUFFIX {}", self.suffix)
    }
}

/// Wrap code for evaluation. Multi-line code is flattened to one line
/// since the server treats every line as a separate command.
pub fn encode_eval(code: &str) -> String {
    let flat = code
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!("; {flat}")
}

/// A raw command goes through the server's command parser unmodified.
pub fn encode_command(text: &str) -> String {
    text.to_string()
}

/// Classify a captured reply region into a [`Reply`].
pub fn decode(lines: &[String]) -> Result<Reply> {
    if lines.is_empty() {
        return Ok(Reply::RawText(Vec::new()));
    }
    let joined = lines.join("\n");

    // Shape 1: the "=> " success marker followed by a serialized value.
    if let Some(body) = joined.strip_prefix("=> ") {
        if let Some(code) = leading_error_code(body) {
            return Ok(Reply::EvalError(code));
        }
        return match parse_literal(body) {
            Ok(value) => Ok(Reply::EvalOk(value)),
            Err(e) => Err(Error::protocol(format!("bad eval result: {e}"), lines)),
        };
    }

    // Shape 2: a bare error-code token.
    if let Some(code) = leading_error_code(&joined) {
        if joined.trim() == code.name() {
            return Ok(Reply::EvalError(code));
        }
    }

    // Toast prints uncaught errors as a traceback rather than a code.
    if joined.starts_with("#-1:Input to EVAL") && joined.contains("(End of traceback)") {
        return Ok(Reply::EvalException {
            code: classify_traceback(&joined),
            message: lines[0].clone(),
            partial: None,
        });
    }

    // Shape 3: the {status, payload} eval wrapper.
    if joined.starts_with('{') {
        if let Ok(MooValue::List(items)) = parse_literal(&joined) {
            if let [MooValue::Int(status), payload] = items.as_slice() {
                return decode_wrapper(*status, payload, lines);
            }
        }
    }

    // Anything else is notification text.
    Ok(Reply::RawText(lines.to_vec()))
}

fn decode_wrapper(status: i64, payload: &MooValue, raw: &[String]) -> Result<Reply> {
    match status {
        // Parse/compile failure, or a runtime error some servers report
        // in this position.
        0 => match payload {
            MooValue::Err(code) => Ok(Reply::EvalError(*code)),
            MooValue::List(parts) if parts.len() >= 2 => Ok(Reply::EvalException {
                code: None,
                message: display_message(&parts[1]),
                partial: None,
            }),
            other => Ok(Reply::EvalException {
                code: None,
                message: display_message(other),
                partial: None,
            }),
        },
        1 => Ok(Reply::EvalOk(payload.clone())),
        // Runtime error triple: {2, {code, message, partial}}
        2 => match payload {
            MooValue::List(parts) if !parts.is_empty() => {
                let code = match &parts[0] {
                    MooValue::Err(code) => Some(*code),
                    _ => None,
                };
                let message = parts.get(1).map(display_message).unwrap_or_default();
                Ok(Reply::EvalException {
                    code,
                    message,
                    partial: parts.get(2).cloned(),
                })
            }
            _ => Err(Error::protocol(
                format!("malformed exception payload: {payload}"),
                raw,
            )),
        },
        other => Err(Error::protocol(
            format!("unknown eval status {other}"),
            raw,
        )),
    }
}

fn display_message(v: &MooValue) -> String {
    match v {
        MooValue::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn leading_error_code(text: &str) -> Option<ErrorCode> {
    if !text.starts_with("E_") {
        return None;
    }
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_uppercase() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    ErrorCode::parse(&text[..end])
}

/// Map a Toast error traceback to the error code it describes.
fn classify_traceback(traceback: &str) -> Option<ErrorCode> {
    const MESSAGES: [(&str, ErrorCode); 18] = [
        ("Type mismatch", ErrorCode::EType),
        ("Division by zero", ErrorCode::EDiv),
        ("Permission denied", ErrorCode::EPerm),
        ("Property not found", ErrorCode::EPropnf),
        ("Verb not found", ErrorCode::EVerbnf),
        ("Variable not found", ErrorCode::EVarnf),
        ("Invalid indirection", ErrorCode::EInvind),
        ("Recursive move", ErrorCode::ERecmove),
        ("Maximum object recursion reached", ErrorCode::EMaxrec),
        ("Resource limit exceeded", ErrorCode::EQuota),
        ("Out of range", ErrorCode::ERange),
        ("Range error", ErrorCode::ERange),
        ("Second argument must be a list", ErrorCode::EArgs),
        ("Wrong number of arguments", ErrorCode::EArgs),
        ("Too many arguments", ErrorCode::EArgs),
        ("Not enough arguments", ErrorCode::EArgs),
        ("Invalid argument", ErrorCode::EInvarg),
        ("No object match", ErrorCode::EInvarg),
    ];
    MESSAGES
        .iter()
        .find(|(msg, _)| traceback.contains(msg))
        .map(|(_, code)| *code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_markers_unique_per_request() {
        let a = MarkerPair::generate();
        let b = MarkerPair::generate();
        assert_ne!(a.prefix, b.prefix);
        assert_ne!(a.suffix, b.suffix);
        assert_ne!(a.prefix, a.suffix);
        assert!(a.prefix_command().starts_with("PREFIX "));
        assert!(a.suffix_command().starts_with("SUFFIX "));
    }

    #[test]
    fn test_encode_eval_flattens() {
        assert_eq!(encode_eval("return 1 + 1;"), "; return 1 + 1;");
        assert_eq!(
            encode_eval("x = 1;\n  y = 2;\n\nreturn x + y;"),
            "; x = 1; y = 2; return x + y;"
        );
    }

    #[test]
    fn test_decode_success_marker() {
        let reply = decode(&lines(&["=> 2"])).unwrap();
        assert_eq!(reply, Reply::EvalOk(MooValue::Int(2)));

        let reply = decode(&lines(&["=> {1, \"two\", #3}"])).unwrap();
        assert_eq!(
            reply,
            Reply::EvalOk(MooValue::List(vec![
                MooValue::Int(1),
                MooValue::Str("two".to_string()),
                MooValue::Obj(3),
            ]))
        );
    }

    #[test]
    fn test_decode_error_shapes() {
        let reply = decode(&lines(&["=> E_PERM"])).unwrap();
        assert_eq!(reply, Reply::EvalError(ErrorCode::EPerm));

        let reply = decode(&lines(&["E_DIV"])).unwrap();
        assert_eq!(reply, Reply::EvalError(ErrorCode::EDiv));
    }

    #[test]
    fn test_decode_wrapper_shapes() {
        let reply = decode(&lines(&["{1, 42}"])).unwrap();
        assert_eq!(reply, Reply::EvalOk(MooValue::Int(42)));

        let reply = decode(&lines(&["{0, E_INVARG}"])).unwrap();
        assert_eq!(reply, Reply::EvalError(ErrorCode::EInvarg));

        let reply = decode(&lines(&["{2, {E_TYPE, \"Type mismatch\", 0}}"])).unwrap();
        assert_eq!(
            reply,
            Reply::EvalException {
                code: Some(ErrorCode::EType),
                message: "Type mismatch".to_string(),
                partial: Some(MooValue::Int(0)),
            }
        );

        let reply = decode(&lines(&["{0, {3, \"syntax error\"}}"])).unwrap();
        assert_eq!(
            reply,
            Reply::EvalException {
                code: None,
                message: "syntax error".to_string(),
                partial: None,
            }
        );
    }

    #[test]
    fn test_decode_traceback() {
        let reply = decode(&lines(&[
            "#-1:Input to EVAL (this == #-1), line 3:  Division by zero",
            "... (End of traceback)",
        ]))
        .unwrap();
        match reply {
            Reply::EvalException { code, .. } => assert_eq!(code, Some(ErrorCode::EDiv)),
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_raw_text() {
        let raw = lines(&["VERB:put", "ARGSTR:ball in box"]);
        assert_eq!(decode(&raw).unwrap(), Reply::RawText(raw.clone()));
    }

    #[test]
    fn test_decode_malformed_is_protocol_error() {
        let err = decode(&lines(&["=> {1, 2"])).unwrap_err();
        match err {
            Error::Protocol { raw, .. } => assert_eq!(raw, lines(&["=> {1, 2"])),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_capture_value_of_error_reply() {
        let reply = Reply::EvalError(ErrorCode::EPerm);
        assert_eq!(reply.capture_value(), MooValue::Err(ErrorCode::EPerm));
    }
}
