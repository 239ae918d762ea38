//! Error types for the conformance harness
//!
//! The taxonomy distinguishes connection failures (fatal to the whole
//! test), protocol failures (unparseable replies, raw bytes attached),
//! step failures, assertion mismatches, and skip signals. Skips are
//! reported distinctly from failures and never count against a server.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the conformance harness
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Failed to connect to MOO server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Login as '{identity}' did not complete within {timeout_secs}s (no connect acknowledgement)")]
    LoginTimeout { identity: String, timeout_secs: u64 },

    #[error("Connection '{0}' closed by server")]
    ConnectionReset(String),

    #[error("Read on connection '{conn}' timed out after {timeout_secs}s waiting for reply marker")]
    ReadTimeout { conn: String, timeout_secs: u64 },

    // === Protocol Errors ===
    #[error("Unparseable reply: {message}\n  raw region: {raw:?}")]
    Protocol { message: String, raw: Vec<String> },

    // === Step Errors ===
    #[error("Unresolved placeholder {{{name}}} in step text (no such capture)")]
    UnresolvedPlaceholder { name: String },

    #[error("Unknown connection '{name}'. Open connections: {open:?}")]
    UnknownConnection { name: String, open: Vec<String> },

    #[error("Connection '{0}' is closed and cannot be used again")]
    ConnectionAlreadyClosed(String),

    #[error("Path '{0}' escapes the server directory sandbox")]
    SandboxEscape(String),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    // === Assertion Errors ===
    #[error("Assertion failed: {0}")]
    Assertion(String),

    // === Skip Signals ===
    #[error("Skipped: {0}")]
    Skipped(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Suite Loading Errors ===
    #[error("Invalid test suite '{path}': {message}")]
    SuiteParse { path: String, message: String },

    // === Managed Server Errors ===
    #[error("Managed server failed to start: {0}")]
    ServerStart(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },
}

impl Error {
    /// Create a protocol error carrying the raw reply region for diagnosis
    pub fn protocol<S: Into<String>>(message: S, raw: &[String]) -> Self {
        Self::Protocol {
            message: message.into(),
            raw: raw.to_vec(),
        }
    }

    /// Create a suite parse error naming the file
    pub fn suite_parse(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::SuiteParse {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// True for errors that abort the whole test rather than one step
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailed { .. }
                | Error::LoginTimeout { .. }
                | Error::ConnectionReset(_)
        )
    }

    /// True for skip signals (reported distinctly from failures)
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::Skipped(_))
    }
}
