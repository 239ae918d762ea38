//! Configuration file handling
//!
//! The harness reads an optional TOML file (`--config`, default
//! `mooconf.toml` in the working directory) and layers CLI overrides on
//! top. The `paths` section enables the file/log side-channel assertion
//! steps; suites declare them as hard requirements via `requires.config`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct HarnessConfig {
    /// Target server address
    #[serde(default)]
    pub target: TargetConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Identity switching behavior
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Server-side paths for file/log assertions
    #[serde(default)]
    pub paths: PathsConfig,

    /// Features the target server advertises (checked by `requires.features`
    /// and `skip_if: feature.X`)
    #[serde(default)]
    pub features: Vec<String>,

    /// Statements evaluated once after the first login, before any suite
    /// runs. Errors are ignored; used to ensure shared fixtures exist
    /// (standard #0 properties, say) without ambient global state.
    #[serde(default)]
    pub bootstrap: Vec<String>,

    /// Managed server settings (used when `--server-command` is given)
    #[serde(default)]
    pub server: ServerConfig,
}

/// Target server address
#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7777
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Timeout for the login handshake
    #[serde(default = "default_login")]
    pub login_secs: u64,

    /// Timeout for a single reply read
    #[serde(default = "default_read")]
    pub read_secs: u64,

    /// Timeout waiting for a managed server to accept connections
    #[serde(default = "default_server_start")]
    pub server_start_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login_secs: default_login(),
            read_secs: default_read(),
            server_start_secs: default_server_start(),
        }
    }
}

fn default_login() -> u64 {
    5
}
fn default_read() -> u64 {
    5
}
fn default_server_start() -> u64 {
    30
}

/// How per-step `as:` identity switching is realized on the wire.
///
/// The target protocol's session model is an external contract: ToastStunt
/// requires a fresh login per identity, other servers accept an in-band
/// become command on the live connection.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Close the connection and log in again as the new identity
    #[default]
    Reconnect,
    /// Send a become-command template on the live connection
    InBand,
}

/// Identity switching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default)]
    pub policy: IdentityPolicy,

    /// Command template for `policy = "in_band"`; `{identity}` is replaced
    /// by the mapped player name
    #[serde(default)]
    pub become_template: Option<String>,

    /// Map from identity level to the database player name. Player names
    /// are case-sensitive on most servers.
    #[serde(default = "default_users")]
    pub users: HashMap<String, String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            policy: IdentityPolicy::default(),
            become_template: None,
            users: default_users(),
        }
    }
}

fn default_users() -> HashMap<String, String> {
    HashMap::from([
        ("programmer".to_string(), "Programmer".to_string()),
        ("wizard".to_string(), "Wizard".to_string()),
    ])
}

/// Server-side paths for the file/log assertion steps
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PathsConfig {
    /// The server's working directory; enables `assert_file`/`write_file`
    #[serde(default)]
    pub server_dir: Option<PathBuf>,

    /// The server's log file; enables `assert_log`
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Managed server configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ServerConfig {
    /// Command template with `{port}` and `{db}` placeholders
    #[serde(default)]
    pub command: Option<String>,

    /// Database file to copy into the scratch directory
    #[serde(default)]
    pub db: Option<PathBuf>,
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    ///
    /// Returns default configuration if the path is None and no
    /// `mooconf.toml` exists in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from("mooconf.toml");
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Map an identity level ("wizard") to the database player name ("Wizard").
    /// Unmapped identities pass through unchanged.
    pub fn player_name<'a>(&'a self, identity: &'a str) -> &'a str {
        self.identity
            .users
            .get(identity)
            .map(String::as_str)
            .unwrap_or(identity)
    }

    /// True if the named feature is advertised
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }
}
