//! A session: the default connection plus any named ones
//!
//! The session owns every connection a test can address, tracks the
//! current acting identity, and realizes per-step identity switches
//! according to the configured policy. Connections are never shared
//! across sessions.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::common::config::{HarnessConfig, IdentityPolicy};
use crate::common::{Error, Result};
use crate::protocol::codec::{self, Reply};
use crate::protocol::connection::Connection;

/// Name the primary connection is reported under in diagnostics
pub const PRIMARY: &str = "primary";

pub struct Session {
    config: HarnessConfig,
    host: String,
    port: u16,
    primary: Connection,
    named: HashMap<String, Connection>,
    identity: String,
}

impl Session {
    /// Connect and authenticate the primary connection
    pub async fn connect(config: &HarnessConfig, identity: &str) -> Result<Self> {
        let host = config.target.host.clone();
        let port = config.target.port;
        let primary = Connection::login(
            PRIMARY,
            &host,
            port,
            identity,
            config.player_name(identity),
            Duration::from_secs(config.timeouts.login_secs),
            Duration::from_secs(config.timeouts.read_secs),
        )
        .await?;
        Ok(Self {
            config: config.clone(),
            host,
            port,
            primary,
            named: HashMap::new(),
            identity: identity.to_string(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Switch the acting identity of the primary connection.
    ///
    /// With the reconnect policy the old connection is closed and a fresh
    /// login performed; with the in-band policy the configured become
    /// command is sent on the live connection. Which one a target needs
    /// is part of its session model, not ours.
    pub async fn switch_identity(&mut self, identity: &str) -> Result<()> {
        if self.identity == identity {
            return Ok(());
        }
        debug!(from = %self.identity, to = %identity, "switching identity");
        match self.config.identity.policy {
            IdentityPolicy::Reconnect => {
                self.primary.close();
                self.primary = Connection::login(
                    PRIMARY,
                    &self.host,
                    self.port,
                    identity,
                    self.config.player_name(identity),
                    Duration::from_secs(self.config.timeouts.login_secs),
                    Duration::from_secs(self.config.timeouts.read_secs),
                )
                .await?;
            }
            IdentityPolicy::InBand => {
                let template = self.config.identity.become_template.clone().ok_or_else(|| {
                    Error::Config(
                        "identity.policy = \"in_band\" requires identity.become_template"
                            .to_string(),
                    )
                })?;
                let command =
                    template.replace("{identity}", self.config.player_name(identity));
                self.primary.request_lines(&command, false).await?;
            }
        }
        self.identity = identity.to_string();
        Ok(())
    }

    /// Evaluate code on the primary connection and classify the reply
    pub async fn eval(&mut self, code: &str) -> Result<Reply> {
        let payload = codec::encode_eval(code);
        let lines = self.primary.request_lines(&payload, true).await?;
        codec::decode(&lines)
    }

    /// Dispatch a raw command on the primary connection and collect its
    /// notify() output lines
    pub async fn command(&mut self, text: &str) -> Result<Vec<String>> {
        let payload = codec::encode_command(text);
        self.primary.request_lines(&payload, false).await
    }

    /// Open a named connection. With an identity the full login handshake
    /// runs; without one the socket is left raw so the test can exercise
    /// the login flow itself.
    pub async fn open_connection(&mut self, name: &str, identity: Option<&str>) -> Result<()> {
        let read_timeout = Duration::from_secs(self.config.timeouts.read_secs);
        let conn = match identity {
            Some(identity) => {
                Connection::login(
                    name,
                    &self.host,
                    self.port,
                    identity,
                    self.config.player_name(identity),
                    Duration::from_secs(self.config.timeouts.login_secs),
                    read_timeout,
                )
                .await?
            }
            None => Connection::open(name, &self.host, self.port, read_timeout).await?,
        };
        self.named.insert(name.to_string(), conn);
        Ok(())
    }

    /// Send raw text on a named connection and collect its output lines.
    /// Authenticated connections use marker-delimited replies; raw ones
    /// drain until the stream goes quiet.
    pub async fn send_on(&mut self, name: &str, text: &str) -> Result<Vec<String>> {
        let conn = self.named_mut(name)?;
        if conn.is_authenticated() {
            conn.request_lines(text, false).await
        } else {
            conn.send_line(text).await?;
            conn.drain_lines().await
        }
    }

    /// Close a connection by name; `None` closes the primary. Closing an
    /// unknown name or the already-closed primary is a step error.
    pub fn close_connection(&mut self, name: Option<&str>) -> Result<()> {
        match name {
            None | Some(PRIMARY) => {
                if self.primary.is_closed() {
                    return Err(Error::ConnectionAlreadyClosed(PRIMARY.to_string()));
                }
                self.primary.close();
                Ok(())
            }
            Some(name) => {
                let mut conn = self.named.remove(name).ok_or_else(|| Error::UnknownConnection {
                    name: name.to_string(),
                    open: self.open_names(),
                })?;
                conn.close();
                Ok(())
            }
        }
    }

    /// Close every named connection a test left open. Called during
    /// cleanup; close errors are ignored since the sockets drop anyway.
    pub fn close_named(&mut self) {
        for (_, mut conn) in self.named.drain() {
            conn.close();
        }
    }

    /// Tear down the whole session
    pub fn close(&mut self) {
        self.close_named();
        self.primary.close();
    }

    /// Re-open the primary if a test closed it (lifecycle tests do this
    /// deliberately)
    pub async fn ensure_primary(&mut self) -> Result<()> {
        if !self.primary.is_closed() {
            return Ok(());
        }
        let identity = self.identity.clone();
        self.primary = Connection::login(
            PRIMARY,
            &self.host,
            self.port,
            &identity,
            self.config.player_name(&identity),
            Duration::from_secs(self.config.timeouts.login_secs),
            Duration::from_secs(self.config.timeouts.read_secs),
        )
        .await?;
        Ok(())
    }

    fn named_mut(&mut self, name: &str) -> Result<&mut Connection> {
        let open = self.open_names();
        self.named
            .get_mut(name)
            .ok_or(Error::UnknownConnection {
                name: name.to_string(),
                open,
            })
    }

    fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.named.keys().cloned().collect();
        names.sort();
        names
    }
}
