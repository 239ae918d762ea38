//! Managed server lifecycle
//!
//! Starts and stops a MOO server subprocess when `--server-command` is
//! given. The command template's `{port}` and `{db}` placeholders are
//! substituted, the database is copied into a scratch directory, and
//! server output goes to `server.log` inside it. Without a command, the
//! harness targets an externally managed server.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::info;

use crate::common::{Error, Result};

#[derive(Debug)]
pub struct ManagedServer {
    process: Option<Child>,
    port: u16,
    scratch: TempDir,
    log_path: PathBuf,
}

impl ManagedServer {
    /// Start the server and wait until it accepts connections
    pub async fn start(
        command_template: &str,
        db_path: &Path,
        requested_port: Option<u16>,
        host: &str,
        start_timeout: Duration,
    ) -> Result<Self> {
        let port = match requested_port {
            Some(port) => port,
            None => find_free_port()?,
        };

        let scratch = tempfile::Builder::new()
            .prefix("moo-conformance-")
            .tempdir()?;
        let db_name = db_path
            .file_name()
            .ok_or_else(|| Error::Config(format!("bad database path {}", db_path.display())))?;
        let db_dest = scratch.path().join(db_name);
        std::fs::copy(db_path, &db_dest).map_err(|e| Error::FileRead {
            path: db_path.display().to_string(),
            error: e.to_string(),
        })?;

        let command = command_template
            .replace("{port}", &port.to_string())
            .replace("{db}", &db_dest.display().to_string());
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("empty server command".to_string()))?;

        let log_path = scratch.path().join("server.log");
        let log_file = std::fs::File::create(&log_path)?;
        let log_for_stderr = log_file.try_clone()?;

        info!(command = %command, port, "starting managed server");
        let process = Command::new(program)
            .args(parts)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_for_stderr))
            .spawn()
            .map_err(|e| Error::ServerStart(format!("failed to spawn {program:?}: {e}")))?;

        let mut server = Self {
            process: Some(process),
            port,
            scratch,
            log_path,
        };
        server.wait_for_port(host, start_timeout).await?;
        Ok(server)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The scratch directory the server runs in; doubles as the default
    /// server_dir for file assertions
    pub fn server_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Stop the server: terminate politely, then kill after a grace
    /// period. The scratch directory is removed on drop.
    pub async fn stop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        #[cfg(unix)]
        if let Some(pid) = process.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if timeout(Duration::from_secs(5), process.wait()).await.is_ok() {
                return;
            }
        }

        let _ = process.kill().await;
    }

    async fn wait_for_port(&mut self, host: &str, start_timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + start_timeout;
        let addr = format!("{host}:{}", self.port);

        while Instant::now() < deadline {
            if let Some(process) = &mut self.process {
                if let Ok(Some(status)) = process.try_wait() {
                    return Err(Error::ServerStart(format!(
                        "server exited with {status} before accepting connections; \
                         log: {}",
                        self.log_path.display()
                    )));
                }
            }
            match timeout(
                Duration::from_secs(1),
                tokio::net::TcpStream::connect(&addr),
            )
            .await
            {
                Ok(Ok(_)) => return Ok(()),
                _ => sleep(Duration::from_millis(500)).await,
            }
        }

        Err(Error::ServerStart(format!(
            "server did not accept connections on {addr} within {}s; log: {}",
            start_timeout.as_secs(),
            self.log_path.display()
        )))
    }
}

fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_free_port() {
        let port = find_free_port().unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn test_start_failure_names_log() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("Test.db");
        std::fs::write(&db, "db").unwrap();

        let err = ManagedServer::start(
            "definitely-not-a-real-moo-server {db} {port}",
            &db,
            None,
            "localhost",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ServerStart(_)));
    }
}
