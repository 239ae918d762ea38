//! A single TCP connection to the target server
//!
//! Each connection owns its socket, a pending-bytes read buffer, and its
//! authenticated identity. Replies are delimited by per-request sentinel
//! markers; everything before the PREFIX marker and after the SUFFIX
//! marker is discarded. A closed connection can never be used again.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::common::{Error, Result};
use crate::protocol::codec::MarkerPair;

/// Line the server prints once login has completed
const CONNECT_ACK: &str = "*** Connected ***";

/// Quiet window used when draining unmarked output (login banners, raw
/// unauthenticated connections)
const DRAIN_QUIET: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub struct Connection {
    name: String,
    stream: Option<TcpStream>,
    /// Pending undelimited bytes (telnet already stripped)
    buf: Vec<u8>,
    /// Trailing incomplete telnet IAC sequence held back between reads
    telnet_partial: Vec<u8>,
    identity: Option<String>,
    read_timeout: Duration,
}

impl Connection {
    /// Open a raw, unauthenticated connection. Used by `new_connection`
    /// steps that exercise the login flow itself.
    pub async fn open(name: &str, host: &str, port: u16, read_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::ConnectFailed { addr, source })?;
        Ok(Self {
            name: name.to_string(),
            stream: Some(stream),
            buf: Vec::new(),
            telnet_partial: Vec::new(),
            identity: None,
            read_timeout,
        })
    }

    /// Open a connection and perform the login handshake: send the
    /// `connect <Player>` line, then read and discard the banner up to
    /// the connect acknowledgement.
    pub async fn login(
        name: &str,
        host: &str,
        port: u16,
        identity: &str,
        player: &str,
        login_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let mut conn = Self::open(name, host, port, read_timeout).await?;
        conn.send_line(&format!("connect {player}")).await?;
        conn.consume_login_output(identity, login_timeout).await?;
        conn.identity = Some(identity.to_string());
        Ok(conn)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// True once `close` has been called (or login never completed)
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Close the connection. Any later read or write is a fatal step
    /// error, not a retry.
    pub fn close(&mut self) {
        self.stream = None;
        self.buf.clear();
    }

    /// Send one line (terminator appended)
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let name = self.name.clone();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::ConnectionAlreadyClosed(name.clone()))?;
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        stream
            .write_all(&bytes)
            .await
            .map_err(|_| Error::ConnectionReset(name))?;
        Ok(())
    }

    /// Send a request bracketed by fresh markers and collect the reply
    /// region. Eval replies require at least one data line before the
    /// SUFFIX is honored (ToastStunt's exec() emits an early SUFFIX);
    /// command replies stop at the first SUFFIX even when empty.
    pub async fn request_lines(&mut self, payload: &str, require_data: bool) -> Result<Vec<String>> {
        let markers = MarkerPair::generate();
        self.send_line(&markers.prefix_command()).await?;
        self.send_line(&markers.suffix_command()).await?;
        self.send_line(payload).await?;
        self.read_region(&markers, require_data).await
    }

    /// Read lines until the SUFFIX marker, discarding everything before
    /// the PREFIX marker. Bounded by the read timeout; a timeout is an
    /// error, never a silent empty result.
    pub async fn read_region(
        &mut self,
        markers: &MarkerPair,
        require_data: bool,
    ) -> Result<Vec<String>> {
        let deadline = Instant::now() + self.read_timeout;
        let mut lines: Vec<String> = Vec::new();
        let mut inside = false;

        loop {
            let line = self.read_line_deadline(deadline).await?;
            if line == markers.prefix {
                inside = true;
                continue;
            }
            if inside && line == markers.suffix {
                if require_data && lines.is_empty() {
                    continue;
                }
                return Ok(lines);
            }
            if inside {
                lines.push(line);
            }
        }
    }

    /// Drain whatever output arrives until the line stream goes quiet.
    /// Used for unmarked output on raw connections.
    pub async fn drain_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            match timeout(DRAIN_QUIET, self.read_line()).await {
                Err(_) => return Ok(lines),
                Ok(Err(Error::ConnectionReset(_))) => return Ok(lines),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(line)) => lines.push(line),
            }
        }
    }

    async fn consume_login_output(&mut self, identity: &str, login_timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + login_timeout;
        loop {
            let line = match self.read_line_deadline(deadline).await {
                Ok(line) => line,
                Err(Error::ReadTimeout { .. }) | Err(Error::ConnectionReset(_)) => {
                    return Err(Error::LoginTimeout {
                        identity: identity.to_string(),
                        timeout_secs: login_timeout.as_secs(),
                    });
                }
                Err(e) => return Err(e),
            };
            if line.contains(CONNECT_ACK) {
                break;
            }
        }
        // Room descriptions etc. trail the acknowledgement; drop them.
        self.drain_lines().await?;
        Ok(())
    }

    async fn read_line_deadline(&mut self, deadline: Instant) -> Result<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::ReadTimeout {
                conn: self.name.clone(),
                timeout_secs: self.read_timeout.as_secs(),
            });
        }
        match timeout(remaining, self.read_line()).await {
            Ok(result) => result,
            Err(_) => Err(Error::ReadTimeout {
                conn: self.name.clone(),
                timeout_secs: self.read_timeout.as_secs(),
            }),
        }
    }

    /// Read one line, filling the buffer from the socket as needed
    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            let name = self.name.clone();
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| Error::ConnectionAlreadyClosed(name.clone()))?;
            let mut chunk = [0u8; 4096];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|_| Error::ConnectionReset(name.clone()))?;
            if n == 0 {
                return Err(Error::ConnectionReset(name));
            }

            let mut raw = std::mem::take(&mut self.telnet_partial);
            raw.extend_from_slice(&chunk[..n]);
            let (clean, partial) = strip_telnet(&raw);
            self.buf.extend_from_slice(&clean);
            self.telnet_partial = partial;
        }
    }
}

/// Remove telnet IAC (Interpret As Command) sequences. MOO servers
/// negotiate telnet options at connect time. Returns the cleaned bytes
/// and any trailing incomplete sequence to retry with the next chunk.
fn strip_telnet(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    const IAC: u8 = 0xFF;
    const SB: u8 = 0xFA;
    const SE: u8 = 0xF0;

    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != IAC {
            out.push(data[i]);
            i += 1;
            continue;
        }
        if i + 1 >= data.len() {
            // incomplete IAC at end of chunk
            return (out, data[i..].to_vec());
        }
        match data[i + 1] {
            IAC => {
                // IAC IAC is a literal 0xFF
                out.push(IAC);
                i += 2;
            }
            0xFB..=0xFE => {
                // WILL/WONT/DO/DONT + option byte
                if i + 2 >= data.len() {
                    return (out, data[i..].to_vec());
                }
                i += 3;
            }
            SB => {
                // subnegotiation runs until IAC SE
                let mut j = i + 2;
                loop {
                    if j + 1 >= data.len() {
                        return (out, data[i..].to_vec());
                    }
                    if data[j] == IAC && data[j + 1] == SE {
                        i = j + 2;
                        break;
                    }
                    j += 1;
                }
            }
            _ => i += 2,
        }
    }
    (out, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_telnet_commands() {
        let (clean, rest) = strip_telnet(&[0xFF, 0xFB, 0x01, b'h', b'i', b'\n']);
        assert_eq!(clean, b"hi\n");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_strip_telnet_literal_iac() {
        let (clean, rest) = strip_telnet(&[b'a', 0xFF, 0xFF, b'b']);
        assert_eq!(clean, vec![b'a', 0xFF, b'b']);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_strip_telnet_subnegotiation() {
        let (clean, rest) = strip_telnet(&[b'x', 0xFF, 0xFA, 0x18, 0x00, 0xFF, 0xF0, b'y']);
        assert_eq!(clean, b"xy");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_strip_telnet_holds_back_partial() {
        let (clean, rest) = strip_telnet(&[b'a', 0xFF, 0xFB]);
        assert_eq!(clean, b"a");
        assert_eq!(rest, vec![0xFF, 0xFB]);

        // next chunk completes the sequence
        let mut raw = rest;
        raw.extend_from_slice(&[0x01, b'b']);
        let (clean, rest) = strip_telnet(&raw);
        assert_eq!(clean, b"b");
        assert!(rest.is_empty());
    }
}
