//! In-process mock MOO server for end-to-end tests
//!
//! Speaks just enough of the wire protocol to drive the harness: the
//! login handshake, the PREFIX/SUFFIX output delimiters, and scripted
//! replies keyed by substrings of the incoming line. Every received
//! line is recorded so tests can assert on the traffic itself.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A scripted reply rule: the first rule whose needle appears in the
/// incoming line wins.
#[derive(Clone)]
pub struct Rule {
    pub needle: String,
    pub reply: Vec<String>,
}

pub fn rule(needle: &str, reply: &[&str]) -> Rule {
    Rule {
        needle: needle.to_string(),
        reply: reply.iter().map(|s| s.to_string()).collect(),
    }
}

pub struct MockMoo {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
}

impl MockMoo {
    pub async fn start(rules: Vec<Rule>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let rules = rules.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, rules, log).await;
                });
            }
        });

        Self { addr, received }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every line every connection has received, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.received()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    rules: Vec<Rule>,
    log: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    let mut prefix: Option<String> = None;
    let mut suffix: Option<String> = None;

    loop {
        let line = match read_line(&mut stream, &mut buf).await? {
            Some(line) => line,
            None => return Ok(()),
        };
        log.lock().unwrap().push(line.clone());

        if let Some(marker) = line.strip_prefix("PREFIX ") {
            prefix = Some(marker.to_string());
            continue;
        }
        if let Some(marker) = line.strip_prefix("SUFFIX ") {
            suffix = Some(marker.to_string());
            continue;
        }
        if line.starts_with("connect ") {
            write_lines(
                &mut stream,
                &[
                    "Welcome to MockMOO.".to_string(),
                    "*** Connected ***".to_string(),
                    "A featureless void.".to_string(),
                ],
            )
            .await?;
            continue;
        }

        let reply = scripted_reply(&rules, &line);
        match (&prefix, &suffix) {
            (Some(p), Some(s)) => {
                let mut framed = vec![p.clone()];
                framed.extend(reply);
                framed.push(s.clone());
                write_lines(&mut stream, &framed).await?;
            }
            _ => write_lines(&mut stream, &reply).await?,
        }
    }
}

fn scripted_reply(rules: &[Rule], line: &str) -> Vec<String> {
    for rule in rules {
        if line.contains(&rule.needle) {
            return rule.reply.clone();
        }
    }
    if line.starts_with("; ") {
        if line.contains("server_version") {
            return vec!["=> \"2.7.0\"".to_string()];
        }
        if line.contains("function_info") {
            return vec!["=> {\"builtin\", 0, {}, 0}".to_string()];
        }
        return vec!["=> 0".to_string()];
    }
    Vec::new()
}

async fn read_line(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn write_lines(stream: &mut TcpStream, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
    }
    stream.flush().await
}
