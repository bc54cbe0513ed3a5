//! FTP connector: uploads each payload as a timestamped JSON file.
//!
//! Implements the small subset of RFC 959 needed for uploads over a
//! passive-mode data connection: `USER`/`PASS`, `TYPE I`, `CWD`, `PASV`,
//! `STOR`, `NOOP`, `QUIT`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iotsim_core::target_system::{FtpSettings, TargetSystemType};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::connector::{encode, Ack, Connector, Session};
use crate::error::ConnectorError;

pub struct FtpConnector {
    settings: FtpSettings,
    device_tag: String,
}

impl FtpConnector {
    /// `device_tag` is embedded in uploaded file names.
    pub fn new(settings: FtpSettings, device_tag: &str) -> Self {
        Self {
            settings,
            device_tag: sanitize(device_tag),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout.max(1))
    }

    /// Open the control connection, log in, and enter the target directory.
    async fn login(&self) -> Result<Control, ConnectorError> {
        let s = &self.settings;
        let mut control = Control::open(&s.host, s.port, self.timeout()).await?;

        let greeting = control.read_reply().await?;
        expect(&greeting, &[220], "greeting")?;

        let user = control.command(&format!("USER {}", s.username)).await?;
        match user.code {
            230 => {}
            331 => {
                let password = match s.password.as_deref() {
                    Some(p) => p.to_string(),
                    None if s.username == "anonymous" => "iotsim@".to_string(),
                    None => String::new(),
                };
                let pass = control.command(&format!("PASS {password}")).await?;
                expect(&pass, &[230, 202], "login")?;
            }
            _ => return Err(reply_error(&user, "login")),
        }

        let binary = control.command("TYPE I").await?;
        expect(&binary, &[200], "TYPE I")?;

        if !s.directory.is_empty() && s.directory != "/" {
            let cwd = control.command(&format!("CWD {}", s.directory)).await?;
            expect(&cwd, &[250, 200], "CWD")?;
        }
        Ok(control)
    }
}

/// Keep only characters that are safe in a file name.
fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `<prefix>_<device>_<UTC timestamp>_<seq>.json`
fn upload_name(prefix: &str, device_tag: &str, at: DateTime<Utc>, seq: u64) -> String {
    format!(
        "{}_{}_{}_{:06}.json",
        sanitize(prefix),
        device_tag,
        at.format("%Y%m%dT%H%M%S%.3fZ"),
        seq
    )
}

// ---------------------------------------------------------------------------
// Control connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is_positive(&self) -> bool {
        (100..400).contains(&self.code)
    }
}

fn expect(reply: &Reply, codes: &[u16], context: &str) -> Result<(), ConnectorError> {
    if codes.contains(&reply.code) {
        Ok(())
    } else {
        Err(reply_error(reply, context))
    }
}

fn reply_error(reply: &Reply, context: &str) -> ConnectorError {
    let detail = format!("{context}: {} {}", reply.code, reply.text);
    match reply.code {
        530 | 532 => ConnectorError::Auth(detail),
        421 => ConnectorError::ConnectionLost(detail),
        400..=499 => ConnectorError::TransientNetwork(detail),
        _ => ConnectorError::Protocol(detail),
    }
}

/// Split `"227 text"` or `"227-text"` into code, separator and text.
fn parse_line(line: &str) -> Option<(u16, char, &str)> {
    let code = line.get(..3)?.parse().ok()?;
    let sep = line[3..].chars().next().unwrap_or(' ');
    let text = line.get(4..).unwrap_or("").trim_end();
    Some((code, sep, text))
}

/// Extract the data port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let parts: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [_, _, _, _, p1, p2] if *p1 < 256 && *p2 < 256 => Some(p1 * 256 + p2),
        _ => None,
    }
}

struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    host: String,
    timeout: Duration,
}

impl Control {
    async fn open(host: &str, port: u16, timeout: Duration) -> Result<Self, ConnectorError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ConnectorError::timeout(timeout))?
            .map_err(|e| ConnectorError::TransientNetwork(format!("connect {host}:{port}: {e}")))?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
            host: host.to_string(),
            timeout,
        })
    }

    async fn read_reply(&mut self) -> Result<Reply, ConnectorError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.read_reply_inner())
            .await
            .map_err(|_| ConnectorError::timeout(timeout))?
    }

    async fn read_reply_inner(&mut self) -> Result<Reply, ConnectorError> {
        let mut first: Option<(u16, String)> = None;
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| ConnectorError::from_io(&e))?;
            if n == 0 {
                return Err(ConnectorError::ConnectionLost("control connection closed".into()));
            }
            let Some((code, sep, text)) = parse_line(&line) else {
                if first.is_some() {
                    // Continuation line of a multi-line reply.
                    continue;
                }
                return Err(ConnectorError::Protocol(format!("Malformed reply: {}", line.trim_end())));
            };
            match first.take() {
                None if sep == '-' => first = Some((code, text.to_string())),
                None => return Ok(Reply { code, text: text.to_string() }),
                Some((start, text0)) if start == code && sep == ' ' => {
                    return Ok(Reply { code, text: text0 });
                }
                Some(pending) => first = Some(pending),
            }
        }
    }

    async fn command(&mut self, line: &str) -> Result<Reply, ConnectorError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.writer.write_all(format!("{line}\r\n").as_bytes()))
            .await
            .map_err(|_| ConnectorError::timeout(timeout))?
            .map_err(|e| ConnectorError::from_io(&e))?;
        self.read_reply().await
    }

    /// Upload `body` as `name` over a passive data connection.
    async fn store(&mut self, name: &str, body: &[u8]) -> Result<Reply, ConnectorError> {
        let pasv = self.command("PASV").await?;
        expect(&pasv, &[227], "PASV")?;
        let port = parse_pasv_port(&pasv.text)
            .ok_or_else(|| ConnectorError::Protocol(format!("Bad PASV reply: {}", pasv.text)))?;

        // The advertised address is often an internal one; reuse the control host.
        let timeout = self.timeout;
        let mut data = tokio::time::timeout(timeout, TcpStream::connect((self.host.as_str(), port)))
            .await
            .map_err(|_| ConnectorError::timeout(timeout))?
            .map_err(|e| ConnectorError::TransientNetwork(format!("data connection: {e}")))?;

        let stor = self.command(&format!("STOR {name}")).await?;
        expect(&stor, &[125, 150], "STOR")?;

        tokio::time::timeout(timeout, async {
            data.write_all(body).await?;
            data.shutdown().await
        })
        .await
        .map_err(|_| ConnectorError::timeout(timeout))?
        .map_err(|e| ConnectorError::from_io(&e))?;
        drop(data);

        let done = self.read_reply().await?;
        expect(&done, &[226, 250], "transfer")?;
        Ok(done)
    }

    async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            tracing::debug!(error = %e, "FTP QUIT failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[async_trait]
impl Connector for FtpConnector {
    fn system_type(&self) -> TargetSystemType {
        TargetSystemType::Ftp
    }

    fn describe(&self) -> String {
        format!(
            "ftp://{}:{}{}",
            self.settings.host, self.settings.port, self.settings.directory
        )
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        let control = self.login().await?;
        tracing::debug!(target = %self.describe(), "FTP logged in");
        Ok(Box::new(FtpSession {
            control: Some(control),
            prefix: self.settings.file_prefix.clone(),
            device_tag: self.device_tag.clone(),
            seq: 0,
        }))
    }

    /// Log in and change directory without uploading anything.
    async fn probe(&self, _sample: &Value) -> Result<String, ConnectorError> {
        let mut control = self.login().await?;
        let noop = control.command("NOOP").await?;
        if !noop.is_positive() {
            return Err(reply_error(&noop, "NOOP"));
        }
        control.quit().await;
        Ok(format!("Logged in to {}", self.describe()))
    }
}

struct FtpSession {
    control: Option<Control>,
    prefix: String,
    device_tag: String,
    seq: u64,
}

#[async_trait]
impl Session for FtpSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        let body = encode(payload)?;
        let control = self
            .control
            .as_mut()
            .ok_or_else(|| ConnectorError::ConnectionLost("session closed".into()))?;

        self.seq += 1;
        let name = upload_name(&self.prefix, &self.device_tag, Utc::now(), self.seq);
        let result = control.store(&name, &body).await;
        if let Err(e) = &result {
            if e.needs_reconnect() {
                self.control = None;
            }
        }
        result.map(|_| Ack::new(format!("stored {name}"), body.len()))
    }

    async fn disconnect(self: Box<Self>) {
        if let Some(control) = self.control {
            control.quit().await;
        }
    }
}
