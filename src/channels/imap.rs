//! Minimal IMAP client over rustls.
//!
//! Speaks just enough IMAP4rev1 to poll one folder: LOGIN, SELECT,
//! UID SEARCH UNSEEN, UID FETCH BODY.PEEK[], UID STORE +FLAGS (\Seen), LOGOUT.
//! The socket is blocking, so every session runs inside `spawn_blocking`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use super::{MailSource, RawEmail};
use crate::config::ImapConfig;
use crate::error::MailError;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// IMAP mailbox reader.
pub struct ImapSource {
    config: ImapConfig,
}

impl ImapSource {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSource for ImapSource {
    async fn fetch_unseen(&self) -> Result<Vec<RawEmail>, MailError> {
        let cfg = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::open(&cfg)?;
            let fetched = session.fetch_unseen();
            session.logout();
            fetched
        })
        .await
        .map_err(|e| MailError::Protocol(format!("IMAP task failed: {e}")))?
    }

    async fn mark_seen(&self, uids: &[String]) -> Result<(), MailError> {
        if uids.is_empty() {
            return Ok(());
        }
        let cfg = self.config.clone();
        let uid_set = uids.join(",");
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::open(&cfg)?;
            let stored = session
                .command(&format!("UID STORE {uid_set} +FLAGS (\\Seen)"))
                .map(|_| ());
            session.logout();
            stored
        })
        .await
        .map_err(|e| MailError::Protocol(format!("IMAP task failed: {e}")))?
    }
}

/// Untagged lines and literal payloads returned by one command.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

struct ImapSession {
    stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
    next_tag: u32,
    host: String,
}

impl ImapSession {
    /// Connect, authenticate and select the configured folder.
    fn open(config: &ImapConfig) -> Result<Self, MailError> {
        let connect_err = |reason: String| MailError::Connect {
            host: config.host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| connect_err(e.to_string()))?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name =
            ServerName::try_from(config.host.clone()).map_err(|e| connect_err(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
            host: config.host.clone(),
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailError::Protocol(format!("unexpected greeting: {}", greeting.trim())));
        }

        session
            .command(&format!(
                "LOGIN {} {}",
                quote(&config.username),
                quote(config.password.expose_secret())
            ))
            .map_err(|_| MailError::AuthFailed {
                user: config.username.clone(),
            })?;
        session.command(&format!("SELECT {}", quote(&config.folder)))?;
        debug!(host = %config.host, folder = %config.folder, "IMAP session open");
        Ok(session)
    }

    fn fetch_unseen(&mut self) -> Result<Vec<RawEmail>, MailError> {
        let search = self.command("UID SEARCH UNSEEN")?;
        let uids: Vec<String> = search
            .lines
            .iter()
            .filter_map(|l| l.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace().map(str::to_string))
            .collect();

        let mut emails = Vec::with_capacity(uids.len());
        for uid in uids {
            let fetched = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
            match fetched.literals.into_iter().next() {
                Some(bytes) => emails.push(RawEmail { uid, bytes }),
                None => debug!(uid = %uid, "FETCH returned no body"),
            }
        }
        if !emails.is_empty() {
            info!(host = %self.host, count = emails.len(), "Fetched unseen messages");
        }
        Ok(emails)
    }

    fn logout(&mut self) {
        let _ = self.command("LOGOUT");
    }

    /// Send a tagged command and collect its response up to the tagged status.
    fn command(&mut self, cmd: &str) -> Result<Response, MailError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let line = format!("{tag} {cmd}\r\n");
        self.stream
            .write_all(line.as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(|e| MailError::Protocol(format!("write failed: {e}")))?;

        let tagged_prefix = format!("{tag} ");
        let mut response = Response::default();
        loop {
            let mut line = self.read_line()?;
            // A literal may be followed by more of the same logical line.
            while let Some(len) = literal_len(&line) {
                response.literals.push(self.read_exact(len)?);
                line.push_str(&self.read_line()?);
            }

            if let Some(status) = line.strip_prefix(&tagged_prefix) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(MailError::Protocol(format!(
                    "{} failed: {}",
                    cmd.split_whitespace().next().unwrap_or(cmd),
                    status.trim()
                )));
            }
            response.lines.push(line);
        }
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailError::Protocol("IMAP connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(MailError::Protocol(format!("read failed: {e}"))),
            }
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, MailError> {
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .map_err(|e| MailError::Protocol(format!("literal read failed: {e}")))?;
        Ok(buf)
    }
}

/// Size of a `{n}` literal announced at the end of a line.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix("\r\n")?.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
