//! Source mailbox reader — IMAP over TLS (rustls).
//!
//! Blocking I/O; callers on the async runtime wrap calls in
//! `spawn_blocking`. Sessions are scoped: connect, use, disconnect within
//! one fetch or mark cycle.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::SourceMailConfig;
use crate::error::MailError;
use crate::mail::message::Message;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Reads messages from an IMAP mailbox.
pub struct MailReader {
    config: SourceMailConfig,
    session: Option<ImapSession>,
}

impl MailReader {
    pub fn new(config: SourceMailConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Open a TLS session and authenticate.
    ///
    /// Network and authentication failures both surface as
    /// `MailError::Connection`; retry policy is the caller's concern.
    pub fn connect(&mut self) -> Result<(), MailError> {
        info!(server = %self.config.imap_server, "Connecting to IMAP server");

        let connection_err = |reason: String| MailError::Connection {
            server: self.config.imap_server.clone(),
            reason,
        };

        let mut session = ImapSession::open(&self.config.imap_server, self.config.imap_port)
            .map_err(|e| connection_err(e.to_string()))?;

        let login = format!(
            "LOGIN \"{}\" \"{}\"",
            self.config.address,
            self.config.app_password.expose_secret()
        );
        let lines = session
            .command(&login)
            .map_err(|e| connection_err(e.to_string()))?;
        if !final_line_is_ok(&lines) {
            return Err(connection_err(format!(
                "authentication failed: {}",
                lines.last().map(|l| l.trim_end()).unwrap_or_default()
            )));
        }

        info!("Connected to IMAP server");
        self.session = Some(session);
        Ok(())
    }

    /// Close the session. Tolerant of errors and of never having connected.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.command("LOGOUT") {
                warn!(error = %e, "Error during IMAP logout");
            } else {
                info!("Disconnected from IMAP server");
            }
        }
    }

    /// Fetch messages from `folder` matching the configured selection.
    ///
    /// Per-message fetch or parse failures are logged and the message is
    /// skipped; they never fail the batch.
    pub fn fetch_messages(
        &mut self,
        folder: &str,
        unread_only: bool,
    ) -> Result<Vec<Message>, MailError> {
        let fetch_days = self.config.fetch_days;
        let session = self.session.as_mut().ok_or(MailError::NotConnected)?;

        session.command_ok(&format!("SELECT \"{folder}\""), "select folder")?;

        let query = build_search_query(unread_only, fetch_days, Utc::now());
        debug!(%query, "Searching mailbox");
        let lines = session.command_ok(&format!("SEARCH {query}"), "search")?;
        let ids = parse_search_response(&lines);
        info!(count = ids.len(), "Found messages matching query");

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            match fetch_single(session, id) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => warn!(id, "Skipping unparseable message"),
                Err(e) => warn!(id, error = %e, "Failed to fetch message, skipping"),
            }
        }
        Ok(messages)
    }

    /// Set the `\Seen` flag on each id. Best-effort per id.
    pub fn mark_as_read(&mut self, ids: &[String], folder: &str) -> Result<(), MailError> {
        let session = self.session.as_mut().ok_or(MailError::NotConnected)?;
        session.command_ok(&format!("SELECT \"{folder}\""), "select folder")?;

        for id in ids {
            match session.command_ok(&format!("STORE {id} +FLAGS (\\Seen)"), "store flag") {
                Ok(_) => debug!(id, "Marked message as read"),
                Err(e) => warn!(id, error = %e, "Could not mark message as read"),
            }
        }
        Ok(())
    }

    /// Apply a Gmail label to each id. Best-effort per id.
    pub fn add_label(&mut self, ids: &[String], label: &str, folder: &str) -> Result<(), MailError> {
        let session = self.session.as_mut().ok_or(MailError::NotConnected)?;
        session.command_ok(&format!("SELECT \"{folder}\""), "select folder")?;

        for id in ids {
            match session.command_ok(
                &format!("STORE {id} +X-GM-LABELS (\"{label}\")"),
                "store label",
            ) {
                Ok(_) => debug!(id, label, "Added label to message"),
                Err(e) => warn!(id, error = %e, "Could not add label to message"),
            }
        }
        Ok(())
    }

    /// Scoped session helper: connect, run `f`, always disconnect.
    pub fn with_session<T>(
        config: SourceMailConfig,
        f: impl FnOnce(&mut MailReader) -> Result<T, MailError>,
    ) -> Result<T, MailError> {
        let mut reader = MailReader::new(config);
        reader.connect()?;
        let result = f(&mut reader);
        reader.disconnect();
        result
    }
}

fn fetch_single(session: &mut ImapSession, id: &str) -> Result<Option<Message>, MailError> {
    let lines = session.command_ok(&format!("FETCH {id} RFC822"), "fetch")?;

    // Everything between the untagged FETCH line and the closing ")" is the
    // raw message.
    let raw: String = lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(3))
        .cloned()
        .collect();

    Ok(Message::parse(id, raw.as_bytes()))
}

/// Build the IMAP search query for the configured selection.
///
/// Predicates are conjunctive and the combined form is wrapped in a single
/// group; with no predicates the query is `ALL`.
pub fn build_search_query(unread_only: bool, fetch_days: u32, now: DateTime<Utc>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if unread_only {
        parts.push("UNSEEN".to_string());
    }

    if fetch_days > 0 {
        let since = now - chrono::Duration::days(i64::from(fetch_days));
        parts.push(format!("SINCE \"{}\"", since.format("%d-%b-%Y")));
    }

    if parts.is_empty() {
        return "ALL".to_string();
    }

    format!("({})", parts.join(" "))
}

/// Extract message ids from untagged `* SEARCH` response lines.
pub fn parse_search_response(lines: &[String]) -> Vec<String> {
    let mut ids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            ids.extend(
                line.split_whitespace()
                    .skip(2)
                    .map(|id| id.trim_end().to_string()),
            );
        }
    }
    ids
}

fn final_line_is_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|line| {
        line.split_whitespace()
            .nth(1)
            .is_some_and(|status| status.eq_ignore_ascii_case("OK"))
    })
}

// ── TLS session ─────────────────────────────────────────────────────

/// A tagged-command IMAP session over rustls.
struct ImapSession {
    stream: TlsStream,
    tag: u32,
}

impl ImapSession {
    fn open(server: &str, port: u16) -> Result<Self, MailError> {
        let tcp = TcpStream::connect((server, port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(server.to_string())
            .map_err(|e| MailError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") {
            return Err(MailError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailError::Protocol("connection closed".to_string())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a tagged command and collect response lines up to the tagged
    /// completion line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, MailError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);

        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Like `command`, but a non-OK completion is a protocol error.
    fn command_ok(&mut self, cmd: &str, context: &str) -> Result<Vec<String>, MailError> {
        let lines = self.command(cmd)?;
        if !final_line_is_ok(&lines) {
            return Err(MailError::Protocol(format!(
                "{context} failed: {}",
                lines.last().map(|l| l.trim_end()).unwrap_or_default()
            )));
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use secrecy::SecretString;

    use super::*;

    fn test_config() -> SourceMailConfig {
        SourceMailConfig {
            address: "source@example.com".to_string(),
            app_password: SecretString::from("secret"),
            imap_server: "imap.example.com".to_string(),
            imap_port: 993,
            fetch_days: 1,
            mark_as_read: true,
        }
    }

    // ── Search query construction ───────────────────────────────────

    #[test]
    fn query_unread_with_lookback() {
        let now = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        let query = build_search_query(true, 7, now);
        assert_eq!(query, "(UNSEEN SINCE \"01-Jan-2024\")");
    }

    #[test]
    fn query_all_when_no_predicates() {
        assert_eq!(build_search_query(false, 0, Utc::now()), "ALL");
    }

    #[test]
    fn query_unread_only() {
        assert_eq!(build_search_query(true, 0, Utc::now()), "(UNSEEN)");
    }

    #[test]
    fn query_lookback_only() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(
            build_search_query(false, 3, now),
            "(SINCE \"07-Mar-2024\")"
        );
    }

    // ── Search response parsing ─────────────────────────────────────

    #[test]
    fn search_response_yields_ids() {
        let lines = vec![
            "* SEARCH 3 7 12\r\n".to_string(),
            "A3 OK SEARCH completed\r\n".to_string(),
        ];
        assert_eq!(parse_search_response(&lines), vec!["3", "7", "12"]);
    }

    #[test]
    fn empty_search_response_yields_no_ids() {
        let lines = vec![
            "* SEARCH\r\n".to_string(),
            "A3 OK SEARCH completed\r\n".to_string(),
        ];
        assert!(parse_search_response(&lines).is_empty());
    }

    #[test]
    fn completion_status_detection() {
        assert!(final_line_is_ok(&["A2 OK done\r\n".to_string()]));
        assert!(!final_line_is_ok(&["A2 NO failure\r\n".to_string()]));
        assert!(!final_line_is_ok(&["A2 BAD syntax\r\n".to_string()]));
        assert!(!final_line_is_ok(&[]));
    }

    // ── Session state errors ────────────────────────────────────────

    #[test]
    fn fetch_before_connect_fails() {
        let mut reader = MailReader::new(test_config());
        let err = reader.fetch_messages("INBOX", true).unwrap_err();
        assert!(matches!(err, MailError::NotConnected));
    }

    #[test]
    fn mark_as_read_before_connect_fails() {
        let mut reader = MailReader::new(test_config());
        let err = reader
            .mark_as_read(&["1".to_string()], "INBOX")
            .unwrap_err();
        assert!(matches!(err, MailError::NotConnected));
    }

    #[test]
    fn add_label_before_connect_fails() {
        let mut reader = MailReader::new(test_config());
        let err = reader
            .add_label(&["1".to_string()], "Processed", "INBOX")
            .unwrap_err();
        assert!(matches!(err, MailError::NotConnected));
    }

    #[test]
    fn disconnect_without_session_is_noop() {
        let mut reader = MailReader::new(test_config());
        reader.disconnect();
        reader.disconnect();
    }
}
