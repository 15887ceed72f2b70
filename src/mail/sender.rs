//! Outbound mail dispatcher — SMTP via lettre with STARTTLS.
//!
//! Transient network failures (timeouts, I/O errors, 4xx responses) are
//! retried a bounded number of times with a flat delay; permanent failures
//! such as an authentication rejection propagate immediately.

use std::time::Duration;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::TargetMailConfig;
use crate::error::MailError;

/// Sends mail through the destination relay.
pub struct MailSender {
    config: TargetMailConfig,
    transport: Option<SmtpTransport>,
}

impl MailSender {
    pub fn new(config: TargetMailConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    /// Open the relay session: STARTTLS upgrade plus credential auth,
    /// verified with a connection check. Bounded retry on transient errors.
    pub async fn connect(&mut self) -> Result<(), MailError> {
        info!(server = %self.config.smtp_server, "Connecting to SMTP relay");

        let config = &self.config;
        let transport = retry_transient(
            config.retry_count,
            config.retry_delay(),
            is_transient,
            || {
                let transport = SmtpTransport::starttls_relay(&config.smtp_server)
                    .map_err(MailError::from)?
                    .port(config.smtp_port)
                    .credentials(Credentials::new(
                        config.smtp_user.clone(),
                        config.smtp_password.expose_secret().to_string(),
                    ))
                    .build();

                if !transport.test_connection()? {
                    return Err(MailError::Connection {
                        server: config.smtp_server.clone(),
                        reason: "server rejected connection check".to_string(),
                    });
                }
                Ok(transport)
            },
        )
        .await?;

        info!("Connected to SMTP relay");
        self.transport = Some(transport);
        Ok(())
    }

    /// Deliver a message. With an HTML alternative the message is
    /// `multipart/alternative` with the plain part first.
    ///
    /// Each send attempt is independent; a failed send does not reopen
    /// the session.
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        body_text: &str,
        body_html: Option<&str>,
    ) -> Result<(), MailError> {
        let transport = self.transport.as_ref().ok_or(MailError::NotConnected)?;
        let message = self.compose(to, subject, body_text, body_html)?;

        retry_transient(
            self.config.retry_count,
            self.config.retry_delay(),
            is_transient,
            || {
                transport
                    .send(&message)
                    .map(|_| ())
                    .map_err(MailError::from)
            },
        )
        .await?;

        info!(to, subject, "Mail sent");
        Ok(())
    }

    /// Close the relay session. Tolerant of never having connected.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("Disconnected from SMTP relay");
        }
    }

    fn compose(
        &self,
        to: &str,
        subject: &str,
        body_text: &str,
        body_html: Option<&str>,
    ) -> Result<lettre::Message, MailError> {
        let from = Mailbox::new(
            Some(self.config.sender_name.clone()),
            self.config.smtp_user.parse::<Address>()?,
        );
        let builder = lettre::Message::builder()
            .from(from)
            .to(to.parse::<Mailbox>()?)
            .subject(subject);

        let message = match body_html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                body_text.to_string(),
                html.to_string(),
            ))?,
            None => builder.body(body_text.to_string())?,
        };
        Ok(message)
    }
}

fn is_transient(error: &MailError) -> bool {
    match error {
        MailError::Smtp(e) => smtp_is_transient(e),
        MailError::Io(_) => true,
        _ => false,
    }
}

fn smtp_is_transient(error: &lettre::transport::smtp::Error) -> bool {
    if error.is_timeout() || error.is_transient() {
        return true;
    }
    // Network-level failures carry an io::Error somewhere in the chain.
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        if inner.downcast_ref::<std::io::Error>().is_some() {
            return true;
        }
        source = inner.source();
    }
    false
}

/// Run `op`, retrying up to `retries` extra times with a flat `delay`
/// between attempts while `is_transient` holds for the error. The final
/// error is returned unchanged once retries are exhausted; non-transient
/// errors return immediately.
pub(crate) async fn retry_transient<T, E, F>(
    retries: u32,
    delay: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries && is_transient(&e) => {
                attempt += 1;
                warn!(
                    attempt,
                    error = %e,
                    delay_secs = delay.as_secs(),
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use secrecy::SecretString;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum FakeError {
        #[error("transient glitch")]
        Transient,
        #[error("permanent refusal")]
        Permanent,
    }

    fn fake_transient(error: &FakeError) -> bool {
        matches!(error, FakeError::Transient)
    }

    fn test_sender() -> MailSender {
        MailSender::new(TargetMailConfig {
            address: "target@example.com".to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_user: "user@example.com".to_string(),
            smtp_password: SecretString::from("pw"),
            sender_name: "Lingopost".to_string(),
            retry_count: 3,
            retry_delay: 0.0,
        })
    }

    // ── Retry policy ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let delay = Duration::from_secs(300);
        let started = tokio::time::Instant::now();

        let result = retry_transient(3, delay, fake_transient, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 2 {
                Err(FakeError::Transient)
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let delay = Duration::from_secs(300);
        let started = tokio::time::Instant::now();

        let result: Result<(), FakeError> = retry_transient(2, delay, fake_transient, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Transient)
        })
        .await;

        assert!(matches!(result, Err(FakeError::Transient)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), FakeError> =
            retry_transient(3, Duration::from_secs(300), fake_transient, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::Permanent)
            })
            .await;

        assert!(matches!(result, Err(FakeError::Permanent)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), FakeError> =
            retry_transient(0, Duration::ZERO, fake_transient, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::Transient)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    // ── Composition ─────────────────────────────────────────────────

    #[test]
    fn compose_plain_only_is_single_part() {
        let sender = test_sender();
        let message = sender
            .compose("to@example.com", "Hello", "plain body", None)
            .expect("composes");
        let rendered = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(rendered.contains("Subject: Hello"));
        assert!(rendered.contains("Lingopost <user@example.com>"));
        assert!(rendered.contains("To: to@example.com"));
        assert!(rendered.contains("plain body"));
        assert!(!rendered.contains("multipart/alternative"));
    }

    #[test]
    fn compose_with_html_is_multipart_alternative() {
        let sender = test_sender();
        let message = sender
            .compose(
                "to@example.com",
                "Hello",
                "plain body",
                Some("<p>html body</p>"),
            )
            .expect("composes");
        let rendered = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(rendered.contains("multipart/alternative"));
        let plain_at = rendered.find("plain body").expect("plain part");
        let html_at = rendered.find("<p>html body</p>").expect("html part");
        assert!(plain_at < html_at, "plain part must come first");
    }

    #[test]
    fn compose_rejects_invalid_recipient() {
        let sender = test_sender();
        let err = sender
            .compose("not an address", "Hello", "body", None)
            .unwrap_err();
        assert!(matches!(err, MailError::Address(_)));
    }

    // ── Session state errors ────────────────────────────────────────

    #[tokio::test]
    async fn send_before_connect_fails() {
        let sender = test_sender();
        let err = sender
            .send("to@example.com", "Hello", "body", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::NotConnected));
    }

    #[test]
    fn disconnect_without_session_is_noop() {
        let mut sender = test_sender();
        sender.disconnect();
        sender.disconnect();
    }
}
