//! Job scheduler — runs the fetch → process → acknowledge cycle once or on
//! a recurring daily trigger.
//!
//! The daemon loop is serial: a cycle completes (including mark-as-read)
//! before the next poll tick is evaluated. Termination signals flip a
//! shared flag that the loop observes once per iteration; in-flight work is
//! never interrupted.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

use crate::config::{self, Config, SourceMailConfig};
use crate::error::{ConfigError, Error, MailError};
use crate::mail::{MailReader, Message};
use crate::pipeline::{Pipeline, ProcessingResult};

const POLL_INTERVAL: Duration = Duration::from_secs(30);
const INBOX: &str = "INBOX";

/// Fetch/acknowledge seam over the source mailbox.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_unread(&self) -> Result<Vec<Message>, MailError>;
    async fn mark_read(&self, ids: &[String]) -> Result<(), MailError>;
}

/// Production source backed by the IMAP reader. Each call runs the
/// blocking reader on the blocking pool inside its own scoped session.
pub struct ImapMailSource {
    config: SourceMailConfig,
}

impl ImapMailSource {
    pub fn new(config: SourceMailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch_unread(&self) -> Result<Vec<Message>, MailError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            MailReader::with_session(config, |reader| reader.fetch_messages(INBOX, true))
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }

    async fn mark_read(&self, ids: &[String]) -> Result<(), MailError> {
        let config = self.config.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || {
            MailReader::with_session(config, |reader| reader.mark_as_read(&ids, INBOX))
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }
}

/// Drives processing cycles, once or on the configured daily trigger.
pub struct Scheduler {
    config: Arc<Config>,
    source: Arc<dyn MailSource>,
    pipeline: Arc<dyn Pipeline>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn MailSource>,
        pipeline: Arc<dyn Pipeline>,
    ) -> Self {
        Self {
            config,
            source,
            pipeline,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one fetch → process → acknowledge cycle and return the result.
    ///
    /// Mark-as-read happens only when something was processed and the
    /// source configuration asks for it, in a fresh reader session.
    pub async fn run_once(&self) -> Result<ProcessingResult, Error> {
        info!("Starting processing cycle");

        let messages = self.source.fetch_unread().await.map_err(Error::from)?;
        let result = self.pipeline.process(&messages).await?;

        if result.processed > 0 && self.config.source_email.mark_as_read {
            let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
            self.source.mark_read(&ids).await?;
            debug!(count = ids.len(), "Marked messages as read");
        }

        info!(
            processed = result.processed,
            sent = result.sent,
            errors = result.errors.len(),
            "Processing cycle complete"
        );
        Ok(result)
    }

    /// Run the daemon loop until a termination signal or `stop()`.
    ///
    /// The trigger fires on wall-clock time in the configured timezone. A
    /// failed cycle is logged and never propagates out of the loop.
    pub async fn start(&self) -> Result<(), Error> {
        let schedule = &self.config.schedule;
        if !schedule.enabled {
            warn!("Scheduler is disabled in configuration");
            return Ok(());
        }

        let tz: Tz = schedule
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "schedule.timezone".to_string(),
                message: format!("unknown IANA timezone \"{}\"", schedule.timezone),
            })?;
        let trigger = daily_schedule(&schedule.time)?;

        self.install_signal_handlers();
        self.running.store(true, Ordering::Relaxed);

        info!(
            time = %schedule.time,
            timezone = %schedule.timezone,
            "Scheduler started"
        );
        let mut next = trigger.upcoming(tz).next();
        if let Some(at) = next {
            info!(next_run = %at, "Next trigger computed");
        }

        while self.running.load(Ordering::Relaxed) {
            let now = Utc::now().with_timezone(&tz);
            if let Some(at) = next
                && now >= at
            {
                info!(trigger = %at, "Scheduled trigger fired");
                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Processing cycle failed");
                }
                next = trigger.after(&Utc::now().with_timezone(&tz)).next();
                if let Some(at) = next {
                    info!(next_run = %at, "Next trigger computed");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Request shutdown; the loop exits at its next tick. Never interrupts
    /// an in-flight cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn install_signal_handlers(&self) {
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("Termination signal received, shutting down");
            running.store(false, Ordering::Relaxed);
        });
    }
}

/// Cron schedule firing daily at the given `"HH:MM"` local time.
pub fn daily_schedule(time_of_day: &str) -> Result<cron::Schedule, ConfigError> {
    let (hour, minute) = config::parse_time_of_day(time_of_day)?;
    let expression = format!("0 {minute} {hour} * * *");
    cron::Schedule::from_str(&expression).map_err(|e| ConfigError::InvalidValue {
        key: "schedule.time".to_string(),
        message: e.to_string(),
    })
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
