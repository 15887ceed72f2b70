//! Message processing pipelines.
//!
//! A pipeline takes the batch fetched from the source mailbox and returns a
//! `ProcessingResult`. Per-message failures are isolated inside the run;
//! only failures that invalidate the whole cycle (no relay session, no LLM
//! client) surface as errors.

pub mod translate;

pub use translate::TranslationPipeline;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::mail::Message;

/// Outcome of one pipeline invocation. `sent <= processed` holds by
/// construction.
#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    pub processed: usize,
    pub sent: usize,
    pub errors: Vec<String>,
}

impl ProcessingResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A batch message processor.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn process(&self, messages: &[Message]) -> Result<ProcessingResult, PipelineError>;
}

/// Log-only pipeline — records every message as processed but not sent.
///
/// The safe default when no translation pipeline is wired in, and the
/// backing for `--dry-run`.
pub struct LogPipeline;

#[async_trait]
impl Pipeline for LogPipeline {
    async fn process(&self, messages: &[Message]) -> Result<ProcessingResult, PipelineError> {
        info!(count = messages.len(), "Log pipeline: would process messages");
        for message in messages {
            debug!(
                id = %message.id,
                subject = %message.subject,
                sender = %message.sender,
                "Would process message"
            );
        }

        Ok(ProcessingResult {
            processed: messages.len(),
            sent: 0,
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            subject: format!("Subject {id}"),
            sender: "news@example.com".to_string(),
            date: Utc::now(),
            body_text: "body".to_string(),
            body_html: None,
        }
    }

    #[tokio::test]
    async fn log_pipeline_counts_without_sending() {
        let messages = vec![message("1"), message("2"), message("3")];
        let result = LogPipeline.process(&messages).await.unwrap();

        assert_eq!(result.processed, 3);
        assert_eq!(result.sent, 0);
        assert!(result.errors.is_empty());
        assert!(result.sent <= result.processed);
    }

    #[tokio::test]
    async fn log_pipeline_empty_input_is_zero_result() {
        let result = LogPipeline.process(&[]).await.unwrap();
        assert_eq!(result.processed, 0);
        assert_eq!(result.sent, 0);
        assert!(!result.has_errors());
    }
}
