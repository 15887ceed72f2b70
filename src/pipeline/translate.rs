//! Translation pipeline — LLM transform plus SMTP delivery.

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::{LanguageConfig, LlmConfig, TargetMailConfig};
use crate::error::PipelineError;
use crate::llm::{self, ChatMessage, LlmClient};
use crate::mail::{MailSender, Message};
use crate::pipeline::{Pipeline, ProcessingResult};

/// Translates each message into the configured target language and
/// delivers the result to the destination mailbox.
pub struct TranslationPipeline {
    llm: LlmConfig,
    language: LanguageConfig,
    target: TargetMailConfig,
}

impl TranslationPipeline {
    pub fn new(llm: LlmConfig, language: LanguageConfig, target: TargetMailConfig) -> Self {
        Self {
            llm,
            language,
            target,
        }
    }

    async fn translate_and_send(
        &self,
        client: &dyn LlmClient,
        sender: &MailSender,
        message: &Message,
    ) -> Result<(), PipelineError> {
        let conversation = vec![
            ChatMessage::system(system_prompt(&self.language)),
            ChatMessage::user(user_prompt(message)),
        ];
        let response = client.complete(&conversation).await?;

        let subject = outgoing_subject(&self.language, &message.subject);
        sender
            .send(&self.target.address, &subject, &response.content, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Pipeline for TranslationPipeline {
    async fn process(&self, messages: &[Message]) -> Result<ProcessingResult, PipelineError> {
        if messages.is_empty() {
            info!("No messages to process");
            return Ok(ProcessingResult::default());
        }

        let client = llm::create_client(&self.llm);

        // One relay session per batch; a failure to open it fails the cycle.
        let mut sender = MailSender::new(self.target.clone());
        sender.connect().await?;

        let mut sent = 0;
        let mut errors = Vec::new();
        for message in messages {
            match self
                .translate_and_send(client.as_ref(), &sender, message)
                .await
            {
                Ok(()) => {
                    info!(id = %message.id, subject = %message.subject, "Message translated and delivered");
                    sent += 1;
                }
                Err(e) => {
                    error!(id = %message.id, error = %e, "Failed to process message");
                    errors.push(format!("failed to process {}: {e}", message.id));
                }
            }
        }
        sender.disconnect();

        Ok(ProcessingResult {
            processed: messages.len(),
            sent,
            errors,
        })
    }
}

fn system_prompt(language: &LanguageConfig) -> String {
    format!(
        "You are a translator preparing reading practice for a language learner. \
         Translate the email the user provides into {target}, adapting vocabulary \
         and sentence structure to CEFR level {level}. Preserve the original \
         meaning and tone. Reply with the translated text only.",
        target = language.target,
        level = language.level,
    )
}

fn user_prompt(message: &Message) -> String {
    format!("Subject: {}\n\n{}", message.subject, message.body_text)
}

fn outgoing_subject(language: &LanguageConfig, original: &str) -> String {
    format!("[{}] {}", language.target, original)
}
