//! Mailbox access — IMAP reader (inbound) and SMTP sender (outbound).

pub mod message;
pub mod reader;
pub mod sender;

pub use message::Message;
pub use reader::MailReader;
pub use sender::MailSender;
