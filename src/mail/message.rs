//! Parsed mail message record.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};

/// A message fetched from the source mailbox.
///
/// Immutable once constructed from a wire payload; the id is the
/// mailbox-assigned sequence id used for flag updates.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub subject: String,
    /// Formatted From header, `"Name <addr>"` when a display name exists.
    pub sender: String,
    pub date: DateTime<Utc>,
    pub body_text: String,
    pub body_html: Option<String>,
}

impl Message {
    /// Parse a raw RFC 822 payload into a `Message`.
    ///
    /// Returns `None` only when the payload is not parseable at all.
    /// Individual malformed fields degrade instead of failing: missing
    /// headers become empty strings and unparsable dates fall back to now.
    pub fn parse(id: impl Into<String>, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let body_html = first_body(&parsed, BodyKind::Html);
        Some(Self {
            id: id.into(),
            subject: parsed.subject().unwrap_or_default().to_string(),
            sender: format_sender(&parsed),
            date: parse_date(parsed.date()),
            body_text: first_body(&parsed, BodyKind::Plain).unwrap_or_default(),
            body_html,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Plain,
    Html,
}

/// First part of the requested media type, or `None` when the message
/// carries no such part. Charset decoding (with replacement on failure)
/// is handled by the parser.
fn first_body(parsed: &mail_parser::Message, kind: BodyKind) -> Option<String> {
    for part in &parsed.parts {
        match (&part.body, kind) {
            (PartType::Text(text), BodyKind::Plain) => return Some(text.to_string()),
            (PartType::Html(html), BodyKind::Html) => return Some(html.to_string()),
            _ => {}
        }
    }
    None
}

fn format_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return String::new();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(email)) => format!("{name} <{email}>"),
        (None, Some(email)) => email.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

fn parse_date(date: Option<&mail_parser::DateTime>) -> DateTime<Utc> {
    date.and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    fn parse(raw: &str) -> Message {
        Message::parse("1", raw.as_bytes()).expect("parses")
    }

    #[test]
    fn plain_message_parses() {
        let msg = parse(
            "From: Alice <alice@example.com>\r\n\
             Subject: Weekly digest\r\n\
             Date: Mon, 01 Jan 2024 12:00:00 +0000\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             Hello world\r\n",
        );

        assert_eq!(msg.id, "1");
        assert_eq!(msg.subject, "Weekly digest");
        assert_eq!(msg.sender, "Alice <alice@example.com>");
        assert_eq!(msg.body_text.trim(), "Hello world");
        assert!(msg.body_html.is_none());
    }

    #[test]
    fn encoded_word_subject_decodes() {
        // "Grüße" as an RFC 2047 encoded word
        let msg = parse(
            "From: bob@example.com\r\n\
             Subject: =?UTF-8?B?R3LDvMOfZQ==?=\r\n\
             \r\n\
             body\r\n",
        );
        assert_eq!(msg.subject, "Grüße");
    }

    #[test]
    fn missing_headers_become_empty_strings() {
        let msg = parse("Content-Type: text/plain\r\n\r\nonly a body\r\n");
        assert_eq!(msg.subject, "");
        assert_eq!(msg.sender, "");
    }

    #[test]
    fn sender_without_display_name_is_bare_address() {
        let msg = parse("From: carol@example.com\r\nSubject: x\r\n\r\nhi\r\n");
        assert_eq!(msg.sender, "carol@example.com");
    }

    #[test]
    fn well_formed_date_parses() {
        let msg = parse(
            "From: a@b.c\r\n\
             Date: Mon, 01 Jan 2024 12:00:00 +0000\r\n\
             \r\n\
             hi\r\n",
        );
        assert_eq!(msg.date.year(), 2024);
        assert_eq!(msg.date.month(), 1);
        assert_eq!(msg.date.day(), 1);
        assert_eq!(msg.date.hour(), 12);
    }

    #[test]
    fn date_with_offset_normalizes_to_utc() {
        let msg = parse(
            "From: a@b.c\r\n\
             Date: Mon, 01 Jan 2024 12:00:00 +0200\r\n\
             \r\n\
             hi\r\n",
        );
        assert_eq!(msg.date.hour(), 10);
    }

    #[test]
    fn malformed_date_falls_back_to_now() {
        let msg = parse(
            "From: a@b.c\r\n\
             Date: not a date\r\n\
             \r\n\
             hi\r\n",
        );
        let age = (Utc::now() - msg.date).num_seconds().abs();
        assert!(age < 60, "fallback date should be close to now, was {age}s off");
    }

    #[test]
    fn missing_date_falls_back_to_now() {
        let msg = parse("From: a@b.c\r\n\r\nhi\r\n");
        let age = (Utc::now() - msg.date).num_seconds().abs();
        assert!(age < 60);
    }

    #[test]
    fn multipart_alternative_extracts_both_bodies() {
        let msg = parse(
            "From: a@b.c\r\n\
             Subject: Hi\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
             \r\n\
             --b1\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             plain body\r\n\
             --b1\r\n\
             Content-Type: text/html\r\n\
             \r\n\
             <p>html body</p>\r\n\
             --b1--\r\n",
        );

        assert_eq!(msg.body_text.trim(), "plain body");
        assert!(msg.body_html.expect("html part").contains("<p>html body</p>"));
    }

    #[test]
    fn html_only_message_has_empty_plain_body() {
        let msg = parse(
            "From: a@b.c\r\n\
             Content-Type: text/html\r\n\
             \r\n\
             <b>rich</b>\r\n",
        );
        assert_eq!(msg.body_text, "");
        assert!(msg.body_html.expect("html").contains("<b>rich</b>"));
    }
}
