//! Inbound email decoding: sender, body, and the threading headers that
//! decide which ticket a message belongs to.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MessageParser};
use regex::Regex;
use uuid::Uuid;

use crate::error::MailError;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

static MESSAGE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>\s]+)>").expect("valid message-id regex"));

static AUTOMATED_SENDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(no[\-_.]?reply|do[\-_.]?not[\-_.]?reply|mailer[\-_]?daemon|postmaster)@")
        .expect("valid automated-sender regex")
});

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEmail {
    /// Lowercased address from the From header.
    pub sender_email: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// Bare Message-ID (angle brackets stripped).
    pub message_id: String,
    pub in_reply_to: Option<String>,
    /// References header ids, oldest first.
    pub references: Vec<String>,
}

impl InboundEmail {
    /// Root of the conversation as declared by the headers: the first
    /// References id, else In-Reply-To. `None` for a fresh message.
    pub fn thread_id(&self) -> Option<&str> {
        self.references
            .first()
            .map(String::as_str)
            .or(self.in_reply_to.as_deref())
    }

    /// Thread id to store on a ticket opened by this message.
    pub fn conversation_root(&self) -> String {
        self.thread_id().unwrap_or(&self.message_id).to_string()
    }
}

/// Decode a raw RFC 822 message.
pub fn parse_email(raw: &[u8]) -> Result<InboundEmail, MailError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Parse("not an RFC 822 message".into()))?;

    let sender_email = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MailError::Parse("message has no From address".into()))?;

    let subject = parsed
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(no subject)")
        .to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.trim().to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let message_id = parsed
        .message_id()
        .map(normalize_message_id)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("generated-{}@support-desk", Uuid::new_v4()));

    Ok(InboundEmail {
        sender_email,
        subject,
        body,
        received_at,
        message_id,
        in_reply_to: header_ids(parsed.in_reply_to()).into_iter().next(),
        references: header_ids(parsed.references()),
    })
}

/// Ids carried by a parsed In-Reply-To or References header, in order.
fn header_ids(value: &HeaderValue<'_>) -> Vec<String> {
    value
        .as_text_list()
        .unwrap_or_default()
        .iter()
        .flat_map(|v| message_ids(v))
        .collect()
}

/// Message ids in a header value, brackets stripped.
pub fn message_ids(value: &str) -> Vec<String> {
    let bracketed: Vec<String> = MESSAGE_ID_RE
        .captures_iter(value)
        .map(|c| c[1].to_string())
        .collect();
    if !bracketed.is_empty() {
        return bracketed;
    }
    value
        .split_whitespace()
        .map(normalize_message_id)
        .filter(|id| !id.is_empty())
        .collect()
}

pub fn normalize_message_id(id: &str) -> String {
    id.trim().trim_start_matches('<').trim_end_matches('>').trim().to_string()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

/// Bounce handlers and no-reply robots; never auto-acknowledged.
pub fn is_automated_sender(email: &str) -> bool {
    AUTOMATED_SENDER_RE.is_match(email.trim())
}

/// `Re: <subject>` unless the subject already carries a reply prefix.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop quoted history from a reply: `>` lines and everything after an
/// "On ... wrote:" attribution or an "Original Message" separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut kept = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
            || (trimmed.starts_with("---") && trimmed.contains("Original Message"))
        {
            break;
        }
        kept.push(line);
    }
    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}
