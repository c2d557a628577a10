//! Mail I/O: IMAP inbound, SMTP outbound.
//!
//! Both directions sit behind traits so the pipeline can run against
//! in-process fakes in tests.

pub mod email_types;
pub mod imap;
pub mod smtp;

use async_trait::async_trait;

use crate::error::MailError;

pub use email_types::{InboundEmail, parse_email};
pub use imap::ImapSource;
pub use smtp::SmtpMailer;

/// One undecoded message fetched from the mailbox.
#[derive(Debug, Clone)]
pub struct RawEmail {
    /// Mailbox UID, used to flag the message \Seen after intake.
    pub uid: String,
    pub bytes: Vec<u8>,
}

/// Source of inbound mail.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch unseen messages without marking them.
    async fn fetch_unseen(&self) -> Result<Vec<RawEmail>, MailError>;

    /// Flag messages \Seen once they are safely stored.
    async fn mark_seen(&self, uids: &[String]) -> Result<(), MailError>;
}

/// A plain-text message to deliver.
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Bare message id (no angle brackets) this message replies to.
    pub in_reply_to: Option<String>,
    /// Bare message ids for the References header, oldest first.
    pub references: Vec<String>,
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message. Returns the bare Message-ID it was sent with.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError>;

    /// Our own address; mail from it is never ticketed.
    fn from_address(&self) -> Option<&str>;
}
