//! SMTP delivery via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Mailer, OutgoingEmail};
use crate::config::SmtpConfig;
use crate::error::MailError;

/// Implicit-TLS submission port; every other port negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Outbound mailer. Without a config every send fails with `NotConfigured`.
pub struct SmtpMailer {
    config: Option<SmtpConfig>,
}

impl SmtpMailer {
    pub fn new(config: Option<SmtpConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        let cfg = self
            .config
            .clone()
            .ok_or(MailError::NotConfigured { service: "SMTP" })?;

        let message_id = format!("{}@{}", Uuid::new_v4(), cfg.message_id_domain());
        let message = build_message(&cfg, email, &message_id)?;
        let to = email.to.clone();

        tokio::task::spawn_blocking(move || deliver(&cfg, &message))
            .await
            .map_err(|e| MailError::SendFailed {
                to: to.clone(),
                reason: format!("send task failed: {e}"),
            })?
            .map_err(|reason| MailError::SendFailed { to: to.clone(), reason })?;

        info!(to = %to, message_id = %message_id, "Email sent");
        Ok(message_id)
    }

    fn from_address(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.from_address.as_str())
    }
}

fn build_message(
    cfg: &SmtpConfig,
    email: &OutgoingEmail,
    message_id: &str,
) -> Result<Message, MailError> {
    let from: Mailbox = cfg
        .from_address
        .parse()
        .map_err(|e| MailError::Build(format!("invalid from address {}: {e}", cfg.from_address)))?;
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e| MailError::Build(format!("invalid recipient {}: {e}", email.to)))?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.clone())
        .message_id(Some(format!("<{message_id}>")))
        .header(ContentType::TEXT_PLAIN);
    if let Some(parent) = &email.in_reply_to {
        builder = builder.in_reply_to(format!("<{parent}>"));
    }
    if !email.references.is_empty() {
        let refs: Vec<String> = email.references.iter().map(|r| format!("<{r}>")).collect();
        builder = builder.references(refs.join(" "));
    }

    builder
        .body(email.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

/// Blocking SMTP round trip.
fn deliver(cfg: &SmtpConfig, message: &Message) -> Result<(), String> {
    let relay = if cfg.port == SMTPS_PORT {
        SmtpTransport::relay(&cfg.host)
    } else {
        SmtpTransport::starttls_relay(&cfg.host)
    }
    .map_err(|e| format!("SMTP relay error: {e}"))?;

    let mut relay = relay.port(cfg.port).timeout(Some(Duration::from_secs(30)));
    if !cfg.username.is_empty() {
        relay = relay.credentials(Credentials::new(
            cfg.username.clone(),
            cfg.password.expose_secret().to_string(),
        ));
    }

    relay
        .build()
        .send(message)
        .map_err(|e| format!("SMTP send failed: {e}"))?;
    debug!(host = %cfg.host, port = cfg.port, "SMTP delivery complete");
    Ok(())
}
