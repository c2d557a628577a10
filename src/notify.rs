//! Staff notifications and customer auto-acknowledgments over the mailer.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channels::email_types::{is_automated_sender, is_valid_email, reply_subject};
use crate::channels::{Mailer, OutgoingEmail};
use crate::error::Result;
use crate::settings::{DeskSettings, NotifySettings};
use crate::store::Database;
use crate::tickets::model::{Ticket, Urgency};

const DASHBOARD_FOOTER: &str =
    "---\nView and respond to this ticket in the support desk dashboard.\n";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifyReport {
    pub sent: usize,
    pub total_recipients: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<&'static str>,
}

impl NotifyReport {
    fn skipped(reason: &'static str) -> Self {
        Self {
            skipped_reason: Some(reason),
            ..Default::default()
        }
    }
}

/// Valid, deduplicated addresses from a comma-separated list.
pub fn parse_recipient_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty() && is_valid_email(e))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub async fn recipients(db: &dyn Database, settings: &NotifySettings) -> Result<Vec<String>> {
    match settings.recipients.as_str() {
        "none" => Ok(Vec::new()),
        "all" => {
            let members = db.list_team_members(true).await?;
            Ok(members
                .into_iter()
                .map(|m| m.email)
                .filter(|e| is_valid_email(e))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect())
        }
        list => Ok(parse_recipient_list(list)),
    }
}

fn or_unclassified<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "Not classified".to_string())
}

pub fn new_ticket_subject(ticket: &Ticket) -> String {
    match ticket.urgency {
        Some(Urgency::High) => format!("[URGENT] New Support Ticket: {}", ticket.subject),
        other => format!(
            "[{}] Support Ticket: {}",
            other.map(|u| u.as_str()).unwrap_or("New"),
            ticket.subject
        ),
    }
}

fn new_ticket_body(ticket: &Ticket) -> String {
    format!(
        "A new support ticket requires attention.\n\n\
         Ticket ID: #{}\n\
         Subject: {}\n\
         From: {}\n\
         Urgency: {}\n\
         Category: {}\n\n\
         Summary:\n{}\n\n{DASHBOARD_FOOTER}",
        ticket.id,
        ticket.subject,
        ticket.sender_email,
        or_unclassified(ticket.urgency),
        or_unclassified(ticket.category),
        ticket
            .summary
            .as_deref()
            .unwrap_or("Not yet processed by AI"),
    )
}

fn breach_body(ticket: &Ticket) -> String {
    let deadline = ticket
        .sla_deadline
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "Not set".to_string());
    format!(
        "ALERT: A ticket has breached its SLA deadline.\n\n\
         Ticket ID: #{}\n\
         Subject: {}\n\
         From: {}\n\
         Urgency: {}\n\
         Category: {}\n\
         SLA Deadline: {deadline}\n\n\
         This ticket requires immediate attention.\n\n{DASHBOARD_FOOTER}",
        ticket.id,
        ticket.subject,
        ticket.sender_email,
        or_unclassified(ticket.urgency),
        or_unclassified(ticket.category),
    )
}

async fn deliver_all(
    mailer: &dyn Mailer,
    recipients: &[String],
    subject: &str,
    body: &str,
) -> NotifyReport {
    let mut report = NotifyReport {
        total_recipients: recipients.len(),
        ..Default::default()
    };
    for to in recipients {
        let email = OutgoingEmail {
            to: to.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
            ..Default::default()
        };
        match mailer.send(&email).await {
            Ok(_) => report.sent += 1,
            Err(e) => {
                warn!(recipient = %to, error = %e, "Notification failed");
                report.failed += 1;
            }
        }
    }
    report
}

/// Tell the team about a freshly classified ticket.
pub async fn notify_new_ticket(
    db: &dyn Database,
    mailer: &dyn Mailer,
    ticket: &Ticket,
) -> Result<NotifyReport> {
    let settings = DeskSettings::load(db).await?.notify;
    if !settings.enabled {
        return Ok(NotifyReport::skipped("notifications_disabled"));
    }
    if settings.urgent_only && ticket.urgency != Some(Urgency::High) {
        return Ok(NotifyReport::skipped("not_urgent"));
    }
    let to = recipients(db, &settings).await?;
    if to.is_empty() {
        return Ok(NotifyReport::skipped("no_recipients"));
    }

    let report = deliver_all(mailer, &to, &new_ticket_subject(ticket), &new_ticket_body(ticket)).await;
    info!(ticket_id = ticket.id, sent = report.sent, failed = report.failed, "Ticket notification sent");
    Ok(report)
}

pub async fn notify_sla_breach(
    db: &dyn Database,
    mailer: &dyn Mailer,
    ticket: &Ticket,
) -> Result<NotifyReport> {
    let settings = DeskSettings::load(db).await?.notify;
    if !settings.enabled {
        return Ok(NotifyReport::skipped("notifications_disabled"));
    }
    let to = recipients(db, &settings).await?;
    if to.is_empty() {
        return Ok(NotifyReport::skipped("no_recipients"));
    }

    let subject = format!("[SLA BREACH] Ticket #{}: {}", ticket.id, ticket.subject);
    let report = deliver_all(mailer, &to, &subject, &breach_body(ticket)).await;
    info!(ticket_id = ticket.id, sent = report.sent, "SLA breach notification sent");
    Ok(report)
}

/// Fill `{ticket_id}` and `{subject}` in the acknowledgment template.
pub fn render_acknowledgment(template: &str, ticket_id: i64, subject: &str) -> String {
    template
        .replace("{ticket_id}", &ticket_id.to_string())
        .replace("{subject}", subject)
}

/// Acknowledge a new ticket to the customer. This is a fixed template, not
/// an AI draft, so it does not pass through the approval gate.
///
/// Returns whether a message went out.
pub async fn send_acknowledgment(
    db: &dyn Database,
    mailer: &dyn Mailer,
    ticket: &Ticket,
) -> Result<bool> {
    let settings = DeskSettings::load(db).await?.auto_responder;
    if !settings.enabled {
        return Ok(false);
    }
    if is_automated_sender(&ticket.sender_email) {
        debug!(ticket_id = ticket.id, sender = %ticket.sender_email, "Not acknowledging automated sender");
        return Ok(false);
    }

    let subject = match ticket.subject.trim() {
        "" => "(no subject)",
        s => s,
    };
    let email = OutgoingEmail {
        to: ticket.sender_email.clone(),
        subject: reply_subject(subject),
        body: render_acknowledgment(&settings.template, ticket.id, subject),
        in_reply_to: Some(ticket.message_id.clone()),
        references: vec![ticket.message_id.clone()],
    };
    match mailer.send(&email).await {
        Ok(_) => {
            info!(ticket_id = ticket.id, to = %ticket.sender_email, "Acknowledgment sent");
            Ok(true)
        }
        Err(e) => {
            warn!(ticket_id = ticket.id, error = %e, "Acknowledgment failed");
            Ok(false)
        }
    }
}
