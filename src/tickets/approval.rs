//! The human approval gate and the reply send that sits behind it.
//!
//! Nothing drafted by the AI leaves the desk unless a person approved it.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::channels::email_types::reply_subject;
use crate::channels::{Mailer, OutgoingEmail};
use crate::error::{Result, TicketError};
use crate::sla;
use crate::store::Database;
use crate::tickets::model::{ApprovalStatus, NewMessage, Ticket};

pub const DEFAULT_APPROVER: &str = "admin";

async fn load(db: &dyn Database, id: i64) -> Result<Ticket> {
    db.get_ticket(id)
        .await?
        .ok_or_else(|| TicketError::NotFound { id }.into())
}

pub async fn approve(
    db: &dyn Database,
    id: i64,
    approved_by: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    load(db, id).await?;
    let by = approved_by.unwrap_or(DEFAULT_APPROVER);
    db.set_approval(id, ApprovalStatus::Approved, Some(by), Some(now))
        .await?;
    info!(ticket_id = id, by, "Ticket approved");
    load(db, id).await
}

pub async fn reject(
    db: &dyn Database,
    id: i64,
    rejected_by: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    load(db, id).await?;
    let by = rejected_by.unwrap_or(DEFAULT_APPROVER);
    db.set_approval(id, ApprovalStatus::Rejected, Some(by), Some(now))
        .await?;
    info!(ticket_id = id, by, "Ticket rejected");
    load(db, id).await
}

/// Edit the draft. The approval status is left alone.
pub async fn update_draft(db: &dyn Database, id: i64, draft: &str) -> Result<Ticket> {
    load(db, id).await?;
    db.set_draft(id, draft).await?;
    load(db, id).await
}

/// Send the approved draft to the customer as a threaded reply.
///
/// Requires APPROVED status, a non-empty draft and no reply already sent for
/// the customer's latest message. On success the ticket is marked sent, the
/// reply joins its conversation and its SLA is settled.
pub async fn send_approved_response(
    db: &dyn Database,
    mailer: &dyn Mailer,
    id: i64,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    let ticket = load(db, id).await?;
    if ticket.approval_status != ApprovalStatus::Approved {
        return Err(TicketError::NotApproved {
            id,
            status: ticket.approval_status.to_string(),
        }
        .into());
    }
    // A follow-up from the customer clears sent_at, so this only blocks resends.
    if ticket.sent_at.is_some() {
        return Err(TicketError::AlreadySent { id }.into());
    }
    let draft = ticket
        .draft_response
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or(TicketError::MissingDraft { id })?
        .to_string();

    // Answer the customer's latest message so follow-ups thread correctly.
    let parent = db
        .latest_incoming_message(id)
        .await?
        .and_then(|m| m.message_id)
        .unwrap_or_else(|| ticket.message_id.clone());
    let mut references = vec![ticket.thread_id.clone()];
    if parent != ticket.thread_id {
        references.push(parent.clone());
    }

    let outgoing = OutgoingEmail {
        to: ticket.sender_email.clone(),
        subject: reply_subject(&ticket.subject),
        body: draft.clone(),
        in_reply_to: Some(parent.clone()),
        references,
    };
    let sent_id = mailer.send(&outgoing).await.map_err(|e| {
        error!(ticket_id = id, error = %e, "Failed to send reply");
        e
    })?;

    db.mark_sent(id, now).await?;
    let from = mailer.from_address().unwrap_or("support").to_string();
    if let Err(e) = db
        .append_message(&NewMessage {
            ticket_id: id,
            message_id: Some(sent_id.clone()),
            in_reply_to: Some(parent),
            sender_email: from,
            body: draft,
            is_incoming: false,
            created_at: now,
        })
        .await
    {
        // The mail is gone already; losing the transcript row is not fatal.
        warn!(ticket_id = id, error = %e, "Failed to record outgoing message");
    }
    sla::update_ticket_sla(db, id, now).await?;

    info!(ticket_id = id, message_id = %sent_id, to = %ticket.sender_email, "Reply sent");
    load(db, id).await
}

/// Approve each ticket. Returns how many were approved; unknown ids are skipped.
pub async fn bulk_approve(
    db: &dyn Database,
    ids: &[i64],
    approved_by: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<Ticket>> {
    let mut done = Vec::with_capacity(ids.len());
    for &id in ids {
        match approve(db, id, approved_by, now).await {
            Ok(t) => done.push(t),
            Err(crate::error::Error::Ticket(TicketError::NotFound { .. })) => {
                warn!(ticket_id = id, "Bulk approve: ticket not found");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

pub async fn bulk_reject(
    db: &dyn Database,
    ids: &[i64],
    rejected_by: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<Ticket>> {
    let mut done = Vec::with_capacity(ids.len());
    for &id in ids {
        match reject(db, id, rejected_by, now).await {
            Ok(t) => done.push(t),
            Err(crate::error::Error::Ticket(TicketError::NotFound { .. })) => {
                warn!(ticket_id = id, "Bulk reject: ticket not found");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Send every ticket that passes the gate. Failures are logged and skipped.
pub async fn bulk_send(
    db: &dyn Database,
    mailer: &dyn Mailer,
    ids: &[i64],
    now: DateTime<Utc>,
) -> Vec<Ticket> {
    let mut sent = Vec::with_capacity(ids.len());
    for &id in ids {
        match send_approved_response(db, mailer, id, now).await {
            Ok(t) => sent.push(t),
            Err(e) => warn!(ticket_id = id, error = %e, "Bulk send skipped ticket"),
        }
    }
    sent
}
