//! Run tickets through the classifier and settle their SLA.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::classifier::{Classifier, TicketInput};
use crate::channels::Mailer;
use crate::error::{Result, TicketError};
use crate::notify;
use crate::sla;
use crate::store::Database;
use crate::tickets::model::Ticket;

/// Classify one ticket from its latest incoming message.
///
/// On AI failure the ticket is left untouched, so the next poll retries it.
pub async fn process_ticket(
    db: &dyn Database,
    classifier: &Classifier,
    mailer: &dyn Mailer,
    id: i64,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    let ticket = db
        .get_ticket(id)
        .await?
        .ok_or(TicketError::NotFound { id })?;
    let latest = db
        .latest_incoming_message(id)
        .await?
        .ok_or(TicketError::NoIncomingMessage { id })?;

    let input = TicketInput {
        ticket_id: ticket.id,
        sender_email: &ticket.sender_email,
        subject: &ticket.subject,
        received_at: ticket.received_at,
        body: &latest.body,
    };
    let classification = classifier.classify(db, &input).await.map_err(|e| {
        warn!(ticket_id = id, error = %e, "AI processing failed");
        e
    })?;

    db.apply_classification(id, &classification).await?;
    sla::update_ticket_sla(db, id, now).await?;

    let ticket = db
        .get_ticket(id)
        .await?
        .ok_or(TicketError::NotFound { id })?;
    if let Err(e) = notify::notify_new_ticket(db, mailer, &ticket).await {
        warn!(ticket_id = id, error = %e, "Ticket notification failed");
    }

    info!(
        ticket_id = id,
        category = %classification.category,
        urgency = %classification.urgency,
        "Ticket processed"
    );
    Ok(ticket)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub failed: usize,
    #[serde(skip)]
    pub tickets: Vec<Ticket>,
}

/// Process every unprocessed ticket, oldest first. One failure does not stop the batch.
pub async fn process_unprocessed(
    db: &dyn Database,
    classifier: &Classifier,
    mailer: &dyn Mailer,
    now: DateTime<Utc>,
) -> Result<ProcessReport> {
    let mut report = ProcessReport::default();
    for ticket in db.unprocessed_tickets().await? {
        match process_ticket(db, classifier, mailer, ticket.id, now).await {
            Ok(t) => {
                report.processed += 1;
                report.tickets.push(t);
            }
            Err(e) => {
                warn!(ticket_id = ticket.id, error = %e, "Skipping ticket this cycle");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
