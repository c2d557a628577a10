//! The desk service: one handle over store, mailboxes, AI and live events.
//!
//! Every state change that clients watch goes through here so the matching
//! `DeskEvent` is published exactly once.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::classifier::Classifier;
use super::processor::{self, ProcessReport};
use crate::channels::{InboundEmail, MailSource, Mailer, parse_email};
use crate::error::{LlmError, MailError, Result, TicketError};
use crate::events::{DeskEvent, EventHub};
use crate::llm::LlmProvider;
use crate::notify;
use crate::sla::{self, SlaRefresh};
use crate::store::Database;
use crate::team;
use crate::tickets::approval;
use crate::tickets::intake::{IntakeOutcome, resolve_email};
use crate::tickets::model::{ApprovalStatus, Ticket};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub fetched: usize,
    pub created: usize,
    pub appended: usize,
    pub duplicates: usize,
    /// Own mail and unparseable messages.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub created: usize,
    pub appended: usize,
    pub processed: usize,
    pub newly_breached: usize,
}

pub struct Desk {
    db: Arc<dyn Database>,
    source: Option<Arc<dyn MailSource>>,
    mailer: Arc<dyn Mailer>,
    classifier: Option<Classifier>,
    events: EventHub,
    /// Held for a whole fetch so manual and scheduled polls never overlap.
    cycle_lock: Mutex<()>,
}

impl Desk {
    pub fn new(db: Arc<dyn Database>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            db,
            source: None,
            mailer,
            classifier: None,
            events: EventHub::new(),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn MailSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.classifier = Some(Classifier::new(llm));
        self
    }

    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    fn classifier(&self) -> std::result::Result<&Classifier, LlmError> {
        self.classifier.as_ref().ok_or_else(|| LlmError::NotConfigured {
            provider: "ai".to_string(),
        })
    }

    // ── Intake ──────────────────────────────────────────────────────

    /// Poll the mailbox once and store what arrived.
    ///
    /// A missing mailbox config is an error. A mailbox that cannot be
    /// reached is logged and reported as an empty poll.
    pub async fn fetch_emails(&self) -> Result<FetchReport> {
        let _guard = self.cycle_lock.lock().await;
        self.fetch_locked().await
    }

    async fn fetch_locked(&self) -> Result<FetchReport> {
        let source = self
            .source
            .as_ref()
            .ok_or(MailError::NotConfigured { service: "IMAP" })?;
        let raw = match source.fetch_unseen().await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Mailbox poll failed");
                return Ok(FetchReport::default());
            }
        };
        let mut report = FetchReport {
            fetched: raw.len(),
            ..Default::default()
        };
        let own_address = self.mailer.from_address().map(str::to_ascii_lowercase);
        let mut seen = Vec::with_capacity(raw.len());

        for message in raw {
            let email = match parse_email(&message.bytes) {
                Ok(e) => e,
                Err(e) => {
                    warn!(uid = %message.uid, error = %e, "Skipping unparseable email");
                    report.skipped += 1;
                    seen.push(message.uid);
                    continue;
                }
            };
            if own_address.as_deref() == Some(email.sender_email.as_str()) {
                debug!(uid = %message.uid, "Skipping self-sent email");
                report.skipped += 1;
                seen.push(message.uid);
                continue;
            }

            match self.intake(&email).await {
                Ok(IntakeOutcome::Created(_)) => report.created += 1,
                Ok(IntakeOutcome::Appended { .. }) => report.appended += 1,
                Ok(IntakeOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    // Left unseen; the next poll tries again.
                    error!(uid = %message.uid, error = %e, "Failed to store email");
                    continue;
                }
            }
            seen.push(message.uid);
        }

        if let Err(e) = source.mark_seen(&seen).await {
            warn!(error = %e, "Failed to mark emails as seen");
        }
        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                created = report.created,
                appended = report.appended,
                duplicates = report.duplicates,
                "Mailbox polled"
            );
        }
        Ok(report)
    }

    /// Resolve one email into the ticket store, acknowledging new tickets.
    pub async fn intake(&self, email: &InboundEmail) -> Result<IntakeOutcome> {
        let outcome = resolve_email(self.db(), email).await?;
        match &outcome {
            IntakeOutcome::Created(ticket) => {
                if let Err(e) = notify::send_acknowledgment(self.db(), self.mailer(), ticket).await {
                    warn!(ticket_id = ticket.id, error = %e, "Acknowledgment skipped");
                }
                self.events.publish(DeskEvent::TicketCreated {
                    id: ticket.id,
                    subject: ticket.subject.clone(),
                    sender_email: ticket.sender_email.clone(),
                });
            }
            IntakeOutcome::Appended { ticket_id, .. } => {
                self.events.publish(DeskEvent::TicketUpdated {
                    id: *ticket_id,
                    approval_status: ApprovalStatus::Pending,
                });
            }
            IntakeOutcome::Duplicate => {}
        }
        Ok(outcome)
    }

    // ── AI ──────────────────────────────────────────────────────────

    pub async fn process_ticket(&self, id: i64) -> Result<Ticket> {
        let classifier = self.classifier()?;
        let ticket =
            processor::process_ticket(self.db(), classifier, self.mailer(), id, Utc::now()).await?;
        self.publish_update(&ticket);
        Ok(ticket)
    }

    pub async fn process_unprocessed(&self) -> Result<ProcessReport> {
        let classifier = self.classifier()?;
        let report =
            processor::process_unprocessed(self.db(), classifier, self.mailer(), Utc::now()).await?;
        for ticket in &report.tickets {
            self.publish_update(ticket);
        }
        Ok(report)
    }

    // ── SLA ─────────────────────────────────────────────────────────

    /// Recompute SLA state everywhere and alert on fresh breaches.
    pub async fn refresh_sla(&self) -> Result<SlaRefresh> {
        let report = sla::update_all_sla_status(self.db(), Utc::now()).await?;
        for &id in &report.newly_breached_ids {
            self.events.publish(DeskEvent::SlaBreached { id });
            let Some(ticket) = self.db.get_ticket(id).await? else {
                continue;
            };
            if let Err(e) = notify::notify_sla_breach(self.db(), self.mailer(), &ticket).await {
                warn!(ticket_id = id, error = %e, "Breach notification failed");
            }
        }
        Ok(report)
    }

    // ── Scheduled cycle ─────────────────────────────────────────────

    /// Fetch, classify, refresh SLA. Each stage runs even if an earlier
    /// one failed, so a mailbox outage does not stall AI or SLA work.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let mut report = CycleReport::default();

        if self.source.is_some() {
            match self.fetch_locked().await {
                Ok(fetch) => {
                    report.fetched = fetch.fetched;
                    report.created = fetch.created;
                    report.appended = fetch.appended;
                }
                Err(e) => error!(error = %e, "Mailbox poll failed"),
            }
        }

        if self.classifier.is_some() {
            match self.process_unprocessed().await {
                Ok(p) => report.processed = p.processed,
                Err(e) => error!(error = %e, "AI processing failed"),
            }
        }

        match self.refresh_sla().await {
            Ok(r) => report.newly_breached = r.newly_breached,
            Err(e) => error!(error = %e, "SLA refresh failed"),
        }

        info!(
            fetched = report.fetched,
            created = report.created,
            appended = report.appended,
            processed = report.processed,
            newly_breached = report.newly_breached,
            "Cycle complete"
        );
        report
    }

    // ── Approval gate ───────────────────────────────────────────────

    fn publish_update(&self, ticket: &Ticket) {
        self.events.publish(DeskEvent::TicketUpdated {
            id: ticket.id,
            approval_status: ticket.approval_status,
        });
    }

    pub async fn approve(&self, id: i64, by: Option<&str>) -> Result<Ticket> {
        let ticket = approval::approve(self.db(), id, by, Utc::now()).await?;
        self.publish_update(&ticket);
        Ok(ticket)
    }

    pub async fn reject(&self, id: i64, by: Option<&str>) -> Result<Ticket> {
        let ticket = approval::reject(self.db(), id, by, Utc::now()).await?;
        self.publish_update(&ticket);
        Ok(ticket)
    }

    pub async fn update_draft(&self, id: i64, draft: &str) -> Result<Ticket> {
        let ticket = approval::update_draft(self.db(), id, draft).await?;
        self.publish_update(&ticket);
        Ok(ticket)
    }

    pub async fn send(&self, id: i64) -> Result<Ticket> {
        let ticket =
            approval::send_approved_response(self.db(), self.mailer(), id, Utc::now()).await?;
        self.events.publish(DeskEvent::TicketSent { id });
        Ok(ticket)
    }

    pub async fn bulk_approve(&self, ids: &[i64], by: Option<&str>) -> Result<usize> {
        let done = approval::bulk_approve(self.db(), ids, by, Utc::now()).await?;
        done.iter().for_each(|t| self.publish_update(t));
        Ok(done.len())
    }

    pub async fn bulk_reject(&self, ids: &[i64], by: Option<&str>) -> Result<usize> {
        let done = approval::bulk_reject(self.db(), ids, by, Utc::now()).await?;
        done.iter().for_each(|t| self.publish_update(t));
        Ok(done.len())
    }

    pub async fn bulk_send(&self, ids: &[i64]) -> usize {
        let sent = approval::bulk_send(self.db(), self.mailer(), ids, Utc::now()).await;
        for t in &sent {
            self.events.publish(DeskEvent::TicketSent { id: t.id });
        }
        sent.len()
    }

    // ── Ownership ───────────────────────────────────────────────────

    pub async fn assign(&self, id: i64, member_id: Option<i64>) -> Result<Ticket> {
        let ticket = team::assign_ticket(self.db(), id, member_id, Utc::now()).await?;
        self.publish_update(&ticket);
        Ok(ticket)
    }

    /// Flag or clear escalation; the score moves immediately.
    pub async fn escalate(&self, id: i64, escalated: bool) -> Result<Ticket> {
        if self.db.get_ticket(id).await?.is_none() {
            return Err(TicketError::NotFound { id }.into());
        }
        self.db.set_escalation(id, escalated).await?;
        sla::update_ticket_sla(self.db(), id, Utc::now()).await?;
        let ticket = self
            .db
            .get_ticket(id)
            .await?
            .ok_or(TicketError::NotFound { id })?;
        info!(ticket_id = id, escalated, "Escalation updated");
        self.publish_update(&ticket);
        Ok(ticket)
    }
}
