//! The `Database` trait: one async interface for all persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::DatabaseError;
use crate::surveys::Survey;
use crate::team::{NewTeamMember, TeamMember};
use crate::tickets::model::{
    ApprovalStatus, Classification, NewMessage, NewTicket, SlaState, Ticket, TicketFilter,
    TicketMessage,
};

/// One completed LLM request, for cost tracking.
#[derive(Debug, Clone)]
pub struct LlmCallRecord {
    pub ticket_id: Option<i64>,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    pub purpose: String,
}

/// Backend-agnostic database trait covering tickets, team, surveys and settings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Intake ──────────────────────────────────────────────────────

    /// Whether any ticket or ticket message already carries this message id.
    async fn message_id_exists(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Find the ticket an email belongs to: one whose root or any stored
    /// message is `in_reply_to`, else one whose `thread_id` matches.
    /// Direct parent matches win over thread matches, then the oldest ticket.
    async fn find_thread_ticket(
        &self,
        in_reply_to: Option<&str>,
        thread_id: &str,
    ) -> Result<Option<Ticket>, DatabaseError>;

    /// Insert a ticket and its root message. Fails with `Constraint` on a
    /// duplicate message id.
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket, DatabaseError>;

    /// Append a message to a ticket's conversation.
    async fn append_message(&self, message: &NewMessage) -> Result<TicketMessage, DatabaseError>;

    /// Put a ticket back in front of the AI and the approval gate.
    async fn reopen_ticket(&self, id: i64) -> Result<(), DatabaseError>;

    // ── Tickets ─────────────────────────────────────────────────────

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, DatabaseError>;

    /// Tickets matching the filter, newest `received_at` first.
    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, DatabaseError>;

    /// A ticket's messages in arrival order.
    async fn ticket_messages(&self, ticket_id: i64) -> Result<Vec<TicketMessage>, DatabaseError>;

    async fn latest_incoming_message(
        &self,
        ticket_id: i64,
    ) -> Result<Option<TicketMessage>, DatabaseError>;

    /// Other tickets from the same sender, newest first.
    async fn customer_history(
        &self,
        sender_email: &str,
        exclude_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Ticket>, DatabaseError>;

    /// Tickets the AI has not processed yet, oldest first.
    async fn unprocessed_tickets(&self) -> Result<Vec<Ticket>, DatabaseError>;

    /// Tickets still owed a reply (`sent_at IS NULL AND status != REJECTED`).
    async fn open_tickets(&self) -> Result<Vec<Ticket>, DatabaseError>;

    /// Store AI output and mark the ticket processed.
    async fn apply_classification(
        &self,
        id: i64,
        classification: &Classification,
    ) -> Result<(), DatabaseError>;

    async fn update_sla(&self, id: i64, sla: &SlaState) -> Result<(), DatabaseError>;

    async fn set_approval(
        &self,
        id: i64,
        status: ApprovalStatus,
        by: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    async fn set_draft(&self, id: i64, draft: &str) -> Result<(), DatabaseError>;

    async fn mark_sent(&self, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    async fn assign_ticket(
        &self,
        id: i64,
        member_id: Option<i64>,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    async fn set_escalation(&self, id: i64, escalated: bool) -> Result<(), DatabaseError>;

    // ── Team ────────────────────────────────────────────────────────

    /// Fails with `Constraint` when the email is taken.
    async fn create_team_member(&self, member: &NewTeamMember) -> Result<TeamMember, DatabaseError>;

    async fn get_team_member(&self, id: i64) -> Result<Option<TeamMember>, DatabaseError>;

    async fn list_team_members(&self, active_only: bool) -> Result<Vec<TeamMember>, DatabaseError>;

    // ── Surveys ─────────────────────────────────────────────────────

    async fn insert_survey(
        &self,
        ticket_id: i64,
        customer_email: &str,
        token: &str,
    ) -> Result<Survey, DatabaseError>;

    async fn get_survey(&self, id: i64) -> Result<Option<Survey>, DatabaseError>;

    async fn get_survey_for_ticket(&self, ticket_id: i64) -> Result<Option<Survey>, DatabaseError>;

    async fn get_survey_by_token(&self, token: &str) -> Result<Option<Survey>, DatabaseError>;

    async fn mark_survey_sent(&self, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Returns false when the survey was already answered.
    async fn complete_survey(
        &self,
        id: i64,
        rating: i64,
        feedback: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Returns whether a row was deleted.
    async fn delete_survey(&self, id: i64) -> Result<bool, DatabaseError>;

    async fn list_surveys(&self) -> Result<Vec<Survey>, DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    async fn all_settings(&self) -> Result<HashMap<String, String>, DatabaseError>;

    // ── LLM usage ───────────────────────────────────────────────────

    async fn record_llm_call(&self, call: &LlmCallRecord) -> Result<(), DatabaseError>;

    /// Total spend across all recorded calls.
    async fn total_llm_cost(&self) -> Result<Decimal, DatabaseError>;
}
