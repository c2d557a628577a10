//! Ticket domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How urgent the customer's issue is, as judged by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown urgency: {other}")),
        }
    }
}

/// Issue category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Billing,
    Technical,
    #[serde(rename = "Login / Access")]
    LoginAccess,
    #[serde(rename = "Feature Request")]
    FeatureRequest,
    #[serde(rename = "General Inquiry")]
    GeneralInquiry,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Billing,
        Self::Technical,
        Self::LoginAccess,
        Self::FeatureRequest,
        Self::GeneralInquiry,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Billing => "Billing",
            Self::Technical => "Technical",
            Self::LoginAccess => "Login / Access",
            Self::FeatureRequest => "Feature Request",
            Self::GeneralInquiry => "General Inquiry",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Case- and spacing-insensitive, so "login/access" and "Login / Access" agree.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "billing" => Ok(Self::Billing),
            "technical" => Ok(Self::Technical),
            "loginaccess" | "login" | "access" => Ok(Self::LoginAccess),
            "featurerequest" => Ok(Self::FeatureRequest),
            "generalinquiry" | "general" => Ok(Self::GeneralInquiry),
            "other" => Ok(Self::Other),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

/// Where a ticket sits in the human approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown approval status: {other}")),
        }
    }
}

/// A customer conversation tracked from intake to sent reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub sender_email: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// Root message id of the conversation.
    pub thread_id: String,
    /// Message id of the email that opened the ticket.
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub category: Option<Category>,
    pub urgency: Option<Urgency>,
    pub summary: Option<String>,
    pub fix_steps: Option<String>,
    pub draft_response: Option<String>,
    pub approval_status: ApprovalStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub ai_processed: bool,
    pub escalation_required: bool,
    pub assigned_to: Option<i64>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub sla_breached: bool,
    pub priority_score: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Open tickets are the ones still owed a reply.
    pub fn is_open(&self) -> bool {
        self.sent_at.is_none() && self.approval_status != ApprovalStatus::Rejected
    }
}

/// One email in a ticket's conversation, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketMessage {
    pub id: i64,
    pub ticket_id: i64,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub sender_email: String,
    pub body: String,
    pub is_incoming: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for a ticket opened by intake. The root message is stored alongside.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub sender_email: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub thread_id: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub ticket_id: i64,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub sender_email: String,
    pub body: String,
    pub is_incoming: bool,
    pub created_at: DateTime<Utc>,
}

/// Ticket plus its full conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub messages: Vec<TicketMessage>,
}

/// AI output for a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub urgency: Urgency,
    pub summary: String,
    pub fix_steps: String,
    pub draft_response: String,
}

/// Recomputed SLA state for one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaState {
    pub deadline: Option<DateTime<Utc>>,
    pub breached: bool,
    pub priority_score: i64,
}

/// Assignee filter for ticket listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignee {
    Unassigned,
    Member(i64),
}

impl FromStr for Assignee {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unassigned") {
            return Ok(Self::Unassigned);
        }
        s.trim()
            .parse()
            .map(Self::Member)
            .map_err(|_| format!("invalid assignee: {s}"))
    }
}

/// Filters for the ticket list. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<ApprovalStatus>,
    pub category: Option<Category>,
    pub urgency: Option<Urgency>,
    /// Case-insensitive substring match on sender, subject or summary.
    pub search: Option<String>,
    pub sla_breached: Option<bool>,
    pub assigned_to: Option<Assignee>,
}
