//! Support team members and ticket assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channels::email_types::is_valid_email;
use crate::error::{DatabaseError, Result, TicketError};
use crate::store::Database;
use crate::tickets::model::Ticket;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTeamMember {
    pub name: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "agent".to_string()
}

/// Validate and store a new team member. Emails are stored lowercased.
pub async fn add_member(db: &dyn Database, member: NewTeamMember) -> Result<TeamMember> {
    let email = member.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(TicketError::InvalidEmail(member.email).into());
    }
    let name = member.name.trim().to_string();
    let role = match member.role.trim() {
        "" => default_role(),
        r => r.to_string(),
    };
    let normalized = NewTeamMember { name, email, role };

    match db.create_team_member(&normalized).await {
        Ok(created) => {
            info!(member_id = created.id, email = %created.email, "Team member added");
            Ok(created)
        }
        Err(DatabaseError::Constraint(_)) => Err(TicketError::DuplicateMember {
            email: normalized.email,
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Assign a ticket to a member, or clear the assignment with `None`.
pub async fn assign_ticket(
    db: &dyn Database,
    ticket_id: i64,
    member_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    if db.get_ticket(ticket_id).await?.is_none() {
        return Err(TicketError::NotFound { id: ticket_id }.into());
    }
    if let Some(id) = member_id
        && db.get_team_member(id).await?.is_none()
    {
        return Err(TicketError::MemberNotFound { id }.into());
    }

    let assigned_at = member_id.map(|_| now);
    db.assign_ticket(ticket_id, member_id, assigned_at).await?;
    info!(ticket_id, member_id = ?member_id, "Ticket assignment updated");

    db.get_ticket(ticket_id)
        .await?
        .ok_or_else(|| TicketError::NotFound { id: ticket_id }.into())
}
