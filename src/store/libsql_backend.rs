//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 UTC text so string comparison matches time order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Database, LlmCallRecord};
use crate::surveys::Survey;
use crate::team::{NewTeamMember, TeamMember};
use crate::tickets::model::{
    ApprovalStatus, Assignee, Classification, NewMessage, NewTicket, SlaState, Ticket,
    TicketFilter, TicketMessage,
};

/// libSQL database backend.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_tickets(
        &self,
        sql: &str,
        args: Vec<Value>,
        ctx: &str,
    ) -> Result<Vec<Ticket>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;

        let mut tickets = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_ticket(&row) {
                    Ok(t) => tickets.push(t),
                    Err(e) => warn!("Skipping ticket row in {ctx}: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{ctx}: {e}"))),
            }
        }
        Ok(tickets)
    }

    async fn query_one_ticket(
        &self,
        sql: &str,
        args: Vec<Value>,
        ctx: &str,
    ) -> Result<Option<Ticket>, DatabaseError> {
        Ok(self.query_tickets(sql, args, ctx).await?.into_iter().next())
    }

    async fn query_surveys(
        &self,
        sql: &str,
        args: Vec<Value>,
        ctx: &str,
    ) -> Result<Vec<Survey>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;

        let mut surveys = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?
        {
            surveys.push(
                row_to_survey(&row).map_err(|e| DatabaseError::Query(format!("{ctx} row parse: {e}")))?,
            );
        }
        Ok(surveys)
    }

    async fn query_messages(
        &self,
        sql: &str,
        args: Vec<Value>,
        ctx: &str,
    ) -> Result<Vec<TicketMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?
        {
            messages.push(
                row_to_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("{ctx} row parse: {e}")))?,
            );
        }
        Ok(messages)
    }

    /// Execute an UPDATE and fail with `NotFound` when no ticket matched.
    async fn update_ticket(
        &self,
        id: i64,
        sql: &str,
        args: Vec<Value>,
        ctx: &str,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "ticket".into(),
                id: id.to_string(),
            });
        }
        debug!(ticket_id = id, op = ctx, "Ticket updated");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> Value {
    match dt {
        Some(dt) => Value::Text(format_datetime(&dt)),
        None => Value::Null,
    }
}

fn opt_integer(v: Option<i64>) -> Value {
    match v {
        Some(v) => Value::Integer(v),
        None => Value::Null,
    }
}

fn text(s: impl Into<String>) -> Value {
    Value::Text(s.into())
}

fn flag(b: bool) -> Value {
    Value::Integer(i64::from(b))
}

/// Unique-index violations surface as `Constraint` so callers can treat
/// them as duplicates.
fn write_error(ctx: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{ctx}: {msg}"))
    } else {
        DatabaseError::Query(format!("{ctx}: {msg}"))
    }
}

/// Escape LIKE wildcards in user input (used with `ESCAPE '\'`).
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

const TICKET_COLUMNS: &str = "id, sender_email, subject, body, received_at, thread_id, message_id, \
    in_reply_to, category, urgency, summary, fix_steps, draft_response, approval_status, \
    approved_by, approved_at, sent_at, ai_processed, escalation_required, assigned_to, \
    assigned_at, sla_deadline, sla_breached, priority_score, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, ticket_id, message_id, in_reply_to, sender_email, body, is_incoming, created_at";

const MEMBER_COLUMNS: &str = "id, name, email, role, is_active, created_at";

const SURVEY_COLUMNS: &str =
    "id, ticket_id, customer_email, token, rating, feedback, sent_at, completed_at, created_at";

/// Map a libsql Row to a Ticket. Column order matches TICKET_COLUMNS.
fn row_to_ticket(row: &libsql::Row) -> Result<Ticket, libsql::Error> {
    let received_str: String = row.get(4)?;
    let status_str: String = row.get(13)?;
    let created_str: String = row.get(24)?;
    let updated_str: String = row.get(25)?;

    Ok(Ticket {
        id: row.get(0)?,
        sender_email: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        received_at: parse_datetime(&received_str),
        thread_id: row.get(5)?,
        message_id: row.get(6)?,
        in_reply_to: row.get::<String>(7).ok(),
        category: row.get::<String>(8).ok().and_then(|s| s.parse().ok()),
        urgency: row.get::<String>(9).ok().and_then(|s| s.parse().ok()),
        summary: row.get::<String>(10).ok(),
        fix_steps: row.get::<String>(11).ok(),
        draft_response: row.get::<String>(12).ok(),
        approval_status: status_str.parse().unwrap_or(ApprovalStatus::Pending),
        approved_by: row.get::<String>(14).ok(),
        approved_at: parse_optional_datetime(row.get::<String>(15).ok()),
        sent_at: parse_optional_datetime(row.get::<String>(16).ok()),
        ai_processed: row.get::<i64>(17)? != 0,
        escalation_required: row.get::<i64>(18)? != 0,
        assigned_to: row.get::<i64>(19).ok(),
        assigned_at: parse_optional_datetime(row.get::<String>(20).ok()),
        sla_deadline: parse_optional_datetime(row.get::<String>(21).ok()),
        sla_breached: row.get::<i64>(22)? != 0,
        priority_score: row.get(23)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<TicketMessage, libsql::Error> {
    let created_str: String = row.get(7)?;
    Ok(TicketMessage {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        message_id: row.get::<String>(2).ok(),
        in_reply_to: row.get::<String>(3).ok(),
        sender_email: row.get(4)?,
        body: row.get(5)?,
        is_incoming: row.get::<i64>(6)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_member(row: &libsql::Row) -> Result<TeamMember, libsql::Error> {
    let created_str: String = row.get(5)?;
    Ok(TeamMember {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        is_active: row.get::<i64>(4)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_survey(row: &libsql::Row) -> Result<Survey, libsql::Error> {
    let created_str: String = row.get(8)?;
    Ok(Survey {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        customer_email: row.get(2)?,
        token: row.get(3)?,
        rating: row.get(4)?,
        feedback: row.get::<String>(5).ok(),
        sent_at: parse_optional_datetime(row.get::<String>(6).ok()),
        completed_at: parse_optional_datetime(row.get::<String>(7).ok()),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Intake ──────────────────────────────────────────────────────

    async fn message_id_exists(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT EXISTS(SELECT 1 FROM tickets WHERE message_id = ?1)
                     OR EXISTS(SELECT 1 FROM ticket_messages WHERE message_id = ?1)",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("message_id_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) != 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("message_id_exists: {e}"))),
        }
    }

    async fn find_thread_ticket(
        &self,
        in_reply_to: Option<&str>,
        thread_id: &str,
    ) -> Result<Option<Ticket>, DatabaseError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE message_id = ?1
                OR id IN (SELECT ticket_id FROM ticket_messages WHERE message_id = ?1)
                OR thread_id = ?2
             ORDER BY CASE
                 WHEN message_id = ?1
                   OR id IN (SELECT ticket_id FROM ticket_messages WHERE message_id = ?1) THEN 0
                 ELSE 1
             END, id ASC
             LIMIT 1"
        );
        self.query_one_ticket(
            &sql,
            vec![opt_text(in_reply_to), text(thread_id)],
            "find_thread_ticket",
        )
        .await
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket, DatabaseError> {
        let now = format_datetime(&Utc::now());
        let sql = format!(
            "INSERT INTO tickets (sender_email, subject, body, received_at, thread_id, message_id,
                in_reply_to, approval_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PENDING', ?8, ?8)
             RETURNING {TICKET_COLUMNS}"
        );
        let created = self
            .query_one_ticket(
                &sql,
                vec![
                    text(ticket.sender_email.as_str()),
                    text(ticket.subject.as_str()),
                    text(ticket.body.as_str()),
                    text(format_datetime(&ticket.received_at)),
                    text(ticket.thread_id.as_str()),
                    text(ticket.message_id.as_str()),
                    opt_text(ticket.in_reply_to.as_deref()),
                    text(now),
                ],
                "create_ticket",
            )
            .await
            .map_err(|e| match e {
                DatabaseError::Query(msg) if msg.contains("UNIQUE constraint failed") => {
                    DatabaseError::Constraint(msg)
                }
                other => other,
            })?
            .ok_or_else(|| DatabaseError::Query("create_ticket: no row returned".into()))?;

        let root = NewMessage {
            ticket_id: created.id,
            message_id: Some(ticket.message_id.clone()),
            in_reply_to: ticket.in_reply_to.clone(),
            sender_email: ticket.sender_email.clone(),
            body: ticket.body.clone(),
            is_incoming: true,
            created_at: ticket.received_at,
        };
        if let Err(e) = self.append_message(&root).await {
            // No orphan tickets without a root message.
            let _ = self
                .conn()
                .execute("DELETE FROM tickets WHERE id = ?1", params![created.id])
                .await;
            return Err(e);
        }

        debug!(ticket_id = created.id, message_id = %created.message_id, "Ticket inserted into DB");
        Ok(created)
    }

    async fn append_message(&self, message: &NewMessage) -> Result<TicketMessage, DatabaseError> {
        let sql = format!(
            "INSERT INTO ticket_messages (ticket_id, message_id, in_reply_to, sender_email, body,
                is_incoming, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING {MESSAGE_COLUMNS}"
        );
        let mut rows = self
            .conn()
            .query(
                &sql,
                vec![
                    Value::Integer(message.ticket_id),
                    opt_text(message.message_id.as_deref()),
                    opt_text(message.in_reply_to.as_deref()),
                    text(message.sender_email.as_str()),
                    text(message.body.as_str()),
                    flag(message.is_incoming),
                    text(format_datetime(&message.created_at)),
                ],
            )
            .await
            .map_err(|e| write_error("append_message", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| write_error("append_message", e))?
            .ok_or_else(|| DatabaseError::Query("append_message: no row returned".into()))?;
        row_to_message(&row).map_err(|e| DatabaseError::Query(format!("append_message row parse: {e}")))
    }

    async fn reopen_ticket(&self, id: i64) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET approval_status = 'PENDING', ai_processed = 0,
                approved_by = NULL, approved_at = NULL, sent_at = NULL, updated_at = ?1
             WHERE id = ?2",
            vec![text(format_datetime(&Utc::now())), Value::Integer(id)],
            "reopen_ticket",
        )
        .await
    }

    // ── Tickets ─────────────────────────────────────────────────────

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, DatabaseError> {
        self.query_one_ticket(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
            vec![Value::Integer(id)],
            "get_ticket",
        )
        .await
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, DatabaseError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            args.push(text(status.as_str()));
            clauses.push(format!("approval_status = ?{}", args.len()));
        }
        if let Some(category) = filter.category {
            args.push(text(category.as_str()));
            clauses.push(format!("category = ?{}", args.len()));
        }
        if let Some(urgency) = filter.urgency {
            args.push(text(urgency.as_str()));
            clauses.push(format!("urgency = ?{}", args.len()));
        }
        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            args.push(text(like_pattern(term)));
            let n = args.len();
            clauses.push(format!(
                "(LOWER(sender_email) LIKE ?{n} ESCAPE '\\' \
                  OR LOWER(subject) LIKE ?{n} ESCAPE '\\' \
                  OR LOWER(COALESCE(summary, '')) LIKE ?{n} ESCAPE '\\')"
            ));
        }
        if let Some(breached) = filter.sla_breached {
            args.push(flag(breached));
            clauses.push(format!("sla_breached = ?{}", args.len()));
        }
        match filter.assigned_to {
            Some(Assignee::Unassigned) => clauses.push("assigned_to IS NULL".to_string()),
            Some(Assignee::Member(id)) => {
                args.push(Value::Integer(id));
                clauses.push(format!("assigned_to = ?{}", args.len()));
            }
            None => {}
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets {where_sql} ORDER BY received_at DESC, id DESC"
        );
        self.query_tickets(&sql, args, "list_tickets").await
    }

    async fn ticket_messages(&self, ticket_id: i64) -> Result<Vec<TicketMessage>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM ticket_messages WHERE ticket_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ),
            vec![Value::Integer(ticket_id)],
            "ticket_messages",
        )
        .await
    }

    async fn latest_incoming_message(
        &self,
        ticket_id: i64,
    ) -> Result<Option<TicketMessage>, DatabaseError> {
        Ok(self
            .query_messages(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM ticket_messages
                     WHERE ticket_id = ?1 AND is_incoming = 1
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                vec![Value::Integer(ticket_id)],
                "latest_incoming_message",
            )
            .await?
            .into_iter()
            .next())
    }

    async fn customer_history(
        &self,
        sender_email: &str,
        exclude_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Ticket>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_tickets(
            &format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE LOWER(sender_email) = LOWER(?1) AND (?2 IS NULL OR id != ?2)
                 ORDER BY received_at DESC, id DESC LIMIT ?3"
            ),
            vec![text(sender_email), opt_integer(exclude_id), Value::Integer(limit)],
            "customer_history",
        )
        .await
    }

    async fn unprocessed_tickets(&self) -> Result<Vec<Ticket>, DatabaseError> {
        self.query_tickets(
            &format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE ai_processed = 0
                 ORDER BY received_at ASC, id ASC"
            ),
            Vec::new(),
            "unprocessed_tickets",
        )
        .await
    }

    async fn open_tickets(&self) -> Result<Vec<Ticket>, DatabaseError> {
        self.query_tickets(
            &format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE sent_at IS NULL AND approval_status != 'REJECTED'
                 ORDER BY id ASC"
            ),
            Vec::new(),
            "open_tickets",
        )
        .await
    }

    async fn apply_classification(
        &self,
        id: i64,
        c: &Classification,
    ) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET category = ?1, urgency = ?2, summary = ?3, fix_steps = ?4,
                draft_response = ?5, ai_processed = 1, updated_at = ?6
             WHERE id = ?7",
            vec![
                text(c.category.as_str()),
                text(c.urgency.as_str()),
                text(c.summary.as_str()),
                text(c.fix_steps.as_str()),
                text(c.draft_response.as_str()),
                text(format_datetime(&Utc::now())),
                Value::Integer(id),
            ],
            "apply_classification",
        )
        .await
    }

    async fn update_sla(&self, id: i64, sla: &SlaState) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET sla_deadline = ?1, sla_breached = ?2, priority_score = ?3
             WHERE id = ?4",
            vec![
                opt_datetime(sla.deadline),
                flag(sla.breached),
                Value::Integer(sla.priority_score),
                Value::Integer(id),
            ],
            "update_sla",
        )
        .await
    }

    async fn set_approval(
        &self,
        id: i64,
        status: ApprovalStatus,
        by: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET approval_status = ?1, approved_by = ?2, approved_at = ?3,
                updated_at = ?4
             WHERE id = ?5",
            vec![
                text(status.as_str()),
                opt_text(by),
                opt_datetime(at),
                text(format_datetime(&Utc::now())),
                Value::Integer(id),
            ],
            "set_approval",
        )
        .await
    }

    async fn set_draft(&self, id: i64, draft: &str) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET draft_response = ?1, updated_at = ?2 WHERE id = ?3",
            vec![text(draft), text(format_datetime(&Utc::now())), Value::Integer(id)],
            "set_draft",
        )
        .await
    }

    async fn mark_sent(&self, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET sent_at = ?1, updated_at = ?1 WHERE id = ?2",
            vec![text(format_datetime(&at)), Value::Integer(id)],
            "mark_sent",
        )
        .await
    }

    async fn assign_ticket(
        &self,
        id: i64,
        member_id: Option<i64>,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET assigned_to = ?1, assigned_at = ?2, updated_at = ?3 WHERE id = ?4",
            vec![
                opt_integer(member_id),
                opt_datetime(at),
                text(format_datetime(&Utc::now())),
                Value::Integer(id),
            ],
            "assign_ticket",
        )
        .await
    }

    async fn set_escalation(&self, id: i64, escalated: bool) -> Result<(), DatabaseError> {
        self.update_ticket(
            id,
            "UPDATE tickets SET escalation_required = ?1, updated_at = ?2 WHERE id = ?3",
            vec![flag(escalated), text(format_datetime(&Utc::now())), Value::Integer(id)],
            "set_escalation",
        )
        .await
    }

    // ── Team ────────────────────────────────────────────────────────

    async fn create_team_member(&self, member: &NewTeamMember) -> Result<TeamMember, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO team_members (name, email, role, is_active, created_at)
                     VALUES (?1, ?2, ?3, 1, ?4)
                     RETURNING {MEMBER_COLUMNS}"
                ),
                params![
                    member.name.as_str(),
                    member.email.as_str(),
                    member.role.as_str(),
                    format_datetime(&Utc::now()),
                ],
            )
            .await
            .map_err(|e| write_error("create_team_member", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| write_error("create_team_member", e))?
            .ok_or_else(|| DatabaseError::Query("create_team_member: no row returned".into()))?;
        row_to_member(&row)
            .map_err(|e| DatabaseError::Query(format!("create_team_member row parse: {e}")))
    }

    async fn get_team_member(&self, id: i64) -> Result<Option<TeamMember>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MEMBER_COLUMNS} FROM team_members WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_team_member: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_member(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_team_member row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_team_member: {e}"))),
        }
    }

    async fn list_team_members(&self, active_only: bool) -> Result<Vec<TeamMember>, DatabaseError> {
        let filter = if active_only { "WHERE is_active = 1" } else { "" };
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MEMBER_COLUMNS} FROM team_members {filter} ORDER BY name ASC, id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_team_members: {e}")))?;

        let mut members = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_team_members: {e}")))?
        {
            members.push(
                row_to_member(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_team_members row parse: {e}")))?,
            );
        }
        Ok(members)
    }

    // ── Surveys ─────────────────────────────────────────────────────

    async fn insert_survey(
        &self,
        ticket_id: i64,
        customer_email: &str,
        token: &str,
    ) -> Result<Survey, DatabaseError> {
        let sql = format!(
            "INSERT INTO surveys (ticket_id, customer_email, token, rating, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)
             RETURNING {SURVEY_COLUMNS}"
        );
        let mut rows = self
            .conn()
            .query(
                &sql,
                params![ticket_id, customer_email, token, format_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| write_error("insert_survey", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| write_error("insert_survey", e))?
            .ok_or_else(|| DatabaseError::Query("insert_survey: no row returned".into()))?;
        row_to_survey(&row).map_err(|e| DatabaseError::Query(format!("insert_survey row parse: {e}")))
    }

    async fn get_survey(&self, id: i64) -> Result<Option<Survey>, DatabaseError> {
        Ok(self
            .query_surveys(
                &format!("SELECT {SURVEY_COLUMNS} FROM surveys WHERE id = ?1"),
                vec![Value::Integer(id)],
                "get_survey",
            )
            .await?
            .into_iter()
            .next())
    }

    async fn get_survey_for_ticket(&self, ticket_id: i64) -> Result<Option<Survey>, DatabaseError> {
        Ok(self
            .query_surveys(
                &format!("SELECT {SURVEY_COLUMNS} FROM surveys WHERE ticket_id = ?1"),
                vec![Value::Integer(ticket_id)],
                "get_survey_for_ticket",
            )
            .await?
            .into_iter()
            .next())
    }

    async fn get_survey_by_token(&self, token: &str) -> Result<Option<Survey>, DatabaseError> {
        Ok(self
            .query_surveys(
                &format!("SELECT {SURVEY_COLUMNS} FROM surveys WHERE token = ?1"),
                vec![text(token)],
                "get_survey_by_token",
            )
            .await?
            .into_iter()
            .next())
    }

    async fn mark_survey_sent(&self, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE surveys SET sent_at = ?1 WHERE id = ?2",
                params![format_datetime(&at), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_survey_sent: {e}")))?;
        Ok(())
    }

    async fn complete_survey(
        &self,
        id: i64,
        rating: i64,
        feedback: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE surveys SET rating = ?1, feedback = ?2, completed_at = ?3
                 WHERE id = ?4 AND rating = 0",
                vec![
                    Value::Integer(rating),
                    opt_text(feedback),
                    text(format_datetime(&at)),
                    Value::Integer(id),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_survey: {e}")))?;
        Ok(affected > 0)
    }

    async fn delete_survey(&self, id: i64) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute("DELETE FROM surveys WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_survey: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_surveys(&self) -> Result<Vec<Survey>, DatabaseError> {
        self.query_surveys(
            &format!("SELECT {SURVEY_COLUMNS} FROM surveys ORDER BY created_at DESC, id DESC"),
            Vec::new(),
            "list_surveys",
        )
        .await
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting: {e}"))),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, format_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_setting: {e}")))?;
        debug!(key, "Setting updated");
        Ok(())
    }

    async fn all_settings(&self) -> Result<HashMap<String, String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT key, value FROM settings", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("all_settings: {e}")))?;

        let mut settings = HashMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("all_settings: {e}")))?
        {
            let key: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("all_settings row parse: {e}")))?;
            let value: String = row.get(1).unwrap_or_default();
            settings.insert(key, value);
        }
        Ok(settings)
    }

    // ── LLM usage ───────────────────────────────────────────────────

    async fn record_llm_call(&self, call: &LlmCallRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO llm_calls (ticket_id, model, input_tokens, output_tokens, cost, purpose)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                vec![
                    opt_integer(call.ticket_id),
                    text(call.model.as_str()),
                    Value::Integer(i64::from(call.input_tokens)),
                    Value::Integer(i64::from(call.output_tokens)),
                    text(call.cost.to_string()),
                    text(call.purpose.as_str()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_llm_call: {e}")))?;
        Ok(())
    }

    async fn total_llm_cost(&self) -> Result<Decimal, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT cost FROM llm_calls", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("total_llm_cost: {e}")))?;

        let mut total = Decimal::ZERO;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("total_llm_cost: {e}")))?
        {
            let cost: String = row.get(0).unwrap_or_default();
            total += cost.parse::<Decimal>().unwrap_or(Decimal::ZERO);
        }
        Ok(total)
    }
}
