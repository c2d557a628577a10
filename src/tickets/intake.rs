//! Thread resolution: decide whether an inbound email opens a ticket or
//! continues one.

use serde::Serialize;
use tracing::{debug, info};

use crate::channels::email_types::{InboundEmail, strip_quoted_text};
use crate::error::{DatabaseError, Result};
use crate::store::Database;
use crate::tickets::model::{NewMessage, NewTicket, Ticket};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntakeOutcome {
    /// The message id is already stored; nothing changed.
    Duplicate,
    /// Appended to an existing ticket, which is back in the AI queue.
    Appended { ticket_id: i64, message_id: i64 },
    Created(Ticket),
}

/// Store one inbound email.
///
/// Re-fetching the same message is a no-op. A unique-constraint failure on
/// insert means a concurrent intake stored it first, so it is a duplicate too.
pub async fn resolve_email(db: &dyn Database, email: &InboundEmail) -> Result<IntakeOutcome> {
    if db.message_id_exists(&email.message_id).await? {
        debug!(message_id = %email.message_id, "Already stored, skipping");
        return Ok(IntakeOutcome::Duplicate);
    }

    let thread_id = email.conversation_root();
    if let Some(ticket) = db
        .find_thread_ticket(email.in_reply_to.as_deref(), &thread_id)
        .await?
    {
        return append_reply(db, &ticket, email).await;
    }

    let new = NewTicket {
        sender_email: email.sender_email.clone(),
        subject: email.subject.clone(),
        body: email.body.clone(),
        received_at: email.received_at,
        thread_id,
        message_id: email.message_id.clone(),
        in_reply_to: email.in_reply_to.clone(),
    };
    match db.create_ticket(&new).await {
        Ok(ticket) => {
            info!(
                ticket_id = ticket.id,
                sender = %ticket.sender_email,
                thread_id = %ticket.thread_id,
                "New ticket"
            );
            Ok(IntakeOutcome::Created(ticket))
        }
        Err(DatabaseError::Constraint(_)) => Ok(IntakeOutcome::Duplicate),
        Err(e) => Err(e.into()),
    }
}

async fn append_reply(
    db: &dyn Database,
    ticket: &Ticket,
    email: &InboundEmail,
) -> Result<IntakeOutcome> {
    let stripped = strip_quoted_text(&email.body);
    let body = if stripped.trim().is_empty() {
        email.body.clone()
    } else {
        stripped
    };

    let message = NewMessage {
        ticket_id: ticket.id,
        message_id: Some(email.message_id.clone()),
        in_reply_to: email.in_reply_to.clone(),
        sender_email: email.sender_email.clone(),
        body,
        is_incoming: true,
        created_at: email.received_at,
    };
    let stored = match db.append_message(&message).await {
        Ok(m) => m,
        Err(DatabaseError::Constraint(_)) => return Ok(IntakeOutcome::Duplicate),
        Err(e) => return Err(e.into()),
    };

    db.reopen_ticket(ticket.id).await?;
    info!(
        ticket_id = ticket.id,
        message_id = %email.message_id,
        "Follow-up appended, ticket reopened"
    );
    Ok(IntakeOutcome::Appended {
        ticket_id: ticket.id,
        message_id: stored.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::tickets::model::{ApprovalStatus, Category, Classification, Urgency};
    use chrono::{Duration, TimeZone, Utc};

    fn email(message_id: &str, in_reply_to: Option<&str>, references: &[&str]) -> InboundEmail {
        InboundEmail {
            sender_email: "alice@example.com".into(),
            subject: "Cannot log in".into(),
            body: "I am locked out.".into(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            message_id: message_id.into(),
            in_reply_to: in_reply_to.map(String::from),
            references: references.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn created(outcome: IntakeOutcome) -> Ticket {
        match outcome {
            IntakeOutcome::Created(t) => t,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fresh_email_opens_ticket_rooted_at_itself() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let ticket = created(resolve_email(&db, &email("m1@x", None, &[])).await.unwrap());
        assert_eq!(ticket.thread_id, "m1@x");
        assert_eq!(ticket.message_id, "m1@x");
        assert_eq!(ticket.approval_status, ApprovalStatus::Pending);
        assert!(!ticket.ai_processed);

        let messages = db.ticket_messages(ticket.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_incoming);
    }

    #[tokio::test]
    async fn refetch_is_idempotent() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let e = email("m1@x", None, &[]);
        created(resolve_email(&db, &e).await.unwrap());
        assert!(matches!(
            resolve_email(&db, &e).await.unwrap(),
            IntakeOutcome::Duplicate
        ));
        assert_eq!(db.list_tickets(&Default::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reply_appends_and_reopens() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let root = created(resolve_email(&db, &email("m1@x", None, &[])).await.unwrap());
        db.apply_classification(
            root.id,
            &Classification {
                category: Category::LoginAccess,
                urgency: Urgency::High,
                summary: "locked out".into(),
                fix_steps: "reset".into(),
                draft_response: "Good day,".into(),
            },
        )
        .await
        .unwrap();
        db.set_approval(root.id, ApprovalStatus::Approved, Some("admin"), Some(Utc::now()))
            .await
            .unwrap();

        let mut reply = email("m2@x", Some("m1@x"), &["m1@x"]);
        reply.body = "Still broken.\n\nOn Mon, Mar 2 Support wrote:\n> Good day,".into();
        reply.received_at += Duration::hours(1);

        let outcome = resolve_email(&db, &reply).await.unwrap();
        let IntakeOutcome::Appended { ticket_id, .. } = outcome else {
            panic!("expected Appended, got {outcome:?}");
        };
        assert_eq!(ticket_id, root.id);

        let t = db.get_ticket(root.id).await.unwrap().unwrap();
        assert_eq!(t.approval_status, ApprovalStatus::Pending);
        assert!(!t.ai_processed);
        assert!(t.approved_by.is_none());

        let messages = db.ticket_messages(root.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].body, "Still broken.");
    }

    #[tokio::test]
    async fn reply_to_answered_ticket_reopens_it() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let root = created(resolve_email(&db, &email("m1@x", None, &[])).await.unwrap());
        db.set_approval(root.id, ApprovalStatus::Approved, Some("admin"), Some(Utc::now()))
            .await
            .unwrap();
        db.mark_sent(root.id, Utc::now()).await.unwrap();
        assert!(db.open_tickets().await.unwrap().is_empty());

        let mut reply = email("m2@x", Some("m1@x"), &["m1@x"]);
        reply.received_at += Duration::hours(2);
        resolve_email(&db, &reply).await.unwrap();

        let t = db.get_ticket(root.id).await.unwrap().unwrap();
        assert!(t.sent_at.is_none());
        assert!(t.is_open());
        let open = db.open_tickets().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, root.id);
    }

    #[tokio::test]
    async fn reply_to_a_reply_matches_by_thread() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let root = created(resolve_email(&db, &email("m1@x", None, &[])).await.unwrap());

        // Parent m9 was never stored, but References names the root.
        let outcome = resolve_email(&db, &email("m3@x", Some("m9@x"), &["m1@x", "m9@x"]))
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Appended { ticket_id, .. } if ticket_id == root.id));
    }

    #[tokio::test]
    async fn reply_to_unknown_thread_opens_ticket_with_header_root() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let ticket = created(
            resolve_email(&db, &email("m5@x", Some("elsewhere@y"), &["root@y", "elsewhere@y"]))
                .await
                .unwrap(),
        );
        assert_eq!(ticket.thread_id, "root@y");
        assert_eq!(ticket.in_reply_to.as_deref(), Some("elsewhere@y"));
    }

    #[tokio::test]
    async fn appended_message_id_is_deduplicated() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        created(resolve_email(&db, &email("m1@x", None, &[])).await.unwrap());
        let reply = email("m2@x", Some("m1@x"), &["m1@x"]);
        resolve_email(&db, &reply).await.unwrap();
        assert!(matches!(
            resolve_email(&db, &reply).await.unwrap(),
            IntakeOutcome::Duplicate
        ));
    }
}
