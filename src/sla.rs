//! SLA deadlines, breach tracking and priority scoring.
//!
//! `score = urgency_weight + 2 * hours_waiting + deadline_bonus + escalation_bonus`.
//! Unclassified tickets have no deadline and score as Low.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, TicketError};
use crate::settings::{self, SlaHours};
use crate::store::Database;
use crate::tickets::model::{SlaState, Ticket, Urgency};

pub const DEFAULT_QUEUE_LIMIT: usize = 20;
pub const MAX_QUEUE_LIMIT: usize = 100;

/// Remaining time under which an unbreached ticket counts as at risk.
const AT_RISK_HOURS: i64 = 2;
const ESCALATION_BONUS: i64 = 75;

pub fn urgency_weight(urgency: Option<Urgency>) -> i64 {
    match urgency {
        Some(Urgency::High) => 100,
        Some(Urgency::Medium) => 50,
        Some(Urgency::Low) | None => 10,
    }
}

pub fn calculate_deadline(
    received_at: DateTime<Utc>,
    urgency: Option<Urgency>,
    hours: &SlaHours,
) -> Option<DateTime<Utc>> {
    urgency.map(|u| received_at + Duration::hours(hours.for_urgency(u)))
}

/// Hours since receipt. Clock skew never makes this negative.
pub fn hours_waiting(received_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - received_at).num_seconds().max(0);
    secs as f64 / 3600.0
}

fn deadline_bonus(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let Some(deadline) = deadline else {
        return 0;
    };
    if now > deadline {
        return 200;
    }
    let remaining = deadline - now;
    if remaining < Duration::hours(2) {
        100
    } else if remaining < Duration::hours(4) {
        50
    } else {
        0
    }
}

pub fn priority_score(
    urgency: Option<Urgency>,
    received_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
    escalated: bool,
    now: DateTime<Utc>,
) -> i64 {
    let time_bonus = (hours_waiting(received_at, now) * 2.0) as i64;
    let escalation = if escalated { ESCALATION_BONUS } else { 0 };
    urgency_weight(urgency) + time_bonus + deadline_bonus(deadline, now) + escalation
}

/// Fresh SLA state for a ticket.
///
/// A ticket that has been answered keeps its breach verdict: breached if it
/// was flagged before, or if the reply went out after the deadline.
pub fn compute_state(ticket: &Ticket, hours: &SlaHours, now: DateTime<Utc>) -> SlaState {
    let deadline = calculate_deadline(ticket.received_at, ticket.urgency, hours);
    let breached = match (ticket.sent_at, deadline) {
        (Some(sent), Some(d)) => ticket.sla_breached || sent > d,
        (Some(_), None) => ticket.sla_breached,
        (None, Some(d)) => now > d,
        (None, None) => false,
    };
    SlaState {
        deadline,
        breached,
        priority_score: priority_score(
            ticket.urgency,
            ticket.received_at,
            deadline,
            ticket.escalation_required,
            now,
        ),
    }
}

/// Where an open ticket stands against its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    Breached,
    AtRisk,
    OnTrack,
    NoDeadline,
}

pub fn sla_status(ticket: &Ticket, now: DateTime<Utc>) -> SlaStatus {
    match ticket.sla_deadline {
        _ if ticket.sla_breached => SlaStatus::Breached,
        None => SlaStatus::NoDeadline,
        Some(d) if d < now + Duration::hours(AT_RISK_HOURS) => SlaStatus::AtRisk,
        Some(_) => SlaStatus::OnTrack,
    }
}

/// Recompute and store one ticket's SLA state.
pub async fn update_ticket_sla(db: &dyn Database, id: i64, now: DateTime<Utc>) -> Result<SlaState> {
    let ticket = db.get_ticket(id).await?.ok_or(TicketError::NotFound { id })?;
    let hours = settings::sla_hours(db).await?;
    let state = compute_state(&ticket, &hours, now);
    db.update_sla(id, &state).await?;
    if state.breached && !ticket.sla_breached {
        warn!(ticket_id = id, "SLA breached");
    }
    debug!(ticket_id = id, score = state.priority_score, "SLA updated");
    Ok(state)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlaRefresh {
    pub updated: usize,
    /// Tickets whose deadline moved, e.g. after an SLA hours change.
    pub recalculated: usize,
    pub newly_breached: usize,
    pub newly_breached_ids: Vec<i64>,
}

/// Full scan over open tickets.
pub async fn update_all_sla_status(db: &dyn Database, now: DateTime<Utc>) -> Result<SlaRefresh> {
    let hours = settings::sla_hours(db).await?;
    let mut report = SlaRefresh::default();

    for ticket in db.open_tickets().await? {
        let state = compute_state(&ticket, &hours, now);
        if state.deadline != ticket.sla_deadline {
            report.recalculated += 1;
        }
        if state.breached && !ticket.sla_breached {
            report.newly_breached += 1;
            report.newly_breached_ids.push(ticket.id);
        }
        db.update_sla(ticket.id, &state).await?;
        report.updated += 1;
    }

    if report.newly_breached > 0 {
        warn!(
            count = report.newly_breached,
            ids = ?report.newly_breached_ids,
            "Tickets breached SLA"
        );
    }
    info!(
        updated = report.updated,
        recalculated = report.recalculated,
        "SLA status refreshed"
    );
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub hours_waiting: Decimal,
    pub sla_status: SlaStatus,
}

/// Highest score first; ties go to the earlier deadline, then the older
/// ticket. Tickets without a deadline sort after those with one.
pub fn rank(tickets: &mut [Ticket]) {
    tickets.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then_with(|| match (a.sla_deadline, b.sla_deadline) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.received_at.cmp(&b.received_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Refresh SLA state, then return the top open tickets.
pub async fn priority_queue(
    db: &dyn Database,
    limit: Option<usize>,
    now: DateTime<Utc>,
) -> Result<Vec<QueueEntry>> {
    let limit = limit
        .unwrap_or(DEFAULT_QUEUE_LIMIT)
        .clamp(1, MAX_QUEUE_LIMIT);
    update_all_sla_status(db, now).await?;

    let mut open = db.open_tickets().await?;
    rank(&mut open);
    Ok(open
        .into_iter()
        .take(limit)
        .map(|ticket| {
            let hours = Decimal::from_f64_retain(hours_waiting(ticket.received_at, now))
                .unwrap_or_default()
                .round_dp(1);
            let sla_status = sla_status(&ticket, now);
            QueueEntry {
                ticket,
                hours_waiting: hours,
                sla_status,
            }
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UrgencyCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlaSummary {
    pub total_active: usize,
    pub breached: usize,
    pub at_risk: usize,
    pub on_track: usize,
    pub by_urgency: UrgencyCounts,
}

pub fn summarize(open: &[Ticket], now: DateTime<Utc>) -> SlaSummary {
    let mut summary = SlaSummary {
        total_active: open.len(),
        ..Default::default()
    };
    for t in open {
        match sla_status(t, now) {
            SlaStatus::Breached => summary.breached += 1,
            SlaStatus::AtRisk => summary.at_risk += 1,
            SlaStatus::OnTrack | SlaStatus::NoDeadline => {}
        }
        match t.urgency {
            Some(Urgency::High) => summary.by_urgency.high += 1,
            Some(Urgency::Medium) => summary.by_urgency.medium += 1,
            Some(Urgency::Low) => summary.by_urgency.low += 1,
            None => {}
        }
    }
    summary.on_track = summary.total_active - summary.breached - summary.at_risk;
    summary
}

pub async fn sla_summary(db: &dyn Database, now: DateTime<Utc>) -> Result<SlaSummary> {
    let open = db.open_tickets().await?;
    Ok(summarize(&open, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::tickets::model::{
        ApprovalStatus, Category, Classification, NewTicket,
    };
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn ticket(id: i64, urgency: Option<Urgency>, received_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id,
            sender_email: "a@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
            received_at,
            thread_id: format!("m{id}"),
            message_id: format!("m{id}"),
            in_reply_to: None,
            category: None,
            urgency,
            summary: None,
            fix_steps: None,
            draft_response: None,
            approval_status: ApprovalStatus::Pending,
            approved_by: None,
            approved_at: None,
            sent_at: None,
            ai_processed: false,
            escalation_required: false,
            assigned_to: None,
            assigned_at: None,
            sla_deadline: None,
            sla_breached: false,
            priority_score: 0,
            created_at: received_at,
            updated_at: received_at,
        }
    }

    #[test]
    fn weights_by_urgency() {
        assert_eq!(urgency_weight(Some(Urgency::High)), 100);
        assert_eq!(urgency_weight(Some(Urgency::Medium)), 50);
        assert_eq!(urgency_weight(Some(Urgency::Low)), 10);
        assert_eq!(urgency_weight(None), 10);
    }

    #[test]
    fn deadline_uses_configured_hours() {
        let hours = SlaHours::default();
        assert_eq!(
            calculate_deadline(t0(), Some(Urgency::High), &hours),
            Some(t0() + Duration::hours(4))
        );
        assert_eq!(
            calculate_deadline(t0(), Some(Urgency::Low), &hours),
            Some(t0() + Duration::hours(24))
        );
        assert_eq!(calculate_deadline(t0(), None, &hours), None);
    }

    #[test]
    fn score_adds_all_terms() {
        let deadline = Some(t0() + Duration::hours(4));
        // 1h in: 100 + 2 + 50 (3h left)
        assert_eq!(
            priority_score(Some(Urgency::High), t0(), deadline, false, t0() + Duration::hours(1)),
            152
        );
        // 3h in: 100 + 6 + 100 (1h left) + 75
        assert_eq!(
            priority_score(Some(Urgency::High), t0(), deadline, true, t0() + Duration::hours(3)),
            281
        );
        // 5h in: 100 + 10 + 200
        assert_eq!(
            priority_score(Some(Urgency::High), t0(), deadline, false, t0() + Duration::hours(5)),
            310
        );
    }

    #[test]
    fn deadline_bonus_thresholds_are_strict() {
        let deadline = t0() + Duration::hours(8);
        let at = |remaining: Duration| deadline - remaining;
        let score = |now| priority_score(Some(Urgency::Medium), t0(), Some(deadline), false, now);

        // Exactly 4h left: no bonus yet. 50 + 8
        assert_eq!(score(at(Duration::hours(4))), 58);
        // One second inside the 4h window. 50 + 8 + 50
        assert_eq!(score(at(Duration::hours(4) - Duration::seconds(1))), 108);
        // Exactly 2h left is still the 4h tier. 50 + 12 + 50
        assert_eq!(score(at(Duration::hours(2))), 112);
        assert_eq!(score(at(Duration::hours(2) - Duration::seconds(1))), 162);
        // At the deadline itself: not past it. 50 + 16 + 100
        assert_eq!(score(deadline), 166);
        // One second past. 50 + 16 + 200
        assert_eq!(score(deadline + Duration::seconds(1)), 266);
    }

    #[test]
    fn breach_starts_after_the_deadline_instant() {
        let hours = SlaHours::default();
        let t = ticket(1, Some(Urgency::High), t0());
        let deadline = t0() + Duration::hours(4);

        let on_time = compute_state(&t, &hours, deadline);
        assert_eq!(on_time.deadline, Some(deadline));
        assert!(!on_time.breached);
        assert_eq!(on_time.priority_score, 100 + 8 + 100);

        let late = compute_state(&t, &hours, deadline + Duration::seconds(1));
        assert!(late.breached);
        assert_eq!(late.priority_score, 100 + 8 + 200);

        // A reply sent exactly at the deadline is on time.
        let mut answered = t.clone();
        answered.sent_at = Some(deadline);
        assert!(!compute_state(&answered, &hours, deadline + Duration::hours(1)).breached);
    }

    #[test]
    fn time_bonus_truncates_and_never_goes_negative() {
        // 45 minutes waiting is 1.5 after doubling
        let now = t0() + Duration::minutes(45);
        assert_eq!(priority_score(None, t0(), None, false, now), 11);
        let before = t0() - Duration::hours(3);
        assert_eq!(priority_score(None, t0(), None, false, before), 10);
    }

    #[test]
    fn breach_requires_open_ticket_past_deadline() {
        let hours = SlaHours::default();
        let mut t = ticket(1, Some(Urgency::High), t0());
        assert!(!compute_state(&t, &hours, t0() + Duration::hours(3)).breached);
        assert!(compute_state(&t, &hours, t0() + Duration::hours(5)).breached);

        t.sent_at = Some(t0() + Duration::hours(1));
        assert!(!compute_state(&t, &hours, t0() + Duration::hours(5)).breached);
        t.sent_at = Some(t0() + Duration::hours(6));
        assert!(compute_state(&t, &hours, t0() + Duration::hours(7)).breached);
    }

    #[test]
    fn unclassified_ticket_has_no_deadline() {
        let state = compute_state(&ticket(1, None, t0()), &SlaHours::default(), t0() + Duration::days(3));
        assert_eq!(state.deadline, None);
        assert!(!state.breached);
        assert_eq!(state.priority_score, 10 + 144);
    }

    #[test]
    fn rank_breaks_ties_by_deadline_then_age() {
        let mut a = ticket(1, Some(Urgency::Low), t0());
        a.priority_score = 50;
        a.sla_deadline = Some(t0() + Duration::hours(8));
        let mut b = ticket(2, Some(Urgency::Low), t0() + Duration::minutes(5));
        b.priority_score = 50;
        b.sla_deadline = Some(t0() + Duration::hours(2));
        let mut c = ticket(3, None, t0() - Duration::hours(1));
        c.priority_score = 50;
        let mut d = ticket(4, Some(Urgency::High), t0());
        d.priority_score = 120;

        let mut all = vec![a, b, c, d];
        rank(&mut all);
        let ids: Vec<i64> = all.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);
    }

    #[test]
    fn summary_buckets() {
        let now = t0();
        let mut breached = ticket(1, Some(Urgency::High), now);
        breached.sla_breached = true;
        breached.sla_deadline = Some(now - Duration::hours(1));
        let mut at_risk = ticket(2, Some(Urgency::Medium), now);
        at_risk.sla_deadline = Some(now + Duration::minutes(90));
        let mut on_track = ticket(3, Some(Urgency::Low), now);
        on_track.sla_deadline = Some(now + Duration::hours(20));
        let unclassified = ticket(4, None, now);

        let s = summarize(&[breached, at_risk, on_track, unclassified], now);
        assert_eq!(s.total_active, 4);
        assert_eq!(s.breached, 1);
        assert_eq!(s.at_risk, 1);
        assert_eq!(s.on_track, 2);
        assert_eq!(s.by_urgency, UrgencyCounts { high: 1, medium: 1, low: 1 });
    }

    async fn classified(db: &LibSqlBackend, n: u32, urgency: Urgency, received_at: DateTime<Utc>) -> i64 {
        let t = db
            .create_ticket(&NewTicket {
                sender_email: "c@example.com".into(),
                subject: format!("issue {n}"),
                body: "help".into(),
                received_at,
                thread_id: format!("sla-{n}@example.com"),
                message_id: format!("sla-{n}@example.com"),
                in_reply_to: None,
            })
            .await
            .unwrap();
        db.apply_classification(
            t.id,
            &Classification {
                category: Category::Technical,
                urgency,
                summary: "s".into(),
                fix_steps: "f".into(),
                draft_response: "Good day,".into(),
            },
        )
        .await
        .unwrap();
        t.id
    }

    #[tokio::test]
    async fn refresh_flags_and_clears_breaches() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let id = classified(&db, 1, Urgency::High, t0()).await;

        let report = update_all_sla_status(&db, t0() + Duration::hours(5)).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.recalculated, 1);
        assert_eq!(report.newly_breached_ids, vec![id]);
        assert!(db.get_ticket(id).await.unwrap().unwrap().sla_breached);

        // Widening the SLA moves the deadline back into the future.
        settings::save_sla_hours(&db, SlaHours { high: 12, medium: 8, low: 24 })
            .await
            .unwrap();
        let report = update_all_sla_status(&db, t0() + Duration::hours(5)).await.unwrap();
        assert_eq!(report.recalculated, 1);
        assert_eq!(report.newly_breached, 0);
        let t = db.get_ticket(id).await.unwrap().unwrap();
        assert!(!t.sla_breached);
        assert_eq!(t.sla_deadline, Some(t0() + Duration::hours(12)));
    }

    #[tokio::test]
    async fn refresh_skips_sent_tickets() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let id = classified(&db, 1, Urgency::High, t0()).await;
        db.mark_sent(id, t0() + Duration::hours(1)).await.unwrap();

        let report = update_all_sla_status(&db, t0() + Duration::hours(9)).await.unwrap();
        assert_eq!(report.updated, 0);
        assert!(!db.get_ticket(id).await.unwrap().unwrap().sla_breached);
    }

    #[tokio::test]
    async fn queue_orders_and_clamps() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let low = classified(&db, 1, Urgency::Low, t0()).await;
        let high = classified(&db, 2, Urgency::High, t0()).await;
        let medium = classified(&db, 3, Urgency::Medium, t0()).await;

        let now = t0() + Duration::hours(1);
        let queue = priority_queue(&db, None, now).await.unwrap();
        let ids: Vec<i64> = queue.iter().map(|e| e.ticket.id).collect();
        assert_eq!(ids, vec![high, medium, low]);
        assert_eq!(queue[0].hours_waiting, Decimal::from(1));

        let capped = priority_queue(&db, Some(0), now).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn update_unknown_ticket_is_not_found() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let err = update_ticket_sla(&db, 99, t0()).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Ticket(TicketError::NotFound { id: 99 })));
    }
}
