//! Dashboard statistics computed over the ticket table.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::error::Result;
use crate::store::Database;
use crate::tickets::model::{ApprovalStatus, Ticket};

pub const DEFAULT_TREND_DAYS: u32 = 30;
pub const MIN_TREND_DAYS: u32 = 7;
pub const MAX_TREND_DAYS: u32 = 90;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
    pub name: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analytics {
    pub by_category: Vec<NamedCount>,
    pub by_urgency: Vec<NamedCount>,
    pub total_tickets: usize,
    pub approved_count: usize,
    pub rejected_count: usize,
    pub sent_count: usize,
    pub ai_processed_count: usize,
    /// Percent of all tickets.
    pub approval_rate: Decimal,
    pub rejection_rate: Decimal,
    /// Percent of approved tickets that went out.
    pub send_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trends {
    pub trends: Vec<DailyCount>,
    pub total: usize,
    pub average_per_day: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Performance {
    pub avg_approval_time_hours: Decimal,
    pub avg_resolution_time_hours: Decimal,
    pub total_approved: usize,
    pub total_resolved: usize,
    pub by_approver: Vec<NamedCount>,
    pub today_tickets: usize,
    pub today_sent: usize,
}

/// `part / whole` as a percentage with one decimal; zero when `whole` is zero.
fn percent(part: usize, whole: usize) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part) * dec!(100) / Decimal::from(whole)).round_dp(1)
}

fn counts<'a>(names: impl Iterator<Item = &'a str>) -> Vec<NamedCount> {
    let mut map: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *map.entry(name).or_default() += 1;
    }
    map.into_iter()
        .map(|(name, value)| NamedCount {
            name: name.to_string(),
            value,
        })
        .collect()
}

fn avg_hours(spans: &[Duration]) -> Decimal {
    if spans.is_empty() {
        return Decimal::ZERO;
    }
    let total_secs: i64 = spans.iter().map(|d| d.num_seconds().max(0)).sum();
    (Decimal::from(total_secs) / Decimal::from(3600 * spans.len() as i64)).round_dp(2)
}

pub fn summarize(tickets: &[Ticket]) -> StatusSummary {
    let by = |s: ApprovalStatus| tickets.iter().filter(|t| t.approval_status == s).count();
    StatusSummary {
        total: tickets.len(),
        pending: by(ApprovalStatus::Pending),
        approved: by(ApprovalStatus::Approved),
        rejected: by(ApprovalStatus::Rejected),
    }
}

pub fn analyze(tickets: &[Ticket]) -> Analytics {
    let status = summarize(tickets);
    let sent = tickets.iter().filter(|t| t.sent_at.is_some()).count();
    Analytics {
        by_category: counts(tickets.iter().filter_map(|t| t.category.map(|c| c.as_str()))),
        by_urgency: counts(tickets.iter().filter_map(|t| t.urgency.map(|u| u.as_str()))),
        total_tickets: status.total,
        approved_count: status.approved,
        rejected_count: status.rejected,
        sent_count: sent,
        ai_processed_count: tickets.iter().filter(|t| t.ai_processed).count(),
        approval_rate: percent(status.approved, status.total),
        rejection_rate: percent(status.rejected, status.total),
        send_rate: percent(sent, status.approved),
    }
}

pub fn clamp_days(days: Option<u32>) -> u32 {
    days.unwrap_or(DEFAULT_TREND_DAYS)
        .clamp(MIN_TREND_DAYS, MAX_TREND_DAYS)
}

/// Daily new-ticket counts for the last `days` days ending today (UTC), zero-filled.
pub fn trends(tickets: &[Ticket], days: u32, now: DateTime<Utc>) -> Trends {
    let end = now.date_naive();
    let start = end - Duration::days(i64::from(days) - 1);

    let mut by_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for t in tickets {
        let day = t.received_at.date_naive();
        if day >= start && day <= end {
            *by_day.entry(day).or_default() += 1;
        }
    }

    let trends: Vec<DailyCount> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| DailyCount {
            date,
            count: by_day.get(&date).copied().unwrap_or(0),
        })
        .collect();
    let total: usize = trends.iter().map(|d| d.count).sum();
    let average_per_day = if trends.is_empty() {
        Decimal::ZERO
    } else {
        (Decimal::from(total) / Decimal::from(trends.len())).round_dp(1)
    };
    Trends {
        trends,
        total,
        average_per_day,
    }
}

pub fn performance(tickets: &[Ticket], now: DateTime<Utc>) -> Performance {
    let approvals: Vec<Duration> = tickets
        .iter()
        .filter(|t| t.approval_status == ApprovalStatus::Approved)
        .filter_map(|t| t.approved_at.map(|a| a - t.received_at))
        .collect();
    let resolutions: Vec<Duration> = tickets
        .iter()
        .filter_map(|t| t.sent_at.map(|s| s - t.received_at))
        .collect();
    let today = now.date_naive();
    Performance {
        avg_approval_time_hours: avg_hours(&approvals),
        avg_resolution_time_hours: avg_hours(&resolutions),
        total_approved: approvals.len(),
        total_resolved: resolutions.len(),
        by_approver: counts(
            tickets
                .iter()
                .filter(|t| t.approval_status == ApprovalStatus::Approved)
                .filter_map(|t| t.approved_by.as_deref()),
        ),
        today_tickets: tickets
            .iter()
            .filter(|t| t.received_at.date_naive() == today)
            .count(),
        today_sent: tickets
            .iter()
            .filter(|t| t.sent_at.is_some_and(|s| s.date_naive() == today))
            .count(),
    }
}

async fn all_tickets(db: &dyn Database) -> Result<Vec<Ticket>> {
    Ok(db.list_tickets(&Default::default()).await?)
}

pub async fn status_summary(db: &dyn Database) -> Result<StatusSummary> {
    Ok(summarize(&all_tickets(db).await?))
}

pub async fn analytics(db: &dyn Database) -> Result<Analytics> {
    Ok(analyze(&all_tickets(db).await?))
}

pub async fn volume_trends(db: &dyn Database, days: Option<u32>, now: DateTime<Utc>) -> Result<Trends> {
    Ok(trends(&all_tickets(db).await?, clamp_days(days), now))
}

pub async fn performance_metrics(db: &dyn Database, now: DateTime<Utc>) -> Result<Performance> {
    Ok(performance(&all_tickets(db).await?, now))
}
