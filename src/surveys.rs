//! Customer satisfaction surveys, one per ticket, addressed by an opaque token.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TicketError};
use crate::store::Database;

/// Length of a survey token; matches 32 random bytes in URL-safe base64.
const TOKEN_LEN: usize = 43;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    pub id: i64,
    pub ticket_id: i64,
    pub customer_email: String,
    pub token: String,
    /// 0 until the customer answers, then 1..=5.
    pub rating: i64,
    pub feedback: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Survey {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Result of `create_survey`: the survey and whether it was newly made.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyCreated {
    pub status: &'static str,
    pub survey_id: i64,
    pub token: String,
}

/// What the public survey page needs to render.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyLookup {
    pub survey_id: i64,
    pub ticket_subject: String,
    pub already_completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SurveyStats {
    pub total_sent: usize,
    pub total_completed: usize,
    pub pending: usize,
    pub average_rating: Decimal,
    pub response_rate: Decimal,
    /// Counts for ratings 1 through 5, in order.
    pub rating_distribution: [usize; 5],
}

pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Create the ticket's survey, or return the one that already exists.
pub async fn create_survey(db: &dyn Database, ticket_id: i64) -> Result<SurveyCreated> {
    let ticket = db
        .get_ticket(ticket_id)
        .await?
        .ok_or(TicketError::NotFound { id: ticket_id })?;

    if let Some(existing) = db.get_survey_for_ticket(ticket_id).await? {
        return Ok(SurveyCreated {
            status: "exists",
            survey_id: existing.id,
            token: existing.token,
        });
    }

    let survey = db
        .insert_survey(ticket_id, &ticket.sender_email, &generate_token())
        .await?;
    info!(ticket_id, survey_id = survey.id, "Survey created");
    Ok(SurveyCreated {
        status: "created",
        survey_id: survey.id,
        token: survey.token,
    })
}

pub async fn mark_sent(db: &dyn Database, survey_id: i64, now: DateTime<Utc>) -> Result<Survey> {
    if db.get_survey(survey_id).await?.is_none() {
        return Err(TicketError::SurveyNotFound.into());
    }
    db.mark_survey_sent(survey_id, now).await?;
    db.get_survey(survey_id)
        .await?
        .ok_or_else(|| TicketError::SurveyNotFound.into())
}

pub async fn lookup(db: &dyn Database, token: &str) -> Result<SurveyLookup> {
    let survey = db
        .get_survey_by_token(token)
        .await?
        .ok_or(TicketError::SurveyNotFound)?;
    let ticket_subject = db
        .get_ticket(survey.ticket_id)
        .await?
        .map(|t| t.subject)
        .unwrap_or_else(|| "Support Request".to_string());

    Ok(SurveyLookup {
        survey_id: survey.id,
        ticket_subject,
        already_completed: survey.is_completed(),
    })
}

/// Record the customer's answer. A survey can be answered once.
pub async fn submit(
    db: &dyn Database,
    token: &str,
    rating: i64,
    feedback: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Survey> {
    let survey = db
        .get_survey_by_token(token)
        .await?
        .ok_or(TicketError::SurveyNotFound)?;
    if survey.is_completed() {
        return Err(TicketError::SurveyCompleted.into());
    }
    if !(1..=5).contains(&rating) {
        return Err(TicketError::InvalidRating(rating).into());
    }

    let feedback = feedback.map(str::trim).filter(|f| !f.is_empty());
    // Another submission may have won since the check above.
    if !db.complete_survey(survey.id, rating, feedback, now).await? {
        return Err(TicketError::SurveyCompleted.into());
    }
    info!(survey_id = survey.id, rating, "Survey completed");

    db.get_survey(survey.id)
        .await?
        .ok_or_else(|| TicketError::SurveyNotFound.into())
}

pub async fn delete(db: &dyn Database, survey_id: i64) -> Result<()> {
    if db.delete_survey(survey_id).await? {
        Ok(())
    } else {
        Err(TicketError::SurveyNotFound.into())
    }
}

pub async fn stats(db: &dyn Database) -> Result<SurveyStats> {
    let surveys = db.list_surveys().await?;
    Ok(compute_stats(&surveys))
}

fn compute_stats(surveys: &[Survey]) -> SurveyStats {
    let total_sent = surveys.iter().filter(|s| s.sent_at.is_some()).count();
    let completed: Vec<&Survey> = surveys.iter().filter(|s| s.is_completed()).collect();
    let pending = surveys
        .iter()
        .filter(|s| s.sent_at.is_some() && !s.is_completed())
        .count();

    let mut rating_distribution = [0usize; 5];
    for s in &completed {
        if let Some(slot) = usize::try_from(s.rating - 1)
            .ok()
            .and_then(|i| rating_distribution.get_mut(i))
        {
            *slot += 1;
        }
    }

    let average_rating = if completed.is_empty() {
        Decimal::ZERO
    } else {
        let sum: i64 = completed.iter().map(|s| s.rating).sum();
        (Decimal::from(sum) / Decimal::from(completed.len())).round_dp(2)
    };
    let response_rate = if total_sent == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(completed.len()) * dec!(100) / Decimal::from(total_sent)).round_dp(1)
    };

    SurveyStats {
        total_sent,
        total_completed: completed.len(),
        pending,
        average_rating,
        response_rate,
        rating_distribution,
    }
}
