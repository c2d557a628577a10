//! Integration tests for the HTTP API.
//!
//! Each test builds the real router over an in-memory database with fake
//! mail and AI, and drives it through `oneshot`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

use support_desk::api;
use support_desk::channels::{MailSource, Mailer, OutgoingEmail, RawEmail};
use support_desk::error::{LlmError, MailError};
use support_desk::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use support_desk::pipeline::{Desk, Scheduler};
use support_desk::store::LibSqlBackend;

const REPLY: &str = r#"{"category":"Billing","urgency":"Medium","summary":"Double charge.","fix_steps":"Refund","response":"Good day,\n\nWe have refunded you.\n\nSupport Team"}"#;

struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: REPLY.to_string(),
            input_tokens: 10,
            output_tokens: 10,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[derive(Default)]
struct Mailbox {
    messages: Mutex<Vec<RawEmail>>,
    seen: Mutex<Vec<String>>,
    offline: bool,
}

#[async_trait]
impl MailSource for Mailbox {
    async fn fetch_unseen(&self) -> Result<Vec<RawEmail>, MailError> {
        if self.offline {
            return Err(MailError::Protocol("IMAP connection closed".into()));
        }
        let seen = self.seen.lock().unwrap().clone();
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !seen.contains(&m.uid))
            .cloned()
            .collect())
    }

    async fn mark_seen(&self, uids: &[String]) -> Result<(), MailError> {
        self.seen.lock().unwrap().extend(uids.iter().cloned());
        Ok(())
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("out-{}@desk.test", sent.len()))
    }

    fn from_address(&self) -> Option<&str> {
        Some("support@desk.test")
    }
}

fn raw_email(message_id: &str, from: &str, subject: &str) -> RawEmail {
    let raw = format!(
        "From: Customer <{from}>\r\nTo: support@desk.test\r\nSubject: {subject}\r\n\
         Date: Mon, 2 Mar 2026 09:00:00 +0000\r\nMessage-ID: <{message_id}>\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\nI was charged twice.\r\n"
    );
    RawEmail {
        uid: message_id.to_string(),
        bytes: raw.into_bytes(),
    }
}

struct Harness {
    app: Router,
    mailbox: Arc<Mailbox>,
    outbox: Arc<Outbox>,
}

async fn harness() -> Harness {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mailbox = Arc::new(Mailbox::default());
    let outbox = Arc::new(Outbox::default());
    let desk = Arc::new(
        Desk::new(db, outbox.clone())
            .with_source(mailbox.clone())
            .with_llm(Arc::new(StubLlm)),
    );
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&desk), 5));
    Harness {
        app: api::router(desk, scheduler),
        mailbox,
        outbox,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Fetch one customer email and return the new ticket's id.
async fn ingest(h: &Harness, message_id: &str) -> i64 {
    h.mailbox
        .messages
        .lock()
        .unwrap()
        .push(raw_email(message_id, "pat@cust.example", "Charged twice"));
    let (status, report) = call(&h.app, Method::POST, "/api/tickets/fetch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["created"], 1);

    let (_, list) = call(&h.app, Method::GET, "/api/tickets", None).await;
    list.as_array()
        .unwrap()
        .iter()
        .find(|t| t["message_id"] == message_id)
        .unwrap()["id"]
        .as_i64()
        .unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn full_approval_flow() {
    let h = harness().await;
    let id = ingest(&h, "c1@cust.example").await;

    let (status, ticket) = call(&h.app, Method::POST, &format!("/api/tickets/{id}/process"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["category"], "Billing");
    assert_eq!(ticket["approval_status"], "PENDING");

    // The gate holds until a human approves.
    let (status, err) = call(&h.app, Method::POST, &format!("/api/tickets/{id}/send"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("approved"));
    assert!(h.outbox.sent.lock().unwrap().is_empty());

    let (status, _) = call(
        &h.app,
        Method::PUT,
        &format!("/api/tickets/{id}/draft"),
        Some(json!({"draft_response": "Good day,\n\nRefund issued.\n\nSupport Team"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, ticket) = call(
        &h.app,
        Method::POST,
        &format!("/api/tickets/{id}/approve?approved_by=sam"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["approval_status"], "APPROVED");
    assert_eq!(ticket["approved_by"], "sam");

    let (status, ticket) = call(&h.app, Method::POST, &format!("/api/tickets/{id}/send"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!ticket["sent_at"].is_null());

    // A second send is refused; the customer gets one reply.
    let (status, _) = call(&h.app, Method::POST, &format!("/api/tickets/{id}/send"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let sent = h.outbox.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "pat@cust.example");
    assert_eq!(sent[0].subject, "Re: Charged twice");
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("c1@cust.example"));
    assert!(sent[0].body.contains("Refund issued."));

    let (status, detail) = call(&h.app, Method::GET, &format!("/api/tickets/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_ticket_is_404() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/api/tickets/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Ticket 999 not found"));

    let (status, _) = call(&h.app, Method::POST, "/api/tickets/999/approve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_filter_is_400() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/api/tickets?status=maybe", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("maybe"));
}

#[tokio::test]
async fn list_filters_and_bulk_actions() {
    let h = harness().await;
    let a = ingest(&h, "b1@cust.example").await;
    let b = ingest(&h, "b2@cust.example").await;
    call(&h.app, Method::POST, "/api/tickets/process-all", None).await;

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/tickets/bulk-approve",
        Some(json!({"ticket_ids": [a, b, 404]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (_, approved) = call(&h.app, Method::GET, "/api/tickets?status=approved", None).await;
    assert_eq!(approved.as_array().unwrap().len(), 2);

    let (_, body) = call(
        &h.app,
        Method::POST,
        "/api/tickets/bulk-send",
        Some(json!({"ticket_ids": [a, b]})),
    )
    .await;
    assert_eq!(body["count"], 2);
    assert_eq!(h.outbox.sent.lock().unwrap().len(), 2);

    let (_, history) = call(&h.app, Method::GET, &format!("/api/tickets/{a}/history"), None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["id"], b);
}

#[tokio::test]
async fn team_and_assignment() {
    let h = harness().await;
    let id = ingest(&h, "t1@cust.example").await;

    let (status, member) = call(
        &h.app,
        Method::POST,
        "/api/team",
        Some(json!({"name": "Robin", "email": "Robin@Desk.test"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(member["email"], "robin@desk.test");
    assert_eq!(member["role"], "agent");

    let (status, _) = call(
        &h.app,
        Method::POST,
        "/api/team",
        Some(json!({"name": "Robin again", "email": "robin@desk.test"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let member_id = member["id"].as_i64().unwrap();
    let (status, ticket) = call(
        &h.app,
        Method::PUT,
        &format!("/api/tickets/{id}/assign"),
        Some(json!({"member_id": member_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["assigned_to"], member_id);

    let (status, _) = call(
        &h.app,
        Method::PUT,
        &format!("/api/tickets/{id}/assign"),
        Some(json!({"member_id": 77})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, unassigned) = call(&h.app, Method::GET, "/api/tickets?assigned_to=unassigned", None).await;
    assert!(unassigned.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn survey_lifecycle() {
    let h = harness().await;
    let id = ingest(&h, "s1@cust.example").await;

    let (status, created) = call(&h.app, Method::POST, "/api/surveys", Some(json!({"ticket_id": id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "created");
    let token = created["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 43);

    let (_, again) = call(&h.app, Method::POST, "/api/surveys", Some(json!({"ticket_id": id}))).await;
    assert_eq!(again["status"], "exists");
    assert_eq!(again["token"], token.as_str());

    let survey_id = created["survey_id"].as_i64().unwrap();
    let (status, _) = call(&h.app, Method::POST, &format!("/api/surveys/{survey_id}/send"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, page) = call(&h.app, Method::GET, &format!("/api/surveys/token/{token}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["ticket_subject"], "Charged twice");
    assert_eq!(page["already_completed"], false);

    let uri = format!("/api/surveys/token/{token}");
    let (status, _) = call(&h.app, Method::POST, &uri, Some(json!({"rating": 9}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&h.app, Method::POST, &uri, Some(json!({"rating": 4, "feedback": "quick"}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&h.app, Method::POST, &uri, Some(json!({"rating": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = call(&h.app, Method::GET, "/api/surveys/stats", None).await;
    assert_eq!(stats["total_sent"], 1);
    assert_eq!(stats["total_completed"], 1);
    assert_eq!(stats["rating_distribution"], json!([0, 0, 0, 1, 0]));

    let (status, _) = call(&h.app, Method::DELETE, &format!("/api/surveys/{survey_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&h.app, Method::GET, &format!("/api/surveys/token/{token}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sla_settings_and_queue() {
    let h = harness().await;
    let id = ingest(&h, "q1@cust.example").await;
    call(&h.app, Method::POST, &format!("/api/tickets/{id}/process"), None).await;

    let (status, hours) = call(
        &h.app,
        Method::PUT,
        "/api/settings/sla",
        Some(json!({"high": 2, "medium": 0, "low": 48})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hours, json!({"high": 2, "medium": 8, "low": 48}));

    let (_, queue) = call(&h.app, Method::GET, "/api/sla/queue?limit=5", None).await;
    let queue = queue.as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["id"], id);
    assert_eq!(queue[0]["sla_status"], "breached");

    let (_, summary) = call(&h.app, Method::GET, "/api/sla/summary", None).await;
    assert_eq!(summary["total_active"], 1);
    assert_eq!(summary["breached"], 1);
    assert_eq!(summary["by_urgency"]["medium"], 1);
}

#[tokio::test]
async fn scheduler_controls() {
    let h = harness().await;
    let (_, status) = call(&h.app, Method::GET, "/api/scheduler/status", None).await;
    assert_eq!(status["running"], false);
    assert_eq!(status["interval_minutes"], 5);

    let (_, status) = call(
        &h.app,
        Method::PUT,
        "/api/scheduler/interval",
        Some(json!({"minutes": 500})),
    )
    .await;
    assert_eq!(status["interval_minutes"], 60);

    let (_, status) = call(&h.app, Method::POST, "/api/scheduler/start?interval_minutes=10", None).await;
    assert_eq!(status["running"], true);
    assert_eq!(status["interval_minutes"], 10);

    let (_, status) = call(&h.app, Method::POST, "/api/scheduler/stop", None).await;
    assert_eq!(status["running"], false);
}

#[tokio::test]
async fn stats_endpoints() {
    let h = harness().await;
    let id = ingest(&h, "st1@cust.example").await;
    call(&h.app, Method::POST, &format!("/api/tickets/{id}/process"), None).await;
    call(&h.app, Method::POST, &format!("/api/tickets/{id}/approve"), None).await;

    let (_, summary) = call(&h.app, Method::GET, "/api/stats/summary", None).await;
    assert_eq!(summary, json!({"total": 1, "pending": 0, "approved": 1, "rejected": 0}));

    let (_, analytics) = call(&h.app, Method::GET, "/api/stats/analytics", None).await;
    let rate: Decimal = analytics["approval_rate"].as_str().unwrap().parse().unwrap();
    assert_eq!(rate, Decimal::from(100));
    assert_eq!(analytics["by_category"], json!([{"name": "Billing", "value": 1}]));

    let (_, trends) = call(&h.app, Method::GET, "/api/stats/trends?days=3", None).await;
    assert_eq!(trends["trends"].as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn fetch_without_mailbox_is_unavailable() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let desk = Arc::new(Desk::new(db, Arc::new(Outbox::default())));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&desk), 5));
    let app = api::router(desk, scheduler);

    let (status, body) = call(&app, Method::POST, "/api/tickets/fetch", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Mail error: IMAP is not configured");
}

#[tokio::test]
async fn unreachable_mailbox_fetches_nothing() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mailbox = Arc::new(Mailbox {
        offline: true,
        ..Default::default()
    });
    let desk = Arc::new(Desk::new(db, Arc::new(Outbox::default())).with_source(mailbox));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&desk), 5));
    let app = api::router(desk, scheduler);

    let (status, report) = call(&app, Method::POST, "/api/tickets/fetch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["fetched"], 0);
    assert_eq!(report["created"], 0);
}
