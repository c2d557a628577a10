//! Integration tests for the `/ws` event stream.
//!
//! Each test spins up an Axum server on a random port, connects via
//! tokio-tungstenite, and checks the frames that arrive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use support_desk::api;
use support_desk::channels::{InboundEmail, Mailer, OutgoingEmail};
use support_desk::error::MailError;
use support_desk::pipeline::{Desk, Scheduler};
use support_desk::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok("out@desk.test".to_string())
    }

    fn from_address(&self) -> Option<&str> {
        Some("support@desk.test")
    }
}

/// Start an Axum server on a random port, return (port, desk).
async fn start_server() -> (u16, Arc<Desk>) {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let desk = Arc::new(Desk::new(db, Arc::new(Outbox::default())));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&desk), 5));
    let app = api::router(Arc::clone(&desk), scheduler);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, desk)
}

fn email(message_id: &str) -> InboundEmail {
    InboundEmail {
        sender_email: "lou@cust.example".to_string(),
        subject: "Where is my invoice?".to_string(),
        body: "I cannot find it.".to_string(),
        message_id: message_id.to_string(),
        in_reply_to: None,
        references: Vec::new(),
        received_at: chrono::Utc::now(),
    }
}

/// Read the next text frame as JSON, skipping control frames.
async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await.expect("stream ended").expect("ws error") {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn hello_reports_open_tickets() {
    timeout(TEST_TIMEOUT, async {
        let (port, desk) = start_server().await;
        desk.intake(&email("h1@cust.example")).await.unwrap();
        desk.intake(&email("h2@cust.example")).await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        let hello = next_json(&mut ws).await;
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["open_tickets"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn gate_events_stream_in_order() {
    timeout(TEST_TIMEOUT, async {
        let (port, desk) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "hello");

        desk.intake(&email("g1@cust.example")).await.unwrap();
        let created = next_json(&mut ws).await;
        assert_eq!(created["type"], "ticket_created");
        assert_eq!(created["subject"], "Where is my invoice?");
        let id = created["id"].as_i64().unwrap();

        desk.update_draft(id, "Good day,\n\nAttached.\n\nSupport Team")
            .await
            .unwrap();
        let updated = next_json(&mut ws).await;
        assert_eq!(updated["type"], "ticket_updated");
        assert_eq!(updated["approval_status"], "PENDING");

        desk.approve(id, Some("kai")).await.unwrap();
        let approved = next_json(&mut ws).await;
        assert_eq!(approved["approval_status"], "APPROVED");

        desk.send(id).await.unwrap();
        let sent = next_json(&mut ws).await;
        assert_eq!(sent["type"], "ticket_sent");
        assert_eq!(sent["id"], id);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn client_close_ends_stream() {
    timeout(TEST_TIMEOUT, async {
        let (port, _desk) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "hello");
        ws.close(None).await.unwrap();

        // The server acknowledges the close and the stream drains.
        while let Some(frame) = ws.next().await {
            if frame.is_err() {
                break;
            }
        }
    })
    .await
    .expect("test timed out");
}
