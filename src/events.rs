//! Live desk events, fanned out to WebSocket clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::tickets::model::ApprovalStatus;

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    /// Sent once on connect.
    Hello { open_tickets: usize },
    TicketCreated {
        id: i64,
        subject: String,
        sender_email: String,
    },
    TicketUpdated {
        id: i64,
        approval_status: ApprovalStatus,
    },
    TicketSent { id: i64 },
    SlaBreached { id: i64 },
}

pub struct EventHub {
    tx: broadcast::Sender<DeskEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeskEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: DeskEvent) {
        debug!(?event, "Desk event");
        // ok if nobody is listening
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
