//! Support Desk: email tickets with AI drafts behind a human approval gate.

pub mod analytics;
pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod settings;
pub mod sla;
pub mod store;
pub mod surveys;
pub mod team;
pub mod tickets;
