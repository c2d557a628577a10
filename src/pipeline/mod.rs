//! Ticket processing pipeline.
//!
//! Mailbox → intake → AI classification → SLA refresh, driven either by the
//! background `Scheduler` or by manual API calls. Both paths go through
//! `Desk`, which serializes mailbox polls.
//!
//! **No auto-reply path exists for AI drafts.** Every draft waits for human
//! approval; only the fixed acknowledgment template is sent unattended.

pub mod classifier;
pub mod desk;
pub mod processor;
pub mod scheduler;

pub use classifier::Classifier;
pub use desk::{CycleReport, Desk, FetchReport};
pub use scheduler::{Scheduler, SchedulerStatus};
