//! Tickets: the domain model, email intake and the approval gate.

pub mod approval;
pub mod intake;
pub mod model;

pub use intake::{IntakeOutcome, resolve_email};
pub use model::{
    ApprovalStatus, Assignee, Category, Classification, Ticket, TicketDetail, TicketFilter,
    TicketMessage, Urgency,
};
