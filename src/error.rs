//! Error types for the support desk.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ticket error: {0}")]
    Ticket(#[from] TicketError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Inbound (IMAP) and outbound (SMTP) mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },

    #[error("IMAP connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("IMAP authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send to {to} failed: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Unparseable message: {0}")]
    Parse(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("No API key configured for provider {provider}")]
    NotConfigured { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Workflow violations on tickets, team members and surveys.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Ticket {id} not found")]
    NotFound { id: i64 },

    #[error("Ticket {id} must be approved before sending (status is {status})")]
    NotApproved { id: i64, status: String },

    #[error("Ticket {id} has no draft response to send")]
    MissingDraft { id: i64 },

    #[error("Ticket {id} was already answered; waiting for the customer")]
    AlreadySent { id: i64 },

    #[error("Ticket {id} has no incoming message to classify")]
    NoIncomingMessage { id: i64 },

    #[error("Team member {id} not found")]
    MemberNotFound { id: i64 },

    #[error("A team member with email {email} already exists")]
    DuplicateMember { email: String },

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Survey not found")]
    SurveyNotFound,

    #[error("Survey already completed")]
    SurveyCompleted,

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
