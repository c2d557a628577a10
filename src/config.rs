//! Process configuration, read once from the environment at startup.
//!
//! Runtime-tunable knobs (SLA hours, scheduler interval, notification
//! recipients) live in the `settings` table instead; see [`crate::settings`].

use std::path::PathBuf;

use secrecy::SecretString;

use crate::llm::{LlmBackend, LlmConfig};

/// IMAP mailbox the poller reads from.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
}

impl ImapConfig {
    /// Returns `None` when `IMAP_HOST` is unset (ingest disabled).
    pub fn from_env() -> Option<Self> {
        let host = env_nonempty("IMAP_HOST")?;
        Some(Self {
            host,
            port: env_parse("IMAP_PORT", 993),
            username: std::env::var("IMAP_USERNAME").unwrap_or_default(),
            password: SecretString::from(std::env::var("IMAP_PASSWORD").unwrap_or_default()),
            folder: env_nonempty("IMAP_FOLDER").unwrap_or_else(|| "INBOX".to_string()),
        })
    }
}

/// Outbound SMTP relay.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `None` when `SMTP_HOST` is unset (sending disabled).
    pub fn from_env() -> Option<Self> {
        let host = env_nonempty("SMTP_HOST")?;
        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let from_address = env_nonempty("SMTP_FROM_EMAIL").unwrap_or_else(|| username.clone());
        Some(Self {
            host,
            port: env_parse("SMTP_PORT", 587),
            username,
            password: SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default()),
            from_address,
        })
    }

    /// Domain used when minting outbound Message-IDs.
    pub fn message_id_domain(&self) -> &str {
        self.from_address
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|d| !d.is_empty())
            .unwrap_or("support-desk.local")
    }
}

/// Top-level desk configuration.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub db_path: PathBuf,
    pub http_port: u16,
    pub imap: Option<ImapConfig>,
    pub smtp: Option<SmtpConfig>,
    pub llm: Option<LlmConfig>,
    /// Start the poll loop at boot. Overridden by the `scheduler_enabled` setting.
    pub scheduler_enabled: bool,
    pub poll_interval_minutes: u64,
    pub log_dir: Option<PathBuf>,
}

impl DeskConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: env_nonempty("DESK_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("support_desk.db")),
            http_port: env_parse("DESK_HTTP_PORT", 8080),
            imap: ImapConfig::from_env(),
            smtp: SmtpConfig::from_env(),
            llm: llm_config_from_env(),
            scheduler_enabled: env_parse("DESK_SCHEDULER_ENABLED", false),
            poll_interval_minutes: env_parse("DESK_POLL_INTERVAL_MINUTES", 5),
            log_dir: env_nonempty("DESK_LOG_DIR").map(PathBuf::from),
        }
    }
}

/// Build the AI provider config. `None` when the selected backend has no key.
fn llm_config_from_env() -> Option<LlmConfig> {
    let backend = match std::env::var("DESK_LLM_BACKEND")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "anthropic" => LlmBackend::Anthropic,
        _ => LlmBackend::OpenAi,
    };
    let key_var = match backend {
        LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        LlmBackend::OpenAi => "OPENAI_API_KEY",
    };
    let api_key = env_nonempty(key_var)?;
    Some(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model: env_nonempty("DESK_LLM_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
        base_url: env_nonempty("DESK_LLM_BASE_URL"),
    })
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
