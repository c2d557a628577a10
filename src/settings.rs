//! Typed view over the runtime `settings` table.
//!
//! Values are stored as strings. Anything missing or unparseable falls back
//! to the default, so a bad write through the API never wedges the desk.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::store::Database;
use crate::tickets::model::Urgency;

pub mod keys {
    pub const SLA_HOURS_HIGH: &str = "sla_hours_high";
    pub const SLA_HOURS_MEDIUM: &str = "sla_hours_medium";
    pub const SLA_HOURS_LOW: &str = "sla_hours_low";
    pub const SCHEDULER_ENABLED: &str = "scheduler_enabled";
    pub const SCHEDULER_INTERVAL_MINUTES: &str = "scheduler_interval_minutes";
    pub const NOTIFY_ENABLED: &str = "email_notify_enabled";
    pub const NOTIFY_URGENT_ONLY: &str = "email_notify_urgent_only";
    pub const NOTIFY_RECIPIENTS: &str = "email_notify_recipients";
    pub const AUTO_RESPONDER_ENABLED: &str = "auto_responder_enabled";
    pub const AUTO_RESPONDER_TEMPLATE: &str = "auto_responder_template";
}

pub const DEFAULT_AUTO_RESPONDER_TEMPLATE: &str = "Dear Customer,

Thank you for contacting our support team. We have received your message and a member of our team will review it shortly.

Your Ticket Reference: #{ticket_id}
Subject: {subject}

Please keep this reference number for your records. You do not need to reply to this email.

Kind regards,
Customer Support";

/// Hours from receipt to SLA deadline, per urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaHours {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl Default for SlaHours {
    fn default() -> Self {
        Self {
            high: 4,
            medium: 8,
            low: 24,
        }
    }
}

impl SlaHours {
    pub fn for_urgency(&self, urgency: Urgency) -> i64 {
        match urgency {
            Urgency::High => self.high,
            Urgency::Medium => self.medium,
            Urgency::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifySettings {
    pub enabled: bool,
    pub urgent_only: bool,
    /// `all`, `none`, or a comma-separated address list.
    pub recipients: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            urgent_only: true,
            recipients: "all".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoResponderSettings {
    pub enabled: bool,
    pub template: String,
}

impl Default for AutoResponderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            template: DEFAULT_AUTO_RESPONDER_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeskSettings {
    pub sla_hours: SlaHours,
    /// `None` defers to the environment.
    pub scheduler_enabled: Option<bool>,
    pub scheduler_interval_minutes: Option<u64>,
    pub notify: NotifySettings,
    pub auto_responder: AutoResponderSettings,
}

impl DeskSettings {
    pub async fn load(db: &dyn Database) -> Result<Self, DatabaseError> {
        Ok(Self::from_map(&db.all_settings().await?))
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let defaults = SlaHours::default();
        let hours = |key: &str, default: i64| {
            parse::<i64>(map, key)
                .filter(|h| *h > 0)
                .unwrap_or(default)
        };
        Self {
            sla_hours: SlaHours {
                high: hours(keys::SLA_HOURS_HIGH, defaults.high),
                medium: hours(keys::SLA_HOURS_MEDIUM, defaults.medium),
                low: hours(keys::SLA_HOURS_LOW, defaults.low),
            },
            scheduler_enabled: parse_bool(map, keys::SCHEDULER_ENABLED),
            scheduler_interval_minutes: parse(map, keys::SCHEDULER_INTERVAL_MINUTES),
            notify: NotifySettings {
                enabled: parse_bool(map, keys::NOTIFY_ENABLED).unwrap_or(false),
                urgent_only: parse_bool(map, keys::NOTIFY_URGENT_ONLY).unwrap_or(true),
                recipients: map
                    .get(keys::NOTIFY_RECIPIENTS)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "all".to_string()),
            },
            auto_responder: AutoResponderSettings {
                enabled: parse_bool(map, keys::AUTO_RESPONDER_ENABLED).unwrap_or(false),
                template: map
                    .get(keys::AUTO_RESPONDER_TEMPLATE)
                    .filter(|s| !s.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_AUTO_RESPONDER_TEMPLATE.to_string()),
            },
        }
    }
}

/// Read the SLA hours, applying defaults.
pub async fn sla_hours(db: &dyn Database) -> Result<SlaHours, DatabaseError> {
    Ok(DeskSettings::load(db).await?.sla_hours)
}

/// Persist SLA hours. Non-positive values are not written.
pub async fn save_sla_hours(db: &dyn Database, hours: SlaHours) -> Result<SlaHours, DatabaseError> {
    for (key, value) in [
        (keys::SLA_HOURS_HIGH, hours.high),
        (keys::SLA_HOURS_MEDIUM, hours.medium),
        (keys::SLA_HOURS_LOW, hours.low),
    ] {
        if value > 0 {
            db.set_setting(key, &value.to_string()).await?;
        }
    }
    sla_hours(db).await
}

fn parse<T: FromStr>(map: &HashMap<String, String>, key: &str) -> Option<T> {
    map.get(key).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(map: &HashMap<String, String>, key: &str) -> Option<bool> {
    match map.get(key)?.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_table_gives_defaults() {
        let s = DeskSettings::from_map(&HashMap::new());
        assert_eq!(s.sla_hours, SlaHours::default());
        assert!(!s.notify.enabled);
        assert!(s.notify.urgent_only);
        assert_eq!(s.notify.recipients, "all");
        assert!(!s.auto_responder.enabled);
        assert!(s.auto_responder.template.contains("{ticket_id}"));
        assert_eq!(s.scheduler_enabled, None);
    }

    #[test]
    fn invalid_values_fall_back() {
        let s = DeskSettings::from_map(&map(&[
            (keys::SLA_HOURS_HIGH, "soon"),
            (keys::SLA_HOURS_LOW, "-3"),
            (keys::SLA_HOURS_MEDIUM, "12"),
            (keys::NOTIFY_ENABLED, "maybe"),
            (keys::SCHEDULER_INTERVAL_MINUTES, "ten"),
        ]));
        assert_eq!(s.sla_hours.high, 4);
        assert_eq!(s.sla_hours.medium, 12);
        assert_eq!(s.sla_hours.low, 24);
        assert!(!s.notify.enabled);
        assert_eq!(s.scheduler_interval_minutes, None);
    }

    #[test]
    fn booleans_accept_common_spellings() {
        let s = DeskSettings::from_map(&map(&[
            (keys::NOTIFY_ENABLED, "TRUE"),
            (keys::NOTIFY_URGENT_ONLY, "0"),
            (keys::AUTO_RESPONDER_ENABLED, "on"),
            (keys::SCHEDULER_ENABLED, "false"),
        ]));
        assert!(s.notify.enabled);
        assert!(!s.notify.urgent_only);
        assert!(s.auto_responder.enabled);
        assert_eq!(s.scheduler_enabled, Some(false));
    }

    #[test]
    fn hours_by_urgency() {
        let h = SlaHours::default();
        assert_eq!(h.for_urgency(Urgency::High), 4);
        assert_eq!(h.for_urgency(Urgency::Medium), 8);
        assert_eq!(h.for_urgency(Urgency::Low), 24);
    }

    #[tokio::test]
    async fn save_sla_hours_skips_non_positive() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let saved = save_sla_hours(
            &db,
            SlaHours {
                high: 2,
                medium: 0,
                low: 48,
            },
        )
        .await
        .unwrap();
        assert_eq!(saved, SlaHours { high: 2, medium: 8, low: 48 });
        assert_eq!(
            db.get_setting(keys::SLA_HOURS_MEDIUM).await.unwrap(),
            None
        );
    }
}
