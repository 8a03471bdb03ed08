//! Trigger entity model, kinds, and kind-tagged configuration.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tempo_core::error::CoreError;
use tempo_core::types::{DbId, Timestamp};

/// The four trigger kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Cron,
    Interval,
    Manual,
    Startup,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::Manual => "manual",
            Self::Startup => "startup",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "cron" => Ok(Self::Cron),
            "interval" => Ok(Self::Interval),
            "manual" => Ok(Self::Manual),
            "startup" => Ok(Self::Startup),
            other => Err(CoreError::Validation(format!(
                "Unknown trigger kind {other:?}"
            ))),
        }
    }
}

/// Kind-tagged trigger configuration, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerConfig {
    /// A five-field cron expression evaluated in an IANA timezone.
    Cron { expression: String, timezone: String },
    /// A fixed cadence in whole seconds (>= 1).
    Interval { seconds: i64 },
    /// Fired only by explicit user action.
    Manual,
    /// Fired once when the platform boots.
    Startup,
}

/// A scheduling policy attached to a script.
///
/// The scheduler owns `last_fired_at` and `next_fire_at`; everything
/// else is written by the HTTP surface.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Trigger {
    pub id: DbId,
    pub script_id: DbId,
    pub kind: String,
    pub config_json: String,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub last_fired_at: Option<Timestamp>,
    pub next_fire_at: Option<Timestamp>,
}

impl Trigger {
    /// Parse the kind + config blob into a typed configuration.
    pub fn config(&self) -> Result<TriggerConfig, CoreError> {
        parse_config(&self.kind, &self.config_json)
    }
}

/// Validate and type a trigger's kind + raw JSON config.
pub fn parse_config(kind: &str, config_json: &str) -> Result<TriggerConfig, CoreError> {
    let raw: serde_json::Value = serde_json::from_str(config_json)
        .map_err(|e| CoreError::Validation(format!("Trigger config is not valid JSON: {e}")))?;

    match TriggerKind::parse(kind)? {
        TriggerKind::Cron => {
            let expression = raw
                .get("expression")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    CoreError::Validation("Cron trigger requires 'expression' in config".into())
                })?
                .to_string();
            let timezone = raw
                .get("timezone")
                .and_then(|v| v.as_str())
                .unwrap_or("UTC")
                .to_string();
            Ok(TriggerConfig::Cron {
                expression,
                timezone,
            })
        }
        TriggerKind::Interval => {
            let seconds = raw
                .get("seconds")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| {
                    CoreError::Validation("Interval trigger requires 'seconds' in config".into())
                })?;
            if seconds < 1 {
                return Err(CoreError::Validation(
                    "Interval seconds must be a positive integer".into(),
                ));
            }
            Ok(TriggerConfig::Interval { seconds })
        }
        TriggerKind::Manual => Ok(TriggerConfig::Manual),
        TriggerKind::Startup => Ok(TriggerConfig::Startup),
    }
}

/// DTO for creating or replacing a trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTrigger {
    pub script_id: DbId,
    pub kind: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        for kind in ["cron", "interval", "manual", "startup"] {
            assert_eq!(TriggerKind::parse(kind).unwrap().as_str(), kind);
        }
        assert!(TriggerKind::parse("hourly").is_err());
    }

    #[test]
    fn cron_config_requires_expression() {
        let parsed = parse_config("cron", r#"{"expression":"*/5 * * * *"}"#).unwrap();
        assert_eq!(
            parsed,
            TriggerConfig::Cron {
                expression: "*/5 * * * *".into(),
                timezone: "UTC".into()
            }
        );
        assert!(parse_config("cron", "{}").is_err());
    }

    #[test]
    fn cron_config_carries_timezone() {
        let parsed = parse_config(
            "cron",
            r#"{"expression":"0 2 * * *","timezone":"America/New_York"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            TriggerConfig::Cron {
                expression: "0 2 * * *".into(),
                timezone: "America/New_York".into()
            }
        );
    }

    #[test]
    fn interval_config_requires_positive_seconds() {
        assert_eq!(
            parse_config("interval", r#"{"seconds":2}"#).unwrap(),
            TriggerConfig::Interval { seconds: 2 }
        );
        assert!(parse_config("interval", r#"{"seconds":0}"#).is_err());
        assert!(parse_config("interval", r#"{"seconds":-5}"#).is_err());
        assert!(parse_config("interval", "{}").is_err());
    }

    #[test]
    fn manual_and_startup_take_empty_config() {
        assert_eq!(parse_config("manual", "{}").unwrap(), TriggerConfig::Manual);
        assert_eq!(
            parse_config("startup", "{}").unwrap(),
            TriggerConfig::Startup
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(parse_config("manual", "not json").is_err());
    }
}
