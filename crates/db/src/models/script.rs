//! Script entity model and DTOs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tempo_core::types::{DbId, Timestamp};
use tempo_core::validation::parse_environment_json;

/// A user script in the catalog.
///
/// Includes the joined `folder_name` from the `folders` table so the
/// environment manager can build the on-disk path without a second
/// lookup.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Script {
    pub id: DbId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub content: String,
    pub folder_id: Option<DbId>,
    /// Joined from `folders.name`; NULL for root-level scripts.
    pub folder_name: Option<String>,
    pub python_version: String,
    pub requirements: String,
    /// Validated JSON object mapping env-var names to values.
    pub environment_json: String,
    pub enabled: bool,
    pub run_total: i64,
    pub run_success: i64,
    pub last_run_at: Option<Timestamp>,
    pub timeout_secs: Option<i64>,
    pub email_on_completion: bool,
    pub email_recipients: String,
    pub email_trigger: String,
    pub auto_save: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Script {
    /// The script's environment overlay as a typed mapping.
    ///
    /// A corrupt blob yields an empty overlay rather than failing the
    /// run; the blob was validated on write, so this is defensive only
    /// against manual database edits.
    pub fn environment(&self) -> BTreeMap<String, String> {
        parse_environment_json(&self.environment_json)
    }

    /// Comma-separated recipient list as a vector.
    pub fn recipients(&self) -> Vec<String> {
        self.email_recipients
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// DTO for creating a script. The slug is derived server-side.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScript {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    pub folder_id: Option<DbId>,
    #[serde(default = "default_python_version")]
    pub python_version: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub email_on_completion: bool,
    #[serde(default)]
    pub email_recipients: String,
    #[serde(default = "default_email_trigger")]
    pub email_trigger: String,
    #[serde(default = "default_true")]
    pub auto_save: bool,
    pub timeout_secs: Option<i64>,
}

fn default_python_version() -> String {
    "3.12".to_string()
}

fn default_email_trigger() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

/// DTO for updating a script. Only non-`None` fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateScript {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub folder_id: Option<DbId>,
    pub python_version: Option<String>,
    pub requirements: Option<String>,
    pub environment: Option<BTreeMap<String, String>>,
    pub enabled: Option<bool>,
    pub email_on_completion: Option<bool>,
    pub email_recipients: Option<String>,
    pub email_trigger: Option<String>,
    pub auto_save: Option<bool>,
    pub timeout_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn script_with(environment_json: &str, recipients: &str) -> Script {
        Script {
            id: 1,
            name: "Demo".into(),
            slug: "demo".into(),
            description: String::new(),
            content: "print()".into(),
            folder_id: None,
            folder_name: None,
            python_version: "3.12".into(),
            requirements: String::new(),
            environment_json: environment_json.into(),
            enabled: true,
            run_total: 0,
            run_success: 0,
            last_run_at: None,
            timeout_secs: None,
            email_on_completion: false,
            email_recipients: recipients.into(),
            email_trigger: "all".into(),
            auto_save: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn environment_parses_valid_blob() {
        let script = script_with(r#"{"API_KEY":"x"}"#, "");
        assert_eq!(script.environment().get("API_KEY").unwrap(), "x");
    }

    #[test]
    fn environment_tolerates_corrupt_blob() {
        let script = script_with("not-json", "");
        assert!(script.environment().is_empty());
    }

    #[test]
    fn recipients_split_and_trimmed() {
        let script = script_with("{}", " a@x.io , b@y.io ,, ");
        assert_eq!(script.recipients(), vec!["a@x.io", "b@y.io"]);
        assert!(script_with("{}", "").recipients().is_empty());
    }
}
