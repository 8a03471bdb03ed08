//! Write-boundary validation for script inputs.
//!
//! All of these run before anything touches the store or the filesystem,
//! so a malformed payload never produces a partially-created script.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Interpreter versions a script may request.
pub const SUPPORTED_PYTHON_VERSIONS: &[&str] = &["3.8", "3.9", "3.10", "3.11", "3.12"];

/// Environment variable names follow the POSIX shell convention.
static ENV_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("static regex"));

/// Leading package-name token of a requirements line.
static PACKAGE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-_\.]*$").expect("static regex"));

/// Validate a script display name (1..=100 chars after trimming).
pub fn validate_script_name(name: &str) -> Result<(), CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Script name cannot be empty".into()));
    }
    if trimmed.chars().count() > 100 {
        return Err(CoreError::Validation(
            "Script name must be at most 100 characters".into(),
        ));
    }
    Ok(())
}

/// Validate that the requested interpreter version is supported.
pub fn validate_python_version(version: &str) -> Result<(), CoreError> {
    if SUPPORTED_PYTHON_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unsupported Python version {version:?} (supported: {})",
            SUPPORTED_PYTHON_VERSIONS.join(", ")
        )))
    }
}

/// Validate the line shape of a pip requirements manifest.
///
/// Blank lines and `#` comments are ignored. Every other line must start
/// with a well-formed package name; version specifiers after `==`, `>=`,
/// `<=`, or `~=` are not themselves validated.
pub fn validate_requirements(requirements: &str) -> Result<(), CoreError> {
    for line in requirements.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let package = line
            .split("==")
            .next()
            .and_then(|s| s.split(">=").next())
            .and_then(|s| s.split("<=").next())
            .and_then(|s| s.split("~=").next())
            .unwrap_or(line)
            .trim();

        if !PACKAGE_NAME_RE.is_match(package) {
            return Err(CoreError::Validation(format!(
                "Invalid package name in requirements: {line}"
            )));
        }
    }
    Ok(())
}

/// Validate a script's environment variable mapping.
///
/// Keys must match `^[A-Z_][A-Z0-9_]*$`; values are arbitrary strings.
pub fn validate_environment(environment: &BTreeMap<String, String>) -> Result<(), CoreError> {
    for key in environment.keys() {
        if !ENV_KEY_RE.is_match(key) {
            return Err(CoreError::Validation(format!(
                "Invalid environment variable name: {key}"
            )));
        }
    }
    Ok(())
}

/// Parse a stored environment JSON blob into a mapping.
///
/// Uses a strict JSON parser only. A malformed blob yields an empty
/// mapping so a corrupt row can never break execution; callers surface
/// the problem to the script owner separately.
pub fn parse_environment_json(raw: &str) -> BTreeMap<String, String> {
    if raw.trim().is_empty() {
        return BTreeMap::new();
    }
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_name_bounds() {
        assert!(validate_script_name("Hello").is_ok());
        assert!(validate_script_name("").is_err());
        assert!(validate_script_name("   ").is_err());
        assert!(validate_script_name(&"x".repeat(100)).is_ok());
        assert!(validate_script_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn python_version_membership() {
        assert!(validate_python_version("3.12").is_ok());
        assert!(validate_python_version("3.8").is_ok());
        assert!(validate_python_version("3.7").is_err());
        assert!(validate_python_version("2.7").is_err());
        assert!(validate_python_version("three").is_err());
    }

    #[test]
    fn requirements_accepts_common_forms() {
        let manifest = "\
# data stack
numpy==1.26.0
pandas>=2.0
requests~=2.31
flask

simple_pkg.extra-name
";
        assert!(validate_requirements(manifest).is_ok());
    }

    #[test]
    fn requirements_rejects_bad_package_names() {
        assert!(validate_requirements("-leading-dash").is_err());
        assert!(validate_requirements("has space==1.0").is_err());
        assert!(validate_requirements("ok==1.0\n$(rm -rf /)").is_err());
    }

    #[test]
    fn empty_requirements_is_fine() {
        assert!(validate_requirements("").is_ok());
        assert!(validate_requirements("\n\n# only comments\n").is_ok());
    }

    #[test]
    fn env_keys_enforced() {
        let mut env = BTreeMap::new();
        env.insert("API_KEY".into(), "secret".into());
        env.insert("_PRIVATE".into(), "x".into());
        env.insert("RETRY_COUNT_2".into(), "3".into());
        assert!(validate_environment(&env).is_ok());

        for bad in ["lowercase", "1LEADING", "WITH-DASH", "WITH SPACE", ""] {
            let mut env = BTreeMap::new();
            env.insert(bad.to_string(), "v".to_string());
            assert!(validate_environment(&env).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn environment_json_round_trip() {
        let parsed = parse_environment_json(r#"{"A":"1","B_VAR":"two"}"#);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("A").map(String::as_str), Some("1"));
    }

    #[test]
    fn malformed_environment_json_yields_empty_mapping() {
        assert!(parse_environment_json("not json").is_empty());
        assert!(parse_environment_json("[1,2]").is_empty());
        assert!(parse_environment_json("").is_empty());
        assert!(parse_environment_json("{}").is_empty());
    }
}
