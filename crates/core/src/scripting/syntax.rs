//! Interpreter-delegated source validation.
//!
//! Source must parse in the target interpreter's grammar before it is
//! stored. Rather than reimplementing a Python parser, the check pipes
//! the source through `python3`'s own `ast.parse`. Hosts without an
//! interpreter on PATH degrade to accepting any non-empty source; the
//! run itself will surface the syntax error.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How long the parse check may take before it is abandoned.
const SYNTAX_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxCheck {
    /// The interpreter parsed the source.
    Valid,
    /// The interpreter rejected the source; the message is its stderr.
    Invalid(String),
    /// No interpreter was available; the check did not run.
    Skipped,
}

/// Validate Python source by piping it through `ast.parse`.
///
/// Empty (or whitespace-only) content is always invalid.
pub async fn check_python_syntax(content: &str) -> SyntaxCheck {
    if content.trim().is_empty() {
        return SyntaxCheck::Invalid("Script content cannot be empty".into());
    }

    let spawned = Command::new("python3")
        .args(["-c", "import ast, sys; ast.parse(sys.stdin.read())"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(error = %e, "python3 unavailable, skipping syntax validation");
            return SyntaxCheck::Skipped;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        // A child that exits early closes the pipe; that surfaces via
        // the exit status, not this write.
        let _ = stdin.write_all(content.as_bytes()).await;
    }

    match tokio::time::timeout(SYNTAX_CHECK_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => SyntaxCheck::Valid,
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // The last line of a SyntaxError traceback carries the message.
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("invalid syntax")
                .to_string();
            SyntaxCheck::Invalid(format!("Invalid Python syntax: {message}"))
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "syntax check failed to run, skipping");
            SyntaxCheck::Skipped
        }
        Err(_) => {
            tracing::warn!("syntax check timed out, skipping");
            SyntaxCheck::Skipped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_source_is_always_invalid() {
        assert!(matches!(
            check_python_syntax("").await,
            SyntaxCheck::Invalid(_)
        ));
        assert!(matches!(
            check_python_syntax("   \n\t").await,
            SyntaxCheck::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn valid_source_passes_or_skips() {
        // Valid code must never be reported invalid, whether or not an
        // interpreter is installed on the test host.
        let result = check_python_syntax("print(\"hello\")\n").await;
        assert!(
            matches!(result, SyntaxCheck::Valid | SyntaxCheck::Skipped),
            "valid source rejected: {result:?}"
        );
    }

    #[tokio::test]
    async fn broken_source_never_validates() {
        let result = check_python_syntax("def broken(:\n").await;
        assert!(
            !matches!(result, SyntaxCheck::Valid),
            "broken source accepted"
        );
    }
}
