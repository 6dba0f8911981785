//! Relay command execution
//!
//! Commands are split into an argv once and run directly, without a shell:
//! - placeholders are substituted inside each argument, so a value can never
//!   add arguments of its own
//! - the child is killed when the timeout expires
//! - stdout and stderr are combined into the result for logging

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

pub const UID_PLACEHOLDER: &str = "{uid}";
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// Outcome of one relay command
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u128,
}

/// Splits `template` and fills in the placeholders.
pub fn render_command(template: &str, uid: &str, value: &str) -> Result<Vec<String>> {
    let argv: Vec<String> = shell_words::split(template)
        .with_context(|| format!("cannot split command {template:?}"))?
        .into_iter()
        .map(|arg| arg.replace(UID_PLACEHOLDER, uid).replace(VALUE_PLACEHOLDER, value))
        .collect();
    if argv.is_empty() {
        return Err(anyhow!("command is empty"));
    }
    Ok(argv)
}

/// Runs `argv` with a timeout. Failures to start or finish are reported in
/// the result, not as an error.
pub async fn execute(argv: &[String], timeout: Duration) -> ExecutionResult {
    let start_time = Instant::now();
    debug!(command = ?argv, ?timeout, "executing relay command");

    let result = run_with_timeout(argv, timeout).await;
    let execution_time = start_time.elapsed().as_millis();

    match result {
        Ok((output, exit_code)) => ExecutionResult {
            success: exit_code == 0,
            output,
            error: None,
            exit_code: Some(exit_code),
            execution_time_ms: execution_time,
        },
        Err(e) => ExecutionResult {
            success: false,
            output: String::new(),
            error: Some(format!("{e:#}")),
            exit_code: None,
            execution_time_ms: execution_time,
        },
    }
}

async fn run_with_timeout(argv: &[String], timeout: Duration) -> Result<(String, i32)> {
    let (program, args) = argv.split_first().ok_or_else(|| anyhow!("command is empty"))?;
    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .context("Command timed out")?
    .with_context(|| format!("Failed to execute {program}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined_output = if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{stdout}\nSTDERR:\n{stderr}")
    };

    let exit_code = output.status.code().unwrap_or(-1);
    Ok((combined_output, exit_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_stay_inside_their_argument() {
        let argv = render_command("dimctl --zone '{uid}' --level={value}", "lounge", "0.5; rm -rf /").unwrap();
        assert_eq!(argv, vec!["dimctl", "--zone", "lounge", "--level=0.5; rm -rf /"]);
        assert!(render_command("   ", "a", "1").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let argv = render_command("echo {uid} {value}", "porch", "1").unwrap();
        let result = execute(&argv, Duration::from_secs(5)).await;
        assert!(result.success);
        assert_eq!(result.output, "porch 1\n");
        assert_eq!(result.exit_code, Some(0));

        let result = execute(&["false".to_string()], Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_and_missing_program() {
        let result = execute(&["sleep".to_string(), "5".to_string()], Duration::from_millis(100)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));

        let result = execute(&["/nonexistent/relay-tool".to_string()], Duration::from_secs(1)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to execute"));
    }
}
