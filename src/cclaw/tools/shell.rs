//! Shell command execution tool.
//!
//! Runs the requested command under `sh -c` with the workspace as working
//! directory, captures stdout and stderr, and reports them behind an
//! `[exit N]` status line.  Output is capped at 128 KiB and commands are
//! killed after 30 seconds.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::cclaw::tools::ToolResult;

/// Combined stdout+stderr cap.
const OUTPUT_CAP: usize = 128 * 1024;

/// Commands still running after this long are killed.
const TIMEOUT: Duration = Duration::from_secs(30);

/// Execute the `shell` tool.
pub async fn run(input: &serde_json::Value, workspace: &Path) -> ToolResult {
    let Some(command) = input.get("command").and_then(|c| c.as_str()) else {
        return ToolResult::failure("Error: missing required parameter: command");
    };

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workspace)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(TIMEOUT, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return ToolResult::failure(format!("Error: failed to spawn command: {}", e));
        }
        Err(_) => {
            return ToolResult::failure(format!(
                "Error: command timed out after {} seconds",
                TIMEOUT.as_secs()
            ));
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if combined.len() > OUTPUT_CAP {
        truncate_on_boundary(&mut combined, OUTPUT_CAP);
    }

    let text = format!("[exit {}]\n{}", exit_code, combined);
    if output.status.success() {
        ToolResult::success(text)
    } else {
        // Non-zero exit is still useful output for the model.
        ToolResult {
            success: false,
            output: text,
        }
    }
}

/// Truncate at `cap` without splitting a UTF-8 sequence.
fn truncate_on_boundary(text: &mut String, cap: usize) {
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_with_exit_prefix() {
        let result = run(&serde_json::json!({"command": "echo hi"}), Path::new("/tmp")).await;
        assert!(result.success);
        assert!(result.output.starts_with("[exit 0]\nhi"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_output() {
        let result = run(
            &serde_json::json!({"command": "echo oops >&2; exit 3"}),
            Path::new("/tmp"),
        )
        .await;
        assert!(!result.success);
        assert!(result.output.starts_with("[exit 3]\n"));
        assert!(result.output.contains("oops"));
    }

    #[tokio::test]
    async fn missing_command_is_reported() {
        let result = run(&serde_json::json!({}), Path::new("/tmp")).await;
        assert!(!result.success);
        assert!(result.output.contains("command"));
    }

    #[tokio::test]
    async fn runs_in_the_workspace_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(&serde_json::json!({"command": "pwd"}), dir.path()).await;
        assert!(result.success);
        let printed = result.output.trim_start_matches("[exit 0]\n").trim();
        assert_eq!(
            std::fs::canonicalize(printed).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let mut text = "ééééé".to_owned(); // 2 bytes per char
        truncate_on_boundary(&mut text, 5);
        assert_eq!(text, "éé");
    }
}
