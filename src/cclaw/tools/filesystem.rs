//! File access tools, sandboxed to the workspace.
//!
//! Paths are interpreted relative to the workspace root; absolute paths and
//! `..` components are rejected so the model cannot wander out of its
//! sandbox.  Reads are capped at 512 KiB.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::cclaw::tools::ToolResult;

/// Largest file_read payload handed back to the model.
const READ_CAP: usize = 512 * 1024;

/// Execute the `file_read` tool.
pub fn read(input: &serde_json::Value, workspace: &Path) -> ToolResult {
    let Some(raw_path) = input.get("path").and_then(|p| p.as_str()) else {
        return ToolResult::failure("Error: missing required parameter: path");
    };
    let path = match resolve(raw_path, workspace) {
        Ok(path) => path,
        Err(result) => return result,
    };

    match fs::read(&path) {
        Ok(bytes) => {
            let mut text = String::from_utf8_lossy(&bytes).into_owned();
            if text.len() > READ_CAP {
                let mut end = READ_CAP;
                while end > 0 && !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
                text.push_str("\n[truncated]");
            }
            ToolResult::success(text)
        }
        Err(e) => ToolResult::failure(format!("Error: cannot read {}: {}", raw_path, e)),
    }
}

/// Execute the `file_write` tool.
pub fn write(input: &serde_json::Value, workspace: &Path) -> ToolResult {
    let Some(raw_path) = input.get("path").and_then(|p| p.as_str()) else {
        return ToolResult::failure("Error: missing required parameter: path");
    };
    let Some(content) = input.get("content").and_then(|c| c.as_str()) else {
        return ToolResult::failure("Error: missing required parameter: content");
    };
    let path = match resolve(raw_path, workspace) {
        Ok(path) => path,
        Err(result) => return result,
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return ToolResult::failure(format!("Error: cannot create {}: {}", raw_path, e));
        }
    }
    match fs::write(&path, content) {
        Ok(()) => ToolResult::success(format!("Wrote {} bytes to {}", content.len(), raw_path)),
        Err(e) => ToolResult::failure(format!("Error: cannot write {}: {}", raw_path, e)),
    }
}

/// Join a model-supplied path onto the workspace, refusing escapes.
fn resolve(raw_path: &str, workspace: &Path) -> Result<PathBuf, ToolResult> {
    let relative = Path::new(raw_path);
    if relative.is_absolute() {
        return Err(ToolResult::failure(format!(
            "Error: path escapes workspace: {}",
            raw_path
        )));
    }
    for component in relative.components() {
        if matches!(component, Component::ParentDir) {
            return Err(ToolResult::failure(format!(
                "Error: path escapes workspace: {}",
                raw_path
            )));
        }
    }
    Ok(workspace.join(relative))
}
