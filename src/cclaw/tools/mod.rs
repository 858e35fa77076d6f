//! Built-in tools and the dispatch registry.
//!
//! Tools are the runtime's hands: the model requests an invocation by name
//! with JSON arguments, the registry routes it to a handler, and the handler
//! answers with a [`ToolResult`] whose output is always populated — even on
//! failure the model gets a human-readable error it can react to.
//!
//! # Available tools
//!
//! - **shell** — run a command under `sh -c` in the workspace directory;
//!   stdout and stderr are captured together and prefixed with `[exit N]`.
//! - **file_read** / **file_write** — workspace-relative file access with
//!   path-traversal protection and size caps.
//! - **memory_store** / **memory_get** / **memory_del** — durable key-value
//!   recall backed by [`crate::cclaw::memory::Memory`] (present only when a
//!   memory store is configured).

pub mod filesystem;
pub mod memory;
pub mod shell;

use std::path::PathBuf;
use std::sync::Arc;

use crate::cclaw::memory::Memory;

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Whether the tool completed successfully.
    pub success: bool,
    /// Output text; carries the error description when `success` is false.
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        ToolResult {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            output: output.into(),
        }
    }
}

/// Routes tool invocations to their handlers.
///
/// The name→handler mapping is the `match` in [`ToolRegistry::execute`];
/// unknown names come back as failures so the model can correct itself.
pub struct ToolRegistry {
    workspace: PathBuf,
    memory: Option<Arc<Memory>>,
}

impl ToolRegistry {
    pub fn new(workspace: PathBuf, memory: Option<Arc<Memory>>) -> Self {
        ToolRegistry { workspace, memory }
    }

    /// Tool schemas in Claude-style format (`{name, description,
    /// input_schema}`).  The OpenAI adapter translates when needed.
    pub fn definitions(&self) -> serde_json::Value {
        let mut defs = vec![
            serde_json::json!({
                "name": "shell",
                "description": "Run a shell command in the workspace directory. Returns combined stdout and stderr prefixed with the exit status.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "Command to run with sh -c"}
                    },
                    "required": ["command"]
                }
            }),
            serde_json::json!({
                "name": "file_read",
                "description": "Read a text file from the workspace. Path is relative to the workspace root.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Workspace-relative file path"}
                    },
                    "required": ["path"]
                }
            }),
            serde_json::json!({
                "name": "file_write",
                "description": "Write a text file in the workspace, creating parent directories as needed.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Workspace-relative file path"},
                        "content": {"type": "string", "description": "File contents to write"}
                    },
                    "required": ["path", "content"]
                }
            }),
        ];
        if self.memory.is_some() {
            defs.push(serde_json::json!({
                "name": "memory_store",
                "description": "Persist a value under a key in long-term memory. Re-storing a key replaces its value.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "key": {"type": "string"},
                        "value": {"type": "string"}
                    },
                    "required": ["key", "value"]
                }
            }));
            defs.push(serde_json::json!({
                "name": "memory_get",
                "description": "Look up a value by key in long-term memory.",
                "input_schema": {
                    "type": "object",
                    "properties": {"key": {"type": "string"}},
                    "required": ["key"]
                }
            }));
            defs.push(serde_json::json!({
                "name": "memory_del",
                "description": "Delete a key from long-term memory.",
                "input_schema": {
                    "type": "object",
                    "properties": {"key": {"type": "string"}},
                    "required": ["key"]
                }
            }));
        }
        serde_json::Value::Array(defs)
    }

    /// Execute one invocation.  `input_json` is the raw arguments text from
    /// the provider; malformed JSON is a recoverable failure.
    pub async fn execute(&self, name: &str, input_json: &str) -> ToolResult {
        let input: serde_json::Value = match serde_json::from_str(input_json) {
            Ok(input) => input,
            Err(e) => {
                return ToolResult::failure(format!("Error: invalid tool arguments: {}", e));
            }
        };

        match name {
            "shell" => shell::run(&input, &self.workspace).await,
            "file_read" => filesystem::read(&input, &self.workspace),
            "file_write" => filesystem::write(&input, &self.workspace),
            "memory_store" | "memory_get" | "memory_del" => match &self.memory {
                Some(store) => memory::run(name, &input, store),
                None => ToolResult::failure("Error: memory store is not configured"),
            },
            _ => ToolResult::failure(format!("Unknown tool: {}", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new(std::env::temp_dir(), None);
        let result = registry.execute("teleport", "{}").await;
        assert!(!result.success);
        assert_eq!(result.output, "Unknown tool: teleport");
    }

    #[tokio::test]
    async fn malformed_arguments_are_recoverable() {
        let registry = ToolRegistry::new(std::env::temp_dir(), None);
        let result = registry.execute("shell", "{oops").await;
        assert!(!result.success);
        assert!(result.output.starts_with("Error: invalid tool arguments"));
    }

    #[test]
    fn definitions_track_memory_configuration() {
        let without = ToolRegistry::new(std::env::temp_dir(), None);
        assert_eq!(without.definitions().as_array().unwrap().len(), 3);

        let with = ToolRegistry::new(
            std::env::temp_dir(),
            Some(Arc::new(Memory::open_in_memory().unwrap())),
        );
        let names: Vec<String> = with
            .definitions()
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(
            names,
            ["shell", "file_read", "file_write", "memory_store", "memory_get", "memory_del"]
        );
    }
}
