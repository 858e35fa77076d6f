//! Long-term memory tools.
//!
//! Thin wrappers over [`Memory`]: the model stores and recalls plain
//! key-value pairs.  Embedding-based search stays a library concern; the
//! tool surface is deliberately key-exact.

use crate::cclaw::memory::Memory;
use crate::cclaw::tools::ToolResult;

/// Execute one of the `memory_*` tools.
pub fn run(name: &str, input: &serde_json::Value, store: &Memory) -> ToolResult {
    let Some(key) = input.get("key").and_then(|k| k.as_str()) else {
        return ToolResult::failure("Error: missing required parameter: key");
    };

    match name {
        "memory_store" => {
            let Some(value) = input.get("value").and_then(|v| v.as_str()) else {
                return ToolResult::failure("Error: missing required parameter: value");
            };
            if store.store(key, value, None) {
                ToolResult::success(format!("Stored {}", key))
            } else {
                ToolResult::failure(format!("Error: failed to store {}", key))
            }
        }
        "memory_get" => match store.get(key) {
            Some(value) => ToolResult::success(value),
            None => ToolResult::failure(format!("Error: no memory for key: {}", key)),
        },
        "memory_del" => {
            if store.delete(key) {
                ToolResult::success(format!("Deleted {}", key))
            } else {
                ToolResult::failure(format!("Error: no memory for key: {}", key))
            }
        }
        _ => ToolResult::failure(format!("Unknown tool: {}", name)),
    }
}
