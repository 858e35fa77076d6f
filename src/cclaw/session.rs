//! Per-peer conversation state.
//!
//! A [`Session`] is an ordered, append-only sequence of [`Message`]s keyed by
//! a channel-prefixed session key (`cli`, `tg_<chat>`, `ws_<conn>`).  Message
//! content is a list of typed [`ContentBlock`]s in the Claude wire schema, so
//! the serialized array can be handed to the Anthropic adapter unchanged and
//! translated by the OpenAI adapter.
//!
//! Sessions persist as JSON under `{workspace}/.cclaw/sessions/{key}.json`
//! and are rehydrated on open; a missing or corrupt file simply starts the
//! session empty.  Saves go through a sibling temp file plus rename so a
//! crash mid-write can never leave a half-written history behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Author of a message.  Tool results ride in `user` messages per the
/// provider wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One typed element of a message's content array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Assistant-only: a tool invocation the model requested.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// User-only: the output of a previously requested tool invocation.
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// An entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// Append-only conversation log with optional disk persistence.
pub struct Session {
    key: String,
    path: Option<PathBuf>,
    messages: Vec<Message>,
}

impl Session {
    /// Open the session for `key`, rehydrating from
    /// `{workspace}/.cclaw/sessions/{key}.json` when the file exists and
    /// parses.  Anything else starts empty; open never fails.
    pub fn open(workspace: &Path, key: &str) -> Session {
        let path = workspace
            .join(".cclaw")
            .join("sessions")
            .join(format!("{}.json", key));
        let messages = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<Message>>(&contents) {
                Ok(messages) => messages,
                Err(e) => {
                    log::warn!("session {}: ignoring corrupt history: {}", key, e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Session {
            key: key.to_owned(),
            path: Some(path),
            messages,
        }
    }

    /// Create a session that lives only in memory (one-shot mode).
    pub fn ephemeral(key: &str) -> Session {
        Session {
            key: key.to_owned(),
            path: None,
            messages: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append a user message with a single text block.
    pub fn add_user(&mut self, text: &str) {
        self.messages.push(Message {
            role: Role::User,
            content: vec![ContentBlock::Text {
                text: text.to_owned(),
            }],
        });
    }

    /// Append an assistant message with a single text block.
    pub fn add_assistant(&mut self, text: &str) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: vec![ContentBlock::Text {
                text: text.to_owned(),
            }],
        });
    }

    /// Record a tool invocation requested by the assistant.
    ///
    /// Appends to the trailing assistant message when there is one, so that a
    /// multi-tool response stays a single message; otherwise starts a new
    /// assistant message.  Unparsable input degrades to `{}` — the block is
    /// never dropped, because the matching tool result must reference it.
    pub fn add_tool_use(&mut self, id: &str, name: &str, input_json: &str) {
        let input = serde_json::from_str(input_json)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        let block = ContentBlock::ToolUse {
            id: id.to_owned(),
            name: name.to_owned(),
            input,
        };
        match self.messages.last_mut() {
            Some(message) if message.role == Role::Assistant => {
                message.content.push(block);
            }
            _ => self.messages.push(Message {
                role: Role::Assistant,
                content: vec![block],
            }),
        }
    }

    /// Record the output of a tool invocation as a user message.
    pub fn add_tool_result(&mut self, tool_use_id: &str, output: &str) {
        self.messages.push(Message {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.to_owned(),
                content: output.to_owned(),
            }],
        });
    }

    /// JSON array encoding of the history, ready for a provider request.
    pub fn serialize_messages(&self) -> String {
        serde_json::to_string(&self.messages).unwrap_or_else(|_| "[]".to_owned())
    }

    /// Persist the history.  Ephemeral sessions are a no-op; storage errors
    /// are logged and swallowed so a full disk never breaks a conversation.
    pub fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.save_to(path) {
            log::error!("session {}: save failed: {}", self.key, e);
        }
    }

    fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = self.serialize_messages();
        // Write-then-rename keeps the previous history intact on a crash.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, path)
    }

    /// Release in-memory state.  The on-disk file, if any, stays behind for
    /// the next open.
    pub fn close(self) {}
}
