//! Shared primitives for provider-agnostic chat clients.
//!
//! The runtime talks to exactly one model provider per process, selected at
//! startup and addressed through the [`ProviderClient`] trait.  The trait
//! abstracts over concrete vendor implementations while the supporting
//! structs describe the unified response shape the agent loop consumes.
//!
//! Two implementations live in [`crate::cclaw::providers`]: the Anthropic
//! Messages API and the OpenAI Chat Completions API.  Both fold every
//! failure — transport, malformed JSON, provider error objects — into a
//! synthetic text [`ChatResponse`], so the agent loop never sees an `Err`
//! and channels always have something to say.
//!
//! # Example
//!
//! ```rust,no_run
//! use cclaw::cclaw::http_client::HttpClient;
//! use cclaw::cclaw::provider::{ChatRequest, ProviderClient};
//! use cclaw::cclaw::providers::anthropic::AnthropicClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = AnthropicClient::new(HttpClient::new(), "sk-ant-...".into());
//!     let response = client
//!         .chat(&ChatRequest {
//!             model: "claude-sonnet-4-5",
//!             system: "You are a terse assistant.",
//!             messages_json: r#"[{"role":"user","content":[{"type":"text","text":"hi"}]}]"#,
//!             tools: &serde_json::Value::Array(vec![]),
//!             temperature: 0.7,
//!         })
//!         .await;
//!     println!("{}", response.text);
//! }
//! ```

use async_trait::async_trait;

use crate::cclaw::http_client::StreamControl;

/// Completion ceiling sent with every request.
pub const MAX_COMPLETION_TOKENS: u32 = 8192;

/// Reply text used when the provider could not be reached at all.
pub const NO_RESPONSE_TEXT: &str = "no response from provider";

/// One tool invocation requested by the model.
///
/// `input` is kept as the raw JSON text the provider produced.  During
/// streaming the providers emit it fragmented; the fragments are concatenated
/// verbatim here and only parsed at tool-dispatch time.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the matching tool result.
    pub id: String,
    /// Tool name matching one of the definitions sent with the request.
    pub name: String,
    /// Raw JSON arguments text.
    pub input: String,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The turn is complete; the text is the final reply.
    EndTurn,
    /// The model wants tool results before continuing.
    ToolUse,
    /// Any other provider-specific reason, passed through.
    Other(String),
}

/// Provider-unified chat result.
///
/// Invariant: `text` is non-empty or `tool_calls` is non-empty (or both).
/// Both adapters uphold this by synthesizing error text whenever a response
/// carries neither.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant text, possibly empty when the model only called tools.
    pub text: String,
    /// Tool invocations, in the order the provider emitted them.
    pub tool_calls: Vec<ToolCall>,
    /// Termination signal for this round.
    pub stop_reason: StopReason,
    /// Prompt tokens billed by the provider, when reported.
    pub input_tokens: u64,
    /// Completion tokens billed by the provider, when reported.
    pub output_tokens: u64,
}

impl ChatResponse {
    /// Build a synthetic text-only response, used for every failure path.
    pub fn synthetic(text: impl Into<String>) -> Self {
        ChatResponse {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Number of tool calls in this response.
    pub fn num_tools(&self) -> usize {
        self.tool_calls.len()
    }
}

/// Everything a provider needs to issue one chat round.
///
/// `messages_json` is the session's serialized message array in the
/// Claude-style content-block schema; `tools` is the Claude-style definitions
/// array from [`crate::cclaw::tools::definitions`].  The OpenAI adapter
/// translates both shapes on the way out.
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub messages_json: &'a str,
    pub tools: &'a serde_json::Value,
    pub temperature: f64,
}

/// Callback receiving assistant text deltas during a streaming round.
///
/// Returning [`StreamControl::Stop`] aborts the stream; the adapter then
/// finalizes whatever it has accumulated so far.
pub type TextSink<'a> = &'a mut (dyn FnMut(&str) -> StreamControl + Send);

/// Trait-driven abstraction over a concrete model provider.
///
/// Selected once at session start so the per-turn hot path never compares
/// provider names.  Implementations must be thread-safe (`Send + Sync`) —
/// the Telegram poller, gateway tasks, and scheduler may all hold the same
/// handle.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// One request/response chat round.
    async fn chat(&self, request: &ChatRequest<'_>) -> ChatResponse;

    /// Streaming chat round.  `on_text` is invoked with each assistant text
    /// delta as it arrives; tool calls accumulate silently and appear in the
    /// returned response once the stream closes.
    async fn chat_stream(
        &self,
        request: &ChatRequest<'_>,
        on_text: TextSink<'_>,
    ) -> ChatResponse;

    /// Short provider identifier for logs (e.g. `"anthropic"`).
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_response_upholds_text_or_tools() {
        let resp = ChatResponse::synthetic(NO_RESPONSE_TEXT);
        assert!(!resp.text.is_empty());
        assert_eq!(resp.num_tools(), 0);
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
    }
}
