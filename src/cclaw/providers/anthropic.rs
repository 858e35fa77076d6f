//! Anthropic Messages API client.
//!
//! Speaks the native Messages wire format: a top-level `system` string,
//! Claude-style tool definitions passed through unchanged, and typed content
//! blocks in both directions.  Streaming uses the Messages event protocol
//! (`message_start`, `content_block_*`, `message_delta`) over SSE.
//!
//! Claude emits tool calls serially — one `content_block_start` /
//! `input_json_delta`* / `content_block_stop` sequence per call — so a single
//! in-flight accumulation slot is enough.

use async_trait::async_trait;

use crate::cclaw::http_client::{HttpClient, StreamControl};
use crate::cclaw::provider::{
    ChatRequest, ChatResponse, ProviderClient, StopReason, TextSink, ToolCall,
    MAX_COMPLETION_TOKENS, NO_RESPONSE_TEXT,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for Anthropic's Messages API.
pub struct AnthropicClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    /// Create a client against the public API endpoint.
    pub fn new(http: HttpClient, api_key: String) -> Self {
        Self::new_with_base_url(http, api_key, ANTHROPIC_API_BASE)
    }

    /// Create a client against a custom Messages-compatible base URL.
    pub fn new_with_base_url(http: HttpClient, api_key: String, base_url: &str) -> Self {
        AnthropicClient {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Assemble the request body shared by both round styles.
    fn build_body(&self, request: &ChatRequest<'_>, stream: bool) -> Result<String, String> {
        let messages: serde_json::Value = serde_json::from_str(request.messages_json)
            .map_err(|e| format!("Failed to serialize session messages: {}", e))?;

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "temperature": request.temperature,
            "system": request.system,
            "messages": messages,
        });
        if let Some(tools) = request.tools.as_array() {
            if !tools.is_empty() {
                body["tools"] = request.tools.clone();
            }
        }
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        Ok(body.to_string())
    }
}

/// Map the provider's `stop_reason` string onto the unified enum.
fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        other => StopReason::Other(other.to_owned()),
    }
}

/// Pull `error.message` out of an API error body, if present.
fn api_error_message(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_owned())
}

/// Accumulation state for one streaming round.
#[derive(Default)]
struct StreamState {
    text: String,
    tool_calls: Vec<ToolCall>,
    /// Tool call currently receiving `input_json_delta` fragments.
    pending: Option<ToolCall>,
    stop_reason: Option<StopReason>,
    input_tokens: u64,
    output_tokens: u64,
    api_error: Option<String>,
}

impl StreamState {
    /// Apply one decoded SSE event.  Returns `Stop` when the text sink asks
    /// to abort.
    fn apply(&mut self, event: &serde_json::Value, on_text: &mut TextSink<'_>) -> StreamControl {
        match event.get("type").and_then(|t| t.as_str()) {
            Some("message_start") => {
                if let Some(tokens) = event
                    .pointer("/message/usage/input_tokens")
                    .and_then(|v| v.as_u64())
                {
                    self.input_tokens = tokens;
                }
            }
            Some("content_block_start") => {
                let block = &event["content_block"];
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    self.pending = Some(ToolCall {
                        id: block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned(),
                        name: block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned(),
                        input: String::new(),
                    });
                }
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            self.text.push_str(text);
                            if on_text(text) == StreamControl::Stop {
                                return StreamControl::Stop;
                            }
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(pending), Some(fragment)) = (
                            self.pending.as_mut(),
                            delta.get("partial_json").and_then(|v| v.as_str()),
                        ) {
                            pending.input.push_str(fragment);
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if let Some(call) = self.pending.take() {
                    self.tool_calls.push(call);
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event
                    .pointer("/delta/stop_reason")
                    .and_then(|v| v.as_str())
                {
                    self.stop_reason = Some(map_stop_reason(reason));
                }
                if let Some(tokens) = event
                    .pointer("/usage/output_tokens")
                    .and_then(|v| v.as_u64())
                {
                    self.output_tokens = tokens;
                }
            }
            Some("error") | None => {
                if let Some(message) = api_error_message(event) {
                    self.api_error = Some(message);
                    return StreamControl::Stop;
                }
            }
            _ => {}
        }
        StreamControl::Continue
    }

    fn finish(self) -> ChatResponse {
        if let Some(message) = self.api_error {
            return ChatResponse::synthetic(message);
        }
        let stop_reason = self.stop_reason.unwrap_or(StopReason::EndTurn);
        if self.text.is_empty() && self.tool_calls.is_empty() {
            return ChatResponse::synthetic(NO_RESPONSE_TEXT);
        }
        ChatResponse {
            text: self.text,
            tool_calls: self.tool_calls,
            stop_reason,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn chat(&self, request: &ChatRequest<'_>) -> ChatResponse {
        let body = match self.build_body(request, false) {
            Ok(body) => body,
            Err(message) => return ChatResponse::synthetic(message),
        };

        let response = match self
            .http
            .post_json(
                &self.endpoint(),
                &body,
                &[
                    ("x-api-key", self.api_key.as_str()),
                    ("anthropic-version", ANTHROPIC_VERSION),
                ],
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("anthropic: transport failure: {}", e);
                return ChatResponse::synthetic(NO_RESPONSE_TEXT);
            }
        };

        if response.body.is_empty() {
            return ChatResponse::synthetic(NO_RESPONSE_TEXT);
        }

        let parsed: serde_json::Value = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("anthropic: unparsable response: {}", e);
                return ChatResponse::synthetic(format!(
                    "Failed to parse provider response: {}",
                    e
                ));
            }
        };

        if let Some(message) = api_error_message(&parsed) {
            return ChatResponse::synthetic(message);
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = parsed.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                            text.push_str(t);
                        }
                    }
                    Some("tool_use") => {
                        tool_calls.push(ToolCall {
                            id: block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_owned(),
                            name: block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_owned(),
                            input: block
                                .get("input")
                                .map(|v| v.to_string())
                                .unwrap_or_else(|| "{}".to_owned()),
                        });
                    }
                    _ => {}
                }
            }
        }

        let stop_reason = parsed
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(map_stop_reason)
            .unwrap_or(StopReason::EndTurn);

        if text.is_empty() && tool_calls.is_empty() {
            return ChatResponse::synthetic(NO_RESPONSE_TEXT);
        }

        ChatResponse {
            text,
            tool_calls,
            stop_reason,
            input_tokens: parsed
                .pointer("/usage/input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: parsed
                .pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        }
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest<'_>,
        mut on_text: TextSink<'_>,
    ) -> ChatResponse {
        let body = match self.build_body(request, true) {
            Ok(body) => body,
            Err(message) => return ChatResponse::synthetic(message),
        };

        let mut state = StreamState::default();
        let result = self
            .http
            .post_stream(
                &self.endpoint(),
                &body,
                &[
                    ("x-api-key", self.api_key.as_str()),
                    ("anthropic-version", ANTHROPIC_VERSION),
                ],
                |payload| match serde_json::from_str::<serde_json::Value>(payload) {
                    Ok(event) => state.apply(&event, &mut on_text),
                    Err(_) => StreamControl::Continue,
                },
            )
            .await;

        if let Err(e) = result {
            log::warn!("anthropic: stream failure: {}", e);
        }
        state.finish()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_discard() -> Box<dyn FnMut(&str) -> StreamControl + Send> {
        Box::new(|_| StreamControl::Continue)
    }

    fn apply_all(state: &mut StreamState, events: &[serde_json::Value]) {
        let mut sink = sink_discard();
        let mut sink_ref: TextSink<'_> = &mut *sink;
        for event in events {
            state.apply(event, &mut sink_ref);
        }
    }

    #[test]
    fn stream_assembles_text_and_usage() {
        let mut state = StreamState::default();
        apply_all(
            &mut state,
            &[
                serde_json::json!({"type":"message_start","message":{"usage":{"input_tokens":12}}}),
                serde_json::json!({"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}),
                serde_json::json!({"type":"content_block_delta","delta":{"type":"text_delta","text":"lo"}}),
                serde_json::json!({"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}),
            ],
        );
        let response = state.finish();
        assert_eq!(response.text, "Hello");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 5);
    }

    #[test]
    fn stream_accumulates_tool_input_fragments() {
        let mut state = StreamState::default();
        apply_all(
            &mut state,
            &[
                serde_json::json!({"type":"content_block_start","content_block":{"type":"tool_use","id":"t1","name":"shell"}}),
                serde_json::json!({"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"comm"}}),
                serde_json::json!({"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"and\":\"ls\"}"}}),
                serde_json::json!({"type":"content_block_stop"}),
                serde_json::json!({"type":"message_delta","delta":{"stop_reason":"tool_use"}}),
            ],
        );
        let response = state.finish();
        assert_eq!(response.num_tools(), 1);
        assert_eq!(response.tool_calls[0].id, "t1");
        assert_eq!(response.tool_calls[0].name, "shell");
        assert_eq!(response.tool_calls[0].input, "{\"command\":\"ls\"}");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn stream_surfaces_api_error_verbatim() {
        let mut state = StreamState::default();
        apply_all(
            &mut state,
            &[serde_json::json!({"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}})],
        );
        let response = state.finish();
        assert_eq!(response.text, "Overloaded");
        assert_eq!(response.num_tools(), 0);
    }

    #[test]
    fn stop_reasons_pass_through() {
        assert_eq!(map_stop_reason("end_turn"), StopReason::EndTurn);
        assert_eq!(map_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(
            map_stop_reason("max_tokens"),
            StopReason::Other("max_tokens".to_owned())
        );
    }
}
