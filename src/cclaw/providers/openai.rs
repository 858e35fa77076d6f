//! OpenAI Chat Completions client.
//!
//! The session keeps its history in the Claude-style content-block schema,
//! so this adapter translates on the way out: the system prompt becomes a
//! leading `{"role":"system"}` message, `tool_use` blocks become assistant
//! `tool_calls`, `tool_result` blocks become `{"role":"tool"}` messages, and
//! Claude-style tool definitions are wrapped in the
//! `{type:"function", function:{...}}` envelope.
//!
//! Streamed tool calls arrive as `choices[0].delta.tool_calls[i]` fragments
//! addressed by an `index` field; up to 32 parallel calls accumulate in a
//! slot table and are emitted in index order once the provider reports a
//! `finish_reason`.

use async_trait::async_trait;

use crate::cclaw::http_client::{HttpClient, StreamControl};
use crate::cclaw::provider::{
    ChatRequest, ChatResponse, ProviderClient, StopReason, TextSink, ToolCall,
    MAX_COMPLETION_TOKENS, NO_RESPONSE_TEXT,
};

const OPENAI_API_BASE: &str = "https://api.openai.com";

/// Upper bound on tool calls the model may stream in parallel.
const MAX_PARALLEL_TOOL_CALLS: usize = 32;

/// Client for OpenAI's Chat Completions API.
pub struct OpenAIClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a client against the public API endpoint.
    pub fn new(http: HttpClient, api_key: String) -> Self {
        Self::new_with_base_url(http, api_key, OPENAI_API_BASE)
    }

    /// Create a client against an OpenAI-compatible base URL.
    pub fn new_with_base_url(http: HttpClient, api_key: String, base_url: &str) -> Self {
        OpenAIClient {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn build_body(&self, request: &ChatRequest<'_>, stream: bool) -> Result<String, String> {
        let messages = translate_messages(request.system, request.messages_json)?;

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "temperature": request.temperature,
            "messages": messages,
        });
        let tools = translate_tools(request.tools);
        if !tools.is_empty() {
            body["tools"] = serde_json::Value::Array(tools);
        }
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        Ok(body.to_string())
    }
}

/// Translate the Claude-style session message array into OpenAI wire shape.
fn translate_messages(
    system: &str,
    messages_json: &str,
) -> Result<Vec<serde_json::Value>, String> {
    let parsed: serde_json::Value = serde_json::from_str(messages_json)
        .map_err(|e| format!("Failed to serialize session messages: {}", e))?;
    let source = parsed
        .as_array()
        .ok_or_else(|| "Session messages are not an array".to_owned())?;

    let mut wire = Vec::with_capacity(source.len() + 1);
    if !system.is_empty() {
        wire.push(serde_json::json!({"role": "system", "content": system}));
    }

    for message in source {
        let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("");
        let blocks = message
            .get("content")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default();

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for block in &blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    let input = block.get("input").cloned().unwrap_or_else(
                        || serde_json::Value::Object(serde_json::Map::new()),
                    );
                    tool_calls.push(serde_json::json!({
                        "id": block.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                        "type": "function",
                        "function": {
                            "name": block.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                            "arguments": input.to_string(),
                        }
                    }));
                }
                Some("tool_result") => {
                    tool_results.push(serde_json::json!({
                        "role": "tool",
                        "tool_call_id": block
                            .get("tool_use_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or(""),
                        "content": block
                            .get("content")
                            .and_then(|v| v.as_str())
                            .unwrap_or(""),
                    }));
                }
                _ => {}
            }
        }

        match role {
            "assistant" => {
                if tool_calls.is_empty() {
                    wire.push(serde_json::json!({"role": "assistant", "content": text}));
                } else {
                    let content = if text.is_empty() {
                        serde_json::Value::Null
                    } else {
                        serde_json::Value::String(text)
                    };
                    wire.push(serde_json::json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": tool_calls,
                    }));
                }
            }
            _ => {
                if !text.is_empty() || tool_results.is_empty() {
                    wire.push(serde_json::json!({"role": "user", "content": text}));
                }
                wire.extend(tool_results);
            }
        }
    }

    Ok(wire)
}

/// Wrap Claude-style tool definitions in the function-calling envelope.
fn translate_tools(tools: &serde_json::Value) -> Vec<serde_json::Value> {
    let Some(defs) = tools.as_array() else {
        return Vec::new();
    };
    defs.iter()
        .map(|def| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": def.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                    "description": def
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or(""),
                    "parameters": def
                        .get("input_schema")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                }
            })
        })
        .collect()
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::EndTurn,
        "tool_calls" => StopReason::ToolUse,
        other => StopReason::Other(other.to_owned()),
    }
}

fn api_error_message(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_owned())
}

/// One streamed tool call being assembled from `delta.tool_calls` fragments.
#[derive(Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulation state for one streaming round.
struct StreamState {
    text: String,
    slots: Vec<Option<PendingToolCall>>,
    stop_reason: Option<StopReason>,
    input_tokens: u64,
    output_tokens: u64,
    api_error: Option<String>,
}

impl Default for StreamState {
    fn default() -> Self {
        StreamState {
            text: String::new(),
            slots: vec![None; MAX_PARALLEL_TOOL_CALLS],
            stop_reason: None,
            input_tokens: 0,
            output_tokens: 0,
            api_error: None,
        }
    }
}

impl StreamState {
    fn apply(&mut self, event: &serde_json::Value, on_text: &mut TextSink<'_>) -> StreamControl {
        if let Some(message) = api_error_message(event) {
            self.api_error = Some(message);
            return StreamControl::Stop;
        }

        // Some gateways report usage on the final chunk.
        if let Some(tokens) = event.pointer("/usage/prompt_tokens").and_then(|v| v.as_u64()) {
            self.input_tokens = tokens;
        }
        if let Some(tokens) = event
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
        {
            self.output_tokens = tokens;
        }

        let Some(choice) = event.pointer("/choices/0") else {
            return StreamControl::Continue;
        };

        if let Some(text) = choice.pointer("/delta/content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                self.text.push_str(text);
                if on_text(text) == StreamControl::Stop {
                    return StreamControl::Stop;
                }
            }
        }

        if let Some(fragments) = choice.pointer("/delta/tool_calls").and_then(|v| v.as_array()) {
            for fragment in fragments {
                let index = fragment
                    .get("index")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;
                if index >= MAX_PARALLEL_TOOL_CALLS {
                    continue;
                }
                let slot = self.slots[index].get_or_insert_with(PendingToolCall::default);
                if let Some(id) = fragment.get("id").and_then(|v| v.as_str()) {
                    slot.id.push_str(id);
                }
                if let Some(name) = fragment.pointer("/function/name").and_then(|v| v.as_str()) {
                    slot.name.push_str(name);
                }
                if let Some(args) = fragment
                    .pointer("/function/arguments")
                    .and_then(|v| v.as_str())
                {
                    slot.arguments.push_str(args);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.stop_reason = Some(map_finish_reason(reason));
        }

        StreamControl::Continue
    }

    fn finish(self) -> ChatResponse {
        if let Some(message) = self.api_error {
            return ChatResponse::synthetic(message);
        }
        let tool_calls: Vec<ToolCall> = self
            .slots
            .into_iter()
            .flatten()
            .map(|slot| ToolCall {
                id: slot.id,
                name: slot.name,
                input: slot.arguments,
            })
            .collect();
        if self.text.is_empty() && tool_calls.is_empty() {
            return ChatResponse::synthetic(NO_RESPONSE_TEXT);
        }
        ChatResponse {
            text: self.text,
            tool_calls,
            stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAIClient {
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
                &[("Authorization", self.auth_header().as_str())],
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("openai: transport failure: {}", e);
                return ChatResponse::synthetic(NO_RESPONSE_TEXT);
            }
        };

        if response.body.is_empty() {
            return ChatResponse::synthetic(NO_RESPONSE_TEXT);
        }

        let parsed: serde_json::Value = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("openai: unparsable response: {}", e);
                return ChatResponse::synthetic(format!(
                    "Failed to parse provider response: {}",
                    e
                ));
            }
        };

        if let Some(message) = api_error_message(&parsed) {
            return ChatResponse::synthetic(message);
        }

        let message = &parsed["choices"][0]["message"];
        let text = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_owned();

        let tool_calls: Vec<ToolCall> = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| ToolCall {
                        id: call
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned(),
                        name: call
                            .pointer("/function/name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned(),
                        input: call
                            .pointer("/function/arguments")
                            .and_then(|v| v.as_str())
                            .unwrap_or("{}")
                            .to_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let stop_reason = parsed
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
            .map(map_finish_reason)
            .unwrap_or(StopReason::EndTurn);

        if text.is_empty() && tool_calls.is_empty() {
            return ChatResponse::synthetic(NO_RESPONSE_TEXT);
        }

        ChatResponse {
            text,
            tool_calls,
            stop_reason,
            input_tokens: parsed
                .pointer("/usage/prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: parsed
                .pointer("/usage/completion_tokens")
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
                &[("Authorization", self.auth_header().as_str())],
                |payload| match serde_json::from_str::<serde_json::Value>(payload) {
                    Ok(event) => state.apply(&event, &mut on_text),
                    Err(_) => StreamControl::Continue,
                },
            )
            .await;

        if let Err(e) = result {
            log::warn!("openai: stream failure: {}", e);
        }
        state.finish()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(state: &mut StreamState, events: &[serde_json::Value]) {
        let mut sink: Box<dyn FnMut(&str) -> StreamControl + Send> =
            Box::new(|_| StreamControl::Continue);
        let mut sink_ref: TextSink<'_> = &mut *sink;
        for event in events {
            state.apply(event, &mut sink_ref);
        }
    }

    #[test]
    fn system_prompt_is_prepended() {
        let wire = translate_messages(
            "be brief",
            r#"[{"role":"user","content":[{"type":"text","text":"hi"}]}]"#,
        )
        .unwrap();
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "be brief");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[1]["content"], "hi");
    }

    #[test]
    fn tool_blocks_translate_to_function_calls() {
        let wire = translate_messages(
            "",
            r#"[
                {"role":"assistant","content":[
                    {"type":"tool_use","id":"t1","name":"shell","input":{"command":"ls"}}
                ]},
                {"role":"user","content":[
                    {"type":"tool_result","tool_use_id":"t1","content":"[exit 0]\nsrc"}
                ]}
            ]"#,
        )
        .unwrap();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "assistant");
        assert!(wire[0]["content"].is_null());
        assert_eq!(wire[0]["tool_calls"][0]["id"], "t1");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "shell");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "t1");
    }

    #[test]
    fn tool_definitions_gain_function_envelope() {
        let defs = serde_json::json!([
            {"name":"shell","description":"Run a command","input_schema":{"type":"object"}}
        ]);
        let translated = translate_tools(&defs);
        assert_eq!(translated.len(), 1);
        assert_eq!(translated[0]["type"], "function");
        assert_eq!(translated[0]["function"]["name"], "shell");
        assert_eq!(translated[0]["function"]["parameters"]["type"], "object");
        assert!(translate_tools(&serde_json::json!([])).is_empty());
    }

    #[test]
    fn stream_reassembles_indexed_tool_calls() {
        let mut state = StreamState::default();
        apply_all(
            &mut state,
            &[
                serde_json::json!({"choices":[{"delta":{"tool_calls":[
                    {"index":0,"id":"call_a","function":{"name":"shell","arguments":"{\"com"}}
                ]}}]}),
                serde_json::json!({"choices":[{"delta":{"tool_calls":[
                    {"index":1,"id":"call_b","function":{"name":"file_read","arguments":"{\"path\":\"a\"}"}}
                ]}}]}),
                serde_json::json!({"choices":[{"delta":{"tool_calls":[
                    {"index":0,"function":{"arguments":"mand\":\"ls\"}"}}
                ]}}]}),
                serde_json::json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}),
            ],
        );
        let response = state.finish();
        assert_eq!(response.num_tools(), 2);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].input, "{\"command\":\"ls\"}");
        assert_eq!(response.tool_calls[1].name, "file_read");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn stream_collects_text_deltas() {
        let mut state = StreamState::default();
        apply_all(
            &mut state,
            &[
                serde_json::json!({"choices":[{"delta":{"content":"4"}}]}),
                serde_json::json!({"choices":[{"delta":{},"finish_reason":"stop"}]}),
            ],
        );
        let response = state.finish();
        assert_eq!(response.text, "4");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }
}
