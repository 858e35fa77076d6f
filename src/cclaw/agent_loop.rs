//! The agent loop: one bounded trampoline per user turn.
//!
//! The provider is the state machine and this loop just honours its
//! directives: call the model, execute whatever tools it requested, feed the
//! results back, and repeat until the model stops asking — or until the
//! iteration cap cuts off a runaway tool cycle.
//!
//! Every channel funnels into [`run`].  The loop never fails: provider and
//! tool errors arrive as ordinary text the model (or the user) can read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cclaw::config::Config;
use crate::cclaw::http_client::StreamControl;
use crate::cclaw::provider::{ChatRequest, ProviderClient};
use crate::cclaw::session::Session;
use crate::cclaw::tools::ToolRegistry;

/// Hard cap on provider calls per user turn.
pub const MAX_ITERATIONS: usize = 10;

/// Read-only state shared by every channel and background task.
pub struct AgentContext {
    pub config: Config,
    pub provider: Arc<dyn ProviderClient>,
    pub registry: ToolRegistry,
    pub system_prompt: String,
    /// Tool definitions in Claude-style format, computed once at startup.
    pub tools: serde_json::Value,
    /// Process-wide cancellation flag, flipped by the signal handler.
    pub running: Arc<AtomicBool>,
}

impl AgentContext {
    /// Is the process still supposed to be running?
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Live-output sink for streaming turns; receives assistant text deltas.
pub type LiveOutput<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Run one user turn against the session.
///
/// Appends the user message, then loops: serialize history, call the
/// provider (streaming when `live_output` is given), execute any tool calls
/// and record their results, and stop on the first pure-text response.  The
/// session is saved before returning.
///
/// Returns the turn's final reply text.  When the iteration cap is hit, the
/// most recent text that accompanied a tool round (if any) stands in for a
/// final reply.
pub async fn run(
    ctx: &AgentContext,
    session: &mut Session,
    user_message: &str,
    mut live_output: Option<LiveOutput<'_>>,
) -> String {
    session.add_user(user_message);

    let mut partial_text = String::new();
    let mut final_text = String::new();

    for iteration in 0..MAX_ITERATIONS {
        let messages_json = session.serialize_messages();
        let request = ChatRequest {
            model: &ctx.config.model,
            system: &ctx.system_prompt,
            messages_json: &messages_json,
            tools: &ctx.tools,
            temperature: ctx.config.temperature,
        };

        let response = match live_output.as_mut() {
            Some(sink) => {
                let running = &ctx.running;
                let mut guarded = |delta: &str| {
                    if !running.load(Ordering::Relaxed) {
                        return StreamControl::Stop;
                    }
                    sink(delta);
                    StreamControl::Continue
                };
                ctx.provider.chat_stream(&request, &mut guarded).await
            }
            None => ctx.provider.chat(&request).await,
        };

        log::debug!(
            "turn {}: iteration {} -> {} tool call(s), {} text bytes",
            session.key(),
            iteration + 1,
            response.num_tools(),
            response.text.len()
        );

        if response.num_tools() > 0 {
            // Text that rides along with tool calls is only surfaced if the
            // model never produces a pure-text final.
            if !response.text.is_empty() {
                partial_text = response.text.clone();
            }
            for call in &response.tool_calls {
                session.add_tool_use(&call.id, &call.name, &call.input);
                let result = ctx.registry.execute(&call.name, &call.input).await;
                if !result.success {
                    log::warn!("tool {} failed: {}", call.name, result.output);
                }
                session.add_tool_result(&call.id, &result.output);
            }
            continue;
        }

        final_text = response.text;
        session.add_assistant(&final_text);
        break;
    }

    if final_text.is_empty() && !partial_text.is_empty() {
        final_text = partial_text;
    }

    session.save();
    final_text
}
