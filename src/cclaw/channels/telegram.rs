//! Telegram bot channel via long-polling.
//!
//! Polls `getUpdates` with a 30-second server-side timeout, advancing the
//! offset to `max(update_id)+1` so every update is acknowledged exactly
//! once.  Each incoming text message from an allowed peer becomes one agent
//! turn under the `tg_<chat>` session key; the reply goes back through
//! `sendMessage` as Markdown, with a plain-text retry when Telegram rejects
//! the formatting.

use std::sync::Arc;
use std::time::Duration;

use crate::cclaw::agent_loop::{self, AgentContext};
use crate::cclaw::http_client::HttpClient;
use crate::cclaw::session::Session;

const API_BASE: &str = "https://api.telegram.org";

/// Pause after a failed poll so a dead network does not spin the loop.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Run the long-poll loop until the running flag clears.
pub async fn run(ctx: Arc<AgentContext>) {
    let token = &ctx.config.telegram_token;
    if token.is_empty() {
        log::error!("telegram: enabled but no token configured");
        return;
    }
    let base = format!("{}/bot{}", API_BASE, token);
    let http = HttpClient::new();

    log::info!("telegram: polling for updates");
    let mut offset: i64 = 0;

    while ctx.is_running() {
        let url = format!("{}/getUpdates?timeout=30&offset={}", base, offset);
        let response = match http.get(&url, &[]).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("telegram: poll failed: {}", e);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        let parsed: serde_json::Value = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("telegram: unparsable update batch: {}", e);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        let Some(updates) = parsed.get("result").and_then(|r| r.as_array()) else {
            log::warn!(
                "telegram: API error: {}",
                parsed
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or("unknown")
            );
            tokio::time::sleep(POLL_RETRY_DELAY).await;
            continue;
        };

        for update in updates {
            if let Some(update_id) = update.get("update_id").and_then(|v| v.as_i64()) {
                offset = offset.max(update_id + 1);
            }
            handle_update(&ctx, &http, &base, update).await;
        }
    }
    log::info!("telegram: stopped");
}

async fn handle_update(
    ctx: &AgentContext,
    http: &HttpClient,
    base: &str,
    update: &serde_json::Value,
) {
    let Some(message) = update.get("message") else {
        return;
    };
    let Some(chat_id) = message.pointer("/chat/id").and_then(|v| v.as_i64()) else {
        return;
    };
    let Some(text) = message.get("text").and_then(|v| v.as_str()) else {
        return;
    };
    let username = message.pointer("/from/username").and_then(|v| v.as_str());

    if !ctx.config.telegram_allows(chat_id, username) {
        log::info!(
            "telegram: ignoring message from unauthorized chat {} ({})",
            chat_id,
            username.unwrap_or("-")
        );
        return;
    }

    send_typing(http, base, chat_id).await;

    let mut session = Session::open(&ctx.config.workspace, &format!("tg_{}", chat_id));
    let reply = agent_loop::run(ctx, &mut session, text, None).await;
    session.close();

    if reply.is_empty() {
        return;
    }
    send_message(http, base, chat_id, &reply).await;
}

async fn send_typing(http: &HttpClient, base: &str, chat_id: i64) {
    let body = serde_json::json!({"chat_id": chat_id, "action": "typing"}).to_string();
    if let Err(e) = http
        .post_json(&format!("{}/sendChatAction", base), &body, &[])
        .await
    {
        log::debug!("telegram: sendChatAction failed: {}", e);
    }
}

async fn send_message(
    http: &HttpClient,
    base: &str,
    chat_id: i64,
    text: &str,
) {
    let url = format!("{}/sendMessage", base);
    let body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "Markdown",
    })
    .to_string();

    match http.post_json(&url, &body, &[]).await {
        Ok(response) if response.status == 200 => {}
        Ok(response) => {
            // Usually a Markdown parse rejection; resend without formatting.
            log::debug!(
                "telegram: sendMessage status {}: {}",
                response.status,
                response.body_text()
            );
            let plain = serde_json::json!({"chat_id": chat_id, "text": text}).to_string();
            if let Err(e) = http.post_json(&url, &plain, &[]).await {
                log::warn!("telegram: sendMessage retry failed: {}", e);
            }
        }
        Err(e) => log::warn!("telegram: sendMessage failed: {}", e),
    }
}
