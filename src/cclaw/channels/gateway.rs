//! WebSocket gateway channel.
//!
//! Accepts connections on the configured port, performs the RFC 6455
//! handshake (with optional bearer-token auth), and treats every inbound
//! text frame as one agent turn under a `ws_<conn>` session key.  Each
//! reply goes back as a single text frame.
//!
//! At most 64 connections are served concurrently; accepts beyond the cap
//! are dropped immediately.  The per-connection session is freed when the
//! peer disconnects; its on-disk history survives the process.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::cclaw::agent_loop::{self, AgentContext};
use crate::cclaw::session::Session;
use crate::cclaw::websocket::WsConnection;

/// Maximum concurrent client connections.
const MAX_CONNECTIONS: usize = 64;

/// Bind the configured port and run the accept loop.
pub async fn run(ctx: Arc<AgentContext>, port: u16) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("gateway: cannot bind port {}: {}", port, e);
            return;
        }
    };
    log::info!("gateway: listening on port {}", port);
    run_on(ctx, listener).await;
}

/// Run the accept loop on an already bound listener until the running flag
/// clears.
pub async fn run_on(ctx: Arc<AgentContext>, listener: TcpListener) {
    let active = Arc::new(AtomicUsize::new(0));
    let next_conn_id = AtomicU64::new(1);

    while ctx.is_running() {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => stream,
                Err(e) => {
                    log::warn!("gateway: accept failed: {}", e);
                    continue;
                }
            },
            // Wake periodically so a clearing running flag ends the loop.
            _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
        };

        if active.load(Ordering::Relaxed) >= MAX_CONNECTIONS {
            log::warn!("gateway: connection limit reached, dropping new client");
            continue;
        }

        let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
        let ctx = ctx.clone();
        let active = active.clone();
        active.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            serve_client(ctx, stream, conn_id).await;
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
    log::info!("gateway: stopped");
}

async fn serve_client(ctx: Arc<AgentContext>, stream: TcpStream, conn_id: u64) {
    let auth_token = if ctx.config.gateway_token.is_empty() {
        None
    } else {
        Some(ctx.config.gateway_token.as_str())
    };

    let mut conn = match WsConnection::accept(stream, auth_token).await {
        Ok(conn) => conn,
        Err(e) => {
            log::info!("gateway: handshake failed for conn {}: {}", conn_id, e);
            return;
        }
    };
    log::info!("gateway: conn {} open", conn_id);

    let mut session = Session::open(&ctx.config.workspace, &format!("ws_{}", conn_id));

    loop {
        let text = match conn.next_text().await {
            Ok(Some(text)) => text,
            Ok(None) => break,
            Err(e) => {
                log::debug!("gateway: conn {} read error: {}", conn_id, e);
                break;
            }
        };
        if !ctx.is_running() {
            let _ = conn.close().await;
            break;
        }

        let reply = agent_loop::run(&ctx, &mut session, &text, None).await;
        if let Err(e) = conn.send_text(&reply).await {
            log::debug!("gateway: conn {} write error: {}", conn_id, e);
            break;
        }
    }

    session.close();
    log::info!("gateway: conn {} closed", conn_id);
}
