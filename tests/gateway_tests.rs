use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use cclaw::cclaw::agent_loop::AgentContext;
use cclaw::cclaw::channels::gateway;
use cclaw::cclaw::config::Config;
use cclaw::cclaw::provider::{ChatRequest, ChatResponse, ProviderClient, TextSink};
use cclaw::cclaw::tools::ToolRegistry;
use cclaw::cclaw::websocket::{encode_frame, read_frame, OPCODE_CLOSE, OPCODE_TEXT};

/// Provider that echoes the last user text back, prefixed.
struct EchoProvider;

#[async_trait]
impl ProviderClient for EchoProvider {
    async fn chat(&self, request: &ChatRequest<'_>) -> ChatResponse {
        let messages: serde_json::Value =
            serde_json::from_str(request.messages_json).unwrap();
        let last_text = messages
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m.pointer("/content/0/text"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_owned();
        ChatResponse::synthetic(format!("echo: {}", last_text))
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest<'_>,
        _on_text: TextSink<'_>,
    ) -> ChatResponse {
        self.chat(request).await
    }

    fn name(&self) -> &str {
        "echo"
    }
}

fn test_context(workspace: std::path::PathBuf, gateway_token: &str) -> Arc<AgentContext> {
    let config = Config {
        workspace: workspace.clone(),
        gateway_token: gateway_token.to_owned(),
        ..Config::default()
    };
    let registry = ToolRegistry::new(workspace, None);
    let tools = registry.definitions();
    Arc::new(AgentContext {
        config,
        provider: Arc::new(EchoProvider),
        registry,
        system_prompt: String::new(),
        tools,
        running: Arc::new(AtomicBool::new(true)),
    })
}

async fn upgrade(stream: &mut TcpStream, extra_header: &str) -> String {
    let request = format!(
        "GET /chat HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         {}\r\n",
        extra_header
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buffer = Vec::new();
    let mut byte = [0u8; 1];
    while !buffer.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        buffer.push(byte[0]);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[tokio::test]
async fn gateway_turn_over_real_sockets() {
    let workspace = tempfile::tempdir().unwrap();
    let ctx = test_context(workspace.path().to_path_buf(), "");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = ctx.running.clone();
    let server = tokio::spawn(gateway::run_on(ctx, listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let response = upgrade(&mut stream, "").await;
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols"));
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

    stream
        .write_all(&encode_frame(OPCODE_TEXT, b"hello gateway"))
        .await
        .unwrap();
    let reply = read_frame(&mut stream).await.unwrap();
    assert_eq!(reply.opcode, OPCODE_TEXT);
    assert_eq!(reply.payload, b"echo: hello gateway");

    // Orderly close: the server echoes our CLOSE frame.
    stream
        .write_all(&encode_frame(OPCODE_CLOSE, &[]))
        .await
        .unwrap();
    let closed = read_frame(&mut stream).await.unwrap();
    assert_eq!(closed.opcode, OPCODE_CLOSE);

    running.store(false, Ordering::Relaxed);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(3), server).await;
}

#[tokio::test]
async fn gateway_enforces_auth_token() {
    let workspace = tempfile::tempdir().unwrap();
    let ctx = test_context(workspace.path().to_path_buf(), "sekrit");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = ctx.running.clone();
    let server = tokio::spawn(gateway::run_on(ctx, listener));

    // Wrong token is refused.
    let mut bad = TcpStream::connect(addr).await.unwrap();
    let refused = upgrade(&mut bad, "Authorization: Bearer wrong\r\n").await;
    assert!(refused.starts_with("HTTP/1.1 401"));

    // Correct token upgrades.
    let mut good = TcpStream::connect(addr).await.unwrap();
    let accepted = upgrade(&mut good, "Authorization: Bearer sekrit\r\n").await;
    assert!(accepted.starts_with("HTTP/1.1 101"));

    running.store(false, Ordering::Relaxed);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(3), server).await;
}
