//! RFC 6455 server engine, sufficient for single-frame text messages.
//!
//! Three layers live here: the handshake (HTTP upgrade with optional bearer
//! auth and the SHA-1 accept-key derivation), the frame codec (7/16/64-bit
//! payload lengths, client-side masking), and [`WsConnection`], a thin
//! driver that answers PING with PONG and echoes CLOSE so callers only ever
//! see complete text messages.
//!
//! Fragmentation is not supported: every text message is assumed to arrive
//! in a single FIN frame.  BINARY and unknown opcodes are ignored.

use std::io;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed GUID appended to the client key when deriving the accept key.
const WS_MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-5AB9DC085B7";

/// Upper bound on a single frame payload; larger frames abort the
/// connection rather than buffering unbounded attacker-controlled input.
const MAX_FRAME_PAYLOAD: usize = 1 << 20;

/// Upper bound on the handshake request size.
const MAX_HANDSHAKE_BYTES: usize = 8 * 1024;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Derive the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_MAGIC_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Read one frame, unmasking the payload when the MASK bit is set.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Frame> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = header[0] & 0x80 != 0;
    let opcode = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let base_len = (header[1] & 0x7F) as u64;

    let payload_len = match base_len {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
        n => n,
    };
    if payload_len > MAX_FRAME_PAYLOAD as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload of {} bytes exceeds limit", payload_len),
        ));
    }

    let mask = if masked {
        let mut mask = [0u8; 4];
        reader.read_exact(&mut mask).await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Encode one unmasked frame with FIN set (server-to-client form).
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | (opcode & 0x0F));
    match payload.len() {
        len if len <= 125 => frame.push(len as u8),
        len if len <= u16::MAX as usize => {
            frame.push(126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            frame.push(127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(payload);
    frame
}

/// Write one unmasked frame with FIN set.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: u8,
    payload: &[u8],
) -> io::Result<()> {
    writer.write_all(&encode_frame(opcode, payload)).await?;
    writer.flush().await
}

/// Parsed upgrade request: just the pieces the handshake cares about.
struct UpgradeRequest {
    websocket_key: Option<String>,
    upgrade_is_websocket: bool,
    bearer_token: Option<String>,
    query_token: Option<String>,
}

fn parse_upgrade_request(request: &str) -> UpgradeRequest {
    let mut parsed = UpgradeRequest {
        websocket_key: None,
        upgrade_is_websocket: false,
        bearer_token: None,
        query_token: None,
    };

    let mut lines = request.split("\r\n");
    if let Some(request_line) = lines.next() {
        // GET /path?token=... HTTP/1.1
        if let Some(target) = request_line.split_whitespace().nth(1) {
            if let Some((_, query)) = target.split_once('?') {
                for pair in query.split('&') {
                    if let Some(value) = pair.strip_prefix("token=") {
                        parsed.query_token = Some(value.to_owned());
                    }
                }
            }
        }
    }

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.to_ascii_lowercase().as_str() {
            "upgrade" => {
                parsed.upgrade_is_websocket = value.eq_ignore_ascii_case("websocket");
            }
            "sec-websocket-key" => parsed.websocket_key = Some(value.to_owned()),
            "authorization" => {
                if let Some(token) = value.strip_prefix("Bearer ") {
                    parsed.bearer_token = Some(token.to_owned());
                }
            }
            _ => {}
        }
    }
    parsed
}

/// A server-side connection after a successful handshake.
pub struct WsConnection<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WsConnection<S> {
    /// Perform the server handshake on a freshly accepted stream.
    ///
    /// When `auth_token` is set, the client must present it either as
    /// `Authorization: Bearer <token>` or as a `?token=` query parameter;
    /// anything else gets a 401 and the connection is refused.
    pub async fn accept(mut stream: S, auth_token: Option<&str>) -> io::Result<WsConnection<S>> {
        let request = read_until_headers_end(&mut stream).await?;
        let parsed = parse_upgrade_request(&request);

        if !parsed.upgrade_is_websocket {
            stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n")
                .await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing websocket upgrade header",
            ));
        }

        if let Some(expected) = auth_token {
            let presented = parsed
                .bearer_token
                .as_deref()
                .or(parsed.query_token.as_deref());
            if presented != Some(expected) {
                stream
                    .write_all(b"HTTP/1.1 401 Unauthorized\r\nConnection: close\r\n\r\n")
                    .await?;
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "gateway auth token mismatch",
                ));
            }
        }

        let Some(key) = parsed.websocket_key else {
            stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n")
                .await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing Sec-WebSocket-Key",
            ));
        };

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            accept_key(&key)
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        Ok(WsConnection { stream })
    }

    /// Read the next text message.
    ///
    /// Control frames are handled inline: PING is answered with PONG, CLOSE
    /// is echoed and ends the connection (`Ok(None)`).  BINARY and unknown
    /// opcodes are skipped.
    pub async fn next_text(&mut self) -> io::Result<Option<String>> {
        loop {
            let frame = read_frame(&mut self.stream).await?;
            match frame.opcode {
                OPCODE_TEXT => {
                    let text = String::from_utf8_lossy(&frame.payload).into_owned();
                    return Ok(Some(text));
                }
                OPCODE_PING => {
                    write_frame(&mut self.stream, OPCODE_PONG, &frame.payload).await?;
                }
                OPCODE_CLOSE => {
                    let _ = write_frame(&mut self.stream, OPCODE_CLOSE, &frame.payload).await;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Send one text message as a single frame.
    pub async fn send_text(&mut self, text: &str) -> io::Result<()> {
        write_frame(&mut self.stream, OPCODE_TEXT, text.as_bytes()).await
    }

    /// Initiate an orderly close.
    pub async fn close(&mut self) -> io::Result<()> {
        write_frame(&mut self.stream, OPCODE_CLOSE, &[]).await
    }
}

/// Buffer the upgrade request up to and including the blank line.
async fn read_until_headers_end<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<String> {
    let mut buffer = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    while !buffer.ends_with(b"\r\n\r\n") {
        if buffer.len() >= MAX_HANDSHAKE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "handshake request too large",
            ));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            ));
        }
        buffer.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_sample() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn frame_round_trips_at_length_boundaries() {
        for len in [0usize, 125, 126, 65535, 65536] {
            let payload = vec![b'a'; len];
            let encoded = encode_frame(OPCODE_TEXT, &payload);
            let mut cursor: &[u8] = &encoded;
            let frame = read_frame(&mut cursor).await.unwrap();
            assert!(frame.fin);
            assert_eq!(frame.opcode, OPCODE_TEXT);
            assert_eq!(frame.payload.len(), len, "length {} round trip", len);
            assert_eq!(frame.payload, payload);
        }
    }

    #[tokio::test]
    async fn masked_client_frame_is_unmasked() {
        // Hand-built masked frame carrying "hi".
        let mask = [0x10u8, 0x20, 0x30, 0x40];
        let mut frame = vec![0x80 | OPCODE_TEXT, 0x80 | 2];
        frame.extend_from_slice(&mask);
        frame.push(b'h' ^ mask[0]);
        frame.push(b'i' ^ mask[1]);

        let mut cursor: &[u8] = &frame;
        let decoded = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded.payload, b"hi");
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let mut header = vec![0x80 | OPCODE_TEXT, 127];
        header.extend_from_slice(&(u64::MAX).to_be_bytes());
        let mut cursor: &[u8] = &header;
        assert!(read_frame(&mut cursor).await.is_err());
    }

    fn upgrade_request(extra: &str) -> String {
        format!(
            "GET /chat HTTP/1.1\r\n\
             Host: localhost\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             {}\r\n",
            extra
        )
    }

    #[tokio::test]
    async fn handshake_produces_rfc_accept_header() {
        let (client, server) = tokio::io::duplex(4096);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let accept_task = tokio::spawn(async move { WsConnection::accept(server, None).await });

        client_write
            .write_all(upgrade_request("").as_bytes())
            .await
            .unwrap();

        let mut response = vec![0u8; 1024];
        let n = client_read.read(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response[..n]).into_owned();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        accept_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_bad_token() {
        let (client, server) = tokio::io::duplex(4096);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let accept_task =
            tokio::spawn(async move { WsConnection::accept(server, Some("sekrit")).await });

        client_write
            .write_all(upgrade_request("Authorization: Bearer wrong\r\n").as_bytes())
            .await
            .unwrap();

        let mut response = vec![0u8; 256];
        let n = client_read.read(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response[..n]).starts_with("HTTP/1.1 401"));
        assert!(accept_task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn handshake_accepts_query_token() {
        let (client, server) = tokio::io::duplex(4096);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let accept_task =
            tokio::spawn(async move { WsConnection::accept(server, Some("sekrit")).await });

        let request = "GET /chat?token=sekrit HTTP/1.1\r\n\
             Upgrade: WebSocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        client_write.write_all(request.as_bytes()).await.unwrap();

        let mut response = vec![0u8; 256];
        let n = client_read.read(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response[..n]).starts_with("HTTP/1.1 101"));
        accept_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ping_is_answered_and_text_delivered() {
        let (client, server) = tokio::io::duplex(4096);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let server_task = tokio::spawn(async move {
            let mut conn = WsConnection::accept(server, None).await.unwrap();
            let text = conn.next_text().await.unwrap();
            if let Some(text) = &text {
                conn.send_text(&format!("echo: {}", text)).await.unwrap();
            }
            text
        });

        client_write
            .write_all(upgrade_request("").as_bytes())
            .await
            .unwrap();
        // Swallow the 101 response.
        let mut response = vec![0u8; 1024];
        client_read.read(&mut response).await.unwrap();

        client_write
            .write_all(&encode_frame(OPCODE_PING, b"beat"))
            .await
            .unwrap();
        client_write
            .write_all(&encode_frame(OPCODE_TEXT, b"hello"))
            .await
            .unwrap();

        // PONG comes back first, echoing the payload.
        let mut cursor = client_read;
        let pong = read_frame(&mut cursor).await.unwrap();
        assert_eq!(pong.opcode, OPCODE_PONG);
        assert_eq!(pong.payload, b"beat");

        let echoed = read_frame(&mut cursor).await.unwrap();
        assert_eq!(echoed.opcode, OPCODE_TEXT);
        assert_eq!(echoed.payload, b"echo: hello");

        assert_eq!(server_task.await.unwrap().as_deref(), Some("hello"));
    }
}
