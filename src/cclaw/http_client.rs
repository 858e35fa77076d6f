//! HTTPS transport shared by every component that talks to the outside world.
//!
//! The [`HttpClient`] wraps a single lazily initialised [`reqwest::Client`] and
//! exposes the three request shapes the runtime needs: a JSON `POST`, a plain
//! `GET`, and a `POST` whose response is consumed as a Server-Sent-Events
//! stream.  Provider adapters and the Telegram poller all go through this
//! module so that TLS configuration and timeouts live in exactly one place.
//!
//! # Example
//!
//! ```rust,no_run
//! use cclaw::cclaw::http_client::HttpClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let http = HttpClient::new();
//!     let resp = http
//!         .post_json(
//!             "https://api.example.com/v1/echo",
//!             r#"{"ping":true}"#,
//!             &[("X-Debug", "1")],
//!         )
//!         .await
//!         .unwrap();
//!     println!("status={} bytes={}", resp.status, resp.body.len());
//! }
//! ```

use std::error::Error;
use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use lazy_static::lazy_static;

/// Idle-read timeout for all requests.  Streaming responses reset the clock
/// on every received chunk, so long SSE sessions are unaffected as long as
/// the peer keeps talking.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SSE payload lines carry this prefix; everything else on the stream is
/// framing or comments and is skipped.
const SSE_DATA_PREFIX: &str = "data: ";

/// Sentinel payload some providers send to mark the end of an event stream.
const SSE_DONE: &str = "[DONE]";

lazy_static! {
    /// Shared HTTP client reused by every [`HttpClient`] handle.
    ///
    /// Built once so TLS roots are loaded a single time; rustls verifies the
    /// peer against the system trust store.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .read_timeout(READ_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code. `0` never appears here; transport failures are
    /// reported through [`HttpError`] instead.
    pub status: u16,
    /// Raw response body bytes.
    pub body: Vec<u8>,
    /// Response headers flattened to `Name: value` lines, for diagnostics.
    pub headers: String,
}

impl HttpResponse {
    /// Borrow the body as UTF-8 text, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport-level failures.  Callers in the provider layer fold every
/// variant into a synthetic "no response" chat reply; nothing here escapes
/// to a channel.
#[derive(Debug)]
pub enum HttpError {
    /// The URL was not `https://host[:port]/path`.
    InvalidUrl(String),
    /// Connect, TLS, or read failure before/while receiving the response.
    Transport(String),
    /// Failure while consuming an event stream mid-flight.
    Stream(String),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::InvalidUrl(url) => write!(f, "invalid url: {}", url),
            HttpError::Transport(msg) => write!(f, "transport error: {}", msg),
            HttpError::Stream(msg) => write!(f, "stream error: {}", msg),
        }
    }
}

impl Error for HttpError {}

/// Flow-control decision returned by the SSE line callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Keep reading events.
    Continue,
    /// Abort the stream; `post_stream` returns `Ok(())`.
    Stop,
}

/// Handle over the shared HTTPS client.
///
/// Cheap to clone; all handles share the same connection state.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Create a handle over the shared client.
    pub fn new() -> Self {
        HttpClient {
            client: SHARED_HTTP_CLIENT.clone(),
        }
    }

    /// Send an HTTPS POST with a JSON body and buffer the whole response.
    pub async fn post_json(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        require_https(url)?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_owned());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        buffer_response(response).await
    }

    /// Send an HTTPS GET and buffer the whole response.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        require_https(url)?;

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        buffer_response(response).await
    }

    /// Send an HTTPS POST and consume the response as an SSE stream.
    ///
    /// `on_data_line` receives the payload of every line that begins with
    /// `data: ` (prefix already stripped).  The stream ends when the callback
    /// returns [`StreamControl::Stop`], when the payload equals `[DONE]`, or
    /// when the server closes the connection.
    pub async fn post_stream<F>(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
        mut on_data_line: F,
    ) -> Result<(), HttpError>
    where
        F: FnMut(&str) -> StreamControl,
    {
        require_https(url)?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .body(body.to_owned());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 400 {
            // Error responses are small JSON bodies, not event streams; hand
            // the whole body to the callback so the provider layer can parse
            // the error object out of it.
            let body = response
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            on_data_line(&String::from_utf8_lossy(&body));
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        // Buffered as bytes: a TCP chunk may end mid-way through a UTF-8
        // sequence, so decoding happens per complete line only.
        let mut line_buf: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| HttpError::Stream(e.to_string()))?;
            line_buf.extend_from_slice(&chunk);

            // Dispatch every complete line; keep the unterminated tail.
            while let Some(newline) = line_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = line_buf.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(payload) = sse_data_payload(&line) {
                    if payload == SSE_DONE {
                        return Ok(());
                    }
                    if on_data_line(payload) == StreamControl::Stop {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

/// Reject anything that is not an `https://` URL.
fn require_https(url: &str) -> Result<(), HttpError> {
    if url.starts_with("https://") {
        Ok(())
    } else {
        Err(HttpError::InvalidUrl(url.to_owned()))
    }
}

/// Read status, headers, and full body from a response.
async fn buffer_response(response: reqwest::Response) -> Result<HttpResponse, HttpError> {
    let status = response.status().as_u16();
    let mut headers = String::new();
    for (name, value) in response.headers() {
        headers.push_str(name.as_str());
        headers.push_str(": ");
        headers.push_str(value.to_str().unwrap_or(""));
        headers.push_str("\r\n");
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| HttpError::Transport(e.to_string()))?;
    Ok(HttpResponse {
        status,
        body: body.to_vec(),
        headers,
    })
}

/// Extract the payload of an SSE `data: ` line.
///
/// Strips the trailing `\n` and optional `\r`.  Returns `None` for framing
/// lines (empty separators, `event:` names, comments).
fn sse_data_payload(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    line.strip_prefix(SSE_DATA_PREFIX)
}
