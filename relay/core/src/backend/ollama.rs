//! Ollama Backend Implementation
//!
//! Relays prompts to a local Ollama server.
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions, streamed as newline-delimited JSON
//! - `/api/tags` - List available models
//!
//! Every streamed line looks like
//! `{"message":{"role":"assistant","content":"..."},"done":false}`; the last
//! one carries `"done":true`. Failures mid-stream arrive as `{"error":"..."}`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{LlmBackend, LlmRequest, ModelInfo, StreamingToken};
use crate::config::RelayConfig;

/// One line of Ollama's streamed chat response
#[derive(Debug, Default, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    #[serde(default)]
    parameter_size: Option<String>,
}

/// Splits a byte stream into NDJSON lines
///
/// Bytes are buffered raw so multi-byte characters split across network
/// chunks are decoded intact.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed bytes, returning every complete line parsed so far
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<ChatLine, serde_json::Error>> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(parsed) = Self::parse(&line) {
                lines.push(parsed);
            }
        }
        lines
    }

    /// Parse whatever is left once the body ends without a trailing newline
    fn finish(&mut self) -> Option<Result<ChatLine, serde_json::Error>> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse(&rest)
    }

    fn parse(line: &[u8]) -> Option<Result<ChatLine, serde_json::Error>> {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(serde_json::from_str(trimmed))
    }
}

/// What to do after handling one line
enum LineOutcome {
    Continue,
    Finished,
}

/// Forward one parsed line to the relay
async fn forward_line(
    tx: &mpsc::Sender<StreamingToken>,
    line: Result<ChatLine, serde_json::Error>,
) -> LineOutcome {
    let token = match line {
        Ok(ChatLine {
            error: Some(error), ..
        }) => {
            let _ = tx.send(StreamingToken::Error(error)).await;
            return LineOutcome::Finished;
        }
        Ok(line) => line,
        Err(e) => {
            let _ = tx
                .send(StreamingToken::Error(format!("malformed response from Ollama: {e}")))
                .await;
            return LineOutcome::Finished;
        }
    };

    if let Some(message) = token.message {
        if !message.content.is_empty()
            && tx.send(StreamingToken::Token(message.content)).await.is_err()
        {
            // Receiver dropped, stop streaming
            return LineOutcome::Finished;
        }
    }

    if token.done {
        let _ = tx.send(StreamingToken::Complete).await;
        return LineOutcome::Finished;
    }

    LineOutcome::Continue
}

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Base URL, e.g. `http://localhost:11434`
    base_url: String,
    /// HTTP client
    http_client: reqwest::Client,
    /// Capacity of the token channel handed to the relay
    channel_capacity: usize,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// `host` may be a bare host name or a full `http(s)://` URL, matching
    /// what `OLLAMA_HOST` accepts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{host}:{port}")
        };

        // No overall request timeout: generations can run for minutes. Stalls
        // are caught by the relay's idle timeout instead.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            base_url,
            http_client,
            channel_capacity: 100,
        }
    }

    /// Create from relay configuration
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        let mut backend = Self::new(config.ollama_host.clone(), config.ollama_port);
        backend.channel_capacity = config.channel_capacity;
        backend
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// Build the JSON body for `/api/chat`
    fn chat_body(request: &LlmRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": true,
        })
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new("localhost", 11434)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::chat_body(request))
            .send()
            .await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let mut stream = response.bytes_stream();
        let model = request.model.clone();

        // Spawn task to process stream
        tokio::spawn(async move {
            let mut decoder = LineDecoder::default();

            loop {
                let chunk = tokio::select! {
                    // Relay went away; dropping the response closes the connection
                    () = tx.closed() => {
                        tracing::debug!(model = %model, "Ollama stream abandoned by receiver");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        for line in decoder.push(&bytes) {
                            if let LineOutcome::Finished = forward_line(&tx, line).await {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                    None => break,
                }
            }

            if let Some(line) = decoder.finish() {
                if let LineOutcome::Finished = forward_line(&tx, line).await {
                    return;
                }
            }

            // Body ended without a done marker
            let _ = tx
                .send(StreamingToken::Error(
                    "Ollama closed the stream before finishing".to_string(),
                ))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let tags: TagsResponse = response.json().await?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                name: m.name,
                size: m.size,
                parameters: m.details.and_then(|d| d.parameter_size),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const NDJSON_HEAD: &str =
        "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n";

    /// Read one HTTP request, headers and body
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            let Some(end) = text.find("\r\n\r\n") else {
                assert!(n > 0, "connection closed mid-request");
                continue;
            };
            let length = text[..end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length || n == 0 {
                return text;
            }
        }
    }

    /// Serve one canned response on a loopback port
    ///
    /// With `hold_open` the connection stays up after the response until the
    /// client hangs up. The returned receiver fires once the server is done
    /// and carries the request it saw.
    async fn serve_once(response: String, hold_open: bool) -> (OllamaBackend, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            if hold_open {
                let mut buf = [0u8; 64];
                while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
            }
            let _ = done_tx.send(request);
        });

        let backend = OllamaBackend {
            base_url: format!("http://{addr}"),
            http_client: reqwest::Client::builder().no_proxy().build().unwrap(),
            channel_capacity: 16,
        };
        (backend, done_rx)
    }

    async fn collect(mut rx: mpsc::Receiver<StreamingToken>) -> Vec<StreamingToken> {
        let mut out = Vec::new();
        while let Some(token) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
        {
            out.push(token);
        }
        out
    }

    #[tokio::test]
    async fn test_streams_chat_response() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        );
        let (backend, served) = serve_once(format!("{NDJSON_HEAD}{body}"), false).await;

        let rx = backend
            .send_streaming(&LlmRequest::new("Hi", "deepseek-r1:latest"))
            .await
            .unwrap();

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("Hel".into()),
                StreamingToken::Token("lo".into()),
                StreamingToken::Complete,
            ]
        );
        let request = served.await.unwrap();
        assert!(request.starts_with("POST /api/chat "));
        assert!(request.contains(r#""model":"deepseek-r1:latest""#));
    }

    #[tokio::test]
    async fn test_stream_without_done_is_an_error() {
        let body = concat!(r#"{"message":{"content":"Hel"},"done":false}"#, "\n");
        let (backend, _served) = serve_once(format!("{NDJSON_HEAD}{body}"), false).await;

        let rx = backend
            .send_streaming(&LlmRequest::new("Hi", "m"))
            .await
            .unwrap();

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("Hel".into()),
                StreamingToken::Error("Ollama closed the stream before finishing".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_http_error_refuses_stream() {
        let body = r#"{"error":"model 'nope' not found"}"#;
        let response = format!(
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (backend, _served) = serve_once(response, false).await;

        let err = backend
            .send_streaming(&LlmRequest::new("Hi", "nope"))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("404"), "{err}");
        assert!(err.contains("not found"), "{err}");
    }

    #[tokio::test]
    async fn test_dropped_receiver_closes_connection() {
        let body = concat!(r#"{"message":{"content":"Hel"},"done":false}"#, "\n");
        let (backend, served) = serve_once(format!("{NDJSON_HEAD}{body}"), true).await;

        let mut rx = backend
            .send_streaming(&LlmRequest::new("Hi", "m"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(StreamingToken::Token("Hel".into())));
        drop(rx);

        // The server only finishes once the client hangs up
        tokio::time::timeout(Duration::from_secs(5), served)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_ollama_backend_creation() {
        let backend = OllamaBackend::new("localhost", 11434);
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(backend.chat_url(), "http://localhost:11434/api/chat");

        let backend = OllamaBackend::new("http://10.0.0.5:9999/", 11434);
        assert_eq!(backend.base_url(), "http://10.0.0.5:9999");
    }

    #[test]
    fn test_from_config() {
        let mut config = RelayConfig::default();
        config.ollama_host = "example.com".to_string();
        config.ollama_port = 8080;
        config.channel_capacity = 7;
        let backend = OllamaBackend::from_config(&config);
        assert_eq!(backend.base_url(), "http://example.com:8080");
        assert_eq!(backend.channel_capacity, 7);
    }

    #[test]
    fn test_chat_body() {
        let body = OllamaBackend::chat_body(&LlmRequest::new("Hi", "deepseek-r1:latest"));
        assert_eq!(body["model"], "deepseek-r1:latest");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hi");
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_line_decoder_handles_split_lines() {
        let mut decoder = LineDecoder::default();
        let first = decoder.push(br#"{"message":{"role":"assistant","content":"He"},"done":false}
{"message":{"role":"assis"#);
        assert_eq!(first.len(), 1);
        let line = first.into_iter().next().unwrap().unwrap();
        assert_eq!(line.message.unwrap().content, "He");

        let second = decoder.push(br#"tant","content":"llo"},"done":true}
"#);
        assert_eq!(second.len(), 1);
        let line = second.into_iter().next().unwrap().unwrap();
        assert!(line.done);
        assert_eq!(line.message.unwrap().content, "llo");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_line_decoder_keeps_split_utf8_intact() {
        let mut decoder = LineDecoder::default();
        let line = r#"{"message":{"content":"héllo"},"done":false}"#.as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        assert!(decoder.push(&line[..split]).is_empty());
        let mut lines = decoder.push(&line[split..]);
        assert!(lines.is_empty());
        lines.extend(decoder.finish());

        let parsed = lines.into_iter().next().unwrap().unwrap();
        assert_eq!(parsed.message.unwrap().content, "héllo");
    }

    #[tokio::test]
    async fn test_forward_line_variants() {
        let (tx, mut rx) = mpsc::channel(8);

        let line: ChatLine =
            serde_json::from_str(r#"{"message":{"content":"a"},"done":false}"#).unwrap();
        assert!(matches!(forward_line(&tx, Ok(line)).await, LineOutcome::Continue));
        assert_eq!(rx.recv().await, Some(StreamingToken::Token("a".into())));

        let line: ChatLine = serde_json::from_str(r#"{"error":"model not found"}"#).unwrap();
        assert!(matches!(forward_line(&tx, Ok(line)).await, LineOutcome::Finished));
        assert_eq!(
            rx.recv().await,
            Some(StreamingToken::Error("model not found".into()))
        );

        let line: ChatLine = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(matches!(forward_line(&tx, Ok(line)).await, LineOutcome::Finished));
        assert_eq!(rx.recv().await, Some(StreamingToken::Complete));
    }
}
