//! Client for the external AI token-generation service. The service pushes
//! tokens; this client re-exposes them as a channel the realtime hub drains,
//! so cancellation is just dropping the receiver.

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ai::mentions::AiKind;

/// One step of a streamed AI response.
#[derive(Debug, Clone)]
pub enum AiEvent {
    Chunk {
        current_chunk: String,
        is_code_block: bool,
    },
    Complete {
        content: String,
        completion_tokens: u64,
        total_tokens: u64,
    },
    Error {
        message: String,
    },
}

/// Abstraction over the token service so the hub can be exercised with a
/// scripted provider in tests.
pub trait AiProvider: Send + Sync {
    fn stream(&self, kind: AiKind, query: &str) -> mpsc::Receiver<AiEvent>;
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    chunk: Option<String>,
    #[serde(rename = "isCodeBlock", default)]
    is_code_block: bool,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    content: Option<String>,
    #[serde(rename = "completionTokens", default)]
    completion_tokens: u64,
    #[serde(rename = "totalTokens", default)]
    total_tokens: u64,
    #[serde(default)]
    error: Option<String>,
}

/// Streams newline-delimited JSON frames from the AI service's completion
/// endpoint.
pub struct HttpAiClient {
    http: Arc<reqwest::Client>,
    base_url: String,
}

impl HttpAiClient {
    pub fn new(http: Arc<reqwest::Client>, base_url: String) -> Self {
        Self { http, base_url }
    }

    async fn run_stream(
        http: Arc<reqwest::Client>,
        url: String,
        kind: AiKind,
        query: String,
        tx: mpsc::Sender<AiEvent>,
    ) {
        let response = http
            .post(&url)
            .json(&serde_json::json!({ "persona": kind.handle(), "query": query }))
            .send()
            .await;
        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let _ = tx
                    .send(AiEvent::Error {
                        message: format!("AI service answered {}", response.status()),
                    })
                    .await;
                return;
            },
            Err(err) => {
                let _ = tx.send(AiEvent::Error { message: err.to_string() }).await;
                return;
            },
        };

        let mut buffer = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    let _ = tx.send(AiEvent::Error { message: err.to_string() }).await;
                    return;
                },
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if line.is_empty() {
                    continue;
                }
                let frame: StreamFrame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "undecodable AI stream frame skipped");
                        continue;
                    },
                };
                if let Some(message) = frame.error {
                    let _ = tx.send(AiEvent::Error { message }).await;
                    return;
                }
                if frame.done {
                    let _ = tx
                        .send(AiEvent::Complete {
                            content: frame.content.unwrap_or_default(),
                            completion_tokens: frame.completion_tokens,
                            total_tokens: frame.total_tokens,
                        })
                        .await;
                    return;
                }
                if let Some(current_chunk) = frame.chunk {
                    // Receiver dropped means the client disconnected; stop
                    // pulling tokens.
                    if tx
                        .send(AiEvent::Chunk {
                            current_chunk,
                            is_code_block: frame.is_code_block,
                        })
                        .await
                        .is_err()
                    {
                        debug!("AI stream consumer went away, cancelling");
                        return;
                    }
                }
            }
        }
        let _ = tx
            .send(AiEvent::Error { message: "AI stream ended without completion".to_string() })
            .await;
    }
}

impl AiProvider for HttpAiClient {
    fn stream(&self, kind: AiKind, query: &str) -> mpsc::Receiver<AiEvent> {
        let (tx, rx) = mpsc::channel(64);
        let http = Arc::clone(&self.http);
        let url = format!("{}/v1/stream", self.base_url.trim_end_matches('/'));
        let query = query.to_string();
        tokio::spawn(Self::run_stream(http, url, kind, query, tx));
        rx
    }
}
