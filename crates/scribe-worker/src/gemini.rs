//! Gemini speech-to-text client.
//!
//! Sends the segment inline (base64) to `streamGenerateContent?alt=sse` and
//! reads the reply as a stream of server-sent events, each carrying a
//! fragment of the transcript. Long segments therefore never hit a single
//! response timeout; the caller's deadline still bounds the whole exchange,
//! and dropping the stream aborts the HTTP request.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use scribe_store::RetryPolicy;

use crate::error::{WorkerError, WorkerResult};
use crate::transcriber::Transcriber;

const PROMPT: &str = "Transcribe the audio. Return only the transcript in the original language.";

/// Gemini client settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    /// Timeout for establishing the stream (not for reading it)
    pub connect_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.2,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| WorkerError::config_error("GEMINI_API_KEY not set"))?;
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Transcript text carried by one event payload, if any.
fn fragment_text(data: &str) -> WorkerResult<Option<String>> {
    let response: GenerateResponse = serde_json::from_str(data)
        .map_err(|e| WorkerError::transcription(format!("Malformed stream event: {}", e)))?;
    let text: String = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
        .unwrap_or_default();
    Ok((!text.is_empty()).then_some(text))
}

/// Incremental server-sent-events decoder.
///
/// Bytes may split anywhere, including inside a UTF-8 sequence, so input is
/// buffered until a full line is available.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed bytes; returns the data of every event completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flush a trailing event not followed by a blank line.
    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let rest = String::from_utf8_lossy(&rest);
            self.line(rest.trim_end_matches(['\n', '\r']), &mut events);
        }
        self.line("", &mut events);
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(std::mem::take(&mut self.data).join("\n"));
            }
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Comments, `event:` and `id:` lines carry nothing we use.
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Streaming Gemini transcriber.
pub struct GeminiTranscriber {
    client: Client,
    config: GeminiConfig,
    retry: RetryPolicy,
}

impl GeminiTranscriber {
    pub fn new(config: GeminiConfig) -> WorkerResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| WorkerError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            // Busy or overloaded model: back off 5s, 10s
            retry: RetryPolicy::linear(3, Duration::from_secs(5)),
        })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Open the event stream for one audio payload.
    async fn open(&self, audio_b64: &str, mime_type: &str) -> WorkerResult<reqwest::Response> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    RequestPart::Text { text: PROMPT },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type,
                            data: audio_b64.to_string(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    WorkerError::unavailable(format!("Gemini request failed: {}", e))
                } else {
                    WorkerError::transcription(format!("Gemini request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("Gemini API returned {}: {}", status, body);
        if matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        ) {
            Err(WorkerError::unavailable(message))
        } else {
            Err(WorkerError::transcription(message))
        }
    }

    /// Transcript fragments in arrival order.
    pub async fn stream(
        &self,
        audio: &Path,
        mime_type: &str,
    ) -> WorkerResult<BoxStream<'static, WorkerResult<String>>> {
        let bytes = tokio::fs::read(audio).await?;
        let audio_b64 = BASE64.encode(&bytes);
        debug!(
            model = %self.config.model,
            audio_bytes = bytes.len(),
            "Opening Gemini transcription stream"
        );

        let response = self
            .retry
            .run("gemini_stream", WorkerError::is_retryable, || {
                self.open(&audio_b64, mime_type)
            })
            .await?;

        let state = StreamState {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        Ok(stream::unfold(state, |mut st| async move {
            loop {
                if let Some(data) = st.pending.pop_front() {
                    match fragment_text(&data) {
                        Ok(Some(text)) => return Some((Ok(text), st)),
                        Ok(None) => continue,
                        Err(e) => {
                            st.pending.clear();
                            st.finished = true;
                            return Some((Err(e), st));
                        }
                    }
                }
                if st.finished {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(bytes)) => {
                        let events = st.decoder.push(&bytes);
                        st.pending.extend(events);
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((
                            Err(WorkerError::transcription(format!("Stream error: {}", e))),
                            st,
                        ));
                    }
                    None => {
                        st.finished = true;
                        let events = st.decoder.finish();
                        st.pending.extend(events);
                    }
                }
            }
        })
        .boxed())
    }
}

#[async_trait]
impl Transcriber for GeminiTranscriber {
    async fn transcribe(&self, audio: &Path, mime_type: &str) -> WorkerResult<String> {
        let mut fragments = self.stream(audio, mime_type).await?;
        let mut text = String::new();
        let mut count = 0usize;
        while let Some(fragment) = fragments.next().await {
            text.push_str(&fragment?);
            count += 1;
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(WorkerError::transcription("Empty transcript from model"));
        }
        info!(
            model = %self.config.model,
            fragments = count,
            chars = text.chars().count(),
            "Transcription stream finished"
        );
        Ok(text)
    }
}
