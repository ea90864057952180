//! Anthropic (Claude) Messages API transport.
//!
//! One HTTP round-trip per call. The transport never retries and never
//! consults the cache or rate limiter; it only maps wire outcomes onto
//! [`GatewayError`] so the gateway can decide what to do next.
//!
//! # Environment Variables
//! - `ANTHROPIC_API_KEY`: API key (required by [`AnthropicTransport::from_env`])
//! - `ANTHROPIC_BASE_URL`: custom endpoint, e.g. a proxy or a local mock
//!
//! # Example
//! ```ignore
//! use edgequake_gateway::providers::AnthropicTransport;
//!
//! let transport = AnthropicTransport::from_env()?;
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{GatewayError, Result};
use crate::traits::{
    ChatMessage, ChatRole, StopReason, StreamChunk, TierCall, Transport, TransportReply,
};

/// Anthropic API base URL
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";

/// Anthropic API version (required header)
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Default per-call HTTP timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest provider error text carried into a [`GatewayError`].
const MAX_ERROR_TEXT: usize = 200;

// ============================================================================
// Anthropic API Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// SSE event for streaming responses
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: DeltaBlock },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: MessageDeltaData },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error { error: AnthropicError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaBlock {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageDeltaData {
    stop_reason: Option<String>,
}

// ============================================================================
// Error classification
// ============================================================================

fn truncate_error(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_TEXT {
        return text.to_string();
    }
    let mut short: String = text.chars().take(MAX_ERROR_TEXT).collect();
    short.push_str("...");
    short
}

/// Map an error type reported by the provider (in a body or SSE event).
fn classify_error_type(status: Option<u16>, error_type: &str, message: &str) -> GatewayError {
    let message = truncate_error(message);
    match error_type {
        "rate_limit_error" => GatewayError::RateLimited(message),
        "overloaded_error" | "api_error" => GatewayError::Transient {
            status,
            message: format!("{}: {}", error_type, message),
        },
        "invalid_request_error" | "request_too_large" => GatewayError::Permanent {
            status,
            message: format!("{}: {}", error_type, message),
            validation: true,
        },
        _ => GatewayError::Permanent {
            status,
            message: format!("{}: {}", error_type, message),
            validation: false,
        },
    }
}

/// Map a non-success HTTP response onto the gateway error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> GatewayError {
    let code = status.as_u16();
    let parsed = serde_json::from_str::<AnthropicErrorResponse>(body).ok();
    let (error_type, message) = match &parsed {
        Some(response) => (
            response.error.error_type.as_str(),
            truncate_error(&response.error.message),
        ),
        None => ("", truncate_error(body)),
    };

    if code == 429 || error_type == "rate_limit_error" {
        return GatewayError::RateLimited(message);
    }
    if status.is_server_error() || error_type == "overloaded_error" {
        return GatewayError::Transient {
            status: Some(code),
            message,
        };
    }
    GatewayError::Permanent {
        status: Some(code),
        message,
        validation: matches!(code, 400 | 413 | 422),
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental decoder for the Messages API event stream.
///
/// Bytes may split lines (and multi-byte characters) arbitrarily, so raw
/// bytes are buffered and only complete lines are decoded as UTF-8.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    stop_reason: Option<String>,
    finished: bool,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            if self.finished {
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            if let Some(chunk) = self.decode_line(line.trim_end()) {
                out.push(chunk);
            }
        }
        out
    }

    fn decode_line(&mut self, line: &str) -> Option<Result<StreamChunk>> {
        let data = line.strip_prefix("data:")?.trim_start();
        let event = match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Skipping undecodable stream event");
                return None;
            }
        };

        match event {
            StreamEvent::ContentBlockDelta { delta } if delta.delta_type == "text_delta" => {
                delta.text.filter(|t| !t.is_empty()).map(|t| Ok(StreamChunk::Delta(t)))
            }
            StreamEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                None
            }
            StreamEvent::MessageStop => {
                self.finished = true;
                Some(Ok(StreamChunk::Stop(StopReason::from_provider(
                    self.stop_reason.as_deref(),
                ))))
            }
            StreamEvent::Error { error } => {
                warn!(error_type = %error.error_type, "Stream error event");
                self.finished = true;
                Some(Err(classify_error_type(None, &error.error_type, &error.message)))
            }
            _ => None,
        }
    }
}

// ============================================================================
// AnthropicTransport Implementation
// ============================================================================

/// HTTP transport for Anthropic's Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicTransport {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    timeout: Duration,
}

impl AnthropicTransport {
    /// Create a transport with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_BASE.to_string(),
            api_version: ANTHROPIC_API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a transport from environment variables.
    ///
    /// `ANTHROPIC_API_KEY` is required; `ANTHROPIC_BASE_URL` is optional.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            GatewayError::Config("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        if api_key.trim().is_empty() {
            return Err(GatewayError::Config(
                "ANTHROPIC_API_KEY environment variable is empty".to_string(),
            ));
        }

        let mut transport = Self::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            transport = transport.with_base_url(base_url);
        }
        Ok(transport)
    }

    /// Use a custom base URL (proxy, mock server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-call HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL in use.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the messages endpoint URL.
    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Build headers for API requests.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&self.api_key).map_err(|_| {
            GatewayError::Config("API key contains invalid header characters".to_string())
        })?;
        let version = HeaderValue::from_str(&self.api_version).map_err(|_| {
            GatewayError::Config("API version contains invalid header characters".to_string())
        })?;
        headers.insert("x-api-key", api_key);
        headers.insert("anthropic-version", version);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Split system messages into the top-level `system` field.
    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts = Vec::new();
        let mut converted = Vec::with_capacity(messages.len());

        for message in messages {
            match message.role {
                ChatRole::System => system_parts.push(message.content.as_str()),
                ChatRole::User | ChatRole::Assistant => converted.push(AnthropicMessage {
                    role: message.role.as_str(),
                    content: message.content.clone(),
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, converted)
    }

    fn build_request(call: &TierCall, stream: bool) -> MessagesRequest {
        let (system, messages) = Self::convert_messages(&call.messages);
        MessagesRequest {
            model: call.model.clone(),
            max_tokens: call.max_tokens,
            messages,
            system,
            stream: stream.then_some(true),
        }
    }

    fn parse_response(response: MessagesResponse) -> TransportReply {
        let text = response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .concat();

        TransportReply {
            id: response.id,
            text,
            model: response.model,
            stop_reason: response.stop_reason,
            input_tokens: response.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: response.usage.as_ref().map(|u| u.output_tokens),
        }
    }

    /// Send a request and map non-success statuses.
    async fn send(&self, request: &MessagesRequest) -> Result<reqwest::Response> {
        debug!(model = %request.model, "Sending request to Anthropic API");

        let response = self
            .client
            .post(self.endpoint())
            .headers(self.headers()?)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status, &body);
        warn!(status = status.as_u16(), kind = %err.kind(), "Anthropic API returned an error");
        Err(err)
    }
}

#[async_trait]
impl Transport for AnthropicTransport {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip(self, call), fields(tier = %call.tier, model = %call.model))]
    async fn call(&self, call: &TierCall) -> Result<TransportReply> {
        let request = Self::build_request(call, false);
        let response = self.send(&request).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!(bytes = body.len(), "Anthropic response received");

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Permanent {
                status: Some(status),
                message: format!("malformed response body: {}", e),
                validation: false,
            })?;
        Ok(Self::parse_response(parsed))
    }

    #[instrument(skip(self, call), fields(tier = %call.tier, model = %call.model))]
    async fn stream(&self, call: &TierCall) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let request = Self::build_request(call, true);
        let response = self.send(&request).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GatewayError::from(e));
                        return;
                    }
                };
                for item in decoder.push(&chunk) {
                    let terminal = matches!(item, Ok(StreamChunk::Stop(_)) | Err(_));
                    yield item;
                    if terminal {
                        return;
                    }
                }
            }
            if !decoder.finished {
                yield Err(GatewayError::transient("stream closed before message_stop"));
            }
        };

        Ok(stream.boxed())
    }
}
