//! Mock transport for testing.
//!
//! Outcomes are scripted per tier and consumed in order; once a tier's queue
//! is empty every call gets the default reply. Every call is logged so tests
//! can assert on what reached the "provider".
//!
//! ```
//! use edgequake_gateway::providers::MockTransport;
//! use edgequake_gateway::Tier;
//!
//! let transport = MockTransport::new();
//! transport.push_status(Tier::Powerful, 500);
//! transport.push_reply(Tier::Powerful, "Hello!");
//! ```

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::traits::{StopReason, StreamChunk, Tier, TierCall, Transport, TransportReply};

/// Reply used when a tier has nothing scripted.
pub const DEFAULT_MOCK_REPLY: &str = "Default mock response";

/// One scripted outcome.
#[derive(Debug)]
pub enum MockOutcome {
    /// Successful reply.
    Reply(TransportReply),
    /// Failure returned as-is.
    Error(GatewayError),
}

/// Scripted [`Transport`] used by unit and integration tests.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    scripts: Arc<Mutex<HashMap<Tier, VecDeque<MockOutcome>>>>,
    calls: Arc<Mutex<Vec<TierCall>>>,
    latency: Option<Duration>,
}

impl MockTransport {
    /// Create a mock with empty scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` (tokio time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a successful text reply for `tier`.
    pub fn push_reply(&self, tier: Tier, text: impl Into<String>) {
        self.push_outcome(tier, MockOutcome::Reply(TransportReply::text(text)));
    }

    /// Queue a fully specified reply for `tier`.
    pub fn push_transport_reply(&self, tier: Tier, reply: TransportReply) {
        self.push_outcome(tier, MockOutcome::Reply(reply));
    }

    /// Queue an error for `tier`.
    pub fn push_error(&self, tier: Tier, error: GatewayError) {
        self.push_outcome(tier, MockOutcome::Error(error));
    }

    /// Queue an HTTP status failure for `tier`, classified like the real transport.
    pub fn push_status(&self, tier: Tier, status: u16) {
        let message = format!("mock HTTP {}", status);
        let error = match status {
            429 => GatewayError::RateLimited(message),
            s if s >= 500 => GatewayError::Transient {
                status: Some(s),
                message,
            },
            s => GatewayError::Permanent {
                status: Some(s),
                message,
                validation: matches!(s, 400 | 413 | 422),
            },
        };
        self.push_error(tier, error);
    }

    fn push_outcome(&self, tier: Tier, outcome: MockOutcome) {
        self.scripts.lock().entry(tier).or_default().push_back(outcome);
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<TierCall> {
        self.calls.lock().clone()
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls received for one tier.
    pub fn calls_for(&self, tier: Tier) -> usize {
        self.calls.lock().iter().filter(|c| c.tier == tier).count()
    }

    async fn next_outcome(&self, call: &TierCall) -> Result<TransportReply> {
        self.calls.lock().push(call.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&call.tier)
            .and_then(|queue| queue.pop_front());

        let mut reply = match scripted {
            Some(MockOutcome::Reply(reply)) => reply,
            Some(MockOutcome::Error(error)) => return Err(error),
            None => TransportReply::text(DEFAULT_MOCK_REPLY),
        };
        if reply.id.is_empty() {
            reply.id = format!("mock-{}", self.call_count());
        }
        if reply.model.is_empty() {
            reply.model = call.model.clone();
        }
        Ok(reply)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, call: &TierCall) -> Result<TransportReply> {
        self.next_outcome(call).await
    }

    async fn stream(&self, call: &TierCall) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let reply = self.next_outcome(call).await?;
        let stop = StopReason::from_provider(reply.stop_reason.as_deref());

        let mut chunks: Vec<Result<StreamChunk>> = reply
            .text
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::Delta(word.to_string())))
            .collect();
        chunks.push(Ok(StreamChunk::Stop(stop)));
        Ok(stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn call(tier: Tier) -> TierCall {
        TierCall {
            tier,
            model: "mock-model".to_string(),
            max_tokens: 10,
            messages: vec![crate::traits::ChatMessage::user("Hi")],
        }
    }

    #[tokio::test]
    async fn test_default_reply() {
        let transport = MockTransport::new();
        let reply = transport.call(&call(Tier::Fast)).await.unwrap();
        assert_eq!(reply.text, DEFAULT_MOCK_REPLY);
        assert_eq!(reply.model, "mock-model");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_sequence_per_tier() {
        let transport = MockTransport::new();
        transport.push_status(Tier::Balanced, 500);
        transport.push_reply(Tier::Balanced, "ok");
        transport.push_reply(Tier::Fast, "fast");

        let err = transport.call(&call(Tier::Balanced)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transient { status: Some(500), .. }));
        assert_eq!(transport.call(&call(Tier::Balanced)).await.unwrap().text, "ok");
        assert_eq!(transport.call(&call(Tier::Fast)).await.unwrap().text, "fast");
        assert_eq!(transport.calls_for(Tier::Balanced), 2);
    }

    #[tokio::test]
    async fn test_push_status_classification() {
        let transport = MockTransport::new();
        for status in [429, 400, 404] {
            transport.push_status(Tier::Fast, status);
        }
        let rate = transport.call(&call(Tier::Fast)).await.unwrap_err();
        assert!(matches!(rate, GatewayError::RateLimited(_)));
        let invalid = transport.call(&call(Tier::Fast)).await.unwrap_err();
        assert!(invalid.is_validation_shaped());
        let not_found = transport.call(&call(Tier::Fast)).await.unwrap_err();
        assert!(!not_found.is_validation_shaped());
        assert!(not_found.is_recoverable());
    }

    #[tokio::test]
    async fn test_stream_chunks() {
        let transport = MockTransport::new();
        transport.push_reply(Tier::Fast, "Hello there world");
        let chunks: Vec<StreamChunk> = transport
            .stream(&call(Tier::Fast))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], StreamChunk::Delta("Hello ".to_string()));
        assert_eq!(chunks[3], StreamChunk::Stop(StopReason::EndTurn));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let transport = MockTransport::new().with_latency(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        transport.call(&call(Tier::Fast)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
