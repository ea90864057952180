//! Provider transports.

pub mod anthropic;
pub use anthropic::AnthropicTransport;

pub mod mock;
pub use mock::{MockOutcome, MockTransport, DEFAULT_MOCK_REPLY};
