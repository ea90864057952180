//! Gateway error types with retry strategies.
//!
//! # Error Handling Philosophy
//!
//! Every error the gateway surfaces carries a machine-readable [`ErrorKind`]
//! and a human-readable message. Messages never embed the caller's prompt.
//!
//! | Kind | Raised by | Gateway reaction |
//! |------|-----------|------------------|
//! | `Validation` | empty/oversized prompt, unknown tier, 400-class rejects | returned immediately |
//! | `Transient` | 429, `overloaded_error`, 5xx, network I/O | backoff, retry same tier, then fall through |
//! | `Permanent` | other 4xx, malformed provider replies | fall through to next tier |
//! | `Cancelled` / `Timeout` | caller context | returned immediately |
//! | `Unavailable` | every planned tier exhausted | degraded response |
//!
//! # Retry Strategies
//!
//! Each error maps onto a [`RetryStrategy`]:
//! - `ExponentialBackoff`: retry the same tier after a jittered delay
//! - `Fallback`: skip to the next tier in the plan
//! - `Abort`: stop and return the error to the caller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

// ============================================================================
// Error Kind
// ============================================================================

/// Coarse error taxonomy exposed to callers and recorded in degraded responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request; never retried, never cached.
    Validation,
    /// Rate limited, overloaded or network failure; retried within a tier.
    Transient,
    /// Provider rejected the call; the next tier is tried.
    Permanent,
    /// The caller cancelled the operation.
    Cancelled,
    /// The caller's deadline (or the limiter's wait bound) expired.
    Timeout,
    /// All tiers in the plan were exhausted.
    Unavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Retry Strategy
// ============================================================================

/// What the gateway should do after a failed tier attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry the same tier with exponential backoff (transient errors).
    ExponentialBackoff {
        /// Initial delay before first retry.
        base_delay: Duration,
        /// Maximum delay between retries.
        max_delay: Duration,
        /// Maximum number of attempts on one tier.
        max_attempts: u32,
    },

    /// Give up on this tier and try the next one in the plan.
    Fallback,

    /// Stop processing the request entirely.
    Abort,
}

impl RetryStrategy {
    /// Default backoff for transient provider errors: 500 ms base, 8 s cap, 3 attempts.
    pub fn transient_backoff() -> Self {
        Self::ExponentialBackoff {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 3,
        }
    }

    /// Check if this strategy retries the same tier.
    pub fn retries_same_tier(&self) -> bool {
        matches!(self, Self::ExponentialBackoff { .. })
    }

    /// Check if this strategy continues with the request at all.
    pub fn should_continue(&self) -> bool {
        !matches!(self, Self::Abort)
    }
}

// ============================================================================
// Gateway Error Types
// ============================================================================

/// Errors that can occur in gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request failed validation before any provider call.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Prompt exceeds the configured token ceiling.
    #[error("Token limit exceeded: max {max}, got {got}")]
    TokenLimitExceeded { max: usize, got: usize },

    /// Tier name or tier lookup not present in the configuration.
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    /// Provider signalled rate limiting.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Retryable provider or network failure.
    #[error("Transient error{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Non-retryable provider failure.
    #[error("Provider error{}: {message}", status_suffix(.status))]
    Permanent {
        status: Option<u16>,
        message: String,
        /// The provider rejected the request itself, not the model serving it.
        validation: bool,
    },

    /// Provider reply could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller's deadline expired.
    #[error("Request timed out")]
    Timeout,

    /// Every tier in the plan failed.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Transient {
                status: None,
                message: "HTTP request timed out".to_string(),
            }
        } else if err.is_connect() {
            GatewayError::Transient {
                status: None,
                message: format!("Connection failed: {}", err),
            }
        } else if err.is_decode() {
            GatewayError::Permanent {
                status: err.status().map(|s| s.as_u16()),
                message: format!("Malformed response: {}", err),
                validation: false,
            }
        } else {
            GatewayError::Transient {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

impl From<crate::config::ConfigError> for GatewayError {
    fn from(err: crate::config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

// ============================================================================
// Classification
// ============================================================================

impl GatewayError {
    /// Shorthand for a transient error without an HTTP status.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            status: None,
            message: message.into(),
        }
    }

    /// Shorthand for a server-shaped permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            status: None,
            message: message.into(),
            validation: false,
        }
    }

    /// Machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::TokenLimitExceeded { .. }
            | Self::UnknownTier(_)
            | Self::Config(_) => ErrorKind::Validation,
            Self::RateLimited(_) | Self::Transient { .. } => ErrorKind::Transient,
            Self::Permanent { .. } | Self::Serialization(_) => ErrorKind::Permanent,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Whether a provider rejected the request body itself.
    ///
    /// Such failures would repeat on every tier, so the gateway returns them
    /// without falling back.
    pub fn is_validation_shaped(&self) -> bool {
        match self {
            Self::Permanent { validation, .. } => *validation,
            other => other.kind() == ErrorKind::Validation,
        }
    }

    /// Get the retry strategy for this error.
    ///
    /// # Example
    ///
    /// ```
    /// use edgequake_gateway::{GatewayError, RetryStrategy};
    ///
    /// let error = GatewayError::transient("connection reset");
    /// assert!(error.retry_strategy().retries_same_tier());
    /// ```
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            Self::RateLimited(_) | Self::Transient { .. } => RetryStrategy::transient_backoff(),
            Self::Permanent { validation, .. } if !validation => RetryStrategy::Fallback,
            Self::Serialization(_) => RetryStrategy::Fallback,
            _ => RetryStrategy::Abort,
        }
    }

    /// Check if this error is recoverable by the gateway (retry or fallback).
    pub fn is_recoverable(&self) -> bool {
        self.retry_strategy().should_continue()
    }

    /// Get a user-friendly description of the error with suggested action.
    ///
    /// # Example
    ///
    /// ```
    /// use edgequake_gateway::GatewayError;
    ///
    /// let error = GatewayError::Timeout;
    /// assert!(error.user_description().contains("timed out"));
    /// ```
    pub fn user_description(&self) -> String {
        match self {
            Self::Validation(msg) => {
                format!("Invalid input provided ({}). Please check your input and try again.", msg)
            }
            Self::TokenLimitExceeded { max, got } => format!(
                "Prompt too large ({}/{} tokens). Shorten the prompt and try again.",
                got, max
            ),
            Self::UnknownTier(tier) => format!(
                "Tier '{}' is not configured. Use one of fast, balanced, powerful or auto.",
                tier
            ),
            Self::RateLimited(_) => "Rate limited by the LLM service. Waiting before retry...".to_string(),
            Self::Transient { .. } => {
                "Unable to reach the LLM service. Please check your connection and try again."
                    .to_string()
            }
            Self::Permanent { .. } => "The LLM service rejected the request.".to_string(),
            Self::Serialization(_) => {
                "Failed to parse the LLM service response. This may be a temporary issue."
                    .to_string()
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
            Self::Timeout => "Request timed out. The service may be overloaded.".to_string(),
            Self::Unavailable(_) => {
                "The LLM service is currently unavailable. Please try again later.".to_string()
            }
            Self::Config(msg) => format!("Configuration error: {}.", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GatewayError::Validation("prompt is empty".to_string());
        assert_eq!(error.to_string(), "Invalid request: prompt is empty");

        let error = GatewayError::RateLimited("too many requests".to_string());
        assert_eq!(error.to_string(), "Rate limit exceeded: too many requests");

        let error = GatewayError::Timeout;
        assert_eq!(error.to_string(), "Request timed out");
    }

    #[test]
    fn test_error_display_with_status() {
        let error = GatewayError::Transient {
            status: Some(503),
            message: "overloaded".to_string(),
        };
        assert_eq!(error.to_string(), "Transient error (HTTP 503): overloaded");

        let error = GatewayError::transient("connection reset");
        assert_eq!(error.to_string(), "Transient error: connection reset");
    }

    #[test]
    fn test_token_limit_display() {
        let error = GatewayError::TokenLimitExceeded {
            max: 200_000,
            got: 200_001,
        };
        assert_eq!(
            error.to_string(),
            "Token limit exceeded: max 200000, got 200001"
        );
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: GatewayError = json_err.into();
        assert!(matches!(error, GatewayError::Serialization(_)));
        assert_eq!(error.kind(), ErrorKind::Permanent);
    }

    // ========================================================================
    // Kind Tests
    // ========================================================================

    #[test]
    fn test_kinds() {
        assert_eq!(
            GatewayError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            GatewayError::UnknownTier("ultra".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            GatewayError::RateLimited("x".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(GatewayError::permanent("x").kind(), ErrorKind::Permanent);
        assert_eq!(GatewayError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(GatewayError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            GatewayError::Unavailable("x".into()).kind(),
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::Unavailable).unwrap();
        assert_eq!(json, "\"unavailable\"");
        assert_eq!(ErrorKind::Transient.to_string(), "transient");
    }

    #[test]
    fn test_validation_shaped() {
        let rejected = GatewayError::Permanent {
            status: Some(400),
            message: "messages: field required".to_string(),
            validation: true,
        };
        assert!(rejected.is_validation_shaped());
        assert!(!GatewayError::permanent("not found").is_validation_shaped());
        assert!(GatewayError::Validation("empty".into()).is_validation_shaped());
        assert!(!GatewayError::transient("reset").is_validation_shaped());
    }

    // ========================================================================
    // Retry Strategy Tests
    // ========================================================================

    #[test]
    fn test_transient_retry_strategy() {
        let error = GatewayError::transient("connection failed");
        match error.retry_strategy() {
            RetryStrategy::ExponentialBackoff {
                base_delay,
                max_delay,
                max_attempts,
            } => {
                assert_eq!(base_delay, Duration::from_millis(500));
                assert_eq!(max_delay, Duration::from_secs(8));
                assert_eq!(max_attempts, 3);
            }
            other => panic!("Expected ExponentialBackoff, got {:?}", other),
        }
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_rate_limited_retries_same_tier() {
        let error = GatewayError::RateLimited("slow down".into());
        assert!(error.retry_strategy().retries_same_tier());
    }

    #[test]
    fn test_permanent_falls_back() {
        let error = GatewayError::permanent("model not found");
        assert_eq!(error.retry_strategy(), RetryStrategy::Fallback);
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_validation_shaped_permanent_aborts() {
        let error = GatewayError::Permanent {
            status: Some(400),
            message: "bad".into(),
            validation: true,
        };
        assert_eq!(error.retry_strategy(), RetryStrategy::Abort);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_caller_errors_abort() {
        assert_eq!(GatewayError::Cancelled.retry_strategy(), RetryStrategy::Abort);
        assert_eq!(GatewayError::Timeout.retry_strategy(), RetryStrategy::Abort);
        assert_eq!(
            GatewayError::Validation("x".into()).retry_strategy(),
            RetryStrategy::Abort
        );
    }

    // ========================================================================
    // User Description Tests
    // ========================================================================

    #[test]
    fn test_user_descriptions() {
        assert!(GatewayError::Timeout.user_description().contains("timed out"));
        assert!(GatewayError::transient("x")
            .user_description()
            .contains("connection"));
        assert!(GatewayError::TokenLimitExceeded { max: 10, got: 12 }
            .user_description()
            .contains("12/10"));
        assert!(GatewayError::Unavailable("all tiers failed".into())
            .user_description()
            .contains("unavailable"));
    }
}
