// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Classification of model/transport failures and backoff pacing.
//!
//! Errors are classified by textual signature because they cross several
//! layers (reqwest, the endpoint's error body, OS-level connect errors) and
//! only the message survives the trip.  Tool-level failures never reach this
//! module — those are values fed back to the model, not errors.

use std::time::Duration;

/// Failure class for a model or transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Endpoint unreachable (refused, DNS failure, socket error).
    ConnectionRefused,
    /// The request or stream exceeded its deadline.
    Timeout,
    /// The endpoint answered with a 5xx status.
    ServerError,
    /// The request exceeded the model's context window.
    ContextOverflow,
    /// Anything else; not retried.
    Other,
}

impl ErrorClass {
    /// Retry budget for this class.  `ContextOverflow` is special-cased by
    /// the loop (trim history, retry once) rather than paced here.
    pub fn max_retries(self) -> u32 {
        match self {
            ErrorClass::ConnectionRefused => 5,
            ErrorClass::Timeout => 4,
            ErrorClass::ServerError => 6,
            ErrorClass::ContextOverflow => 1,
            ErrorClass::Other => 0,
        }
    }

    pub fn is_retryable(self) -> bool {
        self.max_retries() > 0
    }
}

/// Classify an error by its message text.
pub fn classify(message: &str) -> ErrorClass {
    let msg = message.to_lowercase();

    if msg.contains("context length")
        || msg.contains("context_length")
        || msg.contains("maximum context")
        || msg.contains("too long")
        || msg.contains("token limit")
        || msg.contains("exceed_context_size")
    {
        return ErrorClass::ContextOverflow;
    }
    if msg.contains("econnrefused")
        || msg.contains("connection refused")
        || msg.contains("enotfound")
        || msg.contains("fetch failed")
        || msg.contains("dns error")
        || msg.contains("error sending request")
    {
        return ErrorClass::ConnectionRefused;
    }
    if msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("etimedout")
        || msg.contains("aborterror")
        || msg.contains("operation was canceled")
    {
        return ErrorClass::Timeout;
    }
    if msg.contains("endpoint error 5")
        || msg.contains("status 5")
        || msg.contains("internal server error")
        || msg.contains("bad gateway")
        || msg.contains("service unavailable")
        || msg.contains("overloaded")
    {
        return ErrorClass::ServerError;
    }

    ErrorClass::Other
}

/// Base delay before the first retry.
const BACKOFF_BASE: Duration = Duration::from_millis(2500);
/// Growth factor per attempt.
const BACKOFF_FACTOR: f64 = 1.5;
/// Hard ceiling on any single backoff sleep.
const BACKOFF_CAP: Duration = Duration::from_secs(20);

/// Exponential backoff delay for the given zero-based attempt number.
pub fn backoff_delay(attempt: u32) -> Duration {
    let millis = BACKOFF_BASE.as_millis() as f64 * BACKOFF_FACTOR.powi(attempt as i32);
    Duration::from_millis(millis as u64).min(BACKOFF_CAP)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_signatures() {
        assert_eq!(classify("ECONNREFUSED 127.0.0.1:1234"), ErrorClass::ConnectionRefused);
        assert_eq!(classify("fetch failed"), ErrorClass::ConnectionRefused);
        assert_eq!(classify("getaddrinfo ENOTFOUND host"), ErrorClass::ConnectionRefused);
    }

    #[test]
    fn timeout_signatures() {
        assert_eq!(classify("request timed out"), ErrorClass::Timeout);
        assert_eq!(classify("AbortError: aborted"), ErrorClass::Timeout);
        assert_eq!(classify("ETIMEDOUT"), ErrorClass::Timeout);
    }

    #[test]
    fn server_error_signatures() {
        assert_eq!(classify("endpoint error 503: overloaded"), ErrorClass::ServerError);
        assert_eq!(classify("Bad Gateway"), ErrorClass::ServerError);
    }

    #[test]
    fn context_overflow_signatures() {
        assert_eq!(
            classify("This model's maximum context length is 8192 tokens"),
            ErrorClass::ContextOverflow
        );
        assert_eq!(classify("prompt is too long"), ErrorClass::ContextOverflow);
        assert_eq!(classify("token limit exceeded"), ErrorClass::ContextOverflow);
    }

    #[test]
    fn overflow_wins_over_server_error() {
        // An endpoint may report overflow inside a 500 body; trimming is the
        // useful reaction, not blind retry.
        assert_eq!(
            classify("endpoint error 500: context length exceeded"),
            ErrorClass::ContextOverflow
        );
    }

    #[test]
    fn unknown_is_other() {
        assert_eq!(classify("invalid api key"), ErrorClass::Other);
        assert!(!ErrorClass::Other.is_retryable());
    }

    #[test]
    fn retry_budgets() {
        assert_eq!(ErrorClass::ConnectionRefused.max_retries(), 5);
        assert_eq!(ErrorClass::Timeout.max_retries(), 4);
        assert_eq!(ErrorClass::ServerError.max_retries(), 6);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(backoff_delay(0) >= Duration::from_secs(2));
        assert!(backoff_delay(1) > backoff_delay(0));
        assert!(backoff_delay(20) <= Duration::from_secs(20));
    }
}
