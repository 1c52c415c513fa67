//! Retry mechanism with exponential backoff and jitter
//!
//! Wraps one logical operation with bounded retries over transient failures
//! (resets, timeouts, throttling and server errors). Classification is a pure
//! function of the error so it can be tested without any network I/O.

use std::time::Duration;

use crate::error::{Error, Result};

/// HTTP statuses treated as transient unless configured otherwise
pub const DEFAULT_RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Retry policy shared by every request issued through one backend
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    /// Upper bound of the exponential part of the delay
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Delay is randomized by up to this many milliseconds either way
    pub jitter_ms: u64,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
            jitter_ms: 250,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Map an error status to a transient or permanent error
    pub fn classify_status(&self, status: u16, url: &str, body_hint: &str) -> Error {
        if self.retryable_statuses.contains(&status) {
            Error::transient_status(status, url)
        } else {
            let message = match status {
                401 => "authentication required".to_string(),
                403 => "access denied".to_string(),
                404 => "resource not found".to_string(),
                _ if body_hint.is_empty() => "request rejected".to_string(),
                _ => body_hint.to_string(),
            };
            Error::permanent(status, url, message)
        }
    }
}

/// Outcome of classifying a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Fail,
}

/// Whether an operation may be repeated after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Repeating has no additional effect (GET, HEAD, DELETE, preflights)
    Idempotent,
    /// A preflight showed the server accepted the request before any body
    /// was sent, so a failed attempt left nothing behind
    ProvenSafe,
    /// Exactly one attempt is made
    NonIdempotent,
}

impl Idempotency {
    pub fn allows_retry(self) -> bool {
        !matches!(self, Idempotency::NonIdempotent)
    }
}

/// Classify an error as retryable or not
pub fn classify(error: &Error) -> RetryDecision {
    match error {
        Error::TransientTransport { .. } => RetryDecision::Retry,
        Error::InvalidUri(_)
        | Error::AuthConfiguration(_)
        | Error::PoolExhausted { .. }
        | Error::PermanentRequest { .. }
        | Error::RetriesExhausted { .. }
        | Error::AlreadyExists(_)
        | Error::Unsupported(_)
        | Error::Config(_) => RetryDecision::Fail,
        Error::Io(e) => {
            // Retryable I/O errors
            if matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ) {
                RetryDecision::Retry
            } else {
                RetryDecision::Fail
            }
        }
    }
}

/// Check if an error is retryable (transient)
pub fn is_retryable_error(error: &Error) -> bool {
    classify(error) == RetryDecision::Retry
}

/// Retry a fallible async operation with exponential backoff
///
/// # Arguments
/// * `policy` - Retry policy
/// * `operation` - Async closure that returns `Result<T>`
/// * `is_retryable` - Closure that determines if an error should trigger retry
///
/// Non-retryable errors are returned unchanged. When every attempt failed
/// with a retryable error the last one is wrapped in
/// [`Error::RetriesExhausted`].
///
/// # Example
/// ```ignore
/// let result = retry_with_backoff(
///     &policy,
///     || async { backend.read(&uri, None).await },
///     is_retryable_error,
/// ).await;
/// ```
pub async fn retry_with_backoff<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                if attempt >= max_attempts {
                    tracing::warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }

                let backoff = calculate_backoff(policy, attempt);
                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Retrying after transient error"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Runs operations under one shared [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation`, retrying transient failures when `idempotency`
    /// allows it
    ///
    /// A non-idempotent operation gets a single attempt and its failure is
    /// surfaced directly.
    pub async fn execute<T, F, Fut>(&self, idempotency: Idempotency, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if idempotency.allows_retry() {
            retry_with_backoff(&self.policy, operation, is_retryable_error).await
        } else {
            let mut operation = operation;
            operation().await
        }
    }
}

/// Calculate backoff duration with jitter
///
/// `min(cap, base * multiplier^(attempt-1)) ± jitter`, never below zero.
fn calculate_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let base_ms = policy.initial_backoff_ms as f64 * policy.multiplier.max(1.0).powi(exponent);
    let capped_ms = base_ms.min(policy.max_backoff_ms as f64) as u64;

    let jitter = signed_jitter(policy.jitter_ms);
    let delay_ms = if jitter < 0 {
        capped_ms.saturating_sub(jitter.unsigned_abs())
    } else {
        capped_ms.saturating_add(jitter as u64)
    };
    Duration::from_millis(delay_ms)
}

/// Generate pseudo-random jitter in `[-bound, bound]` without external RNG dependency
fn signed_jitter(bound: u64) -> i64 {
    use std::time::SystemTime;
    if bound == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let bound = bound.min(i64::MAX as u64 / 2);
    (nanos % (2 * bound + 1)) as i64 - bound as i64
}

/// Retry policy builder for easy customization
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    policy: RetryPolicy,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.policy.max_attempts = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.policy.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.policy.max_backoff_ms = ms;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    pub fn jitter_ms(mut self, ms: u64) -> Self {
        self.policy.jitter_ms = ms;
        self
    }

    pub fn retryable_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.policy.retryable_statuses = statuses.into();
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
