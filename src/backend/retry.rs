//! Failure classification and bounded retries for explorer requests.
//!
//! Every explorer response is sorted into one of four buckets: rate limited,
//! transient, definitively not found, or other. Rate limits and transient
//! failures sleep a fixed cooldown before retrying, "not found" is returned as a
//! sentinel without retrying, and anything else is retried on an exponential
//! schedule. All retrying is capped by [`RetryPolicy::max_attempts`].

use super::types::BackendError;
use backoff::ExponentialBackoffBuilder;
use backoff::future::retry_notify;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a failed explorer request should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Quota or request-count limit hit.
    RateLimited,
    /// Connectivity hiccup, overload, or a malformed (e.g. HTML) response.
    Transient,
    /// The explorer definitively does not know the object.
    NotFound,
    /// Anything else.
    Other,
}

/// A failed request, classified.
#[derive(Debug, Clone)]
pub struct RequestFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RequestFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a transport-level error from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_connect() || err.is_timeout() || err.is_decode() || err.is_body() {
            FailureKind::Transient
        } else {
            FailureKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// Classify an explorer answer from its status code and body text.
pub fn classify(status: StatusCode, body: &str) -> FailureKind {
    let body = body.trim();
    if body.contains("No free outputs to spend") || body.contains("Transaction not found") {
        return FailureKind::NotFound;
    }
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("Quota Exceeded") {
        return FailureKind::RateLimited;
    }
    if body.contains("No Free Cluster Connection")
        || body.contains("Maximum concurrent requests")
        || body.starts_with("<!DOCTYPE html>")
        || status.is_server_error()
    {
        return FailureKind::Transient;
    }
    if status == StatusCode::NOT_FOUND {
        return FailureKind::NotFound;
    }
    FailureKind::Other
}

/// Retry timings for explorer requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Sleep after a rate-limit answer.
    pub rate_limit_cooldown: Duration,
    /// Sleep after a transient failure.
    pub transient_cooldown: Duration,
    /// First delay of the exponential schedule used for unclassified failures.
    pub other_initial_interval: Duration,
    /// Upper bound of the exponential schedule.
    pub other_max_interval: Duration,
    /// Total attempts (including the first) before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_cooldown: Duration::from_secs(60),
            transient_cooldown: Duration::from_secs(60),
            other_initial_interval: Duration::from_secs(1),
            other_max_interval: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Run `op` until it succeeds, reports "not found", or the policy gives up.
///
/// Returns `Ok(None)` for the not-found sentinel.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<Option<T>, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestFailure>>,
{
    let attempts = AtomicU32::new(0);
    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.other_initial_interval)
        .with_max_interval(policy.other_max_interval)
        .with_max_elapsed_time(None)
        .build();

    let result = retry_notify(
        schedule,
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(Some(value)),
                    Err(failure) if failure.kind == FailureKind::NotFound => {
                        info!("{}: {}", what, failure.message);
                        Ok(None)
                    }
                    Err(failure) if attempt >= policy.max_attempts => {
                        Err(backoff::Error::permanent(failure))
                    }
                    Err(failure) => match failure.kind {
                        FailureKind::RateLimited => {
                            info!(
                                "{}: request limit reached, waiting {}s before retrying",
                                what,
                                policy.rate_limit_cooldown.as_secs()
                            );
                            Err(backoff::Error::retry_after(
                                failure,
                                policy.rate_limit_cooldown,
                            ))
                        }
                        FailureKind::Transient => {
                            info!(
                                "{}: issues connecting to explorer, waiting {}s: {}",
                                what,
                                policy.transient_cooldown.as_secs(),
                                failure.message
                            );
                            Err(backoff::Error::retry_after(
                                failure,
                                policy.transient_cooldown,
                            ))
                        }
                        _ => {
                            info!("{}: request failed: {}", what, failure.message);
                            Err(backoff::Error::transient(failure))
                        }
                    },
                }
            }
        },
        |failure: RequestFailure, delay: Duration| {
            debug!(
                "{}: retrying in {:?} after {:?} failure",
                what, delay, failure.kind
            );
        },
    )
    .await;

    result.map_err(|failure| {
        let attempts = attempts.load(Ordering::SeqCst);
        warn!("{}: giving up after {} attempts", what, attempts);
        BackendError::RetriesExhausted {
            attempts,
            last_error: failure.message,
        }
    })
}
