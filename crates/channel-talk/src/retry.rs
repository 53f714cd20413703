//! Fixed-schedule retry for provider API calls.
//!
//! Each request runs as a small state machine:
//! `Attempt(n) -> Success | RetryableFailure -> Attempt(n + 1) | FatalFailure`.
//! The transition is a pure function ([`RetryPolicy::after_failure`]) so the
//! schedule can be checked without a network; [`RetryPolicy::run`] drives it
//! and sleeps between attempts.

use std::future::Future;
use std::time::Duration;

use crate::error::ChannelTalkError;

/// Delays between attempts 1→2 and 2→3.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 2] = [1000, 3000];

/// Why a single attempt did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The provider answered with a non-2xx status.
    Status { status: u16, body: String },
    /// DNS failure, connection reset, timeout, ...
    Transport(String),
    /// A 2xx answer whose body could not be decoded.
    Decode { status: u16, detail: String },
}

/// Next transition after a failed attempt.
#[derive(Debug)]
pub enum RetryStep {
    Retry { delay: Duration, reason: String },
    Fail(ChannelTalkError),
}

pub fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(
            DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }
}

impl RetryPolicy {
    /// One retry per entry in `delays`, no jitter.
    pub fn fixed(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32 + 1
    }

    /// Delay to wait after the failed `attempt` (1-based), if another is allowed.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        let index = attempt.checked_sub(1)? as usize;
        self.delays.get(index).copied()
    }

    pub fn after_failure(&self, attempt: u32, failure: AttemptFailure) -> RetryStep {
        match failure {
            AttemptFailure::Status { status, body } if is_auth_status(status) => {
                RetryStep::Fail(ChannelTalkError::Auth { status, body })
            }
            AttemptFailure::Status { status, body } if is_retryable_status(status) => {
                match self.delay_after(attempt) {
                    Some(delay) => RetryStep::Retry {
                        delay,
                        reason: format!("HTTP {}", status),
                    },
                    None => RetryStep::Fail(ChannelTalkError::RateLimitExhausted {
                        status,
                        body,
                        attempts: attempt,
                    }),
                }
            }
            AttemptFailure::Status { status, body } => {
                RetryStep::Fail(ChannelTalkError::Provider { status, body })
            }
            AttemptFailure::Transport(detail) => match self.delay_after(attempt) {
                Some(delay) => RetryStep::Retry {
                    delay,
                    reason: detail,
                },
                None => RetryStep::Fail(ChannelTalkError::Network(detail)),
            },
            AttemptFailure::Decode { status, detail } => {
                RetryStep::Fail(ChannelTalkError::Provider {
                    status,
                    body: detail,
                })
            }
        }
    }

    /// Drive `attempt_fn` until it succeeds or the policy gives up.
    ///
    /// `attempt_fn` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, ChannelTalkError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        let mut attempt = 1;
        loop {
            let failure = match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            match self.after_failure(attempt, failure) {
                RetryStep::Retry { delay, reason } => {
                    tracing::warn!(
                        operation = %operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Channel Talk request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryStep::Fail(err) => {
                    tracing::debug!(operation = %operation, attempt, error = %err, "giving up");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn status(code: u16, body: &str) -> AttemptFailure {
        AttemptFailure::Status {
            status: code,
            body: body.to_string(),
        }
    }

    #[test]
    fn default_schedule_is_one_then_three_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(3000)));
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(policy.delay_after(0), None);
    }

    #[test]
    fn auth_statuses_fail_on_first_attempt() {
        let policy = RetryPolicy::default();
        for code in [401, 403] {
            match policy.after_failure(1, status(code, "nope")) {
                RetryStep::Fail(ChannelTalkError::Auth { status, body }) => {
                    assert_eq!(status, code);
                    assert_eq!(body, "nope");
                }
                other => panic!("expected auth failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn other_client_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        for code in [400, 404, 422] {
            assert!(matches!(
                policy.after_failure(1, status(code, "bad")),
                RetryStep::Fail(ChannelTalkError::Provider { .. })
            ));
        }
    }

    #[test]
    fn retryable_statuses_walk_the_schedule_then_exhaust() {
        let policy = RetryPolicy::default();
        let mut delays = Vec::new();
        let mut attempt = 1;
        let err = loop {
            match policy.after_failure(attempt, status(500, &format!("boom {}", attempt))) {
                RetryStep::Retry { delay, .. } => {
                    delays.push(delay);
                    attempt += 1;
                }
                RetryStep::Fail(err) => break err,
            }
        };
        assert_eq!(
            delays,
            vec![Duration::from_millis(1000), Duration::from_millis(3000)]
        );
        match err {
            ChannelTalkError::RateLimitExhausted {
                status,
                body,
                attempts,
            } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom 3");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn transport_failures_surface_as_network_errors() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.after_failure(1, AttemptFailure::Transport("reset".into())),
            RetryStep::Retry { .. }
        ));
        assert!(matches!(
            policy.after_failure(3, AttemptFailure::Transport("reset".into())),
            RetryStep::Fail(ChannelTalkError::Network(_))
        ));
    }

    #[test]
    fn decode_failures_are_fatal() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.after_failure(
                1,
                AttemptFailure::Decode {
                    status: 200,
                    detail: "not json".into()
                }
            ),
            RetryStep::Fail(ChannelTalkError::Provider { status: 200, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_sleeps_one_then_three_seconds_before_success() {
        let policy = RetryPolicy::default();
        let seen = Mutex::new(Vec::new());
        let start = Instant::now();
        let script = [status(429, "slow down"), status(503, "unavailable")];

        let result = policy
            .run("test", |attempt| {
                seen.lock().unwrap().push(start.elapsed());
                let outcome = match script.get(attempt as usize - 1) {
                    Some(failure) => Err(failure.clone()),
                    None => Ok(attempt),
                };
                async move { outcome }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        let seen = seen.into_inner().unwrap();
        assert_eq!(
            seen,
            vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(4000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_immediately_on_auth_failure() {
        let policy = RetryPolicy::default();
        let calls = Mutex::new(0u32);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run("test", |_| {
                *calls.lock().unwrap() += 1;
                async { Err(status(401, "bad key")) }
            })
            .await;

        assert!(matches!(result, Err(ChannelTalkError::Auth { status: 401, .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
