//! Retry policy and the full-jitter exponential backoff loop shared by all senders.
//!
//! The loop is async: backoff is a `tokio::time::sleep`, so no worker thread is
//! held while a call waits for its next attempt. Shutdown is observed through a
//! [`CancellationToken`] both while sleeping and while an attempt is in flight.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConfigError, TransportError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Overrides the default classification of execution failures.
pub type RetryPredicate = Arc<dyn Fn(&TransportError) -> bool + Send + Sync>;

/// Immutable retry configuration, shared read-only across export calls.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
    retry_exception_predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Whether an execution failure may be retried under this policy.
    pub fn is_retryable_error(&self, err: &TransportError) -> bool {
        match &self.retry_exception_predicate {
            Some(predicate) => predicate(err),
            None => is_retryable_error(err),
        }
    }

    /// Upper bound of the sleep before `attempt` (1-indexed). Zero for the first attempt.
    pub fn backoff_cap(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    pub(crate) fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            next: self.initial_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retry_exception_predicate: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field(
                "retry_exception_predicate",
                &self.retry_exception_predicate.as_ref().map(|_| "custom"),
            )
            .finish()
    }
}

#[derive(Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    backoff_multiplier: Option<f64>,
    retry_exception_predicate: Option<RetryPredicate>,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn retry_exception_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&TransportError) -> bool + Send + Sync + 'static,
    {
        self.retry_exception_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let backoff_multiplier = self.backoff_multiplier.unwrap_or(DEFAULT_BACKOFF_MULTIPLIER);

        if !(2..=5).contains(&max_attempts) {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "max_attempts must be between 2 and 5, got {max_attempts}"
            )));
        }
        if initial_backoff.is_zero() {
            return Err(ConfigError::InvalidRetryPolicy(
                "initial_backoff must be greater than zero".to_string(),
            ));
        }
        if max_backoff.is_zero() {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_backoff must be greater than zero".to_string(),
            ));
        }
        if !(backoff_multiplier.is_finite() && backoff_multiplier > 0.0) {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "backoff_multiplier must be greater than zero, got {backoff_multiplier}"
            )));
        }

        Ok(RetryPolicy {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            retry_exception_predicate: self.retry_exception_predicate,
        })
    }
}

/// Default classification of execution failures.
///
/// Timeouts and refused connections are transient. Some platforms report a
/// connect timeout only through the message text, so that form is matched too.
pub fn is_retryable_error(err: &TransportError) -> bool {
    match err {
        TransportError::Timeout(_)
        | TransportError::ConnectTimeout(_)
        | TransportError::ReadTimeout(_)
        | TransportError::ConnectionRefused(_) => true,
        TransportError::Io(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("connect timed out") || message.contains("connect timeout")
        }
        _ => false,
    }
}

/// Stateful jitter source for one logical call.
pub(crate) struct Backoff<'a> {
    policy: &'a RetryPolicy,
    next: Duration,
}

impl Backoff<'_> {
    pub(crate) fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let upper = self.next.min(self.policy.max_backoff);
        let nanos = u64::try_from(upper.as_nanos()).unwrap_or(u64::MAX);
        let delay = Duration::from_nanos(rng.random_range(0..=nanos));
        self.next = self
            .next
            .mul_f64(self.policy.backoff_multiplier)
            .min(self.policy.max_backoff.saturating_mul(2));
        delay
    }
}

/// Drive `attempt` until it succeeds, fails permanently, exhausts the policy or
/// is cancelled.
///
/// A completed response that `retryable_response` rejects is returned as-is once
/// attempts are exhausted. When cancelled, the last completed result wins; with
/// none, the outcome is [`TransportError::Cancelled`].
pub(crate) async fn execute<R, A, Fut, C>(
    policy: Option<&RetryPolicy>,
    cancel: &CancellationToken,
    mut attempt: A,
    retryable_response: C,
) -> Result<R, TransportError>
where
    A: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<R, TransportError>>,
    C: Fn(&R) -> bool,
{
    let max_attempts = policy.map_or(1, RetryPolicy::max_attempts);
    let mut backoff = policy.map(RetryPolicy::backoff);
    let mut last: Option<Result<R, TransportError>> = None;

    for n in 1..=max_attempts {
        if n > 1 {
            let delay = match backoff.as_mut() {
                Some(backoff) => backoff.next_delay(&mut rand::rng()),
                None => Duration::ZERO,
            };
            debug!(attempt = n, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = attempt(n) => result,
        };

        let retry = match &result {
            Ok(response) => retryable_response(response),
            Err(err) => policy.is_some_and(|p| p.is_retryable_error(err)),
        };
        if !retry {
            return result;
        }
        if n < max_attempts {
            match &result {
                Ok(_) => debug!(attempt = n, "Retryable response received"),
                Err(err) => debug!(attempt = n, error = %err, "Retryable failure"),
            }
        }
        last = Some(result);
    }

    last.unwrap_or(Err(TransportError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_backoff(Duration::from_secs(1))
            .max_backoff(Duration::from_secs(5))
            .backoff_multiplier(1.5)
            .build()
            .unwrap()
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.initial_backoff(), Duration::from_secs(1));
        assert_eq!(policy.max_backoff(), Duration::from_secs(5));
        assert_eq!(policy.backoff_multiplier(), 1.5);
    }

    #[test]
    fn builder_rejects_out_of_range_attempts() {
        assert!(RetryPolicy::builder().max_attempts(1).build().is_err());
        assert!(RetryPolicy::builder().max_attempts(6).build().is_err());
        assert!(RetryPolicy::builder().max_attempts(2).build().is_ok());
        assert!(RetryPolicy::builder().max_attempts(5).build().is_ok());
    }

    #[test]
    fn builder_rejects_non_positive_values() {
        assert!(RetryPolicy::builder()
            .initial_backoff(Duration::ZERO)
            .build()
            .is_err());
        assert!(RetryPolicy::builder()
            .max_backoff(Duration::ZERO)
            .build()
            .is_err());
        assert!(RetryPolicy::builder()
            .backoff_multiplier(0.0)
            .build()
            .is_err());
        assert!(RetryPolicy::builder()
            .backoff_multiplier(f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn backoff_cap_grows_then_saturates() {
        let policy = policy(5);

        assert_eq!(policy.backoff_cap(1), Duration::ZERO);
        assert_eq!(policy.backoff_cap(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_cap(3), Duration::from_millis(1500));
        assert_eq!(policy.backoff_cap(4), Duration::from_millis(2250));
        assert_eq!(policy.backoff_cap(10), Duration::from_secs(5));
    }

    #[test]
    fn jittered_delays_stay_within_cap() {
        let policy = policy(5);
        let mut rng = rand::rng();

        for _ in 0..200 {
            let mut backoff = policy.backoff();
            for attempt in 2..=5 {
                let delay = backoff.next_delay(&mut rng);
                assert!(delay <= policy.backoff_cap(attempt), "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn default_predicate_classifies_errors() {
        assert!(is_retryable_error(&TransportError::Timeout(Duration::from_secs(1))));
        assert!(is_retryable_error(&TransportError::ConnectTimeout("x".into())));
        assert!(is_retryable_error(&TransportError::ConnectionRefused("x".into())));
        assert!(is_retryable_error(&TransportError::Io(
            "socket error: Connect timed out".into()
        )));
        assert!(!is_retryable_error(&TransportError::Io("broken pipe".into())));
        assert!(is_retryable_error(&TransportError::ReadTimeout("x".into())));
        assert!(!is_retryable_error(&TransportError::Tls("handshake".into())));
        assert!(!is_retryable_error(&TransportError::Cancelled));
    }

    #[test]
    fn timeouts_are_retryable_in_every_phase() {
        let err = std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "Connection timed out (os error 110)",
        );

        assert!(is_retryable_error(&TransportError::from_io(&err, true)));
        assert!(is_retryable_error(&TransportError::from_io(&err, false)));
    }

    #[test]
    fn custom_predicate_overrides_default() {
        let policy = RetryPolicy::builder()
            .retry_exception_predicate(|err| matches!(err, TransportError::Tls(_)))
            .build()
            .unwrap();

        assert!(policy.is_retryable_error(&TransportError::Tls("handshake".into())));
        assert!(!policy.is_retryable_error(&TransportError::Timeout(Duration::from_secs(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn permanently_failing_call_uses_every_attempt() {
        for max_attempts in 2..=5 {
            let policy = policy(max_attempts);
            let attempts = AtomicU32::new(0);

            let result: Result<(), _> = execute(
                Some(&policy),
                &CancellationToken::new(),
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(TransportError::ConnectionRefused("down".into())) }
                },
                |_| false,
            )
            .await;

            assert!(matches!(result, Err(TransportError::ConnectionRefused(_))));
            assert_eq!(attempts.load(Ordering::SeqCst), max_attempts);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_stops_further_attempts() {
        let policy = policy(5);
        let attempts = AtomicU32::new(0);

        let result = execute(
            Some(&policy),
            &CancellationToken::new(),
            |n| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TransportError::Timeout(Duration::from_secs(1)))
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| false,
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_fails_fast() {
        let policy = policy(5);
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = execute(
            Some(&policy),
            &CancellationToken::new(),
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::Tls("bad certificate".into())) }
            },
            |_| false,
        )
        .await;

        assert!(matches!(result, Err(TransportError::Tls(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_policy_makes_single_attempt() {
        let attempts = AtomicU32::new(0);

        let result: Result<u32, _> = execute(
            None,
            &CancellationToken::new(),
            |n| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_responses_twice_then_success() {
        let policy = policy(3);
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result = execute(
            Some(&policy),
            &CancellationToken::new(),
            |n| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok(if n < 3 { 503 } else { 200 }) }
            },
            |status| *status == 503,
        )
        .await;

        let elapsed = started.elapsed();
        assert_eq!(result, Ok(200));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(elapsed <= Duration::from_millis(2500), "slept {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retryable_response_is_returned() {
        let policy = policy(2);

        let result = execute(
            Some(&policy),
            &CancellationToken::new(),
            |_| async { Ok(503) },
            |status| *status == 503,
        )
        .await;

        assert_eq!(result, Ok(503));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_returns_last_result() {
        let policy = policy(5);
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let responded = Arc::new(Notify::new());

        let canceller = tokio::spawn({
            let cancel = cancel.clone();
            let responded = responded.clone();
            async move {
                responded.notified().await;
                cancel.cancel();
            }
        });

        let started = Instant::now();
        let result = execute(
            Some(&policy),
            &cancel,
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                let responded = responded.clone();
                async move {
                    responded.notify_one();
                    Ok(503)
                }
            },
            |status| *status == 503,
        )
        .await;

        canceller.await.unwrap();
        assert_eq!(result, Ok(503));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        // the backoff sleep was interrupted, not waited out
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_any_attempt_reports_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = execute(
            Some(&policy(3)),
            &cancel,
            |_| async { Ok(()) },
            |_| false,
        )
        .await;

        assert_eq!(result, Err(TransportError::Cancelled));
    }
}
