// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry execution with exponential backoff.
//!
//! [`RetryExecutor`] wraps a single async operation with bounded retry,
//! per-attempt timeout, jittered backoff, and cancellation. Each executor
//! instance is single-flight: calling [`execute`](RetryExecutor::execute)
//! supersedes any run still in flight, and a superseded run can never
//! write its result over a newer one.
//!
//! Failures never escape as errors. A run that exhausts its budget (or
//! hits a non-retryable error) resolves to `None` and records the failure
//! in the executor's observable [`FetchState`], which callers poll for UI
//! binding.
//!
//! # Example
//!
//! ```
//! use record_sync::RetryPolicy;
//! use std::time::Duration;
//!
//! // Interactive loads: fail reasonably fast
//! let interactive = RetryPolicy::interactive();
//! assert_eq!(interactive.max_retries, 2);
//!
//! // Bulk loads: same budget, longer per-attempt timeout
//! let bulk = RetryPolicy::bulk_load();
//! assert_eq!(bulk.timeout, Duration::from_secs(20));
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::remote::RemoteError;

/// Retry budget and pacing for one executor.
///
/// Use the preset constructors for common patterns:
/// - [`RetryPolicy::interactive()`] - detail-weight requests
/// - [`RetryPolicy::bulk_load()`] - collection loads (longer timeout)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout; an attempt exceeding it is aborted and counts
    /// as a transient failure.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interactive()
    }
}

impl RetryPolicy {
    /// Detail-weight requests: 3 attempts, 10s per attempt.
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(5_000),
            timeout: Duration::from_secs(10),
        }
    }

    /// Collection loads: same budget, 20s per attempt for heavier payloads.
    #[must_use]
    pub fn bulk_load() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(5_000),
            timeout: Duration::from_secs(20),
        }
    }

    /// Bulk-load policy driven by configuration.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            timeout: Duration::from_millis(config.bulk_load_timeout_ms),
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
        }
    }

    /// Backoff before retry `attempt + 1`: `min(base * 2^attempt + jitter,
    /// max)`, jitter uniform in up to 10% of the exponential term.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter = exponential.mul_f64(rand::rng().random_range(0.0..=0.1));
        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

/// Observable state of one executor, for UI binding.
#[derive(Debug, Clone)]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<RemoteError>,
    /// Retries consumed by the most recent run.
    pub retry_count: u32,
    pub last_attempt: Option<Instant>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            retry_count: 0,
            last_attempt: None,
        }
    }
}

type RetryPredicate = dyn Fn(&RemoteError) -> bool + Send + Sync;
type RetryCallback = dyn Fn(u32, &RemoteError) + Send + Sync;

/// Single-flight retry executor with observable state.
pub struct RetryExecutor<T> {
    policy: RetryPolicy,
    state: RwLock<FetchState<T>>,
    /// Current run generation; bumping it cancels whatever run owns the
    /// previous value.
    generation: watch::Sender<u64>,
    retry_on: Box<RetryPredicate>,
    on_retry: Box<RetryCallback>,
}

impl<T: Clone> RetryExecutor<T> {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            policy,
            state: RwLock::new(FetchState::default()),
            generation,
            retry_on: Box::new(RemoteError::is_transient),
            on_retry: Box::new(|_, _| {}),
        }
    }

    /// Replace the default transient-error predicate.
    #[must_use]
    pub fn with_retry_on(
        mut self,
        retry_on: impl Fn(&RemoteError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on = Box::new(retry_on);
        self
    }

    /// Observe each retry before its backoff wait (attempt number, error).
    #[must_use]
    pub fn with_on_retry(
        mut self,
        on_retry: impl Fn(u32, &RemoteError) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Box::new(on_retry);
        self
    }

    #[must_use]
    pub fn state(&self) -> FetchState<T> {
        self.state.read().clone()
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.state.read().loading
    }

    #[must_use]
    pub fn last_error(&self) -> Option<RemoteError> {
        self.state.read().error.clone()
    }

    /// Run `operation` under the retry policy.
    ///
    /// Supersedes any run already in flight on this executor. Resolves to
    /// the operation's value on the first successful attempt, or `None`
    /// after exhaustion, a non-retryable error, cancellation, or
    /// supersession; terminal failures are recorded in [`state`](Self::state).
    pub async fn execute<F, Fut>(&self, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let my_gen = self.bump_generation();
        let mut cancel_rx = self.generation.subscribe();

        {
            let mut state = self.state.write();
            state.loading = true;
            state.error = None;
            state.last_attempt = Some(Instant::now());
        }

        for attempt in 0..=self.policy.max_retries {
            debug!(attempt = attempt + 1, total = self.policy.max_retries + 1, "fetch attempt");

            let outcome = tokio::select! {
                result = tokio::time::timeout(self.policy.timeout, operation()) => {
                    result.unwrap_or(Err(RemoteError::Timeout))
                }
                _ = Self::superseded(&mut cancel_rx, my_gen) => {
                    // A newer run (or an explicit cancel) owns the state now.
                    return None;
                }
            };

            if self.current_generation() != my_gen {
                return None;
            }

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        info!(retries = attempt, "fetch succeeded after retries");
                    }
                    let mut state = self.state.write();
                    state.data = Some(value.clone());
                    state.loading = false;
                    state.error = None;
                    state.retry_count = attempt;
                    return Some(value);
                }
                Err(error) => {
                    self.state.write().retry_count = attempt;

                    if attempt == self.policy.max_retries {
                        warn!(error = %error, attempts = attempt + 1, "fetch failed, retries exhausted");
                        return self.record_failure(error);
                    }
                    if !(self.retry_on)(&error) {
                        debug!(error = %error, "error not retryable, stopping");
                        return self.record_failure(error);
                    }

                    (self.on_retry)(attempt + 1, &error);
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        error = %error,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "fetch attempt failed, backing off"
                    );

                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = Self::superseded(&mut cancel_rx, my_gen) => return None,
                    }
                }
            }
        }

        None
    }

    /// Cancel the in-flight run, if any. The aborted run's network future
    /// is dropped and its backoff timer cleared; loading never sticks.
    pub fn cancel(&self) {
        self.bump_generation();
        self.state.write().loading = false;
    }

    /// Cancel and clear all observable state.
    pub fn reset(&self) {
        self.bump_generation();
        *self.state.write() = FetchState::default();
    }

    /// Manual retry: zero the retry counter and run again from scratch.
    pub async fn retry<F, Fut>(&self, operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.state.write().retry_count = 0;
        self.execute(operation).await
    }

    fn bump_generation(&self) -> u64 {
        let mut next = 0;
        self.generation.send_modify(|generation| {
            *generation += 1;
            next = *generation;
        });
        next
    }

    fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn record_failure(&self, error: RemoteError) -> Option<T> {
        let mut state = self.state.write();
        state.loading = false;
        state.error = Some(error);
        None
    }

    async fn superseded(rx: &mut watch::Receiver<u64>, my_gen: u64) {
        // Resolves once the generation moves past this run's.
        let _ = rx.wait_for(|generation| *generation != my_gen).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transient() -> RemoteError {
        RemoteError::Network("connection refused".into())
    }

    fn permanent() -> RemoteError {
        RemoteError::Http { status: 422, message: "invalid".into() }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let executor = RetryExecutor::new(RetryPolicy::test());
        let result = executor.execute(|| async { Ok(42) }).await;

        assert_eq!(result, Some(42));
        let state = executor.state();
        assert_eq!(state.data, Some(42));
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert_eq!(state.retry_count, 0);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let executor = RetryExecutor::new(RetryPolicy::test());

        let counter = attempts.clone();
        let result = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Some("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(executor.state().retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_makes_exactly_initial_plus_retries_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let executor: RetryExecutor<i32> = RetryExecutor::new(RetryPolicy::test());

        let counter = attempts.clone();
        let result = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        assert_eq!(result, None);
        // max_retries = 2 in the test policy: initial + 2 retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let state = executor.state();
        assert!(!state.loading);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let executor: RetryExecutor<i32> = RetryExecutor::new(RetryPolicy::test());

        let counter = attempts.clone();
        let result = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(permanent())
                }
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(executor.last_error(), Some(permanent()));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let executor: RetryExecutor<i32> = RetryExecutor::new(RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_millis(20),
        });

        let counter = attempts.clone();
        let result = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_secs(5)).await;
                    Ok(1)
                }
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(executor.last_error(), Some(RemoteError::Timeout));
    }

    #[tokio::test]
    async fn test_on_retry_reports_attempt_numbers() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let executor: RetryExecutor<i32> = RetryExecutor::new(RetryPolicy::test())
            .with_on_retry(move |attempt, _| sink.lock().push(attempt));

        let _ = executor.execute(|| async { Err(transient()) }).await;

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_cancel_clears_loading() {
        let executor: Arc<RetryExecutor<i32>> = Arc::new(RetryExecutor::new(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(60),
        }));

        let runner = executor.clone();
        let handle = tokio::spawn(async move { runner.execute(|| std::future::pending()).await });

        // Let the run start, then cancel it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.loading());
        executor.cancel();

        assert_eq!(handle.await.unwrap(), None);
        assert!(!executor.loading());
    }

    #[tokio::test]
    async fn test_execute_supersedes_in_flight_run() {
        let executor: Arc<RetryExecutor<i32>> = Arc::new(RetryExecutor::new(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(60),
        }));

        let first = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(|| std::future::pending()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = executor.execute(|| async { Ok(7) }).await;

        assert_eq!(second, Some(7));
        // The stalled first run observed the supersession and yielded.
        assert_eq!(first.await.unwrap(), None);
        assert_eq!(executor.state().data, Some(7));
    }

    #[tokio::test]
    async fn test_stale_run_does_not_overwrite_newer_result() {
        let executor: Arc<RetryExecutor<&str>> = Arc::new(RetryExecutor::new(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(60),
        }));

        // Slow first load.
        let first = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute(|| async {
                        sleep(Duration::from_millis(200)).await;
                        Ok("stale")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Newer load completes first; the stale one must be discarded.
        let fresh = executor.execute(|| async { Ok("fresh") }).await;
        assert_eq!(fresh, Some("fresh"));

        assert_eq!(first.await.unwrap(), None);
        assert_eq!(executor.state().data, Some("fresh"));
    }

    #[tokio::test]
    async fn test_manual_retry_starts_from_scratch() {
        let executor: RetryExecutor<i32> = RetryExecutor::new(RetryPolicy::test());
        let _ = executor.execute(|| async { Err(transient()) }).await;
        assert_eq!(executor.state().retry_count, 2);

        let result = executor.retry(|| async { Ok(5) }).await;
        assert_eq!(result, Some(5));
        assert_eq!(executor.state().retry_count, 0);
        assert!(executor.last_error().is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let executor = RetryExecutor::new(RetryPolicy::test());
        let _ = executor.execute(|| async { Ok(1) }).await;
        assert!(executor.state().data.is_some());

        executor.reset();
        let state = executor.state();
        assert!(state.data.is_none());
        assert!(state.error.is_none());
        assert_eq!(state.retry_count, 0);
        assert!(!state.loading);
    }

    #[test]
    fn test_delay_respects_exponential_bounds() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(5_000),
            timeout: Duration::from_secs(10),
        };

        for attempt in 0..6 {
            let exponential = Duration::from_millis(1_000 * 2u64.pow(attempt));
            let delay = policy.delay_for(attempt);

            assert!(delay <= Duration::from_millis(5_000), "attempt {}: over cap", attempt);
            assert!(
                delay >= exponential.min(Duration::from_millis(5_000)),
                "attempt {}: below exponential floor",
                attempt
            );
            assert!(
                delay <= exponential.mul_f64(1.1).min(Duration::from_millis(5_000)),
                "attempt {}: jitter over 10%",
                attempt
            );
        }
    }

    #[test]
    fn test_policy_presets() {
        let interactive = RetryPolicy::interactive();
        assert_eq!(interactive.max_retries, 2);
        assert_eq!(interactive.timeout, Duration::from_secs(10));

        let bulk = RetryPolicy::bulk_load();
        assert_eq!(bulk.timeout, Duration::from_secs(20));
    }
}
