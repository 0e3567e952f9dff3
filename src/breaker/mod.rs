//! Asynchronous circuit breaker.
//!
//! One [`CircuitBreaker`] guards one remote dependency and is shared by every
//! caller of that dependency. Calls go through [`CircuitBreaker::call`]; the
//! breaker decides whether to run them, tracks failures of the kinds it is
//! told to monitor, and fast-fails callers while the dependency looks broken.
//!
//! State transitions happen under a single mutex which is never held while
//! the guarded operation is awaited.

mod config;
mod error;

use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, error, info};

pub use config::{BreakerConfig, BreakerConfigError};
pub use error::{BreakerError, CircuitState};

use crate::util::lock::mutex_lock;

const SOURCE: &str = "breaker";

type Monitor<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type Sampler = Box<dyn Fn() -> f64 + Send + Sync>;

/// Counters of the current observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub call_total: u32,
    pub call_failures: u32,
}

struct BreakerInner {
    state: CircuitState,
    call_total: u32,
    call_failures: u32,
    window_start: Instant,
    last_failure_at: Option<Instant>,
    generation: u64,
}

impl BreakerInner {
    fn reset_counters(&mut self, now: Instant) {
        self.call_total = 0;
        self.call_failures = 0;
        self.window_start = now;
        self.generation += 1;
    }

    fn failure_rate(&self) -> f64 {
        if self.call_total == 0 {
            return 0.0;
        }
        f64::from(self.call_failures) / f64::from(self.call_total)
    }
}

#[derive(Clone, Copy)]
struct Admission {
    generation: u64,
}

pub struct CircuitBreaker<E> {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    monitor: Monitor<E>,
    sampler: Sampler,
}

impl<E> CircuitBreaker<E> {
    /// Build a closed breaker that monitors every error.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, BreakerConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                call_total: 0,
                call_failures: 0,
                window_start: Instant::now(),
                last_failure_at: None,
                generation: 0,
            }),
            monitor: Box::new(|_| true),
            sampler: Box::new(rand::random::<f64>),
        })
    }

    /// Restrict failure tracking to errors for which `predicate` holds.
    pub fn monitoring(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.monitor = Box::new(predicate);
        self
    }

    /// Replace the uniform `[0, 1)` source used for half-open passthrough.
    pub fn with_sampler(mut self, sampler: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        mutex_lock(&self.inner, SOURCE, "state").state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = mutex_lock(&self.inner, SOURCE, "stats");
        BreakerStats {
            state: inner.state,
            call_total: inner.call_total,
            call_failures: inner.call_failures,
        }
    }

    /// Force the breaker back to closed with an empty window.
    pub fn reset(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "reset");
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.last_failure_at = None;
        inner.reset_counters(Instant::now());
        if from != CircuitState::Closed {
            self.log_transition(from, CircuitState::Closed);
        }
    }

    /// Run `operation` under the breaker.
    ///
    /// Returns [`BreakerError::Bypass`] without invoking `operation` while the
    /// breaker is open or the call is not sampled for a half-open probe.
    /// Monitored errors come back as [`BreakerError::Failure`]; anything else
    /// is handed back untouched as [`BreakerError::Unmonitored`].
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = self.admit()?;

        match operation().await {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(err) if (self.monitor)(&err) => {
                self.record_failure(admission, &err);
                Err(BreakerError::Failure {
                    breaker: self.name.clone(),
                    source: err,
                })
            }
            Err(err) => Err(BreakerError::Unmonitored(err)),
        }
    }

    fn admit(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "admit");
        let now = Instant::now();

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                if now.duration_since(inner.window_start) > self.config.failure_monitor_timeout {
                    inner.reset_counters(now);
                }
                debug!(target = SOURCE, breaker = self.name.as_str(), "closed, calling");
            }
            CircuitState::Open if !self.open_timeout_elapsed(&inner, now) => {
                return Err(self.bypass(CircuitState::Open));
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                if state == CircuitState::Open {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                }
                if (self.sampler)() >= self.config.half_open_passthrough_rate {
                    return Err(self.bypass(CircuitState::HalfOpen));
                }
                info!(
                    target = SOURCE,
                    breaker = self.name.as_str(),
                    "half-open, probing dependency"
                );
            }
        }

        inner.call_total += 1;
        Ok(Admission {
            generation: inner.generation,
        })
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_success");
        if inner.generation != admission.generation {
            return;
        }

        if inner.state == CircuitState::HalfOpen && self.should_close(&inner) {
            self.transition(&mut inner, CircuitState::Closed, Instant::now());
        }
    }

    fn record_failure(&self, admission: Admission, err: &E)
    where
        E: fmt::Display,
    {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_failure");
        counter!("pixfeed_breaker_failure_total", "breaker" => self.name.clone()).increment(1);
        error!(
            target = SOURCE,
            breaker = self.name.as_str(),
            state = inner.state.as_str(),
            error = %err,
            "guarded call failed"
        );

        if inner.generation != admission.generation {
            return;
        }

        let now = Instant::now();
        inner.call_failures += 1;
        inner.last_failure_at = Some(now);

        if inner.state != CircuitState::Open && self.should_open(&inner) {
            self.transition(&mut inner, CircuitState::Open, now);
        }
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        inner.call_total >= self.config.min_calls_trigger
            && inner.failure_rate() > self.config.failure_rate_trigger
    }

    fn should_close(&self, inner: &BreakerInner) -> bool {
        inner.call_total >= self.config.min_calls_recover
            && inner.failure_rate() < self.config.recover_rate
    }

    fn open_timeout_elapsed(&self, inner: &BreakerInner, now: Instant) -> bool {
        inner
            .last_failure_at
            .is_none_or(|at| now.duration_since(at) > self.config.open_timeout)
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.reset_counters(now);
        self.log_transition(from, to);
    }

    fn log_transition(&self, from: CircuitState, to: CircuitState) {
        counter!(
            "pixfeed_breaker_transition_total",
            "breaker" => self.name.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        info!(
            target = SOURCE,
            breaker = self.name.as_str(),
            from = from.as_str(),
            to = to.as_str(),
            "circuit breaker state changed"
        );
    }

    fn bypass(&self, state: CircuitState) -> BreakerError<E> {
        counter!("pixfeed_breaker_bypass_total", "breaker" => self.name.clone()).increment(1);
        debug!(
            target = SOURCE,
            breaker = self.name.as_str(),
            state = state.as_str(),
            "call bypassed"
        );
        BreakerError::Bypass {
            breaker: self.name.clone(),
            state,
        }
    }
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &stats.state)
            .field("call_total", &stats.call_total)
            .field("call_failures", &stats.call_failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    enum DependencyError {
        #[error("connection refused")]
        Connection,
        #[error("malformed request")]
        Malformed,
    }

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_monitor_timeout: Duration::from_secs(60),
            failure_rate_trigger: 0.5,
            min_calls_trigger: 5,
            open_timeout: Duration::from_secs(30),
            half_open_passthrough_rate: 1.0,
            recover_rate: 0.2,
            min_calls_recover: 3,
        }
    }

    fn breaker(config: BreakerConfig) -> CircuitBreaker<DependencyError> {
        CircuitBreaker::new("object-store", config)
            .expect("valid config")
            .monitoring(|err| matches!(err, DependencyError::Connection))
    }

    async fn succeed(breaker: &CircuitBreaker<DependencyError>) -> Result<u32, BreakerError<DependencyError>> {
        breaker.call(|| async { Ok(7) }).await
    }

    async fn fail(breaker: &CircuitBreaker<DependencyError>) -> Result<u32, BreakerError<DependencyError>> {
        breaker
            .call(|| async { Err(DependencyError::Connection) })
            .await
    }

    async fn trip(breaker: &CircuitBreaker<DependencyError>) {
        for _ in 0..2 {
            succeed(breaker).await.expect("success");
        }
        for _ in 0..3 {
            let _ = fail(breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_failure_rate_exceeds_trigger() {
        let breaker = breaker(config());

        succeed(&breaker).await.expect("first success");
        succeed(&breaker).await.expect("second success");
        for _ in 0..2 {
            let err = fail(&breaker).await.expect_err("failure");
            assert!(matches!(err, BreakerError::Failure { .. }));
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        let err = fail(&breaker).await.expect_err("failure");
        assert!(matches!(
            err.into_inner(),
            Some(DependencyError::Connection)
        ));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().call_total, 0);

        let invoked = AtomicUsize::new(0);
        let err = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DependencyError>(())
            })
            .await
            .expect_err("bypassed");
        assert!(err.is_bypass());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_minimum_sample() {
        let breaker = breaker(config());

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().call_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_counters() {
        let breaker = breaker(config());

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(
            breaker.stats(),
            BreakerStats {
                state: CircuitState::Closed,
                call_total: 1,
                call_failures: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bypasses_until_open_timeout_then_probes() {
        let breaker = breaker(config());
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(succeed(&breaker).await.expect_err("still open").is_bypass());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(succeed(&breaker).await.expect("probe passes"), 7);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.stats().call_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_successful_probes() {
        let breaker = breaker(config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        for _ in 0..3 {
            succeed(&breaker).await.expect("probe");
        }

        assert_eq!(
            breaker.stats(),
            BreakerStats {
                state: CircuitState::Closed,
                call_total: 0,
                call_failures: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_reopens_when_probes_keep_failing() {
        let breaker = breaker(config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        for _ in 0..5 {
            let err = fail(&breaker).await.expect_err("probe fails");
            assert!(matches!(err, BreakerError::Failure { .. }));
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(succeed(&breaker).await.expect_err("reopened").is_bypass());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_sampling_rejects_unsampled_calls() {
        let breaker = breaker(BreakerConfig {
            half_open_passthrough_rate: 0.5,
            ..config()
        })
        .with_sampler(|| 0.9);
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let err = succeed(&breaker).await.expect_err("not sampled");
        assert!(matches!(
            err,
            BreakerError::Bypass {
                state: CircuitState::HalfOpen,
                ..
            }
        ));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.stats().call_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unmonitored_errors_pass_through_uncounted() {
        let breaker = breaker(config());

        for _ in 0..10 {
            let err = breaker
                .call(|| async { Err::<(), _>(DependencyError::Malformed) })
                .await
                .expect_err("unmonitored");
            assert!(matches!(
                err,
                BreakerError::Unmonitored(DependencyError::Malformed)
            ));
        }

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.call_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_from_previous_window_are_ignored() {
        let breaker = Arc::new(breaker(config()));
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = wait.await;
                        Err::<(), _>(DependencyError::Connection)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        breaker.reset();
        release.send(()).expect("slow call still waiting");
        let outcome = slow.await.expect("task joined");

        assert!(matches!(outcome, Err(BreakerError::Failure { .. })));
        assert_eq!(breaker.stats().call_failures, 0);
    }

    #[test]
    fn rejects_invalid_config() {
        let result = CircuitBreaker::<DependencyError>::new(
            "bad",
            BreakerConfig {
                half_open_passthrough_rate: -0.1,
                ..BreakerConfig::default()
            },
        );
        assert!(result.is_err());
    }
}
