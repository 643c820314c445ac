use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};

use sqlpilot_core::context::LlmContext;
use sqlpilot_core::errors::GatewayError;
use sqlpilot_core::provider::{EventStream, LlmProvider, StreamOptions};

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomly added or removed.
    pub jitter: f64,
    /// Consecutive failures that open the circuit.
    pub trip_after: u32,
    pub cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            trip_after: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Delay before retry number `attempt` (0-based): doubling from
/// `base_delay`, capped at `max_delay`, then jittered.
pub fn backoff(config: &ReliableConfig, attempt: u32, rng: &mut impl Rng) -> Duration {
    let capped = config
        .base_delay
        .saturating_mul(1u32 << attempt.min(16))
        .min(config.max_delay);
    let spread = capped.as_secs_f64() * config.jitter.clamp(0.0, 1.0);
    if spread <= 0.0 {
        return capped;
    }
    let jittered = capped.as_secs_f64() + rng.gen_range(-spread..=spread);
    Duration::from_secs_f64(jittered.max(0.001))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; the next call decides.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Default)]
struct Breaker {
    failures: u32,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn state(&self, cooldown: Duration) -> CircuitState {
        match self.opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() >= cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }
}

/// Retries transient failures to open a stream and stops calling a backend
/// that keeps failing.
///
/// Only opening the stream is retried. A stream already handed out is never
/// replayed, so usage is never counted twice for one call.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    breaker: Mutex<Breaker>,
    retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            breaker: Mutex::new(Breaker::default()),
            retries: AtomicU64::new(0),
        }
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().state(self.config.cooldown)
    }

    fn admit(&self) -> Result<(), GatewayError> {
        let breaker = self.breaker.lock();
        match (breaker.state(self.config.cooldown), breaker.opened_at) {
            (CircuitState::Open, Some(at)) => Err(GatewayError::CircuitOpen(self.config.cooldown.saturating_sub(at.elapsed()))),
            _ => Ok(()),
        }
    }

    fn record(&self, ok: bool) {
        let mut breaker = self.breaker.lock();
        if ok {
            if breaker.opened_at.take().is_some() {
                info!("gateway circuit closed");
            }
            breaker.failures = 0;
            return;
        }

        breaker.failures += 1;
        let probe_failed = breaker.state(self.config.cooldown) == CircuitState::HalfOpen;
        let tripped = breaker.opened_at.is_none() && breaker.failures >= self.config.trip_after.max(1);
        if probe_failed || tripped {
            warn!(failures = breaker.failures, cooldown_secs = self.config.cooldown.as_secs(), "gateway circuit opened");
            breaker.opened_at = Some(Instant::now());
        }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn stream(&self, context: &LlmContext, options: &StreamOptions) -> Result<EventStream, GatewayError> {
        let mut attempt = 0;
        loop {
            self.admit()?;
            let err = match self.inner.stream(context, options).await {
                Ok(stream) => {
                    self.record(true);
                    return Ok(stream);
                }
                Err(e) => e,
            };
            self.record(false);

            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }
            let delay = err
                .retry_after()
                .unwrap_or_else(|| backoff(&self.config, attempt, &mut rand::thread_rng()));
            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error_kind = err.error_kind(),
                "retrying gateway call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
