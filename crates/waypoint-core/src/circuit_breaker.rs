//! Circuit breaker tripped by a sliding-window network-error ratio.
//!
//! Unlike a consecutive-failure counter, this tracks the last `WINDOW_SIZE`
//! outcomes and opens once the fraction classified as network errors exceeds
//! 0.5. A single probe is let through in half-open; success closes the
//! circuit, failure re-opens it.

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const WINDOW_SIZE: usize = 20;
const TRIP_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Outcomes tracked per window; the ratio is computed over at most this many.
    pub window_size: usize,
    /// Network-error fraction of the window that trips the circuit open.
    pub trip_ratio: f64,
    /// Cooldown before an open circuit allows a half-open probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            trip_ratio: TRIP_RATIO,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Tracks recent outcomes for one route and decides whether to fail fast.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    window: Mutex<VecDeque<bool>>,
    opened_at: RwLock<Option<Instant>>,
    probe_in_flight: AtomicBool,
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            window: Mutex::new(VecDeque::new()),
            opened_at: RwLock::new(None),
            probe_in_flight: AtomicBool::new(false),
            name,
        }
    }

    pub fn get_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Relaxed))
    }

    /// Executes `operation` under breaker protection. `is_network_error`
    /// classifies a returned `E` so the window only counts network outcomes
    /// (not e.g. upstream 5xx, per the classification rule).
    pub async fn call<F, T, E>(
        &self,
        operation: F,
        is_network_error: impl Fn(&E) -> bool,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.admit().await {
            debug!("circuit breaker {} is open, failing fast", self.name);
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.record(false).await;
                Ok(result)
            }
            Err(error) => {
                let network = is_network_error(&error);
                self.record(network).await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    /// Decides whether a call may proceed, transitioning Open -> HalfOpen
    /// after the cooldown and admitting at most one concurrent probe.
    async fn admit(&self) -> bool {
        match self.get_state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.read().await.map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e >= self.config.reset_timeout) {
                    self.transition_to_half_open().await;
                    self.try_claim_probe()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.try_claim_probe(),
        }
    }

    fn try_claim_probe(&self) -> bool {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    async fn record(&self, was_network_error: bool) {
        match self.get_state() {
            CircuitState::HalfOpen => {
                self.probe_in_flight.store(false, Ordering::Release);
                if was_network_error {
                    self.transition_to_open().await;
                } else {
                    self.transition_to_closed().await;
                }
            }
            _ => {
                let ratio = self.push_outcome(was_network_error);
                if ratio > self.config.trip_ratio {
                    self.transition_to_open().await;
                }
            }
        }
    }

    fn push_outcome(&self, was_network_error: bool) -> f64 {
        let mut window = self.window.lock().expect("circuit breaker window lock poisoned");
        window.push_back(was_network_error);
        while window.len() > self.config.window_size {
            window.pop_front();
        }
        if window.is_empty() {
            return 0.0;
        }
        let errors = window.iter().filter(|e| **e).count();
        errors as f64 / window.len() as f64
    }

    async fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Relaxed);
        *self.opened_at.write().await = Some(Instant::now());
        self.probe_in_flight.store(false, Ordering::Release);
        warn!("circuit breaker {} opened: network error ratio exceeded threshold", self.name);
    }

    async fn transition_to_half_open(&self) {
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Relaxed);
        info!("circuit breaker {} half-open, admitting a probe", self.name);
    }

    async fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Relaxed);
        self.window.lock().expect("circuit breaker window lock poisoned").clear();
        info!("circuit breaker {} closed, service recovered", self.name);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("operation failed: {0}")]
    OperationFailed(E),
}
