//! Circuit breaker guarding the language-model provider.
//!
//! Counts consecutive retryable failures across all gateway calls. Once the
//! threshold is reached the circuit opens and calls fail fast without
//! touching the provider. After the cool-down one trial call is admitted;
//! success closes the circuit, failure re-opens it for another cool-down.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use husky_core::error::{HuskyError, Result};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Shared breaker state. One instance per gateway; interior mutability so
/// the gateway can hold it behind an `Arc` without a write lock on the
/// gateway itself.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Admit or reject a call. Returns `CircuitOpen` while the circuit is
    /// open and the cool-down has not elapsed; after the cool-down exactly
    /// one trial call is admitted at a time.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.opened_at {
            None => Ok(()),
            Some(opened_at) => {
                if opened_at.elapsed() < self.cooldown {
                    return Err(HuskyError::CircuitOpen);
                }
                if state.trial_in_flight {
                    return Err(HuskyError::CircuitOpen);
                }
                state.trial_in_flight = true;
                info!("circuit cool-down elapsed, admitting trial call");
                Ok(())
            }
        }
    }

    /// Record a successful provider call. Closes the circuit and resets the
    /// failure count.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.opened_at.is_some() {
            info!("trial call succeeded, closing circuit");
        }
        *state = BreakerState::default();
    }

    /// Record a failed provider call. Only retryable failures count toward
    /// the threshold; permanent errors say nothing about provider health.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures += 1;
        state.trial_in_flight = false;
        if state.consecutive_failures >= self.failure_threshold && state.opened_at.is_none() {
            warn!(
                failures = state.consecutive_failures,
                "failure threshold reached, opening circuit"
            );
            state.opened_at = Some(Instant::now());
        } else if state.opened_at.is_some() {
            // Failed trial call: restart the cool-down.
            state.opened_at = Some(Instant::now());
        }
    }

    /// Whether the circuit is currently open (fail-fast mode).
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .opened_at
            .is_some_and(|t| t.elapsed() < self.cooldown)
    }
}
