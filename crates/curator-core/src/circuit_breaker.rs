//! Per-endpoint circuit breaker.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::CircuitBreakerConfig;
use crate::endpoint::Endpoint;
use crate::error::FetchError;

/// Runtime circuit state for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitCell {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while the single half-open trial request is outstanding.
    trial_in_flight: bool,
}

impl Default for CircuitCell {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// Failure tracker gating outbound calls, isolated per endpoint.
///
/// Closed goes Open at `failure_threshold` consecutive failures; Open
/// goes HalfOpen once `reset_timeout` elapses, admitting exactly one
/// trial; a successful trial closes the circuit and a failed one
/// reopens it. Cells for unrelated endpoints never share a lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    cells: HashMap<Endpoint, Mutex<CircuitCell>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let cells = Endpoint::ALL
            .iter()
            .map(|&endpoint| (endpoint, Mutex::new(CircuitCell::default())))
            .collect();
        Self { config, cells }
    }

    /// Gate one request. `Ok(())` admits the caller; an open circuit
    /// fails fast with [`FetchError::CircuitOpen`] and no network call.
    pub fn try_acquire(&self, endpoint: Endpoint) -> Result<(), FetchError> {
        let mut cell = self.cell(endpoint);
        match cell.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if cell.trial_in_flight {
                    Err(FetchError::CircuitOpen { endpoint })
                } else {
                    cell.trial_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let can_probe = cell
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(false);
                if can_probe {
                    debug!(%endpoint, "circuit half-open, admitting trial request");
                    cell.state = CircuitState::HalfOpen;
                    cell.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(FetchError::CircuitOpen { endpoint })
                }
            }
        }
    }

    pub fn record_success(&self, endpoint: Endpoint) {
        let mut cell = self.cell(endpoint);
        if cell.state != CircuitState::Closed {
            debug!(%endpoint, "circuit closed after successful request");
        }
        cell.state = CircuitState::Closed;
        cell.consecutive_failures = 0;
        cell.opened_at = None;
        cell.trial_in_flight = false;
    }

    pub fn record_failure(&self, endpoint: Endpoint) {
        let mut cell = self.cell(endpoint);
        cell.consecutive_failures = cell.consecutive_failures.saturating_add(1);
        cell.trial_in_flight = false;

        let failed_trial = cell.state == CircuitState::HalfOpen;
        if failed_trial || cell.consecutive_failures >= self.config.failure_threshold {
            if cell.state != CircuitState::Open {
                warn!(
                    %endpoint,
                    failures = cell.consecutive_failures,
                    "circuit opened"
                );
            }
            cell.state = CircuitState::Open;
            cell.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self, endpoint: Endpoint) -> CircuitState {
        self.cell(endpoint).state
    }

    pub fn consecutive_failures(&self, endpoint: Endpoint) -> u32 {
        self.cell(endpoint).consecutive_failures
    }

    fn cell(&self, endpoint: Endpoint) -> std::sync::MutexGuard<'_, CircuitCell> {
        self.cells
            .get(&endpoint)
            .expect("cells are pre-built for every endpoint")
            .lock()
            .expect("circuit cell lock not poisoned")
    }
}
