//! Adaptive concurrency for the shared request pool.
//!
//! Request outcomes go into a bounded sliding window. Once the window is
//! full, every new outcome may move the pool size by one step: down when the
//! success rate drops below `1 - error_threshold`, up when it reaches
//! `success_threshold`. Steps are separated by a cooldown so a burst of
//! failures produces a single adjustment.
//!
//! A resize swaps in a fresh semaphore. Requests already holding a permit
//! keep it on the old semaphore; new requests see the new limit.

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub initial: usize,
    pub floor: usize,
    pub ceiling: usize,
    pub window: usize,
    pub error_threshold: f64,
    pub success_threshold: f64,
    pub cooldown: Duration,
    /// When false outcomes are still recorded but the size never changes
    pub enabled: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            initial: 10,
            floor: 5,
            ceiling: 15,
            window: 50,
            error_threshold: 0.3,
            success_threshold: 0.9,
            cooldown: Duration::from_secs(60),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Decreased { from: usize, to: usize },
    Increased { from: usize, to: usize },
}

#[derive(Debug)]
struct ControllerState {
    window: VecDeque<bool>,
    current: usize,
    last_adjustment: Option<Instant>,
    total_requests: u64,
    total_successes: u64,
    adjustments: u64,
}

impl ControllerState {
    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        self.window.iter().filter(|ok| **ok).count() as f64 / self.window.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStats {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub window_success_rate: f64,
    pub current_concurrency: usize,
    pub adjustments: u64,
}

impl fmt::Display for ControllerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Concurrency: {} | Requests: {} ({} ok, {} failed) | Window success: {:.1}% | Adjustments: {}",
            self.current_concurrency,
            self.total_requests,
            self.total_successes,
            self.total_failures,
            self.window_success_rate * 100.0,
            self.adjustments
        )
    }
}

pub struct AdaptiveConcurrencyController {
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    gate: RwLock<Arc<Semaphore>>,
}

impl AdaptiveConcurrencyController {
    pub fn new(settings: ControllerSettings) -> Self {
        let initial = settings.initial.clamp(settings.floor, settings.ceiling.max(settings.floor));
        info!(
            "Adaptive concurrency controller: start {} (floor {}, ceiling {}, window {})",
            initial, settings.floor, settings.ceiling, settings.window
        );
        Self {
            state: Mutex::new(ControllerState {
                window: VecDeque::with_capacity(settings.window),
                current: initial,
                last_adjustment: None,
                total_requests: 0,
                total_successes: 0,
                adjustments: 0,
            }),
            gate: RwLock::new(Arc::new(Semaphore::new(initial))),
            settings,
        }
    }

    /// The semaphore new requests should acquire from.
    pub fn current_gate(&self) -> Arc<Semaphore> {
        self.gate.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn current_concurrency(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).current
    }

    pub fn record(&self, success: bool) -> Option<Adjustment> {
        self.record_at(success, Instant::now())
    }

    /// Records one outcome observed at `now` and applies at most one step.
    pub fn record_at(&self, success: bool, now: Instant) -> Option<Adjustment> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        state.total_requests += 1;
        if success {
            state.total_successes += 1;
        }
        if state.window.len() == self.settings.window {
            state.window.pop_front();
        }
        state.window.push_back(success);

        if !self.settings.enabled || state.window.len() < self.settings.window {
            return None;
        }
        if let Some(last) = state.last_adjustment {
            if now.saturating_duration_since(last) < self.settings.cooldown {
                return None;
            }
        }

        let rate = state.success_rate();
        let from = state.current;
        let adjustment = if rate < 1.0 - self.settings.error_threshold && from > self.settings.floor {
            Adjustment::Decreased { from, to: from - 1 }
        } else if rate >= self.settings.success_threshold && from < self.settings.ceiling {
            Adjustment::Increased { from, to: from + 1 }
        } else {
            return None;
        };

        let to = match adjustment {
            Adjustment::Decreased { to, .. } | Adjustment::Increased { to, .. } => to,
        };
        state.current = to;
        state.last_adjustment = Some(now);
        state.adjustments += 1;
        *self.gate.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(Semaphore::new(to));

        match adjustment {
            Adjustment::Decreased { .. } => warn!(
                "📉 Reducing concurrency {} -> {} (window success {:.1}%)",
                from,
                to,
                rate * 100.0
            ),
            Adjustment::Increased { .. } => info!(
                "📈 Raising concurrency {} -> {} (window success {:.1}%)",
                from,
                to,
                rate * 100.0
            ),
        }
        debug!("Controller adjustments so far: {}", state.adjustments);
        Some(adjustment)
    }

    pub fn stats(&self) -> ControllerStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        ControllerStats {
            total_requests: state.total_requests,
            total_successes: state.total_successes,
            total_failures: state.total_requests - state.total_successes,
            window_success_rate: state.success_rate(),
            current_concurrency: state.current,
            adjustments: state.adjustments,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }
}
