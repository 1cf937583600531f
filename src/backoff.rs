//! # Backoff
//!
//! Fibonacci backoff for failed reconciliations, tracked per certificate id.
//!
//! The sequence grows more slowly than exponential backoff (1m, 1m, 2m, 3m,
//! 5m, 8m, ... capped), which suits provider-side certificate provisioning:
//! transient failures resolve within minutes and repeated retries must not
//! hammer the provider API. A successful pass resets the id's sequence.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::types::CertId;

/// Fibonacci sequence over minutes, capped at a maximum.
#[derive(Debug, Clone)]
struct FibonacciBackoff {
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    fn next_backoff(&mut self) -> Duration {
        let result = Duration::from_secs(self.current_minutes * 60);
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        result
    }
}

/// Per-certificate backoff state for the controller's error policy.
#[derive(Debug)]
pub struct BackoffRegistry {
    min_minutes: u64,
    max_minutes: u64,
    backoffs: Mutex<HashMap<CertId, FibonacciBackoff>>,
}

impl BackoffRegistry {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    /// Next requeue delay for `id`, advancing its sequence.
    pub fn next_for(&self, id: &CertId) -> Duration {
        let mut backoffs = self.backoffs.lock().expect("backoff mutex poisoned");
        backoffs
            .entry(id.clone())
            .or_insert_with(|| FibonacciBackoff::new(self.min_minutes, self.max_minutes))
            .next_backoff()
    }

    /// Forget `id`'s sequence after a successful pass, so the next failure
    /// starts from the minimum again.
    pub fn reset(&self, id: &CertId) {
        self.backoffs
            .lock()
            .expect("backoff mutex poisoned")
            .remove(id);
    }
}

impl Default for BackoffRegistry {
    /// 1 minute minimum, 10 minute cap: 1m, 1m, 2m, 3m, 5m, 8m, 10m, 10m, ...
    fn default() -> Self {
        Self::new(1, 10)
    }
}
