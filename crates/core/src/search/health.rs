//! # Backend Health
//!
//! Time-windowed failure counts per backend. Shared by every in-flight
//! retrieval sub-unit, injected into the retrieval stage rather than held as
//! global state.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HealthSettings;

/// Skip a backend after `threshold` failures within `window`
pub struct BackendHealth {
    threshold: usize,
    window: Duration,
    failures: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl BackendHealth {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(settings.failure_threshold, Duration::from_secs(settings.window_secs))
    }

    /// Whether a new call to `backend` may start.
    ///
    /// Pruning and the threshold check happen under one lock, so a call is
    /// refused as soon as the failure that crosses the threshold is
    /// recorded. Calls admitted before that point still run to completion
    /// and their outcomes are still recorded.
    pub fn admit(&self, backend: &str) -> bool {
        let now = Instant::now();
        let Ok(mut failures) = self.failures.lock() else {
            return true;
        };
        match failures.get_mut(backend) {
            Some(times) => {
                prune(times, now, self.window);
                times.len() < self.threshold
            }
            None => true,
        }
    }

    /// Record a failed call; true when this failure crossed the threshold
    pub fn record_failure(&self, backend: &str) -> bool {
        let now = Instant::now();
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        let times = failures.entry(backend.to_string()).or_default();
        prune(times, now, self.window);
        times.push_back(now);
        tracing::debug!(backend, recent_failures = times.len(), "Backend failure recorded");
        times.len() == self.threshold
    }

    /// A success clears the backend's history
    pub fn record_success(&self, backend: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(backend);
        }
    }

    /// Failures still inside the window
    pub fn recent_failures(&self, backend: &str) -> usize {
        let now = Instant::now();
        self.failures
            .lock()
            .ok()
            .and_then(|mut failures| {
                failures.get_mut(backend).map(|times| {
                    prune(times, now, self.window);
                    times.len()
                })
            })
            .unwrap_or(0)
    }
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self::from_settings(&HealthSettings::default())
    }
}

fn prune(times: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = times.front() {
        if now.duration_since(*oldest) >= window {
            times.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_after_threshold() {
        let health = BackendHealth::new(3, Duration::from_secs(120));
        health.record_failure("pubmed");
        health.record_failure("pubmed");
        assert!(health.admit("pubmed"));
        health.record_failure("pubmed");
        assert!(!health.admit("pubmed"));
        assert!(health.admit("semantic_scholar"));
    }

    #[test]
    fn test_admitted_calls_still_record() {
        let health = BackendHealth::new(2, Duration::from_secs(120));
        // four sub-units admitted before any of them fails
        let admitted = (0..4).filter(|_| health.admit("pubmed")).count();
        assert_eq!(admitted, 4);

        let crossed: Vec<bool> = (0..4).map(|_| health.record_failure("pubmed")).collect();
        assert_eq!(crossed, vec![false, true, false, false]);
        assert_eq!(health.recent_failures("pubmed"), 4);
        assert!(!health.admit("pubmed"));
    }

    #[test]
    fn test_success_resets() {
        let health = BackendHealth::new(2, Duration::from_secs(120));
        health.record_failure("pubmed");
        health.record_failure("pubmed");
        health.record_success("pubmed");
        assert!(health.admit("pubmed"));
        assert_eq!(health.recent_failures("pubmed"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_expire_after_window() {
        let health = BackendHealth::new(2, Duration::from_secs(120));
        health.record_failure("pubmed");
        health.record_failure("pubmed");
        assert!(!health.admit("pubmed"));

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(health.admit("pubmed"));
        assert_eq!(health.recent_failures("pubmed"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_recording() {
        let health = std::sync::Arc::new(BackendHealth::new(50, Duration::from_secs(120)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let health = health.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    health.record_failure("pubmed");
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(health.recent_failures("pubmed"), 50);
        assert!(!health.admit("pubmed"));
    }
}
