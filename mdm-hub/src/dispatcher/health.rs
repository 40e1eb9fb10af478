//! Endpoint health tracking and round-robin selection
//!
//! Lives behind the pool's mutex; every method is synchronous and must not
//! be held across an `.await`.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Health of one endpoint
#[derive(Debug, Clone)]
struct EndpointHealth {
    consecutive_failures: u32,
    healthy: bool,
    /// Last time an unhealthy endpoint was handed out as a probe
    last_probe: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
}

impl EndpointHealth {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            healthy: true,
            last_probe: None,
            total_successes: 0,
            total_failures: 0,
        }
    }
}

/// Snapshot of one endpoint for diagnostics
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Round-robin cursor plus per-endpoint health
#[derive(Debug)]
pub(crate) struct HealthTable {
    endpoints: Vec<String>,
    states: Vec<EndpointHealth>,
    cursor: usize,
    failure_threshold: u32,
    probe_interval: Duration,
}

impl HealthTable {
    pub(crate) fn new(endpoints: Vec<String>, failure_threshold: u32, probe_interval: Duration) -> Self {
        let states = endpoints.iter().map(|_| EndpointHealth::new()).collect();
        Self {
            endpoints,
            states,
            cursor: 0,
            failure_threshold: failure_threshold.max(1),
            probe_interval,
        }
    }

    pub(crate) fn endpoint(&self, index: usize) -> &str {
        &self.endpoints[index]
    }

    pub(crate) fn len(&self) -> usize {
        self.endpoints.len()
    }

    fn probe_due(&self, index: usize, now: Instant) -> bool {
        match self.states[index].last_probe {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.probe_interval,
        }
    }

    /// Pick the next endpoint.
    ///
    /// Order of preference:
    /// 1. Next healthy endpoint in round-robin order, skipping `exclude`
    ///    (the endpoint that just failed) when there is an alternative
    /// 2. An unhealthy endpoint whose probe is due (marks the probe)
    /// 3. `exclude` itself, if it is still healthy
    ///
    /// `None` means every endpoint is unhealthy and none may be probed yet.
    pub(crate) fn select(&mut self, exclude: Option<usize>, now: Instant) -> Option<usize> {
        let n = self.endpoints.len();
        if n == 0 {
            return None;
        }

        for step in 0..n {
            let index = (self.cursor + step) % n;
            if Some(index) == exclude && n > 1 {
                continue;
            }
            if self.states[index].healthy {
                self.cursor = (index + 1) % n;
                return Some(index);
            }
        }

        for step in 0..n {
            let index = (self.cursor + step) % n;
            if !self.states[index].healthy && self.probe_due(index, now) {
                self.states[index].last_probe = Some(now);
                self.cursor = (index + 1) % n;
                tracing::debug!(endpoint = %self.endpoints[index], "Probing unhealthy endpoint");
                return Some(index);
            }
        }

        match exclude {
            Some(index) if index < n && self.states[index].healthy => {
                self.cursor = (index + 1) % n;
                Some(index)
            }
            _ => None,
        }
    }

    /// True if a call could be dispatched right now (does not consume a probe)
    pub(crate) fn any_available(&self, now: Instant) -> bool {
        (0..self.endpoints.len()).any(|i| self.states[i].healthy || self.probe_due(i, now))
    }

    pub(crate) fn record_success(&mut self, index: usize) {
        let state = &mut self.states[index];
        if !state.healthy {
            tracing::info!(endpoint = %self.endpoints[index], "Endpoint recovered");
        }
        state.consecutive_failures = 0;
        state.healthy = true;
        state.last_probe = None;
        state.total_successes += 1;
    }

    /// Endpoint answered but refused the request: alive, not a success
    pub(crate) fn record_alive(&mut self, index: usize) {
        let state = &mut self.states[index];
        state.consecutive_failures = 0;
        state.healthy = true;
        state.last_probe = None;
    }

    pub(crate) fn record_failure(&mut self, index: usize, now: Instant) {
        let threshold = self.failure_threshold;
        let state = &mut self.states[index];
        state.consecutive_failures += 1;
        state.total_failures += 1;

        if state.healthy && state.consecutive_failures >= threshold {
            state.healthy = false;
            state.last_probe = Some(now);
            tracing::warn!(
                endpoint = %self.endpoints[index],
                consecutive_failures = state.consecutive_failures,
                "Endpoint marked unhealthy"
            );
        } else if !state.healthy {
            // failed probe: wait a full interval before the next one
            state.last_probe = Some(now);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<EndpointStatus> {
        self.endpoints
            .iter()
            .zip(&self.states)
            .map(|(endpoint, state)| EndpointStatus {
                endpoint: endpoint.clone(),
                healthy: state.healthy,
                consecutive_failures: state.consecutive_failures,
                total_successes: state.total_successes,
                total_failures: state.total_failures,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n: usize) -> HealthTable {
        let endpoints = (0..n).map(|i| format!("http://ep{}", i)).collect();
        HealthTable::new(endpoints, 2, Duration::from_secs(30))
    }

    #[test]
    fn test_round_robin_order() {
        let mut t = table(3);
        let now = Instant::now();
        let picks: Vec<usize> = (0..6).map(|_| t.select(None, now).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_exclude_rotates_past_failed_endpoint() {
        let mut t = table(3);
        let now = Instant::now();
        assert_eq!(t.select(None, now), Some(0));
        // cursor now at 1; excluding 1 moves on to 2
        assert_eq!(t.select(Some(1), now), Some(2));
    }

    #[test]
    fn test_single_endpoint_may_repeat() {
        let mut t = table(1);
        let now = Instant::now();
        assert_eq!(t.select(Some(0), now), Some(0));
    }

    #[test]
    fn test_unhealthy_endpoint_skipped() {
        let mut t = table(2);
        let now = Instant::now();
        t.record_failure(0, now);
        t.record_failure(0, now);

        for _ in 0..4 {
            assert_eq!(t.select(None, now), Some(1));
        }
    }

    #[test]
    fn test_all_unhealthy_until_probe_due() {
        let mut t = table(2);
        let now = Instant::now();
        for i in 0..2 {
            t.record_failure(i, now);
            t.record_failure(i, now);
        }

        assert_eq!(t.select(None, now), None);
        assert!(!t.any_available(now));

        let later = now + Duration::from_secs(31);
        assert!(t.any_available(later));
        let probe = t.select(None, later).unwrap();
        // only one probe per interval per endpoint
        let second = t.select(None, later).unwrap();
        assert_ne!(probe, second);
        assert_eq!(t.select(None, later), None);
    }

    #[test]
    fn test_success_restores_health() {
        let mut t = table(1);
        let now = Instant::now();
        t.record_failure(0, now);
        t.record_failure(0, now);
        assert!(!t.snapshot()[0].healthy);

        t.record_success(0);
        let status = &t.snapshot()[0];
        assert!(status.healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.total_failures, 2);
        assert_eq!(status.total_successes, 1);
    }

    #[test]
    fn test_failures_below_threshold_stay_healthy() {
        let mut t = table(1);
        t.record_failure(0, Instant::now());
        assert!(t.snapshot()[0].healthy);
    }
}
