//! Poller configuration.

use std::time::Duration;

/// Configuration for the poll loop, passed in at construction time.
///
/// There is deliberately no retry budget, backoff, or circuit breaker in
/// here: every failure path converges on `retry_delay`, and a persistently
/// failing endpoint is simply retried forever. The only user-visible
/// consequence of sustained failure is the freshness signal going false
/// after `staleness_window`.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Endpoint serving the delimited alert feed (or the JSON-RPC API).
    pub url: String,
    /// Static bearer token sent on every request.
    pub token: String,
    /// Deadline for each in-flight transport phase; re-armed on every
    /// phase transition.
    pub phase_timeout: Duration,
    /// Fixed wait before the next poll cycle, on success and failure alike.
    pub retry_delay: Duration,
    /// Window after the last successful fetch during which the published
    /// snapshot still counts as fresh.
    pub staleness_window: Duration,
    /// Response buffer cap; bodies growing beyond this are reported as
    /// truncated.
    pub max_response_bytes: usize,
    /// Parse a truncated payload as-is instead of treating it as a
    /// transport failure.
    pub salvage_truncated: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost/api_csv.php".to_string(),
            token: String::new(),
            phase_timeout: Duration::from_millis(15_000),
            retry_delay: Duration::from_millis(10_000),
            staleness_window: Duration::from_millis(30_000),
            max_response_bytes: 64 * 1024,
            salvage_truncated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_expected_cadence() {
        let config = PollerConfig::default();
        assert_eq!(config.phase_timeout, Duration::from_secs(15));
        assert_eq!(config.retry_delay, Duration::from_secs(10));
        assert_eq!(config.staleness_window, Duration::from_secs(30));
        assert!(!config.salvage_truncated);
    }
}
