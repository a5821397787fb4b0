//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on concurrent probes per category.
pub const MAX_WORKERS: usize = 10;

/// Scheduling knobs for one orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Requested concurrent probes per category.
    #[serde(default = "default_worker_budget")]
    pub worker_budget: usize,
    /// Per-probe deadline in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Per-category deadline in seconds.
    #[serde(default = "default_category_timeout")]
    pub category_timeout_secs: u64,
    /// Pause between consecutive dispatches, in milliseconds.
    #[serde(default = "default_inter_dispatch_delay")]
    pub inter_dispatch_delay_ms: u64,
    /// Best-match confidence at or above which a hit counts as found.
    #[serde(default = "default_found_threshold")]
    pub found_threshold: f64,
}

fn default_worker_budget() -> usize {
    5
}

fn default_probe_timeout() -> u64 {
    60
}

fn default_category_timeout() -> u64 {
    300
}

fn default_inter_dispatch_delay() -> u64 {
    500
}

fn default_found_threshold() -> f64 {
    0.75
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_budget: default_worker_budget(),
            probe_timeout_secs: default_probe_timeout(),
            category_timeout_secs: default_category_timeout(),
            inter_dispatch_delay_ms: default_inter_dispatch_delay(),
            found_threshold: default_found_threshold(),
        }
    }
}

impl OrchestratorConfig {
    /// Worker count for a category of `platform_count` platforms: the
    /// budget clamped to `[1, MAX_WORKERS]` and to the platform count.
    pub fn workers_for(&self, platform_count: usize) -> usize {
        self.pool_size().min(platform_count.max(1))
    }

    /// Size of the long-lived worker pool.
    pub fn pool_size(&self) -> usize {
        self.worker_budget.clamp(1, MAX_WORKERS)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn category_timeout(&self) -> Duration {
        Duration::from_secs(self.category_timeout_secs)
    }

    pub fn inter_dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_dispatch_delay_ms)
    }

    /// Threshold clamped into `[0, 1]`.
    pub fn found_threshold(&self) -> f64 {
        if self.found_threshold.is_nan() {
            default_found_threshold()
        } else {
            self.found_threshold.clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.worker_budget, 5);
        assert_eq!(config.probe_timeout(), Duration::from_secs(60));
        assert_eq!(config.category_timeout(), Duration::from_secs(300));
        assert_eq!(config.inter_dispatch_delay(), Duration::from_millis(500));
        assert_eq!(config.found_threshold(), 0.75);
    }

    #[test]
    fn test_workers_for_clamps() {
        let mut config = OrchestratorConfig::default();
        assert_eq!(config.workers_for(2), 2);
        assert_eq!(config.workers_for(20), 5);

        config.worker_budget = 50;
        assert_eq!(config.workers_for(20), MAX_WORKERS);
        assert_eq!(config.pool_size(), MAX_WORKERS);

        config.worker_budget = 0;
        assert_eq!(config.workers_for(20), 1);
        assert_eq!(config.workers_for(0), 1);
    }

    #[test]
    fn test_found_threshold_clamped() {
        let config = OrchestratorConfig {
            found_threshold: 1.5,
            ..Default::default()
        };
        assert_eq!(config.found_threshold(), 1.0);
        let config = OrchestratorConfig {
            found_threshold: f64::NAN,
            ..Default::default()
        };
        assert_eq!(config.found_threshold(), 0.75);
    }

    #[test]
    fn test_config_deserialization_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(r#"{"worker_budget": 8}"#).unwrap();
        assert_eq!(config.worker_budget, 8);
        assert_eq!(config.probe_timeout_secs, 60);
        assert_eq!(config.category_timeout_secs, 300);
        assert_eq!(config.inter_dispatch_delay_ms, 500);
        assert_eq!(config.found_threshold, 0.75);
    }

    #[test]
    fn test_config_serialization() {
        let json = serde_json::to_string(&OrchestratorConfig::default()).unwrap();
        assert!(json.contains("\"worker_budget\":5"));
        assert!(json.contains("\"probe_timeout_secs\":60"));
    }
}
