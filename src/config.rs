// src/config.rs

use std::collections::HashMap;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::risk::policy::TierThresholds;
use crate::risk::types::RiskCategory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub matcher: MatcherConfig,
    pub scoring: ScoringConfig,
    pub policy: PolicyConfig,
    pub sessions: SessionConfig,
    /// Scores at or above this emit a RiskEvent even without a tier change.
    pub reporting_threshold: f32,
    /// Longest substring of the raw message that may appear in any emitted
    /// field.
    pub redaction_bound: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            matcher: MatcherConfig::default(),
            scoring: ScoringConfig::default(),
            policy: PolicyConfig::default(),
            sessions: SessionConfig::default(),
            reporting_threshold: 0.85,
            redaction_bound: 12,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.policy.validate()?;
        if !(0.0..=1.0).contains(&self.reporting_threshold) {
            return Err(format!(
                "reporting_threshold {} outside [0, 1]",
                self.reporting_threshold
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Per-message matching budget; once spent, matching finishes exact-only
    /// and the result is flagged degraded.
    pub budget_ms: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig { budget_ms: 25 }
    }
}

impl MatcherConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Lookback horizon: session risk fully decays across this span.
    pub lookback_horizon_secs: u64,
    /// Steepness of the exponential decay inside the horizon.
    pub decay_lambda: f32,
    /// Hard cap on rolling-window samples per session.
    pub max_window_samples: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            lookback_horizon_secs: 900,
            decay_lambda: 3.0,
            max_window_samples: 64,
        }
    }
}

impl ScoringConfig {
    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookback_horizon_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    pub default_thresholds: TierThresholds,
    /// Per-category overrides; anything absent uses the default set.
    pub per_category: HashMap<RiskCategory, TierThresholds>,
}

impl PolicyConfig {
    pub fn thresholds_for(&self, category: RiskCategory) -> TierThresholds {
        self.per_category
            .get(&category)
            .copied()
            .unwrap_or(self.default_thresholds)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.default_thresholds.validate()?;
        for (category, thresholds) in &self.per_category {
            thresholds
                .validate()
                .map_err(|e| format!("{}: {}", category.as_str(), e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted.
    pub idle_timeout_secs: u64,
    /// Global cap; longest-idle sessions are evicted beyond it.
    pub max_sessions: usize,
    /// Background sweeper period.
    pub sweep_period_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            idle_timeout_secs: 1800,
            max_sessions: 10_000,
            sweep_period_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }
}

// Global configuration
lazy_static! {
    pub static ref ENGINE_CONFIG: EngineConfig = EngineConfig::default();
}
