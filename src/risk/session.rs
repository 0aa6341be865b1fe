use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::types::{InterventionTier, RiskCategory};

/// One remembered per-category peak. The rolling window holds a bounded
/// number of these and anything older than the lookback horizon is pruned.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PeakSample {
    pub at: DateTime<Utc>,
    pub category: RiskCategory,
    pub score: f32,
}

/// Hysteresis bookkeeping for one (session, category) pair.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TierState {
    pub tier: InterventionTier,
    /// When the score first stayed below the current tier's exit threshold.
    pub below_since: Option<DateTime<Utc>>,
}

/// Rolling per-session context. Lives only in memory, bounded in size, and
/// owned exclusively by its session while an analyze is in flight.
#[derive(Debug)]
pub struct ConversationState {
    pub session_id: String,
    window: VecDeque<PeakSample>,
    tiers: [TierState; RiskCategory::ALL.len()],
    last_scores: [f32; RiskCategory::ALL.len()],
    pub last_activity: DateTime<Utc>,
    pub messages_seen: u64,
}

impl ConversationState {
    fn new(session_id: String, now: DateTime<Utc>) -> Self {
        ConversationState {
            session_id,
            window: VecDeque::new(),
            tiers: Default::default(),
            last_scores: Default::default(),
            last_activity: now,
            messages_seen: 0,
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Drops samples past the horizon, then oldest-first down to the cap.
    pub(crate) fn prune(&mut self, now: DateTime<Utc>, horizon: chrono::Duration, max_samples: usize) {
        while let Some(front) = self.window.front() {
            if now.signed_duration_since(front.at) >= horizon {
                self.window.pop_front();
            } else {
                break;
            }
        }
        while self.window.len() > max_samples {
            self.window.pop_front();
        }
    }

    /// Strongest decayed residual for a category over the current window.
    pub(crate) fn decayed_peak(
        &self,
        category: RiskCategory,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
        decay_lambda: f32,
    ) -> f32 {
        self.window
            .iter()
            .filter(|sample| sample.category == category)
            .map(|sample| {
                let age = now.signed_duration_since(sample.at);
                sample.score * decay_factor(age, horizon, decay_lambda)
            })
            .fold(0.0f32, f32::max)
    }

    pub(crate) fn record_peak(&mut self, category: RiskCategory, score: f32, at: DateTime<Utc>) {
        self.window.push_back(PeakSample {
            at,
            category,
            score,
        });
    }

    /// Categories that still carry signal: residual window samples or an
    /// active intervention tier.
    pub(crate) fn active_categories(&self) -> Vec<RiskCategory> {
        RiskCategory::ALL
            .iter()
            .copied()
            .filter(|category| {
                self.tiers[category.index()].tier > InterventionTier::None
                    || self.window.iter().any(|s| s.category == *category)
            })
            .collect()
    }

    pub(crate) fn tier_state(&self, category: RiskCategory) -> TierState {
        self.tiers[category.index()]
    }

    pub(crate) fn set_tier_state(&mut self, category: RiskCategory, state: TierState) {
        self.tiers[category.index()] = state;
    }

    pub(crate) fn last_score(&self, category: RiskCategory) -> f32 {
        self.last_scores[category.index()]
    }

    pub(crate) fn set_last_score(&mut self, category: RiskCategory, score: f32) {
        self.last_scores[category.index()] = score;
    }

    #[cfg(test)]
    pub(crate) fn window_len(&self) -> usize {
        self.window.len()
    }
}

/// Exponential decay toward zero across the lookback horizon; zero beyond it.
pub(crate) fn decay_factor(age: chrono::Duration, horizon: chrono::Duration, lambda: f32) -> f32 {
    if age >= horizon {
        return 0.0;
    }
    let age_ms = age.num_milliseconds().max(0) as f32;
    let horizon_ms = horizon.num_milliseconds().max(1) as f32;
    (-lambda * age_ms / horizon_ms).exp()
}

/// Sharded registry of live sessions. Each entry is an `Arc<Mutex<_>>` so one
/// session's analyze never blocks another's; the mutex also serializes the
/// eviction path against in-flight analyzes.
pub struct SessionRegistry {
    inner: DashMap<String, Arc<Mutex<ConversationState>>>,
    idle_timeout: chrono::Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        SessionRegistry {
            inner: DashMap::new(),
            idle_timeout: chrono::Duration::from_std(idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(900)),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Fetches the session, creating fresh state on first sight.
    pub(crate) fn checkout(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Arc<Mutex<ConversationState>> {
        self.inner
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ConversationState::new(session_id.to_string(), now)))
            })
            .clone()
    }

    /// Fetches the session only if it already exists (empty-message touch).
    pub(crate) fn peek(&self, session_id: &str) -> Option<Arc<Mutex<ConversationState>>> {
        self.inner.get(session_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Evicts idle sessions, then longest-idle sessions over the global cap.
    /// A session with an in-flight analyze holds its mutex and is skipped.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0usize;
        let mut survivors: Vec<(String, DateTime<Utc>)> = Vec::new();

        let keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let mut last_activity = None;
            let removed = self
                .inner
                .remove_if(&key, |_, value| match value.try_lock() {
                    Ok(state) => {
                        let idle = now.signed_duration_since(state.last_activity);
                        if idle >= self.idle_timeout {
                            true
                        } else {
                            last_activity = Some(state.last_activity);
                            false
                        }
                    }
                    Err(_) => false,
                })
                .is_some();
            if removed {
                evicted += 1;
            } else if let Some(at) = last_activity {
                survivors.push((key, at));
            }
        }

        if self.inner.len() > self.max_sessions {
            let excess = self.inner.len() - self.max_sessions;
            survivors.sort_by_key(|(_, at)| *at);
            for (key, _) in survivors.into_iter().take(excess) {
                let removed = self
                    .inner
                    .remove_if(&key, |_, value| value.try_lock().is_ok())
                    .is_some();
                if removed {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            debug!("evicted {} idle sessions, {} remain", evicted, self.inner.len());
        }
        evicted
    }

    /// Spawns a background sweep loop. The returned handle cancels the loop
    /// on drop.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> SweeperHandle {
        let registry = self;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.evict_idle(Utc::now());
                    }
                }
            }
        });
        SweeperHandle { cancel }
    }
}

pub struct SweeperHandle {
    cancel: CancellationToken,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
