use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetrySnapshot {
    pub messages_analyzed: u64,
    pub matches_found: u64,
    pub degraded_analyses: u64,
    pub risk_events_emitted: u64,
    pub actions_emitted: u64,
    pub sessions_evicted: u64,
    pub last_analyze_ms: u64,
}

/// Cheap shared counters for the engine. Contains no message content.
#[derive(Debug, Default)]
pub struct EngineTelemetry {
    messages_analyzed: AtomicU64,
    matches_found: AtomicU64,
    degraded_analyses: AtomicU64,
    risk_events_emitted: AtomicU64,
    actions_emitted: AtomicU64,
    sessions_evicted: AtomicU64,
    last_analyze_ms: AtomicU64,
}

impl EngineTelemetry {
    pub fn record_analysis(&self, elapsed: Duration, matches: usize, degraded: bool) {
        self.messages_analyzed.fetch_add(1, Ordering::Relaxed);
        self.matches_found.fetch_add(matches as u64, Ordering::Relaxed);
        if degraded {
            self.degraded_analyses.fetch_add(1, Ordering::Relaxed);
        }
        self.last_analyze_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_emitted(&self, events: usize, actions: usize) {
        self.risk_events_emitted
            .fetch_add(events as u64, Ordering::Relaxed);
        self.actions_emitted
            .fetch_add(actions as u64, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.sessions_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            messages_analyzed: self.messages_analyzed.load(Ordering::Relaxed),
            matches_found: self.matches_found.load(Ordering::Relaxed),
            degraded_analyses: self.degraded_analyses.load(Ordering::Relaxed),
            risk_events_emitted: self.risk_events_emitted.load(Ordering::Relaxed),
            actions_emitted: self.actions_emitted.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            last_analyze_ms: self.last_analyze_ms.load(Ordering::Relaxed),
        }
    }
}
