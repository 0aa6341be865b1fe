use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;

use super::matcher;
use super::normalize;
use super::policy;
use super::scorer;
use super::lexicon::LexiconStore;
use super::session::{SessionRegistry, SweeperHandle};
use super::telemetry::{EngineTelemetry, TelemetrySnapshot};
use super::types::{
    EngineError, InterventionAction, MessageEvent, RiskCategory, RiskEvent, SeverityBucket,
};

/// Everything one `analyze` call produced. Delivery is the collaborators'
/// concern; the engine only returns values.
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub risk_events: Vec<RiskEvent>,
    pub actions: Vec<InterventionAction>,
    pub degraded: bool,
}

/// The risk detection pipeline: fuzzy match against the current lexicon
/// snapshot, combine with rolling session context, walk the intervention
/// state machine, emit events and actions.
pub struct RiskEngine {
    config: EngineConfig,
    lexicon: LexiconStore,
    sessions: Arc<SessionRegistry>,
    telemetry: EngineTelemetry,
}

impl RiskEngine {
    pub fn new(config: EngineConfig) -> Self {
        let sessions = Arc::new(SessionRegistry::new(
            config.sessions.idle_timeout(),
            config.sessions.max_sessions,
        ));
        RiskEngine {
            config,
            lexicon: LexiconStore::new(),
            sessions,
            telemetry: EngineTelemetry::default(),
        }
    }

    pub fn with_defaults() -> Self {
        RiskEngine::new(EngineConfig::default())
    }

    pub fn lexicon(&self) -> &LexiconStore {
        &self.lexicon
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Sweeps idle sessions now; the background sweeper does this on a timer.
    pub fn evict_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.sessions.evict_idle(now);
        self.telemetry.record_evictions(evicted as u64);
        evicted
    }

    /// Background idle-session eviction; the handle cancels the loop on drop.
    pub fn spawn_eviction_sweeper(&self) -> SweeperHandle {
        Arc::clone(&self.sessions).spawn_sweeper(self.config.sessions.sweep_period())
    }

    /// Analyzes one message in its session context.
    ///
    /// Messages within a session are scored strictly in call order (the
    /// session lock serializes them); different sessions proceed in
    /// parallel. Blank messages are a no-op beyond refreshing the session's
    /// idle clock.
    pub async fn analyze(&self, event: MessageEvent) -> Result<AnalysisOutcome, EngineError> {
        let started = Instant::now();

        if event.raw_text.trim().is_empty() {
            if let Some(handle) = self.sessions.peek(&event.session_id) {
                handle.lock().await.touch(event.timestamp);
            }
            return Ok(AnalysisOutcome::default());
        }

        let snapshot = self.lexicon.current_snapshot();
        let handle = self.sessions.checkout(&event.session_id, event.timestamp);
        let mut state = handle.lock().await;
        state.messages_seen += 1;

        let norm = normalize::normalize(&event.raw_text);
        let matched = matcher::match_message(&norm, &snapshot, self.config.matcher.budget());
        if matched.degraded {
            warn!(
                "match budget exceeded ({} ms), finished exact-only",
                self.config.matcher.budget_ms
            );
        }

        let scores =
            scorer::score_message(&matched.matches, &mut state, event.timestamp, &self.config.scoring);

        let horizon = self.config.scoring.horizon();
        let mut risk_events = Vec::new();
        let mut actions = Vec::new();

        for cs in &scores {
            debug!(
                "session {} {} score {:.2} (base {:.2})",
                event.session_id,
                cs.category.as_str(),
                cs.score,
                cs.base
            );
            let prev = state.tier_state(cs.category);
            let thresholds = self.config.policy.thresholds_for(cs.category);
            let next = policy::evaluate(prev, cs.score, event.timestamp, &thresholds, horizon);
            state.set_tier_state(cs.category, next);

            let prev_score = state.last_score(cs.category);
            state.set_last_score(cs.category, cs.score);

            let tier_changed = next.tier != prev.tier;
            let crossed_reporting = cs.score >= self.config.reporting_threshold
                && prev_score < self.config.reporting_threshold;

            if tier_changed || crossed_reporting {
                let indicators = matched
                    .matches
                    .iter()
                    .filter(|m| m.category == cs.category)
                    .count();
                let excerpt = redacted_excerpt(cs.category, cs.score, indicators);
                ensure_redacted(&event.raw_text, &excerpt, self.config.redaction_bound)?;
                risk_events.push(RiskEvent {
                    id: Uuid::new_v4().to_string(),
                    session_id: event.session_id.clone(),
                    category: cs.category,
                    score: cs.score,
                    tier: next.tier,
                    lexicon_version: snapshot.version,
                    degraded: matched.degraded,
                    redacted_excerpt: excerpt,
                    timestamp: event.timestamp,
                });
            }

            if next.tier > prev.tier {
                actions.push(InterventionAction {
                    session_id: event.session_id.clone(),
                    category: cs.category,
                    tier: next.tier,
                    timestamp: event.timestamp,
                });
            }
        }

        state.touch(event.timestamp);
        drop(state);

        self.telemetry
            .record_analysis(started.elapsed(), matched.matches.len(), matched.degraded);
        self.telemetry.record_emitted(risk_events.len(), actions.len());

        Ok(AnalysisOutcome {
            risk_events,
            actions,
            degraded: matched.degraded,
        })
    }
}

/// Bounded, non-reversible stand-in for message text: category, severity
/// bucket and indicator count only.
fn redacted_excerpt(category: RiskCategory, score: f32, indicators: usize) -> String {
    format!(
        "{}/{} ({} indicator{})",
        category.as_str(),
        SeverityBucket::from_score(score).as_str(),
        indicators,
        if indicators == 1 { "" } else { "s" }
    )
}

/// Boundary assertion: nothing longer than `bound` characters may be shared
/// between the raw message and an emitted excerpt.
fn ensure_redacted(raw: &str, excerpt: &str, bound: usize) -> Result<(), EngineError> {
    if excerpt_leaks(raw, excerpt, bound) {
        return Err(EngineError::RedactionViolation);
    }
    Ok(())
}

pub(crate) fn excerpt_leaks(raw: &str, excerpt: &str, bound: usize) -> bool {
    let raw = raw.to_lowercase();
    let chars: Vec<char> = excerpt.to_lowercase().chars().collect();
    if chars.len() <= bound {
        return false;
    }
    for window in chars.windows(bound + 1) {
        let needle: String = window.iter().collect();
        if raw.contains(&needle) {
            return true;
        }
    }
    false
}
