use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;

use super::session::ConversationState;
use super::types::{MatchResult, RiskCategory};

/// Residuals below this are treated as fully decayed and are not re-recorded,
/// so quiet categories drop out of the window instead of trailing forever.
const SCORE_FLOOR: f32 = 0.05;

/// One category's combined risk for the current message.
#[derive(Debug, Clone, Copy)]
pub struct CategoryScore {
    pub category: RiskCategory,
    /// max(base, decayed history peak).
    pub score: f32,
    /// Contribution of the current message alone.
    pub base: f32,
}

/// Combines current-message matches with the session's rolling history.
///
/// Base score per category is the strongest match (similarity x severity
/// weight). History contributes its decayed peak, so a strong recent signal
/// is not erased by a brief lull, while old peaks fade to zero across the
/// lookback horizon. Categories with an active tier but no signal still get
/// a (zero-score) entry so the policy can walk them back down.
///
/// Returned scores are sorted strongest first; ties go to the higher-priority
/// category, which makes the first element the dominant category.
pub(crate) fn score_message(
    matches: &[MatchResult],
    state: &mut ConversationState,
    now: DateTime<Utc>,
    cfg: &ScoringConfig,
) -> Vec<CategoryScore> {
    let horizon = cfg.horizon();
    state.prune(now, horizon, cfg.max_window_samples);

    let mut bases = [0.0f32; RiskCategory::ALL.len()];
    for m in matches {
        let contribution = m.similarity * m.weight;
        let slot = &mut bases[m.category.index()];
        if contribution > *slot {
            *slot = contribution;
        }
    }

    let mut scores: Vec<CategoryScore> = Vec::new();
    let mut considered = [false; RiskCategory::ALL.len()];
    for category in matches
        .iter()
        .map(|m| m.category)
        .chain(state.active_categories())
    {
        if considered[category.index()] {
            continue;
        }
        considered[category.index()] = true;

        let base = bases[category.index()];
        let residual = state.decayed_peak(category, now, horizon, cfg.decay_lambda);
        let score = base.max(residual);
        scores.push(CategoryScore {
            category,
            score,
            base,
        });
    }

    for cs in &scores {
        if cs.score >= SCORE_FLOOR {
            state.record_peak(cs.category, cs.score, now);
        }
    }
    state.prune(now, horizon, cfg.max_window_samples);

    scores.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.category.priority_rank().cmp(&b.category.priority_rank()))
    });
    scores
}
