use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::time::Duration;

use super::engine::excerpt_leaks;
use super::lexicon::LexiconStore;
use super::matcher;
use super::normalize;
use super::policy::{self, TierThresholds};
use super::scorer;
use super::session::{decay_factor, ConversationState, SessionRegistry, TierState};
use super::types::{
    InterventionTier, MatchResult, MessageEvent, RawLexiconEntry, RiskCategory, SensitivityTier,
};
use crate::config::ScoringConfig;

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn raw_entry(category: &str, pattern: &str, weight: f32, sensitivity: &str) -> RawLexiconEntry {
    RawLexiconEntry {
        category: category.into(),
        pattern: pattern.into(),
        weight,
        sensitivity: Some(sensitivity.into()),
    }
}

fn store_with(entries: Vec<RawLexiconEntry>) -> LexiconStore {
    let store = LexiconStore::new();
    let report = store.publish(entries);
    assert!(report.rejected.is_empty(), "{:?}", report.rejected);
    store
}

// -------- Normalization --------

#[test]
fn normalize_folds_leetspeak() {
    let norm = normalize::normalize("M33t m3 AL0N3");
    let tokens: Vec<&str> = norm.tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(tokens, vec!["meet", "me", "alone"]);
}

#[test]
fn normalize_collapses_long_runs() {
    let norm = normalize::normalize("heyyyy sooooo");
    let tokens: Vec<&str> = norm.tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(tokens, vec!["heyy", "soo"]);
}

#[test]
fn normalize_spans_point_into_raw_text() {
    let raw = "hey, wanna meet 😊 later?";
    let norm = normalize::normalize(raw);
    let meet = norm
        .tokens
        .iter()
        .find(|t| t.text == "meet")
        .expect("meet token");
    assert_eq!(&raw[meet.start..meet.end], "meet");
}

#[test]
fn normalize_drops_pure_separators() {
    assert!(normalize::normalize("!!! ... 😊😊").is_empty());
}

// -------- Matching --------

#[test]
fn obfuscated_grooming_phrase_matches() {
    let store = store_with(vec![raw_entry(
        "grooming",
        "meet me alone",
        0.9,
        "fuzzy_strict",
    )]);
    let snapshot = store.current_snapshot();
    let norm = normalize::normalize("m33t m3 alon3");
    let outcome = matcher::match_message(&norm, &snapshot, Duration::from_secs(1));

    assert!(!outcome.degraded);
    assert_eq!(outcome.matches.len(), 1);
    let m = &outcome.matches[0];
    assert_eq!(m.category, RiskCategory::Grooming);
    assert!(m.similarity >= SensitivityTier::FuzzyStrict.threshold());
}

#[test]
fn loose_entry_tolerates_word_substitution() {
    let store = store_with(vec![raw_entry(
        "grooming",
        "meet me alone",
        0.9,
        "fuzzy_loose",
    )]);
    let snapshot = store.current_snapshot();
    let norm = normalize::normalize("can we meet up alone tonight");
    let outcome = matcher::match_message(&norm, &snapshot, Duration::from_secs(1));

    assert_eq!(outcome.matches.len(), 1);
    let m = &outcome.matches[0];
    assert!(m.similarity >= SensitivityTier::FuzzyLoose.threshold());
    assert!(m.similarity < 1.0);
}

#[test]
fn similarity_at_threshold_is_included_one_below_is_not() {
    // 10-char pattern at fuzzy_loose (0.70): edit distance 3 sits exactly on
    // the threshold, distance 4 is one unit below it.
    let store = store_with(vec![raw_entry(
        "bullying",
        "aabbccddee",
        0.9,
        "fuzzy_loose",
    )]);
    let snapshot = store.current_snapshot();

    let on = matcher::match_message(
        &normalize::normalize("aabbccdxxx"),
        &snapshot,
        Duration::from_secs(1),
    );
    assert_eq!(on.matches.len(), 1);
    assert!((on.matches[0].similarity - 0.70).abs() < 1e-3);

    let below = matcher::match_message(
        &normalize::normalize("aabbccxxxx"),
        &snapshot,
        Duration::from_secs(1),
    );
    assert!(below.matches.is_empty());
}

#[test]
fn overlapping_spans_keep_highest_severity() {
    let store = store_with(vec![
        raw_entry("self_harm", "kill myself", 0.9, "fuzzy_loose"),
        raw_entry("bullying", "go kill yourself", 0.95, "fuzzy_strict"),
    ]);
    let snapshot = store.current_snapshot();
    let norm = normalize::normalize("go kill yourself");
    let outcome = matcher::match_message(&norm, &snapshot, Duration::from_secs(1));

    assert_eq!(outcome.matches.len(), 1);
    assert_eq!(outcome.matches[0].category, RiskCategory::Bullying);
}

#[test]
fn exhausted_budget_degrades_to_exact_only() {
    let store = store_with(vec![raw_entry(
        "grooming",
        "meet me alone",
        0.9,
        "fuzzy_strict",
    )]);
    let snapshot = store.current_snapshot();

    // Exact normalized form still matches with no budget left.
    let exact = matcher::match_message(
        &normalize::normalize("m33t m3 al0ne"),
        &snapshot,
        Duration::ZERO,
    );
    assert!(exact.degraded);
    assert_eq!(exact.matches.len(), 1);

    // An approximate form needs the fuzzy pass it no longer gets.
    let fuzzy = matcher::match_message(
        &normalize::normalize("meet mee alone"),
        &snapshot,
        Duration::ZERO,
    );
    assert!(fuzzy.degraded);
    assert!(fuzzy.matches.is_empty());
}

#[test]
fn match_results_are_deterministic() {
    let entries = vec![
        raw_entry("grooming", "meet me alone", 0.9, "fuzzy_loose"),
        raw_entry("distress", "i feel so alone", 0.7, "fuzzy_strict"),
    ];
    let store_a = store_with(entries.clone());
    let store_b = store_with(entries);
    let text = "i feel so alone, maybe meet me alone later";

    let run = |store: &LexiconStore| {
        let outcome = matcher::match_message(
            &normalize::normalize(text),
            &store.current_snapshot(),
            Duration::from_secs(1),
        );
        outcome
            .matches
            .iter()
            .map(|m| (m.category, m.pattern.clone(), m.span, m.similarity.to_bits()))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(&store_a), run(&store_b));
}

// -------- Lexicon store --------

#[test]
fn builtin_snapshot_is_available_before_any_publish() {
    let store = LexiconStore::new();
    let snapshot = store.current_snapshot();
    assert_eq!(snapshot.version, 0);
    assert!(snapshot.builtin);
    assert!(!snapshot.is_empty());
}

#[test]
fn builtin_snapshot_matches_keywords_only() {
    let store = LexiconStore::new();
    let snapshot = store.current_snapshot();

    let exact = matcher::match_message(
        &normalize::normalize("you should go kill yourself"),
        &snapshot,
        Duration::from_secs(1),
    );
    assert_eq!(exact.matches.len(), 1);
    assert!(!exact.degraded);

    let fuzzy = matcher::match_message(
        &normalize::normalize("go kill yourselff"),
        &snapshot,
        Duration::from_secs(1),
    );
    assert!(fuzzy.matches.is_empty());
}

#[test]
fn publish_rejects_invalid_entries_individually() {
    let store = LexiconStore::new();
    let report = store.publish(vec![
        raw_entry("grooming", "our little secret", 0.85, "fuzzy_strict"),
        raw_entry("grooming", "", 0.5, "fuzzy_strict"),
        raw_entry("grooming", "meet me alone", 1.7, "fuzzy_strict"),
        raw_entry("road_rage", "honk honk", 0.5, "fuzzy_strict"),
        raw_entry("bullying", "nobody likes you", 0.8, "whenever"),
    ]);

    assert_eq!(report.version, 1);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected.len(), 4);

    let snapshot = store.current_snapshot();
    assert_eq!(snapshot.version, 1);
    assert!(!snapshot.builtin);
    assert_eq!(snapshot.len(), 1);
}

#[test]
fn fully_rejected_publish_keeps_current_snapshot() {
    let store = LexiconStore::new();
    let report = store.publish(vec![raw_entry("nonsense", "whatever", 0.5, "exact")]);
    assert_eq!(report.accepted, 0);
    assert_eq!(report.version, 0);
    assert!(store.current_snapshot().builtin);
}

#[test]
fn publish_versions_are_monotonic() {
    let store = LexiconStore::new();
    let first = store.publish(vec![raw_entry("distress", "i'm scared", 0.6, "fuzzy_loose")]);
    let second = store.publish(vec![raw_entry("distress", "i'm scared", 0.6, "fuzzy_loose")]);
    assert!(second.version > first.version);
}

// -------- Scoring --------

fn grooming_match(similarity: f32, weight: f32) -> MatchResult {
    MatchResult {
        category: RiskCategory::Grooming,
        pattern: "meet me alone".into(),
        weight,
        similarity,
        span: (0, 13),
    }
}

#[test]
fn base_score_is_similarity_times_weight() {
    let cfg = ScoringConfig::default();
    let mut state = fresh_state("s");
    let scores = scorer::score_message(&[grooming_match(0.8, 0.5)], &mut state, at(0), &cfg);
    assert_eq!(scores.len(), 1);
    assert!((scores[0].score - 0.4).abs() < 1e-6);
}

#[test]
fn lull_does_not_reset_risk() {
    let cfg = ScoringConfig::default();
    let mut state = fresh_state("s");
    let first = scorer::score_message(&[grooming_match(1.0, 0.9)], &mut state, at(0), &cfg);
    assert!((first[0].score - 0.9).abs() < 1e-6);

    // A benign message one minute later still sees most of the peak.
    let second = scorer::score_message(&[], &mut state, at(60), &cfg);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].category, RiskCategory::Grooming);
    assert!(second[0].score > 0.7);
}

#[test]
fn scores_never_decrease_while_bases_rise() {
    let cfg = ScoringConfig::default();
    let mut state = fresh_state("s");
    let mut last = 0.0f32;
    for (i, base) in [0.3f32, 0.3, 0.5, 0.5, 0.8].iter().enumerate() {
        let scores =
            scorer::score_message(&[grooming_match(*base, 1.0)], &mut state, at(i as i64 * 30), &cfg);
        assert!(scores[0].score >= last - 1e-6);
        last = scores[0].score;
    }
}

#[test]
fn risk_fully_decays_past_the_horizon() {
    let cfg = ScoringConfig::default();
    let mut state = fresh_state("s");
    scorer::score_message(&[grooming_match(1.0, 0.9)], &mut state, at(0), &cfg);

    let later = at(cfg.lookback_horizon_secs as i64 + 1);
    let scores = scorer::score_message(&[], &mut state, later, &cfg);
    assert!(scores.is_empty());
    assert_eq!(state.window_len(), 0);
}

#[test]
fn dominant_category_ties_break_by_priority() {
    let cfg = ScoringConfig::default();
    let mut state = fresh_state("s");
    let matches = vec![
        MatchResult {
            category: RiskCategory::Distress,
            pattern: "i feel so alone".into(),
            weight: 0.8,
            similarity: 1.0,
            span: (0, 10),
        },
        MatchResult {
            category: RiskCategory::Sextortion,
            pattern: "no one has to know".into(),
            weight: 0.8,
            similarity: 1.0,
            span: (20, 35),
        },
    ];
    let scores = scorer::score_message(&matches, &mut state, at(0), &cfg);
    assert_eq!(scores[0].category, RiskCategory::Sextortion);
}

#[test]
fn window_is_bounded_by_sample_cap() {
    let cfg = ScoringConfig {
        max_window_samples: 8,
        ..ScoringConfig::default()
    };
    let mut state = fresh_state("s");
    for i in 0..50 {
        scorer::score_message(&[grooming_match(1.0, 0.9)], &mut state, at(i), &cfg);
    }
    assert!(state.window_len() <= 8);
}

fn fresh_state(id: &str) -> ConversationState {
    let registry = SessionRegistry::new(Duration::from_secs(60), 8);
    let handle = registry.checkout(id, at(0));
    // The registry hands out Arc<Mutex<_>>; unit tests want the bare state,
    // so drop the registry's clone before unwrapping.
    drop(registry);
    match std::sync::Arc::try_unwrap(handle) {
        Ok(mutex) => mutex.into_inner(),
        Err(_) => panic!("state still shared"),
    }
}

// -------- Decay --------

#[test]
fn decay_is_one_at_zero_age_and_zero_past_horizon() {
    let horizon = ChronoDuration::seconds(900);
    assert!((decay_factor(ChronoDuration::zero(), horizon, 3.0) - 1.0).abs() < 1e-6);
    assert_eq!(decay_factor(ChronoDuration::seconds(900), horizon, 3.0), 0.0);
    assert_eq!(decay_factor(ChronoDuration::seconds(2000), horizon, 3.0), 0.0);
}

// -------- Policy --------

#[test]
fn escalates_one_tier_at_enter_threshold() {
    let thresholds = TierThresholds::default();
    let horizon = ChronoDuration::seconds(900);

    let state = policy::evaluate(TierState::default(), 0.45, at(0), &thresholds, horizon);
    assert_eq!(state.tier, InterventionTier::ChildNudge);

    // A very strong score still climbs one tier per message.
    let state = policy::evaluate(TierState::default(), 0.99, at(0), &thresholds, horizon);
    assert_eq!(state.tier, InterventionTier::ChildNudge);
}

#[test]
fn single_dip_does_not_deescalate() {
    let thresholds = TierThresholds::default();
    let horizon = ChronoDuration::seconds(900);
    let prev = TierState {
        tier: InterventionTier::ChildNudgeAndLog,
        below_since: None,
    };

    // Below the enter band but above exit: hold.
    let held = policy::evaluate(prev, 0.5, at(0), &thresholds, horizon);
    assert_eq!(held.tier, InterventionTier::ChildNudgeAndLog);
    assert!(held.below_since.is_none());

    // One dip under exit arms the timer but changes nothing yet.
    let armed = policy::evaluate(prev, 0.2, at(0), &thresholds, horizon);
    assert_eq!(armed.tier, InterventionTier::ChildNudgeAndLog);
    assert_eq!(armed.below_since, Some(at(0)));
}

#[test]
fn sustained_drop_for_full_horizon_deescalates_one_tier() {
    let thresholds = TierThresholds::default();
    let horizon = ChronoDuration::seconds(900);
    let mut state = TierState {
        tier: InterventionTier::ChildNudgeAndLog,
        below_since: None,
    };

    state = policy::evaluate(state, 0.2, at(0), &thresholds, horizon);
    assert_eq!(state.tier, InterventionTier::ChildNudgeAndLog);

    state = policy::evaluate(state, 0.2, at(500), &thresholds, horizon);
    assert_eq!(state.tier, InterventionTier::ChildNudgeAndLog);

    state = policy::evaluate(state, 0.2, at(901), &thresholds, horizon);
    assert_eq!(state.tier, InterventionTier::ChildNudge);
}

#[test]
fn recovery_above_exit_disarms_the_timer() {
    let thresholds = TierThresholds::default();
    let horizon = ChronoDuration::seconds(900);
    let armed = TierState {
        tier: InterventionTier::ChildNudge,
        below_since: Some(at(0)),
    };

    let state = policy::evaluate(armed, 0.4, at(800), &thresholds, horizon);
    assert_eq!(state.tier, InterventionTier::ChildNudge);
    assert!(state.below_since.is_none());
}

#[test]
fn nudge_texts_cover_nudge_tiers_only() {
    for category in RiskCategory::ALL {
        assert!(policy::nudge_text(category, InterventionTier::ChildNudge).is_some());
        assert!(policy::nudge_text(category, InterventionTier::ChildNudgeAndLog).is_some());
        assert!(policy::nudge_text(category, InterventionTier::None).is_none());
        assert!(policy::nudge_text(category, InterventionTier::ParentAlert).is_none());
    }
}

#[test]
fn default_thresholds_validate() {
    assert!(TierThresholds::default().validate().is_ok());
    let broken = TierThresholds {
        nudge: super::policy::TierBand {
            enter: 0.2,
            exit: 0.3,
        },
        ..TierThresholds::default()
    };
    assert!(broken.validate().is_err());
}

// -------- Sessions --------

#[test]
fn idle_sessions_are_evicted() {
    let registry = SessionRegistry::new(Duration::from_secs(60), 100);
    registry.checkout("old", at(0));
    registry.checkout("fresh", at(500));

    let evicted = registry.evict_idle(at(520));
    assert_eq!(evicted, 1);
    assert_eq!(registry.len(), 1);
    assert!(registry.peek("fresh").is_some());
    assert!(registry.peek("old").is_none());
}

#[tokio::test]
async fn in_flight_sessions_survive_eviction() {
    let registry = SessionRegistry::new(Duration::from_secs(60), 100);
    let handle = registry.checkout("busy", at(0));
    let guard = handle.lock().await;

    assert_eq!(registry.evict_idle(at(10_000)), 0);
    assert_eq!(registry.len(), 1);

    drop(guard);
    assert_eq!(registry.evict_idle(at(10_000)), 1);
    assert!(registry.is_empty());
}

#[test]
fn session_cap_evicts_longest_idle_first() {
    let registry = SessionRegistry::new(Duration::from_secs(3600), 2);
    registry.checkout("a", at(0));
    registry.checkout("b", at(10));
    registry.checkout("c", at(20));

    registry.evict_idle(at(30));
    assert_eq!(registry.len(), 2);
    assert!(registry.peek("a").is_none());
    assert!(registry.peek("b").is_some());
    assert!(registry.peek("c").is_some());
}

// -------- Redaction --------

#[test]
fn structured_excerpts_do_not_leak() {
    let raw = "hey wanna meet up alone after school";
    assert!(!excerpt_leaks(raw, "grooming/high (1 indicator)", 12));
}

#[test]
fn leaky_excerpt_is_detected() {
    let raw = "hey wanna meet up alone after school";
    assert!(excerpt_leaks(raw, "saw: wanna meet up alone!", 12));
    // Short shared fragments stay under the bound.
    assert!(!excerpt_leaks(raw, "school", 12));
}

// -------- Message events --------

#[test]
fn message_event_constructor_keeps_fields() {
    let event = MessageEvent::new("s1", at(0), "hello");
    assert_eq!(event.session_id, "s1");
    assert_eq!(event.raw_text, "hello");
}
