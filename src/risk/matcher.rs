use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;

use super::lexicon::{CompiledEntry, LexiconSnapshot};
use super::normalize::{self, NormalizedText};
use super::types::{MatchResult, SensitivityTier};

/// Candidate windows run from entry token length minus this to plus this.
const WINDOW_SLACK: usize = 2;

/// How many of an entry's signature bits may be absent from a window before
/// the prefilter drops the pair.
const SIGNATURE_SLACK: u32 = 2;

/// Keeps a similarity exactly at an entry's threshold inside the accepted
/// range despite float rounding in the distance cap.
const DIST_EPSILON: f32 = 1e-4;

#[derive(Debug)]
pub(crate) struct MatchOutcome {
    pub matches: Vec<MatchResult>,
    pub degraded: bool,
}

struct Window {
    text: String,
    signature: u64,
    span: (usize, usize),
}

/// Finds approximate occurrences of snapshot entries in a normalized message.
///
/// Entries are bucketed by token count and windows are prefiltered by a char
/// signature, so the full edit-distance cost is only paid by plausible
/// candidates. Work is bounded by `budget`: once exceeded, the remaining
/// entries are matched exact-only and the outcome is flagged degraded.
/// Builtin snapshots are always matched exact-only.
pub(crate) fn match_message(
    norm: &NormalizedText,
    snapshot: &LexiconSnapshot,
    budget: Duration,
) -> MatchOutcome {
    let token_count = norm.tokens.len();
    if token_count == 0 || snapshot.is_empty() {
        return MatchOutcome {
            matches: Vec::new(),
            degraded: false,
        };
    }

    let deadline = Instant::now() + budget;
    let mut timed_out = false;
    let mut window_cache: HashMap<usize, Vec<Window>> = HashMap::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    let mut buckets: Vec<(&usize, &Vec<usize>)> = snapshot.buckets.iter().collect();
    buckets.sort_by_key(|(width, _)| **width);

    for (entry_width, entry_idxs) in buckets {
        let lo = entry_width.saturating_sub(WINDOW_SLACK).max(1);
        let hi = (entry_width + WINDOW_SLACK).min(token_count);
        for width in lo..=hi {
            let windows = window_cache
                .entry(width)
                .or_insert_with(|| build_windows(norm, width));
            for window in windows.iter() {
                if !timed_out && Instant::now() >= deadline {
                    timed_out = true;
                    debug!("match budget exhausted, finishing exact-only");
                }
                for &idx in entry_idxs {
                    let entry = &snapshot.entries[idx];
                    let exact_only = snapshot.builtin
                        || timed_out
                        || entry.entry.sensitivity == SensitivityTier::Exact;
                    if exact_only {
                        if window.text == entry.normalized {
                            candidates.push(Candidate::new(window, entry, 1.0));
                        }
                        continue;
                    }

                    if (entry.signature & !window.signature).count_ones() > SIGNATURE_SLACK {
                        continue;
                    }

                    let max_len = window
                        .text
                        .chars()
                        .count()
                        .max(entry.normalized.chars().count());
                    let threshold = entry.entry.sensitivity.threshold();
                    let max_dist =
                        ((1.0 - threshold) * max_len as f32 + DIST_EPSILON).floor() as usize;
                    if let Some(dist) = bounded_levenshtein(&window.text, &entry.normalized, max_dist)
                    {
                        let similarity = 1.0 - dist as f32 / max_len as f32;
                        candidates.push(Candidate::new(window, entry, similarity));
                    }
                }
            }
        }
    }

    MatchOutcome {
        matches: resolve_overlaps(candidates),
        degraded: timed_out,
    }
}

#[derive(Debug)]
struct Candidate {
    result: MatchResult,
}

impl Candidate {
    fn new(window: &Window, entry: &CompiledEntry, similarity: f32) -> Candidate {
        Candidate {
            result: MatchResult {
                category: entry.entry.category,
                pattern: entry.entry.pattern.clone(),
                weight: entry.entry.weight,
                similarity,
                span: window.span,
            },
        }
    }
}

fn build_windows(norm: &NormalizedText, width: usize) -> Vec<Window> {
    let token_count = norm.tokens.len();
    let mut windows = Vec::with_capacity(token_count + 1 - width);
    for start in 0..=token_count - width {
        let text = norm.window_text(start, start + width);
        let signature = normalize::signature(&text);
        windows.push(Window {
            signature,
            span: norm.span(start, start + width),
            text,
        });
    }
    windows
}

/// Overlapping spans keep only the strongest match: highest severity weight
/// first, similarity as the tie-break. Survivors come back in span order.
fn resolve_overlaps(mut candidates: Vec<Candidate>) -> Vec<MatchResult> {
    candidates.sort_by(|a, b| {
        b.result
            .weight
            .total_cmp(&a.result.weight)
            .then(b.result.similarity.total_cmp(&a.result.similarity))
            .then(a.result.span.0.cmp(&b.result.span.0))
            .then(a.result.pattern.cmp(&b.result.pattern))
    });

    let mut kept: Vec<MatchResult> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|existing| {
            candidate.result.span.0 < existing.span.1 && existing.span.0 < candidate.result.span.1
        });
        if !overlaps {
            kept.push(candidate.result);
        }
    }
    kept.sort_by_key(|m| m.span.0);
    kept
}

/// Classic two-row Levenshtein with an early abort once no cell in a row can
/// come back under `cap`. Returns `None` when the distance exceeds `cap`.
fn bounded_levenshtein(a: &str, b: &str, cap: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());
    if m.abs_diff(n) > cap {
        return None;
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut cur = vec![0usize; n + 1];
    for i in 1..=m {
        cur[0] = i;
        let mut row_min = cur[0];
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
            row_min = row_min.min(cur[j]);
        }
        if row_min > cap {
            return None;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    let dist = prev[n];
    if dist <= cap {
        Some(dist)
    } else {
        None
    }
}
