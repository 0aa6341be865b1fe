use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::Serialize;

use super::normalize::{self, NORMALIZER_VERSION};
use super::types::{
    load_builtin_lexicon, EngineError, LexiconEntry, LexiconFile, RawLexiconEntry, RiskCategory,
    SensitivityTier,
};

lazy_static! {
    static ref HAS_LETTER: Regex = Regex::new(r"\p{L}").expect("letter pattern");
}

/// A lexicon entry compiled for matching: normalized form, token count and
/// character signature are computed once at publish time.
#[derive(Debug, Clone)]
pub(crate) struct CompiledEntry {
    pub entry: LexiconEntry,
    pub normalized: String,
    pub token_count: usize,
    pub signature: u64,
}

/// Immutable, versioned collection of compiled lexicon entries. Swapped
/// atomically on publish; an in-flight match only ever sees one snapshot.
#[derive(Debug)]
pub struct LexiconSnapshot {
    pub version: u64,
    pub normalizer_version: u32,
    /// True for the compiled-in safety list served before any publish. The
    /// matcher treats builtin snapshots as exact-keyword-only.
    pub builtin: bool,
    pub(crate) entries: Vec<CompiledEntry>,
    /// Entry indices bucketed by token count.
    pub(crate) buckets: HashMap<usize, Vec<usize>>,
}

impl LexiconSnapshot {
    fn build(version: u64, builtin: bool, entries: Vec<LexiconEntry>) -> LexiconSnapshot {
        let mut compiled = Vec::with_capacity(entries.len());
        let mut buckets: HashMap<usize, Vec<usize>> = HashMap::new();
        for entry in entries {
            let tokens = normalize::normalize_pattern(&entry.pattern);
            let normalized = tokens.join(" ");
            let token_count = tokens.len();
            let signature = normalize::signature(&normalized);
            buckets.entry(token_count).or_default().push(compiled.len());
            compiled.push(CompiledEntry {
                entry,
                normalized,
                token_count,
                signature,
            });
        }
        LexiconSnapshot {
            version,
            normalizer_version: NORMALIZER_VERSION,
            builtin,
            entries: compiled,
            buckets,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a publish: what made it in, what was rejected and why.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub version: u64,
    pub accepted: usize,
    pub rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedEntry {
    pub pattern: String,
    pub reason: String,
}

/// Versioned lexicon store. Readers grab an `Arc` to the current snapshot and
/// are never blocked by, or exposed to, a concurrent publish.
pub struct LexiconStore {
    current: RwLock<Arc<LexiconSnapshot>>,
    next_version: AtomicU64,
}

impl LexiconStore {
    /// Starts out serving the builtin safety list (version 0) so the engine
    /// can run before any collaborator publishes a lexicon.
    pub fn new() -> Self {
        let raw = load_builtin_lexicon();
        let mut entries = Vec::new();
        for candidate in raw {
            match validate_entry(&candidate) {
                Ok(entry) => entries.push(entry),
                Err(reason) => warn!(
                    "builtin lexicon entry '{}' skipped: {}",
                    candidate.pattern, reason
                ),
            }
        }
        let snapshot = LexiconSnapshot::build(0, true, entries);
        LexiconStore {
            current: RwLock::new(Arc::new(snapshot)),
            next_version: AtomicU64::new(1),
        }
    }

    pub fn current_snapshot(&self) -> Arc<LexiconSnapshot> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Validates entries individually and publishes the survivors as a new
    /// immutable snapshot. A publish in which nothing survives leaves the
    /// current snapshot in place.
    pub fn publish(&self, candidates: Vec<RawLexiconEntry>) -> PublishReport {
        let mut entries = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for candidate in candidates {
            match validate_entry(&candidate) {
                Ok(entry) => entries.push(entry),
                Err(reason) => rejected.push(RejectedEntry {
                    pattern: candidate.pattern,
                    reason,
                }),
            }
        }

        if entries.is_empty() {
            let current = self.current_snapshot();
            warn!(
                "lexicon publish rejected entirely ({} invalid entries), keeping version {}",
                rejected.len(),
                current.version
            );
            return PublishReport {
                version: current.version,
                accepted: 0,
                rejected,
            };
        }

        let accepted = entries.len();
        // Version allocation and the swap share the write lock so concurrent
        // publishes can never install snapshots out of version order.
        let version = {
            let mut guard = self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let version = self.next_version.fetch_add(1, Ordering::SeqCst);
            *guard = Arc::new(LexiconSnapshot::build(version, false, entries));
            version
        };
        info!(
            "published lexicon version {} ({} entries, {} rejected)",
            version,
            accepted,
            rejected.len()
        );
        PublishReport {
            version,
            accepted,
            rejected,
        }
    }

    /// Publishes from the JSON schema used by the builtin rules file.
    pub fn publish_json(&self, json: &str) -> Result<PublishReport, EngineError> {
        let file: LexiconFile = serde_json::from_str(json)?;
        Ok(self.publish(file.entries))
    }

    pub fn publish_from_path(&self, path: &Path) -> Result<PublishReport, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        self.publish_json(&raw)
    }
}

impl Default for LexiconStore {
    fn default() -> Self {
        LexiconStore::new()
    }
}

fn validate_entry(candidate: &RawLexiconEntry) -> Result<LexiconEntry, String> {
    let category = RiskCategory::parse(&candidate.category)
        .ok_or_else(|| format!("unknown category '{}'", candidate.category))?;

    if candidate.pattern.trim().is_empty() {
        return Err("empty pattern".into());
    }
    if !HAS_LETTER.is_match(&candidate.pattern) {
        return Err("pattern has no letters".into());
    }
    if normalize::normalize_pattern(&candidate.pattern).is_empty() {
        return Err("pattern is empty after normalization".into());
    }

    if !(0.0..=1.0).contains(&candidate.weight) || !candidate.weight.is_finite() {
        return Err(format!("weight {} outside [0, 1]", candidate.weight));
    }

    let sensitivity = match candidate.sensitivity.as_deref() {
        None => SensitivityTier::FuzzyStrict,
        Some(raw) => {
            SensitivityTier::parse(raw).ok_or_else(|| format!("unknown sensitivity '{}'", raw))?
        }
    };

    Ok(LexiconEntry {
        category,
        pattern: candidate.pattern.trim().to_string(),
        weight: candidate.weight,
        sensitivity,
    })
}
