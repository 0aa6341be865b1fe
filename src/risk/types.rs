use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of risk categories the engine can score. Priority rank is used
/// for tie-breaking when a single dominant category must be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Grooming,
    Sextortion,
    SelfHarm,
    Bullying,
    Distress,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 5] = [
        RiskCategory::Grooming,
        RiskCategory::Sextortion,
        RiskCategory::SelfHarm,
        RiskCategory::Bullying,
        RiskCategory::Distress,
    ];

    /// Lower rank wins ties.
    pub fn priority_rank(&self) -> u8 {
        match self {
            RiskCategory::Grooming => 0,
            RiskCategory::Sextortion => 1,
            RiskCategory::SelfHarm => 2,
            RiskCategory::Bullying => 3,
            RiskCategory::Distress => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Grooming => "grooming",
            RiskCategory::Sextortion => "sextortion",
            RiskCategory::SelfHarm => "self_harm",
            RiskCategory::Bullying => "bullying",
            RiskCategory::Distress => "distress",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<RiskCategory> {
        match raw.trim().to_lowercase().as_str() {
            "grooming" => Some(RiskCategory::Grooming),
            "sextortion" => Some(RiskCategory::Sextortion),
            "self_harm" | "self harm" => Some(RiskCategory::SelfHarm),
            "bullying" => Some(RiskCategory::Bullying),
            "distress" => Some(RiskCategory::Distress),
            _ => None,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.priority_rank() as usize
    }
}

/// How strictly a lexicon entry must match before it counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityTier {
    Exact,
    FuzzyStrict,
    FuzzyLoose,
}

impl SensitivityTier {
    /// Minimum similarity (inclusive) for a candidate to be accepted.
    pub fn threshold(&self) -> f32 {
        match self {
            SensitivityTier::Exact => 1.0,
            SensitivityTier::FuzzyStrict => 0.85,
            SensitivityTier::FuzzyLoose => 0.70,
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<SensitivityTier> {
        match raw.trim().to_lowercase().as_str() {
            "exact" => Some(SensitivityTier::Exact),
            "fuzzy_strict" | "strict" => Some(SensitivityTier::FuzzyStrict),
            "fuzzy_loose" | "loose" => Some(SensitivityTier::FuzzyLoose),
            _ => None,
        }
    }
}

/// A validated lexicon pattern. Immutable once published into a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub category: RiskCategory,
    pub pattern: String,
    pub weight: f32,
    pub sensitivity: SensitivityTier,
}

/// One inbound message. `raw_text` lives only inside the engine; nothing the
/// engine emits may carry it onward.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub raw_text: String,
}

impl MessageEvent {
    pub fn new(session_id: impl Into<String>, timestamp: DateTime<Utc>, raw_text: impl Into<String>) -> Self {
        MessageEvent {
            session_id: session_id.into(),
            timestamp,
            raw_text: raw_text.into(),
        }
    }
}

/// A single approximate occurrence of a lexicon pattern in a message.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub category: RiskCategory,
    pub pattern: String,
    pub weight: f32,
    pub similarity: f32,
    /// Byte span within the raw message text.
    pub span: (usize, usize),
}

/// Action tiers, ordered by severity. Variant order matters: the derived
/// `Ord` drives escalation/de-escalation stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionTier {
    None,
    ChildNudge,
    ChildNudgeAndLog,
    ParentAlert,
}

impl InterventionTier {
    pub fn step_up(&self) -> Option<InterventionTier> {
        match self {
            InterventionTier::None => Some(InterventionTier::ChildNudge),
            InterventionTier::ChildNudge => Some(InterventionTier::ChildNudgeAndLog),
            InterventionTier::ChildNudgeAndLog => Some(InterventionTier::ParentAlert),
            InterventionTier::ParentAlert => None,
        }
    }

    pub fn step_down(&self) -> Option<InterventionTier> {
        match self {
            InterventionTier::None => None,
            InterventionTier::ChildNudge => Some(InterventionTier::None),
            InterventionTier::ChildNudgeAndLog => Some(InterventionTier::ChildNudge),
            InterventionTier::ParentAlert => Some(InterventionTier::ChildNudgeAndLog),
        }
    }
}

impl Default for InterventionTier {
    fn default() -> Self {
        InterventionTier::None
    }
}

/// Coarse score buckets used in redacted excerpts, standing in for raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityBucket {
    Low,
    Elevated,
    High,
    Critical,
}

impl SeverityBucket {
    pub fn from_score(score: f32) -> SeverityBucket {
        if score >= 0.85 {
            SeverityBucket::Critical
        } else if score >= 0.65 {
            SeverityBucket::High
        } else if score >= 0.45 {
            SeverityBucket::Elevated
        } else {
            SeverityBucket::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityBucket::Low => "low",
            SeverityBucket::Elevated => "elevated",
            SeverityBucket::High => "high",
            SeverityBucket::Critical => "critical",
        }
    }
}

/// The persisted record of a risk signal. Never contains message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: String,
    pub session_id: String,
    pub category: RiskCategory,
    pub score: f32,
    pub tier: InterventionTier,
    pub lexicon_version: u64,
    pub degraded: bool,
    pub redacted_excerpt: String,
    pub timestamp: DateTime<Utc>,
}

/// A concrete intervention the collaborators should deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionAction {
    pub session_id: String,
    pub category: RiskCategory,
    pub tier: InterventionTier,
    pub timestamp: DateTime<Utc>,
}

/// Fatal engine failures. Per-entry lexicon rejections are reported as data
/// in [`crate::risk::lexicon::PublishReport`], not through this type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("redacted excerpt would leak message content")]
    RedactionViolation,
    #[error("failed to read lexicon file: {0}")]
    LexiconIo(#[from] std::io::Error),
    #[error("failed to parse lexicon: {0}")]
    LexiconParse(#[from] serde_json::Error),
}

// -------- Lexicon File Schema & Helpers --------

#[derive(Debug, Deserialize)]
pub struct LexiconFile {
    pub entries: Vec<RawLexiconEntry>,
}

/// Unvalidated entry as it arrives from a configuration collaborator or the
/// builtin rules file. Validation happens at publish time, entry by entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLexiconEntry {
    pub category: String,
    pub pattern: String,
    pub weight: f32,
    pub sensitivity: Option<String>,
}

// Load the builtin safety list with error propagation
pub(crate) fn load_builtin_lexicon_result() -> Result<Vec<RawLexiconEntry>, String> {
    let raw = include_str!("../../rules/builtin_lexicon.json");
    serde_json::from_str::<LexiconFile>(raw)
        .map(|file| file.entries)
        .map_err(|e| format!("Failed to parse builtin lexicon: {}", e))
}

// Load the builtin safety list with empty fallback: the engine must still run
// in keyword-only mode rather than refuse to start
pub(crate) fn load_builtin_lexicon() -> Vec<RawLexiconEntry> {
    load_builtin_lexicon_result().unwrap_or_else(|e| {
        log::warn!("{}", e);
        Vec::new()
    })
}
