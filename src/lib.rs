mod config;
mod risk;

pub use config::{
    EngineConfig, MatcherConfig, PolicyConfig, ScoringConfig, SessionConfig, ENGINE_CONFIG,
};

pub use risk::{
    nudge_text, AnalysisOutcome, EngineError, InterventionAction, InterventionTier, LexiconEntry,
    LexiconFile, LexiconSnapshot, LexiconStore, MatchResult, MessageEvent, PublishReport,
    RawLexiconEntry, RejectedEntry, RiskCategory, RiskEngine, RiskEvent, SensitivityTier,
    SessionRegistry, SeverityBucket, SweeperHandle, TelemetrySnapshot, TierBand, TierThresholds,
    NORMALIZER_VERSION,
};
