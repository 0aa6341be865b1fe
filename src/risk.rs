pub mod engine;
pub mod lexicon;
mod matcher;
mod normalize;
pub mod policy;
mod scorer;
pub mod session;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod tests;

pub use engine::{AnalysisOutcome, RiskEngine};
pub use lexicon::{LexiconSnapshot, LexiconStore, PublishReport, RejectedEntry};
pub use normalize::NORMALIZER_VERSION;
pub use policy::{nudge_text, TierBand, TierThresholds};
pub use session::{SessionRegistry, SweeperHandle};
pub use telemetry::TelemetrySnapshot;
pub use types::{
    EngineError, InterventionAction, InterventionTier, LexiconEntry, LexiconFile, MatchResult,
    MessageEvent, RawLexiconEntry, RiskCategory, RiskEvent, SensitivityTier, SeverityBucket,
};
