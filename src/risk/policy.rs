use chrono::DateTime;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::session::TierState;
use super::types::{InterventionTier, RiskCategory};

/// Enter/exit pair for one tier. `enter` must sit above `exit`; the gap is
/// the hysteresis band that keeps scores hovering near a boundary from
/// flapping the tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierBand {
    pub enter: f32,
    pub exit: f32,
}

/// Per-category threshold set for the three active tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierThresholds {
    pub nudge: TierBand,
    pub nudge_and_log: TierBand,
    pub alert: TierBand,
}

impl Default for TierThresholds {
    fn default() -> Self {
        TierThresholds {
            nudge: TierBand {
                enter: 0.45,
                exit: 0.30,
            },
            nudge_and_log: TierBand {
                enter: 0.65,
                exit: 0.45,
            },
            alert: TierBand {
                enter: 0.85,
                exit: 0.60,
            },
        }
    }
}

impl TierThresholds {
    pub(crate) fn band(&self, tier: InterventionTier) -> Option<TierBand> {
        match tier {
            InterventionTier::None => None,
            InterventionTier::ChildNudge => Some(self.nudge),
            InterventionTier::ChildNudgeAndLog => Some(self.nudge_and_log),
            InterventionTier::ParentAlert => Some(self.alert),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let bands = [
            ("nudge", self.nudge),
            ("nudge_and_log", self.nudge_and_log),
            ("alert", self.alert),
        ];
        for (name, band) in bands {
            if band.enter <= band.exit {
                return Err(format!("{}: enter {} must exceed exit {}", name, band.enter, band.exit));
            }
        }
        if self.nudge.enter > self.nudge_and_log.enter || self.nudge_and_log.enter > self.alert.enter {
            return Err("tier enter thresholds must be non-decreasing".into());
        }
        Ok(())
    }
}

/// One step of the per-(session, category) hysteresis state machine. Pure:
/// the caller owns persisting the returned state.
///
/// Escalates at most one tier per message, when the score reaches the next
/// tier's enter threshold. De-escalates one tier only once the score has
/// stayed below the current tier's exit threshold for the full lookback
/// horizon; a single dip does nothing.
pub(crate) fn evaluate(
    prev: TierState,
    score: f32,
    now: DateTime<Utc>,
    thresholds: &TierThresholds,
    horizon: chrono::Duration,
) -> TierState {
    if let Some(up) = prev.tier.step_up() {
        let enter = thresholds
            .band(up)
            .map(|band| band.enter)
            .unwrap_or(f32::INFINITY);
        if score >= enter {
            return TierState {
                tier: up,
                below_since: None,
            };
        }
    }

    let exit = match thresholds.band(prev.tier) {
        Some(band) => band.exit,
        None => {
            // Already at the floor.
            return TierState {
                tier: InterventionTier::None,
                below_since: None,
            };
        }
    };

    if score >= exit {
        return TierState {
            tier: prev.tier,
            below_since: None,
        };
    }

    match prev.below_since {
        None => TierState {
            tier: prev.tier,
            below_since: Some(now),
        },
        Some(since) if now.signed_duration_since(since) >= horizon => {
            let down = prev.tier.step_down().unwrap_or(InterventionTier::None);
            // Re-arm against the lower tier's own exit threshold.
            let rearmed = thresholds
                .band(down)
                .filter(|band| score < band.exit)
                .map(|_| now);
            TierState {
                tier: down,
                below_since: rearmed,
            }
        }
        Some(since) => TierState {
            tier: prev.tier,
            below_since: Some(since),
        },
    }
}

/// Supportive message shown on the child's device for nudge tiers. Parent
/// alert rendering belongs to the alert collaborator, not the engine.
pub fn nudge_text(category: RiskCategory, tier: InterventionTier) -> Option<&'static str> {
    if tier < InterventionTier::ChildNudge || tier > InterventionTier::ChildNudgeAndLog {
        return None;
    }
    Some(match category {
        RiskCategory::Grooming | RiskCategory::Sextortion => {
            "If someone asks for secrets or photos, please talk to a trusted adult."
        }
        RiskCategory::SelfHarm => {
            "You may be feeling overwhelmed. Talking to a trusted adult can help."
        }
        RiskCategory::Bullying => {
            "That message is not okay. Consider telling a trusted adult."
        }
        RiskCategory::Distress => {
            "It seems like you're going through something difficult. Talking to someone you trust can help."
        }
    })
}
