//! Risk scoring.
//!
//! The score is a weighted average of four saturating terms, each in `0..=1`,
//! scaled to `0..=100`:
//!
//! | term | value |
//! |---|---|
//! | pending | `pending_invites / total_invites`, ignored below `pending_min_sample` |
//! | cap usage | the larger of invite and message cap consumption |
//! | failures | `recent_failures / failure_burst_saturation` |
//! | incidents | `(selector + challenge incidents) / incident_saturation` |

use crate::config::RiskConfig;
use serde::{Deserialize, Serialize};

/// Workflow counters supplied by the caller for one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskInputs {
    pub pending_invites: u32,
    pub total_invites: u32,
    pub invites_sent: u32,
    pub invite_cap: u32,
    pub messages_sent: u32,
    pub message_cap: u32,
    pub recent_failures: u32,
    pub selector_incidents: u32,
    pub challenge_incidents: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub pending: f64,
    pub cap_usage: f64,
    pub failures: f64,
    pub incidents: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskScore {
    /// `0..=100`
    pub score: f64,
    /// Raw pending ratio, reported even when below the sample minimum
    pub pending_ratio: f64,
    /// Whether the pending ratio counted toward the score and stop check
    pub pending_sampled: bool,
    pub breakdown: ScoreBreakdown,
}

fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (f64::from(numerator) / f64::from(denominator)).clamp(0.0, 1.0)
    }
}

pub fn compute_score(inputs: &RiskInputs, policy: &RiskConfig) -> RiskScore {
    let pending_ratio = ratio(inputs.pending_invites, inputs.total_invites);
    let pending_sampled = inputs.total_invites >= policy.pending_min_sample;

    let breakdown = ScoreBreakdown {
        pending: if pending_sampled { pending_ratio } else { 0.0 },
        cap_usage: ratio(inputs.invites_sent, inputs.invite_cap)
            .max(ratio(inputs.messages_sent, inputs.message_cap)),
        failures: ratio(inputs.recent_failures, policy.failure_burst_saturation),
        incidents: ratio(
            inputs.selector_incidents.saturating_add(inputs.challenge_incidents),
            policy.incident_saturation,
        ),
    };

    let weights = [
        (policy.pending_ratio_weight, breakdown.pending),
        (policy.cap_usage_weight, breakdown.cap_usage),
        (policy.failure_weight, breakdown.failures),
        (policy.incident_weight, breakdown.incidents),
    ];
    let total_weight: f64 = weights.iter().map(|(weight, _)| weight.max(0.0)).sum();
    let weighted: f64 = weights
        .iter()
        .map(|(weight, term)| weight.max(0.0) * term)
        .sum();

    let score = if total_weight > 0.0 {
        (100.0 * weighted / total_weight).clamp(0.0, 100.0)
    } else {
        0.0
    };

    RiskScore {
        score,
        pending_ratio,
        pending_sampled,
        breakdown,
    }
}
