//! Admission decisions over the risk score and the persisted pause/quarantine flags.
//!
//! `RUNNING -> WARN -> PAUSED (timed) -> RUNNING`, with quarantine as an
//! orthogonal kill switch. The controller only reads flags during evaluation;
//! it writes them only when the caller asks (`set_automation_pause`, `apply`).

use crate::config::RiskConfig;
use crate::error::{OutreachError, Result};
use crate::risk::flags::{
    AutomationPause, QuarantineFlag, RuntimeFlagStore, AUTOMATION_PAUSE_FLAG, QUARANTINE_FLAG,
};
use crate::risk::score::{compute_score, RiskInputs, RiskScore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Running,
    Warn,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RiskAction {
    Proceed,
    /// Scale adaptive caps by `cap_factor`
    Throttle { cap_factor: f64 },
    /// Caller should enter PAUSED for `minutes`
    Pause { minutes: u32 },
    /// Already paused or quarantined; refuse risky work
    Halt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskDecision {
    pub score: f64,
    pub level: RiskLevel,
    pub action: RiskAction,
    pub cap_factor: f64,
    pub pending_ratio: f64,
    pub reasons: Vec<String>,
}

impl RiskDecision {
    /// Whether risky actions may run under this decision
    pub fn allows_work(&self) -> bool {
        matches!(self.action, RiskAction::Proceed | RiskAction::Throttle { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    /// `until` is `None` for an indefinite pause
    Paused {
        until: Option<DateTime<Utc>>,
        reason: String,
    },
    Quarantined,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Debug, Clone)]
pub struct RiskController {
    policy: RiskConfig,
    flags: Arc<dyn RuntimeFlagStore>,
}

impl RiskController {
    pub fn new(policy: RiskConfig, flags: Arc<dyn RuntimeFlagStore>) -> Self {
        Self { policy, flags }
    }

    pub fn policy(&self) -> &RiskConfig {
        &self.policy
    }

    /// Score-only decision, ignoring persisted flags
    pub fn decide(&self, score: &RiskScore) -> RiskDecision {
        let policy = &self.policy;
        let mut reasons = Vec::new();

        let score_stop = score.score >= policy.stop_threshold;
        let pending_stop =
            score.pending_sampled && score.pending_ratio >= policy.pending_ratio_stop;

        if score_stop {
            reasons.push(format!(
                "risk score {:.1} at or above stop threshold {:.1}",
                score.score, policy.stop_threshold
            ));
        }
        if pending_stop {
            reasons.push(format!(
                "pending ratio {:.2} at or above {:.2}",
                score.pending_ratio, policy.pending_ratio_stop
            ));
        }

        if score_stop || pending_stop {
            let minutes = if score_stop {
                policy.cooldown_high_minutes
            } else {
                policy.cooldown_warn_minutes
            };
            return RiskDecision {
                score: score.score,
                level: RiskLevel::Paused,
                action: RiskAction::Pause { minutes },
                cap_factor: 0.0,
                pending_ratio: score.pending_ratio,
                reasons,
            };
        }

        if score.score >= policy.warn_threshold {
            let cap_factor = self.warn_cap_factor(score.score);
            reasons.push(format!(
                "risk score {:.1} at or above warn threshold {:.1}",
                score.score, policy.warn_threshold
            ));
            return RiskDecision {
                score: score.score,
                level: RiskLevel::Warn,
                action: RiskAction::Throttle { cap_factor },
                cap_factor,
                pending_ratio: score.pending_ratio,
                reasons,
            };
        }

        RiskDecision {
            score: score.score,
            level: RiskLevel::Running,
            action: RiskAction::Proceed,
            cap_factor: 1.0,
            pending_ratio: score.pending_ratio,
            reasons,
        }
    }

    /// Linear from `warn_cap_factor` at the warn threshold down to
    /// `floor_cap_factor` at the stop threshold
    fn warn_cap_factor(&self, score: f64) -> f64 {
        let policy = &self.policy;
        let span = policy.stop_threshold - policy.warn_threshold;
        let progress = if span > 0.0 {
            ((score - policy.warn_threshold) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let factor =
            policy.warn_cap_factor - (policy.warn_cap_factor - policy.floor_cap_factor) * progress;
        factor.max(policy.floor_cap_factor)
    }

    /// Score the inputs and combine the result with the current pause/quarantine state
    pub async fn evaluate(&self, inputs: &RiskInputs) -> Result<RiskDecision> {
        let score = compute_score(inputs, &self.policy);
        let mut decision = self.decide(&score);

        match self.admission().await? {
            Admission::Allowed => {}
            Admission::Paused { until, reason } => {
                decision.level = RiskLevel::Paused;
                decision.action = RiskAction::Halt;
                decision.cap_factor = 0.0;
                decision.reasons.push(match until {
                    Some(until) => format!("automation paused until {until}: {reason}"),
                    None => format!("automation paused indefinitely: {reason}"),
                });
            }
            Admission::Quarantined => {
                decision.action = RiskAction::Halt;
                decision.cap_factor = 0.0;
                decision.reasons.push("quarantine active".to_string());
            }
        }

        if !decision.allows_work() {
            warn!(
                score = decision.score,
                level = ?decision.level,
                action = ?decision.action,
                reasons = ?decision.reasons,
                "🛑 Risk controller refused work"
            );
        }
        Ok(decision)
    }

    /// Persist a pause when the decision asks for one
    pub async fn apply(&self, decision: &RiskDecision) -> Result<Option<AutomationPause>> {
        match decision.action {
            RiskAction::Pause { minutes } => {
                let reason = decision.reasons.join("; ");
                self.set_automation_pause(Some(minutes), &reason)
                    .await
                    .map(Some)
            }
            _ => Ok(None),
        }
    }

    /// `None` pauses until `resume`; `Some(minutes)` overwrites any current window
    pub async fn set_automation_pause(
        &self,
        minutes: Option<u32>,
        reason: &str,
    ) -> Result<AutomationPause> {
        let now = Utc::now();
        let pause = match minutes {
            Some(0) => {
                return Err(OutreachError::InvalidInput(
                    "pause minutes must be positive; use None for an indefinite pause".to_string(),
                ))
            }
            Some(minutes) => AutomationPause {
                paused_until: Some(now + Duration::minutes(i64::from(minutes))),
                reason: reason.to_string(),
                indefinite: false,
                set_at: now,
            },
            None => AutomationPause {
                paused_until: None,
                reason: reason.to_string(),
                indefinite: true,
                set_at: now,
            },
        };

        self.flags
            .set_flag(AUTOMATION_PAUSE_FLAG, &serde_json::to_value(&pause)?)
            .await?;
        info!(
            paused_until = ?pause.paused_until,
            indefinite = pause.indefinite,
            reason = %reason,
            "⏸️ Automation paused"
        );
        Ok(pause)
    }

    /// Clear any pause; returns whether one was stored
    pub async fn resume(&self) -> Result<bool> {
        let cleared = self.flags.clear_flag(AUTOMATION_PAUSE_FLAG).await?;
        if cleared {
            info!("▶️ Automation resumed");
        }
        Ok(cleared)
    }

    /// The pause in force right now, if any
    pub async fn automation_pause(&self) -> Result<Option<AutomationPause>> {
        let Some(value) = self.flags.get_flag(AUTOMATION_PAUSE_FLAG).await? else {
            return Ok(None);
        };
        let pause: AutomationPause = serde_json::from_value(value)?;
        Ok(pause.is_active_at(Utc::now()).then_some(pause))
    }

    pub async fn set_quarantine(&self, active: bool) -> Result<()> {
        let flag = QuarantineFlag {
            active,
            set_at: Utc::now(),
        };
        self.flags
            .set_flag(QUARANTINE_FLAG, &serde_json::to_value(&flag)?)
            .await?;
        if active {
            warn!("🚫 Quarantine activated");
        } else {
            info!("✅ Quarantine cleared");
        }
        Ok(())
    }

    pub async fn is_quarantined(&self) -> Result<bool> {
        match self.flags.get_flag(QUARANTINE_FLAG).await? {
            Some(value) => Ok(serde_json::from_value::<QuarantineFlag>(value)?.active),
            None => Ok(false),
        }
    }

    /// Quarantine takes precedence over pause
    pub async fn admission(&self) -> Result<Admission> {
        if self.is_quarantined().await? {
            return Ok(Admission::Quarantined);
        }
        Ok(match self.automation_pause().await? {
            Some(pause) => Admission::Paused {
                until: pause.paused_until,
                reason: pause.reason,
            },
            None => Admission::Allowed,
        })
    }
}
