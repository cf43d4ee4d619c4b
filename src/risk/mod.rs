//! # Risk / Admission Control
//!
//! Scores workflow counters supplied by the caller, turns the score into an
//! admission decision, and keeps the persisted pause and quarantine flags.
//!
//! ```rust
//! use outreach_core::config::RiskConfig;
//! use outreach_core::risk::{Admission, InMemoryFlagStore, RiskAction, RiskController, RiskInputs};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let controller = RiskController::new(RiskConfig::default(), Arc::new(InMemoryFlagStore::new()));
//!
//! let inputs = RiskInputs {
//!     pending_invites: 18,
//!     total_invites: 20,
//!     ..RiskInputs::default()
//! };
//! let decision = controller.evaluate(&inputs).await.unwrap();
//! assert_eq!(decision.action, RiskAction::Pause { minutes: 30 });
//!
//! controller.apply(&decision).await.unwrap();
//! assert!(matches!(controller.admission().await.unwrap(), Admission::Paused { .. }));
//! # });
//! ```

pub mod controller;
pub mod flags;
pub mod score;

pub use controller::{Admission, RiskAction, RiskController, RiskDecision, RiskLevel};
pub use flags::{
    AutomationPause, InMemoryFlagStore, PgFlagStore, QuarantineFlag, RuntimeFlagStore,
    AUTOMATION_PAUSE_FLAG, QUARANTINE_FLAG,
};
pub use score::{compute_score, RiskInputs, RiskScore, ScoreBreakdown};
