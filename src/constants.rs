//! # System Constants
//!
//! Shared identifiers for locks, circuits and runtime flags.

/// Runtime lock keys
pub mod locks {
    /// The scheduling loop's single-writer lock
    pub const AUTOMATION_RUNNER: &str = "automation_runner";
}

/// Circuit breaker keys for outbound integrations
pub mod circuits {
    pub const OUTBOX_WEBHOOK: &str = "outbox_webhook";
    pub const PROXY_PROVIDER: &str = "proxy_provider";
}

/// Keys in the runtime flag store
pub mod flags {
    pub const AUTOMATION_PAUSE: &str = "automation_pause";
    pub const QUARANTINE: &str = "quarantine";
}
