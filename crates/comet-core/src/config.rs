//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DeliveryError;

/// Tunables for the delivery engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on waiting for any session lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Default lifetime of a message in the strong queue, in seconds.
    pub strong_lifetime_secs: u64,
    /// Default lifetime of a soft holder, in seconds. Must be at least
    /// `strong_lifetime_secs`.
    pub soft_lifetime_secs: u64,
    /// Idle window before a frame transport is pinged or a held long poll
    /// answered empty, in seconds.
    pub ping_interval_secs: u64,
    /// How long a dead session lingers past its deadline before the reaper
    /// removes it, in seconds.
    pub grace_window_secs: u64,
    /// Maximum soft holders retained per session; oldest are evicted first.
    pub soft_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 1_000,
            strong_lifetime_secs: 30,
            soft_lifetime_secs: 300,
            ping_interval_secs: 30,
            grace_window_secs: 60,
            soft_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    /// Reject configurations whose soft lifetime undercuts the strong one.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.soft_lifetime_secs < self.strong_lifetime_secs {
            return Err(DeliveryError::InvalidConfig {
                message: format!(
                    "soft_lifetime_secs ({}) must be >= strong_lifetime_secs ({})",
                    self.soft_lifetime_secs, self.strong_lifetime_secs
                ),
            });
        }
        Ok(())
    }

    /// Lock acquisition bound.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Default strong lifetime.
    #[must_use]
    pub fn strong_lifetime(&self) -> Duration {
        Duration::from_secs(self.strong_lifetime_secs)
    }

    /// Default soft lifetime.
    #[must_use]
    pub fn soft_lifetime(&self) -> Duration {
        Duration::from_secs(self.soft_lifetime_secs)
    }

    /// Idle ping window.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Reaper grace window.
    #[must_use]
    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_lock_timeout() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.lock_timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn default_lifetimes_ordered() {
        let cfg = EngineConfig::default();
        assert!(cfg.soft_lifetime() >= cfg.strong_lifetime());
    }

    #[test]
    fn validate_rejects_short_soft_lifetime() {
        let cfg = EngineConfig {
            strong_lifetime_secs: 60,
            soft_lifetime_secs: 30,
            ..EngineConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("soft_lifetime_secs"));
    }

    #[test]
    fn validate_accepts_equal_lifetimes() {
        let cfg = EngineConfig {
            strong_lifetime_secs: 60,
            soft_lifetime_secs: 60,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.lock_timeout_ms, cfg.lock_timeout_ms);
        assert_eq!(back.soft_capacity, cfg.soft_capacity);
    }
}
