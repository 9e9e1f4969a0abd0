//! Engine configuration.

use std::time::Duration;

use super::constants;
use super::error::EngineError;

/// Bounded exponential reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Cap for the doubled delay.
    pub max_delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: constants::RECONNECT_BASE_DELAY,
            max_delay: constants::RECONNECT_MAX_DELAY,
            max_attempts: constants::MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 1..attempt {
            delay = delay.saturating_mul(constants::RECONNECT_BACKOFF);
            if delay >= self.max_delay {
                return self.max_delay;
            }
        }
        delay.min(self.max_delay)
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,

    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,

    /// Pause between `end_session("next")` and the new search.
    pub next_session_delay: Duration,

    /// Tolerated media dip before declaring partner loss.
    pub negotiation_grace: Duration,

    /// Window for the first media handshake to reach Connected.
    pub handshake_timeout: Duration,

    /// Idle time before a typing indicator is withdrawn.
    pub typing_idle: Duration,

    /// Send read receipts as soon as a message is received.
    pub auto_read_receipts: bool,

    /// Largest accepted media attachment.
    pub max_attachment_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            connect_timeout: constants::CONNECT_TIMEOUT,
            next_session_delay: constants::NEXT_SESSION_DELAY,
            negotiation_grace: constants::NEGOTIATION_GRACE,
            handshake_timeout: constants::HANDSHAKE_TIMEOUT,
            typing_idle: constants::TYPING_IDLE,
            auto_read_receipts: true,
            max_attachment_bytes: constants::MAX_ATTACHMENT_BYTES,
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let policy = &self.reconnect;
        if policy.max_attempts == 0 {
            return Err(EngineError::Config(
                "reconnect.max_attempts must be at least 1".into(),
            ));
        }
        if policy.base_delay.is_zero() {
            return Err(EngineError::Config(
                "reconnect.base_delay must be non-zero".into(),
            ));
        }
        if policy.base_delay > policy.max_delay {
            return Err(EngineError::Config(format!(
                "reconnect.base_delay ({:?}) exceeds reconnect.max_delay ({:?})",
                policy.base_delay, policy.max_delay
            )));
        }
        if self.negotiation_grace.is_zero() || self.connect_timeout.is_zero() {
            return Err(EngineError::Config(
                "negotiation_grace and connect_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first reconnection delay.
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.base_delay = delay;
        self
    }

    /// Set the reconnection delay cap.
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.max_delay = delay;
        self
    }

    /// Set the reconnection attempt ceiling.
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the delay used by `next_session`.
    pub fn next_session_delay(mut self, delay: Duration) -> Self {
        self.config.next_session_delay = delay;
        self
    }

    /// Set the media grace window.
    pub fn negotiation_grace(mut self, grace: Duration) -> Self {
        self.config.negotiation_grace = grace;
        self
    }

    /// Set the initial handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the typing idle timeout.
    pub fn typing_idle(mut self, idle: Duration) -> Self {
        self.config.typing_idle = idle;
        self
    }

    /// Enable or disable automatic read receipts.
    pub fn auto_read_receipts(mut self, enabled: bool) -> Self {
        self.config.auto_read_receipts = enabled;
        self
    }

    /// Set the attachment size limit.
    pub fn max_attachment_bytes(mut self, limit: usize) -> Self {
        self.config.max_attachment_bytes = limit;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
