//! Engine constants.
//!
//! Defaults for [`EngineConfig`](super::EngineConfig). The wire limits at the
//! bottom are enforced by the matching service and MUST NOT be raised.

use std::time::Duration;

// =============================================================================
// RECONNECTION
// =============================================================================

/// Delay before the first reconnection attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for the doubled reconnection delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Reconnection attempts before the session is declared lost.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Backoff multiplier between attempts.
pub const RECONNECT_BACKOFF: u32 = 2;

/// A connection attempt that has neither succeeded nor failed by now counts as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

// =============================================================================
// SESSION
// =============================================================================

/// Pause between ending a session and re-entering the queue on "next".
pub const NEXT_SESSION_DELAY: Duration = Duration::from_millis(1000);

/// Reason sent with `end_chat` when the user asks for the next partner.
pub const REASON_NEXT: &str = "next";

/// Reason sent with `end_chat` when the user leaves.
pub const REASON_USER_LEFT: &str = "user_left";

/// Reason used to decline a match that arrived after a cancelled search.
pub const REASON_SEARCH_CANCELLED: &str = "search_cancelled";

/// Reason recorded when the local user blocks the partner.
pub const REASON_USER_BLOCKED: &str = "user_blocked";

/// Reason recorded when the transport could not be restored.
pub const REASON_CONNECTION_LOST: &str = "connection_lost";

/// Reason recorded when the media handshake gives up.
pub const REASON_NEGOTIATION_FAILED: &str = "negotiation_failed";

/// Reason recorded on engine shutdown.
pub const REASON_SHUTDOWN: &str = "shutdown";

// =============================================================================
// NEGOTIATION
// =============================================================================

/// Tolerated media dip before the partner is considered gone.
pub const NEGOTIATION_GRACE: Duration = Duration::from_millis(2000);

/// Window for the first media handshake to reach Connected.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

// =============================================================================
// MESSAGING
// =============================================================================

/// Idle time after which a started typing indicator is withdrawn.
pub const TYPING_IDLE: Duration = Duration::from_millis(3000);

/// Largest media attachment accepted by the matching service (16 MiB).
pub const MAX_ATTACHMENT_BYTES: usize = 16 * 1024 * 1024;

/// Prefix for locally generated message ids.
pub const TEMP_ID_PREFIX: &str = "tmp-";
