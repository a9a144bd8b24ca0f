//! Freshness and replay checks for authentication messages.
//!
//! A valid HMAC only proves who produced a message, not when.  Two checks
//! bound that:
//!
//! - [`FreshnessWindow`] rejects messages whose timestamp is more than
//!   `max_skew` away from the verifier's clock, in either direction.
//! - [`ReplayGuard`] remembers every nonce accepted inside the window and
//!   rejects a second use.  Nonces older than the window are forgotten, since
//!   the window check already rejects them.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::authentication::AuthenticationMessage;
use super::Nonce;
use crate::protocol::codec::ProtocolError;

/// Source of wall-clock time in milliseconds since the Unix epoch.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Maximum accepted distance between a message timestamp and local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    max_skew: Duration,
}

impl FreshnessWindow {
    pub const DEFAULT_MAX_SKEW: Duration = Duration::from_secs(300);

    pub fn new(max_skew: Duration) -> Self {
        Self { max_skew }
    }

    pub fn max_skew(&self) -> Duration {
        self.max_skew
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::StaleAuthentication`] when the timestamp is
    /// outside the window.
    pub fn check(
        &self,
        message: &AuthenticationMessage,
        clock: &dyn Clock,
    ) -> Result<(), ProtocolError> {
        let skew_ms = clock.now_ms().abs_diff(message.timestamp_ms);
        if u128::from(skew_ms) > self.max_skew.as_millis() {
            debug!(skew_ms, "authentication outside freshness window");
            return Err(ProtocolError::StaleAuthentication { skew_ms });
        }
        Ok(())
    }
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_SKEW)
    }
}

/// Window check plus single use of every nonce.
#[derive(Debug)]
pub struct ReplayGuard {
    window: FreshnessWindow,
    seen: HashMap<Nonce, u64>,
}

impl ReplayGuard {
    pub fn new(window: FreshnessWindow) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Accepts `message` once.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::StaleAuthentication`] if the message is
    /// outside the window, or [`ProtocolError::Replayed`] if its nonce was
    /// already accepted.
    pub fn accept(
        &mut self,
        message: &AuthenticationMessage,
        clock: &dyn Clock,
    ) -> Result<(), ProtocolError> {
        self.window.check(message, clock)?;

        let horizon = clock
            .now_ms()
            .saturating_sub(self.window.max_skew.as_millis() as u64);
        self.seen.retain(|_, timestamp| *timestamp >= horizon);

        if self.seen.contains_key(&message.nonce) {
            debug!("authentication nonce replayed");
            return Err(ProtocolError::Replayed);
        }
        self.seen.insert(message.nonce, message.timestamp_ms);
        Ok(())
    }

    /// Number of nonces currently remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NONCE_LEN;

    const NOW: u64 = 1_760_000_000_000;

    fn clock_at(now: u64) -> MockClock {
        let mut clock = MockClock::new();
        clock.expect_now_ms().return_const(now);
        clock
    }

    fn message(timestamp_ms: u64, nonce: u8) -> AuthenticationMessage {
        AuthenticationMessage {
            timestamp_ms,
            nonce: Nonce([nonce; NONCE_LEN]),
        }
    }

    #[test]
    fn test_window_accepts_message_inside_skew() {
        // Arrange
        let window = FreshnessWindow::new(Duration::from_secs(30));
        let clock = clock_at(NOW);

        // Act / Assert
        assert!(window.check(&message(NOW - 29_000, 1), &clock).is_ok());
        assert!(window.check(&message(NOW + 29_000, 1), &clock).is_ok());
    }

    #[test]
    fn test_window_rejects_old_and_future_messages() {
        let window = FreshnessWindow::new(Duration::from_secs(30));
        let clock = clock_at(NOW);

        assert_eq!(
            window.check(&message(NOW - 31_000, 1), &clock),
            Err(ProtocolError::StaleAuthentication { skew_ms: 31_000 })
        );
        assert!(window.check(&message(NOW + 60_000, 1), &clock).is_err());
    }

    #[test]
    fn test_replay_guard_rejects_second_use_of_nonce() {
        // Arrange
        let mut guard = ReplayGuard::new(FreshnessWindow::default());
        let clock = clock_at(NOW);
        let msg = message(NOW, 9);

        // Act
        let first = guard.accept(&msg, &clock);
        let second = guard.accept(&msg, &clock);

        // Assert
        assert!(first.is_ok());
        assert_eq!(second, Err(ProtocolError::Replayed));
    }

    #[test]
    fn test_replay_guard_forgets_nonces_outside_window() {
        // Arrange
        let mut guard = ReplayGuard::new(FreshnessWindow::new(Duration::from_secs(10)));
        guard.accept(&message(NOW, 1), &clock_at(NOW)).unwrap();
        assert_eq!(guard.len(), 1);

        // Act: twenty seconds later a different message arrives.
        let later = NOW + 20_000;
        guard.accept(&message(later, 2), &clock_at(later)).unwrap();

        // Assert
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
