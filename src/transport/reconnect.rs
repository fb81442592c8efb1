//! Reconnect policy.
//!
//! After an unclean close the transport retries with a flat delay, at most
//! `max_attempts` times in a row. A successful open restores the full
//! budget; a clean close (code 1000) never retries.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Close code of an intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a close frame carries no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Default number of consecutive reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before each reconnect attempt.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(3000);

/// Returns `true` if `code` marks an intentional shutdown.
#[inline]
#[must_use]
pub const fn is_clean_close(code: u16) -> bool {
    code == NORMAL_CLOSURE
}

// ============================================================================
// ReconnectState
// ============================================================================

/// Attempt counter and retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    attempt_count: u32,
    max_attempts: u32,
    delay: Duration,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_DELAY)
    }
}

impl ReconnectState {
    /// Creates a policy with a fresh budget.
    #[inline]
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            delay,
        }
    }

    /// Number of reconnects scheduled since the last successful open.
    #[inline]
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Maximum consecutive reconnects.
    #[inline]
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before each reconnect.
    #[inline]
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns `true` once the budget is spent.
    #[inline]
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Records a successful open.
    #[inline]
    pub fn record_open(&mut self) {
        self.attempt_count = 0;
    }

    /// Restores the full budget after a manual disconnect.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Decides whether a close with `code` is followed by a reconnect.
    ///
    /// Returns the delay to wait before reconnecting and consumes one
    /// attempt, or `None` for a clean close or a spent budget.
    pub fn on_close(&mut self, code: u16) -> Option<Duration> {
        if is_clean_close(code) || self.is_exhausted() {
            return None;
        }

        self.attempt_count += 1;
        Some(self.delay)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let state = ReconnectState::default();
        assert_eq!(state.max_attempts(), 5);
        assert_eq!(state.delay(), Duration::from_millis(3000));
        assert_eq!(state.attempt_count(), 0);
    }

    #[test]
    fn test_abnormal_close_schedules_flat_delay() {
        let mut state = ReconnectState::default();
        assert_eq!(state.on_close(ABNORMAL_CLOSURE), Some(DEFAULT_DELAY));
        assert_eq!(state.on_close(ABNORMAL_CLOSURE), Some(DEFAULT_DELAY));
        assert_eq!(state.attempt_count(), 2);
    }

    #[test]
    fn test_last_attempt_then_exhausted() {
        let mut state = ReconnectState::default();
        for _ in 0..4 {
            state.on_close(ABNORMAL_CLOSURE);
        }
        assert_eq!(state.attempt_count(), 4);

        assert!(state.on_close(ABNORMAL_CLOSURE).is_some());
        assert_eq!(state.attempt_count(), 5);
        assert!(state.is_exhausted());

        assert!(state.on_close(ABNORMAL_CLOSURE).is_none());
        assert_eq!(state.attempt_count(), 5);
    }

    #[test]
    fn test_no_status_close_is_unclean() {
        let mut state = ReconnectState::default();
        assert!(state.on_close(NO_STATUS_RECEIVED).is_some());
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let mut state = ReconnectState::new(0, DEFAULT_DELAY);
        assert!(state.on_close(ABNORMAL_CLOSURE).is_none());
    }

    proptest! {
        #[test]
        fn prop_reconnects_are_bounded(max in 0u32..20, closes in 0usize..64) {
            let mut state = ReconnectState::new(max, Duration::from_millis(1));
            let scheduled = (0..closes)
                .filter(|_| state.on_close(ABNORMAL_CLOSURE).is_some())
                .count();
            prop_assert_eq!(scheduled, closes.min(max as usize));
            prop_assert!(state.attempt_count() <= max);
        }

        #[test]
        fn prop_open_restores_budget(max in 1u32..20, closes in 0usize..64) {
            let mut state = ReconnectState::new(max, Duration::from_millis(1));
            for _ in 0..closes {
                state.on_close(ABNORMAL_CLOSURE);
            }
            state.record_open();
            prop_assert_eq!(state.attempt_count(), 0);
            prop_assert!(state.on_close(ABNORMAL_CLOSURE).is_some());
        }

        #[test]
        fn prop_clean_close_never_retries(attempts in 0usize..10, code_is_clean in any::<bool>()) {
            let mut state = ReconnectState::default();
            for _ in 0..attempts {
                state.on_close(ABNORMAL_CLOSURE);
            }
            let before = state.attempt_count();
            let code = if code_is_clean { NORMAL_CLOSURE } else { ABNORMAL_CLOSURE };
            let decision = state.on_close(code);
            if code_is_clean {
                prop_assert!(decision.is_none());
                prop_assert_eq!(state.attempt_count(), before);
            }
        }
    }
}
