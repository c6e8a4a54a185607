//! Tiered reconnect backoff.
//!
//! A [`BackoffGate`] is a stateless policy; each connection owns its own
//! [`BackoffState`] and asks the gate whether a new attempt may start.

use std::fmt;
use std::time::{Duration, Instant};

/// Connection state of a link to a remote peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Attempt bookkeeping for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl BackoffState {
    /// Number of attempts made since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start time of the most recent attempt, `None` if never attempted.
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Record that an attempt started at `now`, whatever its outcome.
    pub fn record_attempt(&mut self, now: Instant) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(now);
    }

    /// Forget all attempts (after a successful connect).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One step of the delay ladder: from `min_attempts` onwards wait `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffTier {
    pub min_attempts: u32,
    pub delay: Duration,
}

/// Tiered delay admission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffGate {
    /// Sorted by `min_attempts`, first tier starts at 0.
    tiers: Vec<BackoffTier>,
}

impl Default for BackoffGate {
    /// 1 s for the first 10 attempts, 30 s up to 20, then 5 min.
    fn default() -> Self {
        Self {
            tiers: vec![
                BackoffTier {
                    min_attempts: 0,
                    delay: Duration::from_secs(1),
                },
                BackoffTier {
                    min_attempts: 10,
                    delay: Duration::from_secs(30),
                },
                BackoffTier {
                    min_attempts: 20,
                    delay: Duration::from_secs(300),
                },
            ],
        }
    }
}

impl BackoffGate {
    /// Build a gate from custom tiers.
    ///
    /// Tiers are sorted by `min_attempts`. Without a tier starting at zero,
    /// attempts below the first threshold are not delayed.
    pub fn new(mut tiers: Vec<BackoffTier>) -> Self {
        tiers.sort_by_key(|t| t.min_attempts);
        Self { tiers }
    }

    /// Delay required after `attempts` consecutive attempts.
    pub fn delay(&self, attempts: u32) -> Duration {
        self.tiers
            .iter()
            .rev()
            .find(|t| attempts >= t.min_attempts)
            .map(|t| t.delay)
            .unwrap_or(Duration::ZERO)
    }

    /// Whether a new attempt may start at `now`.
    pub fn admit(&self, state: &BackoffState, now: Instant) -> bool {
        match state.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.delay(state.attempts),
        }
    }

    /// Time left until the next attempt is admitted.
    pub fn remaining(&self, state: &BackoffState, now: Instant) -> Duration {
        match state.last_attempt {
            None => Duration::ZERO,
            Some(last) => self
                .delay(state.attempts)
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    /// Admit and record an attempt in one step.
    pub fn try_begin(&self, state: &mut BackoffState, now: Instant) -> bool {
        if !self.admit(state, now) {
            return false;
        }
        state.record_attempt(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(attempts: u32, last: Instant) -> BackoffState {
        BackoffState {
            attempts,
            last_attempt: Some(last),
        }
    }

    #[test]
    fn test_delay_tiers() {
        let gate = BackoffGate::default();
        assert_eq!(gate.delay(0), Duration::from_secs(1));
        assert_eq!(gate.delay(9), Duration::from_secs(1));
        assert_eq!(gate.delay(10), Duration::from_secs(30));
        assert_eq!(gate.delay(19), Duration::from_secs(30));
        assert_eq!(gate.delay(20), Duration::from_secs(300));
        assert_eq!(gate.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_first_attempt_always_admitted() {
        let gate = BackoffGate::default();
        assert!(gate.admit(&BackoffState::default(), Instant::now()));
    }

    #[test]
    fn test_admit_boundaries() {
        let gate = BackoffGate::default();
        let t0 = Instant::now();

        let s = state_with(9, t0);
        assert!(!gate.admit(&s, t0 + Duration::from_millis(999)));
        assert!(gate.admit(&s, t0 + Duration::from_secs(1)));

        let s = state_with(10, t0);
        assert!(!gate.admit(&s, t0 + Duration::from_secs(29)));
        assert!(gate.admit(&s, t0 + Duration::from_secs(30)));

        let s = state_with(20, t0);
        assert!(!gate.admit(&s, t0 + Duration::from_secs(299)));
        assert!(gate.admit(&s, t0 + Duration::from_secs(300)));
    }

    #[test]
    fn test_try_begin_records_attempt() {
        let gate = BackoffGate::default();
        let t0 = Instant::now();
        let mut state = BackoffState::default();

        assert!(gate.try_begin(&mut state, t0));
        assert_eq!(state.attempts(), 1);
        assert_eq!(state.last_attempt(), Some(t0));

        // Rejected attempts leave the state untouched
        assert!(!gate.try_begin(&mut state, t0 + Duration::from_millis(10)));
        assert_eq!(state.attempts(), 1);

        assert_eq!(
            gate.remaining(&state, t0 + Duration::from_millis(400)),
            Duration::from_millis(600)
        );

        state.reset();
        assert_eq!(state, BackoffState::default());
    }

    #[test]
    fn test_custom_tiers() {
        let gate = BackoffGate::new(vec![
            BackoffTier {
                min_attempts: 3,
                delay: Duration::from_secs(5),
            },
            BackoffTier {
                min_attempts: 0,
                delay: Duration::from_millis(100),
            },
        ]);
        assert_eq!(gate.delay(2), Duration::from_millis(100));
        assert_eq!(gate.delay(3), Duration::from_secs(5));
    }
}
