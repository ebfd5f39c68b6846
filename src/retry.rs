//! Backoff policy and the state machine of webhook retry ledger entries.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

/// Exponents above this are clamped; `max_delay` wins long before.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Ceiling for configured delays and leases: one year.
pub const MAX_DELAY_SECS: i64 = 365 * 24 * 60 * 60;

/// Central definition of the retry constants used by the webhook ledger and
/// the draft worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Entries reaching this many failed attempts are dead-lettered.
    pub max_attempts: i32,
    /// Upper bound on entries replayed by one cron pass.
    pub batch_size: i64,
    /// How long a claimed entry may stay `in_progress` before a later pass
    /// books it as a failed attempt.
    pub lease: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60 * 60),
            max_attempts: 5,
            batch_size: 10,
            lease: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// `min(max_delay, base_delay * 2^attempts)`.
    pub fn delay_for(&self, attempts: i32) -> Duration {
        let exponent = attempts.max(0).unsigned_abs().min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .checked_mul(2_u32.pow(exponent))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn next_retry_at(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = ChronoDuration::from_std(self.delay_for(attempts))
            .unwrap_or_else(|_| ChronoDuration::seconds(MAX_DELAY_SECS));
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Claims made before this instant have outlived their lease.
    pub fn lease_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lease = ChronoDuration::from_std(self.lease)
            .unwrap_or_else(|_| ChronoDuration::seconds(MAX_DELAY_SECS));
        now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Pending,
    InProgress,
    Succeeded,
    DeadLetter,
}

impl FailureStatus {
    pub const ALL: [FailureStatus; 4] = [
        FailureStatus::Pending,
        FailureStatus::InProgress,
        FailureStatus::Succeeded,
        FailureStatus::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStatus::Pending => "pending",
            FailureStatus::InProgress => "in_progress",
            FailureStatus::Succeeded => "succeeded",
            FailureStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureStatus::Succeeded | FailureStatus::DeadLetter)
    }

    /// Legal moves: `pending -> in_progress -> {succeeded | pending | dead_letter}`.
    pub fn can_transition_to(&self, next: FailureStatus) -> bool {
        use FailureStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Succeeded)
                | (InProgress, Pending)
                | (InProgress, DeadLetter)
        )
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FailureStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown webhook failure status: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(900),
            max_attempts: 5,
            batch_size: 10,
            lease: Duration::from_secs(600),
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = policy();
        let delays: Vec<u64> = (0..7).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![60, 120, 240, 480, 900, 900, 900]);
    }

    #[test]
    fn delay_is_monotonic_and_never_overflows() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for attempts in 0..200 {
            let delay = policy.delay_for(attempts);
            assert!(delay >= previous, "attempt {attempts} shrank the delay");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn negative_attempts_use_base_delay() {
        assert_eq!(policy().delay_for(-3), Duration::from_secs(60));
    }

    #[test]
    fn next_retry_at_is_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let next = policy().next_retry_at(2, now);
        assert_eq!(next, now + ChronoDuration::seconds(240));
    }

    #[test]
    fn huge_delays_do_not_wrap_negative() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(u64::MAX / 4),
            max_delay: Duration::from_secs(u64::MAX),
            ..policy()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(policy.next_retry_at(0, now) > now);
        assert!(policy.next_retry_at(3, now) > now);
    }

    #[test]
    fn lease_cutoff_looks_back_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(policy().lease_cutoff(now), now - ChronoDuration::seconds(600));
    }

    #[test]
    fn exhaustion_starts_at_the_ceiling() {
        let policy = policy();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
    }

    #[test]
    fn terminal_states_accept_no_transition() {
        for terminal in [FailureStatus::Succeeded, FailureStatus::DeadLetter] {
            assert!(terminal.is_terminal());
            for next in FailureStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn replay_path_transitions() {
        use FailureStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Pending));
        assert!(InProgress.can_transition_to(DeadLetter));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(DeadLetter));
        assert!(!InProgress.can_transition_to(InProgress));
    }

    #[test]
    fn status_names_round_trip() {
        for status in FailureStatus::ALL {
            assert_eq!(status.as_str().parse::<FailureStatus>(), Ok(status));
        }
        assert!("done".parse::<FailureStatus>().is_err());
    }
}
