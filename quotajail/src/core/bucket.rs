//! Bucket identity, persisted state and per-call parameters
//!
//! A bucket is addressed by a [`BucketKey`] and carries a [`BucketState`].
//! Every evaluation supplies the bucket's [`Limits`] and the fleet-wide
//! [`Policy`]; neither is stored with the bucket.

use std::fmt;

/// Composite identity of one rate-limited resource
///
/// The subject and action are kept apart, so `("a:b", "c")` and
/// `("a", "b:c")` are different buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    subject: String,
    action: String,
}

impl BucketKey {
    /// Create a key for `subject` performing `action`
    ///
    /// # Example
    ///
    /// ```
    /// use quotajail::BucketKey;
    ///
    /// let key = BucketKey::new("user:42", "login");
    /// assert_eq!(key.to_string(), "rate_limit:user:42:login");
    /// ```
    pub fn new(subject: impl Into<String>, action: impl Into<String>) -> Self {
        BucketKey {
            subject: subject.into(),
            action: action.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate_limit:{}:{}", self.subject, self.action)
    }
}

/// Size and refill speed of a bucket, plus the cost of one request
///
/// Callers are expected to pass `capacity > 0`, `refill_rate >= 0` and
/// `requested >= 0`; the engine does not re-check them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of tokens the bucket holds
    pub capacity: i64,
    /// Tokens added per elapsed second
    pub refill_rate: i64,
    /// Tokens consumed by an admitted request
    pub requested: i64,
}

impl Limits {
    /// Limits for a single-token request
    pub fn new(capacity: i64, refill_rate: i64) -> Self {
        Limits {
            capacity,
            refill_rate,
            requested: 1,
        }
    }

    /// Override the number of tokens consumed per admission
    pub fn requested(mut self, requested: i64) -> Self {
        self.requested = requested;
        self
    }
}

/// Ban escalation constants shared by every replica in a fleet
///
/// All replicas talking to one store must use the same policy, otherwise the
/// same key would be judged differently depending on which replica served it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Consecutive denials that put a key into the ban window
    pub max_violations: u32,
    /// Length of the ban window in seconds
    pub ban_duration: i64,
}

impl Policy {
    pub const DEFAULT_MAX_VIOLATIONS: u32 = 5;
    pub const DEFAULT_BAN_DURATION: i64 = 60;

    pub fn new(max_violations: u32, ban_duration: i64) -> Self {
        Policy {
            max_violations,
            ban_duration,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::new(Self::DEFAULT_MAX_VIOLATIONS, Self::DEFAULT_BAN_DURATION)
    }
}

/// Result of one admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// A token was available and has been consumed
    Admitted,
    /// The bucket was empty
    Denied,
    /// The key is serving a ban, or this denial started one
    Banned,
}

impl Outcome {
    /// Whether the caller may proceed
    pub fn is_admitted(self) -> bool {
        matches!(self, Outcome::Admitted)
    }

    /// Lowercase label, as used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Admitted => "admitted",
            Outcome::Denied => "denied",
            Outcome::Banned => "banned",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ban state machine position of a bucket at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Banned,
}

/// Stored state of one bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens currently available, `0 <= tokens <= capacity`
    pub tokens: f64,
    /// Unix second of the last refill; never moves backwards
    pub last_refill: i64,
    /// Denials since the last admission or ban expiry
    pub consecutive_violations: u32,
    /// Unix second at which the current ban ends
    pub banned_until: Option<i64>,
}

impl BucketState {
    /// State of a bucket seen for the first time at `now`
    pub fn fresh(capacity: i64, now: i64) -> Self {
        BucketState {
            tokens: capacity as f64,
            last_refill: now,
            consecutive_violations: 0,
            banned_until: None,
        }
    }

    /// Ban state at `now`, without applying lazy expiry
    pub fn phase(&self, now: i64) -> Phase {
        match self.banned_until {
            Some(until) if now < until => Phase::Banned,
            _ => Phase::Active,
        }
    }

    /// First second at which this state behaves exactly like a fresh bucket
    ///
    /// That is the later of the ban end and the moment the tokens are back
    /// at `capacity`. Returns `None` if the bucket never refills.
    pub fn settles_at(&self, capacity: i64, refill_rate: i64) -> Option<i64> {
        let missing = (capacity as f64 - self.tokens).max(0.0);
        let refilled_at = if missing == 0.0 {
            self.last_refill
        } else if refill_rate > 0 {
            let secs = (missing / refill_rate as f64).ceil() as i64;
            self.last_refill.saturating_add(secs)
        } else {
            return None;
        };

        Some(match self.banned_until {
            Some(until) => refilled_at.max(until),
            None => refilled_at,
        })
    }
}
