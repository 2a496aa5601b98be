//! Token-bucket admission with consecutive-violation bans
//!
//! [`decide`] is the whole algorithm. It is a pure function: the caller reads
//! the previous state, calls `decide`, and writes the returned state back.
//! Stores run those three steps under one per-key critical section so that
//! concurrent callers never act on a stale read.
//!
//! # Order of evaluation
//!
//! 1. Missing state becomes a full bucket refilled at `now`.
//! 2. An active ban short-circuits with [`Outcome::Banned`] and leaves the
//!    state untouched.
//! 3. An expired ban is cleared together with the violation counter.
//! 4. Tokens refill linearly for the whole seconds elapsed, capped at capacity.
//! 5. One request's worth of tokens is consumed if available.
//! 6. Otherwise the violation counter grows, and reaching
//!    `max_violations` opens a ban of `ban_duration` seconds.

use super::bucket::{BucketState, Limits, Outcome, Policy};


/// New bucket state together with the outcome that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: BucketState,
    pub outcome: Outcome,
}

/// Evaluate one request against a bucket
///
/// # Parameters
///
/// - `state`: stored state, or `None` on first access
/// - `limits`: bucket capacity, refill rate and request cost
/// - `policy`: ban threshold and ban length
/// - `now`: current Unix time in seconds
///
/// # Example
///
/// ```
/// use quotajail::{decide, Limits, Outcome, Policy};
///
/// let limits = Limits::new(2, 1);
/// let policy = Policy::default();
///
/// let first = decide(None, limits, policy, 100);
/// assert_eq!(first.outcome, Outcome::Admitted);
///
/// let second = decide(Some(first.state), limits, policy, 100);
/// let third = decide(Some(second.state), limits, policy, 100);
/// assert_eq!(third.outcome, Outcome::Denied);
/// ```
pub fn decide(state: Option<BucketState>, limits: Limits, policy: Policy, now: i64) -> Decision {
    let mut state = state.unwrap_or_else(|| BucketState::fresh(limits.capacity, now));

    if let Some(until) = state.banned_until {
        if now < until {
            return Decision {
                state,
                outcome: Outcome::Banned,
            };
        }
        state.banned_until = None;
        state.consecutive_violations = 0;
    }

    refill(&mut state, limits, now);

    let requested = limits.requested as f64;
    let outcome = if state.tokens >= requested {
        state.tokens = (state.tokens - requested).max(0.0);
        state.consecutive_violations = 0;
        Outcome::Admitted
    } else {
        state.consecutive_violations = state.consecutive_violations.saturating_add(1);
        if state.consecutive_violations >= policy.max_violations {
            state.banned_until = Some(now.saturating_add(policy.ban_duration));
            state.consecutive_violations = 0;
            Outcome::Banned
        } else {
            Outcome::Denied
        }
    };

    Decision { state, outcome }
}

fn refill(state: &mut BucketState, limits: Limits, now: i64) {
    let capacity = limits.capacity as f64;
    let elapsed = now.saturating_sub(state.last_refill).max(0);
    let accrued = elapsed as f64 * limits.refill_rate as f64;

    state.tokens = (state.tokens + accrued).min(capacity).max(0.0);
    // A replica whose clock lags must not drag the refill mark backwards
    state.last_refill = state.last_refill.max(now);
}
