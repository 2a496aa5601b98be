//! Commands and reply shapes of the store-node protocol
//!
//! ```text
//! BUCKET.EVAL subject action capacity refill_rate requested now max_violations ban_duration
//!     -> :1 admitted | :0 denied | :-1 banned
//! BUCKET.GET subject action
//!     -> $-1 when unknown
//!     -> *4 tokens(bulk) last_refill consecutive_violations banned_until(0 = none)
//! ```

use super::resp::RespValue;
use quotajail::{BucketKey, BucketState, Limits, Outcome, Policy};

pub const EVAL: &str = "BUCKET.EVAL";
pub const GET: &str = "BUCKET.GET";

/// Arguments after the command name
pub const EVAL_ARITY: usize = 8;
pub const GET_ARITY: usize = 2;

pub fn outcome_code(outcome: Outcome) -> i64 {
    match outcome {
        Outcome::Admitted => 1,
        Outcome::Denied => 0,
        Outcome::Banned => -1,
    }
}

pub fn outcome_from_code(code: i64) -> Option<Outcome> {
    match code {
        1 => Some(Outcome::Admitted),
        0 => Some(Outcome::Denied),
        -1 => Some(Outcome::Banned),
        _ => None,
    }
}

pub fn eval_command(key: &BucketKey, limits: Limits, policy: Policy, now: i64) -> RespValue {
    RespValue::command([
        EVAL.to_string(),
        key.subject().to_string(),
        key.action().to_string(),
        limits.capacity.to_string(),
        limits.refill_rate.to_string(),
        limits.requested.to_string(),
        now.to_string(),
        policy.max_violations.to_string(),
        policy.ban_duration.to_string(),
    ])
}

pub fn get_command(key: &BucketKey) -> RespValue {
    RespValue::command([GET, key.subject(), key.action()])
}

pub fn state_reply(state: Option<BucketState>) -> RespValue {
    match state {
        None => RespValue::BulkString(None),
        Some(state) => RespValue::Array(vec![
            RespValue::BulkString(Some(state.tokens.to_string())),
            RespValue::Integer(state.last_refill),
            RespValue::Integer(state.consecutive_violations as i64),
            RespValue::Integer(state.banned_until.unwrap_or(0)),
        ]),
    }
}

pub fn state_from_reply(reply: &RespValue) -> Result<Option<BucketState>, String> {
    let fields = match reply {
        RespValue::BulkString(None) => return Ok(None),
        RespValue::Array(fields) if fields.len() == 4 => fields,
        other => return Err(format!("unexpected state reply: {other:?}")),
    };

    let tokens = match &fields[0] {
        RespValue::BulkString(Some(s)) => s
            .parse::<f64>()
            .map_err(|e| format!("invalid tokens {s:?}: {e}"))?,
        other => return Err(format!("invalid tokens field: {other:?}")),
    };
    let integer = |value: &RespValue, name: &str| match value {
        RespValue::Integer(n) => Ok(*n),
        other => Err(format!("invalid {name} field: {other:?}")),
    };

    let violations = integer(&fields[2], "consecutive_violations")?;
    let banned_until = integer(&fields[3], "banned_until")?;

    Ok(Some(BucketState {
        tokens,
        last_refill: integer(&fields[1], "last_refill")?,
        consecutive_violations: u32::try_from(violations)
            .map_err(|_| format!("invalid consecutive_violations {violations}"))?,
        banned_until: (banned_until != 0).then_some(banned_until),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        for outcome in [Outcome::Admitted, Outcome::Denied, Outcome::Banned] {
            assert_eq!(outcome_from_code(outcome_code(outcome)), Some(outcome));
        }
        assert_eq!(outcome_from_code(2), None);
    }

    #[test]
    fn test_eval_command_layout() {
        let command = eval_command(
            &BucketKey::new("user:7", "login"),
            Limits::new(5, 1),
            Policy::new(5, 60),
            1_700_000_000,
        );

        assert_eq!(
            command,
            RespValue::command([
                "BUCKET.EVAL",
                "user:7",
                "login",
                "5",
                "1",
                "1",
                "1700000000",
                "5",
                "60"
            ])
        );
    }

    #[test]
    fn test_state_reply_shapes() {
        assert_eq!(state_from_reply(&state_reply(None)), Ok(None));

        let state = BucketState {
            tokens: 2.5,
            last_refill: 1_700_000_000,
            consecutive_violations: 3,
            banned_until: Some(1_700_000_060),
        };
        assert_eq!(state_from_reply(&state_reply(Some(state))), Ok(Some(state)));

        let active = BucketState {
            banned_until: None,
            ..state
        };
        assert_eq!(state_from_reply(&state_reply(Some(active))), Ok(Some(active)));

        assert!(state_from_reply(&RespValue::Integer(1)).is_err());
    }
}
