//! Common types used across the server
//!
//! Each transport converts its wire format into [`AllowRequest`] and renders
//! the resulting [`Verdict`] back. The gRPC and HTTP transports share the same
//! field names.

use quotajail::Outcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One admission query, as received from a caller
///
/// # Fields
///
/// - `user_id`: identity being limited (e.g. "user:123", "ip:10.0.0.1")
/// - `action_key`: the action being rate limited (e.g. "login")
/// - `capacity`: bucket size, must be positive
/// - `refill_rate`: tokens added per second, must not be negative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRequest {
    pub user_id: String,
    pub action_key: String,
    pub capacity: i64,
    pub refill_rate: i64,
}

/// Response body returned to callers
///
/// Denied and banned requests look the same from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowResponse {
    pub allowed: bool,
}

/// Observability tag attached to every counted decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Admitted,
    Denied,
    Banned,
    /// The store could not be used; the failure policy decided instead
    Error,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Admitted,
        Status::Denied,
        Status::Banned,
        Status::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Admitted => "admitted",
            Status::Denied => "denied",
            Status::Banned => "banned",
            Status::Error => "error",
        }
    }
}

impl From<Outcome> for Status {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Admitted => Status::Admitted,
            Outcome::Denied => Status::Denied,
            Outcome::Banned => Status::Banned,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the admission service decided, and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub status: Status,
}

impl From<Verdict> for AllowResponse {
    fn from(verdict: Verdict) -> Self {
        AllowResponse {
            allowed: verdict.allowed,
        }
    }
}
