//! The admission service: one decision per inbound request
//!
//! Every transport funnels its requests through [`AdmissionService::allow`].
//! The service validates the request, reads the clock, asks the
//! [`StateStore`] for exactly one evaluation and turns the outcome into a
//! [`Verdict`]. When the store cannot answer, the configured
//! [`FailurePolicy`] decides instead.

use crate::clock::{Clock, SystemClock};
use crate::error::{AdmissionError, Result};
use crate::metrics::Metrics;
use crate::store::StateStore;
use crate::types::{AllowRequest, Status, Verdict};
use quotajail::{BucketKey, Limits, Outcome, Policy};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// What to answer when the state store fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request
    #[default]
    Open,
    /// Reject the request
    Closed,
}

impl FailurePolicy {
    pub fn allows(self) -> bool {
        matches!(self, FailurePolicy::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Open => "open",
            FailurePolicy::Closed => "closed",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            _ => Err(format!(
                "Invalid failure policy: {s}. Valid options are: open, closed"
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared by every transport of a replica
///
/// # Example
///
/// ```
/// use quotajail_server::admission::AdmissionService;
/// use quotajail_server::metrics::Metrics;
/// use quotajail_server::store::LocalStore;
/// use quotajail_server::types::AllowRequest;
/// use quotajail::ShardedStore;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let service = AdmissionService::builder(
///     Arc::new(LocalStore::new(Arc::new(ShardedStore::new()))),
///     Arc::new(Metrics::new()),
/// )
/// .build();
///
/// let verdict = service
///     .allow(AllowRequest {
///         user_id: "user:123".to_string(),
///         action_key: "login".to_string(),
///         capacity: 5,
///         refill_rate: 1,
///     })
///     .await
///     .unwrap();
/// assert!(verdict.allowed);
/// # });
/// ```
pub struct AdmissionService {
    store: Arc<dyn StateStore>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    failure_policy: FailurePolicy,
}

pub struct AdmissionServiceBuilder {
    store: Arc<dyn StateStore>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    failure_policy: FailurePolicy,
}

impl AdmissionServiceBuilder {
    /// Ban policy applied to every bucket
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> AdmissionService {
        AdmissionService {
            store: self.store,
            metrics: self.metrics,
            clock: self.clock,
            policy: self.policy,
            failure_policy: self.failure_policy,
        }
    }
}

impl AdmissionService {
    /// Start building a service over `store`, reporting into `metrics`
    ///
    /// Defaults: system clock, 5 violations / 60 second ban, fail open.
    pub fn builder(store: Arc<dyn StateStore>, metrics: Arc<Metrics>) -> AdmissionServiceBuilder {
        AdmissionServiceBuilder {
            store,
            metrics,
            clock: Arc::new(SystemClock),
            policy: Policy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Decide whether `request` may proceed
    ///
    /// Only malformed requests produce an error. Store failures are
    /// answered by the failure policy and recorded with status `error`.
    pub async fn allow(&self, request: AllowRequest) -> Result<Verdict> {
        let (key, limits) = validate(request)?;
        let started = Instant::now();
        let now = self.clock.now();

        let verdict = match self.store.evaluate(&key, limits, self.policy, now).await {
            Ok(outcome) => {
                match outcome {
                    Outcome::Banned => warn!(
                        subject = key.subject(),
                        action = key.action(),
                        "Request from jailed subject rejected"
                    ),
                    outcome => debug!(
                        subject = key.subject(),
                        action = key.action(),
                        outcome = outcome.as_str(),
                        "Admission decided"
                    ),
                }
                Verdict {
                    allowed: outcome.is_admitted(),
                    status: Status::from(outcome),
                }
            }
            Err(e) => {
                warn!(
                    subject = key.subject(),
                    action = key.action(),
                    failure_policy = self.failure_policy.as_str(),
                    "State store failed: {}",
                    e
                );
                Verdict {
                    allowed: self.failure_policy.allows(),
                    status: Status::Error,
                }
            }
        };

        self.metrics
            .record(verdict.status, key.action(), started.elapsed());
        Ok(verdict)
    }
}

fn validate(request: AllowRequest) -> Result<(BucketKey, Limits)> {
    if request.user_id.is_empty() {
        return Err(AdmissionError::InvalidRequest(
            "user_id must not be empty".to_string(),
        ));
    }
    if request.action_key.is_empty() {
        return Err(AdmissionError::InvalidRequest(
            "action_key must not be empty".to_string(),
        ));
    }
    if request.capacity <= 0 {
        return Err(AdmissionError::InvalidRequest(format!(
            "capacity must be positive, got {}",
            request.capacity
        )));
    }
    if request.refill_rate < 0 {
        return Err(AdmissionError::InvalidRequest(format!(
            "refill_rate must not be negative, got {}",
            request.refill_rate
        )));
    }

    let limits = Limits::new(request.capacity, request.refill_rate);
    Ok((BucketKey::new(request.user_id, request.action_key), limits))
}
