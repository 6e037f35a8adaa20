//! Promotion eligibility.
//!
//! A package may leave a phase once every test group of the phase's `check`
//! binding reports a pass for it, and optionally once the oldest of those
//! passes is at least `min_days` old. Groups are combined with a logical AND:
//!
//! | any query failed | any fail | any missing/unknown | verdict    |
//! |------------------|----------|---------------------|------------|
//! | yes              | -        | -                   | `error`    |
//! | no               | yes      | -                   | `failed`   |
//! | no               | no       | yes                 | `not-yet`  |
//! | no               | no       | no                  | age gate   |

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::collection::Collection;
use crate::error::{RemoteError, RemoteResult, Result};
use crate::package::Package;
use crate::phase::{BindingKind, PhaseRegistry};
use crate::remote::RemoteCaller;
use crate::service::{CheckOutcome, CheckResult};
use crate::template::GroupName;

/// Final promotion verdict for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Eligible,
    NotYet,
    Failed,
    Error,
}

/// Why a verdict was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionReason {
    /// The phase declares no `check` binding.
    NoHealthGate,
    /// Every test group passed. `age_days` is the age of the oldest pass.
    Passed { age_days: Option<i64> },
    /// Every test group passed, but too recently.
    Underage { age_days: i64, min_days: u32 },
    /// A test group reported a failure.
    FailedCheck { group: GroupName },
    /// A test group has no result for the package yet.
    MissingCheck { group: GroupName },
    /// A test group has a run without a verdict.
    PendingCheck { group: GroupName },
    /// A test group could not be queried.
    QueryFailed {
        service: String,
        group: GroupName,
        cause: RemoteError,
    },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::NoHealthGate => f.write_str("no health checks configured"),
            DecisionReason::Passed { age_days: Some(days) } => {
                write!(f, "all checks passed {days} day(s) ago")
            }
            DecisionReason::Passed { age_days: None } => f.write_str("all checks passed"),
            DecisionReason::Underage { age_days, min_days } => write!(
                f,
                "checks passed {age_days} day(s) ago, {min_days} required"
            ),
            DecisionReason::FailedCheck { group } => write!(f, "check '{group}' failed"),
            DecisionReason::MissingCheck { group } => write!(f, "no result in '{group}' yet"),
            DecisionReason::PendingCheck { group } => {
                write!(f, "result in '{group}' has no verdict yet")
            }
            DecisionReason::QueryFailed {
                service,
                group,
                cause,
            } => write!(f, "querying '{group}' on service '{service}' failed: {cause}"),
        }
    }
}

/// Verdict plus its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionDecision {
    pub verdict: Verdict,
    pub reason: DecisionReason,
}

impl PromotionDecision {
    pub fn new(verdict: Verdict, reason: DecisionReason) -> Self {
        Self { verdict, reason }
    }

    pub fn is_eligible(&self) -> bool {
        self.verdict == Verdict::Eligible
    }

    /// The remote failure behind an `error` verdict.
    pub fn cause(&self) -> Option<&RemoteError> {
        match &self.reason {
            DecisionReason::QueryFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Decides whether packages may leave a phase.
#[derive(Debug, Clone)]
pub struct PromotionEvaluator {
    phases: Arc<PhaseRegistry>,
    remote: RemoteCaller,
    reference_time: Option<DateTime<Utc>>,
}

impl PromotionEvaluator {
    pub fn new(phases: Arc<PhaseRegistry>, remote: RemoteCaller) -> Self {
        Self {
            phases,
            remote,
            reference_time: None,
        }
    }

    /// Pins "now" for age computations.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    /// Evaluates `package` against the `check` binding of `phase`.
    ///
    /// Returns `Err` only for configuration problems; remote failures yield
    /// an [`Verdict::Error`] decision.
    pub async fn evaluate(
        &self,
        package: &Package,
        phase: &str,
        collection: &Collection,
        min_days: Option<u32>,
    ) -> Result<PromotionDecision> {
        let phase = self.phases.get(phase)?;
        let Some(binding) = phase.binding(BindingKind::Check) else {
            return Ok(PromotionDecision::new(
                Verdict::Eligible,
                DecisionReason::NoHealthGate,
            ));
        };
        let groups = binding.groups(collection)?;
        let check = self.phases.services().check(&binding.service)?;

        let mut tasks = JoinSet::new();
        for (idx, group) in groups.iter().cloned().enumerate() {
            let check = Arc::clone(&check);
            let remote = self.remote.clone();
            let package = package.clone();
            tasks.spawn(async move {
                let label = format!("result {package} in {group}");
                let result = remote.call(&label, || check.result(&group, &package)).await;
                (idx, result)
            });
        }

        let mut results: Vec<Option<RemoteResult<Option<CheckResult>>>> = vec![None; groups.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(err) => {
                    tracing::warn!(service = %binding.service, error = %err, "check task failed");
                }
            }
        }

        let results: Vec<_> = groups
            .into_iter()
            .zip(results)
            .map(|(group, result)| {
                let result = result
                    .unwrap_or_else(|| Err(RemoteError::Other("check task aborted".to_string())));
                (group, result)
            })
            .collect();

        let decision = aggregate(&binding.service, results, min_days, self.now());
        tracing::debug!(
            package = %package,
            collection = %collection,
            verdict = ?decision.verdict,
            reason = %decision.reason,
            "evaluated package"
        );
        Ok(decision)
    }
}

/// Combines per-group results, in group order, into one decision.
fn aggregate(
    service: &str,
    results: Vec<(GroupName, RemoteResult<Option<CheckResult>>)>,
    min_days: Option<u32>,
    now: DateTime<Utc>,
) -> PromotionDecision {
    let mut failed = None;
    let mut incomplete = None;
    let mut earliest_pass: Option<DateTime<Utc>> = None;

    for (group, result) in results {
        match result {
            Err(cause) => {
                return PromotionDecision::new(
                    Verdict::Error,
                    DecisionReason::QueryFailed {
                        service: service.to_string(),
                        group,
                        cause,
                    },
                );
            }
            Ok(Some(CheckResult {
                outcome: CheckOutcome::Fail,
                ..
            })) => {
                failed.get_or_insert(DecisionReason::FailedCheck { group });
            }
            Ok(Some(CheckResult {
                outcome: CheckOutcome::Unknown,
                ..
            })) => {
                incomplete.get_or_insert(DecisionReason::PendingCheck { group });
            }
            Ok(None) => {
                incomplete.get_or_insert(DecisionReason::MissingCheck { group });
            }
            Ok(Some(CheckResult {
                outcome: CheckOutcome::Pass,
                recorded_at,
            })) => {
                earliest_pass = Some(match earliest_pass {
                    Some(current) => current.min(recorded_at),
                    None => recorded_at,
                });
            }
        }
    }

    if let Some(reason) = failed {
        return PromotionDecision::new(Verdict::Failed, reason);
    }
    if let Some(reason) = incomplete {
        return PromotionDecision::new(Verdict::NotYet, reason);
    }

    let age = earliest_pass.map(|earliest| now - earliest);
    let age_days = age.map(|age| age.num_days());

    match (min_days, age) {
        (Some(min_days), Some(age)) if age < Duration::days(i64::from(min_days)) => {
            PromotionDecision::new(
                Verdict::NotYet,
                DecisionReason::Underage {
                    age_days: age.num_days(),
                    min_days,
                },
            )
        }
        _ => PromotionDecision::new(Verdict::Eligible, DecisionReason::Passed { age_days }),
    }
}
