//! Pipeline driver: diff and promote packages between two phases.
//!
//! A run first checks that everything it will need is configured and
//! resolvable, so configuration mistakes abort before any remote call. Each
//! collection is then processed concurrently and independently; a failure in
//! one collection (or one package) is recorded in the report and never stops
//! the others.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::backoff::RetryPolicy;
use crate::collection::Collection;
use crate::diff::{DiffEngine, DiffOptions};
use crate::error::{Error, RemoteError, Result};
use crate::evaluator::{PromotionEvaluator, Verdict};
use crate::package::Package;
use crate::phase::{BindingKind, PhaseRegistry};
use crate::remote::{CancelToken, RemoteCaller};
use crate::report::{
    CollectionReport, CollectionStatus, PackageOutcome, PackageReport, RunReport,
};
use crate::service::Builder;
use crate::template::GroupName;

/// What a run does with the packages missing from the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    /// Only report them.
    Diff,
    /// Tag the eligible ones into the destination.
    Tag {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_days: Option<u32>,
    },
}

/// Tunables of a run, read from the `[pipeline]` configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSettings {
    /// Maximum simultaneous remote calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries of a transiently failing call.
    #[serde(default)]
    pub retries: u32,
    /// Delay before the first retry, doubled for each following one.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Only consider packages named after the collection.
    #[serde(default)]
    pub restrict_to_collection: bool,
    /// Ignore packages the destination already has at an equal or newer EVR.
    #[serde(default)]
    pub skip_obsolete: bool,
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            restrict_to_collection: false,
            skip_obsolete: false,
        }
    }
}

impl PipelineSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            restrict_to_collection: self.restrict_to_collection,
            skip_obsolete: self.skip_obsolete,
        }
    }

    /// A remote caller applying these settings.
    pub fn remote_caller(&self) -> RemoteCaller {
        RemoteCaller::new(self.concurrency, self.timeout()).with_retry(self.retry_policy())
    }
}

/// Drives diff and tag runs over a set of collections.
#[derive(Debug, Clone)]
pub struct PipelineDriver {
    phases: Arc<PhaseRegistry>,
    remote: RemoteCaller,
    diff: DiffEngine,
    evaluator: PromotionEvaluator,
}

impl PipelineDriver {
    /// Creates a driver issuing remote calls through `remote`.
    pub fn new(phases: Arc<PhaseRegistry>, remote: RemoteCaller) -> Self {
        Self {
            diff: DiffEngine::new(Arc::clone(&phases), remote.clone()),
            evaluator: PromotionEvaluator::new(Arc::clone(&phases), remote.clone()),
            phases,
            remote,
        }
    }

    /// Creates a driver from the `[pipeline]` settings.
    pub fn from_settings(phases: Arc<PhaseRegistry>, settings: &PipelineSettings) -> Self {
        Self::new(phases, settings.remote_caller()).with_diff_options(settings.diff_options())
    }

    pub fn with_diff_options(mut self, options: DiffOptions) -> Self {
        self.diff = self.diff.with_options(options);
        self
    }

    /// Pins "now" for check age computations.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.evaluator = self.evaluator.with_reference_time(now);
        self
    }

    /// Token that stops the driver from issuing further remote calls.
    pub fn cancel_token(&self) -> &CancelToken {
        self.remote.cancel_token()
    }

    /// Runs `action` from `source` to `destination` for every collection.
    ///
    /// Returns `Err` only for configuration problems detected before any
    /// remote call; everything else ends up in the report.
    pub async fn run(
        &self,
        source: &str,
        destination: &str,
        collections: &[Collection],
        action: Action,
    ) -> Result<RunReport> {
        self.preflight(source, destination, collections, action)?;

        let mut report = RunReport::new(source, destination, action);
        tracing::info!(
            run_id = %report.run_id,
            source = %source,
            destination = %destination,
            collections = collections.len(),
            action = ?action,
            "starting run"
        );

        let mut tasks = JoinSet::new();
        for (idx, collection) in collections.iter().cloned().enumerate() {
            let driver = self.clone();
            let source = source.to_string();
            let destination = destination.to_string();
            tasks.spawn(async move {
                let report = driver
                    .run_collection(&source, &destination, collection, action)
                    .await;
                (idx, report)
            });
        }

        let mut slots: Vec<Option<CollectionReport>> = vec![None; collections.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, collection_report)) => slots[idx] = Some(collection_report),
                Err(err) => tracing::warn!(error = %err, "collection task failed"),
            }
        }

        report.collections = collections
            .iter()
            .zip(slots)
            .map(|(collection, slot)| {
                slot.unwrap_or_else(|| {
                    CollectionReport::failed(
                        collection.clone(),
                        &Error::TaskAborted("collection".to_string()),
                    )
                })
            })
            .collect();
        report.cancelled = report
            .collections
            .iter()
            .any(|c| c.status == CollectionStatus::Cancelled);
        report.finished_at = Utc::now();

        let counts = report.counts();
        tracing::info!(
            run_id = %report.run_id,
            missing = counts.missing,
            tagged = counts.tagged,
            not_yet = counts.not_yet,
            failed_check = counts.failed_check,
            errors = counts.error,
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }

    /// Everything the run will resolve, resolved once up front.
    fn preflight(
        &self,
        source: &str,
        destination: &str,
        collections: &[Collection],
        action: Action,
    ) -> Result<()> {
        let source_phase = self.phases.get(source)?;
        let destination_phase = self.phases.get(destination)?;

        let mut needed = vec![
            source_phase.require(BindingKind::Repo)?,
            destination_phase.require(BindingKind::Repo)?,
        ];
        if let Action::Tag { .. } = action {
            needed.push(destination_phase.require(BindingKind::Builder)?);
            if let Some(check) = source_phase.binding(BindingKind::Check) {
                needed.push(check);
            }
        }

        for collection in collections {
            for binding in &needed {
                binding.groups(collection)?;
            }
        }
        Ok(())
    }

    async fn run_collection(
        &self,
        source: &str,
        destination: &str,
        collection: Collection,
        action: Action,
    ) -> CollectionReport {
        tracing::info!(collection = %collection, "processing collection");

        let candidates = match self.diff.missing(source, destination, &collection).await {
            Ok(candidates) => candidates,
            Err(err) if err.remote() == Some(&RemoteError::Cancelled) => {
                tracing::warn!(collection = %collection, "collection cancelled");
                return CollectionReport::cancelled(collection, Vec::new());
            }
            Err(err) => {
                tracing::warn!(collection = %collection, error = %err, "diff failed");
                return CollectionReport::failed(collection, &err);
            }
        };

        let min_days = match action {
            Action::Diff => {
                let packages = candidates.into_iter().map(PackageReport::missing).collect();
                return CollectionReport::completed(collection, packages);
            }
            Action::Tag { min_days } => min_days,
        };

        match self
            .promote_all(source, destination, &collection, candidates, min_days)
            .await
        {
            Ok((packages, false)) => CollectionReport::completed(collection, packages),
            Ok((packages, true)) => CollectionReport::cancelled(collection, packages),
            Err(err) => {
                tracing::warn!(collection = %collection, error = %err, "promotion failed");
                CollectionReport::failed(collection, &err)
            }
        }
    }

    /// Evaluates and tags every candidate. The flag reports whether any
    /// package was cut short by cancellation.
    async fn promote_all(
        &self,
        source: &str,
        destination: &str,
        collection: &Collection,
        candidates: BTreeSet<Package>,
        min_days: Option<u32>,
    ) -> Result<(Vec<PackageReport>, bool)> {
        let binding = self
            .phases
            .get(destination)?
            .require(BindingKind::Builder)?;
        let promotion = Arc::new(Promotion {
            evaluator: self.evaluator.clone(),
            remote: self.remote.clone(),
            builder: self.phases.services().builder(&binding.service)?,
            service: binding.service.clone(),
            groups: binding.groups(collection)?,
            source: source.to_string(),
            collection: collection.clone(),
            min_days,
        });

        let candidates: Vec<Package> = candidates.into_iter().collect();
        let mut tasks = JoinSet::new();
        let count = candidates.len();
        for (idx, package) in candidates.iter().cloned().enumerate() {
            let promotion = Arc::clone(&promotion);
            tasks.spawn(async move { (idx, promotion.promote(package).await) });
        }

        let mut slots: Vec<Option<(PackageReport, bool)>> = vec![None; count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(err) => tracing::warn!(collection = %collection, error = %err, "package task failed"),
            }
        }

        let mut cancelled = false;
        let mut packages = Vec::with_capacity(count);
        for (package, slot) in candidates.into_iter().zip(slots) {
            let (report, package_cancelled) = slot.unwrap_or_else(|| {
                let err = Error::TaskAborted(format!("promotion of {package}"));
                (
                    PackageReport::new(package, PackageOutcome::Error).with_reason(err.to_string()),
                    false,
                )
            });
            cancelled |= package_cancelled;
            packages.push(report);
        }
        Ok((packages, cancelled))
    }
}

/// Shared state of the promotions of one collection.
struct Promotion {
    evaluator: PromotionEvaluator,
    remote: RemoteCaller,
    builder: Arc<dyn Builder>,
    service: String,
    groups: Vec<GroupName>,
    source: String,
    collection: Collection,
    min_days: Option<u32>,
}

impl Promotion {
    /// Evaluates one package and tags it if eligible. The flag is set when
    /// cancellation prevented a remote call.
    async fn promote(&self, package: Package) -> (PackageReport, bool) {
        let evaluated = self
            .evaluator
            .evaluate(&package, &self.source, &self.collection, self.min_days)
            .await;
        let decision = match evaluated {
            Ok(decision) => decision,
            Err(err) => {
                return (
                    PackageReport::new(package, PackageOutcome::Error).with_reason(err.to_string()),
                    false,
                )
            }
        };

        let outcome = match decision.verdict {
            Verdict::Eligible => None,
            Verdict::NotYet => Some(PackageOutcome::NotYet),
            Verdict::Failed => Some(PackageOutcome::FailedCheck),
            Verdict::Error => Some(PackageOutcome::Error),
        };
        if let Some(outcome) = outcome {
            let cancelled = decision.cause() == Some(&RemoteError::Cancelled);
            if outcome == PackageOutcome::Error && !cancelled {
                tracing::warn!(
                    collection = %self.collection,
                    package = %package,
                    reason = %decision.reason,
                    "check query failed"
                );
            }
            return (
                PackageReport::new(package, outcome).with_reason(decision.reason.to_string()),
                cancelled,
            );
        }

        let mut tagged_into = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let label = format!("tag {package} into {group}");
            let tagged = self.remote.call(&label, || self.builder.tag(&package, group)).await;
            match tagged {
                Ok(tag_outcome) => {
                    tracing::info!(
                        collection = %self.collection,
                        package = %package,
                        group = %group,
                        outcome = ?tag_outcome,
                        "tagged package"
                    );
                    tagged_into.push(group.clone());
                }
                Err(source) => {
                    let cancelled = source == RemoteError::Cancelled;
                    let err = Error::ServiceMutation {
                        service: self.service.clone(),
                        group: group.to_string(),
                        package: package.to_string(),
                        source,
                    };
                    tracing::warn!(collection = %self.collection, error = %err, "tagging failed");
                    let report = PackageReport::new(package, PackageOutcome::Error)
                        .with_reason(err.to_string())
                        .with_tagged_into(tagged_into);
                    return (report, cancelled);
                }
            }
        }

        let report = PackageReport::new(package, PackageOutcome::Tagged)
            .with_reason(decision.reason.to_string())
            .with_tagged_into(tagged_into);
        (report, false)
    }
}
