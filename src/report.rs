//! Structured outcome of a pipeline run.
//!
//! A [`RunReport`] holds one [`CollectionReport`] per requested collection,
//! in the order they were requested, each listing its packages with their
//! individual outcome. Rendering is left to the caller (`to_yaml`,
//! `to_json`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::package::Package;
use crate::pipeline::Action;
use crate::template::GroupName;

/// Exit code for a run where every unit succeeded or is merely not ready.
pub const EXIT_OK: i32 = 0;
/// Exit code for a run where at least one unit ended in error.
pub const EXIT_ERRORS: i32 = 1;
/// Exit code for configuration failures.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: i32 = 130;

/// Final state of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageOutcome {
    /// Present in the source, absent from the destination (diff runs).
    Missing,
    /// Tagged into every destination group.
    Tagged,
    /// Checks are incomplete or too recent.
    NotYet,
    /// A check failed.
    FailedCheck,
    /// A remote call failed for this package.
    Error,
}

/// One package line of a collection report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReport {
    pub package: Package,
    pub outcome: PackageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tagged_into: Vec<GroupName>,
}

impl PackageReport {
    pub fn new(package: Package, outcome: PackageOutcome) -> Self {
        Self {
            package,
            outcome,
            reason: None,
            tagged_into: Vec::new(),
        }
    }

    pub fn missing(package: Package) -> Self {
        Self::new(package, PackageOutcome::Missing)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tagged_into(mut self, groups: Vec<GroupName>) -> Self {
        self.tagged_into = groups;
        self
    }
}

/// How processing of a collection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum CollectionStatus {
    Completed,
    /// The collection could not be processed at all (e.g. its diff failed).
    Error { message: String },
    /// Cancellation stopped the collection before it finished.
    Cancelled,
}

/// Per-outcome package counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub missing: usize,
    pub tagged: usize,
    pub not_yet: usize,
    pub failed_check: usize,
    pub error: usize,
}

impl Counts {
    fn add(&mut self, outcome: PackageOutcome) {
        match outcome {
            PackageOutcome::Missing => self.missing += 1,
            PackageOutcome::Tagged => self.tagged += 1,
            PackageOutcome::NotYet => self.not_yet += 1,
            PackageOutcome::FailedCheck => self.failed_check += 1,
            PackageOutcome::Error => self.error += 1,
        }
    }

    fn merge(&mut self, other: Counts) {
        self.missing += other.missing;
        self.tagged += other.tagged;
        self.not_yet += other.not_yet;
        self.failed_check += other.failed_check;
        self.error += other.error;
    }
}

/// Outcome of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub collection: Collection,
    pub status: CollectionStatus,
    pub packages: Vec<PackageReport>,
}

impl CollectionReport {
    pub fn completed(collection: Collection, packages: Vec<PackageReport>) -> Self {
        Self {
            collection,
            status: CollectionStatus::Completed,
            packages,
        }
    }

    pub fn failed(collection: Collection, error: &Error) -> Self {
        Self {
            collection,
            status: CollectionStatus::Error {
                message: error.to_string(),
            },
            packages: Vec::new(),
        }
    }

    pub fn cancelled(collection: Collection, packages: Vec<PackageReport>) -> Self {
        Self {
            collection,
            status: CollectionStatus::Cancelled,
            packages,
        }
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for package in &self.packages {
            counts.add(package.outcome);
        }
        counts
    }

    /// Packages with the given outcome, in report order.
    pub fn with_outcome(&self, outcome: PackageOutcome) -> impl Iterator<Item = &Package> {
        self.packages
            .iter()
            .filter(move |p| p.outcome == outcome)
            .map(|p| &p.package)
    }

    /// Whether the collection or any of its packages ended in error.
    pub fn has_errors(&self) -> bool {
        matches!(self.status, CollectionStatus::Error { .. })
            || self
                .packages
                .iter()
                .any(|p| p.outcome == PackageOutcome::Error)
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source: String,
    pub destination: String,
    pub action: Action,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub collections: Vec<CollectionReport>,
}

impl RunReport {
    /// Starts an empty report for a run beginning now.
    pub fn new(source: impl Into<String>, destination: impl Into<String>, action: Action) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            source: source.into(),
            destination: destination.into(),
            action,
            started_at: now,
            finished_at: now,
            cancelled: false,
            collections: Vec::new(),
        }
    }

    /// Report for the given collection.
    pub fn collection(&self, collection: &Collection) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| &c.collection == collection)
    }

    /// Totals over every collection.
    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for collection in &self.collections {
            counts.merge(collection.counts());
        }
        counts
    }

    pub fn has_errors(&self) -> bool {
        self.collections.iter().any(CollectionReport::has_errors)
    }

    /// Process exit code for this report. `not-yet` packages are not errors.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.has_errors() {
            EXIT_ERRORS
        } else {
            EXIT_OK
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Render(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Render(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(s: &str) -> Package {
        Package::parse(s).unwrap()
    }

    fn report() -> RunReport {
        let mut report = RunReport::new("candidate", "release", Action::Tag { min_days: Some(7) });
        report.collections.push(CollectionReport::completed(
            Collection::new(7, "rh-python36"),
            vec![
                PackageReport::new(pkg("pkgA-1.0-1.x86_64"), PackageOutcome::Tagged)
                    .with_tagged_into(vec![GroupName::new("scl7-rh-python36-release")]),
                PackageReport::new(pkg("pkgB-2.0-1.x86_64"), PackageOutcome::NotYet)
                    .with_reason("no result in 'scl7-rh-python36-tests' yet"),
            ],
        ));
        report
    }

    #[test]
    fn not_yet_is_not_an_error() {
        let report = report();
        assert!(!report.has_errors());
        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.counts().tagged, 1);
        assert_eq!(report.counts().not_yet, 1);
    }

    #[test]
    fn collection_error_sets_exit_code() {
        let mut report = report();
        report.collections.push(CollectionReport::failed(
            Collection::new(7, "rh-ruby25"),
            &Error::Config("boom".to_string()),
        ));
        assert!(report.has_errors());
        assert_eq!(report.exit_code(), EXIT_ERRORS);
    }

    #[test]
    fn cancellation_wins_over_errors() {
        let mut report = report();
        report.collections[0]
            .packages
            .push(PackageReport::new(pkg("pkgC-1.0-1.x86_64"), PackageOutcome::Error));
        report.cancelled = true;
        assert_eq!(report.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn outcome_filter_keeps_order() {
        let report = report();
        let collection = report.collection(&Collection::new(7, "rh-python36")).unwrap();
        let tagged: Vec<_> = collection.with_outcome(PackageOutcome::Tagged).collect();
        assert_eq!(tagged, vec![&pkg("pkgA-1.0-1.x86_64")]);
    }

    #[test]
    fn yaml_uses_kebab_case_outcomes() {
        let yaml = report().to_yaml().unwrap();
        assert!(yaml.contains("outcome: not-yet"));
        assert!(yaml.contains("pkgA-1.0-1.x86_64"));
        assert!(yaml.contains("state: completed"));
    }

    #[test]
    fn json_round_trips() {
        let report = report();
        let parsed: RunReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed, report);
    }
}
