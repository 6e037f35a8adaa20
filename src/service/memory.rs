//! Static in-memory service.
//!
//! Serves package groups and test results straight from configuration and
//! records tag operations in memory. Useful for dry runs, demonstrations and
//! as a test double.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, RemoteResult};
use crate::package::Package;
use crate::template::GroupName;

use super::{Builder, Check, CheckOutcome, CheckResult, Repository, TagOutcome};

/// Adapter settings of a `type = "memory"` service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySettings {
    /// Group name to its packages.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<Package>>,
    /// Recorded test results.
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

/// One recorded test result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultEntry {
    pub group: String,
    pub package: Package,
    pub outcome: CheckOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory implementation of every capability.
#[derive(Debug, Default)]
pub struct MemoryService {
    groups: RwLock<BTreeMap<GroupName, BTreeSet<Package>>>,
    results: RwLock<BTreeMap<(GroupName, Package), CheckResult>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the service from its configuration settings.
    pub fn from_settings(settings: MemorySettings) -> Self {
        let service = Self::new();
        for (group, packages) in settings.groups {
            service.insert_group(GroupName::new(group), packages);
        }
        for entry in settings.results {
            service.insert_result(
                GroupName::new(entry.group),
                entry.package,
                CheckResult::new(entry.outcome, entry.recorded_at),
            );
        }
        service
    }

    /// Adds a group with the given packages.
    pub fn with_group(
        self,
        group: impl Into<String>,
        packages: impl IntoIterator<Item = Package>,
    ) -> Self {
        self.insert_group(GroupName::new(group), packages);
        self
    }

    /// Records a test result.
    pub fn with_result(self, group: impl Into<String>, package: Package, result: CheckResult) -> Self {
        self.insert_result(GroupName::new(group), package, result);
        self
    }

    /// Current contents of a group, if it exists.
    pub fn packages(&self, group: &str) -> Option<BTreeSet<Package>> {
        self.groups
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&GroupName::new(group))
            .cloned()
    }

    fn insert_group(&self, group: GroupName, packages: impl IntoIterator<Item = Package>) {
        self.groups
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(group)
            .or_default()
            .extend(packages);
    }

    fn insert_result(&self, group: GroupName, package: Package, result: CheckResult) {
        self.results
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((group, package), result);
    }
}

#[async_trait]
impl Repository for MemoryService {
    async fn list_packages(&self, group: &GroupName) -> RemoteResult<BTreeSet<Package>> {
        self.packages(group.as_str())
            .ok_or_else(|| RemoteError::NotFound(group.to_string()))
    }
}

#[async_trait]
impl Builder for MemoryService {
    async fn tag(&self, package: &Package, group: &GroupName) -> RemoteResult<TagOutcome> {
        let mut groups = self
            .groups
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let members = groups
            .get_mut(group)
            .ok_or_else(|| RemoteError::NotFound(group.to_string()))?;
        if members.insert(package.clone()) {
            Ok(TagOutcome::Tagged)
        } else {
            Ok(TagOutcome::AlreadyTagged)
        }
    }
}

#[async_trait]
impl Check for MemoryService {
    async fn result(
        &self,
        group: &GroupName,
        package: &Package,
    ) -> RemoteResult<Option<CheckResult>> {
        let results = self
            .results
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(results.get(&(group.clone(), package.clone())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    fn pkg(s: &str) -> Package {
        Package::parse(s).unwrap()
    }

    #[test]
    fn lists_configured_groups() {
        let service = MemoryService::new().with_group("scl7-candidate", [pkg("pkgA-1.0-1.x86_64")]);
        let listed = block_on(service.list_packages(&GroupName::new("scl7-candidate"))).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn unknown_group_is_not_found() {
        let service = MemoryService::new();
        let err = block_on(service.list_packages(&GroupName::new("nope"))).unwrap_err();
        assert_eq!(err, RemoteError::NotFound("nope".to_string()));
    }

    #[test]
    fn tagging_is_idempotent() {
        let service = MemoryService::new().with_group("scl7-release", Vec::<Package>::new());
        let group = GroupName::new("scl7-release");
        let package = pkg("pkgB-2.0-1.x86_64");

        assert_eq!(block_on(service.tag(&package, &group)).unwrap(), TagOutcome::Tagged);
        assert_eq!(
            block_on(service.tag(&package, &group)).unwrap(),
            TagOutcome::AlreadyTagged
        );
        assert_eq!(service.packages("scl7-release").unwrap().len(), 1);
    }

    #[test]
    fn missing_result_is_none() {
        let recorded = Utc::now();
        let service = MemoryService::new().with_result(
            "tests",
            pkg("pkgA-1.0-1.x86_64"),
            CheckResult::new(CheckOutcome::Pass, recorded),
        );
        let hit = block_on(service.result(&GroupName::new("tests"), &pkg("pkgA-1.0-1.x86_64"))).unwrap();
        assert_eq!(hit.map(|r| r.outcome), Some(CheckOutcome::Pass));
        let miss = block_on(service.result(&GroupName::new("tests"), &pkg("pkgB-1.0-1.x86_64"))).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn settings_deserialize_from_toml() {
        let settings: MemorySettings = toml::from_str(
            r#"
            [groups]
            "scl7-rh-python36-candidate" = ["pkgA-1.0-1.x86_64", "pkgB-2.0-1.x86_64"]

            [[results]]
            group = "scl7-rh-python36-tests"
            package = "pkgA-1.0-1.x86_64"
            outcome = "pass"
            recorded_at = "2026-10-01T12:00:00Z"
            "#,
        )
        .unwrap();
        let service = MemoryService::from_settings(settings);
        assert_eq!(
            service.packages("scl7-rh-python36-candidate").unwrap().len(),
            2
        );
    }
}
