//! Package set differences between phases.
//!
//! A phase's package set for one collection is the union of every group its
//! `repo` binding resolves to. The diff is computed by package identity, so
//! two services listing the same NVRA agree regardless of listing order or
//! epoch metadata.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::collection::Collection;
use crate::error::{Error, RemoteError, Result};
use crate::package::Package;
use crate::phase::{BindingKind, PhaseRegistry};
use crate::remote::RemoteCaller;
use crate::template::GroupName;

/// Optional narrowing of a diff result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Keep only packages whose name starts with the collection name.
    pub restrict_to_collection: bool,
    /// Drop packages the destination already carries at an equal or newer
    /// EVR.
    pub skip_obsolete: bool,
}

/// Computes which packages of one phase are missing from another.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    phases: Arc<PhaseRegistry>,
    remote: RemoteCaller,
    options: DiffOptions,
}

impl DiffEngine {
    pub fn new(phases: Arc<PhaseRegistry>, remote: RemoteCaller) -> Self {
        Self {
            phases,
            remote,
            options: DiffOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> DiffOptions {
        self.options
    }

    /// Packages present in `source` but absent from `destination` for one
    /// collection.
    ///
    /// Any failed group query fails the whole diff; a failure is never read
    /// as an empty group.
    pub async fn missing(
        &self,
        source: &str,
        destination: &str,
        collection: &Collection,
    ) -> Result<BTreeSet<Package>> {
        let (source_set, destination_set) = tokio::try_join!(
            self.packages(source, collection),
            self.packages(destination, collection)
        )?;

        let mut missing: BTreeSet<Package> =
            source_set.difference(&destination_set).cloned().collect();

        if self.options.restrict_to_collection {
            if let Some(name) = collection.name() {
                missing.retain(|package| package.name.starts_with(name));
            }
        }

        if self.options.skip_obsolete {
            missing.retain(|package| {
                !destination_set
                    .iter()
                    .any(|present| package.is_superseded_by(present))
            });
        }

        tracing::debug!(
            source = %source,
            destination = %destination,
            collection = %collection,
            missing = missing.len(),
            "computed package diff"
        );
        Ok(missing)
    }

    /// The union of every `repo` group of `phase` for `collection`.
    pub async fn packages(&self, phase: &str, collection: &Collection) -> Result<BTreeSet<Package>> {
        let phase = self.phases.get(phase)?;
        let binding = phase.require(BindingKind::Repo)?;
        let groups = binding.groups(collection)?;
        let repository = self.phases.services().repository(&binding.service)?;

        let mut tasks = JoinSet::new();
        for (idx, group) in groups.iter().cloned().enumerate() {
            let repository = Arc::clone(&repository);
            let remote = self.remote.clone();
            tasks.spawn(async move {
                let label = format!("list {group}");
                let result = remote.call(&label, || repository.list_packages(&group)).await;
                (idx, result)
            });
        }

        let mut listings: Vec<Option<_>> = vec![None; groups.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => listings[idx] = Some(result),
                Err(err) => {
                    tracing::warn!(service = %binding.service, error = %err, "listing task failed");
                }
            }
        }

        // Report the first failing group in template order.
        let mut union = BTreeSet::new();
        for (group, listing) in groups.iter().zip(listings) {
            let listing = listing
                .unwrap_or_else(|| Err(RemoteError::Other("listing task aborted".to_string())));
            match listing {
                Ok(packages) => {
                    tracing::debug!(
                        service = %binding.service,
                        group = %group,
                        packages = packages.len(),
                        "listed group"
                    );
                    union.extend(packages);
                }
                Err(source) => return Err(query_error(&binding.service, group, source)),
            }
        }
        Ok(union)
    }
}

fn query_error(service: &str, group: &GroupName, source: RemoteError) -> Error {
    Error::ServiceQuery {
        service: service.to_string(),
        group: group.to_string(),
        source,
    }
}
