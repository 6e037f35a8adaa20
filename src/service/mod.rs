//! Remote services and the capabilities they expose.
//!
//! The core only talks to services through the [`Repository`], [`Builder`]
//! and [`Check`] traits. Adapters for concrete systems implement any subset
//! of them; [`MemoryService`] is the built-in static adapter.

mod memory;
mod registry;

pub use memory::{MemoryService, MemorySettings};
pub use registry::{CapabilityHandle, ServiceRegistry};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteResult;
use crate::package::Package;
use crate::template::GroupName;

/// The kinds of operation a service may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Lists package membership of groups.
    Repository,
    /// Tags packages into groups.
    Builder,
    /// Reports test results.
    Check,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Repository, Capability::Builder, Capability::Check];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Repository => "repository",
            Capability::Builder => "builder",
            Capability::Check => "check",
        };
        f.write_str(name)
    }
}

/// Outcome of a single test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Fail,
    /// The run exists but has no verdict yet.
    Unknown,
}

/// Test result of one package within one test group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub outcome: CheckOutcome,
    /// When the result was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn new(outcome: CheckOutcome, recorded_at: DateTime<Utc>) -> Self {
        Self {
            outcome,
            recorded_at,
        }
    }
}

/// Result of a successful tag operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagOutcome {
    /// The package was added to the group.
    Tagged,
    /// The package was already in the group; nothing changed.
    AlreadyTagged,
}

/// A service providing package group membership.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Lists all packages within the group.
    async fn list_packages(&self, group: &GroupName) -> RemoteResult<BTreeSet<Package>>;
}

/// A service able to tag packages into groups.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Tags `package` into `group`.
    ///
    /// Must be idempotent: tagging an already tagged package succeeds with
    /// [`TagOutcome::AlreadyTagged`].
    async fn tag(&self, package: &Package, group: &GroupName) -> RemoteResult<TagOutcome>;
}

/// A service reporting test results.
#[async_trait]
pub trait Check: Send + Sync {
    /// Latest result for `package` in the test `group`, or `None` if no run
    /// exists yet.
    async fn result(&self, group: &GroupName, package: &Package)
        -> RemoteResult<Option<CheckResult>>;
}

/// A named remote system with its capability handles.
#[derive(Clone)]
pub struct Service {
    name: String,
    repository: Option<Arc<dyn Repository>>,
    builder: Option<Arc<dyn Builder>>,
    check: Option<Arc<dyn Check>>,
}

impl Service {
    /// Creates a service without capabilities.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repository: None,
            builder: None,
            check: None,
        }
    }

    /// Attaches the Repository capability.
    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Attaches the Builder capability.
    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Attaches the Check capability.
    pub fn with_check(mut self, check: Arc<dyn Check>) -> Self {
        self.check = Some(check);
        self
    }

    /// Removes every capability not listed in `keep`.
    pub fn restricted_to(mut self, keep: &[Capability]) -> Self {
        if !keep.contains(&Capability::Repository) {
            self.repository = None;
        }
        if !keep.contains(&Capability::Builder) {
            self.builder = None;
        }
        if !keep.contains(&Capability::Check) {
            self.check = None;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the service provides `capability`.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Repository => self.repository.is_some(),
            Capability::Builder => self.builder.is_some(),
            Capability::Check => self.check.is_some(),
        }
    }

    /// The capabilities this service provides.
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.has(*c))
            .collect()
    }

    pub fn repository(&self) -> Option<&Arc<dyn Repository>> {
        self.repository.as_ref()
    }

    pub fn builder(&self) -> Option<&Arc<dyn Builder>> {
        self.builder.as_ref()
    }

    pub fn check(&self) -> Option<&Arc<dyn Check>> {
        self.check.as_ref()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
