//! Pipeline phases and their service bindings.
//!
//! A [`Phase`] binds up to three capabilities to concrete services through
//! templated group names. Bindings are checked against the
//! [`ServiceRegistry`] when the phase is registered, so a misconfigured
//! pipeline fails at load time rather than halfway through a run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::service::{Capability, ServiceRegistry};
use crate::template::{dedup_groups, resolve_all, GroupName, GroupTemplate};

/// Which binding of a phase is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Repo,
    Builder,
    Check,
}

impl BindingKind {
    /// The service capability this binding requires.
    pub fn capability(self) -> Capability {
        match self {
            BindingKind::Repo => Capability::Repository,
            BindingKind::Builder => Capability::Builder,
            BindingKind::Check => Capability::Check,
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingKind::Repo => "repo",
            BindingKind::Builder => "builder",
            BindingKind::Check => "check",
        };
        f.write_str(name)
    }
}

/// A service reference plus the ordered group templates used with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub service: String,
    pub templates: Vec<GroupTemplate>,
}

impl Binding {
    pub fn new(service: impl Into<String>, templates: Vec<GroupTemplate>) -> Self {
        Self {
            service: service.into(),
            templates,
        }
    }

    /// Resolves the templates for `collection`, dropping duplicates.
    pub fn groups(&self, collection: &Collection) -> Result<Vec<GroupName>> {
        resolve_all(&self.templates, collection).map(dedup_groups)
    }
}

/// A named pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    /// Where the phase's packages are listed.
    pub repo: Option<Binding>,
    /// Where packages are tagged when promoted into the phase.
    pub builder: Option<Binding>,
    /// Where the phase's test results live.
    pub check: Option<Binding>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo: None,
            builder: None,
            check: None,
        }
    }

    pub fn with_repo(mut self, binding: Binding) -> Self {
        self.repo = Some(binding);
        self
    }

    pub fn with_builder(mut self, binding: Binding) -> Self {
        self.builder = Some(binding);
        self
    }

    pub fn with_check(mut self, binding: Binding) -> Self {
        self.check = Some(binding);
        self
    }

    /// The binding of the given kind, if declared.
    pub fn binding(&self, kind: BindingKind) -> Option<&Binding> {
        match kind {
            BindingKind::Repo => self.repo.as_ref(),
            BindingKind::Builder => self.builder.as_ref(),
            BindingKind::Check => self.check.as_ref(),
        }
    }

    /// The binding of the given kind, or a [`Error::MissingBinding`].
    pub fn require(&self, kind: BindingKind) -> Result<&Binding> {
        self.binding(kind).ok_or_else(|| Error::MissingBinding {
            phase: self.name.clone(),
            binding: kind.to_string(),
        })
    }

    /// Declared bindings with their kinds.
    pub fn bindings(&self) -> impl Iterator<Item = (BindingKind, &Binding)> {
        [BindingKind::Repo, BindingKind::Builder, BindingKind::Check]
            .into_iter()
            .filter_map(move |kind| self.binding(kind).map(|b| (kind, b)))
    }
}

/// Phases by unique name, validated against a service registry.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    services: Arc<ServiceRegistry>,
    phases: BTreeMap<String, Phase>,
}

impl PhaseRegistry {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self {
            services,
            phases: BTreeMap::new(),
        }
    }

    /// Registers a phase after validating every declared binding.
    pub fn register(&mut self, phase: Phase) -> Result<()> {
        if self.phases.contains_key(&phase.name) {
            return Err(Error::DuplicatePhase(phase.name));
        }

        for (kind, binding) in phase.bindings() {
            self.validate_binding(&phase.name, kind, binding)?;
        }

        tracing::debug!(
            phase = %phase.name,
            repo = phase.repo.is_some(),
            builder = phase.builder.is_some(),
            check = phase.check.is_some(),
            "registered phase"
        );
        self.phases.insert(phase.name.clone(), phase);
        Ok(())
    }

    fn validate_binding(&self, phase: &str, kind: BindingKind, binding: &Binding) -> Result<()> {
        let fail = |reason: String| Error::PhaseBinding {
            phase: phase.to_string(),
            binding: kind.to_string(),
            reason,
        };

        if binding.templates.is_empty() {
            return Err(fail("no group templates declared".to_string()));
        }

        let service = self
            .services
            .get(&binding.service)
            .map_err(|_| fail(format!("unknown service '{}'", binding.service)))?;

        if !service.has(kind.capability()) {
            return Err(fail(format!(
                "service '{}' does not provide the {} capability",
                binding.service,
                kind.capability()
            )));
        }

        Ok(())
    }

    /// Looks up a phase by name.
    pub fn get(&self, name: &str) -> Result<&Phase> {
        self.phases
            .get(name)
            .ok_or_else(|| Error::UnknownPhase(name.to_string()))
    }

    /// The service registry the phases are bound against.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Names of all registered phases, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{MemoryService, Service};

    fn templates(items: &[&str]) -> Vec<GroupTemplate> {
        items.iter().map(|t| GroupTemplate::parse(t).unwrap()).collect()
    }

    fn services() -> Arc<ServiceRegistry> {
        let memory = Arc::new(MemoryService::default());
        let mut registry = ServiceRegistry::new();
        registry
            .register(Service::new("cbs").with_repository(memory.clone()))
            .unwrap();
        registry
            .register(Service::new("koji").with_repository(memory.clone()).with_builder(memory))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn builder_binding_requires_builder_capability() {
        let mut registry = PhaseRegistry::new(services());
        let phase = Phase::new("release")
            .with_repo(Binding::new("cbs", templates(&["scl{el}-release"])))
            .with_builder(Binding::new("cbs", templates(&["scl{el}-release"])));

        let err = registry.register(phase).unwrap_err();
        match err {
            Error::PhaseBinding { phase, binding, .. } => {
                assert_eq!(phase, "release");
                assert_eq!(binding, "builder");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.get("release").is_err());
    }

    #[test]
    fn binding_to_unknown_service_fails() {
        let mut registry = PhaseRegistry::new(services());
        let phase =
            Phase::new("candidate").with_repo(Binding::new("jenkins", templates(&["x{el}"])));
        assert!(matches!(
            registry.register(phase),
            Err(Error::PhaseBinding { .. })
        ));
    }

    #[test]
    fn empty_template_list_fails() {
        let mut registry = PhaseRegistry::new(services());
        let phase = Phase::new("candidate").with_repo(Binding::new("cbs", vec![]));
        assert!(registry.register(phase).is_err());
    }

    #[test]
    fn valid_phase_registers_and_resolves() {
        let mut registry = PhaseRegistry::new(services());
        registry
            .register(
                Phase::new("release")
                    .with_repo(Binding::new("koji", templates(&["scl{el}-{collection}-release"])))
                    .with_builder(Binding::new("koji", templates(&["scl{el}-{collection}-release"]))),
            )
            .unwrap();

        let phase = registry.get("release").unwrap();
        let groups = phase
            .require(BindingKind::Builder)
            .unwrap()
            .groups(&Collection::new(7, "rh-python36"))
            .unwrap();
        assert_eq!(groups, vec![GroupName::new("scl7-rh-python36-release")]);
        assert!(phase.require(BindingKind::Check).is_err());
    }

    #[test]
    fn duplicate_and_unknown_phases_fail() {
        let mut registry = PhaseRegistry::new(services());
        let phase = Phase::new("testing").with_repo(Binding::new("cbs", templates(&["t{el}"])));
        registry.register(phase.clone()).unwrap();
        assert!(matches!(
            registry.register(phase),
            Err(Error::DuplicatePhase(_))
        ));
        assert!(matches!(registry.get("qa"), Err(Error::UnknownPhase(_))));
    }

    #[test]
    fn duplicate_groups_are_resolved_once() {
        let binding = Binding::new("cbs", templates(&["scl{el}-tests", "scl{el}-tests"]));
        let groups = binding.groups(&Collection::distribution(7)).unwrap();
        assert_eq!(groups.len(), 1);
    }
}
