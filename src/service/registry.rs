//! Registry of configured service instances.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::{Builder, Capability, Check, Repository, Service};

/// A handle to one capability of a registered service.
#[derive(Clone)]
pub enum CapabilityHandle {
    Repository(Arc<dyn Repository>),
    Builder(Arc<dyn Builder>),
    Check(Arc<dyn Check>),
}

impl CapabilityHandle {
    pub fn kind(&self) -> Capability {
        match self {
            CapabilityHandle::Repository(_) => Capability::Repository,
            CapabilityHandle::Builder(_) => Capability::Builder,
            CapabilityHandle::Check(_) => Capability::Check,
        }
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapabilityHandle").field(&self.kind()).finish()
    }
}

/// Services by unique name.
///
/// Populated once at configuration load, then shared read-only behind an
/// `Arc`; lookups need no locking.
#[derive(Debug, Default, Clone)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, failing on a name collision.
    pub fn register(&mut self, service: Service) -> Result<()> {
        if self.services.contains_key(service.name()) {
            return Err(Error::DuplicateService(service.name().to_string()));
        }
        tracing::debug!(
            service = %service.name(),
            capabilities = ?service.capabilities(),
            "registered service"
        );
        self.services.insert(service.name().to_string(), service);
        Ok(())
    }

    /// Looks up a service by name.
    pub fn get(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))
    }

    /// Looks up one capability of a service.
    pub fn capability(&self, name: &str, kind: Capability) -> Result<CapabilityHandle> {
        match kind {
            Capability::Repository => self.repository(name).map(CapabilityHandle::Repository),
            Capability::Builder => self.builder(name).map(CapabilityHandle::Builder),
            Capability::Check => self.check(name).map(CapabilityHandle::Check),
        }
    }

    /// The Repository capability of `name`.
    pub fn repository(&self, name: &str) -> Result<Arc<dyn Repository>> {
        let service = self.get(name)?;
        service
            .repository()
            .cloned()
            .ok_or_else(|| missing(name, Capability::Repository))
    }

    /// The Builder capability of `name`.
    pub fn builder(&self, name: &str) -> Result<Arc<dyn Builder>> {
        let service = self.get(name)?;
        service
            .builder()
            .cloned()
            .ok_or_else(|| missing(name, Capability::Builder))
    }

    /// The Check capability of `name`.
    pub fn check(&self, name: &str) -> Result<Arc<dyn Check>> {
        let service = self.get(name)?;
        service
            .check()
            .cloned()
            .ok_or_else(|| missing(name, Capability::Check))
    }

    /// Names of all registered services, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn missing(name: &str, kind: Capability) -> Error {
    Error::Capability {
        service: name.to_string(),
        capability: kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryService;

    fn registry() -> ServiceRegistry {
        let memory = Arc::new(MemoryService::default());
        let mut registry = ServiceRegistry::new();
        registry
            .register(Service::new("cbs").with_repository(memory.clone()).with_builder(memory.clone()))
            .unwrap();
        registry
            .register(Service::new("ci").with_check(memory))
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = registry();
        let err = registry.register(Service::new("cbs")).unwrap_err();
        assert!(matches!(err, Error::DuplicateService(name) if name == "cbs"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_service_fails_explicitly() {
        let err = registry().get("koji").unwrap_err();
        assert!(matches!(err, Error::UnknownService(name) if name == "koji"));
    }

    #[test]
    fn capability_lookup_checks_support() {
        let registry = registry();
        assert_eq!(
            registry.capability("cbs", Capability::Builder).unwrap().kind(),
            Capability::Builder
        );
        let err = registry.capability("ci", Capability::Builder).unwrap_err();
        assert!(matches!(err, Error::Capability { ref service, .. } if service == "ci"));
        assert!(registry.repository("ci").is_err());
        assert!(registry.check("ci").is_ok());
    }

    #[test]
    fn handles_debug_print_their_kind() {
        let handle = registry().capability("ci", Capability::Check).unwrap();
        assert_eq!(format!("{handle:?}"), format!("CapabilityHandle({:?})", Capability::Check));
    }

    #[test]
    fn names_are_sorted() {
        let names: Vec<_> = registry().names().map(str::to_string).collect();
        assert_eq!(names, vec!["cbs", "ci"]);
    }
}
