//! TOML configuration files.
//!
//! A configuration declares services (`[service.NAME]`), phases
//! (`[phase.NAME]`), the default collections (`[[collection]]`) and run
//! tunables (`[pipeline]`). Several files may be layered: later files
//! override services and phases of the same name, add collections, and
//! replace the `[pipeline]` table.
//!
//! ```toml
//! [service.cbs]
//! type = "memory"
//!
//! [phase.candidate]
//! repo = { service = "cbs", tags = ["scl{el}-{collection}-candidate"] }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::phase::{Binding, Phase, PhaseRegistry};
use crate::pipeline::PipelineSettings;
use crate::service::{Capability, MemoryService, MemorySettings, Service, ServiceRegistry};
use crate::template::GroupTemplate;

/// Service type of the built-in in-memory adapter.
pub const MEMORY_SERVICE: &str = "memory";

/// One configuration file as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineSettings>,
    #[serde(default, rename = "collection")]
    pub collections: Vec<Collection>,
    #[serde(default, rename = "service")]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default, rename = "phase")]
    pub phases: BTreeMap<String, PhaseConfig>,
}

impl ConfigFile {
    /// Reads and parses one file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source, path)
    }

    /// Parses TOML text; `path` only labels errors.
    pub fn parse(source: &str, path: impl Into<PathBuf>) -> Result<Self> {
        toml::from_str(source).map_err(|source| Error::Toml {
            path: path.into(),
            source,
        })
    }
}

/// A `[service.NAME]` table.
///
/// Keys other than `type` and `capabilities` are adapter settings and are
/// handed to the adapter constructor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Adapter type, looked up in the [`ServiceFactory`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Capabilities to expose; defaults to all the adapter offers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(flatten)]
    pub settings: toml::Table,
}

/// `repo = { service, tags }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    pub service: String,
    pub tags: Vec<GroupTemplate>,
}

/// `build = { service, targets }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub service: String,
    pub targets: Vec<GroupTemplate>,
}

/// `check = { service, tests }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    pub service: String,
    pub tests: Vec<GroupTemplate>,
}

/// A `[phase.NAME]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckConfig>,
}

impl PhaseConfig {
    /// Whether no binding is declared at all.
    pub fn is_empty(&self) -> bool {
        self.repo.is_none() && self.build.is_none() && self.check.is_none()
    }

    /// Bindings as `(kind, service, templates)`.
    pub fn bindings(&self) -> Vec<(&'static str, &str, &[GroupTemplate])> {
        let mut bindings = Vec::new();
        if let Some(repo) = &self.repo {
            bindings.push(("repo", repo.service.as_str(), repo.tags.as_slice()));
        }
        if let Some(build) = &self.build {
            bindings.push(("build", build.service.as_str(), build.targets.as_slice()));
        }
        if let Some(check) = &self.check {
            bindings.push(("check", check.service.as_str(), check.tests.as_slice()));
        }
        bindings
    }

    pub fn to_phase(&self, name: &str) -> Phase {
        let mut phase = Phase::new(name);
        if let Some(repo) = &self.repo {
            phase = phase.with_repo(Binding::new(&repo.service, repo.tags.clone()));
        }
        if let Some(build) = &self.build {
            phase = phase.with_builder(Binding::new(&build.service, build.targets.clone()));
        }
        if let Some(check) = &self.check {
            phase = phase.with_check(Binding::new(&check.service, check.tests.clone()));
        }
        phase
    }
}

/// Configuration merged from one or more files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub pipeline: PipelineSettings,
    pub collections: Vec<Collection>,
    pub services: BTreeMap<String, ServiceConfig>,
    pub phases: BTreeMap<String, PhaseConfig>,
}

impl Config {
    /// Loads a single file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_all([path])
    }

    /// Loads and merges files in order.
    pub fn load_all<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut config = Self::default();
        for path in paths {
            let path = path.as_ref();
            tracing::debug!(path = %path.display(), "loading configuration");
            config.merge(ConfigFile::load(path)?);
        }
        Ok(config)
    }

    /// Parses a single in-memory document.
    pub fn from_toml(source: &str) -> Result<Self> {
        let mut config = Self::default();
        config.merge(ConfigFile::parse(source, "<inline>")?);
        Ok(config)
    }

    /// Layers `file` over the current configuration.
    pub fn merge(&mut self, file: ConfigFile) {
        if let Some(pipeline) = file.pipeline {
            self.pipeline = pipeline;
        }
        for collection in file.collections {
            if !self.collections.contains(&collection) {
                self.collections.push(collection);
            }
        }
        self.services.extend(file.services);
        self.phases.extend(file.phases);
    }

    /// Instantiates every service and registers every phase.
    pub fn build(&self, factory: &ServiceFactory) -> Result<Arc<PhaseRegistry>> {
        let mut services = ServiceRegistry::new();
        for (name, config) in &self.services {
            services.register(factory.create(name, config)?)?;
        }

        let mut phases = PhaseRegistry::new(Arc::new(services));
        for (name, config) in &self.phases {
            phases.register(config.to_phase(name))?;
        }

        tracing::info!(
            services = self.services.len(),
            phases = self.phases.len(),
            "configuration loaded"
        );
        Ok(Arc::new(phases))
    }
}

/// Builds a service named by its first argument from its adapter settings.
pub type ServiceConstructor = Box<dyn Fn(&str, &toml::Table) -> Result<Service> + Send + Sync>;

/// Maps service `type` keys to adapter constructors.
pub struct ServiceFactory {
    constructors: BTreeMap<String, ServiceConstructor>,
}

impl ServiceFactory {
    /// A factory knowing only the built-in adapters.
    pub fn new() -> Self {
        Self::empty().with_constructor(MEMORY_SERVICE, memory_service)
    }

    /// A factory knowing no adapter at all.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the constructor for `kind`.
    pub fn with_constructor<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&str, &toml::Table) -> Result<Service> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(constructor));
        self
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Known service types, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Instantiates the service `name` and narrows it to the declared
    /// capabilities.
    pub fn create(&self, name: &str, config: &ServiceConfig) -> Result<Service> {
        let constructor = self.constructors.get(&config.kind).ok_or_else(|| {
            Error::Config(format!(
                "service '{}' has unknown type '{}'",
                name, config.kind
            ))
        })?;
        let service = constructor(name, &config.settings)?;

        let Some(declared) = &config.capabilities else {
            return Ok(service);
        };
        if let Some(missing) = declared.iter().find(|c| !service.has(**c)) {
            return Err(Error::Capability {
                service: name.to_string(),
                capability: missing.to_string(),
            });
        }
        Ok(service.restricted_to(declared))
    }
}

impl Default for ServiceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn memory_service(name: &str, settings: &toml::Table) -> Result<Service> {
    let settings: MemorySettings = toml::Value::Table(settings.clone())
        .try_into()
        .map_err(|e| Error::Config(format!("service '{name}': {e}")))?;
    let memory = Arc::new(MemoryService::from_settings(settings));
    Ok(Service::new(name)
        .with_repository(memory.clone())
        .with_builder(memory.clone())
        .with_check(memory))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [pipeline]
        concurrency = 8

        [[collection]]
        el = 7
        name = "rh-python36"

        [service.cbs]
        type = "memory"
        capabilities = ["repository", "builder"]

        [service.cbs.groups]
        "scl7-rh-python36-candidate" = ["pkgA-1.0-1.x86_64"]

        [phase.candidate]
        repo = { service = "cbs", tags = ["scl{el}-{collection}-candidate"] }

        [phase.release]
        repo = { service = "cbs", tags = ["scl{el}-{collection}-release"] }
        build = { service = "cbs", targets = ["scl{el}-{collection}-release"] }
    "#;

    #[test]
    fn parses_all_sections() {
        let config = Config::from_toml(BASE).unwrap();
        assert_eq!(config.pipeline.concurrency, 8);
        assert_eq!(config.pipeline.timeout_secs, 60);
        assert_eq!(config.collections, vec![Collection::new(7, "rh-python36")]);
        assert_eq!(config.services["cbs"].kind, "memory");
        assert!(config.services["cbs"].settings.contains_key("groups"));
        assert!(config.phases["release"].build.is_some());
        assert!(config.phases["candidate"].check.is_none());
    }

    #[test]
    fn unknown_placeholder_is_a_parse_error() {
        let err = Config::from_toml(
            r#"
            [phase.candidate]
            repo = { service = "cbs", tags = ["scl{el}-{arch}-candidate"] }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Toml { .. }));
    }

    #[test]
    fn unknown_phase_keys_are_rejected() {
        let result = Config::from_toml(
            r#"
            [phase.candidate]
            repository = { service = "cbs", tags = ["x"] }
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn later_files_override_and_append() {
        let mut config = Config::from_toml(BASE).unwrap();
        let overlay = ConfigFile::parse(
            r#"
            [pipeline]
            timeout_secs = 5

            [[collection]]
            el = 7
            name = "rh-python36"

            [[collection]]
            el = 8
            name = "rh-ruby25"

            [phase.candidate]
            repo = { service = "cbs", tags = ["scl{el}-{collection}-testing"] }
            "#,
            "overlay.toml",
        )
        .unwrap();
        config.merge(overlay);

        // The pipeline table is replaced as a whole.
        assert_eq!(config.pipeline.timeout_secs, 5);
        assert_eq!(config.pipeline.concurrency, 4);
        assert_eq!(config.collections.len(), 2);
        assert_eq!(
            config.phases["candidate"].repo.as_ref().unwrap().tags[0].as_str(),
            "scl{el}-{collection}-testing"
        );
        assert!(config.phases.contains_key("release"));
    }

    #[test]
    fn build_registers_services_and_phases() {
        let registry = Config::from_toml(BASE)
            .unwrap()
            .build(&ServiceFactory::new())
            .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["candidate", "release"]);
        let cbs = registry.services().get("cbs").unwrap();
        assert_eq!(
            cbs.capabilities(),
            vec![Capability::Repository, Capability::Builder]
        );
    }

    #[test]
    fn unknown_service_type_fails_to_build() {
        let config = Config::from_toml(
            r#"
            [service.koji]
            type = "koji"
            "#,
        )
        .unwrap();
        let err = config.build(&ServiceFactory::new()).unwrap_err();
        assert!(err.to_string().contains("unknown type 'koji'"));
    }

    #[test]
    fn custom_constructors_are_used() {
        let factory = ServiceFactory::empty().with_constructor("static", |name, _settings| {
            Ok(Service::new(name).with_repository(Arc::new(MemoryService::new())))
        });
        let config = ServiceConfig {
            kind: "static".to_string(),
            capabilities: Some(vec![Capability::Builder]),
            settings: toml::Table::new(),
        };
        let err = factory.create("jenkins", &config).unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
        assert!(!factory.knows(MEMORY_SERVICE));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load("/nonexistent/rpmrh.toml").unwrap_err();
        assert!(matches!(err, Error::Io { ref path, .. } if path.ends_with("rpmrh.toml")));
    }
}
