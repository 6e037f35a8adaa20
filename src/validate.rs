//! Configuration validation.
//!
//! Runs before any registry is built so that every problem in the merged
//! configuration is reported at once, instead of one error per attempt.

use crate::config::{Config, ServiceFactory};
use crate::error::{Error, Result};
use crate::pipeline::PipelineSettings;

/// Retries above this are almost certainly a typo.
const MAX_SENSIBLE_RETRIES: u32 = 10;

/// Problems found in a configuration. Errors abort the run; warnings are
/// only logged.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Hands back the warnings, or a single [`Error::Config`] listing every
    /// error found.
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.errors.as_slice() {
            [] => Ok(self.warnings),
            [only] => Err(Error::Config(only.clone())),
            many => Err(Error::Config(format!(
                "{} problems: {}",
                many.len(),
                many.join("; ")
            ))),
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

impl Validate for PipelineSettings {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.concurrency == 0 {
            result.add_error("pipeline.concurrency must be at least 1");
        }
        if self.timeout_secs == 0 {
            result.add_error("pipeline.timeout_secs must be at least 1");
        }
        if self.retries > MAX_SENSIBLE_RETRIES {
            result.add_warning(format!(
                "pipeline.retries = {} may hold a failing run for a long time",
                self.retries
            ));
        }

        result
    }
}

impl Validate for Config {
    /// Checks everything that does not depend on the available adapters.
    fn validate(&self) -> ValidationResult {
        let mut result = self.pipeline.validate();

        if self.collections.is_empty() {
            result.add_warning("no [[collection]] declared; runs need --el/--collection");
        }

        for (name, service) in &self.services {
            if matches!(&service.capabilities, Some(c) if c.is_empty()) {
                result.add_warning(format!("service '{name}' exposes no capabilities"));
            }
        }

        for (name, phase) in &self.phases {
            if phase.is_empty() {
                result.add_warning(format!("phase '{name}' declares no bindings"));
            }
            for (binding, service, templates) in phase.bindings() {
                if !self.services.contains_key(service) {
                    result.add_error(format!(
                        "phase '{name}' {binding} binding names undeclared service '{service}'"
                    ));
                }
                if templates.is_empty() {
                    result.add_error(format!(
                        "phase '{name}' {binding} binding has no group templates"
                    ));
                }
            }
        }

        result
    }
}

/// Validates a merged configuration against the adapters `factory` knows.
pub fn validate_config(config: &Config, factory: &ServiceFactory) -> ValidationResult {
    let mut result = config.validate();
    for (name, service) in &config.services {
        if !factory.knows(&service.kind) {
            let known: Vec<_> = factory.kinds().collect();
            result.add_error(format!(
                "service '{}' has unknown type '{}' (known: {})",
                name,
                service.kind,
                known.join(", ")
            ));
        }
    }
    result
}
