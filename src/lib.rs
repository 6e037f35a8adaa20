//! rpmrh - cross-repository package promotion engine
//!
//! Binds named pipeline phases (candidate, testing, release, ...) to the
//! remote services that hold their packages, computes which packages one
//! phase is missing compared to another, and tags those that passed their
//! health checks and soaked long enough into the next phase.

pub mod backoff;
pub mod collection;
pub mod config;
pub mod diff;
pub mod error;
pub mod evaluator;
pub mod package;
pub mod phase;
pub mod pipeline;
pub mod remote;
pub mod report;
pub mod service;
pub mod template;
pub mod validate;

pub use backoff::RetryPolicy;
pub use collection::Collection;
pub use config::{Config, ConfigFile, PhaseConfig, ServiceConfig, ServiceFactory, MEMORY_SERVICE};
pub use diff::{DiffEngine, DiffOptions};
pub use error::{Error, RemoteError, RemoteResult, Result};
pub use evaluator::{DecisionReason, PromotionDecision, PromotionEvaluator, Verdict};
pub use package::{compare_versions, Package};
pub use phase::{Binding, BindingKind, Phase, PhaseRegistry};
pub use pipeline::{Action, PipelineDriver, PipelineSettings};
pub use remote::{CancelToken, RemoteCaller};
pub use report::{
    CollectionReport, CollectionStatus, Counts, PackageOutcome, PackageReport, RunReport,
    EXIT_CANCELLED, EXIT_CONFIG, EXIT_ERRORS, EXIT_OK,
};
pub use service::{
    Builder, Capability, CapabilityHandle, Check, CheckOutcome, CheckResult, MemoryService,
    MemorySettings, Repository, Service, ServiceRegistry, TagOutcome,
};
pub use template::{dedup_groups, resolve, resolve_all, GroupName, GroupTemplate, Variable};
pub use validate::{validate_config, Validate, ValidationResult};
