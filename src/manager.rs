//! Module Manager
//!
//! Owns every module registry of an installation session and drives the
//! pipeline:
//!
//! ```text
//! new(paths)             construct, nothing scanned yet
//!     ↓
//! init()                 discovery + dependency filter   → InitDone
//!     ↓
//! load_modules(seq)      sequential load pass            → ModulesLoaded | ModulesFailed
//!     ↓
//! check_requirements()   requirements relay              → RequirementsProgress*,
//!                                                          RequirementsResult,
//!                                                          RequirementsComplete
//! ```
//!
//! # Design Principles
//!
//! - **No Global State**: the manager is an explicit context object owned by
//!   the composition root and lent out by reference
//! - **Deferred, Not Parallel**: each pass runs to completion synchronously
//!   and reports through a channel the owner drains on its next loop turn
//! - **Aggregate, Don't Throw**: per-module failures are collected and
//!   reported once per pass
//!
//! `init()` and `load_modules()` are single-call operations. Calling them
//! again is not supported; it is logged, not prevented.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use strum::Display;
use tracing::{debug, error, info, warn};

use crate::descriptor::{DescriptorRegistry, DiscoveryReport, ModuleDescriptor};
use crate::instance_key::InstanceKey;
use crate::logic::resolver;
use crate::module::{Module, ModuleContext, ModuleFactory};
use crate::requirements::{
    ModuleRequirementsChecker, RequirementEntry, RequirementsChecker, RequirementsCoordinator,
    RequirementsEvent,
};
use crate::settings::{self, InstanceDescription, Settings};

/// Outward completion protocol of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Discovery finished; carries every module pruned by the dependency filter
    InitDone { failed: Vec<String> },
    /// Every configured instance loaded
    ModulesLoaded,
    /// At least one instance failed; entries in sequence order
    ModulesFailed(Vec<String>),
    RequirementsProgress(String),
    RequirementsResult(Vec<RequirementEntry>),
    RequirementsComplete(bool),
}

impl From<RequirementsEvent> for ManagerEvent {
    fn from(event: RequirementsEvent) -> Self {
        match event {
            RequirementsEvent::Progress(message) => Self::RequirementsProgress(message),
            RequirementsEvent::Result(entries) => Self::RequirementsResult(entries),
            RequirementsEvent::Complete(ok) => Self::RequirementsComplete(ok),
        }
    }
}

/// Where the manager is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ManagerPhase {
    #[strum(serialize = "constructed")]
    Constructed,
    #[strum(serialize = "initialized")]
    Initialized,
    #[strum(serialize = "loaded")]
    Loaded,
    #[strum(serialize = "requirements checked")]
    Checked,
}

/// Why a configured instance did not load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailureKind {
    /// Entry is not `module` or `module@id`
    MalformedKey,
    /// No available descriptor for the module
    UnknownModule,
    /// Factory or the module itself refused
    ConstructionFailure(String),
    /// Required modules were not loaded earlier in the sequence
    MissingDependency(Vec<String>),
}

impl fmt::Display for LoadFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedKey => write!(f, "malformed instance key"),
            Self::UnknownModule => write!(f, "module not found in search paths"),
            Self::ConstructionFailure(reason) => write!(f, "construction failed: {}", reason),
            Self::MissingDependency(missing) => {
                write!(f, "required modules not loaded before it: {}", missing.join(", "))
            }
        }
    }
}

/// One failed entry of a load pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// As provided for malformed/unknown entries, canonical `module@id` otherwise
    pub entry: String,
    pub kind: LoadFailureKind,
}

/// Session-scoped owner of descriptors and loaded module instances.
pub struct ModuleManager {
    search_paths: Vec<PathBuf>,
    registry: DescriptorRegistry,
    factory: ModuleFactory,
    instances: Vec<InstanceDescription>,
    loaded: HashMap<InstanceKey, Box<dyn Module>>,
    /// Keys of `loaded` in first-insertion order
    load_order: Vec<InstanceKey>,
    load_failures: Vec<LoadFailure>,
    phase: ManagerPhase,
    events: Sender<ManagerEvent>,
}

impl fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleManager")
            .field("search_paths", &self.search_paths)
            .field("available", &self.registry.len())
            .field("loaded", &self.load_order)
            .field("phase", &self.phase)
            .finish()
    }
}

impl ModuleManager {
    /// Create a manager over `search_paths`. Nothing is scanned until
    /// [`init`](Self::init). Events arrive on the returned receiver.
    pub fn new(
        search_paths: Vec<PathBuf>,
        factory: ModuleFactory,
    ) -> (Self, Receiver<ManagerEvent>) {
        let (events, rx) = mpsc::channel();
        let manager = Self {
            search_paths,
            registry: DescriptorRegistry::new(),
            factory,
            instances: Vec::new(),
            loaded: HashMap::new(),
            load_order: Vec::new(),
            load_failures: Vec::new(),
            phase: ManagerPhase::Constructed,
            events,
        };
        (manager, rx)
    }

    /// Create a manager from settings (search paths and custom instances).
    pub fn from_settings(
        settings: &Settings,
        factory: ModuleFactory,
    ) -> (Self, Receiver<ManagerEvent>) {
        let (manager, rx) = Self::new(settings.modules_search.clone(), factory);
        (manager.with_instances(settings.instances.clone()), rx)
    }

    /// Custom instance declarations used to pick config files.
    pub fn with_instances(mut self, instances: Vec<InstanceDescription>) -> Self {
        self.instances = instances;
        self
    }

    pub fn phase(&self) -> ManagerPhase {
        self.phase
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn emit(&self, event: ManagerEvent) {
        if self.events.send(event).is_err() {
            debug!("Manager event dropped: receiver is gone");
        }
    }

    fn expect_phase(&self, expected: ManagerPhase, operation: &str) {
        if self.phase != expected {
            warn!(
                "{} called while manager is {} (expected {})",
                operation, self.phase, expected
            );
        }
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Discover modules in the search paths, then drop every module whose
    /// requirements can never be met. Emits [`ManagerEvent::InitDone`].
    pub fn init(&mut self) -> DiscoveryReport {
        self.expect_phase(ManagerPhase::Constructed, "init()");

        let report = self.registry.scan(&self.search_paths);
        let failed = resolver::prune_unsatisfiable(&mut self.registry);
        if !failed.is_empty() {
            warn!("Modules removed for unmet requirements: {:?}", failed);
        }

        self.phase = ManagerPhase::Initialized;
        self.emit(ManagerEvent::InitDone { failed });
        report
    }

    /// Single pass of the global dependency filter; see
    /// [`resolver::check_dependencies`].
    pub fn check_dependencies(&mut self) -> Vec<String> {
        resolver::check_dependencies(&mut self.registry)
    }

    /// Whether every module `module` requires is already loaded.
    pub fn check_module_dependencies(&self, module: &dyn Module) -> bool {
        self.unloaded_dependencies(module).is_empty()
    }

    fn unloaded_dependencies(&self, module: &dyn Module) -> Vec<String> {
        resolver::check_module_dependencies(module, &self.load_order)
    }

    /// Register a descriptor without scanning, for composition roots that
    /// build descriptors themselves.
    pub fn register_descriptor(
        &mut self,
        descriptor: ModuleDescriptor,
        location: impl Into<PathBuf>,
    ) -> bool {
        self.registry.register(descriptor, location)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load the configured instance sequence, strictly in order.
    ///
    /// Each entry is checked, constructed, dependency-checked against the
    /// entries loaded before it and then stored. Failures do not stop the
    /// pass. Emits exactly one [`ManagerEvent::ModulesLoaded`] or
    /// [`ManagerEvent::ModulesFailed`] at the end and returns whether every
    /// entry loaded.
    ///
    /// A key that appears twice replaces the earlier instance.
    pub fn load_modules<I, S>(&mut self, sequence: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.expect_phase(ManagerPhase::Initialized, "load_modules()");

        let mut failures = Vec::new();
        for entry in sequence {
            if let Err(failure) = self.load_one(entry.as_ref()) {
                error!("Module {} failed to load: {}", failure.entry, failure.kind);
                failures.push(failure);
            }
        }

        self.phase = ManagerPhase::Loaded;
        let failed: Vec<String> = failures.iter().map(|f| f.entry.clone()).collect();
        self.load_failures = failures;

        if failed.is_empty() {
            info!("All {} module instance(s) loaded", self.load_order.len());
            self.emit(ManagerEvent::ModulesLoaded);
            true
        } else {
            warn!(
                "{} module instance(s) loaded, {} failed: {:?}",
                self.load_order.len(),
                failed.len(),
                failed
            );
            self.emit(ManagerEvent::ModulesFailed(failed));
            false
        }
    }

    fn load_one(&mut self, entry: &str) -> Result<(), LoadFailure> {
        let key = InstanceKey::from_string(entry);
        if !key.is_valid() {
            return Err(LoadFailure {
                entry: entry.to_string(),
                kind: LoadFailureKind::MalformedKey,
            });
        }

        let (Some(descriptor), Some(directory)) = (
            self.registry.get(key.module()),
            self.registry.location(key.module()),
        ) else {
            return Err(LoadFailure {
                entry: entry.to_string(),
                kind: LoadFailureKind::UnknownModule,
            });
        };

        let ctx = ModuleContext {
            config_file: self.config_file_for(&key),
            key: key.clone(),
            descriptor,
            directory,
        };

        let construction_failed = |reason: String| LoadFailure {
            entry: key.to_string(),
            kind: LoadFailureKind::ConstructionFailure(reason),
        };

        let mut module = self
            .factory
            .create(&ctx)
            .map_err(|e| construction_failed(e.to_string()))?;

        let missing = self.unloaded_dependencies(module.as_ref());
        if !missing.is_empty() {
            return Err(LoadFailure {
                entry: key.to_string(),
                kind: LoadFailureKind::MissingDependency(missing),
            });
        }

        module
            .load_self()
            .map_err(|e| construction_failed(e.to_string()))?;

        self.insert_loaded(key, module);
        Ok(())
    }

    /// Default instances use `<module>.conf`; custom instances use their
    /// declared config, falling back to `<id>.conf`.
    fn config_file_for(&self, key: &InstanceKey) -> String {
        if !key.is_custom() {
            return format!("{}.conf", key.module());
        }
        match settings::find_instance(&self.instances, key) {
            Some(instance) => instance.config.clone(),
            None => {
                debug!("Custom instance {} is not declared, using {}.conf", key, key.id());
                format!("{}.conf", key.id())
            }
        }
    }

    fn insert_loaded(&mut self, key: InstanceKey, module: Box<dyn Module>) {
        if self.loaded.insert(key.clone(), module).is_some() {
            // TODO: decide whether a repeated key in the sequence should be a load failure
            warn!("Module {} was already loaded, replacing it", key);
        } else {
            debug!("Module {} loaded", key);
            self.load_order.push(key);
        }
    }

    // ========================================================================
    // Requirements
    // ========================================================================

    /// Check requirements of every loaded module with the built-in checker.
    pub fn check_requirements(&mut self) -> bool {
        self.check_requirements_with(ModuleRequirementsChecker)
    }

    /// Run `checker` over the loaded modules (in load order) and relay its
    /// events. Returns the completion verdict.
    pub fn check_requirements_with<C: RequirementsChecker>(&mut self, checker: C) -> bool {
        self.expect_phase(ManagerPhase::Loaded, "check_requirements()");

        let events = self.events.clone();
        let modules: Vec<&dyn Module> = self
            .load_order
            .iter()
            .filter_map(|key| self.loaded.get(key))
            .map(|module| module.as_ref())
            .collect();

        let mut coordinator = RequirementsCoordinator::new(checker);
        let ok = coordinator.check(&modules, |event| {
            if events.send(ManagerEvent::from(event)).is_err() {
                debug!("Requirements event dropped: receiver is gone");
            }
        });

        self.phase = ManagerPhase::Checked;
        ok
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Canonical keys of loaded instances, in first-load order.
    pub fn loaded_instance_keys(&self) -> Vec<String> {
        self.load_order.iter().map(InstanceKey::to_string).collect()
    }

    /// Descriptor of an available module.
    pub fn module_descriptor(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.registry.get(name)
    }

    /// Directory a module was discovered in.
    pub fn module_location(&self, name: &str) -> Option<&Path> {
        self.registry.location(name)
    }

    /// Loaded instance by key string (`module` or `module@id`).
    pub fn module_instance(&self, instance_key: &str) -> Option<&dyn Module> {
        let key = InstanceKey::from_string(instance_key);
        if !key.is_valid() {
            return None;
        }
        self.loaded.get(&key).map(|module| module.as_ref())
    }

    /// Names of available (discovered and not pruned) modules, sorted.
    pub fn available_modules(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Failures of the last load pass, in sequence order.
    pub fn load_failures(&self) -> &[LoadFailure] {
        &self.load_failures
    }
}
