//! modsys Library
//!
//! Installer module orchestration: discovers modules from their descriptors,
//! validates their dependencies, loads the configured instance sequence and
//! relays post-load requirements checks.

pub mod cli;
pub mod descriptor;
pub mod error;
pub mod instance_key;
pub mod logic;
pub mod manager;
pub mod module;
pub mod requirements;
pub mod runner;
pub mod settings;

// Re-export main types for convenience
pub use descriptor::{DescriptorError, DescriptorRegistry, DiscoveryReport, ModuleDescriptor};
pub use error::{ModsysError, Result};
pub use instance_key::InstanceKey;
pub use manager::{LoadFailure, LoadFailureKind, ManagerEvent, ManagerPhase, ModuleManager};
pub use module::{
    ConfigMap, GenericModule, Module, ModuleContext, ModuleError, ModuleFactory, ModuleInterface,
    ModuleType,
};
pub use requirements::{
    ModuleRequirementsChecker, RequirementEntry, RequirementsChecker, RequirementsCoordinator,
    RequirementsEvent,
};
pub use runner::Stage;
pub use settings::{InstanceDescription, PhaseAction, SequencePhase, Settings};

// Dependency validation
pub use logic::resolver::{check_dependencies, check_module_dependencies, prune_unsatisfiable};
