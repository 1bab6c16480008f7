//! Module instances and the module factory
//!
//! A module instance is built from its descriptor by a constructor selected
//! from the descriptor's `type` tag. The [`ModuleFactory`] is that
//! tag → constructor map, filled once at startup.
//!
//! # Built-in Types
//!
//! | Tag    | Constructor                    |
//! |--------|--------------------------------|
//! | `job`  | [`GenericModule::from_context`] |
//! | `view` | [`GenericModule::from_context`] |
//!
//! Additional types are added with [`ModuleFactory::register`].

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use tracing::debug;

use crate::descriptor::ModuleDescriptor;
use crate::instance_key::InstanceKey;
use crate::requirements::RequirementEntry;

/// Parsed module configuration (contents of the instance's config file).
pub type ConfigMap = Map<String, Value>;

/// Errors raised while constructing or loading a module instance
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// Descriptor carries no `type` tag
    #[error("Module '{module}' does not declare a type")]
    MissingType { module: String },

    /// No constructor registered for the tag
    #[error("Module '{module}' has unknown type '{module_type}'")]
    UnknownType { module: String, module_type: String },

    /// Interface tag missing or not recognised
    #[error("Module '{module}' has unknown interface '{interface}'")]
    UnknownInterface { module: String, interface: String },

    /// Config file exists but is not a JSON object
    #[error("Invalid configuration for '{key}' in {path}: {reason}")]
    InvalidConfig {
        key: String,
        path: String,
        reason: String,
    },

    /// The module rejected its own descriptor/configuration
    #[error("Module '{key}' failed to load: {reason}")]
    LoadFailed { key: String, reason: String },
}

/// Kind of module, from the descriptor's `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ModuleType {
    /// Runs work during the installation without its own page
    Job,
    /// Presents a page to the user and may contribute jobs
    View,
}

/// How a module's implementation is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ModuleInterface {
    /// External command run as a job
    Process,
    /// Script executed by an embedded interpreter
    Python,
    /// Native plugin library
    #[strum(serialize = "qtplugin")]
    QtPlugin,
}

/// A constructed module instance.
pub trait Module: fmt::Debug {
    fn instance_key(&self) -> &InstanceKey;

    /// Module name (the first half of the instance key)
    fn name(&self) -> &str {
        self.instance_key().module()
    }

    fn module_type(&self) -> ModuleType;

    fn interface(&self) -> ModuleInterface;

    /// Names of modules that must be loaded before this one
    fn required_modules(&self) -> &[String];

    fn configuration(&self) -> &ConfigMap;

    /// Emergency modules still run after an installation failure
    fn is_emergency(&self) -> bool {
        false
    }

    /// Finish loading after construction. Called once by the manager.
    fn load_self(&mut self) -> Result<(), ModuleError>;

    fn is_loaded(&self) -> bool;

    /// Readiness conditions this instance needs before installation starts
    fn check_requirements(&self) -> Vec<RequirementEntry> {
        Vec::new()
    }
}

/// Everything a constructor needs to build one instance.
#[derive(Debug, Clone)]
pub struct ModuleContext<'a> {
    pub key: InstanceKey,
    pub descriptor: &'a ModuleDescriptor,
    /// Directory the descriptor was discovered in
    pub directory: &'a Path,
    /// Config file name, relative to `directory`
    pub config_file: String,
}

/// Constructor signature stored in the factory.
pub type ModuleConstructor = fn(&ModuleContext<'_>) -> Result<Box<dyn Module>, ModuleError>;

/// Registry of module constructors keyed by type tag.
#[derive(Clone, Default)]
pub struct ModuleFactory {
    constructors: HashMap<String, ModuleConstructor>,
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("ModuleFactory").field("types", &tags).finish()
    }
}

impl ModuleFactory {
    /// Create a factory with no constructors
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with the built-in `job` and `view` constructors
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.register(ModuleType::Job.to_string(), GenericModule::from_context);
        factory.register(ModuleType::View.to_string(), GenericModule::from_context);
        factory
    }

    /// Register (or replace) the constructor for a type tag
    pub fn register(&mut self, type_tag: impl Into<String>, constructor: ModuleConstructor) {
        self.constructors.insert(type_tag.into(), constructor);
    }

    pub fn supports(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    /// Build an instance, dispatching on the descriptor's `type` tag.
    pub fn create(&self, ctx: &ModuleContext<'_>) -> Result<Box<dyn Module>, ModuleError> {
        let module = ctx.descriptor.name().to_string();
        let type_tag = ctx
            .descriptor
            .get_str("type")
            .ok_or_else(|| ModuleError::MissingType {
                module: module.clone(),
            })?;

        let constructor = self
            .constructors
            .get(type_tag)
            .ok_or_else(|| ModuleError::UnknownType {
                module,
                module_type: type_tag.to_string(),
            })?;

        debug!("Constructing {} as type '{}'", ctx.key, type_tag);
        constructor(ctx)
    }
}

/// Config key: binaries that must be found in `PATH`
pub const REQUIRED_BINARIES_KEY: &str = "required_binaries";
/// Config key: filesystem paths that must exist
pub const REQUIRED_PATHS_KEY: &str = "required_paths";
/// Config key: effective UID must be 0
pub const REQUIRE_ROOT_KEY: &str = "require_root";
/// Config key: requirement names that only warn when unsatisfied
pub const OPTIONAL_REQUIREMENTS_KEY: &str = "optional_requirements";

/// Descriptor-driven module used for the built-in `job` and `view` types.
#[derive(Debug, Clone)]
pub struct GenericModule {
    key: InstanceKey,
    module_type: ModuleType,
    interface: ModuleInterface,
    required_modules: Vec<String>,
    emergency: bool,
    directory: PathBuf,
    descriptor_fields: ConfigMap,
    configuration: ConfigMap,
    loaded: bool,
}

impl GenericModule {
    /// Constructor registered for `job` and `view`.
    pub fn from_context(ctx: &ModuleContext<'_>) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self::build(ctx)?))
    }

    /// Build the concrete module (without boxing).
    pub fn build(ctx: &ModuleContext<'_>) -> Result<Self, ModuleError> {
        let descriptor = ctx.descriptor;
        let name = descriptor.name().to_string();

        let type_tag = descriptor.get_str("type").unwrap_or_default();
        let module_type: ModuleType =
            type_tag.parse().map_err(|_| ModuleError::UnknownType {
                module: name.clone(),
                module_type: type_tag.to_string(),
            })?;

        let interface_tag = descriptor.get_str("interface").unwrap_or_default();
        let interface: ModuleInterface =
            interface_tag
                .parse()
                .map_err(|_| ModuleError::UnknownInterface {
                    module: name.clone(),
                    interface: interface_tag.to_string(),
                })?;

        let configuration = load_configuration(&ctx.key, &ctx.directory.join(&ctx.config_file))?;

        Ok(Self {
            key: ctx.key.clone(),
            module_type,
            interface,
            required_modules: descriptor.required_modules().to_vec(),
            emergency: descriptor
                .get("emergency")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            directory: ctx.directory.to_path_buf(),
            descriptor_fields: descriptor.fields().clone(),
            configuration,
            loaded: false,
        })
    }

    fn load_failed(&self, reason: impl Into<String>) -> ModuleError {
        ModuleError::LoadFailed {
            key: self.key.to_string(),
            reason: reason.into(),
        }
    }

    /// Names listed under `optional_requirements` in the configuration
    fn optional_names(&self) -> Vec<&str> {
        string_list(&self.configuration, OPTIONAL_REQUIREMENTS_KEY)
    }

    fn entry(&self, name: String, satisfied: bool, detail: String) -> RequirementEntry {
        let mandatory = !self.optional_names().contains(&name.as_str());
        RequirementEntry {
            name,
            satisfied,
            mandatory,
            detail,
        }
    }
}

impl Module for GenericModule {
    fn instance_key(&self) -> &InstanceKey {
        &self.key
    }

    fn module_type(&self) -> ModuleType {
        self.module_type
    }

    fn interface(&self) -> ModuleInterface {
        self.interface
    }

    fn required_modules(&self) -> &[String] {
        &self.required_modules
    }

    fn configuration(&self) -> &ConfigMap {
        &self.configuration
    }

    fn is_emergency(&self) -> bool {
        // Only jobs run in the emergency phase
        self.emergency && self.module_type == ModuleType::Job
    }

    fn load_self(&mut self) -> Result<(), ModuleError> {
        match self.interface {
            ModuleInterface::Process => {
                let has_command = self
                    .configuration
                    .get("command")
                    .or_else(|| self.descriptor_fields.get("command"))
                    .and_then(Value::as_str)
                    .is_some_and(|c| !c.trim().is_empty());
                if !has_command {
                    return Err(self.load_failed("process module has no command"));
                }
            }
            ModuleInterface::Python => {
                let script = self
                    .descriptor_fields
                    .get("script")
                    .and_then(Value::as_str)
                    .ok_or_else(|| self.load_failed("python module has no script"))?;
                let script_path = self.directory.join(script);
                if !script_path.is_file() {
                    return Err(self.load_failed(format!(
                        "script {} not found",
                        script_path.display()
                    )));
                }
            }
            ModuleInterface::QtPlugin => {}
        }

        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn check_requirements(&self) -> Vec<RequirementEntry> {
        let mut entries = Vec::new();

        for binary in string_list(&self.configuration, REQUIRED_BINARIES_KEY) {
            let found = binary_in_path(binary);
            let detail = if found {
                format!("{} is available", binary)
            } else {
                format!("{} was not found in PATH", binary)
            };
            entries.push(self.entry(binary.to_string(), found, detail));
        }

        for path in string_list(&self.configuration, REQUIRED_PATHS_KEY) {
            let exists = Path::new(path).exists();
            let detail = if exists {
                format!("{} exists", path)
            } else {
                format!("{} does not exist", path)
            };
            entries.push(self.entry(path.to_string(), exists, detail));
        }

        let require_root = self
            .configuration
            .get(REQUIRE_ROOT_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if require_root {
            let is_root = nix::unistd::geteuid().is_root();
            let detail = if is_root {
                "running with root privileges".to_string()
            } else {
                "root privileges are required".to_string()
            };
            entries.push(self.entry("root".to_string(), is_root, detail));
        }

        entries
    }
}

/// Load the instance configuration. A missing file is an empty configuration.
fn load_configuration(key: &InstanceKey, path: &Path) -> Result<ConfigMap, ModuleError> {
    if !path.is_file() {
        debug!("No configuration file for {} at {:?}", key, path);
        return Ok(ConfigMap::new());
    }

    let invalid = |reason: String| ModuleError::InvalidConfig {
        key: key.to_string(),
        path: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    match serde_json::from_str::<Value>(&content).map_err(|e| invalid(e.to_string()))? {
        Value::Object(map) => Ok(map),
        _ => Err(invalid("expected a JSON object".to_string())),
    }
}

fn string_list<'a>(map: &'a ConfigMap, key: &str) -> Vec<&'a str> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Look a binary up in `PATH` without spawning anything.
fn binary_in_path(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(name).is_file())
}
