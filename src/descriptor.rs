//! Module descriptors and discovery
//!
//! Every module lives in its own directory under one of the search paths and
//! describes itself with a `module.json` descriptor:
//!
//! ```json
//! {
//!   "name": "users",
//!   "type": "view",
//!   "interface": "qtplugin",
//!   "requiredModules": ["locale"]
//! }
//! ```
//!
//! Only `name` and `requiredModules` are interpreted here. The remaining keys
//! are carried through untouched for the module constructors.
//!
//! [`DescriptorRegistry::scan`] is the discovery pass. A bad descriptor is
//! logged and skipped; it never aborts discovery of the other modules.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::instance_key::KEY_SEPARATOR;

/// File name of the descriptor inside each module directory.
pub const DESCRIPTOR_FILE: &str = "module.json";

/// Descriptor key holding the module name.
pub const NAME_KEY: &str = "name";

/// Descriptor key holding the names of modules this one depends on.
pub const REQUIRED_MODULES_KEY: &str = "requiredModules";

/// Errors that can occur while reading a descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Module directory has no descriptor file
    #[error("Descriptor file is missing: {path}")]
    Missing { path: String },

    /// Descriptor exists but could not be read
    #[error("Failed to read descriptor {path}: {reason}")]
    Unreadable { path: String, reason: String },

    /// Descriptor is not a JSON object
    #[error("Invalid descriptor format in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    /// Descriptor has no usable `name`
    #[error("Descriptor {path} does not declare a module name")]
    MissingName { path: String },

    /// Name cannot be addressed by an instance key
    #[error("Module name '{name}' in {path} contains the instance key separator '{separator}'")]
    InvalidName {
        name: String,
        path: String,
        separator: char,
    },

    /// `requiredModules` is not a list of strings
    #[error("Descriptor for '{module}' has an invalid requiredModules entry: {reason}")]
    InvalidRequirements { module: String, reason: String },

    /// Declared name does not match the module directory
    #[error("Descriptor name '{declared}' does not match directory '{directory}'")]
    NameMismatch { declared: String, directory: String },
}

/// Parsed metadata for one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescriptor {
    name: String,
    required_modules: Vec<String>,
    fields: Map<String, Value>,
}

impl ModuleDescriptor {
    /// Create a descriptor with just a name and its requirements.
    pub fn new<I, S>(name: impl Into<String>, required_modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let required_modules: Vec<String> =
            required_modules.into_iter().map(Into::into).collect();

        let mut fields = Map::new();
        fields.insert(NAME_KEY.to_string(), Value::String(name.clone()));
        fields.insert(
            REQUIRED_MODULES_KEY.to_string(),
            Value::Array(required_modules.iter().cloned().map(Value::String).collect()),
        );

        Self {
            name,
            required_modules,
            fields,
        }
    }

    /// Add a pass-through field. `name` and `requiredModules` cannot be
    /// overridden this way.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != NAME_KEY && key != REQUIRED_MODULES_KEY {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Build a descriptor from an already-parsed mapping.
    pub fn from_map(fields: Map<String, Value>, origin: &str) -> Result<Self, DescriptorError> {
        let name = match fields.get(NAME_KEY) {
            Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
            _ => {
                return Err(DescriptorError::MissingName {
                    path: origin.to_string(),
                })
            }
        };

        if name.contains(KEY_SEPARATOR) {
            return Err(DescriptorError::InvalidName {
                name,
                path: origin.to_string(),
                separator: KEY_SEPARATOR,
            });
        }

        let required_modules = match fields.get(REQUIRED_MODULES_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) if !s.is_empty() => Ok(s.clone()),
                    other => Err(DescriptorError::InvalidRequirements {
                        module: name.clone(),
                        reason: format!("expected a module name, found {}", other),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(DescriptorError::InvalidRequirements {
                    module: name,
                    reason: format!("expected a list, found {}", other),
                })
            }
        };

        Ok(Self {
            name,
            required_modules,
            fields,
        })
    }

    /// Parse a descriptor from a JSON string.
    pub fn from_json(json: &str, origin: &str) -> Result<Self, DescriptorError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| DescriptorError::InvalidFormat {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        match value {
            Value::Object(fields) => Self::from_map(fields, origin),
            other => Err(DescriptorError::InvalidFormat {
                path: origin.to_string(),
                reason: format!("expected an object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Read and parse the descriptor file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let origin = path.display().to_string();
        if !path.is_file() {
            return Err(DescriptorError::Missing { path: origin });
        }
        let content = std::fs::read_to_string(path).map_err(|e| DescriptorError::Unreadable {
            path: origin.clone(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content, &origin)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_modules(&self) -> &[String] {
        &self.required_modules
    }

    /// Raw value of any descriptor key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String value of a descriptor key, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The full mapping, including `name` and `requiredModules`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Outcome of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Names registered by this pass, in discovery order
    pub registered: Vec<String>,

    /// Module directories that were skipped, with the reason
    pub skipped: Vec<(PathBuf, DescriptorError)>,
}

/// Available module descriptors, keyed by module name.
///
/// Filled by exactly one [`scan`](Self::scan). Afterwards entries are only
/// ever removed (by the global dependency filter).
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    descriptors: BTreeMap<String, ModuleDescriptor>,
    locations: BTreeMap<String, PathBuf>,
}

impl DescriptorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor found in `location`. Returns false (and keeps
    /// the existing entry) when the name is already registered.
    pub fn register(&mut self, descriptor: ModuleDescriptor, location: impl Into<PathBuf>) -> bool {
        let name = descriptor.name().to_string();
        if self.descriptors.contains_key(&name) {
            return false;
        }
        self.locations.insert(name.clone(), location.into());
        self.descriptors.insert(name, descriptor);
        true
    }

    /// Discovery pass over the ordered search paths.
    ///
    /// Must be called once per registry; a second call is not guarded and
    /// merges into the existing entries.
    pub fn scan<P: AsRef<Path>>(&mut self, search_paths: &[P]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for search_path in search_paths {
            let search_path = search_path.as_ref();
            let entries = match std::fs::read_dir(search_path) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Skipping module search path {:?}: {}", search_path, e);
                    continue;
                }
            };

            let mut module_dirs: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            // read_dir order is unspecified
            module_dirs.sort();

            for module_dir in module_dirs {
                match self.scan_module_dir(&module_dir) {
                    Ok(Some(name)) => report.registered.push(name),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Skipping module directory {:?}: {}", module_dir, e);
                        report.skipped.push((module_dir, e));
                    }
                }
            }
        }

        info!(
            "Module discovery found {} module(s), skipped {} director(y/ies)",
            report.registered.len(),
            report.skipped.len()
        );
        report
    }

    fn scan_module_dir(&mut self, module_dir: &Path) -> Result<Option<String>, DescriptorError> {
        let descriptor = ModuleDescriptor::from_file(&module_dir.join(DESCRIPTOR_FILE))?;

        let directory = module_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if descriptor.name() != directory {
            return Err(DescriptorError::NameMismatch {
                declared: descriptor.name().to_string(),
                directory,
            });
        }

        let name = descriptor.name().to_string();
        if self.register(descriptor, module_dir) {
            debug!("Registered module '{}' from {:?}", name, module_dir);
            Ok(Some(name))
        } else {
            warn!(
                "Module '{}' in {:?} ignored, already found in {:?}",
                name,
                module_dir,
                self.locations.get(&name)
            );
            Ok(None)
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.descriptors.get(name)
    }

    /// Directory the module was discovered in. Kept even after the module
    /// is pruned by the dependency filter.
    pub fn location(&self, name: &str) -> Option<&Path> {
        self.locations.get(name).map(PathBuf::as_path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Drop a descriptor from the available set.
    pub fn remove(&mut self, name: &str) -> Option<ModuleDescriptor> {
        self.descriptors.remove(name)
    }

    /// Available module names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModuleDescriptor)> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_module(root: &Path, dir: &str, json: &str) {
        let module_dir = root.join(dir);
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join(DESCRIPTOR_FILE), json).unwrap();
    }

    // =========================================================================
    // ModuleDescriptor Tests
    // =========================================================================

    #[test]
    fn test_descriptor_from_json() {
        let json = r#"{
            "name": "users",
            "type": "view",
            "interface": "qtplugin",
            "requiredModules": ["locale", "keyboard"]
        }"#;

        let descriptor = ModuleDescriptor::from_json(json, "test").unwrap();
        assert_eq!(descriptor.name(), "users");
        assert_eq!(descriptor.required_modules(), ["locale", "keyboard"]);
        assert_eq!(descriptor.get_str("type"), Some("view"));
        assert_eq!(descriptor.get_str("interface"), Some("qtplugin"));
    }

    #[test]
    fn test_descriptor_without_requirements() {
        let descriptor = ModuleDescriptor::from_json(r#"{"name": "welcome"}"#, "test").unwrap();
        assert!(descriptor.required_modules().is_empty());
    }

    #[test]
    fn test_descriptor_missing_name_rejected() {
        let result = ModuleDescriptor::from_json(r#"{"type": "job"}"#, "test");
        assert!(matches!(result, Err(DescriptorError::MissingName { .. })));

        let result = ModuleDescriptor::from_json(r#"{"name": "  "}"#, "test");
        assert!(matches!(result, Err(DescriptorError::MissingName { .. })));
    }

    #[test]
    fn test_descriptor_name_with_separator_rejected() {
        let result = ModuleDescriptor::from_json(r#"{"name": "a@b"}"#, "test");
        assert!(matches!(
            result,
            Err(DescriptorError::InvalidName { ref name, .. }) if name == "a@b"
        ));
    }

    #[test]
    fn test_descriptor_bad_requirements_rejected() {
        let result = ModuleDescriptor::from_json(r#"{"name": "a", "requiredModules": "b"}"#, "t");
        assert!(matches!(
            result,
            Err(DescriptorError::InvalidRequirements { .. })
        ));

        let result = ModuleDescriptor::from_json(r#"{"name": "a", "requiredModules": [1]}"#, "t");
        assert!(matches!(
            result,
            Err(DescriptorError::InvalidRequirements { .. })
        ));
    }

    #[test]
    fn test_descriptor_not_an_object() {
        let result = ModuleDescriptor::from_json("[1, 2]", "t");
        assert!(matches!(result, Err(DescriptorError::InvalidFormat { .. })));

        let result = ModuleDescriptor::from_json("{ not json", "t");
        assert!(matches!(result, Err(DescriptorError::InvalidFormat { .. })));
    }

    #[test]
    fn test_with_field_cannot_override_identity() {
        let descriptor = ModuleDescriptor::new("a", ["b"])
            .with_field("name", "other")
            .with_field("type", "job");
        assert_eq!(descriptor.name(), "a");
        assert_eq!(descriptor.get_str("name"), Some("a"));
        assert_eq!(descriptor.get_str("type"), Some("job"));
    }

    // =========================================================================
    // Discovery Tests
    // =========================================================================

    #[test]
    fn test_scan_registers_valid_modules() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "welcome", r#"{"name": "welcome"}"#);
        write_module(
            root.path(),
            "users",
            r#"{"name": "users", "requiredModules": ["welcome"]}"#,
        );

        let mut registry = DescriptorRegistry::new();
        let report = registry.scan(&[root.path()]);

        assert_eq!(report.registered, vec!["users", "welcome"]);
        assert!(report.skipped.is_empty());
        assert!(registry.contains("users"));
        assert_eq!(registry.location("users"), Some(root.path().join("users").as_path()));
    }

    #[test]
    fn test_scan_skips_bad_modules_and_continues() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "broken", "{ nope");
        write_module(root.path(), "renamed", r#"{"name": "something-else"}"#);
        std::fs::create_dir_all(root.path().join("empty")).unwrap();
        write_module(root.path(), "good", r#"{"name": "good"}"#);

        let mut registry = DescriptorRegistry::new();
        let report = registry.scan(&[root.path()]);

        assert_eq!(report.registered, vec!["good"]);
        assert_eq!(report.skipped.len(), 3);
        assert!(report
            .skipped
            .iter()
            .any(|(_, e)| matches!(e, DescriptorError::NameMismatch { .. })));
        assert!(report
            .skipped
            .iter()
            .any(|(_, e)| matches!(e, DescriptorError::Missing { .. })));
    }

    #[test]
    fn test_scan_first_search_path_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_module(first.path(), "users", r#"{"name": "users", "type": "view"}"#);
        write_module(second.path(), "users", r#"{"name": "users", "type": "job"}"#);

        let mut registry = DescriptorRegistry::new();
        registry.scan(&[first.path(), second.path()]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("users").unwrap().get_str("type"), Some("view"));
        assert_eq!(registry.location("users"), Some(first.path().join("users").as_path()));
    }

    #[test]
    fn test_scan_ignores_missing_search_path() {
        let mut registry = DescriptorRegistry::new();
        let report = registry.scan(&[Path::new("/nonexistent/modsys/modules")]);
        assert!(report.registered.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_keeps_location() {
        let mut registry = DescriptorRegistry::new();
        registry.register(ModuleDescriptor::new("a", Vec::<String>::new()), "/m/a");
        assert!(registry.remove("a").is_some());
        assert!(!registry.contains("a"));
        assert_eq!(registry.location("a"), Some(Path::new("/m/a")));
    }
}
