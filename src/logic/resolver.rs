//! Module dependency validation
//!
//! Validates the `requiredModules` relation at two granularities:
//!
//! - **Global filter** ([`check_dependencies`]): at discovery time, prune
//!   modules whose required modules have no descriptor at all. These can
//!   never be loaded.
//! - **Ordering check** ([`check_module_dependencies`]): at load time, a
//!   module may only be loaded once every module it requires has already
//!   been loaded earlier in the same pass.
//!
//! # What This Explicitly Refuses To Do
//!
//! - Compute a load order: the configured sequence *is* the order, it is
//!   enforced here, never topologically sorted
//! - Follow cascading removals inside one filter call: see [`prune_unsatisfiable`]

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::descriptor::DescriptorRegistry;
use crate::instance_key::InstanceKey;
use crate::module::Module;

// ============================================================================
// Global Filter
// ============================================================================

/// Single pass over the current registry snapshot.
///
/// Every module with at least one required module missing from the registry
/// is removed. Returns the removed names (sorted); an empty list means every
/// remaining descriptor had its requirements present *at the start* of the
/// call. Modules that depended on a module removed by this same call are
/// only caught by the next call.
pub fn check_dependencies(registry: &mut DescriptorRegistry) -> Vec<String> {
    let failed: Vec<String> = registry
        .iter()
        .filter_map(|(name, descriptor)| {
            let missing: Vec<&str> = descriptor
                .required_modules()
                .iter()
                .filter(|required| !registry.contains(required))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                None
            } else {
                warn!(
                    "Module '{}' requires {:?}, which are not available",
                    name, missing
                );
                Some(name.clone())
            }
        })
        .collect();

    for name in &failed {
        registry.remove(name);
    }

    failed
}

/// Repeat [`check_dependencies`] until it removes nothing.
///
/// Returns every removed name in removal order.
pub fn prune_unsatisfiable(registry: &mut DescriptorRegistry) -> Vec<String> {
    let mut removed = Vec::new();
    loop {
        let failed = check_dependencies(registry);
        if failed.is_empty() {
            break;
        }
        debug!("Dependency filter pass removed {:?}", failed);
        removed.extend(failed);
    }
    removed
}

// ============================================================================
// Ordering Check
// ============================================================================

/// Required module names that no already-loaded instance provides.
pub fn missing_dependencies<'a, 'k, I>(required: &'a [String], loaded: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'k InstanceKey>,
{
    let loaded_modules: BTreeSet<&str> = loaded.into_iter().map(InstanceKey::module).collect();
    required
        .iter()
        .map(String::as_str)
        .filter(|name| !loaded_modules.contains(name))
        .collect()
}

/// Ordering check for one module about to be loaded.
///
/// Returns the required module names that no instance in `loaded` provides;
/// an empty list means `module` may be loaded now. Any instance of the
/// required module counts, whatever its id.
pub fn check_module_dependencies<'k, I>(module: &dyn Module, loaded: I) -> Vec<String>
where
    I: IntoIterator<Item = &'k InstanceKey>,
{
    let missing: Vec<String> = missing_dependencies(module.required_modules(), loaded)
        .into_iter()
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        warn!(
            "Module {} requires {:?}, which are not loaded before it",
            module.instance_key(),
            missing
        );
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ModuleDescriptor;
    use crate::module::{ConfigMap, ModuleError, ModuleInterface, ModuleType};

    fn registry(modules: &[(&str, Vec<&str>)]) -> DescriptorRegistry {
        let mut registry = DescriptorRegistry::new();
        for (name, requires) in modules {
            let descriptor = ModuleDescriptor::new(*name, requires.iter().copied());
            registry.register(descriptor, format!("/modules/{}", name));
        }
        registry
    }

    #[derive(Debug)]
    struct Stub {
        key: InstanceKey,
        requires: Vec<String>,
        config: ConfigMap,
    }

    impl Stub {
        fn new(key: &str, requires: &[&str]) -> Self {
            Self {
                key: InstanceKey::from_string(key),
                requires: requires.iter().map(|s| s.to_string()).collect(),
                config: ConfigMap::new(),
            }
        }
    }

    impl Module for Stub {
        fn instance_key(&self) -> &InstanceKey {
            &self.key
        }
        fn module_type(&self) -> ModuleType {
            ModuleType::Job
        }
        fn interface(&self) -> ModuleInterface {
            ModuleInterface::QtPlugin
        }
        fn required_modules(&self) -> &[String] {
            &self.requires
        }
        fn configuration(&self) -> &ConfigMap {
            &self.config
        }
        fn load_self(&mut self) -> Result<(), ModuleError> {
            Ok(())
        }
        fn is_loaded(&self) -> bool {
            true
        }
    }

    // =========================================================================
    // Global Filter Tests
    // =========================================================================

    #[test]
    fn test_satisfied_registry_unchanged() {
        let mut reg = registry(&[("A", vec![]), ("B", vec!["A"])]);
        assert!(check_dependencies(&mut reg).is_empty());
        assert!(reg.contains("A"));
        assert!(reg.contains("B"));
    }

    #[test]
    fn test_missing_requirement_removed() {
        let mut reg = registry(&[("A", vec!["X"])]);
        assert_eq!(check_dependencies(&mut reg), vec!["A"]);
        assert!(!reg.contains("A"));
        // Location survives for diagnostics
        assert!(reg.location("A").is_some());
    }

    #[test]
    fn test_single_pass_does_not_cascade() {
        let mut reg = registry(&[("A", vec!["X"]), ("B", vec!["A"]), ("C", vec![])]);

        assert_eq!(check_dependencies(&mut reg), vec!["A"]);
        assert!(reg.contains("B"), "B is only caught by the next pass");

        assert_eq!(check_dependencies(&mut reg), vec!["B"]);
        assert!(check_dependencies(&mut reg).is_empty());
        assert_eq!(reg.names(), vec!["C"]);
    }

    #[test]
    fn test_prune_reaches_fixed_point() {
        let mut reg = registry(&[("A", vec!["X"]), ("B", vec!["A"]), ("C", vec!["B"]), ("D", vec![])]);
        assert_eq!(prune_unsatisfiable(&mut reg), vec!["A", "B", "C"]);
        assert_eq!(reg.names(), vec!["D"]);
    }

    #[test]
    fn test_mutual_requirements_are_kept() {
        // Both descriptors exist, so the global filter accepts them; the load
        // ordering check is what rejects them later.
        let mut reg = registry(&[("A", vec!["B"]), ("B", vec!["A"])]);
        assert!(prune_unsatisfiable(&mut reg).is_empty());
        assert_eq!(reg.len(), 2);
    }

    // =========================================================================
    // Ordering Check Tests
    // =========================================================================

    #[test]
    fn test_ordering_check_requires_loaded_module() {
        let b = Stub::new("B", &["A"]);
        let nothing: Vec<InstanceKey> = vec![];
        assert_eq!(check_module_dependencies(&b, &nothing), vec!["A"]);

        let loaded = vec![InstanceKey::from_module("A")];
        assert!(check_module_dependencies(&b, &loaded).is_empty());
    }

    #[test]
    fn test_ordering_check_any_instance_counts() {
        let b = Stub::new("B", &["A"]);
        let loaded = vec![InstanceKey::new("A", "custom")];
        assert!(check_module_dependencies(&b, &loaded).is_empty());
    }

    #[test]
    fn test_ordering_check_no_requirements() {
        let a = Stub::new("A", &[]);
        let nothing: Vec<InstanceKey> = vec![];
        assert!(check_module_dependencies(&a, &nothing).is_empty());
    }

    #[test]
    fn test_missing_dependencies_lists_all() {
        let required = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let loaded = vec![InstanceKey::from_module("B")];
        assert_eq!(missing_dependencies(&required, &loaded), vec!["A", "C"]);
    }
}
