//! Module instance keys (`module@id`)
//!
//! A module instance is identified by the module's name (e.g. `users`) and an
//! instance id. Usually the id equals the module name and the key is
//! `users@users`; when the same module is configured more than once the
//! instances are told apart by their id (e.g. `users@one`).
//!
//! Parsing never fails loudly: malformed input yields the invalid sentinel
//! and callers check [`InstanceKey::is_valid`] before use.

use std::fmt;

/// Separator between module name and instance id in the string form.
pub const KEY_SEPARATOR: char = '@';

/// Two-part identifier of a configured module instance.
///
/// Ordering is lexicographic on `(module, id)`, so keys can be used in
/// ordered maps as well as hashed ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey {
    module: String,
    id: String,
}

impl InstanceKey {
    /// Create a key from explicit module and id. An empty id means the
    /// default instance, so it is replaced by the module name.
    pub fn new(module: impl Into<String>, id: impl Into<String>) -> Self {
        let module = module.into();
        let mut id = id.into();
        if id.is_empty() {
            id = module.clone();
        }
        Self { module, id }
    }

    /// Create the default instance key `module@module`.
    pub fn from_module(module: impl Into<String>) -> Self {
        let module = module.into();
        Self {
            id: module.clone(),
            module,
        }
    }

    /// The invalid sentinel (empty module, empty id).
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Parse `module` or `module@id`. Any other shape gives [`InstanceKey::invalid`].
    pub fn from_string(s: &str) -> Self {
        let parts: Vec<&str> = s.split(KEY_SEPARATOR).collect();
        match parts.as_slice() {
            [module] => Self::new(*module, *module),
            [module, id] => Self::new(*module, *id),
            _ => Self::invalid(),
        }
    }

    /// Both module and id are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.module.is_empty() && !self.id.is_empty()
    }

    /// The id differs from the module name.
    pub fn is_custom(&self) -> bool {
        self.module != self.id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.module, KEY_SEPARATOR, self.id)
    }
}

impl From<&str> for InstanceKey {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_instance() {
        let key = InstanceKey::from_module("users");
        assert_eq!(key.module(), "users");
        assert_eq!(key.id(), "users");
        assert!(key.is_valid());
        assert!(!key.is_custom());
        assert_eq!(key.to_string(), "users@users");
    }

    #[test]
    fn test_empty_id_becomes_module() {
        let key = InstanceKey::new("users", "");
        assert_eq!(key.id(), "users");
        assert!(!key.is_custom());
    }

    #[test]
    fn test_custom_instance() {
        let key = InstanceKey::new("users", "one");
        assert_eq!(key.to_string(), "users@one");
        assert!(key.is_custom());
        assert!(key.is_valid());
    }

    #[test]
    fn test_parse_single_part() {
        let key = InstanceKey::from_string("welcome");
        assert_eq!(key, InstanceKey::from_module("welcome"));
    }

    #[test]
    fn test_parse_two_parts() {
        let key = InstanceKey::from_string("users@one");
        assert_eq!(key.module(), "users");
        assert_eq!(key.id(), "one");
    }

    #[test]
    fn test_parse_too_many_parts_is_invalid() {
        let key = InstanceKey::from_string("a@b@c");
        assert!(!key.is_valid());
        assert_eq!(key, InstanceKey::invalid());
    }

    #[test]
    fn test_parse_edge_cases() {
        assert!(!InstanceKey::from_string("").is_valid());
        assert!(!InstanceKey::from_string("@one").is_valid());
        // Trailing separator means "default id"
        assert_eq!(InstanceKey::from_string("users@").to_string(), "users@users");
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut keys = vec![
            InstanceKey::new("users", "two"),
            InstanceKey::new("locale", "locale"),
            InstanceKey::new("users", "one"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["locale@locale", "users@one", "users@two"]);
    }
}
