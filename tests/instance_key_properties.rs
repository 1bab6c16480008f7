//! Property-Based Tests for InstanceKey
//!
//! These tests verify:
//! - `module@id` string round-trips
//! - Default-instance canonicalization
//! - Malformed input always yields the invalid sentinel

use modsys::InstanceKey;
use proptest::prelude::*;

/// Non-empty key part without the separator
fn part_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

proptest! {
    /// from_string → to_string is identity for well-formed `m@i`
    #[test]
    fn key_string_roundtrip(module in part_strategy(), id in part_strategy()) {
        let s = format!("{}@{}", module, id);
        let key = InstanceKey::from_string(&s);
        prop_assert!(key.is_valid());
        prop_assert_eq!(key.to_string(), s);
    }

    /// A bare module name is the default instance
    #[test]
    fn bare_module_is_default_instance(module in part_strategy()) {
        let key = InstanceKey::from_string(&module);
        prop_assert_eq!(key.module(), module.as_str());
        prop_assert_eq!(key.id(), module.as_str());
        prop_assert!(!key.is_custom());
        prop_assert_eq!(key, InstanceKey::from_module(module.clone()));
    }

    /// Custom iff the id differs from the module
    #[test]
    fn custom_iff_id_differs(module in part_strategy(), id in part_strategy()) {
        let key = InstanceKey::new(module.clone(), id.clone());
        prop_assert_eq!(key.is_custom(), module != id);
    }

    /// Two or more separators never parse
    #[test]
    fn extra_separators_are_invalid(
        parts in prop::collection::vec("[a-z]{0,6}", 3..6)
    ) {
        let s = parts.join("@");
        prop_assert!(!InstanceKey::from_string(&s).is_valid());
    }

    /// Ordering agrees with (module, id) tuple ordering
    #[test]
    fn ordering_matches_parts(
        a in (part_strategy(), part_strategy()),
        b in (part_strategy(), part_strategy()),
    ) {
        let ka = InstanceKey::new(a.0.clone(), a.1.clone());
        let kb = InstanceKey::new(b.0.clone(), b.1.clone());
        prop_assert_eq!(ka.cmp(&kb), (a.0, a.1).cmp(&(b.0, b.1)));
    }
}

#[test]
fn documented_examples() {
    let key = InstanceKey::from_module("users");
    assert_eq!(key.id(), "users");
    assert_eq!(key.module(), "users");
    assert!(!key.is_custom());

    let key = InstanceKey::new("users", "one");
    assert_eq!(key.to_string(), "users@one");
    assert!(key.is_custom());

    assert!(!InstanceKey::from_string("a@b@c").is_valid());
}
