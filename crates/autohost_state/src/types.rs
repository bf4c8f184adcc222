//! Type registry for setting values.
//!
//! A parameter declaration lists type names; a raw value is accepted when it
//! satisfies any of them. A type is either a regular expression that must
//! match the whole value, or a predicate that also receives whether the
//! value is the first of several pipe-separated alternatives.

use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::error;

/// Predicate validator: `(value, is_first_of_several) -> valid`.
pub type Predicate = fn(&str, bool) -> bool;

/// A single named validator.
#[derive(Debug, Clone)]
pub enum TypeTag {
    Pattern(Regex),
    Predicate(Predicate),
}

impl TypeTag {
    pub fn accepts(&self, value: &str, is_first: bool) -> bool {
        match self {
            TypeTag::Pattern(regex) => regex.is_match(value),
            TypeTag::Predicate(check) => check(value, is_first),
        }
    }
}

/// Map from type name to validator.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    tags: HashMap<String, TypeTag>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let patterns: &[(&str, &str)] = &[
            ("null", r""),
            ("notNull", r".+"),
            ("integer", r"\d+"),
            ("nonNullInteger", r"[1-9]\d*"),
            ("float", r"\d+(?:\.\d+)?"),
            ("bool", r"[01]"),
            ("bool2", r"[012]"),
            ("logLevel", r"[0-5]"),
            ("login", r"[\w\[\]]{2,20}"),
            ("password", r"\S+"),
            ("character", r"."),
            ("hour", r"(?:[01]\d|2[0-3]):[0-5]\d"),
            ("voteMode", r"normal|away"),
            ("spoofProtection", r"on|off|warn"),
            ("rankMode", r"account|ip|manual|[0-7]"),
            ("skillMode", r"rank|TrueSkill"),
            ("preferencesBackend", r"table|sqlite"),
            ("dataRetention", r"(?:-1|\d+);(?:-1|\d+);(?:-1|\d+)"),
        ];
        for (name, pattern) in patterns {
            // built-in patterns are constant and known to compile
            if let Err(e) = registry.register_pattern(name, pattern) {
                error!(type_name = %name, error = %e, "Invalid built-in type pattern");
            }
        }
        registry.register_predicate("integerRange", is_integer_range);
        registry.register_predicate("nonNullIntegerRange", is_non_null_integer_range);
        registry.register_predicate("ipAddr", is_ip_addr);
        registry.register_predicate("port", is_port);
        registry.register_predicate("readableDir", is_readable_dir);
        registry.register_predicate("writableDir", is_writable_dir);
        registry.register_predicate("datasetList", is_dataset_list);
        registry
    }

    /// Registers a pattern type. The pattern is anchored on both ends.
    pub fn register_pattern(&mut self, name: &str, pattern: &str) -> Result<(), regex::Error> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        self.tags.insert(name.to_string(), TypeTag::Pattern(regex));
        Ok(())
    }

    pub fn register_predicate(&mut self, name: &str, predicate: Predicate) {
        self.tags.insert(name.to_string(), TypeTag::Predicate(predicate));
    }

    pub fn get(&self, name: &str) -> Option<&TypeTag> {
        self.tags.get(name)
    }

    /// Checks a value against a list of type names (logical OR).
    ///
    /// An empty list accepts any value. Unknown type names never match and
    /// are reported at error level since they point at a broken declaration.
    pub fn check_value<S: AsRef<str>>(&self, value: &str, types: &[S], is_first: bool) -> bool {
        if types.is_empty() {
            return true;
        }
        types.iter().any(|type_name| {
            let type_name = type_name.as_ref();
            match self.tags.get(type_name) {
                Some(tag) => tag.accepts(value, is_first),
                None => {
                    error!(type_name = %type_name, "Unknown parameter type");
                    false
                }
            }
        })
    }
}

/// Parses an inclusive `lo-hi` integer range.
pub fn parse_integer_range(value: &str) -> Option<(u64, u64)> {
    let (lo, hi) = value.split_once('-')?;
    if lo.is_empty() || hi.is_empty() || !lo.bytes().all(|b| b.is_ascii_digit()) || !hi.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let lo: u64 = lo.parse().ok()?;
    let hi: u64 = hi.parse().ok()?;
    (lo <= hi).then_some((lo, hi))
}

fn is_integer_range(value: &str, is_first: bool) -> bool {
    !is_first && parse_integer_range(value).is_some()
}

fn is_non_null_integer_range(value: &str, is_first: bool) -> bool {
    !is_first && matches!(parse_integer_range(value), Some((lo, _)) if lo > 0)
}

fn is_ip_addr(value: &str, _is_first: bool) -> bool {
    value.parse::<Ipv4Addr>().is_ok()
}

fn is_port(value: &str, _is_first: bool) -> bool {
    value.bytes().all(|b| b.is_ascii_digit()) && matches!(value.parse::<u32>(), Ok(1..=65535))
}

fn is_readable_dir(value: &str, _is_first: bool) -> bool {
    let path = Path::new(value);
    path.is_dir() && std::fs::read_dir(path).is_ok()
}

fn is_writable_dir(value: &str, _is_first: bool) -> bool {
    let path = Path::new(value);
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
        Err(_) => false,
    }
}

fn is_dataset_list(value: &str, _is_first: bool) -> bool {
    value.is_empty()
        || value
            .split(';')
            .all(|name| crate::constants::SHAREABLE_DATASETS.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_types_are_anchored() {
        let registry = TypeRegistry::with_defaults();
        assert!(registry.check_value("42", &["integer"], false));
        assert!(!registry.check_value("42a", &["integer"], false));
        assert!(!registry.check_value("a42", &["integer"], false));
        assert!(!registry.check_value("0", &["nonNullInteger"], false));
    }

    #[test]
    fn test_any_tag_matches() {
        let registry = TypeRegistry::with_defaults();
        let types = ["integer", "integerRange"];
        assert!(registry.check_value("4", &types, false));
        assert!(registry.check_value("2-8", &types, false));
        assert!(!registry.check_value("8-2", &types, false));
        assert!(!registry.check_value("x", &types, false));
    }

    #[test]
    fn test_ranges_skipped_for_first_value() {
        let registry = TypeRegistry::with_defaults();
        let types = ["integer", "integerRange"];
        assert!(!registry.check_value("2-8", &types, true));
        assert!(registry.check_value("2", &types, true));
        assert!(!registry.check_value("0-8", &["nonNullIntegerRange"], false));
        assert!(registry.check_value("1-8", &["nonNullIntegerRange"], false));
    }

    #[test]
    fn test_empty_type_list_accepts_anything() {
        let registry = TypeRegistry::with_defaults();
        let none: [&str; 0] = [];
        assert!(registry.check_value("", &none, false));
        assert!(registry.check_value("anything at all", &none, true));
    }

    #[test]
    fn test_unknown_type_never_matches() {
        let registry = TypeRegistry::with_defaults();
        assert!(!registry.check_value("1", &["noSuchType"], false));
    }

    #[test]
    fn test_predicates() {
        let registry = TypeRegistry::with_defaults();
        assert!(registry.check_value("192.168.0.1", &["ipAddr"], false));
        assert!(!registry.check_value("192.168.0.300", &["ipAddr"], false));
        assert!(registry.check_value("8452", &["port"], false));
        assert!(!registry.check_value("70000", &["port"], false));
        assert!(!registry.check_value("0", &["port"], false));
        assert!(registry.check_value("bans;preferences", &["datasetList"], false));
        assert!(!registry.check_value("bans;nothing", &["datasetList"], false));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = TypeRegistry::new();
        registry.register_pattern("mapName", r"[\w ]+").unwrap();
        registry.register_predicate("even", |v, _| v.parse::<u32>().map(|n| n % 2 == 0).unwrap_or(false));
        assert!(registry.check_value("Comet Catcher", &["mapName"], false));
        assert!(registry.check_value("4", &["even"], false));
        assert!(!registry.check_value("5", &["even"], false));
        assert!(registry.register_pattern("broken", "(").is_err());
    }
}
