//! Filter matching over record tables.
//!
//! A subject (for instance a connecting user) is matched against the first
//! field map of each candidate record. In normal search every filter value
//! is a pattern; in strict search values must be equal and a field missing
//! from the filter disqualifies the record.

use lazy_static::lazy_static;
use regex::Regex;
use std::net::Ipv4Addr;
use tracing::warn;

use crate::table::{FieldMap, Record};

lazy_static! {
    static ref NUMERIC_RANGE: Regex =
        Regex::new(r"^(-?\d+(?:\.\d+)?)-(-?\d+(?:\.\d+)?)$").expect("valid range regex");
    static ref COMPARISON: Regex = Regex::new(r"^(<=|>=|<|>)\s*(-?\d+(?:\.\d+)?)$").expect("valid comparison regex");
    static ref IP_RANGE: Regex =
        Regex::new(r"^(\d{1,3}(?:\.\d{1,3}){3})\s*-\s*(\d{1,3}(?:\.\d{1,3}){3})$").expect("valid ip range regex");
}

/// Returns the candidates whose filter accepts `subject`, in source order.
///
/// Subject fields with an empty value are not checked. An empty filter
/// value accepts anything in normal search.
pub fn find_matching_data<'r>(subject: &FieldMap, candidates: &'r [Record], normal_search: bool) -> Vec<&'r Record> {
    candidates
        .iter()
        .filter(|record| {
            record
                .first()
                .is_some_and(|filter| filter_matches(subject, filter, normal_search))
        })
        .collect()
}

/// First candidate accepting `subject` in normal search.
pub fn first_match<'r>(subject: &FieldMap, candidates: &'r [Record]) -> Option<&'r Record> {
    candidates
        .iter()
        .find(|record| record.first().is_some_and(|filter| filter_matches(subject, filter, true)))
}

pub fn filter_matches(subject: &FieldMap, filter: &FieldMap, normal_search: bool) -> bool {
    subject.iter().all(|(field, value)| {
        if value.is_empty() {
            return true;
        }
        match filter.get(field).map(String::as_str) {
            None | Some("") => normal_search,
            Some(pattern) if normal_search => field_matches(field, value, pattern),
            Some(exact) => exact == value,
        }
    })
}

/// Checks one subject value against one filter value.
///
/// Interpretations are tried in order: equality, numeric range `lo-hi`,
/// numeric comparison, IPv4 range, `~regex`, then legacy aliases.
pub fn field_matches(field: &str, value: &str, pattern: &str) -> bool {
    if pattern == value {
        return true;
    }

    if let Some(caps) = NUMERIC_RANGE.captures(pattern) {
        return match (value.parse::<f64>(), caps[1].parse::<f64>(), caps[2].parse::<f64>()) {
            (Ok(v), Ok(lo), Ok(hi)) => lo <= v && v <= hi,
            _ => false,
        };
    }

    if let Some(caps) = COMPARISON.captures(pattern) {
        let (Ok(v), Ok(limit)) = (value.parse::<f64>(), caps[2].parse::<f64>()) else {
            return false;
        };
        return match &caps[1] {
            "<" => v < limit,
            "<=" => v <= limit,
            ">" => v > limit,
            _ => v >= limit,
        };
    }

    if let Some(caps) = IP_RANGE.captures(pattern) {
        return match (
            value.parse::<Ipv4Addr>(),
            caps[1].parse::<Ipv4Addr>(),
            caps[2].parse::<Ipv4Addr>(),
        ) {
            (Ok(ip), Ok(lo), Ok(hi)) => (u32::from(lo)..=u32::from(hi)).contains(&u32::from(ip)),
            _ => false,
        };
    }

    if let Some(expression) = pattern.strip_prefix('~') {
        return match Regex::new(&format!("^(?:{expression})$")) {
            Ok(regex) => regex.is_match(value),
            Err(e) => {
                warn!(field = %field, pattern = %pattern, error = %e, "Invalid regular expression in filter");
                false
            }
        };
    }

    matches!(
        (field, value, pattern),
        ("status", "playing", "player") | ("gameState", "voting", "stopped")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::field_map;

    fn rule(filter: &[(&str, &str)], level: &str) -> Record {
        vec![field_map(filter.iter().copied()), field_map([("level", level)])]
    }

    #[test]
    fn test_field_interpretations() {
        assert!(field_matches("name", "Bob", "Bob"));
        assert!(!field_matches("name", "Bob", "bob"));
        assert!(field_matches("rank", "3", "2-5"));
        assert!(!field_matches("rank", "6", "2-5"));
        assert!(field_matches("skill", "25.5", ">=25"));
        assert!(!field_matches("skill", "24.9", ">=25"));
        assert!(field_matches("skillUncert", "1", "<2"));
        assert!(field_matches("ip", "10.0.0.42", "10.0.0.1-10.0.0.255"));
        assert!(!field_matches("ip", "10.0.1.1", "10.0.0.1-10.0.0.255"));
        assert!(field_matches("name", "[TAG]Bob", r"~\[TAG\].*"));
        assert!(!field_matches("name", "x[TAG]Bob", r"~\[TAG\].*"));
        assert!(!field_matches("name", "Bob", "~("));
        assert!(field_matches("status", "playing", "player"));
        assert!(field_matches("gameState", "voting", "stopped"));
        assert!(!field_matches("gameState", "stopped", "voting"));
    }

    #[test]
    fn test_missing_filter_field_depends_on_search_mode() {
        let rules = vec![rule(&[("name", "Bob")], "1")];
        let subject = field_map([("name", "Bob"), ("country", "FR")]);
        assert_eq!(find_matching_data(&subject, &rules, true).len(), 1);
        assert!(find_matching_data(&subject, &rules, false).is_empty());
    }

    #[test]
    fn test_empty_values_match_anything() {
        let rules = vec![rule(&[("name", ""), ("country", "FR")], "1")];
        let subject = field_map([("name", "Bob"), ("country", "FR"), ("rank", "")]);
        assert_eq!(find_matching_data(&subject, &rules, true).len(), 1);
    }

    #[test]
    fn test_strict_search_compares_exactly() {
        let rules = vec![rule(&[("rank", "2-5")], "1"), rule(&[("rank", "3")], "2")];
        let subject = field_map([("rank", "3")]);
        let found = find_matching_data(&subject, &rules, false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0][1]["level"], "2");
    }

    #[test]
    fn test_source_order_and_first_match() {
        let rules = vec![
            rule(&[("country", "FR")], "10"),
            rule(&[("name", "~.*")], "5"),
            rule(&[("name", "Bob")], "100"),
        ];
        let subject = field_map([("name", "Bob"), ("country", "FR")]);
        let found = find_matching_data(&subject, &rules, true);
        let levels: Vec<&str> = found.iter().map(|r| r[1]["level"].as_str()).collect();
        assert_eq!(levels, ["10", "5", "100"]);
        assert_eq!(first_match(&subject, &rules).unwrap()[1]["level"], "10");

        let other = field_map([("name", "Alice"), ("country", "DE")]);
        assert_eq!(first_match(&other, &rules).unwrap()[1]["level"], "5");
    }
}
