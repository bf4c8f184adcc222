use std::collections::{BTreeMap, HashSet};

use super::Section;
use crate::error::ConfError;

/// Fills every section with the parameters of its ancestors.
///
/// Ancestors are visited depth first in declaration order, each one at most
/// once; a parameter already set by the section or a nearer ancestor is
/// never overwritten. Values are taken from the sections as declared, so
/// the result does not depend on processing order.
pub(super) fn resolve(sections: &mut BTreeMap<String, Section>) -> Result<(), ConfError> {
    let declared = sections.clone();

    for (name, section) in sections.iter_mut() {
        if section.parents.is_empty() {
            continue;
        }
        for ancestor in ancestors(name, &declared)? {
            if let Some(source) = declared.get(&ancestor) {
                for (param, values) in &source.values {
                    section
                        .values
                        .entry(param.clone())
                        .or_insert_with(|| values.clone());
                }
            }
        }
    }
    Ok(())
}

/// Depth-first preorder of the ancestors of `start`.
fn ancestors(start: &str, sections: &BTreeMap<String, Section>) -> Result<Vec<String>, ConfError> {
    let mut order = Vec::new();
    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    // current inheritance path, with the index of the next parent to visit
    let mut path: Vec<(String, usize)> = vec![(start.to_string(), 0)];

    loop {
        let Some((name, index)) = path.last_mut() else {
            break;
        };
        let parents = sections.get(name.as_str()).map(|s| s.parents.as_slice()).unwrap_or(&[]);
        let Some(parent) = parents.get(*index).cloned() else {
            path.pop();
            continue;
        };
        *index += 1;
        let current = name.clone();

        if let Some(position) = path.iter().position(|(n, _)| *n == parent) {
            let mut cycle: Vec<String> = path[position..].iter().map(|(n, _)| n.clone()).collect();
            cycle.push(parent);
            return Err(ConfError::CyclicInheritance(cycle));
        }
        if !sections.contains_key(&parent) {
            return Err(ConfError::UnknownParent {
                section: current,
                parent,
            });
        }
        if visited.insert(parent.clone()) {
            order.push(parent.clone());
            path.push((parent, 0));
        }
    }

    Ok(order)
}
