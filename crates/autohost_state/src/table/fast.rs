use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::{FieldPattern, HEADER_PREFIX};
use crate::error::TableError;

/// Leaf fields of a fastTable entry.
pub type LeafMap = BTreeMap<String, String>;

const COLON_ESCAPE: &str = "\t<COLON>";
const PIPE_ESCAPE: &str = "\t<PIPE>";

/// One level of a fastTable tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastNode {
    Branch(BTreeMap<String, FastNode>),
    Leaf(LeafMap),
}

/// Nested keyed records: one tree level per key field, ending in a leaf
/// field map. Keys are kept sorted, which makes serialization stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastTable {
    key_fields: Vec<String>,
    value_fields: Vec<String>,
    root: BTreeMap<String, FastNode>,
}

impl FastTable {
    pub fn new(key_fields: &[&str], value_fields: &[&str]) -> Self {
        Self {
            key_fields: key_fields.iter().map(|f| f.to_string()).collect(),
            value_fields: value_fields.iter().map(|f| f.to_string()).collect(),
            root: BTreeMap::new(),
        }
    }

    /// Parses fastTable lines.
    ///
    /// The header must list exactly `key_fields` in its first group; leaf
    /// fields must belong to `value_fields`. A file without a header yields
    /// an empty table using the given fields.
    pub fn parse<'a, I>(lines: I, key_fields: &[&str], value_fields: &[&str]) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new(key_fields, value_fields);
        let mut pattern: Option<FieldPattern> = None;

        for (index, raw) in lines.into_iter().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }

            if let Some(spec) = line.strip_prefix(HEADER_PREFIX) {
                let parsed = FieldPattern::parse(spec, &[key_fields, value_fields], line_no)?;
                if parsed.groups()[0] != table.key_fields {
                    return Err(TableError::InvalidPattern {
                        line: line_no,
                        reason: format!("key fields must be {}", key_fields.join(":")),
                    });
                }
                table.value_fields = parsed.groups()[1].clone();
                pattern = Some(parsed);
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let current = pattern.as_ref().ok_or_else(|| TableError::MalformedRecord {
                line: line_no,
                reason: "data line before pattern header".to_string(),
            })?;
            let groups = current.split_line(line, line_no)?;
            let keys: Vec<String> = groups[0].iter().map(|k| unescape(k)).collect();
            let values: LeafMap = table
                .value_fields
                .iter()
                .cloned()
                .zip(groups[1].iter().map(|v| unescape(v)))
                .collect();
            table.insert(&keys, values);
        }

        Ok(table)
    }

    /// Serializes the table: header line, then one line per leaf with keys
    /// in ascending order.
    pub fn write(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{HEADER_PREFIX}{}|{}",
            self.key_fields.join(":"),
            self.value_fields.join(":")
        );
        for (keys, leaf) in self.entries() {
            let keys: Vec<String> = keys.iter().map(|k| escape(k)).collect();
            let values: Vec<String> = self
                .value_fields
                .iter()
                .map(|field| escape(leaf.get(field).map(String::as_str).unwrap_or("")))
                .collect();
            let _ = writeln!(out, "{}|{}", keys.join(":"), values.join(":"));
        }
        out
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn value_fields(&self) -> &[String] {
        &self.value_fields
    }

    pub fn root(&self) -> &BTreeMap<String, FastNode> {
        &self.root
    }

    pub fn get<S: AsRef<str>>(&self, keys: &[S]) -> Option<&LeafMap> {
        if keys.len() != self.key_fields.len() {
            return None;
        }
        let (last, path) = keys.split_last()?;
        let mut level = &self.root;
        for key in path {
            match level.get(key.as_ref())? {
                FastNode::Branch(next) => level = next,
                FastNode::Leaf(_) => return None,
            }
        }
        match level.get(last.as_ref())? {
            FastNode::Leaf(leaf) => Some(leaf),
            FastNode::Branch(_) => None,
        }
    }

    /// Inserts or replaces the leaf at `keys`. Returns false when the key
    /// count does not match the table depth.
    pub fn insert<S: AsRef<str>>(&mut self, keys: &[S], values: LeafMap) -> bool {
        if keys.len() != self.key_fields.len() {
            return false;
        }
        let Some((last, path)) = keys.split_last() else {
            return false;
        };
        let mut level = &mut self.root;
        for key in path {
            let node = level
                .entry(key.as_ref().to_string())
                .or_insert_with(|| FastNode::Branch(BTreeMap::new()));
            if let FastNode::Leaf(_) = node {
                *node = FastNode::Branch(BTreeMap::new());
            }
            level = match node {
                FastNode::Branch(next) => next,
                FastNode::Leaf(_) => return false,
            };
        }
        level.insert(last.as_ref().to_string(), FastNode::Leaf(values));
        true
    }

    /// Removes the leaf at `keys`, dropping branches left empty.
    pub fn remove<S: AsRef<str>>(&mut self, keys: &[S]) -> Option<LeafMap> {
        if keys.len() != self.key_fields.len() {
            return None;
        }
        remove_path(&mut self.root, keys)
    }

    /// Every leaf with its full key path, in ascending key order.
    pub fn entries(&self) -> Vec<(Vec<String>, &LeafMap)> {
        let mut out = Vec::new();
        collect_leaves(&self.root, &mut Vec::new(), &mut out);
        out
    }

    pub fn len(&self) -> usize {
        count_leaves(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

fn collect_leaves<'t>(
    level: &'t BTreeMap<String, FastNode>,
    prefix: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, &'t LeafMap)>,
) {
    for (key, node) in level {
        prefix.push(key.clone());
        match node {
            FastNode::Leaf(leaf) => out.push((prefix.clone(), leaf)),
            FastNode::Branch(next) => collect_leaves(next, prefix, out),
        }
        prefix.pop();
    }
}

fn count_leaves(level: &BTreeMap<String, FastNode>) -> usize {
    level
        .values()
        .map(|node| match node {
            FastNode::Leaf(_) => 1,
            FastNode::Branch(next) => count_leaves(next),
        })
        .sum()
}

fn remove_path<S: AsRef<str>>(level: &mut BTreeMap<String, FastNode>, keys: &[S]) -> Option<LeafMap> {
    let (first, rest) = keys.split_first()?;
    let key = first.as_ref();
    if rest.is_empty() {
        return match level.remove(key)? {
            FastNode::Leaf(leaf) => Some(leaf),
            branch => {
                level.insert(key.to_string(), branch);
                None
            }
        };
    }
    let (removed, now_empty) = match level.get_mut(key)? {
        FastNode::Branch(next) => {
            let removed = remove_path(next, rest);
            (removed, next.is_empty())
        }
        FastNode::Leaf(_) => return None,
    };
    if now_empty {
        level.remove(key);
    }
    removed
}

/// Escapes the field delimiters of a fastTable value.
pub fn escape(value: &str) -> String {
    value.replace(':', COLON_ESCAPE).replace('|', PIPE_ESCAPE)
}

pub fn unescape(value: &str) -> String {
    value.replace(COLON_ESCAPE, ":").replace(PIPE_ESCAPE, "|")
}
