//! Line-oriented record formats.
//!
//! Two formats share the same `#?field:field|field` header syntax:
//!
//! * `table` ([`Table`]): ordered rows grouped under `[section]` lines, each
//!   row being one field map per header group. There is no escaping, so a
//!   value holding `:` or `|` cannot be written and its row is skipped.
//! * `fastTable` ([`FastTable`]): nested keys ending in a leaf field map,
//!   with `:` and `|` escaped inside values.

mod fast;

pub use fast::{FastNode, FastTable, LeafMap};

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;
use tracing::error;

use crate::error::{ConfError, TableError};

/// One group of fields of a record.
pub type FieldMap = HashMap<String, String>;

/// A row: one field map per header group.
pub type Record = Vec<FieldMap>;

const HEADER_PREFIX: &str = "#?";

/// Field layout declared by a `#?` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPattern {
    groups: Vec<Vec<String>>,
}

impl FieldPattern {
    pub fn new(groups: Vec<Vec<String>>) -> Self {
        Self { groups }
    }

    /// Builds a pattern from static field lists.
    pub fn from_fields(groups: &[&[&str]]) -> Self {
        Self {
            groups: groups
                .iter()
                .map(|group| group.iter().map(|field| field.to_string()).collect())
                .collect(),
        }
    }

    /// Parses the body of a header line (without the `#?` prefix) and checks
    /// every field against the allow-list of its group.
    pub fn parse(spec: &str, allowed: &[&[&str]], line: usize) -> Result<Self, TableError> {
        let groups: Vec<Vec<String>> = spec
            .split('|')
            .map(|group| group.split(':').map(|field| field.trim().to_string()).collect())
            .collect();

        if groups.len() != allowed.len() {
            return Err(TableError::InvalidPattern {
                line,
                reason: format!("expected {} field groups, found {}", allowed.len(), groups.len()),
            });
        }

        for (group, allowed_fields) in groups.iter().zip(allowed) {
            let mut seen = Vec::with_capacity(group.len());
            for field in group {
                if !allowed_fields.contains(&field.as_str()) {
                    return Err(TableError::InvalidPattern {
                        line,
                        reason: format!("invalid field \"{field}\""),
                    });
                }
                if seen.contains(&field) {
                    return Err(TableError::InvalidPattern {
                        line,
                        reason: format!("duplicate field \"{field}\""),
                    });
                }
                seen.push(field);
            }
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    /// Header line for this pattern, e.g. `#?accountId|name:level`.
    pub fn header(&self) -> String {
        let body: Vec<String> = self.groups.iter().map(|group| group.join(":")).collect();
        format!("{HEADER_PREFIX}{}", body.join("|"))
    }

    /// Splits a data line strictly according to the pattern.
    pub(crate) fn split_line<'l>(&self, data: &'l str, line: usize) -> Result<Vec<Vec<&'l str>>, TableError> {
        let parts: Vec<&str> = data.split('|').collect();
        if parts.len() != self.groups.len() {
            return Err(TableError::MalformedRecord {
                line,
                reason: format!("expected {} field groups, found {}", self.groups.len(), parts.len()),
            });
        }

        let mut values = Vec::with_capacity(parts.len());
        for (index, (part, group)) in parts.iter().zip(&self.groups).enumerate() {
            let fields: Vec<&str> = part.split(':').collect();
            if fields.len() != group.len() {
                return Err(TableError::MalformedRecord {
                    line,
                    reason: format!(
                        "group {} has {} fields, expected {}",
                        index + 1,
                        fields.len(),
                        group.len()
                    ),
                });
            }
            values.push(fields);
        }
        Ok(values)
    }
}

/// Rows of a `table` file, grouped by section. Rows found before any
/// `[section]` line belong to the section named `""`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pattern: Option<FieldPattern>,
    sections: BTreeMap<String, Vec<Record>>,
}

impl Table {
    pub fn new(pattern: FieldPattern) -> Self {
        Self {
            pattern: Some(pattern),
            sections: BTreeMap::new(),
        }
    }

    /// The last header pattern read from the file, if any.
    pub fn pattern(&self) -> Option<&FieldPattern> {
        self.pattern.as_ref()
    }

    pub fn section(&self, name: &str) -> &[Record] {
        self.sections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn section_mut(&mut self, name: &str) -> &mut Vec<Record> {
        self.sections.entry(name.to_string()).or_default()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Records of the unnamed section.
    pub fn records(&self) -> &[Record] {
        self.section("")
    }

    pub fn records_mut(&mut self) -> &mut Vec<Record> {
        self.section_mut("")
    }

    pub fn len(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses `table` formatted lines.
///
/// `allowed` holds the allowed field names of each header group. Any
/// malformed data line aborts the whole parse: callers never see a
/// partially loaded table.
pub fn parse_table<'a, I>(lines: I, allowed: &[&[&str]]) -> Result<Table, TableError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut table = Table::default();
    let mut section = String::new();

    for (index, raw) in lines.into_iter().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        if let Some(spec) = line.strip_prefix(HEADER_PREFIX) {
            table.pattern = Some(FieldPattern::parse(spec, allowed, line_no)?);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            section = name.trim().to_string();
            table.sections.entry(section.clone()).or_default();
            continue;
        }

        let pattern = table.pattern.as_ref().ok_or_else(|| TableError::MalformedRecord {
            line: line_no,
            reason: "data line before pattern header".to_string(),
        })?;

        let values = pattern.split_line(line, line_no)?;
        let record: Record = pattern
            .groups
            .iter()
            .zip(values)
            .map(|(fields, group_values)| {
                fields
                    .iter()
                    .cloned()
                    .zip(group_values.into_iter().map(str::to_string))
                    .collect::<FieldMap>()
            })
            .collect();
        table.sections.entry(section.clone()).or_default().push(record);
    }

    Ok(table)
}

/// Serializes a table with the given pattern.
///
/// Rows holding a raw `:` or `|` in any value are logged and skipped since
/// the format has no escaping.
pub fn write_table(table: &Table, pattern: &FieldPattern) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", pattern.header());

    for (name, records) in &table.sections {
        if !name.is_empty() {
            let _ = writeln!(out, "[{name}]");
        }
        for record in records {
            match format_record(record, pattern) {
                Some(line) => {
                    let _ = writeln!(out, "{line}");
                }
                None => {
                    error!(section = %name, record = ?record, "Skipping record that cannot be stored in table format");
                }
            }
        }
    }
    out
}

fn format_record(record: &Record, pattern: &FieldPattern) -> Option<String> {
    if record.len() != pattern.groups.len() {
        return None;
    }
    let mut groups = Vec::with_capacity(record.len());
    for (fields, map) in pattern.groups.iter().zip(record) {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let value = map.get(field).map(String::as_str).unwrap_or("");
            if value.contains([':', '|', '\n']) {
                return None;
            }
            values.push(value);
        }
        groups.push(values.join(":"));
    }
    Some(groups.join("|"))
}

/// Reads and parses a `table` file.
pub fn read_table_file(path: &Path, allowed: &[&[&str]]) -> Result<Table, ConfError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_table(content.lines(), allowed).map_err(|source| ConfError::Table {
        path: path.to_path_buf(),
        source,
    })
}

/// Builds a field map from `(field, value)` pairs.
pub fn field_map<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> FieldMap {
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
