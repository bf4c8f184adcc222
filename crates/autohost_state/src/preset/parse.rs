use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::inheritance;
use super::{LoadedConf, ParamSpec, Section};
use crate::error::ConfError;
use crate::types::TypeRegistry;

lazy_static! {
    static ref MACRO: Regex = Regex::new(r"%(\w+)%").expect("valid macro regex");
    static ref SECTION: Regex =
        Regex::new(r"^\[\s*([^\[\]<>()]+?)\s*(?:<([^>]*)>)?\s*(?:\(([^)]*)\))?\s*\]$").expect("valid section regex");
    static ref INCLUDE: Regex = Regex::new(r"^\{(.+)\}$").expect("valid include regex");
    static ref PARAM: Regex = Regex::new(r"^(\w[\w.\-]*)\s*:\s*(.*)$").expect("valid parameter regex");
}

/// Global and preset parameter declarations of a plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginSpec {
    pub global: ParamSpec,
    pub preset: ParamSpec,
}

/// A line after macro substitution and include expansion.
struct SourceLine {
    file: PathBuf,
    number: usize,
    text: String,
}

/// Loads a configuration file.
///
/// Lines before the first `[section]` set global parameters, checked
/// against `global_spec`; section lines are checked against `section_spec`.
/// Every invalid value and every missing required global is collected
/// before the load fails, so one error lists all of them.
///
/// # Arguments
///
/// * `path` - Configuration file
/// * `global_spec` - Declarations of global parameters
/// * `section_spec` - Declarations of section parameters
/// * `macros` - Values substituted for `%name%` placeholders
/// * `registry` - Type validators referenced by the declarations
///
/// # Returns
///
/// The globals and sections with inheritance resolved, or the first fatal
/// error.
pub fn load(
    path: &Path,
    global_spec: &ParamSpec,
    section_spec: &ParamSpec,
    macros: &HashMap<String, String>,
    registry: &TypeRegistry,
) -> Result<LoadedConf, ConfError> {
    let mut lines = Vec::new();
    read_lines(path, macros, &mut Vec::new(), &mut lines)?;

    let mut conf = LoadedConf::default();
    let mut current: Option<String> = None;

    for line in &lines {
        let text = line.text.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        if let Some(caps) = SECTION.captures(text) {
            let name = caps[1].to_string();
            if conf.sections.contains_key(&name) {
                return Err(ConfError::DuplicateSection(name));
            }
            conf.sections.insert(name.clone(), parse_section_header(&caps));
            current = Some(name);
            continue;
        }

        let Some(caps) = PARAM.captures(text) else {
            warn!(file = %line.file.display(), line = line.number, content = %text, "Ignoring malformed configuration line");
            continue;
        };
        let key = caps[1].to_string();
        let value = caps[2].trim().to_string();

        match &current {
            None => {
                if !global_spec.contains_key(&key) {
                    warn!(file = %line.file.display(), line = line.number, param = %key, "Ignoring unknown global parameter");
                    continue;
                }
                if conf.globals.insert(key.clone(), value).is_some() {
                    warn!(file = %line.file.display(), line = line.number, param = %key, "Duplicate global parameter, keeping last definition");
                }
            }
            Some(section_name) => {
                if !section_spec.contains_key(&key) {
                    warn!(file = %line.file.display(), line = line.number, section = %section_name, param = %key, "Ignoring unknown parameter");
                    continue;
                }
                let values = value.split('|').map(|v| v.trim().to_string()).collect();
                if let Some(section) = conf.sections.get_mut(section_name) {
                    if section.values.insert(key.clone(), values).is_some() {
                        warn!(file = %line.file.display(), line = line.number, section = %section_name, param = %key, "Duplicate parameter, keeping last definition");
                    }
                }
            }
        }
    }

    validate(&conf, global_spec, section_spec, registry)?;
    inheritance::resolve(&mut conf.sections)?;

    debug!(file = %path.display(), globals = conf.globals.len(), sections = conf.sections.len(), "Configuration loaded");
    Ok(conf)
}

/// Loads `<etc_dir>/<plugin>.conf` with the plugin's own declarations.
pub fn load_plugin_conf(
    etc_dir: &Path,
    plugin: &str,
    spec: &PluginSpec,
    macros: &HashMap<String, String>,
    registry: &TypeRegistry,
) -> Result<LoadedConf, ConfError> {
    let path = etc_dir.join(format!("{plugin}.conf"));
    load(&path, &spec.global, &spec.preset, macros, registry)
}

fn parse_section_header(caps: &Captures<'_>) -> Section {
    let parents = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let attributes: BTreeMap<String, String> = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(|attr| match attr.split_once(':') {
                    Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
                    None => (attr.to_string(), "1".to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    Section {
        values: BTreeMap::new(),
        attributes,
        parents,
    }
}

fn validate(
    conf: &LoadedConf,
    global_spec: &ParamSpec,
    section_spec: &ParamSpec,
    registry: &TypeRegistry,
) -> Result<(), ConfError> {
    let mut invalid = Vec::new();
    let mut missing = Vec::new();

    for (name, value) in &conf.globals {
        if let Some(decl) = global_spec.get(name) {
            if !registry.check_value(value, &decl.types, false) {
                invalid.push(name.clone());
            }
        }
    }
    for (name, decl) in global_spec {
        if decl.required && !conf.globals.contains_key(name) {
            missing.push(name.clone());
        }
    }

    for (section_name, section) in &conf.sections {
        for (param, values) in &section.values {
            let Some(decl) = section_spec.get(param) else {
                continue;
            };
            let several = values.len() > 1;
            let valid = values
                .iter()
                .enumerate()
                .all(|(i, value)| registry.check_value(value, &decl.types, several && i == 0));
            if !valid {
                invalid.push(format!("{section_name}.{param}"));
            }
        }
    }

    if invalid.is_empty() && missing.is_empty() {
        Ok(())
    } else {
        Err(ConfError::Validation { invalid, missing })
    }
}

/// Reads `path` into `out`, substituting macros and expanding includes.
/// `stack` holds the files currently being read.
fn read_lines(
    path: &Path,
    macros: &HashMap<String, String>,
    stack: &mut Vec<PathBuf>,
    out: &mut Vec<SourceLine>,
) -> Result<(), ConfError> {
    let canonical = path.canonicalize().map_err(|source| ConfError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if stack.contains(&canonical) {
        return Err(ConfError::RecursiveInclude(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(&canonical).map_err(|source| ConfError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    stack.push(canonical);
    for (index, raw) in content.lines().enumerate() {
        let text = substitute_macros(raw, macros);
        if let Some(caps) = INCLUDE.captures(text.trim()) {
            let target = Path::new(caps[1].trim());
            let target = if target.is_relative() {
                path.parent().unwrap_or(Path::new(".")).join(target)
            } else {
                target.to_path_buf()
            };
            read_lines(&target, macros, stack, out)?;
            continue;
        }
        out.push(SourceLine {
            file: path.to_path_buf(),
            number: index + 1,
            text,
        });
    }
    stack.pop();
    Ok(())
}

/// Replaces `%name%` placeholders; unknown names are kept as is.
fn substitute_macros(line: &str, macros: &HashMap<String, String>) -> String {
    if macros.is_empty() || !line.contains('%') {
        return line.to_string();
    }
    MACRO
        .replace_all(line, |caps: &Captures<'_>| match macros.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
