//! Preset configuration files: parameter declarations, the loader, section
//! inheritance and the live settings map.

mod inheritance;
mod params;
mod parse;
mod settings;

pub use params::{global_params, preset_params};
pub use parse::{load, load_plugin_conf, PluginSpec};
pub use settings::Settings;

use std::collections::BTreeMap;

/// Declaration of one parameter: accepted types and whether it must be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub types: Vec<String>,
    pub required: bool,
}

impl ParamDecl {
    pub fn optional(types: &[&str]) -> Self {
        Self {
            types: types.iter().map(|t| t.to_string()).collect(),
            required: false,
        }
    }

    pub fn required(types: &[&str]) -> Self {
        Self {
            required: true,
            ..Self::optional(types)
        }
    }
}

/// Parameter declarations by name.
pub type ParamSpec = BTreeMap<String, ParamDecl>;

/// Builds a [`ParamSpec`] from `(name, types, required)` triples.
pub fn param_spec(decls: &[(&str, &[&str], bool)]) -> ParamSpec {
    decls
        .iter()
        .map(|(name, types, required)| {
            let decl = if *required {
                ParamDecl::required(types)
            } else {
                ParamDecl::optional(types)
            };
            (name.to_string(), decl)
        })
        .collect()
}

/// A `[section]` of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    /// Parameter values, each an ordered list of `|` separated alternatives
    pub values: BTreeMap<String, Vec<String>>,
    /// Attributes given in parentheses after the section name
    pub attributes: BTreeMap<String, String>,
    /// Sections this one inherits from, in declaration order
    pub parents: Vec<String>,
}

impl Section {
    pub fn get(&self, param: &str) -> Option<&[String]> {
        self.values.get(param).map(Vec::as_slice)
    }

    /// First (current) value of a parameter.
    pub fn first(&self, param: &str) -> Option<&str> {
        self.values.get(param)?.first().map(String::as_str)
    }

    pub fn is_transparent(&self) -> bool {
        matches!(self.attributes.get("transparent").map(String::as_str), Some(v) if v != "0")
    }
}

/// Result of loading a configuration file, with inheritance resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedConf {
    pub globals: BTreeMap<String, String>,
    pub sections: BTreeMap<String, Section>,
}

impl LoadedConf {
    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals.get(name).map(String::as_str)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Checks names referenced by the configuration: the `defaultPreset`
    /// global must name a section, every preset `banList` must name a ban
    /// list and, when `map_lists` is given, every `mapList` a map list.
    /// All unknown references are reported together.
    pub fn check_references(
        &self,
        ban_lists: &[String],
        map_lists: Option<&[String]>,
    ) -> Result<(), crate::error::ConfError> {
        let mut unknown = Vec::new();

        if let Some(default) = self.global("defaultPreset") {
            if !self.sections.contains_key(default) {
                unknown.push(format!("defaultPreset={default}"));
            }
        }

        for (name, section) in &self.sections {
            for value in section.get("banList").unwrap_or(&[]) {
                if !value.is_empty() && !ban_lists.contains(value) {
                    unknown.push(format!("{name}.banList={value}"));
                }
            }
            if let Some(map_lists) = map_lists {
                for value in section.get("mapList").unwrap_or(&[]) {
                    if !map_lists.contains(value) {
                        unknown.push(format!("{name}.mapList={value}"));
                    }
                }
            }
        }

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(crate::error::ConfError::UnknownReference(unknown))
        }
    }
}
