use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{LoadedConf, ParamSpec};
use crate::error::{ConfError, StateError};
use crate::types::parse_integer_range;

/// Live settings: global values plus the current and allowed values of
/// every preset parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    globals: BTreeMap<String, String>,
    current: BTreeMap<String, String>,
    allowed: BTreeMap<String, Vec<String>>,
    preset: String,
}

impl Settings {
    /// Builds the settings from a loaded configuration and applies the
    /// default preset.
    ///
    /// The preset must exist and define every required preset parameter,
    /// directly or through inheritance.
    pub fn new(conf: &LoadedConf, default_preset: &str, preset_spec: &ParamSpec) -> Result<Self, ConfError> {
        let section = conf
            .section(default_preset)
            .ok_or_else(|| ConfError::UnknownPreset(default_preset.to_string()))?;

        let missing: Vec<String> = preset_spec
            .iter()
            .filter(|(name, decl)| decl.required && !section.values.contains_key(name.as_str()))
            .map(|(name, _)| format!("{default_preset}.{name}"))
            .collect();
        if !missing.is_empty() {
            return Err(ConfError::Validation {
                invalid: Vec::new(),
                missing,
            });
        }

        let mut settings = Self {
            globals: conf.globals.clone(),
            ..Self::default()
        };
        settings.apply_preset(conf, default_preset)?;
        // the default preset is always recorded, even when transparent
        settings.preset = default_preset.to_string();
        Ok(settings)
    }

    /// Applies a preset: the first value of each parameter becomes current
    /// and the whole list becomes the allowed set. A transparent preset
    /// leaves the current preset name unchanged.
    pub fn apply_preset(&mut self, conf: &LoadedConf, name: &str) -> Result<(), ConfError> {
        let section = conf
            .section(name)
            .ok_or_else(|| ConfError::UnknownPreset(name.to_string()))?;

        for (param, values) in &section.values {
            if let Some(first) = values.first() {
                self.current.insert(param.clone(), first.clone());
            }
            self.allowed.insert(param.clone(), values.clone());
        }

        if section.is_transparent() {
            debug!(preset = %name, "Applied transparent preset");
        } else {
            self.preset = name.to_string();
            info!(preset = %name, "Preset applied");
        }
        Ok(())
    }

    /// Name of the current preset.
    pub fn preset(&self) -> &str {
        &self.preset
    }

    /// Current value of a preset parameter, falling back to globals.
    pub fn get(&self, param: &str) -> Option<&str> {
        self.current
            .get(param)
            .or_else(|| self.globals.get(param))
            .map(String::as_str)
    }

    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals.get(name).map(String::as_str)
    }

    pub fn allowed(&self, param: &str) -> &[String] {
        self.allowed.get(param).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Changes the current value of a preset parameter. The value must be
    /// one of the allowed values or fall in one of the allowed ranges.
    pub fn set(&mut self, param: &str, value: &str) -> Result<(), StateError> {
        let allowed = self.allowed(param);
        let accepted = allowed.iter().any(|candidate| {
            candidate == value
                || match (parse_integer_range(candidate), value.parse::<u64>()) {
                    (Some((lo, hi)), Ok(n)) => value.bytes().all(|b| b.is_ascii_digit()) && (lo..=hi).contains(&n),
                    _ => false,
                }
        });
        if !accepted {
            return Err(StateError::NotAllowed {
                param: param.to_string(),
                value: value.to_string(),
            });
        }
        self.current.insert(param.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::{param_spec, Section};

    fn conf() -> LoadedConf {
        let mut conf = LoadedConf::default();
        conf.globals.insert("lobbyLogin".into(), "Bot".into());
        let mut ffa = Section::default();
        ffa.values.insert("description".into(), vec!["Free for all".into()]);
        ffa.values.insert("teamSize".into(), vec!["1".into(), "1-8".into()]);
        ffa.values.insert("map".into(), vec!["Comet".into(), "Delta".into()]);
        conf.sections.insert("ffa".into(), ffa);

        let mut night = Section::default();
        night.values.insert("map".into(), vec!["Dark".into()]);
        night.attributes.insert("transparent".into(), "1".into());
        conf.sections.insert("night".into(), night);
        conf
    }

    fn spec() -> ParamSpec {
        param_spec(&[("description", &["notNull"], true), ("map", &["notNull"], false)])
    }

    #[test]
    fn test_default_preset_applied() {
        let settings = Settings::new(&conf(), "ffa", &spec()).unwrap();
        assert_eq!(settings.preset(), "ffa");
        assert_eq!(settings.get("teamSize"), Some("1"));
        assert_eq!(settings.get("lobbyLogin"), Some("Bot"));
        assert_eq!(settings.allowed("map"), ["Comet", "Delta"]);
    }

    #[test]
    fn test_default_preset_checks() {
        assert!(matches!(
            Settings::new(&conf(), "nope", &spec()),
            Err(ConfError::UnknownPreset(_))
        ));
        match Settings::new(&conf(), "night", &spec()) {
            Err(ConfError::Validation { missing, .. }) => assert_eq!(missing, vec!["night.description"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_transparent_preset_keeps_name() {
        let conf = conf();
        let mut settings = Settings::new(&conf, "ffa", &spec()).unwrap();
        settings.apply_preset(&conf, "night").unwrap();
        assert_eq!(settings.preset(), "ffa");
        assert_eq!(settings.get("map"), Some("Dark"));
        assert_eq!(settings.get("teamSize"), Some("1"));
    }

    #[test]
    fn test_set_checks_allowed_values_and_ranges() {
        let mut settings = Settings::new(&conf(), "ffa", &spec()).unwrap();
        settings.set("map", "Delta").unwrap();
        assert_eq!(settings.get("map"), Some("Delta"));
        settings.set("teamSize", "6").unwrap();
        assert_eq!(settings.get("teamSize"), Some("6"));

        assert!(matches!(settings.set("teamSize", "9"), Err(StateError::NotAllowed { .. })));
        assert!(settings.set("map", "Other").is_err());
        assert!(settings.set("unknown", "1").is_err());
        assert_eq!(settings.get("teamSize"), Some("6"));
    }
}
