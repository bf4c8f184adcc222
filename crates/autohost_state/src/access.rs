//! Access levels, command rights and command help.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::constants::access::{COMMAND_FILTER_FIELDS, COMMAND_LEVEL_FIELDS, LEVEL_FIELDS, USER_FIELDS};
use crate::error::ConfError;
use crate::matching::first_match;
use crate::table::{read_table_file, FieldMap, Table};

/// Level assignment rules of `users.conf`.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    users: Table,
}

impl AccessRules {
    pub fn load(path: &Path) -> Result<Self, ConfError> {
        let users = read_table_file(path, &[USER_FIELDS, LEVEL_FIELDS])?;
        debug!(path = %path.display(), rules = users.len(), "Loaded user access rules");
        Ok(Self { users })
    }

    pub fn from_table(users: Table) -> Self {
        Self { users }
    }

    /// Level of the first rule matching `identity`, 0 when none does.
    pub fn level(&self, identity: &FieldMap) -> u32 {
        first_match(identity, self.users.records())
            .and_then(|rule| rule.get(1)?.get("level")?.parse().ok())
            .unwrap_or(0)
    }
}

/// Levels required to run a command directly or through a vote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandLevels {
    pub direct: Option<u32>,
    pub vote: Option<u32>,
}

/// Per-command rights of `commands.conf`, one section per command.
#[derive(Debug, Clone, Default)]
pub struct CommandRights {
    table: Table,
}

impl CommandRights {
    pub fn load(path: &Path) -> Result<Self, ConfError> {
        let table = read_table_file(path, &[COMMAND_FILTER_FIELDS, COMMAND_LEVEL_FIELDS])?;
        debug!(path = %path.display(), commands = table.section_names().count(), "Loaded command rights");
        Ok(Self { table })
    }

    pub fn from_table(table: Table) -> Self {
        Self { table }
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.table.section_names().filter(|name| !name.is_empty())
    }

    /// Levels of the first rule of `command` matching `context`
    /// (`source`, `status`, `gameState`). `None` when the command is
    /// unknown or no rule applies.
    pub fn levels(&self, command: &str, context: &FieldMap) -> Option<CommandLevels> {
        let rule = first_match(context, self.table.section(command))?;
        let levels = rule.get(1)?;
        let parse = |field: &str| levels.get(field).and_then(|v| v.parse().ok());
        Some(CommandLevels {
            direct: parse("directLevel"),
            vote: parse("voteLevel"),
        })
    }

    /// Logs every command that has no help text and returns their names.
    pub fn check_help(&self, help: &HelpTexts) -> Vec<String> {
        let missing: Vec<String> = self
            .commands()
            .filter(|command| help.get(command).is_none())
            .map(str::to_string)
            .collect();
        for command in &missing {
            warn!(command = %command, "Command has no help text");
        }
        missing
    }
}

/// Help texts of `help.dat`: `[command]` headers followed by text lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpTexts {
    entries: BTreeMap<String, Vec<String>>,
}

impl HelpTexts {
    pub fn load(path: &Path) -> Result<Self, ConfError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current: Option<String> = None;
        for line in content.lines() {
            let trimmed = line.trim_end();
            if trimmed.starts_with('#') {
                continue;
            }
            if let Some(name) = trimmed.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                let name = name.trim().to_string();
                entries.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            if let Some(name) = &current {
                if !trimmed.is_empty() {
                    entries.entry(name.clone()).or_default().push(trimmed.to_string());
                }
            }
        }
        entries.retain(|_, lines| !lines.is_empty());
        Self { entries }
    }

    pub fn get(&self, command: &str) -> Option<&[String]> {
        self.entries.get(command).map(Vec::as_slice)
    }
}
