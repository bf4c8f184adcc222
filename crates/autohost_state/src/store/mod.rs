//! User preference storage.
//!
//! Preferences are keyed by account. Users seen on a lobby without account
//! ids are stored under `0(name)`, users whose id is not known yet under
//! `?(name)`; [`PreferenceBackend::migrate_key`] moves such entries once the
//! id becomes known.

mod sqlite;
mod table;

pub use sqlite::SqlitePreferences;
pub use table::{PreferenceTable, TablePreferences};

use std::collections::BTreeMap;
use std::fmt;

use crate::constants::preferences::FIELDS;
use crate::error::StateError;
use crate::types::TypeRegistry;

/// Preference values of one user, without empty values.
pub type UserPrefs = BTreeMap<String, String>;

/// Key of a preference entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrefKey {
    Account(u64),
    /// Lobby without account ids
    NameOnly(String),
    /// Account id not known yet
    Unknown(String),
}

impl PrefKey {
    /// Key for a user: `None` means the id is not known yet and `Some(0)`
    /// that the lobby has no account ids.
    pub fn for_user(account_id: Option<u64>, name: &str) -> Self {
        match account_id {
            Some(0) => PrefKey::NameOnly(name.to_string()),
            Some(id) => PrefKey::Account(id),
            None => PrefKey::Unknown(name.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            PrefKey::Account(id) => id.to_string(),
            PrefKey::NameOnly(name) => format!("0({name})"),
            PrefKey::Unknown(name) => format!("?({name})"),
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        if let Some(name) = raw.strip_prefix("0(").and_then(|r| r.strip_suffix(')')) {
            return Some(PrefKey::NameOnly(name.to_string()));
        }
        if let Some(name) = raw.strip_prefix("?(").and_then(|r| r.strip_suffix(')')) {
            return Some(PrefKey::Unknown(name.to_string()));
        }
        match raw.parse::<u64>() {
            Ok(id) if id > 0 && raw.bytes().all(|b| b.is_ascii_digit()) => Some(PrefKey::Account(id)),
            _ => None,
        }
    }
}

impl fmt::Display for PrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

pub fn is_preference(pref: &str) -> bool {
    FIELDS.iter().any(|(name, _)| *name == pref)
}

/// Checks a preference value against its declared types. An empty value
/// is always accepted: it clears the preference.
pub fn check_preference(registry: &TypeRegistry, pref: &str, value: &str) -> Result<(), StateError> {
    let Some((_, types)) = FIELDS.iter().find(|(name, _)| *name == pref) else {
        return Err(StateError::UnknownPreference(pref.to_string()));
    };
    if value.is_empty() || registry.check_value(value, types, false) {
        Ok(())
    } else {
        Err(StateError::InvalidValue {
            field: pref.to_string(),
            value: value.to_string(),
        })
    }
}

/// A preference storage backend.
pub trait PreferenceBackend {
    /// Non-empty preferences of `key`.
    fn user_prefs(&mut self, key: &PrefKey) -> Result<UserPrefs, StateError>;

    /// Sets one preference and records `name` as the user's last name.
    /// An empty value clears the preference.
    fn set_pref(&mut self, key: &PrefKey, name: &str, pref: &str, value: &str) -> Result<(), StateError>;

    /// Moves the entry of `from` to `to`. Values already set under `to`
    /// are kept. Returns whether an entry was moved.
    fn migrate_key(&mut self, from: &PrefKey, to: &PrefKey) -> Result<bool, StateError>;

    fn backend_name(&self) -> &'static str;

    fn get_pref(&mut self, key: &PrefKey, pref: &str) -> Result<Option<String>, StateError> {
        Ok(self.user_prefs(key)?.remove(pref))
    }
}
