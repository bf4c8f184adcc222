use std::path::Path;

use super::{PrefKey, PreferenceBackend, UserPrefs};
use crate::constants::preferences::{FIELDS, KEY_FIELD, NAME_FIELD};
use crate::error::{StateError, SyncError};
use crate::shared::{decode_text, Dataset, LockRetry, SharedData, StorageKind};
use crate::table::{FastTable, LeafMap};

fn value_fields() -> Vec<&'static str> {
    std::iter::once(NAME_FIELD)
        .chain(FIELDS.iter().map(|(name, _)| *name))
        .collect()
}

/// Preferences as a fastTable keyed by encoded [`PrefKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceTable(FastTable);

impl Default for PreferenceTable {
    fn default() -> Self {
        Self(FastTable::new(&[KEY_FIELD], &value_fields()))
    }
}

impl PreferenceTable {
    pub fn get(&self, key: &PrefKey) -> Option<&LeafMap> {
        self.0.get(&[key.encode()])
    }

    pub fn insert(&mut self, key: &PrefKey, values: LeafMap) {
        self.0.insert(&[key.encode()], values);
    }

    pub fn remove(&mut self, key: &PrefKey) -> Option<LeafMap> {
        self.0.remove(&[key.encode()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Dataset for PreferenceTable {
    const NAME: &'static str = "preferences";
    const KIND: StorageKind = StorageKind::FastTable;

    fn decode(content: &[u8]) -> Result<Self, String> {
        let fields = value_fields();
        let parsed = FastTable::parse(decode_text(content)?.lines(), &[KEY_FIELD], &fields).map_err(|e| e.to_string())?;
        // files written with fewer preference fields are widened to the
        // current field list
        let mut table = Self::default();
        for (keys, values) in parsed.entries() {
            table.0.insert(&keys, values.clone());
        }
        Ok(table)
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        Ok(self.0.write().into_bytes())
    }
}

/// Preference backend over a private or shared fastTable file.
#[derive(Debug)]
pub struct TablePreferences {
    data: SharedData<PreferenceTable>,
}

impl TablePreferences {
    pub fn private(path: &Path) -> Result<Self, SyncError> {
        Ok(Self {
            data: SharedData::private(path)?,
        })
    }

    pub fn shared(path: &Path, private_path: Option<&Path>, retry: LockRetry) -> Result<Self, SyncError> {
        Ok(Self {
            data: SharedData::shared(path, private_path, retry)?,
        })
    }

    pub fn data(&self) -> &SharedData<PreferenceTable> {
        &self.data
    }
}

impl PreferenceBackend for TablePreferences {
    fn user_prefs(&mut self, key: &PrefKey) -> Result<UserPrefs, StateError> {
        let prefs = self
            .data
            .read()
            .get(key)
            .map(|leaf| {
                leaf.iter()
                    .filter(|(field, value)| field.as_str() != NAME_FIELD && !value.is_empty())
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(prefs)
    }

    fn set_pref(&mut self, key: &PrefKey, name: &str, pref: &str, value: &str) -> Result<(), StateError> {
        self.data.update(|table| {
            let mut leaf = table.get(key).cloned().unwrap_or_default();
            leaf.insert(NAME_FIELD.to_string(), name.to_string());
            leaf.insert(pref.to_string(), value.to_string());
            table.insert(key, leaf);
        })?;
        Ok(())
    }

    fn migrate_key(&mut self, from: &PrefKey, to: &PrefKey) -> Result<bool, StateError> {
        if from == to || self.data.read().get(from).is_none() {
            return Ok(false);
        }
        let moved = self.data.update(|table| {
            let Some(old) = table.remove(from) else {
                return false;
            };
            let mut merged = table.get(to).cloned().unwrap_or_default();
            for (field, value) in old {
                let slot = merged.entry(field).or_default();
                if slot.is_empty() {
                    *slot = value;
                }
            }
            table.insert(to, merged);
            true
        })?;
        Ok(moved)
    }

    fn backend_name(&self) -> &'static str {
        "table"
    }
}
