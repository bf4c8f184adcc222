//! The state context: everything the bot needs from its configuration and
//! data files, built once at startup and passed to collaborators.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::access::{AccessRules, CommandLevels, CommandRights, HelpTexts};
use crate::bans::{user_ban, BanEffect, BanLists, Bans};
use crate::certificates::TrustedCertificates;
use crate::constants::files;
use crate::error::{ConfError, StateError, SyncError};
use crate::maps::{MapHashes, MapInfo, MapInfoCache, MapLists, SavedBoxes, StartBox};
use crate::preset::{self, global_params, preset_params, LoadedConf, PluginSpec, Settings};
use crate::shared::{Dataset, LockRetry, SharedData};
use crate::store::{check_preference, PrefKey, PreferenceBackend, SqlitePreferences, TablePreferences, UserPrefs};
use crate::table::FieldMap;
use crate::types::TypeRegistry;
use crate::user_data::{PruneStats, Retention, SmurfReport, UserData, UserSighting};

/// Startup options of a [`StateContext`].
#[derive(Debug, Clone, Default)]
pub struct StateOptions {
    /// Main bot configuration file
    pub conf_file: PathBuf,
    /// Values substituted for `%name%` in configuration files
    pub macros: HashMap<String, String>,
    /// Overrides the lock settings of the configuration file
    pub lock_retry: Option<LockRetry>,
}

/// Where datasets live and which of them are shared.
#[derive(Debug, Clone)]
struct Layout {
    shared_dir: PathBuf,
    private_dir: PathBuf,
    shared: BTreeSet<String>,
    retry: LockRetry,
}

impl Layout {
    fn is_shared(&self, dataset: &str) -> bool {
        self.shared.contains(dataset)
    }

    /// Opens a dataset. A file that cannot be read or decoded is logged and
    /// the dataset starts empty with updates refused until it loads.
    fn open<D: Dataset>(&self, file: &str) -> Result<SharedData<D>, SyncError> {
        let private_path = self.private_dir.join(file);
        let shared = self.is_shared(D::NAME);
        let opened = if shared {
            SharedData::shared(&self.shared_dir.join(file), Some(&private_path), self.retry)
        } else {
            SharedData::private(&private_path).map(|data| data.with_retry(self.retry))
        };
        match opened {
            Err(e @ (SyncError::Decode { .. } | SyncError::Io { .. })) => {
                error!(dataset = D::NAME, error = %e, "Unable to load dataset, continuing without its data");
                let path = if shared { self.shared_dir.join(file) } else { private_path };
                Ok(SharedData::unreadable(&path, shared, self.retry))
            }
            other => other,
        }
    }
}

pub struct StateContext {
    registry: TypeRegistry,
    macros: HashMap<String, String>,
    conf: LoadedConf,
    settings: Settings,
    etc_dir: PathBuf,
    access: AccessRules,
    commands: CommandRights,
    help: HelpTexts,
    ban_lists: BanLists,
    map_lists: MapLists,
    bans: SharedData<Bans>,
    saved_boxes: SharedData<SavedBoxes>,
    map_hashes: SharedData<MapHashes>,
    map_info: SharedData<MapInfoCache>,
    certificates: SharedData<TrustedCertificates>,
    preferences: Box<dyn PreferenceBackend>,
    user_data: SharedData<UserData>,
    pending_sightings: Vec<(UserSighting, i64)>,
    retention: Retention,
}

impl StateContext {
    /// Loads the configuration, the rule files of `etcDir` and every
    /// dataset.
    ///
    /// Configuration errors, lock failures and a failed preference schema
    /// update are fatal. Missing rule files are logged and treated as
    /// empty; unreadable datasets are logged and start empty.
    pub fn open(options: StateOptions) -> Result<Self, StateError> {
        let registry = TypeRegistry::with_defaults();
        let StateOptions {
            conf_file,
            macros,
            lock_retry,
        } = options;

        let conf = preset::load(&conf_file, &global_params(), &preset_params(), &macros, &registry)?;
        let global = |name: &str| conf.global(name).filter(|v| !v.is_empty());

        let etc_dir = PathBuf::from(global("etcDir").unwrap_or("."));
        let var_dir = PathBuf::from(global("varDir").unwrap_or("."));
        let instance_dir = global("instanceDir").map(PathBuf::from).unwrap_or_else(|| var_dir.clone());

        let access = load_optional(&etc_dir.join(files::USERS_CONF), AccessRules::load)?;
        let commands = load_optional(&etc_dir.join(files::COMMANDS_CONF), CommandRights::load)?;
        let help = load_optional(&etc_dir.join(files::HELP), HelpTexts::load)?;
        let ban_lists = load_optional(&etc_dir.join(files::BANS_CONF), BanLists::load)?;
        let map_lists = load_optional(&etc_dir.join(files::MAP_LISTS_CONF), MapLists::load)?;
        commands.check_help(&help);

        conf.check_references(&ban_lists.list_names(), Some(&map_lists.list_names()))?;
        let default_preset = global("defaultPreset").unwrap_or_default();
        let settings = Settings::new(&conf, default_preset, &preset_params())?;

        let layout = Layout {
            shared_dir: var_dir,
            private_dir: instance_dir,
            shared: global("sharedData")
                .map(|list| list.split(';').map(str::to_string).collect())
                .unwrap_or_default(),
            retry: lock_retry.unwrap_or_else(|| lock_retry_from(&conf)),
        };
        let retention = match global("userDataRetention") {
            Some(raw) => raw.parse().map_err(|_| StateError::InvalidValue {
                field: "userDataRetention".to_string(),
                value: raw.to_string(),
            })?,
            None => Retention::default(),
        };

        let preferences = open_preferences(&layout, global("preferencesBackend").unwrap_or("table"))?;
        info!(
            preset = %settings.preset(),
            shared = ?layout.shared,
            preferences = preferences.backend_name(),
            "State loaded"
        );

        Ok(Self {
            bans: layout.open(files::BANS)?,
            saved_boxes: layout.open(files::SAVED_BOXES)?,
            map_hashes: layout.open(files::MAP_HASHES)?,
            map_info: layout.open(files::MAP_INFO_CACHE)?,
            certificates: layout.open(files::TRUSTED_CERTIFICATES)?,
            user_data: layout.open(files::USER_DATA)?,
            registry,
            macros,
            conf,
            settings,
            etc_dir,
            access,
            commands,
            help,
            ban_lists,
            map_lists,
            preferences,
            pending_sightings: Vec::new(),
            retention,
        })
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn conf(&self) -> &LoadedConf {
        &self.conf
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn help(&self, command: &str) -> Option<&[String]> {
        self.help.get(command)
    }

    pub fn retention(&self) -> &Retention {
        &self.retention
    }

    pub fn preferences_backend(&self) -> &'static str {
        self.preferences.backend_name()
    }

    /// Loads the configuration file of a plugin from `etcDir`.
    pub fn load_plugin_conf(&self, plugin: &str, spec: &PluginSpec) -> Result<LoadedConf, ConfError> {
        preset::load_plugin_conf(&self.etc_dir, plugin, spec, &self.macros, &self.registry)
    }

    pub fn apply_preset(&mut self, name: &str) -> Result<(), StateError> {
        self.settings.apply_preset(&self.conf, name)?;
        Ok(())
    }

    // Preferences

    /// Preferences of a user. Entries stored while the account id was
    /// unknown are moved to the account first. Storage errors are logged
    /// and give empty preferences.
    pub fn user_pref(&mut self, account_id: Option<u64>, name: &str) -> UserPrefs {
        let key = PrefKey::for_user(account_id, name);
        if let PrefKey::Account(_) = key {
            match self.preferences.migrate_key(&PrefKey::Unknown(name.to_string()), &key) {
                Ok(true) => info!(user = %name, key = %key, "Migrated preferences of user"),
                Ok(false) => {}
                Err(e) => error!(user = %name, error = %e, "Unable to migrate preferences"),
            }
        }
        self.preferences.user_prefs(&key).unwrap_or_else(|e| {
            error!(user = %name, error = %e, "Unable to read preferences");
            UserPrefs::new()
        })
    }

    /// Sets one preference after checking its declared type. An empty value
    /// clears it.
    pub fn set_user_pref(&mut self, account_id: Option<u64>, name: &str, pref: &str, value: &str) -> Result<(), StateError> {
        check_preference(&self.registry, pref, value)?;
        let key = PrefKey::for_user(account_id, name);
        self.preferences.set_pref(&key, name, pref, value)
    }

    // Access and bans

    pub fn access_level(&self, identity: &FieldMap) -> u32 {
        self.access.level(identity)
    }

    pub fn command_levels(&self, command: &str, context: &FieldMap) -> Option<CommandLevels> {
        self.commands.levels(command, context)
    }

    /// Ban decision for a user under the current preset's ban list.
    pub fn user_ban(&mut self, subject: &FieldMap) -> BanEffect {
        let list = self.settings.get("banList").unwrap_or_default();
        user_ban(subject, &self.ban_lists, list, self.bans.read(), now())
    }

    /// Adds a dynamic ban. Returns false for a duplicate.
    pub fn ban(&mut self, filter: FieldMap, effect: BanEffect) -> Result<bool, StateError> {
        let now = now();
        Ok(self.bans.update(|bans| bans.ban_user(filter, effect, now))?)
    }

    /// Removes the dynamic bans strictly matching `filter`.
    pub fn unban(&mut self, filter: &FieldMap) -> Result<usize, StateError> {
        Ok(self.bans.update(|bans| bans.unban(filter))?)
    }

    pub fn prune_expired_bans(&mut self) -> Result<usize, StateError> {
        let now = now();
        if !self.bans.read().has_expired_bans(now) {
            return Ok(0);
        }
        Ok(self.bans.update(|bans| bans.remove_expired_bans(now))?)
    }

    /// Counts one played game for game-limited bans.
    pub fn decrease_game_based_bans(&mut self) -> Result<usize, StateError> {
        if !self.bans.read().has_game_based_bans() {
            return Ok(0);
        }
        Ok(self.bans.update(Bans::decrease_game_based_bans)?)
    }

    pub fn bans(&mut self) -> &Bans {
        self.bans.read()
    }

    // Maps

    /// Map name patterns of the current preset's map list.
    pub fn map_list(&self) -> &[String] {
        self.map_lists.patterns(self.settings.get("mapList").unwrap_or_default())
    }

    pub fn cache_map_info(&mut self, map: &str, info: MapInfo) -> Result<(), StateError> {
        self.map_info.update(|cache| cache.insert(map, info))?;
        Ok(())
    }

    pub fn map_info(&mut self, map: &str) -> Option<MapInfo> {
        self.map_info.read().get(map).cloned()
    }

    /// Saves start boxes for the map and the number of boxes given.
    pub fn save_boxes(&mut self, map: &str, boxes: &[StartBox]) -> Result<(), StateError> {
        self.saved_boxes.update(|saved| saved.save(map, boxes))?;
        Ok(())
    }

    pub fn saved_boxes(&mut self, map: &str, nb_teams: u32) -> Option<Vec<StartBox>> {
        self.saved_boxes.read().get(map, nb_teams)
    }

    pub fn map_hash(&mut self, engine_version: &str, map: &str) -> Option<String> {
        self.map_hashes.read().get(engine_version, map).map(str::to_string)
    }

    pub fn set_map_hash(&mut self, engine_version: &str, map: &str, hash: &str) -> Result<(), StateError> {
        self.map_hashes.update(|hashes| hashes.set(engine_version, map, hash))?;
        Ok(())
    }

    // Lobby certificates

    pub fn trust_certificate(&mut self, host: &str, hash: &str) -> Result<bool, StateError> {
        Ok(self.certificates.update(|certs| certs.trust(host, hash))?)
    }

    pub fn untrust_certificate(&mut self, host: &str, hash: &str) -> Result<bool, StateError> {
        Ok(self.certificates.update(|certs| certs.untrust(host, hash))?)
    }

    pub fn is_certificate_trusted(&mut self, host: &str, hash: &str) -> bool {
        self.certificates.read().is_trusted(host, hash)
    }

    // User data

    /// Records a sighting in memory. It is written by the next
    /// [`flush_user_data`](Self::flush_user_data).
    pub fn learn_user(&mut self, sighting: UserSighting) {
        let now = now();
        self.user_data.data_mut().learn_user(&sighting, now);
        self.pending_sightings.push((sighting, now));
    }

    pub fn last_ip(&mut self, account_id: &str) -> Option<String> {
        self.refresh_user_data();
        self.user_data.get().last_ip(account_id).map(str::to_string)
    }

    pub fn smurfs(&mut self, account_id: &str) -> SmurfReport {
        self.refresh_user_data();
        self.user_data.get().smurfs(account_id)
    }

    /// Prunes the correlation index with the configured retention and
    /// writes it. Sightings not written yet are replayed on the latest
    /// file content so concurrent instances do not lose each other's.
    pub fn flush_user_data(&mut self) -> Result<PruneStats, StateError> {
        let now = now();
        let retention = self.retention;
        let pending = &self.pending_sightings;
        let stats = self.user_data.update(|data| {
            for (sighting, seen) in pending {
                data.learn_user(sighting, *seen);
            }
            data.prune(now, &retention)
        })?;
        debug!(sightings = self.pending_sightings.len(), "Flushed user data");
        self.pending_sightings.clear();
        Ok(stats)
    }

    fn refresh_user_data(&mut self) {
        match self.user_data.refresh_if_stale() {
            Ok(true) => {
                let data = self.user_data.data_mut();
                for (sighting, seen) in &self.pending_sightings {
                    data.learn_user(sighting, *seen);
                }
            }
            Ok(false) => {}
            Err(e) => error!(error = %e, "Unable to refresh user data, using cached value"),
        }
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn load_optional<T: Default>(path: &Path, load: impl FnOnce(&Path) -> Result<T, ConfError>) -> Result<T, ConfError> {
    if !path.exists() {
        warn!(path = %path.display(), "File not found, using empty rules");
        return Ok(T::default());
    }
    load(path)
}

fn lock_retry_from(conf: &LoadedConf) -> LockRetry {
    let defaults = LockRetry::default();
    LockRetry {
        attempts: conf
            .global("lockRetries")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.attempts),
        delay: conf
            .global("lockRetryDelay")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay),
        blocking: conf.global("lockBlocking") == Some("1"),
    }
}

fn open_preferences(layout: &Layout, backend: &str) -> Result<Box<dyn PreferenceBackend>, StateError> {
    let shared = layout.is_shared("preferences");
    if backend == "sqlite" {
        let dir = if shared { &layout.shared_dir } else { &layout.private_dir };
        return Ok(Box::new(SqlitePreferences::open(&dir.join(files::PREFERENCES_SQLITE))?));
    }
    let private_path = layout.private_dir.join(files::PREFERENCES);
    let table = if shared {
        TablePreferences::shared(&layout.shared_dir.join(files::PREFERENCES), Some(&private_path), layout.retry)?
    } else {
        TablePreferences::private(&private_path)?
    };
    Ok(Box::new(table))
}
