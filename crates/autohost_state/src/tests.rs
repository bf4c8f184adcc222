//! Scenarios spanning several modules, run against a full context built in
//! a temporary directory.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::bans::BanEffect;
use crate::error::{ConfError, StateError, SyncError};
use crate::maps::{MapInfo, StartBox};
use crate::preset::{param_spec, PluginSpec};
use crate::table::field_map;
use crate::user_data::UserSighting;
use crate::{StateContext, StateOptions};

const BOT_CONF: &str = "\
# test bot
lobbyLogin: TestBot
lobbyPassword: secret
etcDir: %etcDir%
varDir: %varDir%
instanceDir: %instanceDir%
defaultPreset: team
sharedData: %sharedData%
userDataRetention: 30;-1;-1

[base]
description: Base preset
mapList: all
nbTeams: 2
teamSize: 1|1-8

[team<base>]
description: Team games
teamSize: 4|1-8
banList: strict

[duel<base> (transparent)]
teamSize: 1
";

const USERS_CONF: &str = "\
#?accountId:name|level
1:|100
:Moderator|50
";

const COMMANDS_CONF: &str = "\
#?source:status:gameState|directLevel:voteLevel
[start]
:player:stopped|10:0
::|100:
[stop]
::|20:
";

const MAP_LISTS: &str = "\
[all]
.*
[small]
Delta Siege
";

const HELP: &str = "\
[start]
!start - starts the game
";

const BAN_LISTS: &str = "\
#?name:ip|banType:reason
:10.66.0.0-10.66.255.255|2:proxy range
[strict]
Griefer:|1:griefing
";

struct Fixture {
    _dir: TempDir,
    etc: std::path::PathBuf,
    var: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        let var = dir.path().join("var");
        fs::create_dir_all(&etc).unwrap();
        fs::create_dir_all(&var).unwrap();
        fs::write(etc.join("autohost.conf"), BOT_CONF).unwrap();
        fs::write(etc.join("users.conf"), USERS_CONF).unwrap();
        fs::write(etc.join("commands.conf"), COMMANDS_CONF).unwrap();
        fs::write(etc.join("help.dat"), HELP).unwrap();
        fs::write(etc.join("banLists.conf"), BAN_LISTS).unwrap();
        fs::write(etc.join("mapLists.conf"), MAP_LISTS).unwrap();
        Self { _dir: dir, etc, var }
    }

    /// Opens a bot instance using `instance` as private directory.
    fn open(&self, instance: &str, shared: &str) -> Result<StateContext, StateError> {
        let instance_dir = self.var.join(instance);
        fs::create_dir_all(&instance_dir).unwrap();
        let macros = HashMap::from([
            ("etcDir".to_string(), path_str(&self.etc)),
            ("varDir".to_string(), path_str(&self.var)),
            ("instanceDir".to_string(), path_str(&instance_dir)),
            ("sharedData".to_string(), shared.to_string()),
        ]);
        StateContext::open(StateOptions {
            conf_file: self.etc.join("autohost.conf"),
            macros,
            lock_retry: None,
        })
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_default_preset_with_inheritance() {
    let fixture = Fixture::new();
    let mut state = fixture.open("bot1", "").unwrap();

    assert_eq!(state.settings().preset(), "team");
    assert_eq!(state.settings().get("teamSize"), Some("4"));
    assert_eq!(state.settings().get("nbTeams"), Some("2"));
    assert_eq!(state.settings().get("lobbyLogin"), Some("TestBot"));

    state.apply_preset("duel").unwrap();
    assert_eq!(state.settings().get("teamSize"), Some("1"));
    assert_eq!(state.settings().preset(), "team");

    state.apply_preset("base").unwrap();
    state.settings_mut().set("teamSize", "6").unwrap();
    assert!(matches!(
        state.settings_mut().set("teamSize", "9"),
        Err(StateError::NotAllowed { .. })
    ));
    assert!(matches!(
        state.apply_preset("missing"),
        Err(StateError::Conf(ConfError::UnknownPreset(_)))
    ));
}

#[test]
fn test_unknown_ban_list_is_fatal() {
    let fixture = Fixture::new();
    fs::write(fixture.etc.join("banLists.conf"), "#?name|banType\n[other]\nX|1\n").unwrap();
    let err = fixture.open("bot1", "").err().unwrap();
    assert!(matches!(err, StateError::Conf(ConfError::UnknownReference(ref names)) if names.len() == 1));
}

#[test]
fn test_unknown_map_list_is_fatal() {
    let fixture = Fixture::new();
    let state = fixture.open("bot1", "").unwrap();
    assert_eq!(state.map_list(), [".*"]);

    fs::write(fixture.etc.join("mapLists.conf"), "[small]\nDelta Siege\n").unwrap();
    let err = fixture.open("bot1", "").err().unwrap();
    match err {
        StateError::Conf(ConfError::UnknownReference(names)) => {
            assert_eq!(names, vec!["base.mapList=all", "duel.mapList=all", "team.mapList=all"])
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_access_and_command_levels() {
    let fixture = Fixture::new();
    let state = fixture.open("bot1", "").unwrap();

    assert_eq!(state.access_level(&field_map([("accountId", "1"), ("name", "Admin")])), 100);
    assert_eq!(state.access_level(&field_map([("accountId", "5"), ("name", "Moderator")])), 50);
    assert_eq!(state.access_level(&field_map([("accountId", "6"), ("name", "Someone")])), 0);

    let voting = field_map([("source", "battle"), ("status", "playing"), ("gameState", "voting")]);
    let levels = state.command_levels("start", &voting).unwrap();
    assert_eq!((levels.direct, levels.vote), (Some(10), Some(0)));
    assert!(state.help("start").is_some());
    assert!(state.help("stop").is_none());
}

#[test]
fn test_static_and_dynamic_bans() {
    let fixture = Fixture::new();
    let mut state = fixture.open("bot1", "").unwrap();

    let griefer = field_map([("accountId", "10"), ("name", "Griefer"), ("ip", "1.2.3.4")]);
    assert_eq!(state.user_ban(&griefer).ban_type, 1);

    let proxied = field_map([("accountId", "11"), ("name", "Bob"), ("ip", "10.66.1.2")]);
    assert_eq!(state.user_ban(&proxied).ban_type, 2);

    assert!(state
        .ban(field_map([("nameOrAccountId", "11")]), BanEffect::new(0, "cheating"))
        .unwrap());
    assert!(!state
        .ban(field_map([("nameOrAccountId", "11")]), BanEffect::new(0, "cheating"))
        .unwrap());
    assert_eq!(state.user_ban(&proxied).ban_type, 0);

    assert_eq!(state.unban(&field_map([("nameOrAccountId", "11")])).unwrap(), 1);
    assert_eq!(state.user_ban(&proxied).ban_type, 2);

    let clean = field_map([("accountId", "12"), ("name", "Alice"), ("ip", "1.2.3.5")]);
    assert!(!state.user_ban(&clean).is_ban());
}

#[test]
fn test_corrupt_ban_file_degrades_to_no_ban() {
    let fixture = Fixture::new();
    let bans_file = fixture.var.join("bot1").join("bans.dat");
    fs::create_dir_all(bans_file.parent().unwrap()).unwrap();
    fs::write(&bans_file, "#?name|banType\nBob\n").unwrap();

    let mut state = fixture.open("bot1", "").unwrap();
    let bob = field_map([("accountId", "30"), ("name", "Bob"), ("ip", "1.2.3.6")]);
    assert!(!state.user_ban(&bob).is_ban());
    assert!(state.bans().is_empty());

    let err = state.ban(field_map([("name", "Eve")]), BanEffect::new(1, "flood")).unwrap_err();
    assert!(matches!(err, StateError::Sync(SyncError::Decode { .. })));
    assert_eq!(fs::read_to_string(&bans_file).unwrap(), "#?name|banType\nBob\n");

    fs::write(&bans_file, "#?name|banType\nBob|1\n").unwrap();
    assert!(state.ban(field_map([("name", "Eve")]), BanEffect::new(1, "flood")).unwrap());
    assert_eq!(state.user_ban(&bob).ban_type, 1);
    assert_eq!(state.bans().len(), 2);
}

#[test]
fn test_game_based_and_expired_bans() {
    let fixture = Fixture::new();
    let mut state = fixture.open("bot1", "").unwrap();

    let mut limited = BanEffect::new(1, "spam");
    limited.remaining_games = Some(2);
    state.ban(field_map([("name", "Spammer")]), limited).unwrap();
    let mut expired = BanEffect::new(1, "old");
    expired.end_date = Some(1);
    state.ban(field_map([("name", "Old")]), expired).unwrap();

    assert_eq!(state.prune_expired_bans().unwrap(), 1);
    assert_eq!(state.decrease_game_based_bans().unwrap(), 0);
    assert_eq!(state.bans().records()[0][1]["remainingGames"], "1");
    assert_eq!(state.decrease_game_based_bans().unwrap(), 1);
    assert!(state.bans().is_empty());
    assert_eq!(state.decrease_game_based_bans().unwrap(), 0);
}

#[test]
fn test_shared_bans_seen_by_sibling_instance() {
    let fixture = Fixture::new();
    let mut first = fixture.open("bot1", "bans").unwrap();
    let mut second = fixture.open("bot2", "bans").unwrap();

    let bob = field_map([("accountId", "20"), ("name", "Bob")]);
    first.ban(field_map([("accountId", "20")]), BanEffect::new(1, "flood")).unwrap();
    assert_eq!(second.user_ban(&bob).ban_type, 1);

    second.unban(&field_map([("accountId", "20")])).unwrap();
    assert!(!first.user_ban(&bob).is_ban());
    assert!(fixture.var.join("bans.dat").exists());
    assert!(!fixture.var.join("bot1").join("bans.dat").exists());
}

#[test]
fn test_preferences_follow_account_id() {
    let fixture = Fixture::new();
    let mut state = fixture.open("bot1", "").unwrap();

    state.set_user_pref(None, "Bob", "voteMode", "away").unwrap();
    assert!(matches!(
        state.set_user_pref(None, "Bob", "voteMode", "sometimes"),
        Err(StateError::InvalidValue { .. })
    ));
    assert!(matches!(
        state.set_user_pref(None, "Bob", "color", "red"),
        Err(StateError::UnknownPreference(_))
    ));

    let prefs = state.user_pref(Some(42), "Bob");
    assert_eq!(prefs["voteMode"], "away");
    assert!(state.user_pref(None, "Bob").is_empty());
    assert_eq!(state.preferences_backend(), "table");
}

#[test]
fn test_map_data_persisted() {
    let fixture = Fixture::new();
    let boxes: Vec<StartBox> = vec!["0 0 40 200".parse().unwrap(), "160 0 200 200".parse().unwrap()];
    {
        let mut state = fixture.open("bot1", "").unwrap();
        state.save_boxes("Delta Siege", &boxes).unwrap();
        state.set_map_hash("105.0", "Delta Siege", "12345").unwrap();
        state
            .cache_map_info(
                "Delta Siege",
                MapInfo {
                    width: 24,
                    height: 24,
                    ..MapInfo::default()
                },
            )
            .unwrap();
        assert!(state.trust_certificate("lobby.example.org", "AB12").unwrap());
    }

    let mut state = fixture.open("bot1", "").unwrap();
    assert_eq!(state.saved_boxes("Delta Siege", 2), Some(boxes));
    assert_eq!(state.map_hash("105.0", "Delta Siege").as_deref(), Some("12345"));
    assert_eq!(state.map_info("Delta Siege").map(|info| info.width), Some(24));
    assert!(state.is_certificate_trusted("lobby.example.org", "ab12"));
    assert!(state.untrust_certificate("lobby.example.org", "ab12").unwrap());
    assert!(!state.is_certificate_trusted("lobby.example.org", "ab12"));
}

#[test]
fn test_user_data_flushed_and_shared() {
    let fixture = Fixture::new();
    let mut first = fixture.open("bot1", "userData").unwrap();
    let mut second = fixture.open("bot2", "userData").unwrap();

    let sighting = |id: &str, name: &str, ip: &str| UserSighting {
        account_id: id.to_string(),
        name: name.to_string(),
        ip: Some(ip.to_string()),
        ..UserSighting::default()
    };
    first.learn_user(sighting("1", "Alice", "10.0.0.1"));
    first.learn_user(sighting("2", "Alt", "10.0.0.1"));
    second.learn_user(sighting("3", "Carol", "10.0.0.3"));

    assert_eq!(first.smurfs("1").accounts[0].len(), 2);
    first.flush_user_data().unwrap();
    second.flush_user_data().unwrap();

    assert_eq!(second.last_ip("1").as_deref(), Some("10.0.0.1"));
    assert_eq!(first.last_ip("3").as_deref(), Some("10.0.0.3"));
    let report = second.smurfs("2");
    assert_eq!(report.accounts[0].len(), 2);
    assert_eq!(first.retention().max_age_days, Some(30));
}

#[test]
fn test_plugin_conf_loaded_from_etc_dir() {
    let fixture = Fixture::new();
    fs::write(
        fixture.etc.join("Greeter.conf"),
        "greeting: Hello %lobbyName%\n[team]\nenabled: 1\n",
    )
    .unwrap();
    let state = fixture.open("bot1", "").unwrap();
    let spec = PluginSpec {
        global: param_spec(&[("greeting", &["notNull"], true)]),
        preset: param_spec(&[("enabled", &["bool"], false)]),
    };
    let conf = state.load_plugin_conf("Greeter", &spec).unwrap();
    assert_eq!(conf.global("greeting"), Some("Hello %lobbyName%"));
    assert_eq!(conf.section("team").and_then(|s| s.first("enabled")), Some("1"));
}
