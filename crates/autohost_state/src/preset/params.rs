use super::{param_spec, ParamSpec};

/// Global parameters of the bot configuration file.
pub fn global_params() -> ParamSpec {
    param_spec(&[
        ("lobbyLogin", &["login"], true),
        ("lobbyPassword", &["password"], true),
        ("lobbyHost", &["notNull"], false),
        ("lobbyPort", &["port"], false),
        ("etcDir", &["readableDir"], true),
        ("varDir", &["writableDir"], true),
        ("instanceDir", &["null", "writableDir"], false),
        ("defaultPreset", &["notNull"], true),
        ("sharedData", &["datasetList"], false),
        ("preferencesBackend", &["preferencesBackend"], false),
        ("userDataRetention", &["dataRetention"], false),
        ("logLevel", &["logLevel"], false),
        ("lockRetries", &["nonNullInteger"], false),
        ("lockRetryDelay", &["integer"], false),
        ("lockBlocking", &["bool"], false),
    ])
}

/// Parameters of preset sections.
pub fn preset_params() -> ParamSpec {
    param_spec(&[
        ("description", &["notNull"], true),
        ("mapList", &["notNull"], false),
        ("banList", &["null", "notNull"], false),
        ("map", &["null", "notNull"], false),
        ("nbTeams", &["nonNullInteger", "nonNullIntegerRange"], false),
        ("teamSize", &["nonNullInteger", "nonNullIntegerRange"], false),
        ("nbPlayerById", &["nonNullInteger", "nonNullIntegerRange"], false),
        ("minPlayers", &["nonNullInteger", "nonNullIntegerRange"], false),
        ("maxSpecs", &["null", "integer", "integerRange"], false),
        ("voteTime", &["nonNullInteger", "nonNullIntegerRange"], false),
        ("rankMode", &["rankMode"], false),
        ("skillMode", &["skillMode"], false),
        ("hostingPassword", &["null", "password"], false),
    ])
}
