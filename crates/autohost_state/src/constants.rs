//! File names, field lists and other fixed values of the state layer.

/// Dataset file names (relative to the instance or shared directory)
pub mod files {
    pub const BANS: &str = "bans.dat";
    pub const PREFERENCES: &str = "preferences.dat";
    pub const PREFERENCES_SQLITE: &str = "preferences.sqlite";
    pub const SAVED_BOXES: &str = "savedBoxes.dat";
    pub const MAP_HASHES: &str = "mapHashes.dat";
    pub const USER_DATA: &str = "userData.dat";
    pub const MAP_INFO_CACHE: &str = "mapInfoCache.dat";
    pub const TRUSTED_CERTIFICATES: &str = "trustedLobbyCertificates.dat";

    /// Static configuration tables (relative to the etc directory)
    pub const USERS_CONF: &str = "users.conf";
    pub const COMMANDS_CONF: &str = "commands.conf";
    pub const BANS_CONF: &str = "banLists.conf";
    pub const MAP_LISTS_CONF: &str = "mapLists.conf";
    pub const HELP: &str = "help.dat";
}

/// Dataset names accepted by the `sharedData` setting
pub const SHAREABLE_DATASETS: &[&str] = &[
    "bans",
    "savedBoxes",
    "mapHashes",
    "mapInfoCache",
    "trustedLobbyCertificates",
    "preferences",
    "userData",
];

/// Lock acquisition defaults
pub mod lock {
    use std::time::Duration;

    /// Number of non-blocking attempts before giving up
    pub const RETRY_ATTEMPTS: u32 = 10;

    /// Delay between two non-blocking attempts
    pub const RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Busy timeout of the sqlite preference store
    pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Field lists of the ban tables
pub mod bans {
    pub const FILTER_FIELDS: &[&str] = &[
        "accountId",
        "name",
        "country",
        "cpu",
        "rank",
        "access",
        "bot",
        "level",
        "ip",
        "skill",
        "skillUncert",
        "nameOrAccountId",
    ];

    pub const EFFECT_FIELDS: &[&str] = &["banType", "startDate", "endDate", "remainingGames", "reason"];

    /// Ban type returned when no ban applies
    pub const NO_BAN: u8 = 3;
}

/// Field lists of the access tables
pub mod access {
    pub const USER_FIELDS: &[&str] = &[
        "accountId",
        "name",
        "country",
        "cpu",
        "rank",
        "access",
        "bot",
        "auth",
        "ip",
        "skill",
        "skillUncert",
    ];

    pub const LEVEL_FIELDS: &[&str] = &["level"];

    pub const COMMAND_FILTER_FIELDS: &[&str] = &["source", "status", "gameState"];

    pub const COMMAND_LEVEL_FIELDS: &[&str] = &["directLevel", "voteLevel"];
}

/// Preference fields and their value types
pub mod preferences {
    /// Key field of the preference table
    pub const KEY_FIELD: &str = "accountId";

    /// Last known name, stored next to the preferences
    pub const NAME_FIELD: &str = "name";

    pub const FIELDS: &[(&str, &[&str])] = &[
        ("autoSetVoteMode", &["bool"]),
        ("voteMode", &["voteMode"]),
        ("votePvMsgDelay", &["integer"]),
        ("voteRingDelay", &["integer"]),
        ("minRingDelay", &["integer"]),
        ("handleSuggestions", &["bool"]),
        ("password", &["password"]),
        ("rankMode", &["rankMode"]),
        ("skillMode", &["skillMode"]),
        ("shareId", &["notNull"]),
        ("spoofProtection", &["spoofProtection"]),
        ("ircColors", &["bool"]),
        ("clan", &["notNull"]),
    ];
}
