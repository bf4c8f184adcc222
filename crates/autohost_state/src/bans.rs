//! Static ban lists and dynamic bans.
//!
//! A ban is a `(filter, effect)` record. The filter selects users with the
//! usual matching rules; the effect carries the ban type (lower is
//! stronger), an optional validity window, an optional number of remaining
//! games and a reason.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::constants::bans::{EFFECT_FIELDS, FILTER_FIELDS, NO_BAN};
use crate::error::ConfError;
use crate::matching::filter_matches;
use crate::shared::{decode_text, Dataset, StorageKind};
use crate::table::{field_map, parse_table, read_table_file, write_table, FieldMap, FieldPattern, Record, Table};

/// Effect part of a ban record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEffect {
    pub ban_type: u8,
    /// Unix timestamp from which the ban applies
    pub start_date: Option<i64>,
    /// Unix timestamp after which the ban no longer applies
    pub end_date: Option<i64>,
    pub remaining_games: Option<u32>,
    pub reason: String,
}

impl BanEffect {
    pub fn new(ban_type: u8, reason: impl Into<String>) -> Self {
        Self {
            ban_type,
            start_date: None,
            end_date: None,
            remaining_games: None,
            reason: reason.into(),
        }
    }

    /// The effect returned when no ban applies.
    pub fn none() -> Self {
        Self::new(NO_BAN, "")
    }

    pub fn is_ban(&self) -> bool {
        self.ban_type < NO_BAN
    }

    pub fn from_fields(fields: &FieldMap) -> Self {
        let get = |name: &str| fields.get(name).map(String::as_str).filter(|v| !v.is_empty());
        Self {
            ban_type: get("banType").and_then(|v| v.parse().ok()).unwrap_or(0),
            start_date: get("startDate").and_then(|v| v.parse().ok()),
            end_date: get("endDate").and_then(|v| v.parse().ok()),
            remaining_games: get("remainingGames").and_then(|v| v.parse().ok()),
            reason: get("reason").unwrap_or_default().to_string(),
        }
    }

    pub fn to_fields(&self) -> FieldMap {
        let optional = |value: Option<String>| value.unwrap_or_default();
        field_map([
            ("banType", self.ban_type.to_string()),
            ("startDate", optional(self.start_date.map(|d| d.to_string()))),
            ("endDate", optional(self.end_date.map(|d| d.to_string()))),
            ("remainingGames", optional(self.remaining_games.map(|g| g.to_string()))),
            ("reason", self.reason.clone()),
        ])
    }

    /// Whether the ban applies at `now`.
    pub fn is_active(&self, now: i64) -> bool {
        self.start_date.map_or(true, |start| start <= now) && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.end_date.is_some_and(|end| end < now)
    }

    /// Equality used for duplicate detection: two start dates that are both
    /// in the past compare equal.
    fn same_as(&self, other: &BanEffect, now: i64) -> bool {
        let started = |date: Option<i64>| date.map_or(true, |d| d <= now);
        let same_start = self.start_date == other.start_date || (started(self.start_date) && started(other.start_date));
        same_start
            && self.ban_type == other.ban_type
            && self.end_date == other.end_date
            && self.remaining_games == other.remaining_games
            && self.reason == other.reason
    }
}

fn ban_pattern() -> FieldPattern {
    FieldPattern::from_fields(&[FILTER_FIELDS, EFFECT_FIELDS])
}

fn non_empty(fields: &FieldMap) -> BTreeMap<&str, &str> {
    fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

/// Subjects to test against ban filters: the `nameOrAccountId` filter
/// field is satisfied by either the name or the account id.
fn ban_subjects(subject: &FieldMap) -> Vec<FieldMap> {
    let mut subjects = Vec::new();
    for key in ["name", "accountId"] {
        if let Some(value) = subject.get(key).filter(|v| !v.is_empty()) {
            let mut extended = subject.clone();
            extended.insert("nameOrAccountId".to_string(), value.clone());
            subjects.push(extended);
        }
    }
    if subjects.is_empty() {
        subjects.push(subject.clone());
    }
    subjects
}

fn record_matches(subject: &FieldMap, record: &Record) -> bool {
    record.first().is_some_and(|filter| {
        ban_subjects(subject)
            .iter()
            .any(|candidate| filter_matches(candidate, filter, true))
    })
}

fn effect_of(record: &Record) -> BanEffect {
    record.get(1).map(BanEffect::from_fields).unwrap_or_else(BanEffect::none)
}

/// Lowest active ban among `records` matching `subject`.
fn strongest<'r>(subject: &FieldMap, records: impl Iterator<Item = &'r Record>, now: i64) -> Option<BanEffect> {
    records
        .filter(|record| record_matches(subject, record))
        .map(effect_of)
        .filter(|effect| effect.is_active(now))
        .min_by_key(|effect| effect.ban_type)
}

/// Static ban lists of `banLists.conf`: section `""` applies everywhere,
/// named sections are selected by the preset `banList` setting.
#[derive(Debug, Clone, Default)]
pub struct BanLists {
    table: Table,
}

impl BanLists {
    pub fn load(path: &Path) -> Result<Self, ConfError> {
        let table = read_table_file(path, &[FILTER_FIELDS, EFFECT_FIELDS])?;
        debug!(path = %path.display(), bans = table.len(), "Loaded ban lists");
        Ok(Self { table })
    }

    pub fn from_table(table: Table) -> Self {
        Self { table }
    }

    /// Names of the selectable lists.
    pub fn list_names(&self) -> Vec<String> {
        self.table
            .section_names()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn records(&self, list: &str) -> &[Record] {
        self.table.section(list)
    }
}

/// Dynamic bans (`bans.dat`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bans {
    table: Table,
}

impl Bans {
    pub fn records(&self) -> &[Record] {
        self.table.records()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Adds a ban unless an identical one exists. Empty filter values are
    /// ignored when comparing filters.
    pub fn ban_user(&mut self, filter: FieldMap, effect: BanEffect, now: i64) -> bool {
        let wanted = non_empty(&filter);
        let duplicate = self.records().iter().any(|record| {
            record.first().is_some_and(|existing| non_empty(existing) == wanted) && effect_of(record).same_as(&effect, now)
        });
        if duplicate {
            debug!(filter = ?wanted, "Ignoring duplicate ban");
            return false;
        }
        info!(filter = ?wanted, ban_type = effect.ban_type, reason = %effect.reason, "Adding ban");
        self.table.records_mut().push(vec![filter, effect.to_fields()]);
        true
    }

    /// Removes every ban whose filter strictly matches `filter`.
    pub fn unban(&mut self, filter: &FieldMap) -> usize {
        let before = self.len();
        self.table
            .records_mut()
            .retain(|record| !record.first().is_some_and(|existing| filter_matches(filter, existing, false)));
        let removed = before - self.len();
        if removed > 0 {
            info!(filter = ?non_empty(filter), removed, "Removed bans");
        }
        removed
    }

    /// Removes bans whose end date passed.
    pub fn remove_expired_bans(&mut self, now: i64) -> usize {
        let before = self.len();
        self.table
            .records_mut()
            .retain(|record| !effect_of(record).is_expired(now));
        before - self.len()
    }

    pub fn has_expired_bans(&self, now: i64) -> bool {
        self.records().iter().any(|record| effect_of(record).is_expired(now))
    }

    /// Counts one game for game-limited bans. A ban that would drop below
    /// one remaining game is removed. Returns the number of removed bans.
    pub fn decrease_game_based_bans(&mut self) -> usize {
        let before = self.len();
        self.table.records_mut().retain_mut(|record| {
            let Some(effect) = record.get_mut(1) else {
                return true;
            };
            let Some(remaining) = effect.get("remainingGames").and_then(|v| v.parse::<u32>().ok()) else {
                return true;
            };
            if remaining <= 1 {
                return false;
            }
            effect.insert("remainingGames".to_string(), (remaining - 1).to_string());
            true
        });
        before - self.len()
    }

    pub fn has_game_based_bans(&self) -> bool {
        self.records().iter().any(|record| effect_of(record).remaining_games.is_some())
    }

    /// Strongest active dynamic ban matching `subject`.
    pub fn matching_ban(&self, subject: &FieldMap, now: i64) -> Option<BanEffect> {
        strongest(subject, self.records().iter(), now)
    }
}

impl Dataset for Bans {
    const NAME: &'static str = "bans";
    const KIND: StorageKind = StorageKind::Table;

    fn decode(content: &[u8]) -> Result<Self, String> {
        let text = decode_text(content)?;
        let table = parse_table(text.lines(), &[FILTER_FIELDS, EFFECT_FIELDS]).map_err(|e| e.to_string())?;
        Ok(Self { table })
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        Ok(write_table(&self.table, &ban_pattern()).into_bytes())
    }
}

/// Ban decision for `subject`: the lowest ban type among the global static
/// bans, the bans of `list` and the dynamic bans. [`BanEffect::none`] when
/// nothing applies.
pub fn user_ban(subject: &FieldMap, lists: &BanLists, list: &str, dynamic: &Bans, now: i64) -> BanEffect {
    let list_records: &[Record] = if list.is_empty() { &[] } else { lists.records(list) };
    let static_records = lists.records("").iter().chain(list_records);
    [strongest(subject, static_records, now), dynamic.matching_ban(subject, now)]
        .into_iter()
        .flatten()
        .min_by_key(|effect| effect.ban_type)
        .unwrap_or_else(BanEffect::none)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn lists() -> BanLists {
        let header = format!("#?{}|{}", FILTER_FIELDS.join(":"), EFFECT_FIELDS.join(":"));
        let content = format!(
            "{header}\n:Griefer::::::::::|1::::griefing\n[strict]\n::FR:::::::::|2::::region\n:Griefer::::::::::|0::::strict\n"
        );
        BanLists::from_table(parse_table(content.lines(), &[FILTER_FIELDS, EFFECT_FIELDS]).unwrap())
    }

    #[test]
    fn test_lowest_ban_type_wins() {
        let griefer = field_map([("name", "Griefer"), ("accountId", "5"), ("country", "FR")]);
        let dynamic = Bans::default();
        assert_eq!(user_ban(&griefer, &lists(), "", &dynamic, NOW).ban_type, 1);
        assert_eq!(user_ban(&griefer, &lists(), "strict", &dynamic, NOW).ban_type, 0);

        let french = field_map([("name", "Bob"), ("country", "FR")]);
        assert_eq!(user_ban(&french, &lists(), "strict", &dynamic, NOW).ban_type, 2);
        assert!(!user_ban(&french, &lists(), "", &dynamic, NOW).is_ban());
        assert_eq!(user_ban(&french, &lists(), "", &dynamic, NOW).ban_type, NO_BAN);
    }

    #[test]
    fn test_dynamic_ban_types_compared() {
        let mut bans = Bans::default();
        bans.ban_user(field_map([("name", "Bob")]), BanEffect::new(3, "watch"), NOW);
        bans.ban_user(field_map([("name", "Bob")]), BanEffect::new(1, "afk"), NOW);
        let bob = field_map([("name", "Bob")]);
        assert_eq!(bans.matching_ban(&bob, NOW).unwrap().ban_type, 1);
        assert_eq!(user_ban(&bob, &BanLists::default(), "", &bans, NOW).ban_type, 1);
    }

    #[test]
    fn test_name_or_account_id_filter() {
        let mut bans = Bans::default();
        bans.ban_user(field_map([("nameOrAccountId", "77")]), BanEffect::new(0, "alt"), NOW);
        let by_id = field_map([("name", "Someone"), ("accountId", "77")]);
        let other = field_map([("name", "Other"), ("accountId", "78")]);
        assert_eq!(bans.matching_ban(&by_id, NOW).unwrap().reason, "alt");
        assert!(bans.matching_ban(&other, NOW).is_none());
    }

    #[test]
    fn test_duplicate_ban_rejected_with_past_start_dates() {
        let mut bans = Bans::default();
        let mut first = BanEffect::new(0, "cheating");
        first.start_date = Some(NOW - 100);
        let mut second = first.clone();
        second.start_date = Some(NOW - 50);

        assert!(bans.ban_user(field_map([("name", "Bob"), ("country", "")]), first, NOW));
        assert!(!bans.ban_user(field_map([("name", "Bob")]), second.clone(), NOW));

        let mut future = second;
        future.start_date = Some(NOW + 100);
        assert!(bans.ban_user(field_map([("name", "Bob")]), future, NOW));
        assert_eq!(bans.len(), 2);
    }

    #[test]
    fn test_unban_uses_strict_search() {
        let mut bans = Bans::default();
        bans.ban_user(field_map([("name", "Bob")]), BanEffect::new(0, "a"), NOW);
        bans.ban_user(field_map([("name", "~B.*")]), BanEffect::new(0, "b"), NOW);
        bans.ban_user(field_map([("accountId", "9")]), BanEffect::new(0, "c"), NOW);

        assert_eq!(bans.unban(&field_map([("name", "Bob")])), 1);
        assert_eq!(bans.len(), 2);
        assert_eq!(bans.unban(&field_map([("name", "Nobody")])), 0);
    }

    #[test]
    fn test_expired_bans_removed() {
        let mut bans = Bans::default();
        let mut old = BanEffect::new(0, "old");
        old.end_date = Some(NOW - 1);
        let mut current = BanEffect::new(0, "current");
        current.end_date = Some(NOW + 3600);
        bans.ban_user(field_map([("name", "A")]), old, NOW);
        bans.ban_user(field_map([("name", "B")]), current, NOW);

        assert!(bans.matching_ban(&field_map([("name", "A")]), NOW).is_none());
        assert!(bans.has_expired_bans(NOW));
        assert_eq!(bans.remove_expired_bans(NOW), 1);
        assert_eq!(bans.records()[0][1]["reason"], "current");
    }

    #[test]
    fn test_game_based_bans_decrease() {
        let mut bans = Bans::default();
        let mut two = BanEffect::new(1, "two games");
        two.remaining_games = Some(2);
        let mut one = BanEffect::new(1, "one game");
        one.remaining_games = Some(1);
        bans.ban_user(field_map([("name", "A")]), two, NOW);
        bans.ban_user(field_map([("name", "B")]), one, NOW);
        bans.ban_user(field_map([("name", "C")]), BanEffect::new(1, "permanent"), NOW);

        assert_eq!(bans.decrease_game_based_bans(), 1);
        assert_eq!(bans.len(), 2);
        assert_eq!(bans.records()[0][1]["remainingGames"], "1");
        assert_eq!(bans.decrease_game_based_bans(), 1);
        assert!(!bans.has_game_based_bans());
    }

    #[test]
    fn test_encoding_round_trip() {
        let mut bans = Bans::default();
        let mut effect = BanEffect::new(0, "spam");
        effect.end_date = Some(NOW);
        bans.ban_user(field_map([("name", "Bob"), ("ip", "10.0.0.1-10.0.0.9")]), effect.clone(), NOW);

        let decoded = Bans::decode(&bans.encode().unwrap()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(effect_of(&decoded.records()[0]), effect);
        assert_eq!(decoded.records()[0][0]["ip"], "10.0.0.1-10.0.0.9");
    }
}
