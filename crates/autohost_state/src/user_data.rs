//! Account, IP and name correlation index.
//!
//! Every sighting of a user links its account to the IP address and name it
//! used, with the time of the last sighting. Links are stored in both
//! directions (account to IP and IP to account, same for names) and are
//! always added and removed together.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::{debug, info};

use crate::shared::{decode_text, Dataset, StorageKind};
use crate::table::{FastTable, LeafMap};

const KEY_FIELDS: &[&str] = &["accountId"];
const VALUE_FIELDS: &[&str] = &["country", "rank", "lobbyClient", "timestamp", "ips", "names"];
const SECONDS_PER_DAY: i64 = 86_400;

/// Last seen timestamp by IP address or name.
pub type LastSeen = BTreeMap<String, i64>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub country: String,
    pub rank: String,
    pub lobby_client: String,
    /// Last sighting of the account
    pub timestamp: i64,
    pub ips: LastSeen,
    pub names: LastSeen,
}

/// One observation of a user on the lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSighting {
    pub account_id: String,
    pub name: String,
    pub country: String,
    pub rank: String,
    pub lobby_client: String,
    pub ip: Option<String>,
}

/// Limits applied by [`UserData::prune`]; `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    pub max_age_days: Option<u32>,
    pub max_ips: Option<usize>,
    pub max_names: Option<usize>,
}

impl FromStr for Retention {
    type Err = String;

    /// Parses `age;ips;names` where `-1` means unlimited.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn limit<T: FromStr>(raw: &str) -> Result<Option<T>, String> {
            match raw.trim() {
                "-1" => Ok(None),
                value => value
                    .parse()
                    .map(Some)
                    .map_err(|_| format!("Invalid retention limit \"{value}\"")),
            }
        }
        let parts: Vec<&str> = s.split(';').collect();
        let [age, ips, names] = parts.as_slice() else {
            return Err(format!("Invalid retention \"{s}\", expected age;ips;names"));
        };
        Ok(Self {
            max_age_days: limit(age)?,
            max_ips: limit(ips)?,
            max_names: limit(names)?,
        })
    }
}

/// Related accounts and IPs found from one account, layer by layer.
/// Earlier layers are stronger evidence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmurfReport {
    pub accounts: Vec<Vec<(String, i64)>>,
    pub ips: Vec<Vec<(String, i64)>>,
}

/// Edges removed by [`UserData::prune`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub ips: usize,
    pub names: usize,
    pub accounts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserData {
    accounts: BTreeMap<String, AccountInfo>,
    ips: BTreeMap<String, LastSeen>,
    names: BTreeMap<String, LastSeen>,
}

impl UserData {
    /// Records a sighting at time `now`.
    pub fn learn_user(&mut self, sighting: &UserSighting, now: i64) {
        let id = &sighting.account_id;
        let account = self.accounts.entry(id.clone()).or_default();
        account.country = sighting.country.clone();
        account.rank = sighting.rank.clone();
        account.lobby_client = sighting.lobby_client.clone();
        account.timestamp = now;

        if !sighting.name.is_empty() {
            account.names.insert(sighting.name.clone(), now);
            self.names
                .entry(sighting.name.clone())
                .or_default()
                .insert(id.clone(), now);
        }
        if let Some(ip) = sighting.ip.as_deref().filter(|ip| !ip.is_empty()) {
            account.ips.insert(ip.to_string(), now);
            self.ips.entry(ip.to_string()).or_default().insert(id.clone(), now);
        }
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountInfo> {
        self.accounts.get(account_id)
    }

    pub fn accounts_for_ip(&self, ip: &str) -> Option<&LastSeen> {
        self.ips.get(ip)
    }

    pub fn accounts_for_name(&self, name: &str) -> Option<&LastSeen> {
        self.names.get(name)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Most recently used IP of an account.
    pub fn last_ip(&self, account_id: &str) -> Option<&str> {
        most_recent(&self.accounts.get(account_id)?.ips)
    }

    /// Breadth-first search of accounts sharing IPs with `account_id`.
    ///
    /// Layer 0 holds every account seen on the account's last IP. Each next
    /// step adds the unvisited IPs of the newest accounts, then the
    /// unvisited accounts of those IPs. The search ends when a step brings
    /// no new IP. Layers are sorted by recency, most recent first.
    pub fn smurfs(&self, account_id: &str) -> SmurfReport {
        let mut report = SmurfReport::default();
        let Some(start_ip) = self.last_ip(account_id) else {
            return report;
        };

        let mut visited_ips: BTreeSet<&str> = BTreeSet::from([start_ip]);
        let mut visited_accounts: BTreeSet<&str> = BTreeSet::new();

        let first_accounts: LastSeen = self.ips.get(start_ip).cloned().unwrap_or_default();
        let start_seen = first_accounts.values().copied().max().unwrap_or_default();
        report.ips.push(vec![(start_ip.to_string(), start_seen)]);

        let mut frontier: Vec<&str> = Vec::new();
        for id in self.ips.get(start_ip).into_iter().flat_map(BTreeMap::keys) {
            visited_accounts.insert(id);
            frontier.push(id);
        }
        report.accounts.push(sorted_layer(first_accounts));

        loop {
            let mut ip_layer: LastSeen = BTreeMap::new();
            for id in &frontier {
                let Some(account) = self.accounts.get(*id) else {
                    continue;
                };
                for (ip, seen) in &account.ips {
                    if !visited_ips.contains(ip.as_str()) {
                        merge_latest(&mut ip_layer, ip, *seen);
                    }
                }
            }
            if ip_layer.is_empty() {
                break;
            }

            let mut account_layer: LastSeen = BTreeMap::new();
            for ip in ip_layer.keys() {
                if let Some((ip, accounts)) = self.ips.get_key_value(ip.as_str()) {
                    visited_ips.insert(ip.as_str());
                    for (id, seen) in accounts {
                        if !visited_accounts.contains(id.as_str()) {
                            merge_latest(&mut account_layer, id, *seen);
                        }
                    }
                }
            }

            frontier = account_layer
                .keys()
                .filter_map(|id| self.accounts.get_key_value(id.as_str()).map(|(key, _)| key.as_str()))
                .collect();
            visited_accounts.extend(frontier.iter().copied());

            report.ips.push(sorted_layer(ip_layer));
            report.accounts.push(sorted_layer(account_layer));
        }

        debug!(account = %account_id, layers = report.accounts.len(), "Smurf search done");
        report
    }

    /// Removes links older than the age limit and the oldest links beyond
    /// the count limits, on both sides. Accounts left without any link are
    /// dropped.
    pub fn prune(&mut self, now: i64, retention: &Retention) -> PruneStats {
        let min_seen = retention
            .max_age_days
            .map(|days| now - i64::from(days) * SECONDS_PER_DAY);
        let mut stats = PruneStats::default();

        let mut dropped_ips: Vec<(String, String)> = Vec::new();
        let mut dropped_names: Vec<(String, String)> = Vec::new();
        for (id, account) in &self.accounts {
            for ip in expired(&account.ips, min_seen, retention.max_ips) {
                dropped_ips.push((id.clone(), ip));
            }
            for name in expired(&account.names, min_seen, retention.max_names) {
                dropped_names.push((id.clone(), name));
            }
        }

        for (id, ip) in dropped_ips {
            unlink(&mut self.accounts, &mut self.ips, &id, &ip, |a| &mut a.ips);
            stats.ips += 1;
        }
        for (id, name) in dropped_names {
            unlink(&mut self.accounts, &mut self.names, &id, &name, |a| &mut a.names);
            stats.names += 1;
        }

        let before = self.accounts.len();
        self.accounts
            .retain(|_, account| !account.ips.is_empty() || !account.names.is_empty());
        stats.accounts = before - self.accounts.len();

        if stats != PruneStats::default() {
            info!(ips = stats.ips, names = stats.names, accounts = stats.accounts, "Pruned user data");
        }
        stats
    }

    fn from_table(table: &FastTable) -> Result<Self, String> {
        let mut data = Self::default();
        for (keys, leaf) in table.entries() {
            let id = keys.first().cloned().unwrap_or_default();
            let field = |name: &str| leaf.get(name).cloned().unwrap_or_default();
            let account = AccountInfo {
                country: field("country"),
                rank: field("rank"),
                lobby_client: field("lobbyClient"),
                timestamp: parse_timestamp(&field("timestamp"))?,
                ips: parse_last_seen(&field("ips"))?,
                names: parse_last_seen(&field("names"))?,
            };
            for (ip, seen) in &account.ips {
                data.ips.entry(ip.clone()).or_default().insert(id.clone(), *seen);
            }
            for (name, seen) in &account.names {
                data.names.entry(name.clone()).or_default().insert(id.clone(), *seen);
            }
            data.accounts.insert(id, account);
        }
        Ok(data)
    }

    fn to_table(&self) -> FastTable {
        let mut table = FastTable::new(KEY_FIELDS, VALUE_FIELDS);
        for (id, account) in &self.accounts {
            let leaf: LeafMap = [
                ("country", account.country.clone()),
                ("rank", account.rank.clone()),
                ("lobbyClient", account.lobby_client.clone()),
                ("timestamp", account.timestamp.to_string()),
                ("ips", format_last_seen(&account.ips)),
                ("names", format_last_seen(&account.names)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            table.insert(&[id.as_str()], leaf);
        }
        table
    }
}

impl Dataset for UserData {
    const NAME: &'static str = "userData";
    const KIND: StorageKind = StorageKind::FastTable;

    fn decode(content: &[u8]) -> Result<Self, String> {
        let table = FastTable::parse(decode_text(content)?.lines(), KEY_FIELDS, VALUE_FIELDS).map_err(|e| e.to_string())?;
        Self::from_table(&table)
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        Ok(self.to_table().write().into_bytes())
    }
}

fn most_recent(seen: &LastSeen) -> Option<&str> {
    seen.iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(key, _)| key.as_str())
}

fn merge_latest(layer: &mut LastSeen, key: &str, seen: i64) {
    let slot = layer.entry(key.to_string()).or_insert(seen);
    *slot = (*slot).max(seen);
}

fn sorted_layer(layer: LastSeen) -> Vec<(String, i64)> {
    let mut entries: Vec<(String, i64)> = layer.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
}

/// Keys of `seen` that are older than `min_seen` or beyond the `max_count`
/// most recent.
fn expired(seen: &LastSeen, min_seen: Option<i64>, max_count: Option<usize>) -> Vec<String> {
    let mut by_recency: Vec<(&String, &i64)> = seen.iter().collect();
    by_recency.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    by_recency
        .into_iter()
        .enumerate()
        .filter(|(rank, (_, ts))| min_seen.is_some_and(|min| **ts < min) || max_count.is_some_and(|max| *rank >= max))
        .map(|(_, (key, _))| key.clone())
        .collect()
}

fn unlink(
    accounts: &mut BTreeMap<String, AccountInfo>,
    index: &mut BTreeMap<String, LastSeen>,
    id: &str,
    key: &str,
    side: impl Fn(&mut AccountInfo) -> &mut LastSeen,
) {
    if let Some(account) = accounts.get_mut(id) {
        side(account).remove(key);
    }
    if let Some(linked) = index.get_mut(key) {
        linked.remove(id);
        if linked.is_empty() {
            index.remove(key);
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<i64, String> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse().map_err(|_| format!("Invalid timestamp \"{raw}\""))
}

/// Parses `key=ts,key=ts`.
fn parse_last_seen(raw: &str) -> Result<LastSeen, String> {
    raw.split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, ts) = entry
                .rsplit_once('=')
                .ok_or_else(|| format!("Invalid entry \"{entry}\""))?;
            Ok((key.to_string(), parse_timestamp(ts)?))
        })
        .collect()
}

fn format_last_seen(seen: &LastSeen) -> String {
    seen.iter()
        .map(|(key, ts)| format!("{key}={ts}"))
        .collect::<Vec<_>>()
        .join(",")
}
