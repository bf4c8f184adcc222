//! Map related datasets: saved start boxes, map hashes and the map info
//! cache, plus the map lists of `mapLists.conf`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::ConfError;
use crate::shared::{decode_binary, decode_text, encode_binary, Dataset, StorageKind};
use crate::table::{FastTable, LeafMap};

/// Start box in map coordinates scaled to 0..=200.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBox {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl fmt::Display for StartBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.left, self.top, self.right, self.bottom)
    }
}

impl FromStr for StartBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coords: Vec<u16> = s
            .split_whitespace()
            .map(|c| c.parse::<u16>().map_err(|e| format!("Invalid coordinate \"{c}\": {e}")))
            .collect::<Result<_, _>>()?;
        match coords.as_slice() {
            [left, top, right, bottom] if left <= right && top <= bottom && *right <= 200 && *bottom <= 200 => {
                Ok(Self {
                    left: *left,
                    top: *top,
                    right: *right,
                    bottom: *bottom,
                })
            }
            _ => Err(format!("Invalid start box \"{s}\"")),
        }
    }
}

fn format_boxes(boxes: &[StartBox]) -> String {
    boxes.iter().map(StartBox::to_string).collect::<Vec<_>>().join(";")
}

fn parse_boxes(raw: &str) -> Result<Vec<StartBox>, String> {
    raw.split(';').filter(|b| !b.trim().is_empty()).map(str::parse).collect()
}

/// Start boxes saved per map and team count (`savedBoxes.dat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBoxes(FastTable);

impl Default for SavedBoxes {
    fn default() -> Self {
        Self(FastTable::new(&["mapName", "nbTeams"], &["boxes"]))
    }
}

impl SavedBoxes {
    pub fn get(&self, map: &str, nb_teams: u32) -> Option<Vec<StartBox>> {
        let leaf = self.0.get(&[map.to_string(), nb_teams.to_string()])?;
        parse_boxes(leaf.get("boxes")?).ok()
    }

    pub fn save(&mut self, map: &str, boxes: &[StartBox]) {
        let leaf: LeafMap = [("boxes".to_string(), format_boxes(boxes))].into();
        self.0.insert(&[map.to_string(), boxes.len().to_string()], leaf);
    }

    pub fn remove(&mut self, map: &str, nb_teams: u32) -> bool {
        self.0.remove(&[map.to_string(), nb_teams.to_string()]).is_some()
    }
}

impl Dataset for SavedBoxes {
    const NAME: &'static str = "savedBoxes";
    const KIND: StorageKind = StorageKind::FastTable;

    fn decode(content: &[u8]) -> Result<Self, String> {
        let table = FastTable::parse(decode_text(content)?.lines(), &["mapName", "nbTeams"], &["boxes"])
            .map_err(|e| e.to_string())?;
        Ok(Self(table))
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        Ok(self.0.write().into_bytes())
    }
}

/// Map checksums per engine version (`mapHashes.dat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapHashes(FastTable);

impl Default for MapHashes {
    fn default() -> Self {
        Self(FastTable::new(&["engineVersion", "mapName"], &["mapHash"]))
    }
}

impl MapHashes {
    pub fn get(&self, engine_version: &str, map: &str) -> Option<&str> {
        self.0
            .get(&[engine_version, map])?
            .get("mapHash")
            .map(String::as_str)
    }

    pub fn set(&mut self, engine_version: &str, map: &str, hash: &str) {
        let leaf: LeafMap = [("mapHash".to_string(), hash.to_string())].into();
        self.0.insert(&[engine_version, map], leaf);
    }
}

impl Dataset for MapHashes {
    const NAME: &'static str = "mapHashes";
    const KIND: StorageKind = StorageKind::FastTable;

    fn decode(content: &[u8]) -> Result<Self, String> {
        let table = FastTable::parse(decode_text(content)?.lines(), &["engineVersion", "mapName"], &["mapHash"])
            .map_err(|e| e.to_string())?;
        Ok(Self(table))
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        Ok(self.0.write().into_bytes())
    }
}

/// Cached metadata of a map archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapInfo {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub start_positions: Vec<(f32, f32)>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Map metadata by map name (`mapInfoCache.dat`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapInfoCache(BTreeMap<String, MapInfo>);

impl MapInfoCache {
    pub fn get(&self, map: &str) -> Option<&MapInfo> {
        self.0.get(map)
    }

    pub fn insert(&mut self, map: &str, info: MapInfo) {
        self.0.insert(map.to_string(), info);
    }

    pub fn remove(&mut self, map: &str) -> Option<MapInfo> {
        self.0.remove(map)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Dataset for MapInfoCache {
    const NAME: &'static str = "mapInfoCache";
    const KIND: StorageKind = StorageKind::Binary;

    fn decode(content: &[u8]) -> Result<Self, String> {
        decode_binary(content).map(Self)
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        encode_binary(&self.0)
    }
}

/// Map lists of `mapLists.conf`: `[name]` headers each followed by one map
/// name pattern per line. A list may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapLists {
    lists: BTreeMap<String, Vec<String>>,
}

impl MapLists {
    pub fn load(path: &Path) -> Result<Self, ConfError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lists = Self::parse(&content);
        debug!(path = %path.display(), lists = lists.lists.len(), "Loaded map lists");
        Ok(lists)
    }

    pub fn parse(content: &str) -> Self {
        let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current: Option<String> = None;
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                let name = name.trim().to_string();
                lists.entry(name.clone()).or_default();
                current = Some(name);
            } else if let Some(name) = &current {
                lists.entry(name.clone()).or_default().push(line.to_string());
            }
        }
        Self { lists }
    }

    pub fn list_names(&self) -> Vec<String> {
        self.lists.keys().cloned().collect()
    }

    pub fn patterns(&self, list: &str) -> &[String] {
        self.lists.get(list).map(Vec::as_slice).unwrap_or_default()
    }
}
