//! Match records: loose wire shape vs. canonical shape.
//!
//! Parser služba občas posílá `players` a `map` jako JSON string místo
//! struktury. `RawMatchRecord` to snese, `MatchRecord` už ne.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::normalize::{coerce_flag, coerce_text, scalar_text};

/// Field that is either already structured or still a bare string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Loose<T> {
    Structured(T),
    Bare(String),
}

impl<T> Loose<T> {
    pub fn as_structured(&self) -> Option<&T> {
        match self {
            Loose::Structured(v) => Some(v),
            Loose::Bare(_) => None,
        }
    }
}

// ====================================================================
// Wire shape (parser service JSON)
// ====================================================================

/// Every scalar is kept as a `Value`; the parser is not consistent about
/// types (`"id": "7"`, numeric timestamps, numeric hashes).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMatchRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, alias = "replayHash")]
    pub replay_hash: Option<Value>,
    #[serde(default, alias = "parseIteration")]
    pub parse_iteration: Option<Value>,
    #[serde(default, alias = "isFinal")]
    pub is_final: Option<Value>,
    #[serde(default, alias = "gameVersion")]
    pub game_version: Option<Value>,
    #[serde(default, alias = "mapName")]
    pub map: Option<Value>,
    #[serde(default, alias = "gameType")]
    pub game_type: Option<Value>,
    /// Seconds; number or numeric string.
    #[serde(default, alias = "durationSeconds")]
    pub duration: Option<Value>,
    #[serde(default)]
    pub players: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "playedOn")]
    pub played_on: Option<Value>,
    #[serde(default)]
    pub winner: Option<Value>,
}

// ====================================================================
// Canonical shape
// ====================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_name<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(scalar_text(&Value::deserialize(d)?))
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(coerce_text(Some(&Value::deserialize(d)?)))
}

fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(coerce_flag(&Value::deserialize(d)?))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    /// `null` → empty name; numbers are rendered as text.
    #[serde(default, deserialize_with = "lenient_name")]
    pub name: String,
    #[serde(default)]
    pub civilization: Option<Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub civilization_name: Option<String>,
    /// `true`/`false`, `1`/`0` or their string forms.
    #[serde(default, rename = "winner", alias = "isWinner", deserialize_with = "lenient_flag")]
    pub is_winner: Option<bool>,
    /// Scores, kills, resources, age timings. Not interpreted here.
    #[serde(flatten)]
    pub metrics: Map<String, Value>,
}

impl PlayerResult {
    pub fn won(&self) -> bool {
        self.is_winner.unwrap_or(false)
    }

    pub fn civilization_label(&self) -> String {
        if let Some(name) = self.civilization_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        match &self.civilization {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "?".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub id: Option<i64>,
    pub replay_hash: Option<String>,
    pub parse_iteration: i64,
    pub is_final: bool,
    pub game_version: String,
    pub map: Loose<MapInfo>,
    pub game_type: String,
    /// Raw value from the parser; sanitized only by the validator.
    pub duration_seconds: i64,
    pub players: Vec<PlayerResult>,
    pub timestamp: Option<String>,
    pub played_on: Option<String>,
    pub winner_hint: Option<String>,
}

impl MatchRecord {
    /// Identity used for de-duplication: replay hash, else the numeric id,
    /// else a fingerprint of the whole canonical record.
    pub fn identity(&self) -> String {
        if let Some(hash) = self.replay_hash.as_deref().filter(|h| !h.trim().is_empty()) {
            return hash.to_string();
        }
        if let Some(id) = self.id {
            return format!("id:{id}");
        }
        let mut hasher = DefaultHasher::new();
        serde_json::to_string(self).unwrap_or_default().hash(&mut hasher);
        format!("fp:{:016x}", hasher.finish())
    }

    pub fn map_name(&self) -> String {
        match &self.map {
            Loose::Structured(info) => info.name.clone().unwrap_or_else(|| "?".to_string()),
            Loose::Bare(s) => s.clone(),
        }
    }

    pub fn has_winner(&self) -> bool {
        self.players.iter().any(PlayerResult::won)
    }

    pub fn winner(&self) -> Option<&PlayerResult> {
        self.players.iter().find(|p| p.won())
    }

    pub fn player_names(&self) -> Vec<String> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }
}
