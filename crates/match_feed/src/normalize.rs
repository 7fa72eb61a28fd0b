//! Raw → canonical. This is the only place that branches on whether a
//! field arrived structured or double-encoded.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use crate::record::{Loose, MapInfo, MatchRecord, PlayerResult, RawMatchRecord};

/// Decode a field that may be a JSON-encoded string.
///
/// A string that does not decode into `T` is kept verbatim as `Loose::Bare`.
/// A non-string value that does not fit `T` yields `None`.
pub fn decode_loose<T: DeserializeOwned>(value: Value) -> Option<Loose<T>> {
    match value {
        Value::Null => None,
        Value::String(s) => match serde_json::from_str::<T>(&s) {
            Ok(v) => Some(Loose::Structured(v)),
            Err(_) => Some(Loose::Bare(s)),
        },
        other => serde_json::from_value::<T>(other).ok().map(Loose::Structured),
    }
}

/// `"<GameType.RM: 'VER 9.4'>"` → `"VER 9.4"`; anything else unchanged.
pub fn clean_game_type(raw: &str) -> String {
    static VER_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VER_RE.get_or_init(|| Regex::new(r"'(VER.*?)'").ok());
    re.as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// `"Version.DE"` → `"DE"`; non-string versions are rendered as JSON text.
pub fn clean_game_version(raw: Option<&Value>) -> String {
    match raw {
        Some(Value::String(s)) => s.replace("Version.", ""),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}


// ── Scalar coercion ──────────────────────────────────────────────────────────

/// String as-is, `null` → `""`, anything else as JSON text.
pub(crate) fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Like `scalar_text`, but missing / `null` / blank → `None`.
pub(crate) fn coerce_text(raw: Option<&Value>) -> Option<String> {
    raw.map(scalar_text).filter(|s| !s.trim().is_empty())
}

/// Integer from a number (fractions truncated) or a numeric string.
pub(crate) fn coerce_i64(raw: Option<&Value>) -> Option<i64> {
    match raw? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

/// `true`/`false`, `1`/`0`, `"true"`/`"1"`/`"yes"`…; anything else → `None`.
pub(crate) fn coerce_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Canonicalize one record. `None` means the record has no usable players
/// and is dropped from the batch.
pub fn normalize(raw: RawMatchRecord) -> Option<MatchRecord> {
    let players = match raw.players.and_then(decode_loose::<Vec<PlayerResult>>) {
        Some(Loose::Structured(players)) if !players.is_empty() => players,
        Some(Loose::Structured(_)) => {
            debug!("record {:?} dropped: empty players", raw.id);
            return None;
        }
        Some(Loose::Bare(_)) => {
            debug!("record {:?} dropped: players string not decodable", raw.id);
            return None;
        }
        None => {
            debug!("record {:?} dropped: players missing", raw.id);
            return None;
        }
    };

    let map = raw
        .map
        .and_then(decode_loose::<MapInfo>)
        .unwrap_or(Loose::Bare(String::new()));

    Some(MatchRecord {
        id: coerce_i64(raw.id.as_ref()),
        replay_hash: coerce_text(raw.replay_hash.as_ref()),
        parse_iteration: coerce_i64(raw.parse_iteration.as_ref()).unwrap_or(0),
        is_final: raw.is_final.as_ref().and_then(coerce_flag).unwrap_or(false),
        game_version: clean_game_version(raw.game_version.as_ref()),
        map,
        game_type: clean_game_type(&raw.game_type.as_ref().map(scalar_text).unwrap_or_default()),
        duration_seconds: coerce_i64(raw.duration.as_ref()).unwrap_or(0),
        players,
        timestamp: coerce_text(raw.timestamp.as_ref()),
        played_on: coerce_text(raw.played_on.as_ref()),
        winner_hint: coerce_text(raw.winner.as_ref()),
    })
}

/// Deserialize and canonicalize one feed entry; malformed entries are dropped.
pub fn normalize_value(value: Value) -> Option<MatchRecord> {
    match serde_json::from_value::<RawMatchRecord>(value) {
        Ok(raw) => normalize(raw),
        Err(e) => {
            debug!("malformed feed record dropped: {}", e);
            None
        }
    }
}

pub fn normalize_batch(feed: Vec<Value>) -> Vec<MatchRecord> {
    feed.into_iter().filter_map(normalize_value).collect()
}
