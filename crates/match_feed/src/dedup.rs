//! Tracks the "latest match" across polls and reports only real changes.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::normalize::normalize_batch;
use crate::validate::{classify, ValidatedMatch};

/// Emitted when the newest match identity differs from the last one seen.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLatestMatch {
    pub latest: ValidatedMatch,
    pub previous_hash: Option<String>,
}

#[derive(Debug, Default)]
pub struct MatchFeedDeduplicator {
    last_hash: Option<String>,
    latest: Option<ValidatedMatch>,
}

impl MatchFeedDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the latest match seen so far.
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn latest(&self) -> Option<&ValidatedMatch> {
        self.latest.as_ref()
    }

    /// Feed one tick worth of raw records. `None` = no data or no change.
    pub fn ingest(&mut self, feed: Vec<Value>) -> Option<NewLatestMatch> {
        let total = feed.len();
        let matches: Vec<ValidatedMatch> = normalize_batch(feed).into_iter().map(classify).collect();

        if matches.is_empty() {
            debug!("feed tick: no usable records ({} raw)", total);
            return None;
        }

        let collapsed = collapse_by_identity(matches);
        let newest = pick_newest(collapsed)?;
        let identity = newest.identity();

        if self.last_hash.as_deref() == Some(identity.as_str()) {
            debug!("feed tick: latest match unchanged ({:?})", identity);
            self.latest = Some(newest);
            return None;
        }

        info!(
            "new latest match: id={:?} hash={:?} map={} ({})",
            newest.record.id,
            identity,
            newest.record.map_name(),
            newest.classification.label()
        );

        let previous_hash = self.last_hash.replace(identity);
        self.latest = Some(newest.clone());

        Some(NewLatestMatch {
            latest: newest,
            previous_hash,
        })
    }
}

/// Keep one record per identity: the highest parse iteration, then the highest id.
fn collapse_by_identity(matches: Vec<ValidatedMatch>) -> Vec<ValidatedMatch> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, ValidatedMatch> = HashMap::new();

    for m in matches {
        let key = m.identity();
        let replace = by_key.get(&key).map(|existing| is_newer_parse(&m, existing));
        match replace {
            Some(false) => {}
            Some(true) => {
                by_key.insert(key, m);
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, m);
            }
        }
    }

    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

fn is_newer_parse(candidate: &ValidatedMatch, existing: &ValidatedMatch) -> bool {
    let c = (candidate.record.parse_iteration, candidate.record.id.unwrap_or(i64::MIN));
    let e = (existing.record.parse_iteration, existing.record.id.unwrap_or(i64::MIN));
    c > e
}

fn parse_played_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    // unix epoch, sekundy nebo milisekundy
    if let Ok(n) = raw.parse::<i64>() {
        return if n > 100_000_000_000 {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

fn played_at(m: &ValidatedMatch) -> Option<DateTime<Utc>> {
    parse_played_at(m.record.played_on.as_deref())
        .or_else(|| parse_played_at(m.record.timestamp.as_deref()))
}

/// Newest record: by id when every record has a distinct id, else by
/// played/parsed timestamp when every record has one, else feed order.
pub fn pick_newest(matches: Vec<ValidatedMatch>) -> Option<ValidatedMatch> {
    let ids: Vec<Option<i64>> = matches.iter().map(|m| m.record.id).collect();
    let ids_consistent = ids.iter().all(Option::is_some) && {
        let mut seen: Vec<i64> = ids.iter().flatten().copied().collect();
        seen.sort_unstable();
        seen.windows(2).all(|w| w[0] != w[1])
    };

    if ids_consistent {
        return matches.into_iter().max_by_key(|m| m.record.id);
    }

    if matches.iter().all(|m| played_at(m).is_some()) {
        // max_by_key vrací poslední maximum, feed je newest-first → rev()
        return matches.into_iter().rev().max_by_key(played_at);
    }

    matches.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(id: Option<i64>, hash: &str, iteration: i64) -> Value {
        json!({
            "id": id,
            "replay_hash": hash,
            "parse_iteration": iteration,
            "duration": 1800,
            "players": [
                {"name": "RedLineKey", "winner": true},
                {"name": "You", "winner": false}
            ]
        })
    }

    #[test]
    fn identical_newest_hash_emits_once() {
        let mut dedup = MatchFeedDeduplicator::new();
        let feed = vec![raw(Some(1), "old", 0), raw(Some(2), "new", 0)];

        let first = dedup.ingest(feed.clone()).expect("first poll emits");
        assert_eq!(first.latest.identity(), "new");
        assert_eq!(first.previous_hash, None);

        assert!(dedup.ingest(feed).is_none());
        assert_eq!(dedup.last_hash(), Some("new"));
    }

    #[test]
    fn new_hash_emits_with_previous() {
        let mut dedup = MatchFeedDeduplicator::new();
        dedup.ingest(vec![raw(Some(1), "a", 0)]);
        let next = dedup.ingest(vec![raw(Some(1), "a", 0), raw(Some(2), "b", 0)]).unwrap();
        assert_eq!(next.previous_hash.as_deref(), Some("a"));
        assert_eq!(next.latest.record.id, Some(2));
    }

    #[test]
    fn empty_feed_keeps_previous_latest() {
        let mut dedup = MatchFeedDeduplicator::new();
        dedup.ingest(vec![raw(Some(7), "keep", 0)]);

        assert!(dedup.ingest(vec![]).is_none());
        assert!(dedup.ingest(vec![json!({"id": 8, "players": []})]).is_none());
        assert_eq!(dedup.last_hash(), Some("keep"));
        assert_eq!(dedup.latest().unwrap().record.id, Some(7));
    }

    #[test]
    fn same_replay_keeps_highest_parse_iteration() {
        let collapsed = collapse_by_identity(
            normalize_batch(vec![raw(Some(10), "h", 0), raw(Some(11), "h", 2), raw(Some(12), "h", 1)])
                .into_iter()
                .map(classify)
                .collect(),
        );
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].record.parse_iteration, 2);
    }

    #[test]
    fn without_ids_falls_back_to_played_on() {
        let mut older = raw(None, "older", 0);
        older["played_on"] = json!("2025-03-01T10:00:00");
        let mut newer = raw(None, "newer", 0);
        newer["played_on"] = json!("2025-03-01T12:30:00.250");

        let mut dedup = MatchFeedDeduplicator::new();
        let emitted = dedup.ingest(vec![older, newer]).unwrap();
        assert_eq!(emitted.latest.identity(), "newer");
    }

    #[test]
    fn without_ids_or_times_takes_feed_order() {
        let mut dedup = MatchFeedDeduplicator::new();
        let emitted = dedup
            .ingest(vec![raw(None, "first", 0), raw(None, "second", 0)])
            .unwrap();
        assert_eq!(emitted.latest.identity(), "first");
    }

    #[test]
    fn missing_hash_falls_back_to_id_identity() {
        let mut dedup = MatchFeedDeduplicator::new();
        let mut rec = raw(Some(42), "", 0);
        rec["replay_hash"] = Value::Null;
        let emitted = dedup.ingest(vec![rec.clone()]).unwrap();
        assert_eq!(emitted.latest.identity(), "id:42");
        assert!(dedup.ingest(vec![rec]).is_none());
    }

    #[test]
    fn record_without_hash_or_id_emits_once() {
        let mut rec = raw(None, "", 0);
        rec["replay_hash"] = Value::Null;

        let mut dedup = MatchFeedDeduplicator::new();
        let first = dedup.ingest(vec![rec.clone()]).expect("first poll emits");
        assert!(first.latest.identity().starts_with("fp:"));
        assert!(dedup.ingest(vec![rec.clone()]).is_none());
        assert!(dedup.ingest(vec![rec]).is_none());
        assert_eq!(dedup.last_hash(), Some(first.latest.identity().as_str()));
    }

    #[test]
    fn records_without_hash_or_id_differ_by_content() {
        let mut a = raw(None, "", 0);
        a["replay_hash"] = Value::Null;
        let mut b = a.clone();
        b["duration"] = json!(2400);

        let mut dedup = MatchFeedDeduplicator::new();
        dedup.ingest(vec![a]).unwrap();
        let changed = dedup.ingest(vec![b]).unwrap();
        assert_eq!(changed.latest.record.duration_seconds, 2400);
    }

    #[test]
    fn epoch_timestamps_order_records() {
        let mut older = raw(None, "older", 0);
        older["timestamp"] = json!(1_700_000_000);
        let mut newer = raw(None, "newer", 0);
        newer["timestamp"] = json!(1_700_000_500_000_i64);

        let mut dedup = MatchFeedDeduplicator::new();
        let emitted = dedup.ingest(vec![older, newer]).unwrap();
        assert_eq!(emitted.latest.identity(), "newer");
    }
}
