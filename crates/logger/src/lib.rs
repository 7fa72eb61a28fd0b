/// AoE2 Wager — Logger
/// JSONL event stream (one file per UTC day)

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Like `log`, but a write failure only ends up in tracing.
    pub fn log_quiet<T: Serialize>(&self, event: &T) {
        if let Err(e) = self.log(event) {
            tracing::warn!("event log write failed ({}): {}", self.log_dir.display(), e);
        }
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event typy ────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct BetTransitionEvent {
    pub ts:          String,
    pub event:       &'static str,   // "BET_TRANSITION"
    pub challenger:  String,
    pub opponent:    String,
    pub bet_amount:  f64,
    pub from:        String,
    pub to:          String,
    pub status_text: String,
    pub refund:      bool,
}

#[derive(Serialize, Debug)]
pub struct MatchDetectedEvent {
    pub ts:                 String,
    pub event:              &'static str,   // "MATCH_DETECTED"
    pub match_id:           Option<i64>,
    pub replay_hash:        Option<String>,
    pub previous_hash:      Option<String>,
    pub map:                String,
    pub classification:     String,         // "valid" | "invalid_refundable"
    pub effective_duration: u64,
    pub winner:             Option<String>,
    pub players:            Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct FeedStatusEvent {
    pub ts:      String,
    pub event:   &'static str,   // "FEED_STATUS"
    pub ok:      bool,
    pub records: usize,
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct PendingBetEvent {
    pub ts:         String,
    pub event:      &'static str,   // "PENDING_BET_QUEUED"
    pub challenger: String,
    pub bet_amount: f64,
    pub inserted:   bool,           // false = klíč už ve frontě byl
}

#[derive(Serialize, Debug)]
pub struct SessionHeartbeatEvent {
    pub ts:                 String,
    pub event:              &'static str,   // "SESSION_HEARTBEAT"
    pub display_name:       String,
    pub phase:              String,         // "START" | "STOP"
    pub poll_interval_secs: u64,
    pub polls:              u64,
    pub matches_detected:   u64,
}
