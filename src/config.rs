use anyhow::{bail, Result};
use bet_lifecycle::{LifecycleTimings, SessionConfig};
use match_feed::{normalize_name, FeedMode};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WagerConfig {
    pub display_name: String,
    pub feed_url: String,
    pub feed_mode: FeedMode,
    pub pending_db_path: PathBuf,
    pub log_dir: PathBuf,
    pub session: SessionConfig,
}

impl WagerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let display_name = get("WAGER_DISPLAY_NAME").unwrap_or_default().trim().to_string();
        if display_name.is_empty() {
            bail!("WAGER_DISPLAY_NAME must be set (in-game name of the local player)");
        }
        if normalize_name(&display_name).is_empty() {
            bail!("WAGER_DISPLAY_NAME must contain letters or digits");
        }

        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                get(key)
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };

        let feed_mode = get("WAGER_FEED_MODE")
            .and_then(|v| FeedMode::parse(&v))
            .unwrap_or_default();

        let defaults = LifecycleTimings::default();
        let timings = LifecycleTimings {
            decline_cooldown: secs("WAGER_DECLINE_COOLDOWN_SECS", defaults.decline_cooldown.as_secs()),
            start_detection: secs("WAGER_START_DETECTION_SECS", defaults.start_detection.as_secs()),
            battle_start: secs("WAGER_BATTLE_START_SECS", defaults.battle_start.as_secs()),
            battle_finish: secs("WAGER_BATTLE_FINISH_SECS", defaults.battle_finish.as_secs()),
            max_result_wait: secs("WAGER_MAX_RESULT_WAIT_SECS", defaults.max_result_wait.as_secs()),
        };

        // 0s interval = busy loop
        let poll_interval = secs("WAGER_POLL_INTERVAL_SECS", 3).max(Duration::from_secs(1));
        let fetch_timeout = secs("WAGER_FETCH_TIMEOUT_SECS", 10).max(Duration::from_secs(1));

        Ok(Self {
            display_name,
            feed_url: get("WAGER_FEED_URL").unwrap_or_else(|| "http://localhost:8002".to_string()),
            feed_mode,
            pending_db_path: get("WAGER_PENDING_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/pending_bets.db")),
            log_dir: get("WAGER_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            session: SessionConfig {
                poll_interval,
                fetch_timeout,
                timings,
            },
        })
    }
}
