//! Where match records come from: the replay parser's `/api/game_stats`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::dedup::{MatchFeedDeduplicator, NewLatestMatch};

#[async_trait]
pub trait MatchFeedSource: Send + Sync {
    /// Current feed as an unordered list of loose JSON records.
    async fn fetch_feed(&self) -> Result<Vec<Value>>;
}

/// `final` = only finished parses, `latest` = newest parse iteration per replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    #[default]
    Final,
    Latest,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Final => "final",
            FeedMode::Latest => "latest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "final" => Some(FeedMode::Final),
            "latest" => Some(FeedMode::Latest),
            _ => None,
        }
    }
}

pub struct HttpMatchFeed {
    client: reqwest::Client,
    base_url: String,
    mode: FeedMode,
}

impl HttpMatchFeed {
    pub fn new(base_url: impl Into<String>, mode: FeedMode, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("AoE2Wager/1.0")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(base_url, mode, client)
    }

    pub fn with_client(base_url: impl Into<String>, mode: FeedMode, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/game_stats", self.base_url)
    }
}

#[async_trait]
impl MatchFeedSource for HttpMatchFeed {
    async fn fetch_feed(&self) -> Result<Vec<Value>> {
        // ts = cache busting, server i proxy musí vrátit čerstvá data
        let ts = Utc::now().timestamp_millis().to_string();
        let resp = self
            .client
            .get(self.endpoint())
            .query(&[("mode", self.mode.as_str()), ("ts", ts.as_str())])
            .header("Cache-Control", "no-store")
            .header("Pragma", "no-cache")
            .send()
            .await
            .context("game_stats request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let head: String = body.chars().take(200).collect();
            return Err(anyhow!("game_stats HTTP {status}: {head}"));
        }

        let raw = resp.text().await.context("game_stats body read failed")?;
        debug!("game_stats raw (first 300): {}", raw.chars().take(300).collect::<String>());

        let parsed: Value = serde_json::from_str(&raw).context("game_stats JSON parse failed")?;
        match parsed {
            Value::Array(records) => Ok(records),
            other => Err(anyhow!("game_stats is not an array (got {})", json_kind(&other))),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Fetch bounded by `timeout`; a stuck request becomes an error, not a stall.
pub async fn fetch_with_timeout(source: &dyn MatchFeedSource, timeout: Duration) -> Result<Vec<Value>> {
    tokio::time::timeout(timeout, source.fetch_feed())
        .await
        .map_err(|_| anyhow!("feed fetch timed out after {}s", timeout.as_secs_f64()))?
}

/// One-shot `poll()`: fetch → normalize → classify → dedup.
pub struct MatchFeedPoller<S> {
    source: S,
    dedup: MatchFeedDeduplicator,
    timeout: Duration,
}

impl<S: MatchFeedSource> MatchFeedPoller<S> {
    pub fn new(source: S, timeout: Duration) -> Self {
        Self {
            source,
            dedup: MatchFeedDeduplicator::new(),
            timeout,
        }
    }

    pub fn dedup(&self) -> &MatchFeedDeduplicator {
        &self.dedup
    }

    /// Failures are logged and count as "no data this tick".
    pub async fn poll(&mut self) -> Option<NewLatestMatch> {
        match fetch_with_timeout(&self.source, self.timeout).await {
            Ok(feed) => self.dedup.ingest(feed),
            Err(e) => {
                warn!("match feed poll failed: {:#}", e);
                None
            }
        }
    }
}
