//! Testovací binárka pro match feed (replay parser)
//! Spustit: cargo run --bin feed-check
//!
//! Jednou stáhne /api/game_stats, vypíše normalizované + klasifikované zápasy
//! a který z nich by session brala jako "latest match".

use anyhow::Result;
use dotenv::dotenv;
use match_feed::{
    classify, describe_duration, fetch_with_timeout, normalize_batch, FeedMode, HttpMatchFeed, MatchFeedDeduplicator,
};
use std::env;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let feed_url = env::var("WAGER_FEED_URL").unwrap_or_else(|_| "http://localhost:8002".to_string());
    let mode = env::var("WAGER_FEED_MODE")
        .ok()
        .and_then(|v| FeedMode::parse(&v))
        .unwrap_or_default();
    let timeout = Duration::from_secs(
        env::var("WAGER_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10),
    );

    let feed = HttpMatchFeed::new(&feed_url, mode, timeout);
    info!("🩺 Checking {} (mode={})...", feed.endpoint(), mode.as_str());

    let raw = match fetch_with_timeout(&feed, timeout).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Feed fetch failed: {:#}", e);
            return Ok(());
        }
    };

    let records = normalize_batch(raw.clone());
    info!("Feed OK: {} raw records, {} usable", raw.len(), records.len());

    for record in records {
        let m = classify(record);
        let players: Vec<String> = m
            .record
            .players
            .iter()
            .map(|p| {
                let mark = if p.won() { " 🏆" } else { "" };
                format!("{} ({}){}", p.name, p.civilization_label(), mark)
            })
            .collect();
        info!(
            "  id={:?} hash={} iter={} final={} | {} | {} | {} | {} | {}",
            m.record.id,
            m.identity(),
            m.record.parse_iteration,
            m.record.is_final,
            m.record.map_name(),
            m.record.game_type,
            describe_duration(m.effective_duration),
            m.classification.label(),
            players.join(" vs ")
        );
    }

    let mut dedup = MatchFeedDeduplicator::new();
    match dedup.ingest(raw) {
        Some(new) => info!(
            "Latest match: {} ({}, winner={})",
            new.latest.identity(),
            new.latest.classification.label(),
            new.latest.winner_name().unwrap_or("-")
        ),
        None => warn!("No usable latest match in the feed"),
    }

    Ok(())
}
