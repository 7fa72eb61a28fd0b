/// AoE2 Wager — Session
///
/// Co dělá:
///   1. Každé 3s polluje replay parser (`/api/game_stats`) a hlídá nový "latest match"
///   2. Drží jednu sázku: výzva → přijetí/odmítnutí → výsledek nebo refund
///   3. Odmítnuté sázky ukládá do SQLite fronty (data/pending_bets.db)
///   4. Každý přechod sázky loguje do logs/{datum}.jsonl
///
/// Ovládání (stdin):
///   challenge <jméno> <částka>   : vyzvu hráče
///   incoming <jméno> <částka>    : někdo vyzval mě
///   accept | decline | status | quit
///
/// Spuštění:
///   WAGER_DISPLAY_NAME=... cargo run --bin wager-session

mod config;

use anyhow::{Context, Result};
use bet_lifecycle::{spawn_session, BetAction, BetSnapshot, PendingBetStore, SessionContext, SqliteBetStore};
use config::WagerConfig;
use dotenv::dotenv;
use logger::EventLogger;
use match_feed::HttpMatchFeed;
use std::env;
use std::fs::File;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, PartialEq)]
enum Input {
    Action(BetAction),
    Status,
    Quit,
}

/// `<name...> <amount>`; the name may contain spaces.
fn split_name_amount(rest: &str) -> Option<(String, f64)> {
    let (name, amount) = rest.trim().rsplit_once(char::is_whitespace)?;
    let amount = amount.trim_start_matches('$').parse::<f64>().ok()?;
    Some((name.trim().to_string(), amount))
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    match cmd.to_ascii_lowercase().as_str() {
        "challenge" => {
            let (opponent, amount) = split_name_amount(rest)?;
            Some(Input::Action(BetAction::Challenge { opponent, amount }))
        }
        "incoming" => {
            let (challenger, amount) = split_name_amount(rest)?;
            Some(Input::Action(BetAction::ChallengeReceived { challenger, amount }))
        }
        "accept" => Some(Input::Action(BetAction::Accept)),
        "decline" => Some(Input::Action(BetAction::Decline)),
        "status" => Some(Input::Status),
        "quit" | "exit" => Some(Input::Quit),
        _ => None,
    }
}

fn print_snapshot(s: &BetSnapshot) {
    let mut line = format!("[{}]", s.status.as_str());
    if !s.status_text.is_empty() {
        line.push(' ');
        line.push_str(&s.status_text);
    }
    if s.refund {
        line.push_str(" (REFUND)");
    }
    println!("{line}");

    if let Some(m) = &s.latest_match {
        println!(
            "  latest match: {} | {} | {} | winner={} | players={}",
            m.replay_hash.as_deref().unwrap_or("?"),
            m.map,
            m.duration,
            m.winner.as_deref().unwrap_or("-"),
            m.players.join(", ")
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cfg = WagerConfig::from_env()?;

    info!("=== AoE2 Wager Session ===");
    info!("Player: {}", cfg.display_name);
    info!("Feed: {} (mode={})", cfg.feed_url, cfg.feed_mode.as_str());
    info!("Logs: {}/", cfg.log_dir.display());

    // Single instance lock
    let lock_file_path = env::temp_dir().join("aoe2wager_session.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another wager session is already running! Exiting.");
            return Ok(());
        }
    };

    let store = SqliteBetStore::open(&cfg.pending_db_path)
        .with_context(|| format!("pending bet store at {}", cfg.pending_db_path.display()))?;
    match store.restore() {
        Ok(pending) if !pending.is_empty() => {
            info!("Restored {} pending bet(s) from previous sessions", pending.len());
        }
        Ok(_) => {}
        Err(e) => warn!("Pending bet restore failed: {:#}", e),
    }

    let feed = Arc::new(HttpMatchFeed::new(&cfg.feed_url, cfg.feed_mode, cfg.session.fetch_timeout));
    let ctx = SessionContext {
        display_name: cfg.display_name.clone(),
        config: cfg.session.clone(),
        store: Box::new(store),
        logger: EventLogger::new(&cfg.log_dir),
    };
    let handle = spawn_session(ctx, feed);

    // Status změny vypisujeme hned, i ty co přijdou z časovačů / feedu
    let mut status_rx = handle.status();
    let printer = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let snapshot = status_rx.borrow_and_update().clone();
            print_snapshot(&snapshot);
        }
    });

    info!("🚀 READY: challenge <name> <amount> | incoming <name> <amount> | accept | decline | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_input(&line) {
                    Some(Input::Action(action)) => {
                        if let Err(e) = handle.submit(action).await {
                            println!("rejected: {e}");
                        }
                    }
                    Some(Input::Status) => print_snapshot(&handle.current()),
                    Some(Input::Quit) => break,
                    None => println!("unknown command: {}", line.trim()),
                },
                Ok(None) => {
                    info!("stdin closed, shutting down");
                    break;
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            },
        }
    }

    let report = handle.cancel().await?;
    printer.abort();
    info!(
        "Session finished: {} polls ({} failed), {} new matches, bet {}",
        report.polls,
        report.failed_polls,
        report.matches_detected,
        report.final_status.as_str()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions_with_spaced_names() {
        assert_eq!(
            parse_input("challenge Red Line Key $3.5"),
            Some(Input::Action(BetAction::Challenge { opponent: "Red Line Key".to_string(), amount: 3.5 }))
        );
        assert_eq!(
            parse_input("  INCOMING RedLineKey 3 "),
            Some(Input::Action(BetAction::ChallengeReceived { challenger: "RedLineKey".to_string(), amount: 3.0 }))
        );
        assert_eq!(parse_input("accept"), Some(Input::Action(BetAction::Accept)));
        assert_eq!(parse_input("quit"), Some(Input::Quit));
    }

    #[test]
    fn malformed_input_is_not_an_action() {
        assert_eq!(parse_input("challenge RedLineKey"), None);
        assert_eq!(parse_input("challenge RedLineKey lots"), None);
        assert_eq!(parse_input("dance"), None);
    }
}
