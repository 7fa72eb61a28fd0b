//! Durable queue of bets that were not played (declined, timed out).

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::bet::PendingBet;

pub trait PendingBetStore: Send {
    /// Insert unless `(challenger, bet_amount)` is already queued.
    /// Returns `true` when a new row was written.
    fn enqueue(&self, bet: &PendingBet) -> Result<bool>;

    fn list(&self) -> Result<Vec<PendingBet>>;

    /// Replace the whole queue in one step.
    fn persist(&self, bets: &[PendingBet]) -> Result<()>;

    fn restore(&self) -> Result<Vec<PendingBet>> {
        self.list()
    }
}

// ====================================================================
// SQLite (per-installation file)
// ====================================================================

pub struct SqliteBetStore {
    conn: Connection,
}

impl SqliteBetStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("open pending bet db at {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .ok();
        conn.pragma_update(None, "synchronous", "NORMAL")
            .ok();

        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory pending bet db")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS pending_bets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            challenger TEXT NOT NULL,
            bet_amount REAL NOT NULL,
            inactive INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(challenger, bet_amount)
        );

        CREATE INDEX IF NOT EXISTS idx_pending_created ON pending_bets(created_at);
        "#,
    ).context("init schema")?;

    Ok(())
}

fn insert_or_ignore(conn: &Connection, bet: &PendingBet) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO pending_bets(challenger, bet_amount, inactive, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            bet.challenger,
            bet.bet_amount,
            if bet.inactive { 1 } else { 0 },
            bet.created_at.to_rfc3339(),
        ],
    )?;
    Ok(changed > 0)
}

impl PendingBetStore for SqliteBetStore {
    fn enqueue(&self, bet: &PendingBet) -> Result<bool> {
        insert_or_ignore(&self.conn, bet).context("enqueue pending bet")
    }

    fn list(&self) -> Result<Vec<PendingBet>> {
        let mut stmt = self.conn.prepare(
            "SELECT challenger, bet_amount, inactive, created_at FROM pending_bets ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read pending bets")?;

        Ok(rows
            .into_iter()
            .map(|(challenger, bet_amount, inactive, created_at)| PendingBet {
                challenger,
                bet_amount,
                inactive: inactive != 0,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    fn persist(&self, bets: &[PendingBet]) -> Result<()> {
        let tx = self.conn.unchecked_transaction().context("begin persist")?;
        tx.execute("DELETE FROM pending_bets", [])?;
        for bet in bets {
            insert_or_ignore(&tx, bet)?;
        }
        tx.commit().context("commit persist")?;
        Ok(())
    }
}

// ====================================================================
// In-memory (tests, ephemeral sessions)
// ====================================================================

/// Cloning shares the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryBetStore {
    bets: Arc<Mutex<Vec<PendingBet>>>,
}

impl MemoryBetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingBetStore for MemoryBetStore {
    fn enqueue(&self, bet: &PendingBet) -> Result<bool> {
        let mut bets = self.bets.lock().map_err(|_| anyhow!("pending bet store lock poisoned"))?;
        if bets.iter().any(|b| b.same_key(bet)) {
            return Ok(false);
        }
        bets.push(bet.clone());
        Ok(true)
    }

    fn list(&self) -> Result<Vec<PendingBet>> {
        let bets = self.bets.lock().map_err(|_| anyhow!("pending bet store lock poisoned"))?;
        Ok(bets.clone())
    }

    fn persist(&self, bets: &[PendingBet]) -> Result<()> {
        let mut deduped: Vec<PendingBet> = Vec::with_capacity(bets.len());
        for bet in bets {
            if !deduped.iter().any(|b| b.same_key(bet)) {
                deduped.push(bet.clone());
            }
        }
        let mut guard = self.bets.lock().map_err(|_| anyhow!("pending bet store lock poisoned"))?;
        *guard = deduped;
        Ok(())
    }
}
