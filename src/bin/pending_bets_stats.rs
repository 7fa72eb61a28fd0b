use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

fn main() -> Result<()> {
    let db_path = std::env::var("WAGER_PENDING_DB_PATH").unwrap_or_else(|_| "data/pending_bets.db".to_string());
    let conn = Connection::open(&db_path).with_context(|| format!("open db at {db_path}"))?;

    println!("db_path={db_path}");

    let count: i64 = conn
        .query_row("SELECT COUNT(1) FROM pending_bets", [], |r| r.get(0))
        .context("count pending_bets")?;
    let inactive: i64 = conn
        .query_row("SELECT COUNT(1) FROM pending_bets WHERE inactive != 0", [], |r| r.get(0))
        .context("count inactive")?;
    println!("pending_bets: {count} ({inactive} inactive)");

    let oldest: Option<String> = conn
        .query_row("SELECT created_at FROM pending_bets ORDER BY created_at ASC LIMIT 1", [], |r| r.get(0))
        .optional()
        .context("read oldest entry")?;
    println!("oldest: {}", oldest.as_deref().unwrap_or("<none>"));

    let mut stmt = conn.prepare(
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

    for (challenger, bet_amount, inactive, created_at) in rows {
        let flag = if inactive != 0 { " [inactive]" } else { "" };
        println!("  {created_at}  {challenger}  ${bet_amount}{flag}");
    }

    Ok(())
}
