// Stream history: an append-only log of externally played MRLs, capped at
// 100 rows by the limit_history trigger. Replaying a known MRL bumps it to
// the top through the UNIQUE ON CONFLICT REPLACE clause.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::timestamp_now;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub mrl: String,
    pub insertion_date: i64,
}

fn map_entry(row: &Row) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        mrl: row.get(1)?,
        insertion_date: row.get(2)?,
    })
}

pub(crate) fn insert(conn: &Connection, mrl: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO history (mrl, insertion_date) VALUES (?1, ?2)",
        params![mrl, timestamp_now()],
    )?;
    Ok(())
}

/// Most recent first.
pub(crate) fn fetch_all(conn: &Connection) -> Result<Vec<HistoryEntry>> {
    let mut stmt =
        conn.prepare("SELECT id, mrl, insertion_date FROM history ORDER BY id DESC")?;
    let entries = stmt
        .query_map([], map_entry)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub(crate) fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM history", [])?;
    Ok(())
}
