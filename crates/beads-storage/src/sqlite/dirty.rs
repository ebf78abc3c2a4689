//! Export dirty-tracking (§3 Dirty-issues, §4.8 DirtyTracker).

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::sqlite::issues::format_datetime;
use crate::sqlite::store::SqliteStore;

pub(crate) fn mark_dirty_on_conn(conn: &Connection, issue_id: &str) -> Result<()> {
    let now_str = format_datetime(&chrono::Utc::now());
    conn.execute(
        "INSERT INTO dirty_issues (issue_id, marked_at) VALUES (?1, ?2)
         ON CONFLICT(issue_id) DO UPDATE SET marked_at = excluded.marked_at",
        params![issue_id, now_str],
    )?;
    Ok(())
}

pub(crate) fn get_dirty_issues_on_conn(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at ASC")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Race-safe: only clears the ids the caller actually observed and exported.
pub(crate) fn clear_dirty_issues_by_id_on_conn(conn: &Connection, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("DELETE FROM dirty_issues WHERE issue_id IN ({placeholders})");
    conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
    Ok(())
}

/// Racy blanket clear: a write landing between the caller's export read and
/// this call is lost. Retained for legacy callers only (§4.8).
pub(crate) fn clear_dirty_issues_on_conn(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM dirty_issues", [])?;
    Ok(())
}

impl SqliteStore {
    pub fn get_dirty_issues_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        get_dirty_issues_on_conn(&conn)
    }

    pub fn clear_dirty_issues_by_id_impl(&self, ids: &[String]) -> Result<()> {
        let conn = self.lock_conn()?;
        clear_dirty_issues_by_id_on_conn(&conn, ids)
    }

    pub fn clear_dirty_issues_impl(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        clear_dirty_issues_on_conn(&conn)
    }
}
