//! Invariant checker (§4.11).
//!
//! Brackets every migration run with a row-count snapshot and validates the
//! post-state against the pre-state and the general invariants of §3.

use rusqlite::Connection;

use crate::error::Result;
use crate::sqlite::store::SqliteStore;
use crate::traits::{InvariantReport, InvariantSnapshot};

/// Captures row counts used to bracket a migration run.
///
/// Tolerant of a fresh database where the tables do not exist yet (first
/// boot, before `SCHEMA_STATEMENTS` has run): missing tables count as zero.
pub fn snapshot_on_conn(conn: &Connection) -> Result<InvariantSnapshot> {
    Ok(InvariantSnapshot {
        issue_count: count_if_exists(conn, "issues")?,
        dependency_count: count_if_exists(conn, "dependencies")?,
        label_count: count_if_exists(conn, "labels")?,
    })
}

fn count_if_exists(conn: &Connection, table: &str) -> Result<i64> {
    let exists: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        rusqlite::params![table],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(0);
    }
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Runs the checks of §4.11 against the given pre-migration snapshot.
pub fn check_on_conn(conn: &Connection, pre: &InvariantSnapshot) -> Result<InvariantReport> {
    let post = snapshot_on_conn(conn)?;

    let foreign_keys_valid = foreign_keys_valid(conn)?;
    let issue_count_stable = post.issue_count >= pre.issue_count;
    let required_config_present = required_config_present(conn, post.issue_count)?;

    Ok(InvariantReport {
        foreign_keys_valid,
        issue_count_stable,
        required_config_present,
    })
}

/// Every dependency endpoint, every label's issue, every snapshot's issue exists.
fn foreign_keys_valid(conn: &Connection) -> Result<bool> {
    // `PRAGMA foreign_key_check` yields one row per violation found.
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let count = stmt.query_map([], |_| Ok(()))?.count();
    Ok(count == 0)
}

/// If any issue exists, the `issue_prefix` configuration row must be present.
fn required_config_present(conn: &Connection, issue_count: i64) -> Result<bool> {
    if issue_count == 0 {
        return Ok(true);
    }
    let present: i32 = conn.query_row(
        "SELECT COUNT(*) FROM config WHERE key = 'issue_prefix'",
        [],
        |row| row.get(0),
    )?;
    Ok(present > 0)
}

impl SqliteStore {
    /// Captures row counts used to bracket a migration run.
    pub fn invariant_snapshot_impl(&self) -> Result<InvariantSnapshot> {
        let conn = self.lock_conn()?;
        snapshot_on_conn(&conn)
    }

    /// Runs the checks of §4.11 against the given pre-migration snapshot.
    pub fn check_invariants_impl(&self, pre: &InvariantSnapshot) -> Result<InvariantReport> {
        let conn = self.lock_conn()?;
        check_on_conn(&conn, pre)
    }
}
