//! Compacted-content snapshots (§3 Snapshot, §4.10 SnapshotHook).
//!
//! A snapshot freezes an issue's content fields at a given compaction level
//! before a compactor is allowed to shrink them in place, so the original
//! text can be recovered later. `apply_compaction` is kept separate from
//! `restore_from_snapshot`: one records that compaction happened, the other
//! undoes it.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use beads_core::content_hash::compute_content_hash;

use crate::error::{Result, StorageError};
use crate::sqlite::dirty::mark_dirty_on_conn;
use crate::sqlite::issues::{format_datetime, get_issue_on_conn, parse_datetime};
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueSnapshot;

fn scan_snapshot(row: &Row) -> rusqlite::Result<IssueSnapshot> {
    let created_at: String = row.get(6)?;
    Ok(IssueSnapshot {
        issue_id: row.get(0)?,
        level: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        design: row.get(4)?,
        acceptance_criteria: row.get(5)?,
        notes: row.get(7)?,
        created_at: parse_datetime(&created_at),
    })
}

const SNAPSHOT_COLUMNS: &str =
    "issue_id, level, title, description, design, acceptance_criteria, created_at, notes";

pub(crate) fn create_snapshot_on_conn(conn: &Connection, issue_id: &str, level: i32) -> Result<()> {
    let issue = get_issue_on_conn(conn, issue_id)?;
    let now_str = format_datetime(&Utc::now());

    conn.execute(
        "INSERT OR REPLACE INTO issue_snapshots
         (issue_id, level, title, description, design, acceptance_criteria, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            issue_id,
            level,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            now_str,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_snapshots_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<IssueSnapshot>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM issue_snapshots WHERE issue_id = ?1 ORDER BY level ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![issue_id], scan_snapshot)?;
    let mut snapshots = Vec::new();
    for row in rows {
        snapshots.push(row?);
    }
    Ok(snapshots)
}

fn get_snapshot_on_conn(
    conn: &Connection,
    issue_id: &str,
    level: i32,
) -> Result<Option<IssueSnapshot>> {
    let sql =
        format!("SELECT {SNAPSHOT_COLUMNS} FROM issue_snapshots WHERE issue_id = ?1 AND level = ?2");
    conn.query_row(&sql, params![issue_id, level], scan_snapshot)
        .optional()
        .map_err(StorageError::from)
}

/// Overwrites the issue's content fields from the snapshot at `level`,
/// mirroring the single-row content-overwrite idiom used by `close_issue_on_conn`.
pub(crate) fn restore_from_snapshot_on_conn(
    conn: &Connection,
    issue_id: &str,
    level: i32,
) -> Result<()> {
    let snapshot = get_snapshot_on_conn(conn, issue_id, level)?.ok_or_else(|| {
        StorageError::not_found("snapshot", format!("{issue_id}@{level}"))
    })?;

    let now_str = format_datetime(&Utc::now());
    conn.execute(
        "UPDATE issues SET title = ?1, description = ?2, design = ?3, acceptance_criteria = ?4,
         notes = ?5, updated_at = ?6 WHERE id = ?7",
        params![
            snapshot.title,
            snapshot.description,
            snapshot.design,
            snapshot.acceptance_criteria,
            snapshot.notes,
            now_str,
            issue_id,
        ],
    )?;

    let issue = get_issue_on_conn(conn, issue_id)?;
    let hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![hash, issue_id],
    )?;

    mark_dirty_on_conn(conn, issue_id)?;
    Ok(())
}

/// Sets compaction metadata without touching content fields (§4.10).
pub(crate) fn apply_compaction_on_conn(
    conn: &Connection,
    issue_id: &str,
    level: i32,
    original_size: i32,
) -> Result<()> {
    let now_str = format_datetime(&Utc::now());
    let affected = conn.execute(
        "UPDATE issues SET compaction_level = ?1, compacted_at = ?2, original_size = ?3
         WHERE id = ?4",
        params![level, now_str, original_size, issue_id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", issue_id));
    }
    mark_dirty_on_conn(conn, issue_id)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Captures the issue's current content fields at the given compaction level.
    pub fn create_snapshot_impl(&self, issue_id: &str, level: i32) -> Result<()> {
        let conn = self.lock_conn()?;
        create_snapshot_on_conn(&conn, issue_id, level)
    }

    /// Returns snapshots for an issue in ascending level order.
    pub fn get_snapshots_impl(&self, issue_id: &str) -> Result<Vec<IssueSnapshot>> {
        let conn = self.lock_conn()?;
        get_snapshots_on_conn(&conn, issue_id)
    }

    /// Overwrites the issue's content fields from the snapshot at `level`.
    pub fn restore_from_snapshot_impl(&self, issue_id: &str, level: i32) -> Result<()> {
        let conn = self.lock_conn()?;
        restore_from_snapshot_on_conn(&conn, issue_id, level)
    }

    /// Sets compaction metadata without touching content fields.
    pub fn apply_compaction_impl(&self, issue_id: &str, level: i32, original_size: i32) -> Result<()> {
        let conn = self.lock_conn()?;
        apply_compaction_on_conn(&conn, issue_id, level, original_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_snapshots() {
        let store = test_store();
        let issue = IssueBuilder::new("Long issue")
            .id("bd-snap1")
            .description("a very long description")
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store.create_snapshot_impl("bd-snap1", 0).unwrap();

        let snapshots = store.get_snapshots_impl("bd-snap1").unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].level, 0);
        assert_eq!(snapshots[0].description, "a very long description");
    }

    #[test]
    fn restore_from_snapshot_overwrites_content() {
        let store = test_store();
        let issue = IssueBuilder::new("Original title")
            .id("bd-snap2")
            .description("original description")
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.create_snapshot_impl("bd-snap2", 0).unwrap();

        store
            .update_issue_impl(
                "bd-snap2",
                &crate::traits::IssueUpdates {
                    description: Some("compacted".to_string()),
                    ..Default::default()
                },
                "bot",
            )
            .unwrap();
        assert_eq!(
            store.get_issue_impl("bd-snap2").unwrap().description,
            "compacted"
        );

        store.restore_from_snapshot_impl("bd-snap2", 0).unwrap();
        let restored = store.get_issue_impl("bd-snap2").unwrap();
        assert_eq!(restored.description, "original description");
    }

    #[test]
    fn restore_missing_snapshot_not_found() {
        let store = test_store();
        let issue = IssueBuilder::new("No snapshot").id("bd-snap3").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let err = store.restore_from_snapshot_impl("bd-snap3", 0).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn apply_compaction_sets_metadata_only() {
        let store = test_store();
        let issue = IssueBuilder::new("Compactable")
            .id("bd-snap4")
            .description("keep me")
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store.apply_compaction_impl("bd-snap4", 1, 4096).unwrap();

        let after = store.get_issue_impl("bd-snap4").unwrap();
        assert_eq!(after.compaction_level, 1);
        assert_eq!(after.original_size, Some(4096));
        assert_eq!(after.description, "keep me");
    }
}
