//! Per-prefix monotonic identifier allocation (§4.2 IdAllocator).
//!
//! Counters are lazily initialised: the first allocation for a prefix scans
//! the `issues` table for the current maximum suffix rather than requiring a
//! separate seeding step. Once a counter row exists, allocation is a single
//! atomic `UPDATE ... RETURNING`.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Allocates the next identifier for `prefix`, lazily initialising the
/// counter from the current maximum suffix in `issues` if none exists yet.
pub(crate) fn allocate_id_on_conn(conn: &Connection, prefix: &str) -> Result<String> {
    let next = increment(conn, prefix)?;
    let next = match next {
        Some(n) => n,
        None => {
            let max = max_existing_suffix(conn, prefix)?;
            conn.execute(
                "INSERT INTO issue_counters (prefix, last_id) VALUES (?1, ?2)",
                params![prefix, max],
            )?;
            increment(conn, prefix)?.expect("counter row was just inserted")
        }
    };
    Ok(format!("{prefix}-{next}"))
}

fn increment(conn: &Connection, prefix: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "UPDATE issue_counters SET last_id = last_id + 1 WHERE prefix = ?1 RETURNING last_id",
            params![prefix],
            |row| row.get(0),
        )
        .optional()?)
}

/// Recomputes every counter from the current maximum suffix per prefix seen
/// in `issues`. Called after bulk import (§4.3 BatchCreate) and as the first
/// step of collision remapping (§4.6 RemapCollisions).
pub(crate) fn sync_all_counters_on_conn(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id FROM issues")?;
    let ids: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut max_by_prefix: HashMap<String, i64> = HashMap::new();
    for id in ids {
        if let Some((prefix, n)) = split_identifier(&id) {
            let entry = max_by_prefix.entry(prefix).or_insert(0);
            if n > *entry {
                *entry = n;
            }
        }
    }

    for (prefix, max) in max_by_prefix {
        upsert_counter(conn, &prefix, max)?;
    }
    Ok(())
}

/// Recomputes the counter for `prefix` after a delete, removing the counter
/// row entirely if no issues with that prefix remain (§4.2 SyncOnDelete).
pub(crate) fn sync_on_delete_on_conn(conn: &Connection, prefix: &str) -> Result<()> {
    let remaining: i64 = conn.query_row(
        "SELECT COUNT(*) FROM issues WHERE id LIKE ?1",
        params![format!("{prefix}-%")],
        |row| row.get(0),
    )?;
    if remaining == 0 {
        conn.execute(
            "DELETE FROM issue_counters WHERE prefix = ?1",
            params![prefix],
        )?;
        return Ok(());
    }
    let max = max_existing_suffix(conn, prefix)?;
    upsert_counter(conn, prefix, max)
}

fn upsert_counter(conn: &Connection, prefix: &str, last_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO issue_counters (prefix, last_id) VALUES (?1, ?2)
         ON CONFLICT(prefix) DO UPDATE SET last_id = excluded.last_id",
        params![prefix, last_id],
    )?;
    Ok(())
}

fn max_existing_suffix(conn: &Connection, prefix: &str) -> Result<i64> {
    let like_pattern = format!("{prefix}-%");
    let mut stmt = conn.prepare("SELECT id FROM issues WHERE id LIKE ?1")?;
    let ids: Vec<String> = stmt
        .query_map(params![like_pattern], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut max = 0i64;
    let needle = format!("{prefix}-");
    for id in ids {
        if let Some(rest) = id.strip_prefix(&needle) {
            if let Ok(n) = rest.parse::<i64>() {
                if rest == n.to_string() && n > max {
                    max = n;
                }
            }
        }
    }
    Ok(max)
}

/// Splits `prefix-N` into `(prefix, N)`. Returns `None` for identifiers that
/// don't follow the canonical, non-zero-padded form.
pub(crate) fn split_identifier(id: &str) -> Option<(String, i64)> {
    let idx = id.find('-')?;
    let (prefix, rest) = id.split_at(idx);
    let rest = &rest[1..];
    let n: i64 = rest.parse().ok()?;
    if n.to_string() != rest {
        return None;
    }
    Some((prefix.to_string(), n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;

    #[test]
    fn allocates_sequentially() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let a = allocate_id_on_conn(&conn, "bd").unwrap();
        let b = allocate_id_on_conn(&conn, "bd").unwrap();
        assert_eq!(a, "bd-1");
        assert_eq!(b, "bd-2");
    }

    #[test]
    fn lazily_initialises_from_existing_max() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        conn.execute(
            "INSERT INTO issues (id, title) VALUES ('bd-7', 'seed')",
            [],
        )
        .unwrap();
        let next = allocate_id_on_conn(&conn, "bd").unwrap();
        assert_eq!(next, "bd-8");
    }

    #[test]
    fn split_identifier_rejects_zero_padded() {
        assert_eq!(split_identifier("bd-01"), None);
        assert_eq!(split_identifier("bd-10"), Some(("bd".to_string(), 10)));
    }

    #[test]
    fn sync_on_delete_removes_counter_when_prefix_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        allocate_id_on_conn(&conn, "bd").unwrap();
        sync_on_delete_on_conn(&conn, "bd").unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM issue_counters WHERE prefix = 'bd'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    /// 20 concurrent connections to the same on-disk database each create one
    /// issue with an auto-allocated id; every id must be distinct (§8
    /// scenario 4). Needs a real shared file, not `:memory:`, since each
    /// connection is its own process's stand-in.
    #[test]
    fn concurrent_id_allocation_yields_distinct_ids() {
        use beads_core::issue::IssueBuilder;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concurrent.db");

        {
            let seed = SqliteStore::open(&path).unwrap();
            seed.set_config_impl("issue_prefix", "bd").unwrap();
        }

        let path = Arc::new(path);
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || {
                    let store = SqliteStore::open(path.as_ref()).unwrap();
                    let issue = IssueBuilder::new(format!("Concurrent issue {i}")).build();
                    store.create_issue_impl(&issue, "alice").unwrap()
                })
            })
            .collect();

        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20, "all 20 issues must get distinct ids");
    }
}
