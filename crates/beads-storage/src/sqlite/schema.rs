//! DDL statements and migrations for the SQLite schema (§6 Persisted state).
//!
//! Timestamps are stored as TEXT in ISO-8601 format (SQLite has no native
//! datetime type). All `CREATE TABLE`/`CREATE INDEX` statements are
//! idempotent by construction (`IF NOT EXISTS`); column backfills are
//! idempotent by feature-detection rather than by a tracked migration-name
//! row (§4.1).

/// Core DDL statements executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Issues table ----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT NOT NULL DEFAULT '',
        title               TEXT NOT NULL,
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        notes               TEXT NOT NULL DEFAULT '',
        status              TEXT NOT NULL DEFAULT 'open',
        priority            INTEGER NOT NULL DEFAULT 2,
        issue_type          TEXT NOT NULL DEFAULT 'task',
        assignee            TEXT NOT NULL DEFAULT '',
        estimated_minutes   INTEGER,
        external_ref        TEXT UNIQUE,
        created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        closed_at           TEXT,
        close_reason        TEXT NOT NULL DEFAULT '',
        compaction_level    INTEGER NOT NULL DEFAULT 0,
        compacted_at        TEXT,
        original_size       INTEGER,
        compacted_at_commit TEXT,
        source_repo         TEXT NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at)",
    // -- Dependencies table (§3 Dependency, §4.4) -------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type          TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by    TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id, type),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
        FOREIGN KEY (depends_on_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, type)",
    // -- Labels table (§3 Label, §4.9) -------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label    TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Events table (§3 Event, §4.7) -------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id    TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        actor       TEXT NOT NULL DEFAULT '',
        old_value   TEXT,
        new_value   TEXT,
        comment     TEXT,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Counters table (§3 Counter, §4.2 IdAllocator) ---------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issue_counters (
        prefix  TEXT PRIMARY KEY,
        last_id INTEGER NOT NULL
    )
    "#,
    // -- Dirty-issues table (§3 Dirty-issues, §4.8) ------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dirty_issues (
        issue_id  TEXT PRIMARY KEY,
        marked_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Export-hashes table (§3 Export-hash) ------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS export_hashes (
        issue_id     TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        exported_at  TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Config table (§6 Configuration) ------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata table (internal engine bookkeeping, outside the config namespace)
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Issue-snapshots table (§3 Snapshot, §4.10 SnapshotHook) -----------------
    r#"
    CREATE TABLE IF NOT EXISTS issue_snapshots (
        issue_id            TEXT NOT NULL,
        level               INTEGER NOT NULL,
        title               TEXT NOT NULL,
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        notes               TEXT NOT NULL DEFAULT '',
        created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        PRIMARY KEY (issue_id, level),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Repo-mtimes table (multi-repo hydration hook, out of core scope) --------
    r#"
    CREATE TABLE IF NOT EXISTS repo_mtimes (
        repo  TEXT PRIMARY KEY,
        mtime TEXT NOT NULL
    )
    "#,
    // -- Child-counters table (epic child-count cache, out of core scope) --------
    r#"
    CREATE TABLE IF NOT EXISTS child_counters (
        parent_id       TEXT PRIMARY KEY,
        total_children  INTEGER NOT NULL DEFAULT 0,
        closed_children INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (parent_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
];

/// Default configuration values inserted on first init (§6 Configuration).
///
/// `issue_prefix` is left unset here; callers must set it via `SetConfig`
/// before creating issues (§3 invariant: "for any non-empty database, a
/// configuration row with key `issue_prefix` exists").
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("compaction_enabled", "false"),
    ("compact_tier1_days", "30"),
    ("compact_tier2_days", "90"),
    ("sort_policy_default", "hybrid"),
];

/// Backfill migrations, applied after the base DDL. Each is re-runnable with
/// no effect after the first: it checks the condition it would otherwise
/// fix, rather than relying on a recorded migration name (§4.1).
pub fn run_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    backfill_content_hash(conn)?;
    Ok(())
}

/// Recomputes `content_hash` for any issue row where it is still empty.
///
/// Demonstrates the feature-detection idempotency model: once every row has
/// a non-empty hash, the `WHERE content_hash = ''` scan matches nothing and
/// the migration is a no-op on every subsequent run.
fn backfill_content_hash(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    use beads_core::content_hash::compute_content_hash;
    use beads_core::enums::{IssueType, Status};
    use beads_core::issue::Issue;

    let mut stmt = conn.prepare(
        "SELECT id, title, description, design, acceptance_criteria, notes, status, \
         priority, issue_type, assignee, external_ref \
         FROM issues WHERE content_hash = ''",
    )?;
    let rows: Vec<(String, String, String, String, String, String, String, i32, String, String, Option<String>)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (id, title, description, design, acceptance_criteria, notes, status, priority, issue_type, assignee, external_ref) in rows {
        let issue = Issue {
            title,
            description,
            design,
            acceptance_criteria,
            notes,
            status: Status::from(status),
            priority,
            issue_type: IssueType::from(issue_type),
            assignee,
            external_ref,
            ..Issue::default()
        };
        let hash = compute_content_hash(&issue);
        conn.execute(
            "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
            rusqlite::params![hash, id],
        )?;
    }
    Ok(())
}
