//! Issue CRUD and search (§3 Issue, §4.3 IssueStore).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use beads_core::content_hash::compute_content_hash;
use beads_core::enums::{EventType, IssueType, Status};
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;
use beads_core::validation;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;
use crate::sqlite::{counters, dirty, events};
use crate::traits::IssueUpdates;

pub(crate) const ISSUE_COLUMNS: &str = "id, content_hash, title, description, design, \
     acceptance_criteria, notes, status, priority, issue_type, assignee, estimated_minutes, \
     external_ref, created_at, updated_at, closed_at, close_reason, compaction_level, \
     compacted_at, original_size, compacted_at_commit, source_repo";

pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = "issues.id, issues.content_hash, issues.title, \
     issues.description, issues.design, issues.acceptance_criteria, issues.notes, issues.status, \
     issues.priority, issues.issue_type, issues.assignee, issues.estimated_minutes, \
     issues.external_ref, issues.created_at, issues.updated_at, issues.closed_at, \
     issues.close_reason, issues.compaction_level, issues.compacted_at, issues.original_size, \
     issues.compacted_at_commit, issues.source_repo";

/// Formats a timestamp the way it is stored: ISO-8601 with millisecond precision, UTC.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses a stored timestamp. Falls back to the Unix epoch on malformed
/// input rather than panicking -- rows written by this engine are always
/// well-formed, but this defends against a hand-edited database file.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
}

fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

pub(crate) fn scan_issue(row: &Row) -> rusqlite::Result<Issue> {
    let status: String = row.get(7)?;
    let issue_type: String = row.get(9)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;
    let closed_at: Option<String> = row.get(15)?;
    let compacted_at: Option<String> = row.get(18)?;

    Ok(Issue {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        design: row.get(4)?,
        acceptance_criteria: row.get(5)?,
        notes: row.get(6)?,
        status: Status::from(status),
        priority: row.get(8)?,
        issue_type: IssueType::from(issue_type),
        assignee: row.get(10)?,
        estimated_minutes: row.get(11)?,
        external_ref: row.get(12)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
        closed_at: parse_datetime_opt(closed_at),
        close_reason: row.get(16)?,
        compaction_level: row.get(17)?,
        compacted_at: parse_datetime_opt(compacted_at),
        original_size: row.get(19)?,
        compacted_at_commit: row.get(20)?,
        source_repo: row.get(21)?,
        labels: Vec::new(),
        dependencies: Vec::new(),
        events: Vec::new(),
    })
}

fn fetch_labels(conn: &Connection, id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")?;
    stmt.query_map(params![id], |row| row.get::<_, String>(0))?
        .collect()
}

fn with_labels(conn: &Connection, mut issue: Issue) -> Result<Issue> {
    issue.labels = fetch_labels(conn, &issue.id)?;
    Ok(issue)
}

/// Returns `None` rather than an error when absent; used by callers (e.g.
/// the collision resolver) that need to distinguish "not found" from other
/// failures without matching on the error kind.
pub(crate) fn maybe_get_issue_on_conn(conn: &Connection, id: &str) -> Result<Option<Issue>> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    let issue = conn.query_row(&sql, params![id], scan_issue).optional()?;
    match issue {
        Some(issue) => Ok(Some(with_labels(conn, issue)?)),
        None => Ok(None),
    }
}

pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    maybe_get_issue_on_conn(conn, id)?.ok_or_else(|| StorageError::not_found("issue", id))
}

pub(crate) fn get_issue_by_external_ref_on_conn(
    conn: &Connection,
    external_ref: &str,
) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE external_ref = ?1");
    let issue = conn
        .query_row(&sql, params![external_ref], scan_issue)
        .optional()?
        .ok_or_else(|| StorageError::not_found("issue", external_ref))?;
    with_labels(conn, issue)
}

pub(crate) fn get_issues_by_ids_on_conn(conn: &Connection, ids: &[String]) -> Result<Vec<Issue>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), scan_issue)?
        .collect::<rusqlite::Result<Vec<Issue>>>()?;

    let mut by_id: std::collections::HashMap<String, Issue> =
        rows.into_iter().map(|i| (i.id.clone(), i)).collect();
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(issue) = by_id.remove(id) {
            out.push(with_labels(conn, issue)?);
        }
    }
    Ok(out)
}

/// Classifies a SQLite unique-constraint violation by the conflicting field,
/// sniffing the error message since rusqlite does not expose the column name
/// directly for this error code.
fn classify_unique_violation(err: &rusqlite::Error) -> Option<&'static str> {
    if !matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    ) {
        return None;
    }
    let msg = err.to_string();
    if msg.contains("issues.external_ref") {
        Some("external_ref")
    } else {
        Some("id")
    }
}

/// Inserts a new issue, allocating an identifier from the configured
/// `issue_prefix` if `issue.id` is empty (§4.3 CreateIssue, §4.2 IdAllocator).
pub(crate) fn insert_issue(conn: &Connection, issue: &Issue, actor: &str) -> Result<String> {
    let mut issue = issue.clone();
    issue.set_defaults();

    if issue.id.is_empty() {
        let prefix = crate::sqlite::config::get_config_on_conn(conn, "issue_prefix").map_err(
            |_| {
                StorageError::NotInitialized(
                    "issue_prefix must be configured before creating issues".into(),
                )
            },
        )?;
        issue.id = counters::allocate_id_on_conn(conn, &prefix)?;
    }

    validation::validate(&issue).map_err(|e| StorageError::validation(e.to_string()))?;

    let now = Utc::now();
    issue.content_hash = compute_content_hash(&issue);
    let created_at_str = format_datetime(&issue.created_at);
    let updated_at_str = format_datetime(&now);
    let closed_at_str = issue.closed_at.as_ref().map(format_datetime);
    let compacted_at_str = issue.compacted_at.as_ref().map(format_datetime);

    let result = conn.execute(
        "INSERT INTO issues (
            id, content_hash, title, description, design, acceptance_criteria, notes,
            status, priority, issue_type, assignee, estimated_minutes, external_ref,
            created_at, updated_at, closed_at, close_reason, compaction_level,
            compacted_at, original_size, compacted_at_commit, source_repo
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
        )",
        params![
            issue.id,
            issue.content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            issue.priority,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.estimated_minutes,
            issue.external_ref,
            created_at_str,
            updated_at_str,
            closed_at_str,
            issue.close_reason,
            issue.compaction_level,
            compacted_at_str,
            issue.original_size,
            issue.compacted_at_commit,
            issue.source_repo,
        ],
    );

    match result {
        Ok(_) => {}
        Err(e) => {
            return match classify_unique_violation(&e) {
                Some("external_ref") => Err(StorageError::UniqueViolation {
                    field: "external_ref".into(),
                    value: issue.external_ref.clone().unwrap_or_default(),
                }),
                Some(_) => Err(StorageError::UniqueViolation {
                    field: "id".into(),
                    value: issue.id,
                }),
                None => Err(e.into()),
            };
        }
    }

    events::emit_event(
        conn,
        &issue.id,
        EventType::Created,
        actor,
        None,
        Some(&issue.title),
        None,
        &updated_at_str,
    )?;
    dirty::mark_dirty_on_conn(conn, &issue.id)?;

    Ok(issue.id)
}

pub(crate) fn insert_issues_batch(
    conn: &Connection,
    issues: &[Issue],
    actor: &str,
) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(issues.len());
    for issue in issues {
        ids.push(insert_issue(conn, issue, actor)?);
    }
    counters::sync_all_counters_on_conn(conn)?;
    Ok(ids)
}

/// Applies partial updates (§4.3 UpdateIssue), maintaining the
/// status<->closed_at invariant and emitting one `updated` event per
/// changed field.
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    let old = get_issue_on_conn(conn, id)?;
    let mut new_issue = old.clone();

    if let Some(v) = &updates.title {
        new_issue.title = v.clone();
    }
    if let Some(v) = &updates.description {
        new_issue.description = v.clone();
    }
    if let Some(v) = &updates.design {
        new_issue.design = v.clone();
    }
    if let Some(v) = &updates.acceptance_criteria {
        new_issue.acceptance_criteria = v.clone();
    }
    if let Some(v) = &updates.notes {
        new_issue.notes = v.clone();
    }
    if let Some(v) = &updates.status {
        new_issue.status = v.clone();
    }
    if let Some(v) = updates.priority {
        new_issue.priority = v;
    }
    if let Some(v) = &updates.issue_type {
        new_issue.issue_type = v.clone();
    }
    if let Some(v) = &updates.assignee {
        new_issue.assignee = v.clone();
    }
    if let Some(v) = updates.estimated_minutes {
        new_issue.estimated_minutes = v;
    }
    if let Some(v) = &updates.external_ref {
        new_issue.external_ref = v.clone();
    }
    if let Some(v) = &updates.source_repo {
        new_issue.source_repo = v.clone();
    }

    // status<->closed_at invariant: derive closed_at unless the caller
    // supplied an explicit override (§4.3).
    if let Some(explicit) = &updates.closed_at {
        new_issue.closed_at = explicit.clone();
    } else if updates.status.is_some() {
        let became_closed = new_issue.status == Status::Closed && old.status != Status::Closed;
        let left_closed = old.status == Status::Closed && new_issue.status != Status::Closed;
        if became_closed {
            new_issue.closed_at = Some(Utc::now());
        } else if left_closed {
            new_issue.closed_at = None;
        }
    }

    validation::validate(&new_issue).map_err(|e| StorageError::validation(e.to_string()))?;

    new_issue.updated_at = Utc::now();
    new_issue.content_hash = compute_content_hash(&new_issue);

    let updated_at_str = format_datetime(&new_issue.updated_at);
    let closed_at_str = new_issue.closed_at.as_ref().map(format_datetime);

    conn.execute(
        "UPDATE issues SET
            title = ?1, description = ?2, design = ?3, acceptance_criteria = ?4, notes = ?5,
            status = ?6, priority = ?7, issue_type = ?8, assignee = ?9, estimated_minutes = ?10,
            external_ref = ?11, source_repo = ?12, closed_at = ?13, content_hash = ?14,
            updated_at = ?15
         WHERE id = ?16",
        params![
            new_issue.title,
            new_issue.description,
            new_issue.design,
            new_issue.acceptance_criteria,
            new_issue.notes,
            new_issue.status.as_str(),
            new_issue.priority,
            new_issue.issue_type.as_str(),
            new_issue.assignee,
            new_issue.estimated_minutes,
            new_issue.external_ref,
            new_issue.source_repo,
            closed_at_str,
            new_issue.content_hash,
            updated_at_str,
            id,
        ],
    )?;

    for (field, old_val, new_val) in changed_fields(&old, &new_issue) {
        events::emit_event(
            conn,
            id,
            EventType::Updated,
            actor,
            Some(&format!("{field}:{old_val}")),
            Some(&format!("{field}:{new_val}")),
            None,
            &updated_at_str,
        )?;
    }

    dirty::mark_dirty_on_conn(conn, id)?;
    Ok(())
}

fn changed_fields(old: &Issue, new: &Issue) -> Vec<(&'static str, String, String)> {
    let mut diffs = Vec::new();
    macro_rules! check {
        ($field:ident, $name:expr) => {
            if old.$field != new.$field {
                diffs.push(($name, old.$field.to_string(), new.$field.to_string()));
            }
        };
    }
    check!(title, "title");
    check!(description, "description");
    check!(design, "design");
    check!(acceptance_criteria, "acceptance_criteria");
    check!(notes, "notes");
    if old.status != new.status {
        diffs.push((
            "status",
            old.status.as_str().to_string(),
            new.status.as_str().to_string(),
        ));
    }
    check!(priority, "priority");
    if old.issue_type != new.issue_type {
        diffs.push((
            "issue_type",
            old.issue_type.as_str().to_string(),
            new.issue_type.as_str().to_string(),
        ));
    }
    check!(assignee, "assignee");
    if old.estimated_minutes != new.estimated_minutes {
        diffs.push((
            "estimated_minutes",
            format_opt_i32(old.estimated_minutes),
            format_opt_i32(new.estimated_minutes),
        ));
    }
    if old.external_ref != new.external_ref {
        diffs.push((
            "external_ref",
            old.external_ref.clone().unwrap_or_default(),
            new.external_ref.clone().unwrap_or_default(),
        ));
    }
    check!(source_repo, "source_repo");
    diffs
}

fn format_opt_i32(v: Option<i32>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "UPDATE issues SET status = 'closed', closed_at = ?1, close_reason = ?2, updated_at = ?1
         WHERE id = ?3",
        params![now_str, reason, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    let issue = get_issue_on_conn(conn, id)?;
    let hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![hash, id],
    )?;

    events::emit_event(
        conn,
        id,
        EventType::Closed,
        actor,
        None,
        Some(reason),
        None,
        &now_str,
    )?;
    dirty::mark_dirty_on_conn(conn, id)?;
    Ok(())
}

pub(crate) fn delete_issue_on_conn(conn: &Connection, id: &str) -> Result<()> {
    let prefix = counters::split_identifier(id).map(|(p, _)| p);

    let affected = conn.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    if let Some(prefix) = prefix {
        counters::sync_on_delete_on_conn(conn, &prefix)?;
    }
    Ok(())
}

/// Builds a `LIKE` pattern wrapping `s` in wildcards, escaping its own `%`/`_`.
fn like_pattern(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1 = 1");
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if !query.is_empty() {
        let idx = params_vec.len() + 1;
        sql.push_str(&format!(
            " AND (title LIKE ?{idx} ESCAPE '\\' OR description LIKE ?{idx} ESCAPE '\\')"
        ));
        params_vec.push(Box::new(like_pattern(query)));
    }
    if let Some(status) = &filter.status {
        sql.push_str(&format!(" AND status = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(status.as_str().to_string()));
    }
    if let Some(priority) = filter.priority {
        sql.push_str(&format!(" AND priority = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(priority));
    }
    if let Some(issue_type) = &filter.issue_type {
        sql.push_str(&format!(" AND issue_type = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(issue_type.as_str().to_string()));
    }
    if let Some(assignee) = &filter.assignee {
        sql.push_str(&format!(" AND assignee = ?{}", params_vec.len() + 1));
        params_vec.push(Box::new(assignee.clone()));
    }
    if let Some(title_search) = &filter.title_search {
        sql.push_str(&format!(" AND title LIKE ?{} ESCAPE '\\'", params_vec.len() + 1));
        params_vec.push(Box::new(like_pattern(title_search)));
    }
    if let Some(description_search) = &filter.description_search {
        sql.push_str(&format!(
            " AND description LIKE ?{} ESCAPE '\\'",
            params_vec.len() + 1
        ));
        params_vec.push(Box::new(like_pattern(description_search)));
    }
    for label in &filter.labels {
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{})",
            params_vec.len() + 1
        ));
        params_vec.push(Box::new(label.clone()));
    }
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .map(|l| {
                params_vec.push(Box::new(l.clone()));
                format!("?{}", params_vec.len())
            })
            .collect();
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
    }
    sql.push_str(" ORDER BY created_at DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(refs.as_slice(), scan_issue)?
        .collect::<rusqlite::Result<Vec<Issue>>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for issue in rows {
        out.push(with_labels(conn, issue)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        insert_issue(&conn, issue, actor)
    }

    pub fn create_issues_impl(&self, issues: &[Issue], actor: &str) -> Result<Vec<String>> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        let ids = insert_issues_batch(&tx, issues, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(ids)
    }

    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    pub fn get_issue_by_external_ref_impl(&self, external_ref: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_by_external_ref_on_conn(&conn, external_ref)
    }

    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        get_issues_by_ids_on_conn(&conn, ids)
    }

    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_on_conn(&conn, id, updates, actor)
    }

    pub fn close_issue_impl(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        close_issue_on_conn(&conn, id, reason, actor)
    }

    pub fn delete_issue_impl(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        delete_issue_on_conn(&conn, id)
    }

    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_config_impl("issue_prefix", "bd").unwrap();
        store
    }

    #[test]
    fn create_and_get_round_trip() {
        let store = test_store();
        let issue = IssueBuilder::new("Fix the thing").id("bd-1").build();
        let id = store.create_issue_impl(&issue, "alice").unwrap();
        assert_eq!(id, "bd-1");

        let fetched = store.get_issue_impl("bd-1").unwrap();
        assert_eq!(fetched.title, "Fix the thing");
        assert!(!fetched.content_hash.is_empty());
    }

    #[test]
    fn create_allocates_id_when_empty() {
        let store = test_store();
        let issue = IssueBuilder::new("No id supplied").build();
        let id = store.create_issue_impl(&issue, "alice").unwrap();
        assert_eq!(id, "bd-1");
    }

    #[test]
    fn create_duplicate_id_fails() {
        let store = test_store();
        let issue = IssueBuilder::new("First").id("bd-dup").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let dup = IssueBuilder::new("Second").id("bd-dup").build();
        let err = store.create_issue_impl(&dup, "alice").unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { ref field, .. } if field == "id"));
    }

    #[test]
    fn batch_create_is_atomic_on_failure() {
        let store = test_store();
        let good = IssueBuilder::new("Good").id("bd-b1").build();
        let bad = IssueBuilder::new("").id("bd-b2").build(); // empty title fails validation
        let err = store.create_issues_impl(&[good, bad], "alice");
        assert!(err.is_err());
        assert!(store.get_issue_impl("bd-b1").is_err());
    }

    #[test]
    fn update_title_emits_event_and_recomputes_hash() {
        let store = test_store();
        let issue = IssueBuilder::new("Old title").id("bd-u1").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        let before = store.get_issue_impl("bd-u1").unwrap();

        let updates = IssueUpdates {
            title: Some("New title".into()),
            ..Default::default()
        };
        store.update_issue_impl("bd-u1", &updates, "bob").unwrap();

        let after = store.get_issue_impl("bd-u1").unwrap();
        assert_eq!(after.title, "New title");
        assert_ne!(before.content_hash, after.content_hash);
    }

    #[test]
    fn update_to_closed_sets_closed_at() {
        let store = test_store();
        let issue = IssueBuilder::new("Issue").id("bd-u2").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let updates = IssueUpdates {
            status: Some(Status::Closed),
            ..Default::default()
        };
        store.update_issue_impl("bd-u2", &updates, "bob").unwrap();

        let after = store.get_issue_impl("bd-u2").unwrap();
        assert!(after.closed_at.is_some());
    }

    #[test]
    fn update_away_from_closed_clears_closed_at() {
        let store = test_store();
        let issue = IssueBuilder::new("Issue").id("bd-u3").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.close_issue_impl("bd-u3", "done", "alice").unwrap();

        let updates = IssueUpdates {
            status: Some(Status::Open),
            ..Default::default()
        };
        store.update_issue_impl("bd-u3", &updates, "bob").unwrap();

        let after = store.get_issue_impl("bd-u3").unwrap();
        assert!(after.closed_at.is_none());
    }

    #[test]
    fn close_issue_sets_status_and_reason() {
        let store = test_store();
        let issue = IssueBuilder::new("Issue").id("bd-c1").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.close_issue_impl("bd-c1", "wontfix", "alice").unwrap();

        let after = store.get_issue_impl("bd-c1").unwrap();
        assert_eq!(after.status, Status::Closed);
        assert_eq!(after.close_reason, "wontfix");
        assert!(after.closed_at.is_some());
    }

    #[test]
    fn delete_issue_syncs_counter() {
        let store = test_store();
        let a = store
            .create_issue_impl(&IssueBuilder::new("A").build(), "alice")
            .unwrap();
        let _b = store
            .create_issue_impl(&IssueBuilder::new("B").build(), "alice")
            .unwrap();
        store.delete_issue_impl(&a).unwrap();

        let c = store
            .create_issue_impl(&IssueBuilder::new("C").build(), "alice")
            .unwrap();
        // bd-1 was deleted, bd-2 still exists; next alloc must not clash.
        assert_eq!(c, "bd-3");
    }

    #[test]
    fn search_matches_title_substring_case_insensitive() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Fix Login Bug").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("Unrelated").build(), "alice")
            .unwrap();

        let results = store
            .search_issues_impl("login", &IssueFilter::default())
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn search_filters_by_label_and_semantics() {
        let store = test_store();
        let id = store
            .create_issue_impl(&IssueBuilder::new("Issue").build(), "alice")
            .unwrap();
        store.add_label_impl(&id, "bug", "alice").unwrap();
        store.add_label_impl(&id, "urgent", "alice").unwrap();

        let mut filter = IssueFilter::default();
        filter.labels = vec!["bug".into(), "urgent".into()];
        let results = store.search_issues_impl("", &filter).unwrap();
        assert_eq!(results.len(), 1);

        filter.labels = vec!["bug".into(), "nonexistent".into()];
        let results = store.search_issues_impl("", &filter).unwrap();
        assert!(results.is_empty());
    }
}
