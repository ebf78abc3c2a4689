//! Ready-work queries (§4.5 ReadySolver): `GetReadyWork`, `GetBlockedIssues`,
//! `GetStaleIssues`.

use rusqlite::{params_from_iter, ToSql};

use beads_core::enums::Status;
use beads_core::filter::{StaleFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{scan_issue, ISSUE_COLUMNS_PREFIXED};
use crate::sqlite::store::SqliteStore;
use crate::traits::BlockedIssue;

/// Transitive parent-child propagation is capped here: a chain deeper than
/// this is a degenerate configuration and is left blocked (§4.5).
const MAX_BLOCKING_DEPTH: i32 = 50;

/// A blocked issue is not a child of a parent-child-blocked parent if the
/// chain exceeds this many hops; window itself matches the spec's choice
/// for "recent" in the hybrid sort (§4.5 GetReadyWork).
const HYBRID_RECENT_HOURS: i64 = 48;

fn open_like_sql_list() -> String {
    beads_core::enums::OPEN_LIKE_STATUSES
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The default candidate status set when `WorkFilter::status` is empty
/// (§4.5 GetReadyWork; §GLOSSARY Ready work) -- `{open, in_progress}`, not
/// the broader `OPEN_LIKE_STATUSES` blocker set (which also includes
/// `blocked`).
fn working_set_sql_list() -> String {
    beads_core::enums::WORKING_SET_STATUSES
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Wraps the owned boxed parameter values used to build dynamic WHERE clauses.
type BoxedParam = Box<dyn ToSql>;

fn push_param(params: &mut Vec<BoxedParam>, value: impl ToSql + 'static) {
    params.push(Box::new(value));
}

impl SqliteStore {
    /// Issues not blocked by the two-step definition of §4.5: direct
    /// `blocks` edges to an open-like issue, or inherited transitively
    /// through `parent-child` edges up to depth 50 -- computed as a single
    /// recursive query.
    pub fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<BoxedParam> = Vec::new();

        match &filter.status {
            Some(status) => {
                where_clauses.push("issues.status = ?".to_string());
                push_param(&mut params, status.as_str().to_string());
            }
            None => {
                where_clauses.push(format!("issues.status IN ({})", working_set_sql_list()));
            }
        }
        if let Some(priority) = filter.priority {
            where_clauses.push("issues.priority = ?".to_string());
            push_param(&mut params, priority);
        }
        if let Some(assignee) = &filter.assignee {
            where_clauses.push("issues.assignee = ?".to_string());
            push_param(&mut params, assignee.clone());
        }
        for label in &filter.labels {
            where_clauses
                .push("EXISTS (SELECT 1 FROM labels WHERE issue_id = issues.id AND label = ?)".to_string());
            push_param(&mut params, label.clone());
        }
        if !filter.labels_any.is_empty() {
            let placeholders = filter.labels_any.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            where_clauses.push(format!(
                "issues.id IN (SELECT issue_id FROM labels WHERE label IN ({placeholders}))"
            ));
            for label in &filter.labels_any {
                push_param(&mut params, label.clone());
            }
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("AND {}", where_clauses.join(" AND "))
        };

        let order_sql = order_by_for(filter.sort_policy.clone());

        let sql = format!(
            "WITH RECURSIVE
             blocked_directly(id) AS (
                 SELECT DISTINCT d.issue_id
                 FROM dependencies d
                 JOIN issues blocker ON blocker.id = d.depends_on_id
                 WHERE d.type = 'blocks' AND blocker.status IN ({open_like})
             ),
             blocked(id, depth) AS (
                 SELECT id, 0 FROM blocked_directly
                 UNION
                 SELECT d.issue_id, blocked.depth + 1
                 FROM dependencies d
                 JOIN blocked ON blocked.id = d.depends_on_id
                 WHERE d.type = 'parent-child' AND blocked.depth < {max_depth}
             )
             SELECT {cols} FROM issues
             WHERE issues.id NOT IN (SELECT id FROM blocked)
             {where_sql}
             {order_sql}",
            open_like = open_like_sql_list(),
            max_depth = MAX_BLOCKING_DEPTH,
            cols = ISSUE_COLUMNS_PREFIXED,
        );

        let sql = if let Some(limit) = filter.limit {
            push_param(&mut params, limit);
            format!("{sql} LIMIT ?")
        } else {
            sql
        };

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_from_iter(param_refs), scan_issue)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
    }

    /// Issues in an open-like status with at least one open blocker via a
    /// `blocks` edge, with the blocker count and identifiers (§4.5
    /// GetBlockedIssues).
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> = vec![format!(
            "issues.status IN ({})",
            open_like_sql_list()
        )];
        let mut params: Vec<BoxedParam> = Vec::new();

        if let Some(status) = &filter.status {
            where_clauses.push("issues.status = ?".to_string());
            push_param(&mut params, status.as_str().to_string());
        }
        if let Some(priority) = filter.priority {
            where_clauses.push("issues.priority = ?".to_string());
            push_param(&mut params, priority);
        }
        if let Some(assignee) = &filter.assignee {
            where_clauses.push("issues.assignee = ?".to_string());
            push_param(&mut params, assignee.clone());
        }
        for label in &filter.labels {
            where_clauses
                .push("EXISTS (SELECT 1 FROM labels WHERE issue_id = issues.id AND label = ?)".to_string());
            push_param(&mut params, label.clone());
        }
        if !filter.labels_any.is_empty() {
            let placeholders = filter.labels_any.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            where_clauses.push(format!(
                "issues.id IN (SELECT issue_id FROM labels WHERE label IN ({placeholders}))"
            ));
            for label in &filter.labels_any {
                push_param(&mut params, label.clone());
            }
        }

        let sql = format!(
            "SELECT {cols}, GROUP_CONCAT(blocker.id) AS blocker_ids, COUNT(blocker.id) AS blocker_count
             FROM issues
             JOIN dependencies d ON d.issue_id = issues.id AND d.type = 'blocks'
             JOIN issues blocker ON blocker.id = d.depends_on_id AND blocker.status IN ({open_like})
             WHERE {where_sql}
             GROUP BY issues.id
             ORDER BY issues.priority ASC",
            cols = ISSUE_COLUMNS_PREFIXED,
            open_like = open_like_sql_list(),
            where_sql = where_clauses.join(" AND "),
        );

        let sql = if let Some(limit) = filter.limit {
            push_param(&mut params, limit);
            format!("{sql} LIMIT ?")
        } else {
            sql
        };

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let col_count = ISSUE_COLUMNS_PREFIXED.split(',').count();
        let rows = stmt.query_map(params_from_iter(param_refs), move |row| {
            let issue = scan_issue(row)?;
            let blocker_ids_raw: Option<String> = row.get(col_count)?;
            let blocker_count: i32 = row.get(col_count + 1)?;
            let blocker_ids = blocker_ids_raw
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            Ok(BlockedIssue {
                issue,
                blocked_by_count: blocker_count,
                blocker_ids,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
    }

    /// Open issues not updated in at least `filter.days` days, ordered by
    /// updated-at ascending (§4.5 GetStaleIssues).
    pub fn get_stale_issues_impl(&self, filter: &StaleFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses = vec![
            "(julianday('now') - julianday(issues.updated_at)) >= ?".to_string(),
        ];
        let mut params: Vec<BoxedParam> = Vec::new();
        push_param(&mut params, filter.days);

        match &filter.status {
            Some(status) => {
                where_clauses.push("issues.status = ?".to_string());
                push_param(&mut params, status.clone());
            }
            None => {
                where_clauses.push(format!("issues.status IN ({})", open_like_sql_list()));
            }
        }

        let sql = format!(
            "SELECT {cols} FROM issues WHERE {where_sql} ORDER BY issues.updated_at ASC",
            cols = ISSUE_COLUMNS_PREFIXED,
            where_sql = where_clauses.join(" AND "),
        );

        let sql = if let Some(limit) = filter.limit {
            push_param(&mut params, limit);
            format!("{sql} LIMIT ?")
        } else {
            sql
        };

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_from_iter(param_refs), scan_issue)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
    }
}

/// Builds the `ORDER BY` clause for a sort policy (§4.5 GetReadyWork).
///
/// `hybrid` (the default) buckets issues younger than
/// [`HYBRID_RECENT_HOURS`] ahead of older ones: the recent bucket sorts by
/// priority, the rest by creation time.
fn order_by_for(policy: beads_core::enums::SortPolicy) -> String {
    use beads_core::enums::SortPolicy;
    match policy {
        SortPolicy::Priority => "ORDER BY issues.priority ASC, issues.created_at ASC".to_string(),
        SortPolicy::Oldest => "ORDER BY issues.created_at ASC".to_string(),
        _ => format!(
            "ORDER BY CASE WHEN (julianday('now') - julianday(issues.created_at)) * 24.0 < {HYBRID_RECENT_HOURS} THEN 0 ELSE 1 END ASC, \
             CASE WHEN (julianday('now') - julianday(issues.created_at)) * 24.0 < {HYBRID_RECENT_HOURS} THEN issues.priority END ASC, \
             CASE WHEN (julianday('now') - julianday(issues.created_at)) * 24.0 >= {HYBRID_RECENT_HOURS} THEN issues.created_at END ASC"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::dependency::Dependency;
    use beads_core::enums::DependencyType;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn dep(issue_id: &str, depends_on_id: &str, dep_type: DependencyType) -> Dependency {
        Dependency {
            issue_id: issue_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            dep_type,
            created_at: chrono::Utc::now(),
            created_by: "alice".to_string(),
        }
    }

    #[test]
    fn ready_work_excludes_directly_blocked() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Blocked").id("bd-r1").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("Blocker").id("bd-r2").build(), "alice")
            .unwrap();
        store
            .add_dependency_impl(&dep("bd-r1", "bd-r2", DependencyType::Blocks), "alice")
            .unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(!ids.contains(&"bd-r1"));
        assert!(ids.contains(&"bd-r2"));
    }

    #[test]
    fn ready_work_includes_when_blocker_closed() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Task").id("bd-r3").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("Blocker").id("bd-r4").build(), "alice")
            .unwrap();
        store
            .add_dependency_impl(&dep("bd-r3", "bd-r4", DependencyType::Blocks), "alice")
            .unwrap();
        store.close_issue_impl("bd-r4", "done", "alice").unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"bd-r3"));
    }

    #[test]
    fn ready_work_inherits_blocking_through_parent_child() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Parent").id("bd-r5").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("Blocker").id("bd-r6").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("Child").id("bd-r7").build(), "alice")
            .unwrap();

        store
            .add_dependency_impl(&dep("bd-r5", "bd-r6", DependencyType::Blocks), "alice")
            .unwrap();
        store
            .add_dependency_impl(&dep("bd-r7", "bd-r5", DependencyType::ParentChild), "alice")
            .unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(!ids.contains(&"bd-r5"));
        assert!(!ids.contains(&"bd-r7"));
    }

    #[test]
    fn ready_work_default_excludes_blocked_status() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("Blocked status, no blockers")
                    .id("bd-r13")
                    .status(beads_core::enums::Status::Blocked)
                    .build(),
                "alice",
            )
            .unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(!ids.contains(&"bd-r13"));
    }

    #[test]
    fn ready_work_filters_by_label() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("A").id("bd-r8").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("B").id("bd-r9").build(), "alice")
            .unwrap();
        store.add_label_impl("bd-r8", "urgent", "alice").unwrap();

        let mut filter = WorkFilter::default();
        filter.labels = vec!["urgent".to_string()];
        let ready = store.get_ready_work_impl(&filter).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "bd-r8");
    }

    #[test]
    fn blocked_issues_reports_count_and_ids() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Blocked").id("bd-r10").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("B1").id("bd-r11").build(), "alice")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("B2").id("bd-r12").build(), "alice")
            .unwrap();
        store
            .add_dependency_impl(&dep("bd-r10", "bd-r11", DependencyType::Blocks), "alice")
            .unwrap();
        store
            .add_dependency_impl(&dep("bd-r10", "bd-r12", DependencyType::Blocks), "alice")
            .unwrap();

        let blocked = store
            .get_blocked_issues_impl(&WorkFilter::default())
            .unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].issue.id, "bd-r10");
        assert_eq!(blocked[0].blocked_by_count, 2);
        assert_eq!(blocked[0].blocker_ids.len(), 2);
    }

    #[test]
    fn stale_issues_respects_threshold() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Fresh").id("bd-r13").build(), "alice")
            .unwrap();

        let stale = store
            .get_stale_issues_impl(&StaleFilter {
                days: 30,
                status: None,
                limit: None,
            })
            .unwrap();
        assert!(stale.is_empty());
    }
}
