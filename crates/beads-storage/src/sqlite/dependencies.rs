//! Dependency CRUD, cycle detection, and tree traversal (§4.4 DependencyGraph).
//!
//! All four edge types (`blocks`, `related`, `parent-child`, `discovered-from`)
//! participate in a single combined cycle check -- the spec forbids cycles
//! across the graph as a whole, not per edge type. Traversals use a
//! substring-safe, framed path representation (`|id|`) so that `bd-10` can
//! never be mistaken for containing `bd-1`.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};

use beads_core::dependency::{Dependency, DependencyCounts};
use beads_core::enums::{DependencyType, EventType, IssueType};

use crate::error::{Result, StorageError};
use crate::sqlite::dirty::mark_dirty_on_conn;
use crate::sqlite::events::emit_event;
use crate::sqlite::issues::{
    format_datetime, get_issue_on_conn, maybe_get_issue_on_conn, parse_datetime, scan_issue,
    ISSUE_COLUMNS_PREFIXED,
};
use crate::sqlite::store::SqliteStore;
use crate::traits::{IssueWithDependencyMetadata, TreeNode};

/// Path delimiter guaranteed absent from identifiers (`bd-123` never
/// contains `|`). Framed matches (`id|`, `|id|`, `|id`) prevent `bd-1`
/// from appearing to match inside `bd-10`.
const PATH_DELIM: char = '|';

fn framed(id: &str) -> String {
    format!("{PATH_DELIM}{id}{PATH_DELIM}")
}

/// `true` if `id` appears in `path` (a string of `|`-delimited identifiers,
/// itself framed by leading/trailing delimiters) as a whole path segment.
fn path_contains(path: &str, id: &str) -> bool {
    path.contains(&framed(id))
}

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

/// Inserts a dependency edge, validating direction (unless `skip_direction_check`)
/// and running the combined-edge-type cycle check.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    dep: &Dependency,
    actor: &str,
    skip_direction_check: bool,
) -> Result<()> {
    if dep.issue_id == dep.depends_on_id {
        return Err(StorageError::SelfDependency {
            id: dep.issue_id.clone(),
        });
    }

    let source = get_issue_on_conn(conn, &dep.issue_id)?;
    let target = get_issue_on_conn(conn, &dep.depends_on_id)?;

    if !skip_direction_check && dep.dep_type == DependencyType::ParentChild {
        let source_is_epic = source.issue_type == IssueType::Epic;
        let target_is_epic = target.issue_type == IssueType::Epic;
        if source_is_epic && !target_is_epic {
            return Err(StorageError::InvalidParentChildDirection {
                message: format!(
                    "{} is an epic; use `parent-child` with {} as the child and {} as the parent \
                     (an epic cannot be the child of a non-epic)",
                    dep.issue_id, dep.depends_on_id, dep.issue_id
                ),
            });
        }
    }

    if let Some(path) = find_cycle_path(conn, &dep.issue_id, &dep.depends_on_id)? {
        return Err(StorageError::cycle(path));
    }

    let created_at_str = format_datetime(&dep.created_at);
    conn.execute(
        "INSERT OR REPLACE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type.as_str(),
            created_at_str,
            dep.created_by,
        ],
    )?;

    let now_str = format_datetime(&chrono::Utc::now());
    emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&dep.depends_on_id),
        Some(dep.dep_type.as_str()),
        &now_str,
    )?;
    mark_dirty_on_conn(conn, &dep.issue_id)?;
    mark_dirty_on_conn(conn, &dep.depends_on_id)?;

    Ok(())
}

/// Finds a path `depends_on_id -> ... -> issue_id` across all edge types,
/// which would close a cycle if `issue_id -> depends_on_id` were inserted.
/// Returns the path in `issue_id -> ... -> depends_on_id -> issue_id` order
/// (the spec's "source -> target -> ... -> source" schema), or `None` if the
/// edge is safe to add. Depth-capped at 100 hops.
fn find_cycle_path(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
) -> Result<Option<Vec<String>>> {
    const MAX_DEPTH: usize = 100;

    // BFS from `depends_on_id`, through all edge types, looking for `issue_id`.
    let mut visited: HashSet<String> = HashSet::new();
    let mut came_from: HashMap<String, String> = HashMap::new();
    let mut frontier: Vec<String> = vec![depends_on_id.to_string()];
    visited.insert(depends_on_id.to_string());

    for _depth in 0..MAX_DEPTH {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();
        for current in &frontier {
            if current == issue_id {
                let mut path = vec![issue_id.to_string()];
                let mut node = issue_id.to_string();
                while let Some(prev) = came_from.get(&node) {
                    path.push(prev.clone());
                    node = prev.clone();
                }
                path.push(issue_id.to_string());
                return Ok(Some(path));
            }
            let mut stmt =
                conn.prepare_cached("SELECT depends_on_id FROM dependencies WHERE issue_id = ?1")?;
            let rows = stmt
                .query_map(params![current], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for next in rows {
                if visited.insert(next.clone()) {
                    came_from.insert(next.clone(), current.clone());
                    next_frontier.push(next);
                }
            }
        }
        frontier = next_frontier;
    }
    Ok(None)
}

pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    actor: &str,
    if_exists: bool,
) -> Result<()> {
    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
        params![issue_id, depends_on_id],
    )?;

    if affected == 0 {
        if if_exists {
            return Ok(());
        }
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    let now_str = format_datetime(&chrono::Utc::now());
    emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        None,
        &now_str,
    )?;
    mark_dirty_on_conn(conn, issue_id)?;
    mark_dirty_on_conn(conn, depends_on_id)?;

    Ok(())
}

pub(crate) fn get_dependency_records_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, type, created_at, created_by
         FROM dependencies WHERE issue_id = ?1",
    )?;
    let rows = stmt.query_map(params![issue_id], |row| {
        Ok(Dependency {
            issue_id: row.get(0)?,
            depends_on_id: row.get(1)?,
            dep_type: DependencyType::from(row.get::<_, String>(2)?),
            created_at: parse_datetime(&row.get::<_, String>(3)?),
            created_by: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StorageError::from)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, actor, false)
    }

    pub fn add_dependency_unchecked_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, actor, true)
    }

    pub fn remove_dependency_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, actor, false)
    }

    pub fn remove_dependency_if_exists_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, actor, true)
    }

    pub fn get_dependency_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependency_records_on_conn(&conn, issue_id)
    }

    /// One hop forward (any edge type), ordered by priority ascending.
    pub fn get_dependencies_impl(&self, issue_id: &str) -> Result<Vec<beads_core::issue::Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.depends_on_id
             WHERE d.issue_id = ?1
             ORDER BY issues.priority ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
    }

    /// One hop backward (any edge type), ordered by priority ascending.
    pub fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<beads_core::issue::Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1
             ORDER BY issues.priority ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
    }

    pub fn get_dependencies_with_metadata_impl(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        let conn = self.lock_conn()?;
        let deps = get_dependency_records_on_conn(&conn, issue_id)?;
        let mut out = Vec::with_capacity(deps.len());
        for dep in deps {
            if let Some(issue) = maybe_get_issue_on_conn(&conn, &dep.depends_on_id)? {
                out.push(IssueWithDependencyMetadata {
                    issue,
                    dependency: dep,
                });
            }
        }
        out.sort_by_key(|m| m.issue.priority);
        Ok(out)
    }

    pub fn get_dependents_with_metadata_impl(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by
             FROM dependencies WHERE depends_on_id = ?1",
        )?;
        let deps = stmt
            .query_map(params![issue_id], |row| {
                Ok(Dependency {
                    issue_id: row.get(0)?,
                    depends_on_id: row.get(1)?,
                    dep_type: DependencyType::from(row.get::<_, String>(2)?),
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                    created_by: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(deps.len());
        for dep in deps {
            if let Some(issue) = maybe_get_issue_on_conn(&conn, &dep.issue_id)? {
                out.push(IssueWithDependencyMetadata {
                    issue,
                    dependency: dep,
                });
            }
        }
        out.sort_by_key(|m| m.issue.priority);
        Ok(out)
    }

    pub fn get_dependency_tree_impl(
        &self,
        issue_id: &str,
        max_depth: i32,
        show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        let conn = self.lock_conn()?;
        get_dependency_tree(&conn, issue_id, max_depth, show_all_paths, reverse)
    }

    pub fn detect_cycles_impl(&self) -> Result<Vec<Vec<String>>> {
        let conn = self.lock_conn()?;
        detect_cycles(&conn)
    }

    pub fn get_dependency_counts_impl(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, DependencyCounts>> {
        let conn = self.lock_conn()?;
        let mut counts: HashMap<String, DependencyCounts> = ids
            .iter()
            .map(|id| (id.clone(), DependencyCounts::default()))
            .collect();

        {
            let mut stmt =
                conn.prepare("SELECT issue_id, COUNT(*) FROM dependencies GROUP BY issue_id")?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (id, n) = row?;
                if let Some(c) = counts.get_mut(&id) {
                    c.dependency_count = n as i32;
                }
            }
        }
        {
            let mut stmt = conn.prepare(
                "SELECT depends_on_id, COUNT(*) FROM dependencies GROUP BY depends_on_id",
            )?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (id, n) = row?;
                if let Some(c) = counts.get_mut(&id) {
                    c.dependent_count = n as i32;
                }
            }
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Tree traversal (§4.4 GetDependencyTree)
// ---------------------------------------------------------------------------

struct Edge {
    neighbor: String,
    dep_type: DependencyType,
}

fn neighbors(conn: &Connection, id: &str, reverse: bool) -> Result<Vec<Edge>> {
    let sql = if reverse {
        "SELECT issue_id, type FROM dependencies WHERE depends_on_id = ?1"
    } else {
        "SELECT depends_on_id, type FROM dependencies WHERE issue_id = ?1"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (neighbor, t) = row?;
        out.push(Edge {
            neighbor,
            dep_type: DependencyType::from(t),
        });
    }
    Ok(out)
}

/// Preorder traversal of the dependency tree rooted at `issue_id`.
///
/// Diamond deduplication (when `show_all_paths` is false) keeps the first
/// occurrence of each issue -- which, because the result is finally sorted
/// by depth, is its shallowest arrival.
fn get_dependency_tree(
    conn: &Connection,
    issue_id: &str,
    max_depth: i32,
    show_all_paths: bool,
    reverse: bool,
) -> Result<Vec<TreeNode>> {
    struct Frame {
        id: String,
        depth: i32,
        path: String,
    }

    let mut out = Vec::new();
    let mut emitted: HashSet<String> = HashSet::new();

    let Some(root_issue) = maybe_get_issue_on_conn(conn, issue_id)? else {
        return Ok(out);
    };
    out.push(TreeNode {
        issue: root_issue,
        depth: 0,
        parent_id: None,
        dep_type: DependencyType::default(),
        reverse,
        truncated: 0 >= max_depth,
    });
    emitted.insert(issue_id.to_string());

    let root = Frame {
        id: issue_id.to_string(),
        depth: 0,
        path: framed(issue_id),
    };

    let mut frontier: Vec<Frame> = vec![root];

    while !frontier.is_empty() {
        let mut next_frontier = Vec::new();
        for frame in frontier {
            let edges = neighbors(conn, &frame.id, reverse)?;
            for edge in edges {
                if path_contains(&frame.path, &edge.neighbor) {
                    // Re-entry along the path already walked; DetectCycles
                    // reports true cycles separately, this just stops the
                    // tree walk from looping forever.
                    continue;
                }
                let child_depth = frame.depth + 1;
                let truncated = child_depth >= max_depth;

                if !show_all_paths && emitted.contains(&edge.neighbor) {
                    continue;
                }

                let Some(issue) = maybe_get_issue_on_conn(conn, &edge.neighbor)? else {
                    continue;
                };

                if !show_all_paths {
                    emitted.insert(edge.neighbor.clone());
                }

                out.push(TreeNode {
                    issue,
                    depth: child_depth,
                    parent_id: Some(frame.id.clone()),
                    dep_type: edge.dep_type.clone(),
                    reverse,
                    truncated,
                });

                if !truncated {
                    let child_path = format!("{}{}{}", frame.path, edge.neighbor, PATH_DELIM);
                    next_frontier.push(Frame {
                        id: edge.neighbor.clone(),
                        depth: child_depth,
                        path: child_path,
                    });
                }
            }
        }
        frontier = next_frontier;
    }

    // Order by depth, breaking ties by priority then identifier, so that
    // diamond-deduplication above (first-occurrence) lands on the shallowest
    // and highest-priority path.
    out.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then(a.issue.priority.cmp(&b.issue.priority))
            .then(a.issue.id.cmp(&b.issue.id))
    });

    Ok(out)
}

// ---------------------------------------------------------------------------
// Cycle enumeration (§4.4 DetectCycles)
// ---------------------------------------------------------------------------

/// Enumerates all simple cycles in the dependency graph across all edge
/// types, via DFS with a framed path, canonicalised by lexicographically
/// minimum rotation so each cycle is reported exactly once.
fn detect_cycles(conn: &Connection) -> Result<Vec<Vec<String>>> {
    const MAX_DEPTH: usize = 100;

    let mut all_ids_stmt = conn.prepare("SELECT id FROM issues")?;
    let all_ids: Vec<String> = all_ids_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut seen_canonical: HashSet<String> = HashSet::new();
    let mut cycles = Vec::new();

    for start in &all_ids {
        dfs_cycles(
            conn,
            start,
            start,
            &mut vec![start.clone()],
            &framed(start),
            MAX_DEPTH,
            &mut cycles,
            &mut seen_canonical,
        )?;
    }

    Ok(cycles)
}

#[allow(clippy::too_many_arguments)]
fn dfs_cycles(
    conn: &Connection,
    start: &str,
    current: &str,
    path: &mut Vec<String>,
    path_str: &str,
    depth_remaining: usize,
    cycles: &mut Vec<Vec<String>>,
    seen_canonical: &mut HashSet<String>,
) -> Result<()> {
    if depth_remaining == 0 {
        return Ok(());
    }
    let edges = neighbors(conn, current, false)?;
    for edge in edges {
        if edge.neighbor == start {
            let canon = canonical_rotation(path);
            if seen_canonical.insert(canon.join(",")) {
                let mut full = canon;
                full.push(full[0].clone());
                cycles.push(full);
            }
            continue;
        }
        if path_contains(path_str, &edge.neighbor) {
            continue;
        }
        path.push(edge.neighbor.clone());
        let new_path_str = format!("{path_str}{}{PATH_DELIM}", edge.neighbor);
        dfs_cycles(
            conn,
            start,
            &edge.neighbor,
            path,
            &new_path_str,
            depth_remaining - 1,
            cycles,
            seen_canonical,
        )?;
        path.pop();
    }
    Ok(())
}

/// Rotates `cycle` (a list of distinct issue ids, cycle-order, no repeated
/// terminator) to start at its lexicographically smallest element, so the
/// same cycle discovered from different starting points canonicalises
/// identically.
fn canonical_rotation(cycle: &[String]) -> Vec<String> {
    if cycle.is_empty() {
        return Vec::new();
    }
    let min_idx = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| id.as_str())
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[min_idx..]);
    rotated.extend_from_slice(&cycle[..min_idx]);
    rotated
}
