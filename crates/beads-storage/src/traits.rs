//! Storage and Transaction traits -- the public API for issue persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations so
//! that alternative backends (mocks, proxies, etc.) can be substituted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use beads_core::dependency::{Dependency, DependencyCounts};
use beads_core::enums::{DependencyType, IssueType, Status};
use beads_core::event::{Event, Label};
use beads_core::filter::{IssueFilter, StaleFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for issues (§4.3 UpdateIssue).
///
/// Only `Some` fields are applied; `None` fields are left unchanged. Doubly
/// `Option`-wrapped fields (`estimated_minutes`, `external_ref`, `closed_at`)
/// distinguish "leave unchanged" (`None`) from "set to null" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub estimated_minutes: Option<Option<i32>>,
    pub external_ref: Option<Option<String>>,
    /// Explicit override of `closed_at`. Leave `None` to let the
    /// status↔closed_at invariant derive it automatically (§4.3).
    pub closed_at: Option<Option<DateTime<Utc>>>,
    pub source_repo: Option<String>,
}

/// A node in a dependency tree traversal (§4.4 GetDependencyTree).
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The issue at this node.
    pub issue: Issue,
    /// Depth from the root (0 = root).
    pub depth: i32,
    /// Identifier of the node through which this node was reached; `None` for the root.
    pub parent_id: Option<String>,
    /// The dependency type of the edge leading to this node.
    pub dep_type: DependencyType,
    /// Whether this node was reached via a reverse traversal.
    pub reverse: bool,
    /// `true` if this leaf was cut off by `max_depth` rather than having no further edges.
    pub truncated: bool,
}

/// An issue with its associated dependency edge metadata.
#[derive(Debug, Clone)]
pub struct IssueWithDependencyMetadata {
    /// The related issue.
    pub issue: Issue,
    /// The dependency edge connecting the issue.
    pub dependency: Dependency,
}

/// An issue that is blocked, along with its open blockers (§4.5 GetBlockedIssues).
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    /// The blocked issue.
    pub issue: Issue,
    /// Number of open blocking dependencies.
    pub blocked_by_count: i32,
    /// Identifiers of the open blockers.
    pub blocker_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Collision resolver types (§4.6)
// ---------------------------------------------------------------------------

/// A collision: an incoming record sharing an identifier with an existing
/// issue but differing in content.
#[derive(Debug, Clone)]
pub struct Collision {
    pub id: String,
    pub differing_fields: Vec<String>,
    /// Filled in by [`Storage::score_collisions`]; `true` iff the incoming
    /// side's content hash is larger and therefore loses.
    pub remap_incoming: Option<bool>,
}

/// A rename candidate: an incoming record whose content hash matches an
/// existing issue under a different identifier.
#[derive(Debug, Clone)]
pub struct RenameCandidate {
    pub existing_id: String,
    pub incoming_id: String,
}

/// Result of a [`Storage::detect_collisions`] read-only pass.
#[derive(Debug, Clone, Default)]
pub struct CollisionResult {
    pub exact_matches: Vec<String>,
    pub collisions: Vec<Collision>,
    pub new_issue_ids: Vec<String>,
    pub rename_candidates: Vec<RenameCandidate>,
}

// ---------------------------------------------------------------------------
// Invariant checker types (§4.11)
// ---------------------------------------------------------------------------

/// Row-count snapshot used to bracket a migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvariantSnapshot {
    pub issue_count: i64,
    pub dependency_count: i64,
    pub label_count: i64,
}

/// Result of running the invariant checks of §4.11.
#[derive(Debug, Clone, Default)]
pub struct InvariantReport {
    pub foreign_keys_valid: bool,
    pub issue_count_stable: bool,
    pub required_config_present: bool,
}

impl InvariantReport {
    pub fn all_ok(&self) -> bool {
        self.foreign_keys_valid && self.issue_count_stable && self.required_config_present
    }
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for issue persistence.
///
/// All methods return [`Result`] to propagate [`crate::error::StorageError`].
pub trait Storage: Send + Sync {
    // -- Issue CRUD (§4.3 IssueStore) -----------------------------------------

    /// Creates a new issue, allocating an identifier if none is supplied, and
    /// emits a `created` event.
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String>;

    /// Creates multiple issues atomically (§4.3 BatchCreate).
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<Vec<String>>;

    /// Retrieves an issue by its ID, including its labels.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Retrieves an issue by its external reference.
    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue>;

    /// Retrieves multiple issues by their IDs.
    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    /// Applies partial updates to an issue and emits an `updated` event per
    /// changed field.
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;

    /// Closes an issue (status=closed, closed_at=now) and emits a `closed`
    /// event carrying the reason.
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;

    /// Permanently deletes an issue and its related data.
    fn delete_issue(&self, id: &str) -> Result<()>;

    /// Searches issues by substring query (case-insensitive over
    /// title/description) and optional filter.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependencies (§4.4 DependencyGraph) ----------------------------------

    /// Adds a dependency edge, enforcing direction and cycle checks.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Adds a dependency edge, skipping the parent-child direction check
    /// (used by collision-resolution remapping, §4.6).
    fn add_dependency_unchecked(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge; fails if not found.
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;

    /// Removes a dependency edge if present; returns success with no event
    /// emitted if absent (used by collision-resolution remapping).
    fn remove_dependency_if_exists(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()>;

    /// Returns the issues that the given issue depends on (one hop, any edge
    /// type), ordered by priority ascending.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns the issues that depend on the given issue (one hop, any edge
    /// type), ordered by priority ascending.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns dependencies with their edge metadata.
    fn get_dependencies_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>>;

    /// Returns dependents with their edge metadata.
    fn get_dependents_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>>;

    /// Traverses the dependency tree from the given root (§4.4
    /// GetDependencyTree).
    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>>;

    /// Enumerates all simple cycles in the dependency graph (§4.4
    /// DetectCycles).
    fn detect_cycles(&self) -> Result<Vec<Vec<String>>>;

    /// Bulk outgoing/incoming edge counts per identifier (§4.4
    /// GetDependencyCounts). Missing identifiers get zero counts.
    fn get_dependency_counts(&self, ids: &[String]) -> Result<HashMap<String, DependencyCounts>>;

    // -- Labels (§4.9 LabelStore) ----------------------------------------------

    /// Adds a label to an issue (idempotent).
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Removes a label from an issue.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Returns all labels for an issue.
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    /// Returns all issues with the given label.
    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>>;

    // -- Work queries (§4.5 ReadySolver) --------------------------------------

    /// Returns issues that are not blocked (§4.5 GetReadyWork).
    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Returns issues that have at least one open blocking dependency.
    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    /// Returns open issues stale beyond the filter's threshold (§4.5
    /// GetStaleIssues).
    fn get_stale_issues(&self, filter: &StaleFilter) -> Result<Vec<Issue>>;

    // -- Events and comments (§4.7 EventLog) ----------------------------------

    /// Adds a comment to an issue (represented as a `commented` event) and
    /// returns the created event.
    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Event>;

    /// Returns events for an issue ordered by created-at descending.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    /// Returns all events with id > `since_id`.
    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>>;

    // -- Collision resolver (§4.6) ---------------------------------------------

    /// Read-only classification pass over an incoming batch.
    fn detect_collisions(&self, incoming: &[Issue]) -> Result<CollisionResult>;

    /// Determines, for each collision, which side loses via content-hash
    /// tie-break.
    fn score_collisions(&self, collisions: &mut [Collision], incoming: &[Issue]) -> Result<()>;

    /// Renumbers losing collisions and returns the old-ID -> new-ID mapping.
    fn remap_collisions(
        &self,
        collisions: &[Collision],
        incoming: &[Issue],
        actor: &str,
    ) -> Result<HashMap<String, String>>;

    /// Rewrites every text field and dependency row referencing a remapped
    /// identifier.
    fn update_references(&self, mapping: &HashMap<String, String>, actor: &str) -> Result<()>;

    /// Applies the caller-approved resolution: deletes superseded rename
    /// sources and performs remap bookkeeping.
    fn apply_collision_resolution(
        &self,
        result: &CollisionResult,
        mapping: &HashMap<String, String>,
    ) -> Result<()>;

    // -- Dirty tracker (§4.8) --------------------------------------------------

    /// Returns the full set of dirty issue IDs.
    fn get_dirty_issues(&self) -> Result<Vec<String>>;

    /// Race-safe clear of a specific set of dirty IDs.
    fn clear_dirty_issues_by_id(&self, ids: &[String]) -> Result<()>;

    /// Blanket clear; races with concurrent writers between export read and
    /// clear. Retained for legacy callers only.
    fn clear_dirty_issues(&self) -> Result<()>;

    // -- Snapshot hook (§4.10) --------------------------------------------------

    /// Captures the issue's current content fields at the given compaction level.
    fn create_snapshot(&self, issue_id: &str, level: i32) -> Result<()>;

    /// Returns snapshots for an issue in ascending level order.
    fn get_snapshots(&self, issue_id: &str) -> Result<Vec<IssueSnapshot>>;

    /// Overwrites the issue's content fields from the snapshot at `level`.
    fn restore_from_snapshot(&self, issue_id: &str, level: i32) -> Result<()>;

    /// Sets compaction metadata without touching content fields.
    fn apply_compaction(&self, issue_id: &str, level: i32, original_size: i32) -> Result<()>;

    // -- Invariant checker (§4.11) ----------------------------------------------

    /// Captures row counts used to bracket a migration run.
    fn invariant_snapshot(&self) -> Result<InvariantSnapshot>;

    /// Runs the checks of §4.11 against the given pre-migration snapshot.
    fn check_invariants(&self, pre: &InvariantSnapshot) -> Result<InvariantReport>;

    // -- Configuration (§6) ------------------------------------------------------

    /// Sets a configuration key-value pair.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a configuration value by key.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Returns all configuration key-value pairs.
    fn get_all_config(&self) -> Result<HashMap<String, String>>;

    // -- Transactions ------------------------------------------------------------

    /// Executes a closure within a database transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed.
    /// If it returns `Err`, or the closure panics, the transaction is rolled
    /// back via a deferred-rollback guard.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------------

    /// Closes the database connection and releases resources.
    fn close(&self) -> Result<()>;
}

/// An opaque compacted-content snapshot (§4.10 SnapshotHook).
#[derive(Debug, Clone)]
pub struct IssueSnapshot {
    pub issue_id: String,
    pub level: i32,
    pub title: String,
    pub description: String,
    pub design: String,
    pub acceptance_criteria: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
///
/// All operations share a single database connection and are committed or
/// rolled back atomically.
pub trait Transaction {
    // -- Issue operations ------------------------------------------------------

    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String>;
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<Vec<String>>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;
    fn delete_issue(&self, id: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependency operations ---------------------------------------------------

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn add_dependency_unchecked(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;
    fn remove_dependency_if_exists(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    // -- Label operations ---------------------------------------------------------

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Config operations ----------------------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;

    // -- Metadata operations --------------------------------------------------------

    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;

    // -- Event/comment operations -----------------------------------------------------

    fn add_comment(&self, issue_id: &str, actor: &str, comment: &str) -> Result<Event>;
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Event>;
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    // -- Counter operations (§4.2) ----------------------------------------------------

    fn allocate_id(&self, prefix: &str) -> Result<String>;

    // -- Dirty tracker operations -----------------------------------------------------

    fn mark_dirty(&self, issue_id: &str) -> Result<()>;

    // -- Label import (preserves original pairing) --------------------------------------

    fn import_label(&self, label: &Label) -> Result<()>;
}
