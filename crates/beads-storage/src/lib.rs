//! Storage backend for the issue tracker.
//!
//! Provides the [`Storage`] trait and a SQLite implementation ([`SqliteStore`]).

pub mod error;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience.
pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::{
    BlockedIssue, Collision, CollisionResult, InvariantReport, InvariantSnapshot, IssueSnapshot,
    IssueUpdates, IssueWithDependencyMetadata, RenameCandidate, Storage, Transaction, TreeNode,
};

// ---------------------------------------------------------------------------
// Storage trait implementation for SqliteStore
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use beads_core::dependency::{Dependency, DependencyCounts};
use beads_core::event::Event;
use beads_core::filter::{IssueFilter, StaleFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::error::Result;

impl Storage for SqliteStore {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String> {
        self.create_issue_impl(issue, actor)
    }

    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<Vec<String>> {
        self.create_issues_impl(issues, actor)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        self.get_issue_impl(id)
    }

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue> {
        self.get_issue_by_external_ref_impl(external_ref)
    }

    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        self.get_issues_by_ids_impl(ids)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        self.update_issue_impl(id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        self.close_issue_impl(id, reason, actor)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        self.delete_issue_impl(id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.search_issues_impl(query, filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.add_dependency_impl(dep, actor)
    }

    fn add_dependency_unchecked(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.add_dependency_unchecked_impl(dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        self.remove_dependency_impl(issue_id, depends_on_id, actor)
    }

    fn remove_dependency_if_exists(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        self.remove_dependency_if_exists_impl(issue_id, depends_on_id, actor)
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependencies_impl(issue_id)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependents_impl(issue_id)
    }

    fn get_dependencies_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        self.get_dependencies_with_metadata_impl(issue_id)
    }

    fn get_dependents_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        self.get_dependents_with_metadata_impl(issue_id)
    }

    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        self.get_dependency_tree_impl(issue_id, max_depth, show_all_paths, reverse)
    }

    fn detect_cycles(&self) -> Result<Vec<Vec<String>>> {
        self.detect_cycles_impl()
    }

    fn get_dependency_counts(&self, ids: &[String]) -> Result<HashMap<String, DependencyCounts>> {
        self.get_dependency_counts_impl(ids)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.add_label_impl(issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.remove_label_impl(issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        self.get_labels_impl(issue_id)
    }

    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>> {
        self.get_issues_by_label_impl(label)
    }

    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        self.get_ready_work_impl(filter)
    }

    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        self.get_blocked_issues_impl(filter)
    }

    fn get_stale_issues(&self, filter: &StaleFilter) -> Result<Vec<Issue>> {
        self.get_stale_issues_impl(filter)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Event> {
        self.add_comment_impl(issue_id, author, text)
    }

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        self.get_events_impl(issue_id, limit)
    }

    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        self.get_all_events_since_impl(since_id)
    }

    fn detect_collisions(&self, incoming: &[Issue]) -> Result<CollisionResult> {
        self.detect_collisions_impl(incoming)
    }

    fn score_collisions(&self, collisions: &mut [Collision], incoming: &[Issue]) -> Result<()> {
        self.score_collisions_impl(collisions, incoming)
    }

    fn remap_collisions(
        &self,
        collisions: &[Collision],
        incoming: &[Issue],
        actor: &str,
    ) -> Result<HashMap<String, String>> {
        self.remap_collisions_impl(collisions, incoming, actor)
    }

    fn update_references(&self, mapping: &HashMap<String, String>, actor: &str) -> Result<()> {
        self.update_references_impl(mapping, actor)
    }

    fn apply_collision_resolution(
        &self,
        result: &CollisionResult,
        mapping: &HashMap<String, String>,
    ) -> Result<()> {
        self.apply_collision_resolution_impl(result, mapping)
    }

    fn get_dirty_issues(&self) -> Result<Vec<String>> {
        self.get_dirty_issues_impl()
    }

    fn clear_dirty_issues_by_id(&self, ids: &[String]) -> Result<()> {
        self.clear_dirty_issues_by_id_impl(ids)
    }

    fn clear_dirty_issues(&self) -> Result<()> {
        self.clear_dirty_issues_impl()
    }

    fn create_snapshot(&self, issue_id: &str, level: i32) -> Result<()> {
        self.create_snapshot_impl(issue_id, level)
    }

    fn get_snapshots(&self, issue_id: &str) -> Result<Vec<IssueSnapshot>> {
        self.get_snapshots_impl(issue_id)
    }

    fn restore_from_snapshot(&self, issue_id: &str, level: i32) -> Result<()> {
        self.restore_from_snapshot_impl(issue_id, level)
    }

    fn apply_compaction(&self, issue_id: &str, level: i32, original_size: i32) -> Result<()> {
        self.apply_compaction_impl(issue_id, level, original_size)
    }

    fn invariant_snapshot(&self) -> Result<InvariantSnapshot> {
        self.invariant_snapshot_impl()
    }

    fn check_invariants(&self, pre: &InvariantSnapshot) -> Result<InvariantReport> {
        self.check_invariants_impl(pre)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.set_config_impl(key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.get_config_impl(key)
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        self.get_all_config_impl()
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.run_in_transaction_impl(f)
    }

    fn close(&self) -> Result<()> {
        // SQLite connections are closed when the Connection is dropped.
        // The Mutex wrapper ensures thread safety.
        Ok(())
    }
}
