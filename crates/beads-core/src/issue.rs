//! Issue struct -- the central domain model for the issue storage engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::enums::{IssueType, Status};
use crate::event::Event;

/// Helper for `skip_serializing_if` on `i32` fields (priority: 0 is valid, never skip).
fn is_zero_priority(_p: &i32) -> bool {
    false
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

/// Helper for `skip_serializing_if` on `Vec` fields.
fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// Represents a trackable work item (§3 Issue).
///
/// Fields are organised into logical groups for maintainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    // ===== Core Identification =====
    #[serde(default)]
    pub id: String,

    /// Internal: content digest over the content-bearing fields -- NOT exported to JSONL.
    #[serde(skip)]
    pub content_hash: String,

    // ===== Issue Content =====
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    // ===== Classification =====
    #[serde(default, skip_serializing_if = "Status::is_default")]
    pub status: Status,

    /// Priority 0-4, lower is more urgent. No skip: 0 is valid (P0/critical).
    #[serde(default, skip_serializing_if = "is_zero_priority")]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "IssueType::is_default")]
    pub issue_type: IssueType,

    // ===== Assignment =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,

    /// Globally unique when present (§3 Issue).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    // ===== Timestamps =====
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Reason given when closing; carried here in addition to the `closed`
    /// event's `new_value` so it can be inspected without scanning events.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    // ===== Compaction state (§3 Issue, §4.10 SnapshotHook) =====
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub compaction_level: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at_commit: Option<String>,

    // ===== Multi-repo collaborator =====
    /// Source repository tag; empty string is the sentinel for the primary repo.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_repo: String,

    // ===== Relational data (populated for export/import) =====
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub events: Vec<Event>,
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            content_hash: String::new(),
            title: String::new(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Task,
            assignee: String::new(),
            estimated_minutes: None,
            external_ref: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            compaction_level: 0,
            compacted_at: None,
            original_size: None,
            compacted_at_commit: None,
            source_repo: String::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl Issue {
    /// Applies default values for fields omitted during JSONL import.
    ///
    /// - Status defaults to Open if empty
    /// - IssueType defaults to Task if empty
    pub fn set_defaults(&mut self) {
        if matches!(&self.status, Status::Custom(s) if s.is_empty()) {
            self.status = Status::Open;
        }
        if matches!(&self.issue_type, IssueType::Custom(s) if s.is_empty()) {
            self.issue_type = IssueType::Task;
        }
    }
}

/// Builder for constructing an [`Issue`] with a fluent API.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    /// Creates a new builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut issue = Issue::default();
        issue.title = title.into();
        Self { issue }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn design(mut self, design: impl Into<String>) -> Self {
        self.issue.design = design.into();
        self
    }

    pub fn acceptance_criteria(mut self, ac: impl Into<String>) -> Self {
        self.issue.acceptance_criteria = ac.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.issue.notes = notes.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.issue.status = status;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue.issue_type = issue_type;
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn estimated_minutes(mut self, minutes: i32) -> Self {
        self.issue.estimated_minutes = Some(minutes);
        self
    }

    pub fn external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.issue.external_ref = Some(external_ref.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.issue.created_at = created_at;
        self
    }

    pub fn closed_at(mut self, closed_at: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(closed_at);
        self
    }

    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.issue.close_reason = reason.into();
        self
    }

    pub fn source_repo(mut self, source_repo: impl Into<String>) -> Self {
        self.issue.source_repo = source_repo.into();
        self
    }

    pub fn build(self) -> Issue {
        self.issue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_title() {
        let issue = IssueBuilder::new("My issue").build();
        assert_eq!(issue.title, "My issue");
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.priority, 2);
    }

    #[test]
    fn default_issue_has_task_type() {
        let issue = Issue::default();
        assert_eq!(issue.issue_type, IssueType::Task);
    }

    #[test]
    fn set_defaults_fills_empty_custom_status() {
        let mut issue = IssueBuilder::new("x").build();
        issue.status = Status::Custom(String::new());
        issue.set_defaults();
        assert_eq!(issue.status, Status::Open);
    }

    #[test]
    fn serde_skips_empty_optional_fields() {
        let issue = IssueBuilder::new("Minimal").id("bd-1").build();
        let json = serde_json::to_string(&issue).unwrap();
        assert!(!json.contains("\"description\""));
        assert!(!json.contains("\"labels\""));
        assert!(json.contains("\"title\":\"Minimal\""));
    }
}
