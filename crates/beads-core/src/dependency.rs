//! Dependency types -- relationships between issues (§3 Dependency, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;

/// A directed edge between two issues. Semantics: "source depends on target".
///
/// For `parent-child`, the child is the source and the parent is the target
/// (child belongs to parent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    pub depends_on_id: String,

    /// Dependency type (serialised as "type" in JSON).
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

/// Counts for dependencies and dependents (§4.4 GetDependencyCounts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DependencyCounts {
    /// Number of issues this issue depends on (outgoing edges).
    pub dependency_count: i32,
    /// Number of issues that depend on this issue (incoming edges).
    pub dependent_count: i32,
}
