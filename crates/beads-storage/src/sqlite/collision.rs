//! Collision resolution for merging an incoming batch of issues against the
//! local state (§4.6 CollisionResolver).
//!
//! This is the most delicate subsystem in the storage engine: it reconciles
//! identifiers that collide, identifiers that were renamed, and the text and
//! dependency references that point at either.

use std::collections::HashMap;

use regex::Regex;
use rusqlite::params;

use beads_core::content_hash::compute_content_hash;
use beads_core::dependency::Dependency;
use beads_core::enums::DependencyType;
use beads_core::issue::Issue;

use crate::error::Result;
use crate::sqlite::counters;
use crate::sqlite::dependencies::{add_dependency_on_conn, remove_dependency_on_conn};
use crate::sqlite::issues::{format_datetime, maybe_get_issue_on_conn};
use crate::sqlite::store::SqliteStore;
use crate::traits::{Collision, CollisionResult, RenameCandidate};

/// Fields compared in the batch-internal dedup grouping key (§4.6
/// DetectCollisions step 1). Identifier and timestamps are excluded.
fn grouping_key(issue: &Issue) -> String {
    [
        issue.title.as_str(),
        issue.description.as_str(),
        issue.design.as_str(),
        issue.acceptance_criteria.as_str(),
        issue.notes.as_str(),
        issue.status.as_str(),
        &issue.priority.to_string(),
        issue.issue_type.as_str(),
        issue.assignee.as_str(),
    ]
    .join("\u{0}")
}

/// Fields compared field-by-field for exact-match / collision classification
/// (§4.6 DetectCollisions step 2). Timestamps and dependencies excluded.
fn differing_fields(existing: &Issue, incoming: &Issue) -> Vec<String> {
    let mut diffs = Vec::new();
    macro_rules! check {
        ($field:ident) => {
            if existing.$field != incoming.$field {
                diffs.push(stringify!($field).to_string());
            }
        };
    }
    check!(title);
    check!(description);
    check!(design);
    check!(acceptance_criteria);
    check!(notes);
    check!(priority);
    check!(estimated_minutes);
    check!(external_ref);
    if existing.status != incoming.status {
        diffs.push("status".to_string());
    }
    if existing.issue_type != incoming.issue_type {
        diffs.push("issue_type".to_string());
    }
    if existing.assignee != incoming.assignee {
        diffs.push("assignee".to_string());
    }
    diffs
}

impl SqliteStore {
    /// Read-only classification pass over an incoming batch (§4.6
    /// DetectCollisions). Never writes to the store.
    pub fn detect_collisions_impl(&self, incoming: &[Issue]) -> Result<CollisionResult> {
        let conn = self.lock_conn()?;

        // Step 1: dedup within the batch, keeping the lexicographically
        // smallest identifier per grouping key.
        let mut by_key: HashMap<String, &Issue> = HashMap::new();
        for issue in incoming {
            by_key
                .entry(grouping_key(issue))
                .and_modify(|existing| {
                    if issue.id < existing.id {
                        *existing = issue;
                    }
                })
                .or_insert(issue);
        }
        let mut deduped: Vec<&Issue> = by_key.into_values().collect();
        deduped.sort_by(|a, b| a.id.cmp(&b.id));

        let mut result = CollisionResult::default();

        for issue in &deduped {
            match maybe_get_issue_on_conn(&conn, &issue.id)? {
                None => result.new_issue_ids.push(issue.id.clone()),
                Some(existing) => {
                    let diffs = differing_fields(&existing, issue);
                    if diffs.is_empty() {
                        result.exact_matches.push(issue.id.clone());
                    } else {
                        result.collisions.push(Collision {
                            id: issue.id.clone(),
                            differing_fields: diffs,
                            remap_incoming: None,
                        });
                    }
                }
            }
        }

        // Step 3: rename candidates -- incoming content hash matches an
        // existing issue under a different identifier.
        for issue in &deduped {
            let incoming_hash = compute_content_hash(issue);
            let mut stmt =
                conn.prepare("SELECT id FROM issues WHERE content_hash = ?1 AND id != ?2")?;
            let matches = stmt
                .query_map(params![incoming_hash, issue.id], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for existing_id in matches {
                result.rename_candidates.push(RenameCandidate {
                    existing_id,
                    incoming_id: issue.id.clone(),
                });
            }
        }

        Ok(result)
    }

    /// Content-hash tie-break: the side with the lexicographically smaller
    /// hash wins; the loser is renumbered (§4.6 ScoreCollisions).
    pub fn score_collisions_impl(
        &self,
        collisions: &mut [Collision],
        incoming: &[Issue],
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        for collision in collisions.iter_mut() {
            let existing = maybe_get_issue_on_conn(&conn, &collision.id)?;
            let incoming_issue = incoming.iter().find(|i| i.id == collision.id);
            let (Some(existing), Some(incoming_issue)) = (existing, incoming_issue) else {
                continue;
            };
            let existing_hash = compute_content_hash(&existing);
            let incoming_hash = compute_content_hash(incoming_issue);
            collision.remap_incoming = Some(incoming_hash > existing_hash);
        }
        Ok(())
    }

    /// Renumbers the losing side of each collision, one independent
    /// transaction per collision -- not atomic across the batch (§4.6
    /// RemapCollisions).
    pub fn remap_collisions_impl(
        &self,
        collisions: &[Collision],
        incoming: &[Issue],
        actor: &str,
    ) -> Result<HashMap<String, String>> {
        let mut mapping = HashMap::new();

        for collision in collisions {
            if collision.remap_incoming != Some(true) {
                continue;
            }
            let Some(incoming_issue) = incoming.iter().find(|i| i.id == collision.id) else {
                continue;
            };

            let conn = self.lock_conn()?;
            let prefix = counters::split_identifier(&collision.id)
                .map(|(p, _)| p)
                .unwrap_or_else(|| collision.id.clone());

            counters::sync_all_counters_on_conn(&conn)?;
            let new_id = counters::allocate_id_on_conn(&conn, &prefix)?;

            let mut losing = incoming_issue.clone();
            losing.id = new_id.clone();
            crate::sqlite::issues::insert_issue(&conn, &losing, actor)?;

            mapping.insert(collision.id.clone(), new_id);
        }

        Ok(mapping)
    }

    /// Rewrites every text field and dependency row referencing a remapped
    /// identifier (§4.6 UpdateReferences).
    pub fn update_references_impl(
        &self,
        mapping: &HashMap<String, String>,
        actor: &str,
    ) -> Result<()> {
        if mapping.is_empty() {
            return Ok(());
        }
        let conn = self.lock_conn()?;

        // Pre-compiled word-bounded matcher cache, one regex + placeholder
        // per mapping entry, reused across every text field of every issue.
        let matchers: Vec<(String, String, Regex, String)> = mapping
            .iter()
            .enumerate()
            .map(|(i, (old_id, new_id))| {
                let pattern = format!(r"\b{}\b", regex::escape(old_id));
                let placeholder = format!("\u{{0}}__REMAP_{i}__\u{{0}}");
                (
                    old_id.clone(),
                    new_id.clone(),
                    Regex::new(&pattern).expect("word-bounded identifier pattern is always valid"),
                    placeholder,
                )
            })
            .collect();

        let mut stmt = conn.prepare(
            "SELECT id, description, design, notes, acceptance_criteria FROM issues",
        )?;
        let rows: Vec<(String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for (id, description, design, notes, acceptance_criteria) in rows {
            let new_description = rewrite_text(&description, &matchers);
            let new_design = rewrite_text(&design, &matchers);
            let new_notes = rewrite_text(&notes, &matchers);
            let new_acceptance_criteria = rewrite_text(&acceptance_criteria, &matchers);

            if new_description != description
                || new_design != design
                || new_notes != notes
                || new_acceptance_criteria != acceptance_criteria
            {
                conn.execute(
                    "UPDATE issues SET description = ?1, design = ?2, notes = ?3,
                     acceptance_criteria = ?4, updated_at = ?5 WHERE id = ?6",
                    params![
                        new_description,
                        new_design,
                        new_notes,
                        new_acceptance_criteria,
                        format_datetime(&chrono::Utc::now()),
                        id,
                    ],
                )?;
                if let Some(mut issue) = maybe_get_issue_on_conn(&conn, &id)? {
                    issue.description = new_description;
                    issue.design = new_design;
                    issue.notes = new_notes;
                    issue.acceptance_criteria = new_acceptance_criteria;
                    let new_hash = compute_content_hash(&issue);
                    conn.execute(
                        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
                        params![new_hash, id],
                    )?;
                }
                crate::sqlite::dirty::mark_dirty_on_conn(&conn, &id)?;
            }
        }

        // Rewrite dependency rows whose source is a remapped-to identifier
        // (a mapping value, never a key -- rewriting on the key side would
        // corrupt the untouched winner's unrelated edges).
        let new_ids: Vec<&String> = mapping.values().collect();
        for new_id in new_ids {
            let mut stmt =
                conn.prepare("SELECT depends_on_id, type FROM dependencies WHERE issue_id = ?1")?;
            let edges: Vec<(String, String)> = stmt
                .query_map(params![new_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            for (target, dep_type) in edges {
                if let Some(new_target) = mapping.get(&target) {
                    remove_dependency_on_conn(&conn, new_id, &target, actor, true)?;
                    add_dependency_on_conn(
                        &conn,
                        &Dependency {
                            issue_id: new_id.clone(),
                            depends_on_id: new_target.clone(),
                            dep_type: DependencyType::from(dep_type),
                            created_at: chrono::Utc::now(),
                            created_by: actor.to_string(),
                        },
                        actor,
                        true,
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Applies the caller-approved resolution: for renames, deletes the
    /// superseded old-ID row (references must already have been rewritten
    /// via [`Self::update_references_impl`]); remaps were already applied
    /// by [`Self::remap_collisions_impl`] (§4.6 ApplyCollisionResolution).
    pub fn apply_collision_resolution_impl(
        &self,
        result: &CollisionResult,
        mapping: &HashMap<String, String>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        for rename in &result.rename_candidates {
            if mapping.contains_key(&rename.existing_id) {
                crate::sqlite::issues::delete_issue_on_conn(&conn, &rename.existing_id)?;
            }
        }
        Ok(())
    }
}

fn rewrite_text(text: &str, matchers: &[(String, String, Regex, String)]) -> String {
    if matchers.iter().all(|(_, _, re, _)| !re.is_match(text)) {
        return text.to_string();
    }
    let mut rewritten = text.to_string();
    for (_, _, re, placeholder) in matchers {
        if re.is_match(&rewritten) {
            rewritten = re.replace_all(&rewritten, placeholder.as_str()).into_owned();
        }
    }
    for (_, new_id, _, placeholder) in matchers {
        rewritten = rewritten.replace(placeholder.as_str(), new_id);
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn detect_collisions_classifies_new_and_exact() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Existing").id("bd-c1").build(), "alice")
            .unwrap();

        let existing_copy = store.get_issue_impl("bd-c1").unwrap();
        let new_issue = IssueBuilder::new("Brand new").id("bd-c2").build();

        let result = store
            .detect_collisions_impl(&[existing_copy, new_issue])
            .unwrap();
        assert_eq!(result.exact_matches, vec!["bd-c1".to_string()]);
        assert_eq!(result.new_issue_ids, vec!["bd-c2".to_string()]);
        assert!(result.collisions.is_empty());
    }

    #[test]
    fn detect_collisions_flags_differing_content() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Original").id("bd-c3").build(), "alice")
            .unwrap();

        let incoming = IssueBuilder::new("Changed title").id("bd-c3").build();
        let result = store.detect_collisions_impl(&[incoming]).unwrap();
        assert_eq!(result.collisions.len(), 1);
        assert_eq!(result.collisions[0].id, "bd-c3");
        assert!(result.collisions[0]
            .differing_fields
            .contains(&"title".to_string()));
    }

    #[test]
    fn detect_collisions_dedups_batch_by_grouping_key() {
        let store = test_store();
        let a = IssueBuilder::new("Same content").id("bd-c9").build();
        let mut b = IssueBuilder::new("Same content").id("bd-c4").build();
        b.description = a.description.clone();

        let result = store.detect_collisions_impl(&[a, b]).unwrap();
        // Only the lexicographically smallest id (bd-c4) survives dedup.
        assert_eq!(result.new_issue_ids, vec!["bd-c4".to_string()]);
    }

    #[test]
    fn score_collisions_picks_smaller_hash_as_winner() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Original").id("bd-c5").build(), "alice")
            .unwrap();
        let incoming = IssueBuilder::new("Changed").id("bd-c5").build();

        let mut collisions = vec![Collision {
            id: "bd-c5".to_string(),
            differing_fields: vec!["title".to_string()],
            remap_incoming: None,
        }];
        store
            .score_collisions_impl(&mut collisions, &[incoming])
            .unwrap();
        assert!(collisions[0].remap_incoming.is_some());
    }

    #[test]
    fn remap_collisions_creates_losing_record_under_new_id() {
        let store = test_store();
        store.set_config_impl("issue_prefix", "bd").unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("Original").id("bd-1").build(), "alice")
            .unwrap();
        let incoming = IssueBuilder::new("Changed").id("bd-1").build();

        let collisions = vec![Collision {
            id: "bd-1".to_string(),
            differing_fields: vec!["title".to_string()],
            remap_incoming: Some(true),
        }];
        let mapping = store
            .remap_collisions_impl(&collisions, &[incoming], "alice")
            .unwrap();
        assert_eq!(mapping.len(), 1);
        let new_id = mapping.get("bd-1").unwrap();
        assert_ne!(new_id, "bd-1");
        let moved = store.get_issue_impl(new_id).unwrap();
        assert_eq!(moved.title, "Changed");
        // Winner stays under the shared id, untouched.
        assert_eq!(store.get_issue_impl("bd-1").unwrap().title, "Original");
    }

    #[test]
    fn update_references_rewrites_text_word_bounded() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("Refers to bd-1")
                    .id("bd-5")
                    .description("see bd-1 and bd-10 for context")
                    .build(),
                "alice",
            )
            .unwrap();

        let mut mapping = HashMap::new();
        mapping.insert("bd-1".to_string(), "bd-100".to_string());
        store.update_references_impl(&mapping, "alice").unwrap();

        let issue = store.get_issue_impl("bd-5").unwrap();
        assert_eq!(issue.description, "see bd-100 and bd-10 for context");
    }

    fn build_matchers(mapping: &HashMap<String, String>) -> Vec<(String, String, Regex, String)> {
        mapping
            .iter()
            .enumerate()
            .map(|(i, (old_id, new_id))| {
                let pattern = format!(r"\b{}\b", regex::escape(old_id));
                let placeholder = format!("\u{{0}}__REMAP_{i}__\u{{0}}");
                (
                    old_id.clone(),
                    new_id.clone(),
                    Regex::new(&pattern).unwrap(),
                    placeholder,
                )
            })
            .collect()
    }

    proptest::proptest! {
        /// `ReplaceIDReferences(text, mapping)` is idempotent when the
        /// mapping's keys and values are disjoint (§8): applying the
        /// word-bounded, two-phase rewrite twice equals applying it once.
        #[test]
        fn rewrite_text_is_idempotent_for_disjoint_mapping(
            suffix_a in 1u32..500,
            suffix_b in 501u32..1000,
            filler in "[a-z ]{0,20}",
        ) {
            let old_id = format!("bd-{suffix_a}");
            let new_id = format!("bd-{suffix_b}");
            let mut mapping = HashMap::new();
            mapping.insert(old_id.clone(), new_id.clone());
            let matchers = build_matchers(&mapping);

            let text = format!("{filler} {old_id} {filler}");
            let once = rewrite_text(&text, &matchers);
            let twice = rewrite_text(&once, &matchers);
            proptest::prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn update_references_two_phase_avoids_chained_remap() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("Chain test")
                    .id("bd-6")
                    .description("bd-1 depends on bd-100")
                    .build(),
                "alice",
            )
            .unwrap();

        let mut mapping = HashMap::new();
        mapping.insert("bd-1".to_string(), "bd-100".to_string());
        mapping.insert("bd-100".to_string(), "bd-5".to_string());
        store.update_references_impl(&mapping, "alice").unwrap();

        let issue = store.get_issue_impl("bd-6").unwrap();
        // bd-1 -> bd-100 and the original bd-100 -> bd-5, without chaining
        // through the first replacement.
        assert_eq!(issue.description, "bd-100 depends on bd-5");
    }
}
