//! Deterministic content hashing for issues (§3 Issue: Content hash, §6).
//!
//! Produces a SHA-256 hex digest over the content-bearing fields (title,
//! description, design, acceptance criteria, notes, status, priority, issue
//! type, assignee, external ref) -- excludes identifier, timestamps, and
//! dependencies. Recomputed on every write; used for content-addressable
//! identity by the collision resolver (§4.6).

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Separator byte written between fields. Chosen because it cannot appear in
/// any of the hashed text fields (all are UTF-8 strings, which never contain
/// a raw NUL byte).
const SEP: u8 = 0;

/// Computes a deterministic content hash for an issue.
///
/// Hashing the same content twice yields the same digest; changing any
/// hashed field changes the digest. Two clones computing this over identical
/// content produce identical hashes without coordination.
pub fn compute_content_hash(issue: &Issue) -> String {
    let mut h = Sha256::new();

    write_str(&mut h, &issue.title);
    write_str(&mut h, &issue.description);
    write_str(&mut h, &issue.design);
    write_str(&mut h, &issue.acceptance_criteria);
    write_str(&mut h, &issue.notes);
    write_str(&mut h, issue.status.as_str());
    write_int(&mut h, issue.priority);
    write_str(&mut h, issue.issue_type.as_str());
    write_str(&mut h, &issue.assignee);
    write_str_opt(&mut h, issue.external_ref.as_deref());

    format!("{:x}", h.finalize())
}

fn write_str(h: &mut Sha256, s: &str) {
    h.update(s.as_bytes());
    h.update([SEP]);
}

fn write_int(h: &mut Sha256, n: i32) {
    h.update(n.to_string().as_bytes());
    h.update([SEP]);
}

fn write_str_opt(h: &mut Sha256, s: Option<&str>) {
    if let Some(s) = s {
        h.update(s.as_bytes());
    }
    h.update([SEP]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;

    #[test]
    fn content_hash_deterministic() {
        let issue = IssueBuilder::new("Test issue")
            .description("A description")
            .priority(2)
            .build();

        let hash1 = compute_content_hash(&issue);
        let hash2 = compute_content_hash(&issue);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 hex = 64 chars
    }

    #[test]
    fn content_hash_differs_on_change() {
        let issue1 = IssueBuilder::new("Title A").build();
        let issue2 = IssueBuilder::new("Title B").build();
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_id_and_timestamps() {
        let mut issue1 = IssueBuilder::new("Same content").build();
        let mut issue2 = IssueBuilder::new("Same content").build();

        issue1.id = "bd-aaa".into();
        issue2.id = "bd-bbb".into();
        issue1.created_at = chrono::Utc::now();
        issue2.created_at = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_dependencies_and_labels() {
        let mut issue1 = IssueBuilder::new("Same").build();
        let mut issue2 = IssueBuilder::new("Same").build();
        issue1.labels = vec!["bug".into()];
        issue2.labels = Vec::new();
        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_sensitive_to_word_boundary() {
        // "ab" + SEP + "c" must not collide with "a" + SEP + "bc".
        let mut issue1 = IssueBuilder::new("ab").build();
        issue1.description = "c".into();
        let mut issue2 = IssueBuilder::new("a").build();
        issue2.description = "bc".into();
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    proptest::proptest! {
        /// `ContentHash(issue)` is deterministic regardless of the content
        /// (§8): hashing the same issue twice always yields the same digest.
        #[test]
        fn content_hash_deterministic_over_arbitrary_content(
            title in ".{0,64}",
            description in ".{0,64}",
            priority in 0i32..5,
        ) {
            let issue = IssueBuilder::new(title).description(description).priority(priority).build();
            proptest::prop_assert_eq!(compute_content_hash(&issue), compute_content_hash(&issue));
        }

        /// Two issues differing only in title always hash differently (§8:
        /// "hashing two issues differing in any hashed field yields
        /// different results").
        #[test]
        fn content_hash_differs_when_title_differs(
            title_a in "[a-z]{1,32}",
            title_b in "[a-z]{1,32}",
        ) {
            proptest::prop_assume!(title_a != title_b);
            let issue_a = IssueBuilder::new(title_a).build();
            let issue_b = IssueBuilder::new(title_b).build();
            proptest::prop_assert_ne!(compute_content_hash(&issue_a), compute_content_hash(&issue_b));
        }
    }
}
