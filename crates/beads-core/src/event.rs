//! Event and Label types (§3 Event, §3 Label, §4.7 EventLog, §4.9 LabelStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::EventType;

/// An append-only audit trail entry. A comment is represented as a
/// `commented`-kind event carrying its text in `comment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,

    pub issue_id: String,

    pub event_type: EventType,

    pub actor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// A label (tag) on an issue. The pair (issue_id, label) is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub issue_id: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serde_roundtrip() {
        let e = Event {
            id: 1,
            issue_id: "bd-abc".into(),
            event_type: EventType::Updated,
            actor: "bob".into(),
            old_value: Some("open".into()),
            new_value: Some("closed".into()),
            comment: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::Updated);
        assert_eq!(back.old_value, Some("open".into()));
    }

    #[test]
    fn commented_event_carries_text() {
        let e = Event {
            id: 2,
            issue_id: "bd-abc".into(),
            event_type: EventType::Commented,
            actor: "alice".into(),
            old_value: None,
            new_value: None,
            comment: Some("Looks good to me".into()),
            created_at: Utc::now(),
        };
        assert_eq!(e.comment.as_deref(), Some("Looks good to me"));
    }

    #[test]
    fn label_serde() {
        let l = Label {
            issue_id: "bd-abc".into(),
            label: "tech-debt".into(),
        };
        let json = serde_json::to_string(&l).unwrap();
        let back: Label = serde_json::from_str(&json).unwrap();
        assert_eq!(back.label, "tech-debt");
    }
}
