//! Append-only audit trail (§3 Event, §4.7 EventLog).
//!
//! A comment is represented as a `commented`-kind event; there is no separate
//! comments table (§3.1 SUPPLEMENT).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use beads_core::enums::EventType;
use beads_core::event::Event;

use crate::error::Result;
use crate::sqlite::dirty;
use crate::sqlite::issues::{format_datetime, parse_datetime};
use crate::sqlite::store::SqliteStore;

/// Inserts an event row and returns its auto-assigned id. Shared by every
/// module that needs to append to the audit trail.
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            comment,
            created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn scan_event(row: &Row) -> rusqlite::Result<Event> {
    let created_at: String = row.get(7)?;
    Ok(Event {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        event_type: EventType::from(row.get::<_, String>(2)?),
        actor: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        comment: row.get(6)?,
        created_at: crate::sqlite::issues::parse_datetime(&created_at),
    })
}

const EVENT_COLUMNS: &str =
    "id, issue_id, event_type, actor, old_value, new_value, comment, created_at";

pub(crate) fn add_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    actor: &str,
    text: &str,
) -> Result<Event> {
    // Truncate to the millisecond precision `format_datetime` stores, so the
    // returned Event matches what a subsequent GetEvents fetch would produce.
    let now = parse_datetime(&format_datetime(&Utc::now()));
    let id = emit_event(
        conn,
        issue_id,
        EventType::Commented,
        actor,
        None,
        None,
        Some(text),
        &format_datetime(&now),
    )?;
    dirty::mark_dirty_on_conn(conn, issue_id)?;
    Ok(Event {
        id,
        issue_id: issue_id.to_string(),
        event_type: EventType::Commented,
        actor: actor.to_string(),
        old_value: None,
        new_value: None,
        comment: Some(text.to_string()),
        created_at: now,
    })
}

/// Appends a comment preserving an original (e.g. imported) timestamp,
/// instead of stamping with the current time.
pub(crate) fn import_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> Result<Event> {
    let id = emit_event(
        conn,
        issue_id,
        EventType::Commented,
        author,
        None,
        None,
        Some(text),
        &format_datetime(&created_at),
    )?;
    Ok(Event {
        id,
        issue_id: issue_id.to_string(),
        event_type: EventType::Commented,
        actor: author.to_string(),
        old_value: None,
        new_value: None,
        comment: Some(text.to_string()),
        created_at,
    })
}

pub(crate) fn get_events_on_conn(
    conn: &Connection,
    issue_id: &str,
    limit: i32,
) -> Result<Vec<Event>> {
    let sql = if limit > 0 {
        format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE issue_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        )
    } else {
        format!("SELECT {EVENT_COLUMNS} FROM events WHERE issue_id = ?1 ORDER BY created_at DESC, id DESC")
    };
    let mut stmt = conn.prepare(&sql)?;
    let events = if limit > 0 {
        stmt.query_map(params![issue_id, limit], scan_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    } else {
        stmt.query_map(params![issue_id], scan_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    };
    Ok(events)
}

pub(crate) fn get_all_events_since_on_conn(
    conn: &Connection,
    since_id: i64,
) -> Result<Vec<Event>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id > ?1 ORDER BY id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params![since_id], scan_event)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

impl SqliteStore {
    pub fn add_comment_impl(&self, issue_id: &str, author: &str, text: &str) -> Result<Event> {
        let conn = self.lock_conn()?;
        add_comment_on_conn(&conn, issue_id, author, text)
    }

    pub fn get_events_impl(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        get_events_on_conn(&conn, issue_id, limit)
    }

    pub fn get_all_events_since_impl(&self, since_id: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        get_all_events_since_on_conn(&conn, since_id)
    }
}
