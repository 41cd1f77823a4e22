//! Envelope parsing for Bitrix24 task webhooks.
//!
//! Bitrix24 does not use one canonical field-name convention across its event
//! surface: payloads arrive with upper-case REST names (`TITLE`), lower-case
//! variants (`title`), numbers encoded as strings, and several date formats.
//! Normalization probes an explicit candidate list per field and never aborts
//! a request over an unparseable value; the field just falls back to its
//! neutral default.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Subscribed task lifecycle events. Anything else is rejected before the
/// filter stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TaskAdded,
    TaskUpdated,
}

impl EventKind {
    pub fn label(self) -> &'static str {
        match self {
            EventKind::TaskAdded => "task_added",
            EventKind::TaskUpdated => "task_updated",
        }
    }
}

/// Canonical task event, immutable once constructed. The filter stages only
/// read it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub kind: EventKind,
    pub task_id: String,
    pub title: String,
    pub priority: i64,
    pub is_important: bool,
    pub deadline: Option<NaiveDateTime>,
    pub created_by: String,
    pub creator_name: String,
    pub responsible_id: String,
    pub responsible_name: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("unrecognized event kind '{0}'")]
    UnknownEventKind(String),
    #[error("event envelope carries no task data")]
    MissingTaskData,
}

const TITLE_FALLBACK: &str = "Без названия";

/// Markers accepted as "set" for the boolean-ish IMPORTANT field.
const IMPORTANT_MARKERS: &[&str] = &["1", "true", "yes", "важно", "important"];

/// Bitrix24 status identifiers conventionally used for flagged tasks.
const IMPORTANT_STATUS_IDS: &[&str] = &["2", "3"];

const DEADLINE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%d.%m.%Y %H:%M:%S",
];

const DEADLINE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];

/// Builds a [`TaskEvent`] from a webhook envelope `{"event": ..., "data": {...}}`.
///
/// Deterministic: the same payload always yields the same record.
pub fn normalize_event(
    envelope: &Value,
    portal_domain: Option<&str>,
) -> Result<TaskEvent, NormalizeError> {
    let kind = parse_event_kind(envelope)?;
    let task = envelope
        .get("data")
        .filter(|data| data.as_object().is_some_and(|object| !object.is_empty()))
        .ok_or(NormalizeError::MissingTaskData)?;

    let task_id = string_field(task, &["ID", "id"]);
    let responsible_id = string_field(task, &["RESPONSIBLE_ID", "responsible_id"]);
    let created_by = string_field(task, &["CREATED_BY", "created_by"]);

    let mut title = string_field(task, &["TITLE", "title"]);
    if title.is_empty() {
        title = TITLE_FALLBACK.to_string();
    }
    let responsible_name = non_empty_or(
        string_field(task, &["RESPONSIBLE_NAME", "responsible_name"]),
        &responsible_id,
    );
    let creator_name = non_empty_or(
        string_field(task, &["CREATED_BY_NAME", "created_by_name"]),
        &created_by,
    );

    let priority = string_field(task, &["PRIORITY", "priority"])
        .parse::<i64>()
        .unwrap_or(0);
    let deadline = parse_deadline(&string_field(task, &["DEADLINE", "deadline"]));
    let is_important = derive_importance(task);
    let link = task_link(portal_domain, &responsible_id, &task_id);

    Ok(TaskEvent {
        kind,
        task_id,
        title,
        priority,
        is_important,
        deadline,
        created_by,
        creator_name,
        responsible_id,
        responsible_name,
        link,
    })
}

fn parse_event_kind(envelope: &Value) -> Result<EventKind, NormalizeError> {
    let raw = envelope
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();
    let upper = raw.to_ascii_uppercase();
    if upper.contains("TASKADD") {
        Ok(EventKind::TaskAdded)
    } else if upper.contains("TASKUPDATE") {
        Ok(EventKind::TaskUpdated)
    } else {
        Err(NormalizeError::UnknownEventKind(raw.to_string()))
    }
}

/// Ordered-precedence importance probe: status text, then the boolean-ish
/// IMPORTANT flag, then the status identifier. The first candidate that is
/// present and non-empty decides.
fn derive_importance(task: &Value) -> bool {
    let status = string_field(task, &["STATUS", "status"]);
    if !status.is_empty() {
        let lowered = status.to_lowercase();
        return lowered.contains("important") || lowered.contains("важно");
    }

    let important = string_field(task, &["IMPORTANT", "important"]);
    if !important.is_empty() {
        return IMPORTANT_MARKERS.contains(&important.to_lowercase().as_str());
    }

    let status_id = string_field(task, &["STATUS_ID", "status_id"]);
    if !status_id.is_empty() {
        return IMPORTANT_STATUS_IDS.contains(&status_id.as_str());
    }

    false
}

fn parse_deadline(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in DEADLINE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }
    for format in DEADLINE_DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, format) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Deep link into the portal task card, or an inert anchor when no portal
/// domain is configured.
fn task_link(portal_domain: Option<&str>, responsible_id: &str, task_id: &str) -> String {
    match portal_domain.map(str::trim).filter(|domain| !domain.is_empty()) {
        Some(domain) => {
            let host = domain
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/');
            format!("https://{host}/company/personal/user/{responsible_id}/tasks/task/view/{task_id}/")
        }
        None => format!("#task_{task_id}"),
    }
}

/// First present candidate field rendered as trimmed text; strings, numbers,
/// and booleans are accepted, anything else counts as absent.
fn string_field(task: &Value, candidates: &[&str]) -> String {
    for name in candidates {
        match task.get(name) {
            Some(Value::String(value)) => {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
            Some(Value::Number(value)) => return value.to_string(),
            Some(Value::Bool(value)) => return value.to_string(),
            _ => {}
        }
    }
    String::new()
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
