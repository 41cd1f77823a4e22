//! Three-stage urgency filter.
//!
//! Stages run strictly in order and short-circuit at the first rejection:
//! importance rejects the bulk of traffic cheapest, authority avoids wasted
//! mapping lookups for non-leader tasks, and urgency gates only what already
//! passed the stricter checks. Recipient resolution happens after the filter,
//! in the server pipeline, because it has no meaning before a target exists.

use chrono::{Duration, NaiveDateTime};
use taskrelay_mapping::MappingTable;

use crate::normalize::TaskEvent;

#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    pub urgent_priority_threshold: i64,
    pub urgent_deadline_hours: i64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            urgent_priority_threshold: 2,
            urgent_deadline_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotImportant,
    CreatorNotLeader,
    NotUrgent,
    NoRecipientMapping,
}

impl RejectReason {
    /// Stable wire label reported in webhook responses and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NotImportant => "not_important",
            RejectReason::CreatorNotLeader => "creator_not_leader",
            RejectReason::NotUrgent => "not_urgent",
            RejectReason::NoRecipientMapping => "no_recipient_mapping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Passed,
    Rejected(RejectReason),
}

/// Runs importance, authority, and urgency in order against one event.
/// Later stages are never evaluated once a stage rejects.
pub fn evaluate_filters(
    event: &TaskEvent,
    table: &MappingTable,
    config: &FilterConfig,
    now: NaiveDateTime,
) -> FilterDecision {
    if !event.is_important {
        return FilterDecision::Rejected(RejectReason::NotImportant);
    }
    if !table.is_leader(&event.created_by) {
        return FilterDecision::Rejected(RejectReason::CreatorNotLeader);
    }
    if !is_urgent(event, config, now) {
        return FilterDecision::Rejected(RejectReason::NotUrgent);
    }
    FilterDecision::Passed
}

/// Priority at or above the threshold is sufficient on its own. Otherwise a
/// deadline qualifies only when it falls strictly within
/// `(now, now + urgent_deadline_hours]`; a deadline at or before `now` is
/// already missed, not pending.
pub fn is_urgent(event: &TaskEvent, config: &FilterConfig, now: NaiveDateTime) -> bool {
    if event.priority >= config.urgent_priority_threshold {
        return true;
    }
    let Some(deadline) = event.deadline else {
        return false;
    };
    deadline > now && deadline <= now + Duration::hours(config.urgent_deadline_hours)
}
