//! Task-event normalization and the urgency filter pipeline.
//!
//! `normalize` turns a raw webhook envelope into a canonical [`TaskEvent`];
//! `filter` decides whether that event deserves a notification. Both are pure
//! with respect to I/O so every decision path is testable in memory.

pub mod filter;
pub mod normalize;

pub use filter::{evaluate_filters, is_urgent, FilterConfig, FilterDecision, RejectReason};
pub use normalize::{normalize_event, EventKind, NormalizeError, TaskEvent};
