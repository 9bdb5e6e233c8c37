//! Unified domain model for task/event/project/note items.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep entity-local lifecycle rules (status, completion, sub-items) next
//!   to the data they protect.
//!
//! # Invariants
//! - Every item is identified by a stable `ItemId`.
//! - `is_completed`, `status == Completed` and `completed_at` always agree.
//! - Status history entries are immutable once created.

pub mod item;
pub mod status_history;

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
