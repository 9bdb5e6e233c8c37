//! Status history ledger records.
//!
//! # Invariants
//! - One entry per applied status change, including the creation entry.
//! - `old_status` is `None` only for the creation entry.
//! - Entries are never mutated after construction.

use crate::model::item::{Item, ItemId, ItemStatus, StatusTransition};
use crate::model::now_epoch_ms;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for one ledger entry.
pub type HistoryEntryId = Uuid;

/// One immutable status transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: HistoryEntryId,
    pub item_id: ItemId,
    pub old_status: Option<ItemStatus>,
    pub new_status: ItemStatus,
    pub comment: Option<String>,
    /// Unix epoch milliseconds.
    pub changed_at: i64,
    pub changed_by_user_id: String,
}

impl StatusHistoryEntry {
    /// Entry recorded when an item is first persisted.
    pub fn initial(item: &Item, user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item.id,
            old_status: None,
            new_status: item.status,
            comment: None,
            changed_at: item.created_at,
            changed_by_user_id: user_id.to_string(),
        }
    }

    /// Entry for one applied transition.
    pub fn transition(
        item_id: ItemId,
        transition: StatusTransition,
        comment: Option<String>,
        user_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            old_status: Some(transition.from),
            new_status: transition.to,
            comment: comment
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            changed_at: now_epoch_ms(),
            changed_by_user_id: user_id.to_string(),
        }
    }

    pub fn is_initial(&self) -> bool {
        self.old_status.is_none()
    }
}

/// Ordered ledger slice for one item, oldest first.
///
/// Iteration is lazy and can be restarted any number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusHistory {
    entries: Vec<StatusHistoryEntry>,
}

impl StatusHistory {
    pub fn new(entries: Vec<StatusHistoryEntry>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StatusHistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry; its `new_status` matches the persisted item status.
    pub fn latest(&self) -> Option<&StatusHistoryEntry> {
        self.entries.last()
    }

    pub fn into_vec(self) -> Vec<StatusHistoryEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a StatusHistory {
    type Item = &'a StatusHistoryEntry;
    type IntoIter = std::slice::Iter<'a, StatusHistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for StatusHistory {
    type Item = StatusHistoryEntry;
    type IntoIter = std::vec::IntoIter<StatusHistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
