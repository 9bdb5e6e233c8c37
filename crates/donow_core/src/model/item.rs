//! Item aggregate.
//!
//! # Responsibility
//! - Define the canonical record shared by task/event/project/note views.
//! - Own status transitions and completion bookkeeping.
//! - Enforce the parent/child rules that are visible from one aggregate.
//!
//! # Invariants
//! - `id` is stable and never reused for another item.
//! - `kind` is fixed at creation; persistence never rewrites it.
//! - `is_completed == (status == Completed) == completed_at.is_some()`.
//! - `updated_at` never moves backwards.

use crate::model::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier for every item.
pub type ItemId = Uuid;

/// Unified category for all item projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Actionable to-do with optional due date.
    Task,
    /// Something that happens at a point in time.
    Event,
    /// Larger unit of work grouping other items.
    Project,
    /// Free-form information.
    Note,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Event => "event",
            Self::Project => "project",
            Self::Note => "note",
        }
    }
}

impl Display for ItemType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = ItemValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "event" => Ok(Self::Event),
            "project" => Ok(Self::Project),
            "note" => Ok(Self::Note),
            _ => Err(ItemValidationError::UnknownType(value.to_string())),
        }
    }
}

/// Item lifecycle state.
///
/// Every state can move to every other state, including itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Todo,
    InProgress,
    Completed,
    OnHold,
    Cancelled,
}

impl ItemStatus {
    /// Externally visible status string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "Todo",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::OnHold => "OnHold",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ItemValidationError;

    /// Accepts the canonical names case-insensitively, plus the
    /// `in_progress` / `on-hold` spellings.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let folded: String = value
            .trim()
            .chars()
            .filter(|ch| *ch != '_' && *ch != '-' && *ch != ' ')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "todo" => Ok(Self::Todo),
            "inprogress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "onhold" => Ok(Self::OnHold),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(ItemValidationError::UnknownStatus(value.to_string())),
        }
    }
}

/// Ordinal priority. `urgent` is accepted as an alias of `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ItemValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" | "urgent" => Ok(Self::Critical),
            _ => Err(ItemValidationError::UnknownPriority(value.to_string())),
        }
    }
}

/// Entity-level validation and linkage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemValidationError {
    #[error("item id must not be nil")]
    NilId,
    #[error("item title must not be blank")]
    EmptyTitle,
    #[error("unknown item status `{0}`")]
    UnknownStatus(String),
    #[error("unknown item type `{0}`")]
    UnknownType(String),
    #[error("unknown priority `{0}`")]
    UnknownPriority(String),
    #[error("completion state mismatch for {id}: status={status} is_completed={is_completed} completed_at_set={completed_at_set}")]
    CompletionMismatch {
        id: ItemId,
        status: ItemStatus,
        is_completed: bool,
        completed_at_set: bool,
    },
    #[error("item {0} cannot be its own parent")]
    SelfParent(ItemId),
    #[error("invalid operation: item {child} already belongs to parent {parent}")]
    AlreadyParented { child: ItemId, parent: ItemId },
    #[error("invalid operation: linking {child} under {parent} would create a cycle")]
    WouldCreateCycle { child: ItemId, parent: ItemId },
}

/// One applied status change, as seen by the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: ItemStatus,
    pub to: ItemStatus,
}

/// Canonical domain record for task/event/project/note data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub description: Option<String>,
    /// Serialized as `type` to match external schema naming.
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub status: ItemStatus,
    pub is_completed: bool,
    /// Unix epoch milliseconds, set iff `is_completed`.
    pub completed_at: Option<i64>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub due_date: Option<i64>,
    pub event_time: Option<i64>,
    pub reminder_time: Option<i64>,
    /// `None` means top-level.
    pub parent_id: Option<ItemId>,
    /// Populated on read by the hierarchy manager; not a stored column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_items: Vec<Item>,
    /// Normalized tag names, sorted.
    #[serde(default)]
    pub tags: Vec<String>,
    /// User that created the item.
    #[serde(default)]
    pub owner_id: String,
    /// Raw free text the item was created from, if any.
    #[serde(default)]
    pub original_input: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Optimistic concurrency token, bumped by every persisted update.
    #[serde(default)]
    pub revision: i64,
}

impl Item {
    /// Creates a new `Todo` item with a generated stable ID.
    ///
    /// # Errors
    /// - `EmptyTitle` when `title` is blank after trimming.
    pub fn new(kind: ItemType, title: impl Into<String>) -> Result<Self, ItemValidationError> {
        Self::with_id(Uuid::new_v4(), kind, title)
    }

    /// Creates a new `Todo` item with a caller-provided stable ID.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(
        id: ItemId,
        kind: ItemType,
        title: impl Into<String>,
    ) -> Result<Self, ItemValidationError> {
        if id.is_nil() {
            return Err(ItemValidationError::NilId);
        }
        let title = normalize_title(title.into())?;
        let now = now_epoch_ms();
        Ok(Self {
            id,
            title,
            description: None,
            kind,
            status: ItemStatus::Todo,
            is_completed: false,
            completed_at: None,
            priority: None,
            category: None,
            due_date: None,
            event_time: None,
            reminder_time: None,
            parent_id: None,
            sub_items: Vec::new(),
            tags: Vec::new(),
            owner_id: String::new(),
            original_input: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        })
    }

    /// Replaces the title, enforcing the non-blank rule.
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), ItemValidationError> {
        self.title = normalize_title(title.into())?;
        self.touch();
        Ok(())
    }

    /// Applies a status change and keeps the completion fields in sync.
    ///
    /// Re-applying `Completed` keeps the original `completed_at`.
    pub fn change_status(&mut self, new_status: ItemStatus) -> StatusTransition {
        let from = self.status;
        let now = now_epoch_ms();
        if new_status.is_completed() {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
            self.is_completed = true;
        } else {
            self.is_completed = false;
            self.completed_at = None;
        }
        self.status = new_status;
        self.touch_at(now);
        StatusTransition {
            from,
            to: new_status,
        }
    }

    /// Marks the item completed. Idempotent apart from `updated_at`.
    pub fn mark_completed(&mut self) -> StatusTransition {
        self.change_status(ItemStatus::Completed)
    }

    /// Reopens the item. Always resets to `Todo`.
    pub fn mark_not_completed(&mut self) -> StatusTransition {
        self.change_status(ItemStatus::Todo)
    }

    /// Links `child` under this item and appends it to `sub_items`.
    ///
    /// Only checks what one aggregate can see: the repository-wide ancestor
    /// walk lives in the hierarchy manager.
    ///
    /// # Errors
    /// - `AlreadyParented` when `child` belongs to another parent.
    /// - `WouldCreateCycle` when `child` is this item or one of its ancestors.
    pub fn add_sub_item(&mut self, mut child: Item) -> Result<&Item, ItemValidationError> {
        if child.id == self.id
            || self.parent_id == Some(child.id)
            || child.contains_descendant(self.id)
        {
            return Err(ItemValidationError::WouldCreateCycle {
                child: child.id,
                parent: self.id,
            });
        }
        if let Some(existing) = child.parent_id {
            if existing != self.id {
                return Err(ItemValidationError::AlreadyParented {
                    child: child.id,
                    parent: existing,
                });
            }
        }

        child.parent_id = Some(self.id);
        child.touch();
        self.sub_items.retain(|sub| sub.id != child.id);
        self.sub_items.push(child);
        self.touch();
        Ok(&self.sub_items[self.sub_items.len() - 1])
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn has_sub_items(&self) -> bool {
        !self.sub_items.is_empty()
    }

    /// Operative scheduling time: due date, then event time, then reminder.
    pub fn effective_time(&self) -> Option<i64> {
        self.due_date.or(self.event_time).or(self.reminder_time)
    }

    /// Returns whether `id` appears anywhere in the loaded subtree.
    pub fn contains_descendant(&self, id: ItemId) -> bool {
        let mut stack: Vec<&Item> = self.sub_items.iter().collect();
        while let Some(current) = stack.pop() {
            if current.id == id {
                return true;
            }
            stack.extend(current.sub_items.iter());
        }
        false
    }

    /// Refreshes `updated_at` to now.
    pub fn touch(&mut self) {
        self.touch_at(now_epoch_ms());
    }

    fn touch_at(&mut self, now: i64) {
        self.updated_at = now.max(self.updated_at);
    }

    /// Validates entity invariants before persistence.
    pub fn validate(&self) -> Result<(), ItemValidationError> {
        if self.id.is_nil() {
            return Err(ItemValidationError::NilId);
        }
        if self.title.trim().is_empty() {
            return Err(ItemValidationError::EmptyTitle);
        }
        if self.parent_id == Some(self.id) {
            return Err(ItemValidationError::SelfParent(self.id));
        }
        let status_completed = self.status.is_completed();
        if status_completed != self.is_completed || self.is_completed != self.completed_at.is_some()
        {
            return Err(ItemValidationError::CompletionMismatch {
                id: self.id,
                status: self.status,
                is_completed: self.is_completed,
                completed_at_set: self.completed_at.is_some(),
            });
        }
        Ok(())
    }
}

fn normalize_title(value: String) -> Result<String, ItemValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ItemValidationError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}
