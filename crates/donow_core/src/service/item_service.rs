//! Item use-case service.
//!
//! # Responsibility
//! - Provide the public create/update/delete/status/query entry points.
//! - Pair every status change with exactly one ledger entry in the same
//!   commit.
//! - Map lower-layer failures into four caller-facing error kinds.
//!
//! # Invariants
//! - Every operation takes an explicit acting user id; it stamps ownership
//!   and ledger entries and is not used for authorization.
//! - Writes go through `ItemRepository::commit`, so an item write and its
//!   ledger entry persist together or not at all.
//! - Returned items are read back from storage after each write.
//! - Logs carry ids, kinds and counts only, never titles or text.

use crate::enrich::{derive_title, Enricher, EnrichmentSource};
use crate::model::item::{Item, ItemId, ItemStatus, ItemType, ItemValidationError, Priority};
use crate::model::status_history::{StatusHistory, StatusHistoryEntry};
use crate::repo::item_repo::{normalize_tags, ItemChange, ItemListQuery, ItemRepository, RepoError};
use crate::service::hierarchy_service::{HierarchyError, HierarchyManager};
use log::{info, warn};
use thiserror::Error;

/// Caller-facing item service error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemServiceError {
    /// Item, parent or history owner does not exist.
    #[error("item not found: {0}")]
    NotFound(ItemId),
    /// Input or linkage violates an item rule.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A competing writer won; reload and retry.
    #[error("conflicting update: {0}")]
    Conflict(String),
    /// Storage failed for a reason the caller cannot fix.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<RepoError> for ItemServiceError {
    fn from(value: RepoError) -> Self {
        if value.is_contention() {
            return Self::Conflict(value.to_string());
        }
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Validation(err) => Self::Validation(err.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<HierarchyError> for ItemServiceError {
    fn from(value: HierarchyError) -> Self {
        match value {
            HierarchyError::ItemNotFound(id) | HierarchyError::ParentNotFound(id) => {
                Self::NotFound(id)
            }
            err @ HierarchyError::CycleDetected { .. } => Self::Validation(err.to_string()),
            HierarchyError::Repo(err) => err.into(),
        }
    }
}

impl From<ItemValidationError> for ItemServiceError {
    fn from(value: ItemValidationError) -> Self {
        Self::Validation(value.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ItemServiceError>;

/// Input for creating one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateItemRequest {
    pub title: String,
    pub description: Option<String>,
    pub kind: ItemType,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub due_date: Option<i64>,
    pub event_time: Option<i64>,
    pub reminder_time: Option<i64>,
    /// Creates the item as a sub-item of this parent.
    pub parent_id: Option<ItemId>,
    pub tags: Vec<String>,
    pub original_input: Option<String>,
}

impl CreateItemRequest {
    pub fn new(kind: ItemType, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            kind,
            priority: None,
            category: None,
            due_date: None,
            event_time: None,
            reminder_time: None,
            parent_id: None,
            tags: Vec::new(),
            original_input: None,
        }
    }
}

/// Partial update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateItemRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub due_date: Option<i64>,
    pub event_time: Option<i64>,
    pub reminder_time: Option<i64>,
    pub status: Option<ItemStatus>,
    /// Completion toggle; must agree with `status` when both are set.
    pub is_completed: Option<bool>,
    /// Comment recorded on the ledger entry when the status changes.
    pub status_comment: Option<String>,
    /// `Some(None)` moves the item to top level.
    pub parent_id: Option<Option<ItemId>>,
    /// Replaces the whole tag set.
    pub tags: Option<Vec<String>>,
}

/// How much of each item's subtree a read populates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubItemDepth {
    /// No sub-items.
    #[default]
    Flat,
    /// Children down to the given number of levels.
    Levels(u32),
    /// The whole subtree.
    Full,
}

impl SubItemDepth {
    fn as_limit(self) -> Option<u32> {
        match self {
            Self::Flat => Some(0),
            Self::Levels(levels) => Some(levels),
            Self::Full => None,
        }
    }
}

/// Use-case service over one item repository.
pub struct ItemService<R: ItemRepository> {
    repo: R,
}

impl<R: ItemRepository> ItemService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    fn hierarchy(&self) -> HierarchyManager<'_, R> {
        HierarchyManager::new(&self.repo)
    }

    fn load(&self, id: ItemId) -> ServiceResult<Item> {
        self.repo
            .get_item(id)?
            .ok_or(ItemServiceError::NotFound(id))
    }

    fn ensure_exists(&self, id: ItemId) -> ServiceResult<()> {
        if self.repo.item_exists(id)? {
            Ok(())
        } else {
            Err(ItemServiceError::NotFound(id))
        }
    }

    /// Creates a `Todo` item with its initial ledger entry.
    ///
    /// A request carrying `parent_id` is routed through [`Self::add_sub_item`].
    pub fn create(&self, acting_user_id: &str, request: &CreateItemRequest) -> ServiceResult<Item> {
        if let Some(parent_id) = request.parent_id {
            return self.add_sub_item(acting_user_id, parent_id, request);
        }

        let item = build_item(acting_user_id, request)?;
        let entry = StatusHistoryEntry::initial(&item, acting_user_id);
        self.repo.commit(&[ItemChange::Insert {
            item: &item,
            entry: &entry,
        }])?;
        info!(
            "event=item_create module=item_service status=ok item_id={} kind={} tags={}",
            item.id,
            item.kind,
            item.tags.len()
        );
        self.load(item.id)
    }

    /// Creates a child item under `parent_id`.
    ///
    /// The child insert, its ledger entry and the parent's `updated_at`
    /// refresh share one commit.
    pub fn add_sub_item(
        &self,
        acting_user_id: &str,
        parent_id: ItemId,
        request: &CreateItemRequest,
    ) -> ServiceResult<Item> {
        let mut parent = self.load(parent_id)?;
        let child = build_item(acting_user_id, request)?;
        let child = parent.add_sub_item(child)?.clone();
        let entry = StatusHistoryEntry::initial(&child, acting_user_id);

        self.repo.commit(&[
            ItemChange::Insert {
                item: &child,
                entry: &entry,
            },
            ItemChange::Update {
                item: &parent,
                entry: None,
            },
        ])?;
        info!(
            "event=item_add_sub_item module=item_service status=ok item_id={} parent_id={parent_id} kind={}",
            child.id, child.kind
        );
        self.load(child.id)
    }

    /// Applies a partial update.
    ///
    /// Status and completion changes go through `Item::change_status` and
    /// add one ledger entry to the same commit. Parent changes are checked by
    /// the hierarchy manager first.
    pub fn update(
        &self,
        acting_user_id: &str,
        id: ItemId,
        request: &UpdateItemRequest,
    ) -> ServiceResult<Item> {
        let mut item = self.load(id)?;
        let target_status = resolve_target_status(&item, request)?;

        if let Some(title) = request.title.as_ref() {
            item.set_title(title.as_str())?;
        }
        if let Some(description) = request.description.as_ref() {
            item.description = Some(description.clone()).filter(|value| !value.trim().is_empty());
        }
        if let Some(priority) = request.priority {
            item.priority = Some(priority);
        }
        if let Some(category) = request.category.as_ref() {
            item.category = Some(category.trim().to_string()).filter(|value| !value.is_empty());
        }
        if let Some(due_date) = request.due_date {
            item.due_date = Some(due_date);
        }
        if let Some(event_time) = request.event_time {
            item.event_time = Some(event_time);
        }
        if let Some(reminder_time) = request.reminder_time {
            item.reminder_time = Some(reminder_time);
        }
        if let Some(tags) = request.tags.as_ref() {
            item.tags = normalize_tags(tags);
        }
        if let Some(new_parent_id) = request.parent_id {
            if new_parent_id != item.parent_id {
                self.hierarchy().ensure_can_link(id, new_parent_id)?;
                item.parent_id = new_parent_id;
            }
        }

        let entry = target_status.map(|status| {
            let transition = item.change_status(status);
            StatusHistoryEntry::transition(
                id,
                transition,
                request.status_comment.clone(),
                acting_user_id,
            )
        });
        item.touch();

        self.repo.commit(&[ItemChange::Update {
            item: &item,
            entry: entry.as_ref(),
        }])?;
        info!(
            "event=item_update module=item_service status=ok item_id={id} status_changed={}",
            entry.is_some()
        );
        self.load(id)
    }

    /// Deletes an item and its whole subtree. Returns the deleted ids.
    pub fn delete(&self, acting_user_id: &str, id: ItemId) -> ServiceResult<Vec<ItemId>> {
        let deleted = self.hierarchy().delete_subtree(id)?;
        info!(
            "event=item_delete module=item_service status=ok item_id={id} deleted={} user_id={acting_user_id}",
            deleted.len()
        );
        Ok(deleted)
    }

    /// Moves an item under `new_parent_id`, or to top level with `None`.
    pub fn move_item(
        &self,
        acting_user_id: &str,
        id: ItemId,
        new_parent_id: Option<ItemId>,
    ) -> ServiceResult<Item> {
        let item = self.hierarchy().reparent(id, new_parent_id)?;
        info!("event=item_move module=item_service status=ok item_id={id} user_id={acting_user_id}");
        Ok(item)
    }

    /// Sets the status and records one ledger entry, even for same-state
    /// transitions.
    pub fn change_status(
        &self,
        acting_user_id: &str,
        id: ItemId,
        new_status: ItemStatus,
        comment: Option<String>,
    ) -> ServiceResult<Item> {
        let mut item = self.load(id)?;
        let transition = item.change_status(new_status);
        let entry = StatusHistoryEntry::transition(id, transition, comment, acting_user_id);

        self.repo.commit(&[ItemChange::Update {
            item: &item,
            entry: Some(&entry),
        }])?;
        info!(
            "event=item_status module=item_service status=ok item_id={id} from={} to={}",
            transition.from, transition.to
        );
        self.load(id)
    }

    pub fn mark_completed(&self, acting_user_id: &str, id: ItemId) -> ServiceResult<Item> {
        self.change_status(acting_user_id, id, ItemStatus::Completed, None)
    }

    /// Reopens the item as `Todo`, whatever status it had before.
    pub fn mark_not_completed(&self, acting_user_id: &str, id: ItemId) -> ServiceResult<Item> {
        self.change_status(acting_user_id, id, ItemStatus::Todo, None)
    }

    /// Loads one item with sub-items populated to `depth`.
    pub fn get(&self, id: ItemId, depth: SubItemDepth) -> ServiceResult<Item> {
        Ok(self.hierarchy().load_with_sub_items(id, depth.as_limit())?)
    }

    /// Lists items newest first, each populated to `depth`.
    pub fn get_all(&self, query: &ItemListQuery, depth: SubItemDepth) -> ServiceResult<Vec<Item>> {
        let mut items = self.repo.list_items(query)?;
        if depth != SubItemDepth::Flat {
            let hierarchy = self.hierarchy();
            for item in &mut items {
                hierarchy.populate_sub_items(item, depth.as_limit())?;
            }
        }
        Ok(items)
    }

    /// Lists direct children, oldest first.
    pub fn get_sub_items(&self, parent_id: ItemId) -> ServiceResult<Vec<Item>> {
        self.ensure_exists(parent_id)?;
        Ok(self.repo.list_children(parent_id)?)
    }

    /// Returns the ledger for one item, oldest first.
    pub fn get_status_history(&self, id: ItemId) -> ServiceResult<StatusHistory> {
        self.ensure_exists(id)?;
        Ok(self.repo.list_for(id)?)
    }

    /// Ancestor ids of one item, nearest parent first.
    pub fn get_ancestors(&self, id: ItemId) -> ServiceResult<Vec<ItemId>> {
        Ok(self.hierarchy().ancestors(id)?)
    }

    /// Creates an item from free text after time-bounded enrichment.
    ///
    /// Enrichment failures are absorbed by the enricher's fallback, so only
    /// blank input or storage errors fail this call.
    pub async fn create_from_text(
        &self,
        acting_user_id: &str,
        text: &str,
        kind: ItemType,
        enricher: &Enricher,
    ) -> ServiceResult<Item> {
        if text.trim().is_empty() {
            return Err(ItemServiceError::Validation(
                "input text must not be blank".to_string(),
            ));
        }

        let enrichment = enricher.enhance(text, kind).await;
        let source = enrichment.source;
        let title = enrichment
            .title
            .or_else(|| derive_title(text))
            .ok_or(ItemValidationError::EmptyTitle)?;

        let mut request = CreateItemRequest::new(kind, title);
        request.description = enrichment.description;
        request.priority = enrichment.suggested_priority;
        request.category = enrichment.suggested_category;
        request.tags = enrichment.suggested_tags;
        request.original_input = Some(text.to_string());
        match kind {
            ItemType::Task | ItemType::Project => request.due_date = enrichment.suggested_date_time,
            ItemType::Event | ItemType::Note => {
                request.event_time = enrichment.suggested_date_time
            }
        }

        let item = self.create(acting_user_id, &request)?;
        if source == EnrichmentSource::Fallback {
            warn!(
                "event=item_create_from_text module=item_service status=ok item_id={} enrichment=fallback",
                item.id
            );
        } else {
            info!(
                "event=item_create_from_text module=item_service status=ok item_id={} enrichment=provider",
                item.id
            );
        }
        Ok(item)
    }
}

fn build_item(acting_user_id: &str, request: &CreateItemRequest) -> ServiceResult<Item> {
    let mut item = Item::new(request.kind, request.title.as_str())?;
    item.description = request
        .description
        .clone()
        .filter(|value| !value.trim().is_empty());
    item.priority = request.priority;
    item.category = request
        .category
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    item.due_date = request.due_date;
    item.event_time = request.event_time;
    item.reminder_time = request.reminder_time;
    item.tags = normalize_tags(&request.tags);
    item.owner_id = acting_user_id.to_string();
    item.original_input = request.original_input.clone();
    Ok(item)
}

/// Works out which status an update applies, if any.
///
/// `is_completed` alone only changes status when it flips completion.
fn resolve_target_status(
    item: &Item,
    request: &UpdateItemRequest,
) -> ServiceResult<Option<ItemStatus>> {
    match (request.status, request.is_completed) {
        (Some(status), Some(is_completed)) if status.is_completed() != is_completed => {
            Err(ItemServiceError::Validation(format!(
                "status {status} contradicts is_completed={is_completed}"
            )))
        }
        (Some(status), _) => Ok(Some(status)),
        (None, Some(true)) if !item.is_completed => Ok(Some(ItemStatus::Completed)),
        (None, Some(false)) if item.is_completed => Ok(Some(ItemStatus::Todo)),
        (None, _) => Ok(None),
    }
}
