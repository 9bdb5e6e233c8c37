//! Item hierarchy manager.
//!
//! # Responsibility
//! - Validate parent/child invariants that need repository-wide visibility.
//! - Provide reparent, subtree load, and cascading subtree delete.
//!
//! # Invariants
//! - A new parent must exist and must not be the item or its descendant.
//! - Checks here are advisory for concurrent writers; the repository
//!   re-checks the parent chain inside its write transaction.
//! - Subtree deletion materializes the full id set before removing rows.
//! - Traversals are iterative and carry a visited set, so deep or corrupted
//!   data cannot overflow the stack or loop forever.

use crate::model::item::{Item, ItemId};
use crate::repo::item_repo::{ItemChange, ItemRepository, RepoError};
use log::{info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors from hierarchy operations.
#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),
    #[error("parent item not found: {0}")]
    ParentNotFound(ItemId),
    #[error("moving {item} under {parent} would create a cycle")]
    CycleDetected { item: ItemId, parent: ItemId },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Hierarchy manager over a borrowed repository.
pub struct HierarchyManager<'r, R: ItemRepository> {
    repo: &'r R,
}

impl<'r, R: ItemRepository> HierarchyManager<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// Returns the ancestor chain of `item_id`, nearest parent first.
    pub fn ancestors(&self, item_id: ItemId) -> Result<Vec<ItemId>, HierarchyError> {
        let item = self
            .repo
            .get_item(item_id)?
            .ok_or(HierarchyError::ItemNotFound(item_id))?;

        let mut chain = Vec::new();
        let mut visited = HashSet::from([item_id]);
        let mut cursor = item.parent_id;
        while let Some(current) = cursor {
            if !visited.insert(current) {
                warn!("event=hierarchy_ancestors module=hierarchy status=error error_code=cycle_in_data item_id={item_id}");
                return Err(HierarchyError::CycleDetected {
                    item: item_id,
                    parent: current,
                });
            }
            chain.push(current);
            cursor = self
                .repo
                .get_item(current)?
                .ok_or(HierarchyError::ParentNotFound(current))?
                .parent_id;
        }
        Ok(chain)
    }

    /// Checks that `item_id` may be linked under `new_parent_id`.
    ///
    /// `None` (top-level) is always allowed.
    pub fn ensure_can_link(
        &self,
        item_id: ItemId,
        new_parent_id: Option<ItemId>,
    ) -> Result<(), HierarchyError> {
        let Some(parent_id) = new_parent_id else {
            return Ok(());
        };
        if parent_id == item_id {
            return Err(HierarchyError::CycleDetected {
                item: item_id,
                parent: parent_id,
            });
        }
        if !self.repo.item_exists(parent_id)? {
            return Err(HierarchyError::ParentNotFound(parent_id));
        }
        if self.ancestors(parent_id)?.contains(&item_id) {
            return Err(HierarchyError::CycleDetected {
                item: item_id,
                parent: parent_id,
            });
        }
        Ok(())
    }

    /// Moves one item under a new parent, or to top level with `None`.
    ///
    /// Returns the item as persisted after the move.
    pub fn reparent(
        &self,
        item_id: ItemId,
        new_parent_id: Option<ItemId>,
    ) -> Result<Item, HierarchyError> {
        let mut item = self
            .repo
            .get_item(item_id)?
            .ok_or(HierarchyError::ItemNotFound(item_id))?;
        if item.parent_id == new_parent_id {
            return Ok(item);
        }
        self.ensure_can_link(item_id, new_parent_id)?;

        item.parent_id = new_parent_id;
        item.touch();
        self.repo
            .commit(&[ItemChange::Update {
                item: &item,
                entry: None,
            }])?;
        info!(
            "event=item_reparent module=hierarchy status=ok item_id={item_id} top_level={}",
            new_parent_id.is_none()
        );

        self.repo
            .get_item(item_id)?
            .ok_or(HierarchyError::ItemNotFound(item_id))
    }

    /// Deletes `root_id` and every descendant in one transaction.
    ///
    /// Rows are removed leaves-first. Returns the deleted ids, root first.
    pub fn delete_subtree(&self, root_id: ItemId) -> Result<Vec<ItemId>, HierarchyError> {
        let deleted = self.repo.delete_subtree(root_id).map_err(|err| match err {
            RepoError::NotFound(id) if id == root_id => HierarchyError::ItemNotFound(id),
            other => HierarchyError::Repo(other),
        })?;
        info!(
            "event=item_delete_subtree module=hierarchy status=ok root_id={root_id} deleted={}",
            deleted.len()
        );
        Ok(deleted)
    }

    /// Keeps only items without a parent.
    pub fn filter_top_level(items: Vec<Item>) -> Vec<Item> {
        items.into_iter().filter(Item::is_top_level).collect()
    }

    /// Loads one item with `sub_items` populated down to `depth` levels.
    ///
    /// `None` means unbounded; `Some(0)` loads the item alone.
    pub fn load_with_sub_items(
        &self,
        item_id: ItemId,
        depth: Option<u32>,
    ) -> Result<Item, HierarchyError> {
        let mut item = self
            .repo
            .get_item(item_id)?
            .ok_or(HierarchyError::ItemNotFound(item_id))?;
        self.populate_sub_items(&mut item, depth)?;
        Ok(item)
    }

    /// Fills `sub_items` of an already loaded item.
    ///
    /// Children are fetched breadth-first, then attached deepest level first.
    pub fn populate_sub_items(
        &self,
        item: &mut Item,
        depth: Option<u32>,
    ) -> Result<(), HierarchyError> {
        let mut nodes: HashMap<ItemId, Item> = HashMap::new();
        let mut child_ids: HashMap<ItemId, Vec<ItemId>> = HashMap::new();
        let mut parents = Vec::new();
        let mut visited = HashSet::from([item.id]);
        let mut queue = VecDeque::from([(item.id, 0u32)]);

        while let Some((current, level)) = queue.pop_front() {
            if depth.is_some_and(|limit| level >= limit) {
                continue;
            }
            let mut ids = Vec::new();
            for child in self.repo.list_children(current)? {
                if !visited.insert(child.id) {
                    continue;
                }
                ids.push(child.id);
                queue.push_back((child.id, level + 1));
                nodes.insert(child.id, child);
            }
            parents.push(current);
            child_ids.insert(current, ids);
        }

        // Reverse BFS order finishes every child before its parent.
        for parent in parents.iter().rev() {
            let children: Vec<Item> = child_ids
                .remove(parent)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|id| nodes.remove(&id))
                .collect();
            if *parent == item.id {
                item.sub_items = children;
            } else if let Some(node) = nodes.get_mut(parent) {
                node.sub_items = children;
            }
        }
        Ok(())
    }
}
