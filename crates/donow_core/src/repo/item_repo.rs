//! Item repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide load/list/commit/delete APIs over canonical `items` storage.
//! - Group item writes with their ledger entries in one transaction.
//! - Detect lost updates through the `revision` column.
//!
//! # Invariants
//! - Write paths call `Item::validate()` before SQL mutations.
//! - `type`, `owner_id` and `created_at` are written once, on insert.
//! - A ledger entry attached to a write must carry the item's new status.
//! - A parent link is re-checked against the committed ancestor chain inside
//!   the write transaction, so concurrent moves cannot persist a cycle.
//! - Subtree deletes compute their id set inside the deleting transaction.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::item::{Item, ItemId, ItemStatus, ItemType, ItemValidationError, Priority};
use crate::model::status_history::{StatusHistory, StatusHistoryEntry};
use crate::repo::history_repo::{parse_status_column, SqliteStatusLedger, StatusLedger};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::{BTreeSet, HashSet, VecDeque};
use thiserror::Error;
use uuid::Uuid;

const ITEM_SELECT_SQL: &str = "SELECT
    uuid,
    type,
    title,
    description,
    status,
    is_completed,
    completed_at,
    priority,
    category,
    due_date,
    event_time,
    reminder_time,
    parent_uuid,
    owner_id,
    original_input,
    created_at,
    updated_at,
    revision
FROM items";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for item and ledger persistence.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ItemValidationError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("item not found: {0}")]
    NotFound(ItemId),
    #[error("stale write for item {id}: revision {expected} is no longer current")]
    StaleRevision { id: ItemId, expected: i64 },
    #[error("parent chain of {parent} changed: item {item} is now one of its ancestors")]
    ParentChainChanged { item: ItemId, parent: ItemId },
    #[error("invalid persisted item data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl RepoError {
    /// Returns whether the failure came from a competing writer.
    pub fn is_contention(&self) -> bool {
        match self {
            Self::StaleRevision { .. } | Self::ParentChainChanged { .. } => true,
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))) => {
                matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

/// Query options for listing items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemListQuery {
    pub kind: Option<ItemType>,
    pub status: Option<ItemStatus>,
    pub owner_id: Option<String>,
    /// Single-tag exact match, case-insensitive.
    pub tag: Option<String>,
    pub top_level_only: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// One write inside an atomic commit.
#[derive(Debug, Clone, Copy)]
pub enum ItemChange<'a> {
    /// New item plus its creation ledger entry.
    Insert {
        item: &'a Item,
        entry: &'a StatusHistoryEntry,
    },
    /// Existing item at `item.revision`, plus a ledger entry when the
    /// status changed.
    Update {
        item: &'a Item,
        entry: Option<&'a StatusHistoryEntry>,
    },
}

/// Repository interface for item persistence.
pub trait ItemRepository: StatusLedger {
    /// Loads one item without sub-items.
    fn get_item(&self, id: ItemId) -> RepoResult<Option<Item>>;
    /// Lists direct children, oldest first.
    fn list_children(&self, parent_id: ItemId) -> RepoResult<Vec<Item>>;
    /// Lists items newest first.
    fn list_items(&self, query: &ItemListQuery) -> RepoResult<Vec<Item>>;
    /// Applies all changes in one transaction, or none of them.
    ///
    /// An item with a parent fails with `NotFound` when the parent is gone
    /// and with `ParentChainChanged` when the item is among the parent's
    /// committed ancestors.
    fn commit(&self, changes: &[ItemChange<'_>]) -> RepoResult<()>;
    /// Deletes `root_id` and every descendant with their tag links and
    /// ledger rows in one transaction. Returns the deleted ids, root first.
    fn delete_subtree(&self, root_id: ItemId) -> RepoResult<Vec<ItemId>>;

    fn item_exists(&self, id: ItemId) -> RepoResult<bool> {
        Ok(self.get_item(id)?.is_some())
    }
}

/// SQLite-backed item repository.
pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteItemRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let actual: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        let expected = crate::db::migrations::latest_version();
        if actual != expected {
            return Err(RepoError::InvalidData(format!(
                "item repository requires schema version {expected}, got {actual}"
            )));
        }
        Ok(Self { conn })
    }
}

impl StatusLedger for SqliteItemRepository<'_> {
    fn append(&self, entry: &StatusHistoryEntry) -> RepoResult<()> {
        SqliteStatusLedger::new(self.conn).append(entry)
    }

    fn list_for(&self, item_id: ItemId) -> RepoResult<StatusHistory> {
        SqliteStatusLedger::new(self.conn).list_for(item_id)
    }
}

impl ItemRepository for SqliteItemRepository<'_> {
    fn get_item(&self, id: ItemId) -> RepoResult<Option<Item>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ITEM_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_item_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn list_children(&self, parent_id: ItemId) -> RepoResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ITEM_SELECT_SQL}
             WHERE parent_uuid = ?1
             ORDER BY created_at ASC, uuid ASC;"
        ))?;
        let mut rows = stmt.query([parent_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(self.conn, row)?);
        }
        Ok(items)
    }

    fn list_items(&self, query: &ItemListQuery) -> RepoResult<Vec<Item>> {
        let mut sql = format!("{ITEM_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(kind) = query.kind {
            sql.push_str(" AND type = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(owner_id) = query.owner_id.as_ref() {
            sql.push_str(" AND owner_id = ?");
            bind_values.push(Value::Text(owner_id.clone()));
        }
        if let Some(tag) = query.tag.as_deref().and_then(normalize_tag) {
            sql.push_str(
                " AND EXISTS (
                    SELECT 1
                    FROM item_tags it
                    INNER JOIN tags t ON t.id = it.tag_id
                    WHERE it.item_uuid = items.uuid
                      AND t.name = ? COLLATE NOCASE
                )",
            );
            bind_values.push(Value::Text(tag));
        }
        if query.top_level_only {
            sql.push_str(" AND parent_uuid IS NULL");
        }

        sql.push_str(" ORDER BY created_at DESC, uuid ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(self.conn, row)?);
        }
        Ok(items)
    }

    fn commit(&self, changes: &[ItemChange<'_>]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for change in changes {
            match *change {
                ItemChange::Insert { item, entry } => {
                    ensure_entry_matches(item, Some(entry))?;
                    verify_parent_chain(&tx, item)?;
                    insert_item_row(&tx, item)?;
                    replace_tags(&tx, item)?;
                    SqliteStatusLedger::new(&tx).append(entry)?;
                }
                ItemChange::Update { item, entry } => {
                    ensure_entry_matches(item, entry)?;
                    verify_parent_chain(&tx, item)?;
                    update_item_row(&tx, item)?;
                    replace_tags(&tx, item)?;
                    if let Some(entry) = entry {
                        SqliteStatusLedger::new(&tx).append(entry)?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_subtree(&self, root_id: ItemId) -> RepoResult<Vec<ItemId>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let subtree = collect_subtree_ids(&tx, root_id)?;
        for id in subtree.iter().rev() {
            let id_text = id.to_string();
            tx.execute(
                "DELETE FROM item_status_history WHERE item_uuid = ?1;",
                [id_text.as_str()],
            )?;
            tx.execute(
                "DELETE FROM item_tags WHERE item_uuid = ?1;",
                [id_text.as_str()],
            )?;
            let changed = tx.execute("DELETE FROM items WHERE uuid = ?1;", [id_text.as_str()])?;
            if changed == 0 {
                return Err(RepoError::NotFound(*id));
            }
        }
        tx.commit()?;
        Ok(subtree)
    }
}

/// Breadth-first ids of `root_id` and its descendants, root first.
fn collect_subtree_ids(conn: &Connection, root_id: ItemId) -> RepoResult<Vec<ItemId>> {
    if parent_of(conn, root_id)?.is_none() {
        return Err(RepoError::NotFound(root_id));
    }

    let mut stmt = conn.prepare("SELECT uuid FROM items WHERE parent_uuid = ?1;")?;
    let mut ordered = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([root_id]);
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        ordered.push(current);
        let mut rows = stmt.query([current.to_string()])?;
        while let Some(row) = rows.next()? {
            let child: String = row.get(0)?;
            queue.push_back(parse_uuid(&child, "items.uuid")?);
        }
    }
    Ok(ordered)
}

/// Walks the committed ancestor chain of `item.parent_id`.
fn verify_parent_chain(conn: &Connection, item: &Item) -> RepoResult<()> {
    let Some(parent_id) = item.parent_id else {
        return Ok(());
    };

    let mut visited = HashSet::new();
    let mut cursor = Some(parent_id);
    while let Some(current) = cursor {
        if current == item.id {
            return Err(RepoError::ParentChainChanged {
                item: item.id,
                parent: parent_id,
            });
        }
        if !visited.insert(current) {
            return Err(RepoError::InvalidData(format!(
                "cycle in persisted parent chain at {current}"
            )));
        }
        cursor = match parent_of(conn, current)? {
            Some(parent) => parent,
            None if current == parent_id => return Err(RepoError::NotFound(parent_id)),
            None => {
                return Err(RepoError::InvalidData(format!(
                    "dangling parent link to {current}"
                )))
            }
        };
    }
    Ok(())
}

/// `None` when the item does not exist, `Some(None)` for top level.
fn parent_of(conn: &Connection, id: ItemId) -> RepoResult<Option<Option<ItemId>>> {
    let parent: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_uuid FROM items WHERE uuid = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    parent
        .map(|value| {
            value
                .map(|text| parse_uuid(&text, "items.parent_uuid"))
                .transpose()
        })
        .transpose()
}

fn ensure_entry_matches(item: &Item, entry: Option<&StatusHistoryEntry>) -> RepoResult<()> {
    item.validate()?;
    if let Some(entry) = entry {
        if entry.item_id != item.id || entry.new_status != item.status {
            return Err(RepoError::InvalidData(format!(
                "ledger entry {} does not match item {} status {}",
                entry.id, item.id, item.status
            )));
        }
    }
    Ok(())
}

fn insert_item_row(conn: &Connection, item: &Item) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO items (
            uuid,
            type,
            title,
            description,
            status,
            is_completed,
            completed_at,
            priority,
            category,
            due_date,
            event_time,
            reminder_time,
            parent_uuid,
            owner_id,
            original_input,
            created_at,
            updated_at,
            revision
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 0);",
        params![
            item.id.to_string(),
            item.kind.as_str(),
            item.title.as_str(),
            item.description.as_deref(),
            item.status.as_str(),
            bool_to_int(item.is_completed),
            item.completed_at,
            item.priority.map(Priority::as_str),
            item.category.as_deref(),
            item.due_date,
            item.event_time,
            item.reminder_time,
            item.parent_id.map(|value| value.to_string()),
            item.owner_id.as_str(),
            item.original_input.as_deref(),
            item.created_at,
            item.updated_at,
        ],
    )?;
    Ok(())
}

fn update_item_row(conn: &Connection, item: &Item) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE items
         SET
            title = ?1,
            description = ?2,
            status = ?3,
            is_completed = ?4,
            completed_at = ?5,
            priority = ?6,
            category = ?7,
            due_date = ?8,
            event_time = ?9,
            reminder_time = ?10,
            parent_uuid = ?11,
            updated_at = ?12,
            revision = revision + 1
         WHERE uuid = ?13
           AND revision = ?14;",
        params![
            item.title.as_str(),
            item.description.as_deref(),
            item.status.as_str(),
            bool_to_int(item.is_completed),
            item.completed_at,
            item.priority.map(Priority::as_str),
            item.category.as_deref(),
            item.due_date,
            item.event_time,
            item.reminder_time,
            item.parent_id.map(|value| value.to_string()),
            item.updated_at,
            item.id.to_string(),
            item.revision,
        ],
    )?;

    if changed == 0 {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT revision FROM items WHERE uuid = ?1;",
                [item.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        return Err(match exists {
            Some(_) => RepoError::StaleRevision {
                id: item.id,
                expected: item.revision,
            },
            None => RepoError::NotFound(item.id),
        });
    }
    Ok(())
}

fn replace_tags(conn: &Connection, item: &Item) -> RepoResult<()> {
    let id_text = item.id.to_string();
    conn.execute(
        "DELETE FROM item_tags WHERE item_uuid = ?1;",
        [id_text.as_str()],
    )?;
    for tag in normalize_tags(&item.tags) {
        conn.execute(
            "INSERT OR IGNORE INTO tags (name) VALUES (?1);",
            [tag.as_str()],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO item_tags (item_uuid, tag_id)
             SELECT ?1, id
             FROM tags
             WHERE name = ?2 COLLATE NOCASE;",
            params![id_text.as_str(), tag.as_str()],
        )?;
    }
    Ok(())
}

fn load_tags(conn: &Connection, item_uuid: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name
         FROM item_tags it
         INNER JOIN tags t ON t.id = it.tag_id
         WHERE it.item_uuid = ?1
         ORDER BY t.name COLLATE NOCASE ASC;",
    )?;
    let mut rows = stmt.query([item_uuid])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        tags.push(name.to_lowercase());
    }
    Ok(tags)
}

fn parse_item_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Item> {
    let uuid_text: String = row.get("uuid")?;
    let id = parse_uuid(&uuid_text, "items.uuid")?;

    let type_text: String = row.get("type")?;
    let kind = type_text.parse::<ItemType>().map_err(|_| {
        RepoError::InvalidData(format!("invalid item type `{type_text}` in items.type"))
    })?;

    let status_text: String = row.get("status")?;
    let status = parse_status_column(&status_text, "items.status")?;

    let priority = row
        .get::<_, Option<String>>("priority")?
        .map(|value| {
            value.parse::<Priority>().map_err(|_| {
                RepoError::InvalidData(format!("invalid priority `{value}` in items.priority"))
            })
        })
        .transpose()?;

    let is_completed = match row.get::<_, i64>("is_completed")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_completed value `{other}` in items.is_completed"
            )));
        }
    };

    let parent_id = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "items.parent_uuid"))
        .transpose()?;

    let item = Item {
        id,
        title: row.get("title")?,
        description: row.get("description")?,
        kind,
        status,
        is_completed,
        completed_at: row.get("completed_at")?,
        priority,
        category: row.get("category")?,
        due_date: row.get("due_date")?,
        event_time: row.get("event_time")?,
        reminder_time: row.get("reminder_time")?,
        parent_id,
        sub_items: Vec::new(),
        tags: load_tags(conn, &uuid_text)?,
        owner_id: row.get("owner_id")?,
        original_input: row.get("original_input")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        revision: row.get("revision")?,
    };
    item.validate()?;
    Ok(item)
}

/// Normalizes one tag value: trimmed, lowercased, `None` when blank.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes, deduplicates and sorts tag values.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut unique = BTreeSet::new();
    for tag in tags {
        if let Some(value) = normalize_tag(tag) {
            unique.insert(value);
        }
    }
    unique.into_iter().collect()
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_tags;

    #[test]
    fn normalize_tags_trims_lowercases_and_dedupes() {
        let tags = vec![
            " Home ".to_string(),
            "home".to_string(),
            "".to_string(),
            "Errand".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["errand", "home"]);
    }
}
