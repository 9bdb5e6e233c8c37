//! Status history ledger storage.
//!
//! # Responsibility
//! - Append immutable transition records.
//! - Return one item's records in creation order.
//!
//! # Invariants
//! - The ledger never updates or deletes rows on its own; removal only
//!   happens as part of a subtree delete.
//! - Ordering uses the insertion sequence, not `changed_at`, so two entries
//!   written in the same millisecond keep their order.
//! - Item existence is checked by callers, not by the ledger.

use crate::model::item::{ItemId, ItemStatus};
use crate::model::status_history::{StatusHistory, StatusHistoryEntry};
use crate::repo::item_repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

/// Append/query contract for the status ledger.
pub trait StatusLedger {
    /// Appends one entry.
    fn append(&self, entry: &StatusHistoryEntry) -> RepoResult<()>;
    /// Lists entries for one item, oldest first.
    fn list_for(&self, item_id: ItemId) -> RepoResult<StatusHistory>;
}

/// SQLite-backed ledger.
///
/// Accepts a plain connection or a transaction (via deref), which lets the
/// item repository append inside its own write transaction.
pub struct SqliteStatusLedger<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStatusLedger<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl StatusLedger for SqliteStatusLedger<'_> {
    fn append(&self, entry: &StatusHistoryEntry) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO item_status_history (
                uuid,
                item_uuid,
                old_status,
                new_status,
                comment,
                changed_at,
                changed_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                entry.id.to_string(),
                entry.item_id.to_string(),
                entry.old_status.map(ItemStatus::as_str),
                entry.new_status.as_str(),
                entry.comment.as_deref(),
                entry.changed_at,
                entry.changed_by_user_id.as_str(),
            ],
        )?;
        Ok(())
    }

    fn list_for(&self, item_id: ItemId) -> RepoResult<StatusHistory> {
        let mut stmt = self.conn.prepare(
            "SELECT
                uuid,
                item_uuid,
                old_status,
                new_status,
                comment,
                changed_at,
                changed_by
             FROM item_status_history
             WHERE item_uuid = ?1
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt.query([item_id.to_string()])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_history_row(row)?);
        }
        Ok(StatusHistory::new(entries))
    }
}

fn parse_history_row(row: &Row<'_>) -> RepoResult<StatusHistoryEntry> {
    let id_text: String = row.get("uuid")?;
    let item_text: String = row.get("item_uuid")?;
    let old_status = row
        .get::<_, Option<String>>("old_status")?
        .map(|value| parse_status_column(&value, "item_status_history.old_status"))
        .transpose()?;
    let new_status_text: String = row.get("new_status")?;

    Ok(StatusHistoryEntry {
        id: parse_uuid(&id_text, "item_status_history.uuid")?,
        item_id: parse_uuid(&item_text, "item_status_history.item_uuid")?,
        old_status,
        new_status: parse_status_column(&new_status_text, "item_status_history.new_status")?,
        comment: row.get("comment")?,
        changed_at: row.get("changed_at")?,
        changed_by_user_id: row.get("changed_by")?,
    })
}

pub(crate) fn parse_status_column(value: &str, column: &'static str) -> RepoResult<ItemStatus> {
    value
        .parse()
        .map_err(|_| RepoError::InvalidData(format!("invalid status `{value}` in {column}")))
}
