//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Write paths run `Item::validate()` before any SQL mutation.
//! - An item write and its ledger entry commit in the same transaction.
//! - Repository APIs return semantic errors (`NotFound`, `StaleRevision`)
//!   in addition to DB transport errors.

pub mod history_repo;
pub mod item_repo;
