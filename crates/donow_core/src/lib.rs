//! Core domain logic for DoNow.
//! This crate owns the item model, its status ledger and hierarchy rules,
//! and the storage and enrichment layers behind them.

pub mod config;
pub mod db;
pub mod enrich;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig, EnrichmentConfig, LoggingConfig};
pub use enrich::http::{parse_enrichment_reply, HttpEnrichmentProvider};
pub use enrich::{
    fallback_enrichment, Enricher, Enrichment, EnrichmentError, EnrichmentProvider,
    EnrichmentRequest, EnrichmentSource,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::item::{
    Item, ItemId, ItemStatus, ItemType, ItemValidationError, Priority, StatusTransition,
};
pub use model::status_history::{HistoryEntryId, StatusHistory, StatusHistoryEntry};
pub use repo::history_repo::{SqliteStatusLedger, StatusLedger};
pub use repo::item_repo::{
    ItemChange, ItemListQuery, ItemRepository, RepoError, RepoResult, SqliteItemRepository,
};
pub use service::hierarchy_service::{HierarchyError, HierarchyManager};
pub use service::item_service::{
    CreateItemRequest, ItemService, ItemServiceError, ServiceResult, SubItemDepth,
    UpdateItemRequest,
};
pub use service::stats_service::{ItemStats, StatsService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
