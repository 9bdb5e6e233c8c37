//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into item use cases.
//! - Keep CLI and other callers decoupled from storage details.

pub mod hierarchy_service;
pub mod item_service;
pub mod stats_service;
