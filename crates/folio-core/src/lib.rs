//! # folio-core
//!
//! Core types and pure algorithms for the folio collection document tree.
//!
//! This crate provides:
//! - Document, collection, pin and star models
//! - [`DocumentStructure`]: the ordered navigation tree stored on a collection
//! - [`fractional_index`]: sortable keys for sibling ordering
//! - Structure verification and rebuild from the relational graph
//! - Audit events and the broadcast [`EventBus`]
//!
//! It performs no I/O; `folio-db` runs these operations inside PostgreSQL
//! transactions.

pub mod error;
pub mod events;
pub mod fractional_index;
pub mod logging;
pub mod models;
pub mod rebuild;
pub mod structure;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventActor, EventBus, EventEnvelope, TreeEvent};
pub use models::*;
pub use rebuild::{rebuild_structure, verify_structure, StructureIssue};
pub use structure::{relocate, DocumentStructure, Relocation, RemovedSubtree};
pub use traits::*;
pub use uuid_utils::{new_url_id, new_v7};
