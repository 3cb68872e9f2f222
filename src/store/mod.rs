//! Durable local store for cached records, the outbox and sync bookkeeping.
//!
//! This module provides a keyed, indexed record store that:
//! - Organizes records into a fixed set of collections
//! - Maintains secondary indexes (single-field and composite)
//! - Writes bulk snapshots atomically per collection
//! - Gates layout creation behind a schema version

mod schema;
mod sqlite;

pub use schema::{encode_index_value, Collection, IndexDef, SCHEMA_VERSION};
pub use sqlite::{MetaEntry, ReplaceStats, Store};

pub(crate) use sqlite::{confirm_record, delete_record, write_record};
