//! catalogd: catalog synchronization and read-mostly data serving.
//!
//! A sync pass reconciles a DuckDB metadata store with a catalog manifest of
//! versioned datasets, rewriting whole datasets whose checksum changed. The
//! serving layer answers variable and table queries from that store, backed
//! either by legacy fact tables or by the catalog's parquet files, in CSV,
//! JSON or Arrow IPC.

pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod models;
pub mod query;
pub mod search;
pub mod server;
pub mod storage;
pub mod sync;

pub use catalog::{CatalogSource, LocalCatalog};
pub use error::{Error, Result};
pub use query::{QueryTranslator, TabularResult};
pub use sync::{SyncEngine, SyncOptions, SyncReport};
