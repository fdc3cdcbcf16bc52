//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Catalog synchronization
//! - Serving the HTTP API
//! - Rebuilding the full-text index

pub mod commands;
pub mod handlers;

pub use commands::{Commands, LoggingArgs, ReindexCommand, ServeCommand, SyncCommand};
pub use handlers::{handle_reindex, handle_serve, handle_sync, init_logging};
