//! Catalog source backed by a local directory mirror.
//!
//! Layout below the root:
//! - `{manifest}`: JSON array of manifest rows
//! - `{table_path}.meta.json`: table metadata
//! - `{table_path}.{format}`: table data

use super::manifest::parse_manifest;
use super::{CatalogSource, ManifestRow, TableMetadata};
use crate::error::{Error, FetchFailure, Result};
use crate::storage::sanitize::catalog_file;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalCatalog {
    root: PathBuf,
    manifest: String,
}

impl LocalCatalog {
    pub fn new(root: impl Into<PathBuf>, manifest: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            manifest: manifest.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, what: &str, file: &Path) -> Result<Vec<u8>> {
        debug!(file = %file.display(), "catalog.read");
        tokio::fs::read(file)
            .await
            .map_err(|err| fetch_error(what, err))
    }
}

/// Classify an I/O failure: permission problems mean the entry is private.
fn fetch_error(path: &str, err: io::Error) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::PermissionDenied => FetchFailure::Forbidden,
        _ => FetchFailure::Unreachable,
    };
    Error::RemoteFetch {
        path: path.to_string(),
        kind,
        message: err.to_string(),
    }
}

#[async_trait]
impl CatalogSource for LocalCatalog {
    async fn manifest(&self) -> Result<Vec<ManifestRow>> {
        let file = self.root.join(&self.manifest);
        let bytes = self.read(&self.manifest, &file).await?;
        parse_manifest(&bytes)
    }

    async fn table_metadata(&self, table_path: &str) -> Result<TableMetadata> {
        let file = catalog_file(&self.root, table_path, "meta")?.with_extension("meta.json");
        let bytes = self.read(table_path, &file).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn data_file(&self, table_path: &str, format: &str) -> Result<PathBuf> {
        let file = catalog_file(&self.root, table_path, format)?;
        tokio::fs::metadata(&file)
            .await
            .map_err(|err| fetch_error(table_path, err))?;
        Ok(file)
    }
}
