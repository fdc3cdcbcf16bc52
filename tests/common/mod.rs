//! Shared fixtures: a scratch catalog mirror and a metadata store built from it.

#![allow(dead_code)]

use catalogd_core::catalog::LocalCatalog;
use catalogd_core::config::{CatalogConfig, CorsConfig, ServerConfig};
use catalogd_core::storage::sanitize::file_literal;
use catalogd_core::storage::{self, WorkerPool};
use catalogd_core::sync::{SyncEngine, SyncOptions, SyncReport};
use duckdb::Connection;
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const ENTITY_DIMENSIONS: [&str; 4] = ["year", "entity_id", "entity_name", "entity_code"];

/// Long table with two value columns
pub const GDP_TABLE: &str = "SELECT * FROM (VALUES \
    (2000, 1, 'France', 'FRA', 1.5::DOUBLE, 60.0::DOUBLE), \
    (2001, 1, 'France', 'FRA', 2.5::DOUBLE, 61.0::DOUBLE), \
    (2000, 2, 'Chad', 'TCD', 0.5::DOUBLE, 8.0::DOUBLE), \
    (2001, 2, 'Chad', 'TCD', NULL, 9.0::DOUBLE)) \
    t(year, entity_id, entity_name, entity_code, gdp, population)";

/// Deaths of France split by a `sex` dimension
pub const DEATHS_TABLE: &str = "SELECT * FROM (VALUES \
    (2000, 1, 'France', 'FRA', 'male', 1.0::DOUBLE), \
    (2000, 1, 'France', 'FRA', 'female', 2.0::DOUBLE), \
    (2001, 1, 'France', 'FRA', 'female', 4.0::DOUBLE), \
    (2001, 1, 'France', 'FRA', 'male', 3.0::DOUBLE)) \
    t(year, entity_id, entity_name, entity_code, sex, deaths)";

pub const AREA_TABLE: &str = "SELECT * FROM (VALUES \
    (2000, 1, 'France', 'FRA', 551.0::DOUBLE), \
    (2000, 2, 'Chad', 'TCD', 1284.0::DOUBLE)) \
    t(year, entity_id, entity_name, entity_code, area)";

/// Directory mirror with a manifest, table metadata and parquet files
pub struct CatalogFixture {
    pub dir: TempDir,
    rows: Vec<JsonValue>,
}

impl CatalogFixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            rows: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `select` as the table's parquet file plus its metadata, and add
    /// a public manifest row with the entity dimensions.
    pub fn add_table(&mut self, table_path: &str, checksum: &str, select: &str, meta: JsonValue) {
        self.add_table_with_dimensions(table_path, checksum, select, meta, &ENTITY_DIMENSIONS);
    }

    /// Like [`CatalogFixture::add_table`] with an explicit dimension list.
    pub fn add_table_with_dimensions(
        &mut self,
        table_path: &str,
        checksum: &str,
        select: &str,
        meta: JsonValue,
        dimensions: &[&str],
    ) {
        let parts: Vec<&str> = table_path.split('/').collect();
        assert_eq!(parts.len(), 5, "table path `{table_path}`");

        let data_file = self.root().join(format!("{table_path}.parquet"));
        std::fs::create_dir_all(data_file.parent().unwrap()).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "COPY ({select}) TO {} (FORMAT PARQUET)",
            file_literal(&data_file).unwrap()
        ))
        .unwrap();

        let meta_file = self.root().join(format!("{table_path}.meta.json"));
        std::fs::write(meta_file, serde_json::to_vec(&meta).unwrap()).unwrap();

        self.rows.retain(|r| r["path"] != table_path);
        self.rows.push(json!({
            "path": table_path,
            "channel": parts[0],
            "namespace": parts[1],
            "version": parts[2],
            "dataset": parts[3],
            "table": parts[4],
            "checksum": checksum,
            "dimensions": dimensions,
            "formats": ["parquet", "feather"],
            "is_public": true,
        }));
        self.write_manifest();
    }

    /// Change the checksum of one table row.
    pub fn set_checksum(&mut self, table_path: &str, checksum: &str) {
        for row in &mut self.rows {
            if row["path"] == table_path {
                row["checksum"] = json!(checksum);
            }
        }
        self.write_manifest();
    }

    /// Drop every manifest row of a dataset.
    pub fn remove_dataset(&mut self, dataset_path: &str) {
        let prefix = format!("{dataset_path}/");
        self.rows
            .retain(|r| !r["path"].as_str().unwrap_or_default().starts_with(&prefix));
        self.write_manifest();
    }

    fn write_manifest(&self) {
        std::fs::write(
            self.root().join("catalog.json"),
            serde_json::to_vec(&self.rows).unwrap(),
        )
        .unwrap();
    }

    pub fn source(&self) -> LocalCatalog {
        LocalCatalog::new(self.root(), "catalog.json")
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            dir: self.root().to_path_buf(),
            manifest: "catalog.json".to_string(),
            channels: vec!["backport".to_string(), "garden".to_string()],
            exclude: vec![],
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.root().join("store.duckdb")
    }

    /// Sync engine over a fresh connection to the fixture's store file.
    pub fn engine(&self) -> SyncEngine<LocalCatalog> {
        let conn = Connection::open(self.store_path()).unwrap();
        SyncEngine::new(self.source(), conn, &self.catalog_config()).unwrap()
    }

    /// One pass without the full-text index.
    pub async fn sync(&self, options: SyncOptions) -> SyncReport {
        let mut engine = self.engine();
        engine.run(&options).await.unwrap()
    }
}

/// Metadata for a garden table: dataset block with a version plus field titles
pub fn garden_meta(title: &str, fields: &[(&str, &str)]) -> JsonValue {
    let fields: serde_json::Map<String, JsonValue> = fields
        .iter()
        .map(|(name, unit)| {
            (
                name.to_string(),
                json!({"title": name.to_uppercase(), "unit": unit}),
            )
        })
        .collect();
    json!({
        "dataset": {
            "namespace": "x",
            "short_name": "y",
            "title": title,
            "version": "2022",
            "sources": [{"name": "World Bank"}],
            "licenses": [{"name": "CC BY 4.0"}]
        },
        "fields": fields
    })
}

/// Metadata for a backport table; fields with an id get a legacy id
pub fn backport_meta(title: &str, fields: &[(&str, Option<i64>)]) -> JsonValue {
    let fields: serde_json::Map<String, JsonValue> = fields
        .iter()
        .map(|(name, id)| {
            let mut field = json!({"title": name, "unit": "years"});
            if let Some(id) = id {
                field["additional_info"] = json!({"grapher_meta": {"id": id}});
            }
            (name.to_string(), field)
        })
        .collect();
    json!({
        "dataset": {
            "short_name": "legacy",
            "title": title,
            "additional_info": {"grapher_meta": {"id": 1, "nonRedistributable": false}}
        },
        "fields": fields
    })
}

/// Fill the legacy fact tables of `conn`.
pub fn seed_facts(conn: &Connection) {
    storage::init_fact_schema(conn).unwrap();
    conn.execute_batch(
        "INSERT INTO entities VALUES (1, 'France', 'FRA'), (2, 'Chad', 'TCD');
         INSERT INTO data_values VALUES
            (42, 2, 2000, '50.5'), (42, 1, 2000, '79.0'), (42, 1, 2001, '79.5'),
            (7, 1, 2000, 'ignored');",
    )
    .unwrap();
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        url_prefix: "/v1".to_string(),
        cors: CorsConfig::default(),
    }
}

/// Worker pool over the synced store
pub fn pool(conn: Connection) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(conn, 2).unwrap())
}
