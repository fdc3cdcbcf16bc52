//! Ranked full-text search over variables.

use crate::error::{Error, Result};
use crate::storage::{fts, WorkerPool};
use duckdb::types::Value;
use duckdb::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_LIMIT: usize = 10;

/// Record type a search runs against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTarget {
    #[default]
    Variable,
    Table,
    Dataset,
}

/// A search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub target: SearchTarget,
    /// Restrict hits to datasets of these channels; empty means all
    pub channels: Vec<String>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            target: SearchTarget::Variable,
            channels: Vec::new(),
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One ranked variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub variable_name: String,
    pub variable_title: Option<String>,
    pub variable_unit: Option<String>,
    pub variable_description: Option<String>,
    pub table_name: String,
    pub dataset_title: Option<String>,
    pub channel: String,
    pub metadata_url: String,
    pub data_url: String,
    #[serde(rename = "match")]
    pub score: f64,
}

/// Hits before the derived URLs are attached
struct RawHit {
    variable_name: String,
    variable_title: Option<String>,
    variable_unit: Option<String>,
    variable_description: Option<String>,
    table_name: String,
    table_path: String,
    dataset_title: Option<String>,
    channel: String,
    score: f64,
}

/// Generated statement and its parameters, in order: term, channels, limit.
pub fn search_statement(query: &SearchQuery) -> (String, Vec<Value>) {
    let mut params = vec![Value::Text(query.term.clone())];
    let channel_filter = if query.channels.is_empty() {
        String::new()
    } else {
        params.extend(query.channels.iter().cloned().map(Value::Text));
        format!(
            " AND hits.channel IN ({})",
            vec!["?"; query.channels.len()].join(", ")
        )
    };
    params.push(Value::BigInt(i64::try_from(query.limit).unwrap_or(i64::MAX)));

    let sql = format!(
        "SELECT * FROM ( \
           SELECT v.short_name AS variable_name, v.title AS variable_title, \
                  v.unit AS variable_unit, v.description AS variable_description, \
                  t.table_name, t.path AS table_path, d.title AS dataset_title, d.channel, \
                  {index}.match_bm25(v.path, ?) AS score \
           FROM meta_variables AS v \
           JOIN meta_tables AS t ON t.path = v.table_path \
           JOIN meta_datasets AS d ON d.path = t.dataset_path \
         ) AS hits \
         WHERE score IS NOT NULL{channel_filter} \
         ORDER BY score DESC \
         LIMIT ?",
        index = fts::INDEX_SCHEMA,
    );
    (sql, params)
}

/// Runs searches on the serving pool
#[derive(Clone)]
pub struct SearchService {
    pool: Arc<WorkerPool>,
    url_prefix: String,
}

impl SearchService {
    pub fn new(pool: Arc<WorkerPool>, url_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn search(&self, query: SearchQuery) -> Result<Vec<SearchHit>> {
        if query.target != SearchTarget::Variable {
            return Err(Error::NotImplemented(format!(
                "search over {:?} records, only variables are supported",
                query.target
            )));
        }
        debug!(term = %query.term, channels = ?query.channels, limit = query.limit, "search.query");

        let raw = self.pool.run(move |conn| run_search(conn, &query)).await?;
        Ok(raw.into_iter().map(|hit| self.finish(hit)).collect())
    }

    fn finish(&self, hit: RawHit) -> SearchHit {
        SearchHit {
            metadata_url: format!("{}/dataset/metadata/{}", self.url_prefix, hit.table_path),
            data_url: format!("{}/dataset/data/{}", self.url_prefix, hit.table_path),
            variable_name: hit.variable_name,
            variable_title: hit.variable_title,
            variable_unit: hit.variable_unit,
            variable_description: hit.variable_description,
            table_name: hit.table_name,
            dataset_title: hit.dataset_title,
            channel: hit.channel,
            score: hit.score,
        }
    }
}

fn index_exists(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.schemata WHERE schema_name = ?",
        [fts::INDEX_SCHEMA],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn run_search(conn: &Connection, query: &SearchQuery) -> Result<Vec<RawHit>> {
    if !index_exists(conn)? {
        return Err(Error::not_found("full-text index"));
    }
    fts::prepare_search(conn)?;

    let (sql, params) = search_statement(query);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| {
        Ok(RawHit {
            variable_name: row.get(0)?,
            variable_title: row.get(1)?,
            variable_unit: row.get(2)?,
            variable_description: row.get(3)?,
            table_name: row.get(4)?,
            table_path: row.get(5)?,
            dataset_title: row.get(6)?,
            channel: row.get(7)?,
            score: row.get(8)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<WorkerPool> {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::metadata::init_schema(&conn).unwrap();
        Arc::new(WorkerPool::new(conn, 1).unwrap())
    }

    #[test]
    fn test_statement_without_channels() {
        let (sql, params) = search_statement(&SearchQuery::new("gdp"));
        assert!(sql.contains("fts_main_meta_variables.match_bm25(v.path, ?) AS score"));
        assert!(sql.contains("JOIN meta_datasets AS d ON d.path = t.dataset_path"));
        assert!(sql.contains("WHERE score IS NOT NULL ORDER BY score DESC"));
        assert!(!sql.contains(" IN ("));
        assert_eq!(params, vec![Value::Text("gdp".into()), Value::BigInt(10)]);
    }

    #[test]
    fn test_statement_with_channels() {
        let mut query = SearchQuery::new("population");
        query.channels = vec!["garden".into(), "backport".into()];
        query.limit = 3;
        let (sql, params) = search_statement(&query);
        assert!(sql.contains("AND hits.channel IN (?, ?)"));
        assert_eq!(
            params,
            vec![
                Value::Text("population".into()),
                Value::Text("garden".into()),
                Value::Text("backport".into()),
                Value::BigInt(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_variable_targets_are_not_implemented() {
        let service = SearchService::new(pool(), "/v1");
        for target in [SearchTarget::Table, SearchTarget::Dataset] {
            let mut query = SearchQuery::new("gdp");
            query.target = target;
            assert!(matches!(
                service.search(query).await,
                Err(Error::NotImplemented(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let service = SearchService::new(pool(), "/v1");
        assert!(matches!(
            service.search(SearchQuery::new("gdp")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_urls_use_prefix() {
        let service = SearchService::new(pool(), "/api/v1/");
        let hit = service.finish(RawHit {
            variable_name: "gdp".into(),
            variable_title: None,
            variable_unit: None,
            variable_description: None,
            table_name: "z".into(),
            table_path: "garden/x/1/y/z".into(),
            dataset_title: None,
            channel: "garden".into(),
            score: 1.5,
        });
        assert_eq!(hit.metadata_url, "/api/v1/dataset/metadata/garden/x/1/y/z");
        assert_eq!(hit.data_url, "/api/v1/dataset/data/garden/x/1/y/z");
    }
}
