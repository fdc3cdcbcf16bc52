//! Full-text index over variables.
//!
//! DuckDB's `fts` extension cannot patch an index incrementally, so the whole
//! index is rebuilt after every sync pass.

use crate::error::Result;
use duckdb::Connection;
use tracing::info;

/// Schema DuckDB creates for the index of `meta_variables`
pub const INDEX_SCHEMA: &str = "fts_main_meta_variables";

/// Columns of `meta_variables` that are indexed; `path` is the document key.
pub const INDEXED_COLUMNS: [&str; 5] = ["title", "description", "short_name", "table_path", "unit"];

fn load_extension(conn: &Connection) -> Result<()> {
    conn.execute_batch("INSTALL fts; LOAD fts;")?;
    Ok(())
}

/// Statement that (re)creates the variable index.
///
/// Stop words are English; the tokenizer ignores dots and anything that is
/// not a lowercase alphanumeric, so digits (SDG goal numbers) are kept.
pub fn create_index_statement() -> String {
    let columns = INDEXED_COLUMNS
        .iter()
        .map(|c| format!("'{c}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "PRAGMA create_fts_index('meta_variables', 'path', {columns}, \
         stopwords='english', overwrite=1, ignore='(\\.|[^a-z0-9])+')"
    )
}

/// Rebuild the variable index from scratch.
pub fn rebuild_index(conn: &Connection) -> Result<()> {
    info!("table.full_text_index.start");
    load_extension(conn)?;
    conn.execute_batch(&create_index_statement())?;
    info!("table.full_text_index.end");
    Ok(())
}

/// Make the `match_bm25` macro available on a serving connection.
pub fn prepare_search(conn: &Connection) -> Result<()> {
    load_extension(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_statement() {
        let sql = create_index_statement();
        assert!(sql.starts_with("PRAGMA create_fts_index('meta_variables', 'path', 'title', "));
        assert!(sql.contains("'table_path', 'unit'"));
        assert!(sql.contains("stopwords='english'"));
        assert!(sql.contains("overwrite=1"));
        assert!(sql.contains(r"ignore='(\.|[^a-z0-9])+'"));
    }
}
