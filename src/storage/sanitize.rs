//! Identifier sanitizer.
//!
//! DuckDB cannot bind table names, column names or file paths as statement
//! parameters, so those have to be spliced into the SQL text. Every
//! path-derived fragment goes through one of the functions below first:
//! characters are checked against an allow-list and path separators are
//! escaped deterministically. Anything else is rejected with
//! [`Error::InvalidIdentifier`].

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_column_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validate the segments of a catalog path (`channel/namespace/version/...`).
pub fn validate_catalog_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    for segment in &segments {
        if segment.is_empty()
            || *segment == "."
            || *segment == ".."
            || !segment.chars().all(is_segment_char)
        {
            return Err(Error::InvalidIdentifier(path.to_string()));
        }
    }
    Ok(segments)
}

/// Convert a catalog path into a storage identifier usable as a table name.
///
/// Alphanumerics are kept; `_`, `/`, `-` and `.` become `__`, `_s`, `_d` and
/// `_p`. Every escape starts with `_` and is two characters long, so distinct
/// paths never share a name. The result is double-quoted.
pub fn table_identifier(path: &str) -> Result<String> {
    validate_catalog_path(path)?;
    let mut name = String::with_capacity(path.len() + 8);
    for c in path.chars() {
        match c {
            '_' => name.push_str("__"),
            '/' => name.push_str("_s"),
            '-' => name.push_str("_d"),
            '.' => name.push_str("_p"),
            c => name.push(c),
        }
    }
    Ok(format!("\"{name}\""))
}

/// Quote a column name. Only `[A-Za-z0-9_]` is accepted.
pub fn column_identifier(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(is_column_char) {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

/// Quote a schema prefix such as an attached database alias.
pub fn schema_prefix(alias: Option<&str>) -> Result<String> {
    match alias {
        Some(alias) => Ok(format!("{}.", column_identifier(alias)?)),
        None => Ok(String::new()),
    }
}

/// Resolve a catalog path to a file below `root` with the given extension.
pub fn catalog_file(root: &Path, path: &str, extension: &str) -> Result<PathBuf> {
    let segments = validate_catalog_path(path)?;
    if !extension.chars().all(is_column_char) {
        return Err(Error::InvalidIdentifier(extension.to_string()));
    }
    let mut file = root.to_path_buf();
    for segment in segments {
        file.push(segment);
    }
    let file_name = file
        .file_name()
        .map(|n| format!("{}.{extension}", n.to_string_lossy()))
        .ok_or_else(|| Error::InvalidIdentifier(path.to_string()))?;
    file.set_file_name(file_name);
    Ok(file)
}

/// Quote a file path as a SQL string literal.
///
/// Single quotes are doubled; control characters are rejected.
pub fn file_literal(path: &Path) -> Result<String> {
    let text = path.to_string_lossy();
    if text.chars().any(char::is_control) {
        return Err(Error::InvalidIdentifier(text.into_owned()));
    }
    Ok(format!("'{}'", text.replace('\'', "''")))
}
