//! Manifest rows and the filter applied before planning.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// One table entry of the catalog manifest.
///
/// `checksum` is the checksum of the owning *dataset*; every table of a
/// dataset carries the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    /// Table path, `channel/namespace/version/dataset/table`
    pub path: String,
    pub channel: String,
    pub namespace: String,
    pub version: String,
    pub dataset: String,
    pub table: String,
    pub checksum: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl ManifestRow {
    /// Path of the owning dataset (the table path without its last segment)
    pub fn dataset_path(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map(|(dataset, _)| dataset)
            .unwrap_or(&self.path)
    }
}

/// Restricts the manifest to the rows a sync pass may touch.
#[derive(Debug, Clone, Default)]
pub struct ManifestFilter {
    channels: Vec<String>,
    exclude: Vec<String>,
    include: Option<Regex>,
}

impl ManifestFilter {
    pub fn new(channels: Vec<String>, exclude: Vec<String>, include: Option<&str>) -> Result<Self> {
        let include = include.map(Regex::new).transpose()?;
        Ok(Self {
            channels,
            exclude,
            include,
        })
    }

    /// Whether an include pattern narrows the pass
    pub fn is_narrowed(&self) -> bool {
        self.include.is_some()
    }

    pub fn accepts(&self, row: &ManifestRow) -> bool {
        row.is_public
            && (self.channels.is_empty() || self.channels.iter().any(|c| *c == row.channel))
            && !self.exclude.iter().any(|e| row.path.contains(e.as_str()))
            && self
                .include
                .as_ref()
                .map_or(true, |re| re.is_match(row.dataset_path()))
    }

    pub fn apply(&self, rows: Vec<ManifestRow>) -> Vec<ManifestRow> {
        rows.into_iter().filter(|row| self.accepts(row)).collect()
    }
}

/// Group manifest rows by dataset path, keeping manifest order inside a group.
pub fn group_by_dataset(rows: &[ManifestRow]) -> BTreeMap<String, Vec<&ManifestRow>> {
    let mut groups: BTreeMap<String, Vec<&ManifestRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(row.dataset_path().to_string())
            .or_default()
            .push(row);
    }
    groups
}

/// `dataset_path -> checksum` for the rows of a manifest.
///
/// Rows of one dataset normally agree on the checksum. If they do not, the
/// distinct values are joined in sorted order so that a change to any of
/// them still changes the dataset checksum.
pub fn dataset_checksums(rows: &[ManifestRow]) -> BTreeMap<String, String> {
    group_by_dataset(rows)
        .into_iter()
        .map(|(path, rows)| {
            let mut checksums: Vec<&str> = rows.iter().map(|r| r.checksum.as_str()).collect();
            checksums.sort_unstable();
            checksums.dedup();
            if checksums.len() > 1 {
                warn!(path = %path, checksums = checksums.len(), "manifest.inconsistent_checksum");
            }
            (path, checksums.join("+"))
        })
        .collect()
}

/// Parse a manifest document (a JSON array of rows).
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<ManifestRow>> {
    let rows: Vec<ManifestRow> = serde_json::from_slice(bytes)?;
    for row in &rows {
        if row.dataset_path() == row.path {
            return Err(Error::InvalidIdentifier(row.path.clone()));
        }
    }
    Ok(rows)
}

#[cfg(test)]
pub(crate) fn row(path: &str, checksum: &str) -> ManifestRow {
    let parts: Vec<&str> = path.split('/').collect();
    ManifestRow {
        path: path.to_string(),
        channel: parts[0].to_string(),
        namespace: parts[1].to_string(),
        version: parts[2].to_string(),
        dataset: parts[3].to_string(),
        table: parts[4].to_string(),
        checksum: checksum.to_string(),
        dimensions: vec!["year".into(), "entity_id".into(), "entity_name".into(), "entity_code".into()],
        formats: vec!["parquet".into()],
        is_public: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_path() {
        assert_eq!(row("garden/x/1/y/z", "v1").dataset_path(), "garden/x/1/y");
    }

    #[test]
    fn test_filter() {
        let mut private = row("garden/x/1/y/private", "v1");
        private.is_public = false;
        let rows = vec![
            row("garden/x/1/y/z", "v1"),
            row("meadow/x/1/y/z", "v1"),
            row("garden/faostat/2022-05-17/fao/t", "v1"),
            row("garden/other/1/w/t", "v1"),
            private,
        ];
        let filter = ManifestFilter::new(
            vec!["backport".into(), "garden".into()],
            vec!["garden/faostat/2022-05-17".into()],
            None,
        )
        .unwrap();
        let kept: Vec<_> = filter.apply(rows.clone()).into_iter().map(|r| r.path).collect();
        assert_eq!(kept, vec!["garden/x/1/y/z", "garden/other/1/w/t"]);

        let narrowed =
            ManifestFilter::new(vec!["garden".into()], vec![], Some("^garden/x/")).unwrap();
        assert!(narrowed.is_narrowed());
        let kept: Vec<_> = narrowed.apply(rows).into_iter().map(|r| r.path).collect();
        assert_eq!(kept, vec!["garden/x/1/y/z"]);

        assert!(matches!(
            ManifestFilter::new(vec![], vec![], Some("(unclosed")),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_dataset_checksums() {
        let rows = vec![
            row("garden/x/1/y/a", "v1"),
            row("garden/x/1/y/b", "v1"),
            row("garden/x/1/w/a", "v2"),
            row("garden/x/1/w/b", "v3"),
        ];
        let checksums = dataset_checksums(&rows);
        assert_eq!(checksums["garden/x/1/y"], "v1");
        assert_eq!(checksums["garden/x/1/w"], "v2+v3");
    }

    #[test]
    fn test_parse_manifest() {
        let json = br#"[{"path": "garden/x/1/y/z", "channel": "garden", "namespace": "x",
            "version": "1", "dataset": "y", "table": "z", "checksum": "v1",
            "dimensions": ["year"], "formats": ["parquet", "feather"], "is_public": true}]"#;
        let rows = parse_manifest(json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].formats, vec!["parquet", "feather"]);

        let bad = br#"[{"path": "z", "channel": "garden", "namespace": "x",
            "version": "1", "dataset": "y", "table": "z", "checksum": "v1"}]"#;
        assert!(parse_manifest(bad).is_err());
    }
}
