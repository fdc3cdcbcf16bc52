//! Sync planning: which datasets to delete and which to (re)create.

use std::collections::{BTreeMap, BTreeSet};

/// Outcome of comparing the manifest with the metadata store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Dataset paths whose stored rows must go
    pub to_delete: BTreeSet<String>,
    /// Dataset paths that must be ingested
    pub to_create: BTreeSet<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty()
    }

    /// Datasets that are deleted without being recreated
    pub fn delete_only(&self) -> impl Iterator<Item = &String> {
        self.to_delete.difference(&self.to_create)
    }
}

/// Compare `manifest` (`dataset_path -> checksum`) with `local`.
///
/// A stored dataset is deleted when the manifest no longer carries its
/// checksum; a manifest dataset is created when the store does not carry its
/// checksum. `force` selects every manifest dataset for both. With
/// `narrowed` (an include pattern is active) only datasets that are also
/// recreated may be deleted, so nothing outside the pattern is touched.
pub fn plan(
    manifest: &BTreeMap<String, String>,
    local: &BTreeMap<String, String>,
    force: bool,
    narrowed: bool,
) -> SyncPlan {
    let (mut to_delete, to_create) = if force {
        let all: BTreeSet<String> = manifest.keys().cloned().collect();
        (all.clone(), all)
    } else {
        let to_delete = local
            .iter()
            .filter(|(path, checksum)| manifest.get(*path) != Some(*checksum))
            .map(|(path, _)| path.clone())
            .collect();
        let to_create = manifest
            .iter()
            .filter(|(path, checksum)| local.get(*path) != Some(*checksum))
            .map(|(path, _)| path.clone())
            .collect();
        (to_delete, to_create)
    };

    // a forced path that was never stored has nothing to delete
    to_delete.retain(|path| !force || local.contains_key(path));

    if narrowed {
        to_delete = to_delete.intersection(&to_create).cloned().collect();
    }

    SyncPlan {
        to_delete,
        to_create,
    }
}
