use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::error::{CatalogError, CatalogResult};
use crate::hasher::digest_file;
use crate::models::{CompareOptions, DiffEntry, DiffStatus, Entry, EntryMap};
use crate::tree::ancestors;

/// Full result of reconciling a stored catalog against a live folder.
#[derive(Debug, Clone, Default)]
pub struct Comparison {
    pub catalog_entries: EntryMap,
    pub live_entries: EntryMap,
    /// One record per path in the union of both sides.
    pub entries: BTreeMap<String, DiffEntry>,
    /// Paths that are new, missing or modified.
    pub differences: BTreeSet<String>,
    /// Strict ancestors of every difference.
    pub contains_difference: BTreeSet<String>,
    /// Live files whose digest could not be read; they are not classified as
    /// modified on digest grounds.
    pub skipped: Vec<String>,
}

impl Comparison {
    pub fn is_clean(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn count(&self, status: DiffStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }
}

fn needs_digest(options: &CompareOptions, stored: &Entry, live: &Entry) -> bool {
    options.check_digest && !stored.is_dir && !live.is_dir && stored.digest.is_some()
}

/// Classifies every path of `catalog` ∪ `live`.
///
/// `live_root` is where live files are read from when digests are checked.
/// Those digests are always recomputed, whether or not the live walk hashed.
/// `progress` is called once per digest candidate.
pub fn compare<F>(
    catalog: EntryMap,
    live: EntryMap,
    live_root: &Path,
    options: CompareOptions,
    cancel: &CancelFlag,
    mut progress: F,
) -> CatalogResult<Comparison>
where
    F: FnMut(usize, usize, &str),
{
    let total = catalog
        .iter()
        .filter(|(path, stored)| {
            live.get(*path)
                .map_or(false, |l| needs_digest(&options, stored, l))
        })
        .count();
    let mut processed = 0;

    let mut entries = BTreeMap::new();
    let mut differences = BTreeSet::new();
    let mut skipped = Vec::new();

    for (path, stored) in &catalog {
        let status = match live.get(path) {
            None => DiffStatus::Missing,
            Some(l) if stored.is_dir && l.is_dir => DiffStatus::Same,
            Some(l) if stored.is_dir != l.is_dir => DiffStatus::Modified,
            Some(l) => {
                let mut modified = options.check_size && stored.size != l.size;
                if needs_digest(&options, stored, l) {
                    if cancel.is_cancelled() {
                        return Err(CatalogError::Cancelled);
                    }
                    if !modified {
                        match digest_file(&live_root.join(path), cancel) {
                            Ok(d) => modified = stored.digest.as_deref() != Some(d.as_str()),
                            Err(CatalogError::Cancelled) => return Err(CatalogError::Cancelled),
                            Err(e) => {
                                warn!("cannot digest {path}: {e}");
                                skipped.push(path.clone());
                            }
                        }
                    }
                    processed += 1;
                    progress(processed, total, path);
                }
                if modified {
                    DiffStatus::Modified
                } else {
                    DiffStatus::Same
                }
            }
        };
        if status.is_difference() {
            differences.insert(path.clone());
        }
        entries.insert(
            path.clone(),
            DiffEntry {
                path: path.clone(),
                status,
                catalog: Some(stored.clone()),
                live: live.get(path).cloned(),
            },
        );
    }

    for (path, l) in &live {
        if catalog.contains_key(path) {
            continue;
        }
        differences.insert(path.clone());
        entries.insert(
            path.clone(),
            DiffEntry {
                path: path.clone(),
                status: DiffStatus::New,
                catalog: None,
                live: Some(l.clone()),
            },
        );
    }

    let contains_difference: BTreeSet<String> = differences
        .iter()
        .flat_map(|p| ancestors(p))
        .map(str::to_string)
        .collect();
    for path in &contains_difference {
        if let Some(e) = entries.get_mut(path) {
            if e.status == DiffStatus::Same && e.is_dir() {
                e.status = DiffStatus::ChangedDirectory;
            }
        }
    }

    debug!(
        "compare: {} paths, {} differences, {} marked ancestors",
        entries.len(),
        differences.len(),
        contains_difference.len()
    );

    Ok(Comparison {
        catalog_entries: catalog,
        live_entries: live,
        entries,
        differences,
        contains_difference,
        skipped,
    })
}
