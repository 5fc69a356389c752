use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use tracing::{debug, info};

use crate::compare::{compare, Comparison};
use crate::error::{CatalogError, CatalogResult};
use crate::hasher::DIGEST_ALGORITHM;
use crate::jobs::{Job, JobContext, JobHandle, JobOutput};
use crate::models::{
    Catalog, CatalogId, CatalogSummary, CompareOptions, Config, DiffEntry, Entry, EntryMap,
    WalkOptions,
};
use crate::snapshot::snapshot;
use crate::store::CatalogStore;
use crate::tree::{assemble, Node};

// -----------------------------------------------------------------------------
// Formatting helpers
// -----------------------------------------------------------------------------

/// Base-1024 size with one decimal, e.g. `2.0 KB`. Anything from 1024 TB up
/// is shown in PB.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}

pub fn format_timestamp(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::from("-"),
    }
}

// -----------------------------------------------------------------------------
// Engine
// -----------------------------------------------------------------------------

/// Entry point for the presentation layer. Holds only configuration; every
/// operation opens its own store connection, so background jobs never share
/// one.
#[derive(Debug, Clone)]
pub struct Engine {
    config: Config,
}

impl Engine {
    /// Creates the database and schema up front so later failures are about
    /// the work, not the setup.
    pub fn open(config: Config) -> CatalogResult<Self> {
        CatalogStore::open(&config.database)?;
        debug!("catalog database at {}", config.database.display());
        Ok(Engine { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn store(&self) -> CatalogResult<CatalogStore> {
        CatalogStore::open(&self.config.database)
    }

    pub fn list_catalogs(&self) -> CatalogResult<Vec<CatalogSummary>> {
        self.store()?.list()
    }

    pub fn catalog(&self, id: CatalogId) -> CatalogResult<Catalog> {
        self.store()?.get(id)
    }

    pub fn rename_catalog(&self, id: CatalogId, new_name: &str) -> CatalogResult<()> {
        self.store()?.rename(id, new_name)
    }

    pub fn delete_catalog(&self, id: CatalogId) -> CatalogResult<()> {
        self.store()?.delete(id)
    }

    /// Path-keyed entries; empty for an unknown id.
    pub fn load_entries(&self, id: CatalogId) -> CatalogResult<EntryMap> {
        self.store()?.load_entries(id)
    }

    pub fn load_catalog_tree(&self, id: CatalogId) -> CatalogResult<Vec<Node<Entry>>> {
        let store = self.store()?;
        store.get(id)?;
        let entries = store.load_entries(id)?;
        Ok(assemble(entries.into_values()))
    }

    pub fn create_catalog(&self, root: &Path, compute_digest: bool) -> JobHandle {
        let db = self.config.database.clone();
        let root = root.to_path_buf();
        let options = self.config.walk_options(compute_digest);
        Job::new(format!("create {}", root.display()), move |ctx: &JobContext| {
            engine_create_catalog(&db, &root, options, ctx)
        })
        .start()
    }

    pub fn update_catalog(&self, id: CatalogId, compute_digest: bool) -> JobHandle {
        let db = self.config.database.clone();
        let options = self.config.walk_options(compute_digest);
        Job::new(format!("update catalog {id}"), move |ctx: &JobContext| {
            engine_update_catalog(&db, id, options, ctx)
        })
        .start()
    }

    pub fn compare_catalog(
        &self,
        id: CatalogId,
        compare_path: &Path,
        options: CompareOptions,
    ) -> JobHandle {
        let db = self.config.database.clone();
        let live_root = compare_path.to_path_buf();
        let walk = self.config.walk_options(false);
        Job::new(format!("compare catalog {id}"), move |ctx: &JobContext| {
            engine_compare_catalog(&db, id, &live_root, walk, options, ctx)
        })
        .start()
    }
}

/// Forest of a comparison's union set, for display.
pub fn comparison_tree(cmp: &Comparison) -> Vec<Node<DiffEntry>> {
    assemble(cmp.entries.values().cloned())
}

// -----------------------------------------------------------------------------
// Job bodies
// -----------------------------------------------------------------------------

fn digest_algorithm(options: &WalkOptions) -> Option<&'static str> {
    options.compute_digest.then_some(DIGEST_ALGORITHM)
}

fn engine_create_catalog(
    db: &Path,
    root: &Path,
    options: WalkOptions,
    ctx: &JobContext,
) -> CatalogResult<JobOutput> {
    let root: PathBuf = fs::canonicalize(root).map_err(|e| CatalogError::io(root, e))?;
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let algorithm = digest_algorithm(&options);

    info!("cataloguing {} as '{name}'", root.display());
    let snap = snapshot(&root, options, ctx.cancel_flag(), |n, total, label| {
        ctx.progress(n, total, label)
    })?;
    if snap.skipped > 0 {
        info!("{} objects skipped while cataloguing", snap.skipped);
    }

    let mut store = CatalogStore::open(db)?;
    let id = store.create(
        &name,
        &root,
        &snap.entries,
        algorithm,
        ctx.cancel_flag(),
        |n, total| ctx.progress(n, total, "storing entries"),
    )?;
    Ok(JobOutput::Catalog(id))
}

fn engine_update_catalog(
    db: &Path,
    id: CatalogId,
    options: WalkOptions,
    ctx: &JobContext,
) -> CatalogResult<JobOutput> {
    let mut store = CatalogStore::open(db)?;
    let catalog = store.get(id)?;
    let algorithm = digest_algorithm(&options);

    info!("refreshing catalog {id} from {}", catalog.root_path.display());
    let snap = snapshot(&catalog.root_path, options, ctx.cancel_flag(), |n, total, label| {
        ctx.progress(n, total, label)
    })?;

    store.replace_entries(
        id,
        &snap.entries,
        algorithm,
        ctx.cancel_flag(),
        |n, total| ctx.progress(n, total, "storing entries"),
    )?;
    Ok(JobOutput::Catalog(id))
}

fn engine_compare_catalog(
    db: &Path,
    id: CatalogId,
    live_root: &Path,
    walk: WalkOptions,
    options: CompareOptions,
    ctx: &JobContext,
) -> CatalogResult<JobOutput> {
    let (catalog, stored) = {
        let store = CatalogStore::open(db)?;
        let catalog = store.get(id)?;
        let stored = store.load_entries(id)?;
        (catalog, stored)
    };

    if options.check_digest {
        if let Some(stored_alg) = catalog.digest_algorithm.as_deref() {
            if stored_alg != DIGEST_ALGORITHM {
                return Err(CatalogError::DigestAlgorithmMismatch {
                    stored: stored_alg.to_string(),
                    current: DIGEST_ALGORITHM.to_string(),
                });
            }
        }
    }

    info!(
        "comparing catalog {id} ({} entries) against {}",
        stored.len(),
        live_root.display()
    );
    let live = snapshot(live_root, walk, ctx.cancel_flag(), |n, total, label| {
        ctx.progress(n, total, label)
    })?;

    let cmp = compare(
        stored,
        live.entries,
        live_root,
        options,
        ctx.cancel_flag(),
        |n, total, path| ctx.progress(n, total, &format!("digest {path}")),
    )?;
    info!(
        "catalog {id}: {} differences, {} unreadable",
        cmp.differences.len(),
        cmp.skipped.len()
    );
    Ok(JobOutput::Comparison(Box::new(cmp)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(500), "500.0 B");
        assert_eq!(format_size(1023), "1023.0 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(1024u64.pow(4) * 3), "3.0 TB");
        assert_eq!(format_size(1024u64.pow(5) * 2), "2.0 PB");
        assert_eq!(format_size(1024u64.pow(6)), "1024.0 PB");
    }

    #[test]
    fn timestamp_formatting_shape() {
        let s = format_timestamp(1_700_000_000);
        assert_eq!(s.len(), "2023-11-14 22:13:20".len());
        assert!(s.starts_with("2023-11-1"));
    }
}
