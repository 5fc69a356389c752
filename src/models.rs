use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, CatalogResult};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CatalogId(pub i64);

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored catalog metadata. `root_path` never changes after creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Catalog {
    pub id: CatalogId,
    pub name: String,
    pub root_path: PathBuf,
    /// Unix seconds.
    pub created_at: i64,
    #[serde(default)]
    pub digest_algorithm: Option<String>,
}

/// Row returned by `list`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CatalogSummary {
    pub id: CatalogId,
    pub name: String,
    pub root_path: PathBuf,
}

/// One file or directory, keyed by its `/`-separated path relative to the
/// catalog root.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    /// Always 0 for directories.
    pub size: u64,
    /// Unix seconds.
    pub modified: i64,
    #[serde(default)]
    pub digest: Option<String>,
}

/// Entries keyed by relative path.
pub type EntryMap = BTreeMap<String, Entry>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DiffStatus {
    Same,
    Modified,
    Missing,
    New,
    ChangedDirectory,
}

impl DiffStatus {
    /// New, missing and modified paths are differences in their own right;
    /// `ChangedDirectory` only marks an ancestor of one.
    pub fn is_difference(self) -> bool {
        matches!(self, DiffStatus::Modified | DiffStatus::Missing | DiffStatus::New)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiffStatus::Same => "same",
            DiffStatus::Modified => "modified",
            DiffStatus::Missing => "missing",
            DiffStatus::New => "new",
            DiffStatus::ChangedDirectory => "changed-directory",
        }
    }
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub path: String,
    pub status: DiffStatus,
    pub catalog: Option<Entry>,
    pub live: Option<Entry>,
}

impl DiffEntry {
    /// Metadata to display: the live side when it exists, else the stored one.
    pub fn entry(&self) -> Option<&Entry> {
        self.live.as_ref().or(self.catalog.as_ref())
    }

    pub fn is_dir(&self) -> bool {
        self.entry().map_or(false, |e| e.is_dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompareOptions {
    pub check_size: bool,
    pub check_digest: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub compute_digest: bool,
    pub exclusions: Vec<String>,
}

fn default_database() -> PathBuf {
    PathBuf::from("folder_catalog.db")
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default)]
    pub compute_digest: bool,

    #[serde(default = "default_true")]
    pub check_size: bool,

    #[serde(default)]
    pub check_digest: bool,

    #[serde(default)]
    pub exclusions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: default_database(),
            compute_digest: false,
            check_size: true,
            check_digest: false,
            exclusions: Vec::new(),
        }
    }
}

impl Config {
    /// Reads a JSON config. A missing file means defaults.
    pub fn load(path: &Path) -> CatalogResult<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let txt = fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
        serde_json::from_str(&txt)
            .map_err(|e| CatalogError::Config(format!("{}: {e}", path.display())))
    }

    pub fn walk_options(&self, compute_digest: bool) -> WalkOptions {
        WalkOptions {
            compute_digest,
            exclusions: self.exclusions.clone(),
        }
    }

    pub fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            check_size: self.check_size,
            check_digest: self.check_digest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let cfg: Config = serde_json::from_str(r#"{ "check_digest": true }"#).unwrap();
        assert_eq!(cfg.database, PathBuf::from("folder_catalog.db"));
        assert!(cfg.check_size);
        assert!(cfg.check_digest);
        assert!(!cfg.compute_digest);
        assert!(cfg.exclusions.is_empty());
    }

    #[test]
    fn config_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn config_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcat.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(CatalogError::Config(_))));
    }

    #[test]
    fn diff_status_names() {
        assert_eq!(DiffStatus::ChangedDirectory.to_string(), "changed-directory");
        assert!(DiffStatus::New.is_difference());
        assert!(!DiffStatus::ChangedDirectory.is_difference());
        assert!(!DiffStatus::Same.is_difference());
    }
}
