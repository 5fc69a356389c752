//! Disk catalog engine: snapshots directory trees into a SQLite catalog and
//! compares stored catalogs against live folders.

pub mod cancel;
pub mod compare;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod jobs;
pub mod models;
pub mod snapshot;
pub mod store;
pub mod tree;

pub use cancel::CancelFlag;
pub use compare::Comparison;
pub use engine::{comparison_tree, format_size, format_timestamp, Engine};
pub use error::{CatalogError, CatalogResult};
pub use jobs::{JobEvent, JobHandle, JobOutcome, JobOutput, JobState, Progress};
pub use models::{
    Catalog, CatalogId, CatalogSummary, CompareOptions, Config, DiffEntry, DiffStatus, Entry,
    EntryMap, WalkOptions,
};
pub use tree::{assemble, Node, TreeItem};
