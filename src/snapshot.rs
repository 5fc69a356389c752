use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use glob::Pattern;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::cancel::CancelFlag;
use crate::error::{CatalogError, CatalogResult};
use crate::hasher::digest_file;
use crate::models::{Entry, EntryMap, WalkOptions};

#[derive(Debug, Clone, PartialEq)]
pub enum WalkEvent {
    Entry(Entry),
    Progress {
        processed: usize,
        total: usize,
        label: String,
    },
    /// A single object could not be read; the walk carries on.
    Error { path: PathBuf, message: String },
    Cancelled,
    Done,
}

// -----------------------------------------------------------------------------
// Path helpers
// -----------------------------------------------------------------------------

/// `/`-joined path of `path` below `root`, independent of the host separator.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn matches_exclusion(rel: &str, exclusions: &[Pattern], raw: &[String]) -> bool {
    exclusions.iter().any(|pat| pat.matches(rel)) || raw.iter().any(|exc| rel.contains(exc.as_str()))
}

fn unix_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

type DirIter = Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + Send>;

fn dir_iter(root: &Path, exclusions: &[String]) -> DirIter {
    let patterns: Vec<Pattern> = exclusions
        .iter()
        .filter_map(|e| Pattern::new(e).ok())
        .collect();
    let raw = exclusions.to_vec();
    let base = root.to_path_buf();
    let iter = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| match relative_key(&base, e.path()) {
            Some(rel) => !matches_exclusion(&rel, &patterns, &raw),
            None => true,
        });
    Box::new(iter)
}

/// Upfront object count used as the progress denominator. Approximate if the
/// tree changes while the real walk runs.
fn count_objects(root: &Path, exclusions: &[String], cancel: &CancelFlag) -> usize {
    let mut n = 0;
    for item in dir_iter(root, exclusions) {
        if cancel.is_cancelled() {
            break;
        }
        if item.is_ok() {
            n += 1;
        }
    }
    n
}

// -----------------------------------------------------------------------------
// Walker
// -----------------------------------------------------------------------------

/// Lazy single-pass walk of a root directory. Each value re-walks from
/// scratch; the root itself is not reported.
pub struct Walker {
    root: PathBuf,
    options: WalkOptions,
    cancel: CancelFlag,
    inner: Option<DirIter>,
    total: usize,
    processed: usize,
    pending: VecDeque<WalkEvent>,
    finished: bool,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>, options: WalkOptions, cancel: CancelFlag) -> Self {
        Walker {
            root: root.into(),
            options,
            cancel,
            inner: None,
            total: 0,
            processed: 0,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn finish(&mut self, event: WalkEvent) -> Option<WalkEvent> {
        self.finished = true;
        self.pending.clear();
        Some(event)
    }

    fn process(&mut self, dent: DirEntry) {
        let path = dent.path();
        let rel = match relative_key(&self.root, path) {
            Some(rel) => rel,
            None => return,
        };
        // Links are not descended, but size, kind and digest all describe the
        // target so a later digest check agrees with the stored entry.
        let meta = if dent.path_is_symlink() {
            fs::metadata(path).map_err(|e| e.to_string())
        } else {
            dent.metadata().map_err(|e| e.to_string())
        };
        let meta = match meta {
            Ok(m) => m,
            Err(message) => {
                self.pending.push_back(WalkEvent::Error {
                    path: path.to_path_buf(),
                    message,
                });
                return;
            }
        };

        let is_dir = meta.is_dir();
        let digest = if !is_dir && self.options.compute_digest {
            match digest_file(path, &self.cancel) {
                Ok(d) => Some(d),
                Err(CatalogError::Cancelled) => {
                    self.finished = true;
                    self.pending.clear();
                    self.pending.push_back(WalkEvent::Cancelled);
                    return;
                }
                Err(e) => {
                    self.pending.push_back(WalkEvent::Error {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                    None
                }
            }
        } else {
            None
        };

        let entry = Entry {
            name: dent.file_name().to_string_lossy().into_owned(),
            path: rel.clone(),
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
            modified: unix_secs(&meta),
            digest,
        };
        self.processed += 1;
        self.pending.push_back(WalkEvent::Entry(entry));
        self.pending.push_back(WalkEvent::Progress {
            processed: self.processed,
            total: self.total.max(self.processed),
            label: rel,
        });
    }
}

impl Iterator for Walker {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Some(ev);
            }
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                return self.finish(WalkEvent::Cancelled);
            }
            if self.inner.is_none() {
                self.total = count_objects(&self.root, &self.options.exclusions, &self.cancel);
                debug!("walk of {} expects {} objects", self.root.display(), self.total);
                self.inner = Some(dir_iter(&self.root, &self.options.exclusions));
                continue;
            }

            let next = self.inner.as_mut().and_then(|it| it.next());
            match next {
                None => return self.finish(WalkEvent::Done),
                Some(Err(e)) => {
                    let path = e.path().unwrap_or(&self.root).to_path_buf();
                    self.pending.push_back(WalkEvent::Error {
                        path,
                        message: e.to_string(),
                    });
                }
                Some(Ok(dent)) => self.process(dent),
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Snapshot
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entries: EntryMap,
    pub skipped: usize,
}

/// Drains a `Walker` over `root` into a path-keyed map, forwarding progress.
pub fn snapshot<F>(
    root: &Path,
    options: WalkOptions,
    cancel: &CancelFlag,
    mut progress: F,
) -> CatalogResult<Snapshot>
where
    F: FnMut(usize, usize, &str),
{
    let meta = fs::metadata(root).map_err(|e| CatalogError::io(root, e))?;
    if !meta.is_dir() {
        return Err(CatalogError::Validation(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut snap = Snapshot::default();
    for event in Walker::new(root, options, cancel.clone()) {
        match event {
            WalkEvent::Entry(entry) => {
                snap.entries.insert(entry.path.clone(), entry);
            }
            WalkEvent::Progress {
                processed,
                total,
                label,
            } => progress(processed, total, &label),
            WalkEvent::Error { path, message } => {
                warn!("skipping {}: {message}", path.display());
                snap.skipped += 1;
            }
            WalkEvent::Cancelled => return Err(CatalogError::Cancelled),
            WalkEvent::Done => break,
        }
    }
    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), vec![b'a'; 10]).unwrap();
        fs::create_dir_all(root.join("sub/deep")).unwrap();
        fs::write(root.join("sub/b.txt"), vec![b'b'; 20]).unwrap();
        fs::write(root.join("sub/deep/c.log"), b"ccc").unwrap();
        dir
    }

    #[test]
    fn relative_keys_use_forward_slashes() {
        let root = Path::new("/data/root");
        assert_eq!(
            relative_key(root, &root.join("x").join("y.txt")).as_deref(),
            Some("x/y.txt")
        );
        assert_eq!(relative_key(root, root), None);
        assert_eq!(relative_key(root, Path::new("/elsewhere")), None);
    }

    #[test]
    fn walk_emits_entries_and_done() {
        let dir = sample_tree();
        let events: Vec<_> =
            Walker::new(dir.path(), WalkOptions::default(), CancelFlag::new()).collect();

        assert_eq!(events.last(), Some(&WalkEvent::Done));
        let entries: Vec<&Entry> = events
            .iter()
            .filter_map(|e| match e {
                WalkEvent::Entry(entry) => Some(entry),
                _ => None,
            })
            .collect();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["a.txt", "sub", "sub/b.txt", "sub/deep", "sub/deep/c.log"]
        );

        let sub = entries.iter().find(|e| e.path == "sub").unwrap();
        assert!(sub.is_dir);
        assert_eq!(sub.size, 0);
        assert_eq!(sub.digest, None);

        let b = entries.iter().find(|e| e.path == "sub/b.txt").unwrap();
        assert_eq!(b.name, "b.txt");
        assert_eq!(b.size, 20);
        assert!(b.digest.is_none());
    }

    #[test]
    fn progress_counts_every_object() {
        let dir = sample_tree();
        let progress: Vec<(usize, usize)> =
            Walker::new(dir.path(), WalkOptions::default(), CancelFlag::new())
                .filter_map(|e| match e {
                    WalkEvent::Progress {
                        processed, total, ..
                    } => Some((processed, total)),
                    _ => None,
                })
                .collect();
        assert_eq!(progress, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn digests_only_for_files_when_requested() {
        let dir = sample_tree();
        let options = WalkOptions {
            compute_digest: true,
            ..Default::default()
        };
        let snap = snapshot(dir.path(), options, &CancelFlag::new(), |_, _, _| {}).unwrap();
        assert!(snap.entries["sub"].digest.is_none());
        assert_eq!(snap.entries["a.txt"].digest.as_ref().map(|d| d.len()), Some(64));
        assert_eq!(snap.skipped, 0);
    }

    #[test]
    fn exclusions_prune_subtrees() {
        let dir = sample_tree();
        let options = WalkOptions {
            compute_digest: false,
            exclusions: vec!["*.log".into(), "sub/deep".into()],
        };
        let snap = snapshot(dir.path(), options, &CancelFlag::new(), |_, _, _| {}).unwrap();
        let keys: Vec<&str> = snap.entries.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "sub", "sub/b.txt"]);
    }

    #[test]
    fn cancellation_stops_entries() {
        let dir = sample_tree();
        let flag = CancelFlag::new();
        let mut walker = Walker::new(dir.path(), WalkOptions::default(), flag.clone());

        let first = walker.next();
        assert!(matches!(first, Some(WalkEvent::Entry(_))));
        flag.cancel();

        let rest: Vec<_> = walker.collect();
        assert!(rest
            .iter()
            .all(|e| !matches!(e, WalkEvent::Entry(_) | WalkEvent::Done)));
        assert_eq!(rest.last(), Some(&WalkEvent::Cancelled));
    }

    #[test]
    fn snapshot_reports_cancel() {
        let dir = sample_tree();
        let flag = CancelFlag::new();
        flag.cancel();
        let res = snapshot(dir.path(), WalkOptions::default(), &flag, |_, _, _| {});
        assert!(matches!(res, Err(CatalogError::Cancelled)));
    }

    #[test]
    fn snapshot_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let res = snapshot(
            &dir.path().join("nope"),
            WalkOptions::default(),
            &CancelFlag::new(),
            |_, _, _| {},
        );
        assert!(matches!(res, Err(CatalogError::Io { .. })));
    }

    #[test]
    fn cancel_from_progress_stops_midway() {
        let dir = sample_tree();
        let flag = CancelFlag::new();
        let mut seen = 0;
        let res = snapshot(dir.path(), WalkOptions::default(), &flag, |n, _, _| {
            seen = n;
            if n == 2 {
                flag.cancel();
            }
        });
        assert!(matches!(res, Err(CatalogError::Cancelled)));
        assert_eq!(seen, 2);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_object_is_skipped_and_walk_continues() {
        let dir = sample_tree();
        std::os::unix::fs::symlink(dir.path().join("gone.txt"), dir.path().join("dangling"))
            .unwrap();

        let events: Vec<_> =
            Walker::new(dir.path(), WalkOptions::default(), CancelFlag::new()).collect();
        let errors: Vec<&PathBuf> = events
            .iter()
            .filter_map(|e| match e {
                WalkEvent::Error { path, .. } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![&dir.path().join("dangling")]);
        assert_eq!(events.last(), Some(&WalkEvent::Done));

        let snap =
            snapshot(dir.path(), WalkOptions::default(), &CancelFlag::new(), |_, _, _| {}).unwrap();
        assert_eq!(snap.skipped, 1);
        let keys: Vec<&str> = snap.entries.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["a.txt", "sub", "sub/b.txt", "sub/deep", "sub/deep/c.log"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_describe_their_target() {
        let dir = sample_tree();
        let root = dir.path();
        std::os::unix::fs::symlink(root.join("sub/b.txt"), root.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(root.join("sub"), root.join("link_dir")).unwrap();

        let options = WalkOptions {
            compute_digest: true,
            ..Default::default()
        };
        let snap = snapshot(root, options, &CancelFlag::new(), |_, _, _| {}).unwrap();
        assert_eq!(snap.skipped, 0);

        let link = &snap.entries["link.txt"];
        assert!(!link.is_dir);
        assert_eq!(link.size, 20);
        assert_eq!(link.digest, snap.entries["sub/b.txt"].digest);

        let link_dir = &snap.entries["link_dir"];
        assert!(link_dir.is_dir);
        assert_eq!(link_dir.size, 0);
        assert!(link_dir.digest.is_none());
        assert!(!snap.entries.contains_key("link_dir/b.txt"));
    }

    #[test]
    fn empty_directory_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let snap =
            snapshot(dir.path(), WalkOptions::default(), &CancelFlag::new(), |_, _, _| {}).unwrap();
        assert!(snap.entries.is_empty());
    }
}
