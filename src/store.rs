use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::error::{CatalogError, CatalogResult};
use crate::models::{Catalog, CatalogId, CatalogSummary, Entry, EntryMap};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS catalogs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    name             TEXT NOT NULL,
    root_path        TEXT NOT NULL,
    created_at       INTEGER NOT NULL,
    digest_algorithm TEXT
);

CREATE TABLE IF NOT EXISTS files (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    catalog_id   INTEGER NOT NULL REFERENCES catalogs (id) ON DELETE CASCADE,
    path         TEXT NOT NULL,
    name         TEXT NOT NULL,
    is_directory INTEGER NOT NULL,
    size         INTEGER NOT NULL,
    modified_at  INTEGER NOT NULL,
    digest       TEXT,
    UNIQUE (catalog_id, path)
);
";

/// Rows between cancellation checks while inserting entries.
const CANCEL_CHECK_INTERVAL: usize = 256;

/// SQLite-backed catalog store. One value owns one connection; background
/// jobs open their own instead of sharing one.
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    pub fn open(path: &Path) -> CatalogResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CatalogError::io(parent, e))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> CatalogResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CatalogResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(CatalogStore { conn })
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Write transactions take the lock at BEGIN so a second writer waits on
    /// the busy timeout instead of failing a read-to-write upgrade.
    fn write_tx(&mut self) -> CatalogResult<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Inserts the catalog row and all of its entries in one transaction.
    /// `progress` sees `(rows written, total)` at every cancellation check.
    pub fn create<F>(
        &mut self,
        name: &str,
        root_path: &Path,
        entries: &EntryMap,
        digest_algorithm: Option<&str>,
        cancel: &CancelFlag,
        progress: F,
    ) -> CatalogResult<CatalogId>
    where
        F: FnMut(usize, usize),
    {
        let tx = self.write_tx()?;
        tx.execute(
            "INSERT INTO catalogs (name, root_path, created_at, digest_algorithm)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                root_path.to_string_lossy().into_owned(),
                Utc::now().timestamp(),
                digest_algorithm
            ],
        )?;
        let id = CatalogId(tx.last_insert_rowid());
        insert_entries(&tx, id, entries, cancel, progress)?;
        tx.commit()?;
        info!("created catalog {id} '{name}' with {} entries", entries.len());
        Ok(id)
    }

    /// Swaps the full entry set of a catalog atomically.
    pub fn replace_entries<F>(
        &mut self,
        id: CatalogId,
        entries: &EntryMap,
        digest_algorithm: Option<&str>,
        cancel: &CancelFlag,
        progress: F,
    ) -> CatalogResult<()>
    where
        F: FnMut(usize, usize),
    {
        let tx = self.write_tx()?;
        ensure_exists(&tx, id)?;
        let removed = tx.execute("DELETE FROM files WHERE catalog_id = ?1", params![id.0])?;
        debug!("catalog {id}: removed {removed} stale entries");
        tx.execute(
            "UPDATE catalogs SET digest_algorithm = ?1 WHERE id = ?2",
            params![digest_algorithm, id.0],
        )?;
        insert_entries(&tx, id, entries, cancel, progress)?;
        tx.commit()?;
        info!("catalog {id}: stored {} entries", entries.len());
        Ok(())
    }

    pub fn rename(&mut self, id: CatalogId, new_name: &str) -> CatalogResult<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(CatalogError::Validation(
                "catalog name must not be empty".into(),
            ));
        }
        let changed = self.conn.execute(
            "UPDATE catalogs SET name = ?1 WHERE id = ?2",
            params![new_name, id.0],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(id));
        }
        info!("catalog {id} renamed to '{new_name}'");
        Ok(())
    }

    /// Removes the entries, then the catalog row, in one transaction.
    pub fn delete(&mut self, id: CatalogId) -> CatalogResult<()> {
        let tx = self.write_tx()?;
        ensure_exists(&tx, id)?;
        tx.execute("DELETE FROM files WHERE catalog_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM catalogs WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        info!("catalog {id} deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Most recently created first.
    pub fn list(&self) -> CatalogResult<Vec<CatalogSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, root_path FROM catalogs ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CatalogSummary {
                    id: CatalogId(row.get(0)?),
                    name: row.get(1)?,
                    root_path: PathBuf::from(row.get::<_, String>(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get(&self, id: CatalogId) -> CatalogResult<Catalog> {
        self.conn
            .query_row(
                "SELECT id, name, root_path, created_at, digest_algorithm
                 FROM catalogs WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Catalog {
                        id: CatalogId(row.get(0)?),
                        name: row.get(1)?,
                        root_path: PathBuf::from(row.get::<_, String>(2)?),
                        created_at: row.get(3)?,
                        digest_algorithm: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(CatalogError::NotFound(id))
    }

    /// Entries of a catalog keyed by relative path. Unknown ids yield an
    /// empty map.
    pub fn load_entries(&self, id: CatalogId) -> CatalogResult<EntryMap> {
        let mut stmt = self.conn.prepare(
            "SELECT path, name, is_directory, size, modified_at, digest
             FROM files WHERE catalog_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok(Entry {
                path: row.get(0)?,
                name: row.get(1)?,
                is_dir: row.get(2)?,
                size: row.get::<_, i64>(3)?.max(0) as u64,
                modified: row.get(4)?,
                digest: row.get(5)?,
            })
        })?;

        let mut map = EntryMap::new();
        for entry in rows {
            let entry = entry?;
            map.insert(entry.path.clone(), entry);
        }
        Ok(map)
    }

    pub fn entry_count(&self, id: CatalogId) -> CatalogResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM files WHERE catalog_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

fn ensure_exists(tx: &Transaction<'_>, id: CatalogId) -> CatalogResult<()> {
    let found: Option<i64> = tx
        .query_row(
            "SELECT id FROM catalogs WHERE id = ?1",
            params![id.0],
            |row| row.get(0),
        )
        .optional()?;
    found.map(|_| ()).ok_or(CatalogError::NotFound(id))
}

/// Inserts inside the caller's transaction. Returning an error drops the
/// transaction, which rolls it back.
fn insert_entries<F>(
    tx: &Transaction<'_>,
    id: CatalogId,
    entries: &EntryMap,
    cancel: &CancelFlag,
    mut progress: F,
) -> CatalogResult<()>
where
    F: FnMut(usize, usize),
{
    let mut stmt = tx.prepare(
        "INSERT INTO files (catalog_id, path, name, is_directory, size, modified_at, digest)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let total = entries.len();
    for (i, entry) in entries.values().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            if cancel.is_cancelled() {
                return Err(CatalogError::Cancelled);
            }
            progress(i, total);
        }
        stmt.execute(params![
            id.0,
            entry.path,
            entry.name,
            entry.is_dir,
            entry.size as i64,
            entry.modified,
            entry.digest
        ])?;
    }
    if cancel.is_cancelled() {
        return Err(CatalogError::Cancelled);
    }
    progress(total, total);
    Ok(())
}
