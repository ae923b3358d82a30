//! Scratch SQLite database for per-pass intermediate state.
//!
//! One database holds the encoded ways (`ways`), the standalone area
//! candidates (`polygons_standalone`) and, when the keyed coordinate backend
//! is active, node positions (`nodes`). It starts in memory and can be moved
//! to a temporary file once it outgrows its share of the memory budget.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::info;
use rusqlite::{Connection, params, params_from_iter};
use tempfile::TempDir;
use thiserror::Error;

/// Ids bound per `IN (...)` query.
pub(crate) const LIMIT_IDS_PER_REQUEST: usize = 200;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS nodes (id INTEGER PRIMARY KEY, coords BLOB NOT NULL);
    CREATE TABLE IF NOT EXISTS ways (id INTEGER PRIMARY KEY, data BLOB NOT NULL);
    CREATE TABLE IF NOT EXISTS polygons_standalone (id INTEGER PRIMARY KEY);
";

/// Errors raised by the scratch database.
#[derive(Debug, Error)]
pub enum ScratchError {
    /// Opening a connection failed.
    #[error("failed to open scratch database")]
    Open {
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// Applying pragmas or creating tables failed.
    #[error("failed to initialise scratch schema")]
    Schema {
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// Writing to a scratch table failed.
    #[error("failed to write to scratch table {table}")]
    StorageWriteFailed {
        /// Table being written.
        table: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// Reading from a scratch table failed.
    #[error("failed to read from scratch table {table}")]
    StorageReadFailed {
        /// Table being read.
        table: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// Creating the spill directory failed.
    #[error("failed to create scratch spill directory")]
    SpillDir {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Copying the in-memory database to disk failed.
    #[error("failed to migrate scratch database to {path:?}")]
    Migrate {
        /// Destination file.
        path: PathBuf,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
}

enum Location {
    Memory,
    Disk { _dir: TempDir, path: PathBuf },
}

/// Per-pass scratch store.
pub struct ScratchDb {
    conn: Connection,
    location: Location,
}

impl std::fmt::Debug for ScratchDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchDb")
            .field("on_disk", &self.is_on_disk())
            .finish_non_exhaustive()
    }
}

fn write_err(table: &'static str) -> impl Fn(rusqlite::Error) -> ScratchError {
    move |source| ScratchError::StorageWriteFailed { table, source }
}

fn read_err(table: &'static str) -> impl Fn(rusqlite::Error) -> ScratchError {
    move |source| ScratchError::StorageReadFailed { table, source }
}

fn configure(conn: &Connection) -> Result<(), ScratchError> {
    conn.pragma_update(None, "synchronous", "OFF")
        .map_err(|source| ScratchError::Schema { source })?;
    conn.pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get::<_, String>(0))
        .map_err(|source| ScratchError::Schema { source })?;
    conn.execute_batch(SCHEMA)
        .map_err(|source| ScratchError::Schema { source })
}

impl ScratchDb {
    /// Open an empty in-memory database.
    ///
    /// # Errors
    /// Returns [`ScratchError::Open`] or [`ScratchError::Schema`] when SQLite
    /// refuses the connection or the schema.
    pub fn open_in_memory() -> Result<Self, ScratchError> {
        let conn = Connection::open_in_memory().map_err(|source| ScratchError::Open { source })?;
        configure(&conn)?;
        Ok(Self {
            conn,
            location: Location::Memory,
        })
    }

    /// Whether the database lives in a temporary file.
    #[must_use]
    pub const fn is_on_disk(&self) -> bool {
        matches!(self.location, Location::Disk { .. })
    }

    /// Path of the on-disk database, if migrated.
    #[must_use]
    pub fn disk_path(&self) -> Option<&Path> {
        match &self.location {
            Location::Memory => None,
            Location::Disk { path, .. } => Some(path),
        }
    }

    /// Current database size in bytes.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageReadFailed`] when the page pragmas fail.
    pub fn size_bytes(&self) -> Result<u64, ScratchError> {
        let pages: i64 = self
            .conn
            .pragma_query_value(None, "page_count", |row| row.get(0))
            .map_err(read_err("pragma"))?;
        let page_size: i64 = self
            .conn
            .pragma_query_value(None, "page_size", |row| row.get(0))
            .map_err(read_err("pragma"))?;
        Ok(u64::try_from(pages.saturating_mul(page_size)).unwrap_or(0))
    }

    /// Copy the in-memory database into a temporary file and switch to it.
    ///
    /// Does nothing when already on disk.
    ///
    /// # Errors
    /// Returns [`ScratchError::SpillDir`] or [`ScratchError::Migrate`] when the
    /// temporary file cannot be created or filled.
    pub fn migrate_to_disk(&mut self, scratch_dir: Option<&Path>) -> Result<(), ScratchError> {
        if self.is_on_disk() {
            return Ok(());
        }
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("osmweave-scratch-");
            builder
        };
        let dir = match scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|source| ScratchError::SpillDir { source })?;
        let path = dir.path().join("scratch.sqlite");
        let migrate = |source: rusqlite::Error| ScratchError::Migrate {
            path: path.clone(),
            source,
        };
        let target = path.to_string_lossy().into_owned();
        self.conn
            .execute("VACUUM INTO ?1", params![target])
            .map_err(migrate)?;
        let conn = Connection::open(&path).map_err(migrate)?;
        configure(&conn)?;
        info!("scratch database migrated to {}", path.display());
        self.conn = conn;
        self.location = Location::Disk { _dir: dir, path };
        Ok(())
    }

    /// Remove every row from every scratch table.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageWriteFailed`] when a delete fails.
    pub fn clear(&mut self) -> Result<(), ScratchError> {
        self.conn
            .execute_batch(
                "DELETE FROM nodes; DELETE FROM ways; DELETE FROM polygons_standalone;",
            )
            .map_err(write_err("all"))
    }

    /// Persist a batch of encoded ways and standalone candidates atomically.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageWriteFailed`]; nothing is kept on failure.
    pub fn store_ways(
        &mut self,
        ways: &[(i64, Vec<u8>)],
        standalone: &[i64],
    ) -> Result<(), ScratchError> {
        let tx = self.conn.transaction().map_err(write_err("ways"))?;
        {
            let mut insert = tx
                .prepare_cached("INSERT OR REPLACE INTO ways (id, data) VALUES (?1, ?2)")
                .map_err(write_err("ways"))?;
            for (id, data) in ways {
                insert.execute(params![id, data]).map_err(write_err("ways"))?;
            }
            let mut candidate = tx
                .prepare_cached("INSERT OR REPLACE INTO polygons_standalone (id) VALUES (?1)")
                .map_err(write_err("polygons_standalone"))?;
            for id in standalone {
                candidate
                    .execute(params![id])
                    .map_err(write_err("polygons_standalone"))?;
            }
        }
        tx.commit().map_err(write_err("ways"))
    }

    /// Fetch encoded ways by id, silently omitting unknown ids.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageReadFailed`] when a query fails.
    pub fn fetch_ways(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<u8>>, ScratchError> {
        self.fetch_blobs("ways", "data", ids)
    }

    /// Drop `id` from the standalone candidate set.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageWriteFailed`] when the delete fails.
    pub fn remove_standalone(&mut self, id: i64) -> Result<(), ScratchError> {
        self.conn
            .prepare_cached("DELETE FROM polygons_standalone WHERE id = ?1")
            .and_then(|mut statement| statement.execute(params![id]))
            .map(drop)
            .map_err(write_err("polygons_standalone"))
    }

    /// Page through standalone candidates in id order, starting after `after`.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageReadFailed`] when the query fails.
    pub fn standalone_page(&self, after: i64, limit: usize) -> Result<Vec<i64>, ScratchError> {
        let page_len = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = self
            .conn
            .prepare_cached(
                "SELECT id FROM polygons_standalone WHERE id > ?1 ORDER BY id LIMIT ?2",
            )
            .map_err(read_err("polygons_standalone"))?;
        let rows = statement
            .query_map(params![after, page_len], |row| row.get::<_, i64>(0))
            .map_err(read_err("polygons_standalone"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(read_err("polygons_standalone"))
    }

    /// Persist node coordinate blobs for the keyed backend.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageWriteFailed`]; nothing is kept on failure.
    pub fn store_nodes(&mut self, nodes: &[(i64, [u8; 8])]) -> Result<(), ScratchError> {
        let tx = self.conn.transaction().map_err(write_err("nodes"))?;
        {
            let mut insert = tx
                .prepare_cached("INSERT OR REPLACE INTO nodes (id, coords) VALUES (?1, ?2)")
                .map_err(write_err("nodes"))?;
            for (id, coords) in nodes {
                insert
                    .execute(params![id, &coords[..]])
                    .map_err(write_err("nodes"))?;
            }
        }
        tx.commit().map_err(write_err("nodes"))
    }

    /// Fetch node coordinate blobs by id.
    ///
    /// # Errors
    /// Returns [`ScratchError::StorageReadFailed`] when a query fails.
    pub fn fetch_nodes(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<u8>>, ScratchError> {
        self.fetch_blobs("nodes", "coords", ids)
    }

    fn fetch_blobs(
        &self,
        table: &'static str,
        column: &'static str,
        ids: &[i64],
    ) -> Result<HashMap<i64, Vec<u8>>, ScratchError> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(LIMIT_IDS_PER_REQUEST) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let query = format!("SELECT id, {column} FROM {table} WHERE id IN ({placeholders})");
            let mut statement = self.conn.prepare_cached(&query).map_err(read_err(table))?;
            let mut rows = statement
                .query(params_from_iter(chunk.iter()))
                .map_err(read_err(table))?;
            while let Some(row) = rows.next().map_err(read_err(table))? {
                let id: i64 = row.get(0).map_err(read_err(table))?;
                let blob: Vec<u8> = row.get(1).map_err(read_err(table))?;
                found.insert(id, blob);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn db() -> ScratchDb {
        ScratchDb::open_in_memory().expect("open scratch db")
    }

    #[rstest]
    fn fetch_omits_unknown_ids(mut db: ScratchDb) {
        db.store_ways(&[(1, vec![1, 2]), (3, vec![3])], &[])
            .expect("store ways");
        let found = db.fetch_ways(&[1, 2, 3]).expect("fetch ways");
        assert_eq!(found.len(), 2);
        assert_eq!(found.get(&1), Some(&vec![1, 2]));
        assert!(!found.contains_key(&2));
    }

    #[rstest]
    fn fetch_chunks_large_requests(mut db: ScratchDb) {
        let ways: Vec<(i64, Vec<u8>)> = (0..450).map(|id| (id, vec![0])).collect();
        db.store_ways(&ways, &[]).expect("store ways");
        let ids: Vec<i64> = (0..450).collect();
        assert_eq!(db.fetch_ways(&ids).expect("fetch ways").len(), 450);
    }

    #[rstest]
    fn standalone_pages_in_id_order(mut db: ScratchDb) {
        db.store_ways(&[], &[9, 3, 5, 7]).expect("store candidates");
        db.remove_standalone(5).expect("remove candidate");
        assert_eq!(db.standalone_page(i64::MIN, 2).expect("page"), vec![3, 7]);
        assert_eq!(db.standalone_page(7, 2).expect("page"), vec![9]);
    }

    #[rstest]
    fn migration_preserves_rows(mut db: ScratchDb) {
        let spill = TempDir::new().expect("temp dir");
        db.store_ways(&[(42, vec![7; 16])], &[42]).expect("store");
        db.store_nodes(&[(1, [1, 0, 0, 0, 2, 0, 0, 0])])
            .expect("store nodes");
        db.migrate_to_disk(Some(spill.path())).expect("migrate");
        assert!(db.is_on_disk());
        assert!(db.disk_path().is_some_and(Path::exists));
        assert_eq!(db.fetch_ways(&[42]).expect("fetch").get(&42), Some(&vec![7; 16]));
        assert_eq!(db.fetch_nodes(&[1]).expect("fetch").len(), 1);
        assert_eq!(db.standalone_page(i64::MIN, 10).expect("page"), vec![42]);
    }

    #[rstest]
    fn clear_empties_every_table(mut db: ScratchDb) {
        db.store_ways(&[(1, vec![1])], &[1]).expect("store");
        db.clear().expect("clear");
        assert!(db.fetch_ways(&[1]).expect("fetch").is_empty());
        assert!(db.standalone_page(i64::MIN, 10).expect("page").is_empty());
    }
}
