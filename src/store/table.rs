//! Record tables a [`DurableStateStore`](crate::DurableStateStore) can run on.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::store::durable::{BreakerRecord, RecordClient, RecordUpdate};

type TableKey = (String, String);

/// An in-process record table.
///
/// Clones share the same rows, which makes it a stand-in for an external
/// table when several breakers (or simulated processes) must see the same
/// state. The table can be switched offline to simulate an outage.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    rows: Arc<RwLock<AHashMap<TableKey, BreakerRecord>>>,
    online: Arc<AtomicBool>,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTable {
    /// Creates an empty, reachable table.
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(AHashMap::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes every subsequent call succeed (`true`) or fail (`false`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of stored rows across all tables.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("table is offline".to_string()))
        }
    }
}

impl RecordClient for MemoryTable {
    fn get(&self, table: &str, name: &str) -> Result<Option<BreakerRecord>, StoreError> {
        self.check_online()?;
        let key = (table.to_string(), name.to_string());
        Ok(self.rows.read().get(&key).cloned())
    }

    fn put(&self, table: &str, record: &BreakerRecord) -> Result<(), StoreError> {
        self.check_online()?;
        let key = (table.to_string(), record.name.clone());
        self.rows.write().insert(key, record.clone());
        Ok(())
    }

    fn update(&self, table: &str, name: &str, update: &RecordUpdate) -> Result<(), StoreError> {
        self.check_online()?;
        let key = (table.to_string(), name.to_string());
        let mut rows = self.rows.write();
        let record = rows
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        record.apply(update);
        Ok(())
    }
}

/// A record table kept as JSON documents on disk, one file per breaker under
/// `<base_dir>/<table>/<name>.json`.
///
/// Every write goes to its own uniquely named temporary file in the table
/// directory and is renamed into place, so a reader never sees a half-written
/// record. Several processes can share one directory; concurrent updates to
/// the same record are last-writer-wins.
#[derive(Debug, Clone)]
pub struct FileTable {
    base_dir: PathBuf,
}

impl FileTable {
    /// Creates a table rooted at `base_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Root directory of this table.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, table: &str, name: &str) -> Result<PathBuf, StoreError> {
        for part in [table, name] {
            if part.is_empty() || part.contains(&['/', '\\'][..]) || part == "." || part == ".." {
                return Err(StoreError::Codec(format!(
                    "'{}' cannot be used as a file name",
                    part
                )));
            }
        }
        Ok(self.base_dir.join(table).join(format!("{}.json", name)))
    }

    fn write_record(&self, path: &Path, record: &BreakerRecord) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let dir = path.parent().unwrap_or(self.base_dir.as_path());
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&serde_json::to_vec_pretty(record)?)?;
        temp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl RecordClient for FileTable {
    fn get(&self, table: &str, name: &str) -> Result<Option<BreakerRecord>, StoreError> {
        let path = self.record_path(table, name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, table: &str, record: &BreakerRecord) -> Result<(), StoreError> {
        let path = self.record_path(table, &record.name)?;
        self.write_record(&path, record)
    }

    fn update(&self, table: &str, name: &str, update: &RecordUpdate) -> Result<(), StoreError> {
        let path = self.record_path(table, name)?;
        let mut record = self
            .get(table, name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        record.apply(update);
        self.write_record(&path, &record)
    }
}
