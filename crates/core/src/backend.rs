//! The durable ordered byte-key store behind a group database.
//!
//! A thin adapter over an embedded `redb` database held in a directory the
//! backend owns exclusively. Single-key operations commit atomically; reads
//! go through redb's checksummed pages. The directory is scratch state: a
//! vault rebuilds its accounts from group transfers when it rejoins, so the
//! backend removes its directory on drop unless told otherwise.

use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use vault2_api::{VaultError, VaultResult};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// A durable ordered byte-key store at a path.
pub struct Backend {
    path: PathBuf,
    db: Option<Database>,
    keep_on_drop: bool,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("path", &self.path).finish()
    }
}

impl Backend {
    /// Open (creating if needed) the store directory at `path`.
    pub fn open(path: &Path) -> VaultResult<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| VaultError::failed_src("create backend dir", e))?;
        let db = Database::create(path.join("records.redb"))
            .map_err(|e| VaultError::failed_src("open backend db", e))?;
        let tx = db
            .begin_write()
            .map_err(|e| VaultError::failed_src("backend init", e))?;
        tx.open_table(TABLE)
            .map_err(|e| VaultError::failed_src("backend init", e))?;
        tx.commit()
            .map_err(|e| VaultError::failed_src("backend init", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            db: Some(db),
            keep_on_drop: false,
        })
    }

    /// Leave the directory in place when this backend drops.
    pub fn keep_on_drop(&mut self) {
        self.keep_on_drop = true;
    }

    fn db(&self) -> &Database {
        self.db.as_ref().expect("database open until drop")
    }

    /// Fetch the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> VaultResult<Option<Bytes>> {
        let tx = self
            .db()
            .begin_read()
            .map_err(|e| VaultError::failed_src("backend get", e))?;
        let table = tx
            .open_table(TABLE)
            .map_err(|e| VaultError::failed_src("backend get", e))?;
        Ok(table
            .get(key)
            .map_err(|e| VaultError::failed_src("backend get", e))?
            .map(|guard| Bytes::copy_from_slice(guard.value())))
    }

    /// Store `value` under `key`, atomically. Returns whether an existing
    /// value was replaced.
    pub fn put(&self, key: &[u8], value: &[u8]) -> VaultResult<bool> {
        let tx = self
            .db()
            .begin_write()
            .map_err(|e| VaultError::failed_src("backend put", e))?;
        let replaced = {
            let mut table = tx
                .open_table(TABLE)
                .map_err(|e| VaultError::failed_src("backend put", e))?;
            let prev = table
                .insert(key, value)
                .map_err(|e| VaultError::failed_src("backend put", e))?;
            prev.is_some()
        };
        tx.commit()
            .map_err(|e| VaultError::failed_src("backend put", e))?;
        Ok(replaced)
    }

    /// Remove any value stored under `key`, atomically. Returns whether a
    /// value was present.
    pub fn delete(&self, key: &[u8]) -> VaultResult<bool> {
        let tx = self
            .db()
            .begin_write()
            .map_err(|e| VaultError::failed_src("backend delete", e))?;
        let removed = {
            let mut table = tx
                .open_table(TABLE)
                .map_err(|e| VaultError::failed_src("backend delete", e))?;
            let prev = table
                .remove(key)
                .map_err(|e| VaultError::failed_src("backend delete", e))?;
            prev.is_some()
        };
        tx.commit()
            .map_err(|e| VaultError::failed_src("backend delete", e))?;
        Ok(removed)
    }

    /// Store every pair in one atomic commit. Returns how many existing
    /// values were replaced.
    pub fn put_many(
        &self,
        pairs: &[(Vec<u8>, Bytes)],
    ) -> VaultResult<usize> {
        let tx = self
            .db()
            .begin_write()
            .map_err(|e| VaultError::failed_src("backend put many", e))?;
        let replaced = {
            let mut table = tx
                .open_table(TABLE)
                .map_err(|e| VaultError::failed_src("backend put many", e))?;
            let mut replaced = 0;
            for (key, value) in pairs {
                if table
                    .insert(key.as_slice(), value.as_ref())
                    .map_err(|e| {
                        VaultError::failed_src("backend put many", e)
                    })?
                    .is_some()
                {
                    replaced += 1;
                }
            }
            replaced
        };
        tx.commit()
            .map_err(|e| VaultError::failed_src("backend put many", e))?;
        Ok(replaced)
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in
    /// ascending key order, read from one snapshot.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> VaultResult<Vec<(Bytes, Bytes)>> {
        let tx = self
            .db()
            .begin_read()
            .map_err(|e| VaultError::failed_src("backend scan", e))?;
        let table = tx
            .open_table(TABLE)
            .map_err(|e| VaultError::failed_src("backend scan", e))?;
        let upper = prefix_upper_bound(prefix);
        let range = (
            Bound::Included(prefix),
            match upper.as_deref() {
                Some(ub) => Bound::Excluded(ub),
                None => Bound::Unbounded,
            },
        );
        let mut out = Vec::new();
        for entry in table
            .range::<&[u8]>(range)
            .map_err(|e| VaultError::failed_src("backend scan", e))?
        {
            let (k, v) =
                entry.map_err(|e| VaultError::failed_src("backend scan", e))?;
            out.push((
                Bytes::copy_from_slice(k.value()),
                Bytes::copy_from_slice(v.value()),
            ));
        }
        Ok(out)
    }

    /// Remove every key starting with `prefix`, atomically. Returns the
    /// number of removed records.
    pub fn delete_prefix(&self, prefix: &[u8]) -> VaultResult<usize> {
        let tx = self
            .db()
            .begin_write()
            .map_err(|e| VaultError::failed_src("backend delete prefix", e))?;
        let removed = {
            let mut table = tx.open_table(TABLE).map_err(|e| {
                VaultError::failed_src("backend delete prefix", e)
            })?;
            let upper = prefix_upper_bound(prefix);
            let range = (
                Bound::Included(prefix),
                match upper.as_deref() {
                    Some(ub) => Bound::Excluded(ub),
                    None => Bound::Unbounded,
                },
            );
            let keys: Vec<Vec<u8>> = table
                .range::<&[u8]>(range)
                .map_err(|e| {
                    VaultError::failed_src("backend delete prefix", e)
                })?
                .map(|entry| entry.map(|(k, _)| k.value().to_vec()))
                .collect::<Result<_, _>>()
                .map_err(|e| {
                    VaultError::failed_src("backend delete prefix", e)
                })?;
            for key in &keys {
                table.remove(key.as_slice()).map_err(|e| {
                    VaultError::failed_src("backend delete prefix", e)
                })?;
            }
            keys.len()
        };
        tx.commit()
            .map_err(|e| VaultError::failed_src("backend delete prefix", e))?;
        Ok(removed)
    }

    /// Best-effort space reclamation after bulk deletes.
    pub fn compact(&mut self) {
        if let Some(db) = self.db.as_mut() {
            if let Err(error) = db.compact() {
                tracing::debug!(?error, "backend compaction failed");
            }
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        drop(self.db.take());
        if self.keep_on_drop {
            return;
        }
        if let Err(error) = std::fs::remove_dir_all(&self.path) {
            tracing::error!(?error, path = %self.path.display(), "failed to remove backend dir");
        }
    }
}

/// The smallest byte string greater than every string starting with
/// `prefix`, or `None` when the prefix is all `0xff`.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(out);
        }
        out.pop();
    }
    None
}
