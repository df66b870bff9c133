use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to open sled database at {path}: {source}")]
    SledOpen {
        path: std::path::PathBuf,
        #[source]
        source: sled::Error,
    },

    #[error("sled operation failed: {0}")]
    Sled(#[from] sled::Error),
}

/// A single put or delete applied atomically with the rest of a `WriteBatch`.
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

#[derive(Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete(key.into()));
    }
}

/// The pluggable KV backend the table store is built on. Keys and values are
/// opaque byte strings; the table layer is responsible for encoding rows
/// into this flat namespace.
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Returns every `(key, value)` pair whose key starts with `prefix`, in
    /// key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError>;
}

/// Development/test backend: an in-memory `BTreeMap` guarded by a single
/// read-write lock. Not durable across process restarts.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let guard = self.inner.read();
        Ok(guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut guard = self.inner.write();
        for op in batch.ops {
            match op {
                WriteOp::Put(k, v) => {
                    guard.insert(k, v);
                }
                WriteOp::Delete(k) => {
                    guard.remove(&k);
                }
            }
        }
        Ok(())
    }
}

/// Single-process embedded persistence backend, grounded in the same
/// "pluggable KV" requirement as `MemoryStorage` but durable across restarts.
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|source| StorageError::SledOpen {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(target: "store", path = %path.display(), "opened sled storage");
        Ok(Arc::new(Self { db }))
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.db
            .scan_prefix(prefix)
            .map(|res| res.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
            .collect()
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.ops {
            match op {
                WriteOp::Put(k, v) => sled_batch.insert(k, v),
                WriteOp::Delete(k) => sled_batch.remove(k),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }
}
