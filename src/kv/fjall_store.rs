use std::path::PathBuf;
use std::sync::Arc;

use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};

use super::{KvBackend, KvStore};
use crate::error::CanvasError;
use crate::Result;

/// One fjall keyspace.
pub struct FjallKeyspace {
    name: String,
    inner: Keyspace,
}

impl FjallKeyspace {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl KvStore for FjallKeyspace {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .get(key)
            .map_err(CanvasError::storage)?
            .map(|val| val.as_ref().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner
            .insert(key, value)
            .map_err(CanvasError::storage)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.remove(key).map_err(CanvasError::storage)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for kv in self.inner.prefix(prefix) {
            let (key, val) = kv.into_inner().map_err(CanvasError::storage)?;
            out.push((key.as_ref().to_vec(), val.as_ref().to_vec()));
        }
        Ok(out)
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for kv in self.inner.iter() {
            let key = kv.key().map_err(CanvasError::storage)?;
            out.push(key.as_ref().to_vec());
        }
        Ok(out)
    }
}

/// Fjall-backed storage: one database directory, one fjall keyspace per name.
pub struct FjallBackend {
    base_dir: PathBuf,
    db: Database,
}

impl FjallBackend {
    pub fn open(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        let db = Database::builder(&base_dir).open().map_err(|e| {
            CanvasError::Storage(format!("failed to open fjall database: {}", e))
        })?;
        Ok(Self { base_dir, db })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Flush the journal to disk.
    pub fn persist(&self) -> Result<()> {
        self.db
            .persist(PersistMode::SyncAll)
            .map_err(CanvasError::storage)
    }
}

impl KvBackend for FjallBackend {
    fn keyspace(&self, name: &str) -> Result<Arc<dyn KvStore>> {
        let inner = self
            .db
            .keyspace(name, KeyspaceCreateOptions::default)
            .map_err(|e| CanvasError::Storage(format!("failed to open {} keyspace: {}", name, e)))?;
        Ok(Arc::new(FjallKeyspace {
            name: name.to_string(),
            inner,
        }))
    }

    fn persist(&self) -> Result<()> {
        FjallBackend::persist(self)
    }
}
