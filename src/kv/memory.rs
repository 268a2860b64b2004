use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{KvBackend, KvStore};
use crate::Result;

/// In-process keyspace over a `BTreeMap`.
#[derive(Default)]
pub struct MemoryKeyspace {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KvStore for MemoryKeyspace {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.map.read().keys().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.map.read().len())
    }
}

/// Backend whose keyspaces vanish with the process.
#[derive(Default)]
pub struct MemoryBackend {
    spaces: Mutex<HashMap<String, Arc<MemoryKeyspace>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn keyspace(&self, name: &str) -> Result<Arc<dyn KvStore>> {
        let mut spaces = self.spaces.lock();
        let ks = spaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryKeyspace::default()))
            .clone();
        Ok(ks)
    }
}
