//! Ordered key-value storage behind the tag index, registry, tree and documents.
//!
//! Each component owns one or more named keyspaces. Single-key `put`/`delete`
//! are atomic; nothing larger is.

mod fjall_store;
mod memory;

pub use fjall_store::{FjallBackend, FjallKeyspace};
pub use memory::{MemoryBackend, MemoryKeyspace};

use std::sync::Arc;

use crate::Result;

pub const LAYERS_KS: &str = "layers";
pub const TREE_KS: &str = "tree";
pub const DOCUMENTS_KS: &str = "documents";
pub const DOCUMENT_VERSIONS_KS: &str = "document_versions";
pub const CHECKSUMS_KS: &str = "checksums";
pub const META_KS: &str = "meta";

/// One ordered keyspace.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key; deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// All keys, in key order.
    fn keys(&self) -> Result<Vec<Vec<u8>>>;

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Opens named keyspaces.
pub trait KvBackend: Send + Sync {
    fn keyspace(&self, name: &str) -> Result<Arc<dyn KvStore>>;

    /// Make everything written so far durable. No-op for volatile backends.
    fn persist(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KvStore) {
        assert!(store.is_empty().unwrap());
        store.put(b"b/2", b"two").unwrap();
        store.put(b"a/1", b"one").unwrap();
        store.put(b"b/1", b"uno").unwrap();

        assert_eq!(store.get(b"a/1").unwrap(), Some(b"one".to_vec()));
        assert!(store.contains(b"b/2").unwrap());
        assert_eq!(store.len().unwrap(), 3);

        let scanned = store.scan_prefix(b"b/").unwrap();
        let keys: Vec<&[u8]> = scanned.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"b/1".as_slice(), b"b/2".as_slice()]);

        store.delete(b"b/1").unwrap();
        store.delete(b"missing").unwrap();
        assert_eq!(store.get(b"b/1").unwrap(), None);
        assert_eq!(
            store.keys().unwrap(),
            vec![b"a/1".to_vec(), b"b/2".to_vec()]
        );
    }

    #[test]
    fn test_memory_backend_contract() {
        let backend = MemoryBackend::new();
        let ks = backend.keyspace("test").unwrap();
        exercise(ks.as_ref());

        // Same name, same data
        let again = backend.keyspace("test").unwrap();
        assert_eq!(again.get(b"a/1").unwrap(), Some(b"one".to_vec()));
        assert!(backend.keyspace("other").unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_fjall_backend_contract() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = FjallBackend::open(tmp.path().to_path_buf()).unwrap();
        let ks = backend.keyspace("test").unwrap();
        exercise(ks.as_ref());
    }

    #[test]
    fn test_fjall_scan_prefix_stops_at_neighbours() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = FjallBackend::open(tmp.path().to_path_buf()).unwrap();
        let ks = backend.keyspace("versions").unwrap();
        let id = 1_000_001u32.to_be_bytes();
        let next = 1_000_002u32.to_be_bytes();
        for (owner, version) in [(id, 2u32), (next, 1), (id, 1)] {
            let mut key = owner.to_vec();
            key.extend_from_slice(&version.to_be_bytes());
            ks.put(&key, &version.to_be_bytes()).unwrap();
        }
        ks.put(&id[..3], b"short").unwrap();

        let scanned = ks.scan_prefix(&id).unwrap();
        let versions: Vec<&[u8]> = scanned.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(
            versions,
            vec![1u32.to_be_bytes().as_slice(), 2u32.to_be_bytes().as_slice()]
        );
        assert!(scanned.iter().all(|(k, _)| k.starts_with(&id)));
        assert!(ks.scan_prefix(b"\xff\xff").unwrap().is_empty());
    }

    #[test]
    fn test_fjall_backend_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let backend = FjallBackend::open(tmp.path().to_path_buf()).unwrap();
            let ks = backend.keyspace(LAYERS_KS).unwrap();
            ks.put(b"k", b"v").unwrap();
            backend.persist().unwrap();
        }
        let backend = FjallBackend::open(tmp.path().to_path_buf()).unwrap();
        let ks = backend.keyspace(LAYERS_KS).unwrap();
        assert_eq!(ks.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
