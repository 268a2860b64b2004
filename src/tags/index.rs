use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{IdRange, TagNamespace};
use crate::bitset::BitSet;
use crate::error::CanvasError;
use crate::kv::KvStore;
use crate::Result;

/// Tag-key -> bitmap index for one namespace.
///
/// Reads go through a write-through cache that is only ever evicted by
/// [`TagIndex::remove`] or [`TagIndex::rename`]. Mutations of a single key are
/// serialized by a per-key mutex; the cache alone is not a lock.
pub struct TagIndex {
    namespace: TagNamespace,
    range: IdRange,
    store: Arc<dyn KvStore>,
    cache: DashMap<String, BitSet>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TagIndex {
    pub fn new(namespace: TagNamespace, range: IdRange, store: Arc<dyn KvStore>) -> Self {
        Self {
            namespace,
            range,
            store,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn namespace(&self) -> TagNamespace {
        self.namespace
    }

    pub fn range(&self) -> IdRange {
        self.range
    }

    fn key_lock(&self, tag: &str) -> Arc<Mutex<()>> {
        self.locks.entry(tag.to_string()).or_default().clone()
    }

    /// Drop the lock entry of a tag that no longer exists. Called with the
    /// guard held; the entry stays when another caller already cloned it.
    fn release_lock(&self, tag: &str, lock: &Arc<Mutex<()>>) {
        self.locks
            .remove_if(tag, |_, held| Arc::ptr_eq(held, lock) && Arc::strong_count(held) == 2);
    }

    fn validate_key(tag: &str) -> Result<()> {
        if tag.trim().is_empty() {
            return Err(CanvasError::Validation("tag key must not be empty".to_string()));
        }
        Ok(())
    }

    fn check_range<I: IntoIterator<Item = u32>>(&self, tag: &str, ids: I) -> Result<()> {
        for id in ids {
            if !self.range.contains(id) {
                return Err(CanvasError::IdOutOfRange {
                    tag: tag.to_string(),
                    id,
                    min: self.range.min,
                    max: self.range.max,
                });
            }
        }
        Ok(())
    }

    /// Load a bitmap through the cache. Stored bitmaps are range-checked.
    fn load(&self, tag: &str) -> Result<Option<BitSet>> {
        if let Some(cached) = self.cache.get(tag) {
            return Ok(Some(cached.clone()));
        }
        let Some(bytes) = self.store.get(tag.as_bytes())? else {
            return Ok(None);
        };
        let bitmap = BitSet::deserialize(&bytes).map_err(|e| {
            CanvasError::Integrity(format!("corrupt bitmap {}/{}: {}", self.namespace, tag, e))
        })?;
        let out_of_range = [bitmap.min(), bitmap.max()]
            .into_iter()
            .flatten()
            .find(|id| !self.range.contains(*id));
        if let Some(id) = out_of_range {
            warn!(namespace = %self.namespace, tag, id, "stored bitmap violates id range");
            return Err(CanvasError::IdOutOfRange {
                tag: tag.to_string(),
                id,
                min: self.range.min,
                max: self.range.max,
            });
        }
        self.cache.insert(tag.to_string(), bitmap.clone());
        Ok(Some(bitmap))
    }

    fn save(&self, tag: &str, bitmap: &BitSet) -> Result<()> {
        self.store.put(tag.as_bytes(), &bitmap.serialize())?;
        self.cache.insert(tag.to_string(), bitmap.clone());
        Ok(())
    }

    fn tick_inner(&self, tag: &str, ids: &[u32], auto_create: bool) -> Result<BitSet> {
        Self::validate_key(tag)?;
        self.check_range(tag, ids.iter().copied())?;

        let lock = self.key_lock(tag);
        let _guard = lock.lock();
        let mut bitmap = match self.load(tag)? {
            Some(bitmap) => bitmap,
            None if auto_create => BitSet::new(),
            None => return Err(CanvasError::TagNotFound(tag.to_string())),
        };
        let added = bitmap.add_many(ids.iter().copied());
        self.save(tag, &bitmap)?;
        debug!(namespace = %self.namespace, tag, added, "tick");
        Ok(bitmap)
    }

    /// Add ids to a tag, creating the tag when absent.
    pub fn tick(&self, tag: &str, ids: &[u32]) -> Result<BitSet> {
        self.tick_inner(tag, ids, true)
    }

    /// Add ids to a tag that must already exist.
    pub fn tick_existing(&self, tag: &str, ids: &[u32]) -> Result<BitSet> {
        self.tick_inner(tag, ids, false)
    }

    /// Remove ids from a tag. `None` when the tag does not exist.
    pub fn untick(&self, tag: &str, ids: &[u32]) -> Result<Option<BitSet>> {
        let lock = self.key_lock(tag);
        let _guard = lock.lock();
        let Some(mut bitmap) = self.load(tag)? else {
            self.release_lock(tag, &lock);
            return Ok(None);
        };
        let removed = bitmap.remove_many(ids.iter().copied());
        if removed > 0 {
            self.save(tag, &bitmap)?;
        }
        debug!(namespace = %self.namespace, tag, removed, "untick");
        Ok(Some(bitmap))
    }

    /// Tick the same ids into several tags. Each tag is persisted on its own,
    /// so a failure leaves the earlier tags ticked and the later ones untouched.
    pub fn tick_many<S: AsRef<str>>(&self, tags: &[S], ids: &[u32]) -> Result<()> {
        for tag in tags {
            Self::validate_key(tag.as_ref())?;
            self.check_range(tag.as_ref(), ids.iter().copied())?;
        }
        for tag in tags {
            self.tick(tag.as_ref(), ids)?;
        }
        Ok(())
    }

    pub fn untick_many<S: AsRef<str>>(&self, tags: &[S], ids: &[u32]) -> Result<()> {
        for tag in tags {
            self.untick(tag.as_ref(), ids)?;
        }
        Ok(())
    }

    /// Remove `id` from every tag holding it. Returns the modified tags.
    pub fn untick_all(&self, id: u32) -> Result<Vec<String>> {
        let mut touched = Vec::new();
        for tag in self.list()? {
            if self.has(&tag, id)? {
                self.untick(&tag, &[id])?;
                touched.push(tag);
            }
        }
        Ok(touched)
    }

    /// Intersection of the named tags. An absent tag counts as empty and
    /// short-circuits the whole result; nothing is created by a query.
    pub fn and<S: AsRef<str>>(&self, tags: &[S]) -> Result<BitSet> {
        let mut acc: Option<BitSet> = None;
        for tag in tags {
            let bitmap = match self.load(tag.as_ref())? {
                Some(bitmap) if !bitmap.is_empty() => bitmap,
                _ => return Ok(BitSet::new()),
            };
            match acc.as_mut() {
                None => acc = Some(bitmap),
                Some(acc) => {
                    acc.and_inplace(&bitmap);
                    if acc.is_empty() {
                        return Ok(BitSet::new());
                    }
                }
            }
        }
        Ok(acc.unwrap_or_default())
    }

    /// Union of the named tags; absent tags are skipped.
    pub fn or<S: AsRef<str>>(&self, tags: &[S]) -> Result<BitSet> {
        let mut acc = BitSet::new();
        for tag in tags {
            if let Some(bitmap) = self.load(tag.as_ref())? {
                acc.or_inplace(&bitmap);
            }
        }
        Ok(acc)
    }

    /// `and(positive)` minus `or(negative)`
    pub fn and_not<S: AsRef<str>, T: AsRef<str>>(
        &self,
        positive: &[S],
        negative: &[T],
    ) -> Result<BitSet> {
        let base = self.and(positive)?;
        if base.is_empty() || negative.is_empty() {
            return Ok(base);
        }
        Ok(base.and_not(&self.or(negative)?))
    }

    /// Explicitly create a tag, optionally seeded.
    pub fn create(&self, tag: &str, seed: Option<&BitSet>) -> Result<BitSet> {
        Self::validate_key(tag)?;
        if let Some(seed) = seed {
            self.check_range(tag, seed.iter())?;
        }
        let lock = self.key_lock(tag);
        let _guard = lock.lock();
        if self.load(tag)?.is_some() {
            return Err(CanvasError::Conflict(format!(
                "tag {}/{} already exists",
                self.namespace, tag
            )));
        }
        let bitmap = seed.cloned().unwrap_or_default();
        self.save(tag, &bitmap)?;
        debug!(namespace = %self.namespace, tag, "created tag");
        Ok(bitmap)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        Self::validate_key(to)?;
        if from == to {
            return Ok(());
        }
        // Lock in key order so concurrent opposite renames cannot deadlock.
        let (first, second) = if from < to { (from, to) } else { (to, from) };
        let first_lock = self.key_lock(first);
        let second_lock = self.key_lock(second);
        let _g1 = first_lock.lock();
        let _g2 = second_lock.lock();

        let bitmap = self
            .load(from)?
            .ok_or_else(|| CanvasError::TagNotFound(from.to_string()))?;
        if self.load(to)?.is_some() {
            return Err(CanvasError::Conflict(format!(
                "tag {}/{} already exists",
                self.namespace, to
            )));
        }
        self.save(to, &bitmap)?;
        self.store.delete(from.as_bytes())?;
        self.cache.remove(from);
        let from_lock = if first == from { &first_lock } else { &second_lock };
        self.release_lock(from, from_lock);
        debug!(namespace = %self.namespace, from, to, "renamed tag");
        Ok(())
    }

    /// Delete a tag. Returns false when it did not exist.
    pub fn remove(&self, tag: &str) -> Result<bool> {
        let lock = self.key_lock(tag);
        let _guard = lock.lock();
        let existed = self.cache.contains_key(tag) || self.store.contains(tag.as_bytes())?;
        self.store.delete(tag.as_bytes())?;
        self.cache.remove(tag);
        self.release_lock(tag, &lock);
        if existed {
            debug!(namespace = %self.namespace, tag, "removed tag");
        }
        Ok(existed)
    }

    /// Tag keys in key order
    pub fn list(&self) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        for key in self.store.keys()? {
            let tag = String::from_utf8(key).map_err(|e| {
                CanvasError::Integrity(format!("non-utf8 tag key in {}: {}", self.namespace, e))
            })?;
            tags.push(tag);
        }
        Ok(tags)
    }

    pub fn get_bitmap(&self, tag: &str) -> Result<Option<BitSet>> {
        self.load(tag)
    }

    pub fn exists(&self, tag: &str) -> Result<bool> {
        Ok(self.cache.contains_key(tag) || self.store.contains(tag.as_bytes())?)
    }

    pub fn has(&self, tag: &str, id: u32) -> Result<bool> {
        Ok(self.load(tag)?.is_some_and(|bitmap| bitmap.contains(id)))
    }

    /// Cardinality of every tag
    pub fn stats(&self) -> Result<Vec<(String, u64)>> {
        let mut out = Vec::new();
        for tag in self.list()? {
            let count = self.load(&tag)?.map(|b| b.cardinality()).unwrap_or(0);
            out.push((tag, count));
        }
        Ok(out)
    }
}
