//! Compressed set of 32-bit document ids
//!
//! Thin value type over `RoaringBitmap`. Serialization uses the Roaring
//! portable format so blobs written by one build can be read by another.

use std::fmt;
use std::io;

use roaring::RoaringBitmap;

/// Sorted, compressed set of u32 ids.
#[derive(Clone, Default, PartialEq)]
pub struct BitSet {
    bits: RoaringBitmap,
}

impl BitSet {
    pub fn new() -> Self {
        Self {
            bits: RoaringBitmap::new(),
        }
    }

    pub fn from_bitmap(bits: RoaringBitmap) -> Self {
        Self { bits }
    }

    /// Build from ids in any order
    pub fn from_ids<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        Self {
            bits: ids.into_iter().collect(),
        }
    }

    /// Add an id, returning true if it was not already present
    pub fn add(&mut self, id: u32) -> bool {
        self.bits.insert(id)
    }

    /// Add ids, returning how many were new
    pub fn add_many<I: IntoIterator<Item = u32>>(&mut self, ids: I) -> u64 {
        let before = self.bits.len();
        self.bits.extend(ids);
        self.bits.len() - before
    }

    pub fn remove(&mut self, id: u32) -> bool {
        self.bits.remove(id)
    }

    /// Remove ids, returning how many were present
    pub fn remove_many<I: IntoIterator<Item = u32>>(&mut self, ids: I) -> u64 {
        let before = self.bits.len();
        for id in ids {
            self.bits.remove(id);
        }
        before - self.bits.len()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.bits.contains(id)
    }

    pub fn and(&self, other: &BitSet) -> BitSet {
        BitSet::from_bitmap(&self.bits & &other.bits)
    }

    pub fn or(&self, other: &BitSet) -> BitSet {
        BitSet::from_bitmap(&self.bits | &other.bits)
    }

    pub fn xor(&self, other: &BitSet) -> BitSet {
        let mut out = self.clone();
        out.xor_inplace(other);
        out
    }

    /// Ids in `self` that are not in `other`
    pub fn and_not(&self, other: &BitSet) -> BitSet {
        BitSet::from_bitmap(&self.bits - &other.bits)
    }

    pub(crate) fn and_inplace(&mut self, other: &BitSet) {
        self.bits &= &other.bits;
    }

    pub(crate) fn or_inplace(&mut self, other: &BitSet) {
        self.bits |= &other.bits;
    }

    pub(crate) fn xor_inplace(&mut self, other: &BitSet) {
        self.bits ^= &other.bits;
    }

    /// Intersection of every set; an empty input yields an empty set.
    pub fn and_all<'a, I>(sets: I) -> BitSet
    where
        I: IntoIterator<Item = &'a BitSet>,
    {
        let mut iter = sets.into_iter();
        let Some(first) = iter.next() else {
            return BitSet::new();
        };
        let mut acc = first.clone();
        for set in iter {
            if acc.is_empty() {
                break;
            }
            acc.and_inplace(set);
        }
        acc
    }

    /// Union of every set; an empty input yields an empty set.
    pub fn or_all<'a, I>(sets: I) -> BitSet
    where
        I: IntoIterator<Item = &'a BitSet>,
    {
        let mut acc = BitSet::new();
        for set in sets {
            acc.or_inplace(set);
        }
        acc
    }

    pub fn cardinality(&self) -> u64 {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn min(&self) -> Option<u32> {
        self.bits.min()
    }

    pub fn max(&self) -> Option<u32> {
        self.bits.max()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter()
    }

    pub fn to_sorted_vec(&self) -> Vec<u32> {
        self.bits.iter().collect()
    }

    pub fn as_bitmap(&self) -> &RoaringBitmap {
        &self.bits
    }

    /// Serialize in the Roaring portable format
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.serialized_size());
        // Writing into a Vec cannot fail.
        let _ = self.bits.serialize_into(&mut out);
        out
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let bits = RoaringBitmap::deserialize_from(data)?;
        Ok(Self { bits })
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bits.len() <= 16 {
            f.debug_set().entries(self.bits.iter()).finish()
        } else {
            write!(f, "BitSet({} ids)", self.bits.len())
        }
    }
}

impl FromIterator<u32> for BitSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from_ids(iter)
    }
}

impl Extend<u32> for BitSet {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        self.bits.extend(iter);
    }
}
