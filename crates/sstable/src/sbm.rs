//! The Sorted Byte Map: an immutable, prefix-compressed, off-heap sorted
//! block of versioned entries.
//!
//! `SbmBuilder` accumulates entries in strictly ascending key order and
//! freezes them into a single contiguous `MemoryRegion` on `build()`.  `Sbm`
//! reads that region: `get`, `floor_index`, `ceiling_index` and the two
//! iterators never materialize more than one entry at a time, and the
//! binary search variants compare directly against the packed bytes.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};
use crate::key::{Entry, Key, Value};
use crate::memory::{Allocator, MemoryRegion};
use crate::varint;

/// Accumulates entries in ascending key order and freezes them into an
/// [`Sbm`].
pub struct SbmBuilder {
    entries: Vec<Entry>,
    prefix: Vec<u8>,
    allocator: Allocator,
}

impl SbmBuilder {
    /// Starts an empty builder that allocates its frozen region through
    /// `allocator`.
    #[must_use]
    pub fn new(allocator: Allocator) -> Self {
        Self {
            entries: Vec::new(),
            prefix: Vec::new(),
            allocator,
        }
    }

    /// Appends `entry`. Entries must be added in strictly ascending `Key`
    /// order; violating this returns `OrderingViolation`.
    pub fn add(&mut self, entry: Entry) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if entry.key <= last.key {
                return Err(FormatError::OrderingViolation);
            }
        }
        if self.entries.is_empty() {
            self.prefix = entry.key.bytes.clone();
        } else {
            let mismatch = self
                .prefix
                .iter()
                .zip(entry.key.bytes.iter())
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| self.prefix.len().min(entry.key.bytes.len()));
            self.prefix.truncate(mismatch);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// The number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no entries have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first (lowest) key added so far, used to propagate a data
    /// block's start key to the index tree once the block is flushed.
    #[must_use]
    pub fn first_key(&self) -> Option<&Key> {
        self.entries.first().map(|e| &e.key)
    }

    /// Computes the exact serialized size this builder would produce.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        let p = self.prefix.len();
        let mut total = 4 + p + 4 + 4 * self.entries.len();
        for entry in &self.entries {
            let suffix_len = entry.key.bytes.len() - p;
            total += varint::size32(suffix_len as u32)
                + suffix_len
                + varint::size64(entry.key.snapshot_id)
                + varint::size32(entry.value.as_bytes().len() as u32)
                + entry.value.as_bytes().len();
        }
        total
    }

    /// Consumes the builder, allocates one region of exactly
    /// `size_bytes()`, serializes every entry into it, and returns the
    /// frozen [`Sbm`].
    pub fn build(self) -> Result<Sbm> {
        let size = self.size_bytes();
        let mut region = self.allocator.allocate(size)?;
        let prefix = self.prefix;
        {
            let buf = region.as_mut_slice()?;
            let p = prefix.len();
            LittleEndian::write_u32(&mut buf[0..4], p as u32);
            buf[4..4 + p].copy_from_slice(&prefix);
            let n = self.entries.len();
            let count_off = 4 + p;
            LittleEndian::write_u32(&mut buf[count_off..count_off + 4], n as u32);

            let offsets_off = count_off + 4;
            let entries_start = offsets_off + 4 * n;
            let mut cursor = entries_start;
            for (i, entry) in self.entries.iter().enumerate() {
                LittleEndian::write_u32(
                    &mut buf[offsets_off + 4 * i..offsets_off + 4 * i + 4],
                    cursor as u32,
                );
                let suffix = &entry.key.bytes[p..];
                let mut encoded = Vec::new();
                varint::encode_u32(suffix.len() as u32, &mut encoded);
                encoded.extend_from_slice(suffix);
                varint::encode_u64(entry.key.snapshot_id, &mut encoded);
                let value_bytes = entry.value.as_bytes();
                varint::encode_u32(value_bytes.len() as u32, &mut encoded);
                encoded.extend_from_slice(value_bytes);
                buf[cursor..cursor + encoded.len()].copy_from_slice(&encoded);
                cursor += encoded.len();
            }
            debug_assert_eq!(cursor, size);
        }
        Sbm::from_region(region)
    }
}

/// A frozen, immutable sorted block of versioned entries.
pub struct Sbm {
    region: MemoryRegion,
    prefix: Vec<u8>,
    entry_count: usize,
}

impl Sbm {
    /// Reads the header of `region` (prefix, entry count) and wraps it as an
    /// `Sbm`. The region must have been produced by `SbmBuilder::build`.
    pub fn from_region(region: MemoryRegion) -> Result<Self> {
        let buf = region.as_slice()?;
        let p = LittleEndian::read_u32(&buf[0..4]) as usize;
        let prefix = buf[4..4 + p].to_vec();
        let count_off = 4 + p;
        let entry_count = LittleEndian::read_u32(&buf[count_off..count_off + 4]) as usize;
        Ok(Self {
            region,
            prefix,
            entry_count,
        })
    }

    /// Number of entries in the block.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// The longest common key-byte prefix shared by every entry.
    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn entry_offset(&self, i: usize) -> Result<usize> {
        let buf = self.region.as_slice()?;
        let offsets_off = 4 + self.prefix.len() + 4;
        let start = offsets_off + 4 * i;
        Ok(LittleEndian::read_u32(&buf[start..start + 4]) as usize)
    }

    fn read_suffix(&self, i: usize) -> Result<Vec<u8>> {
        let buf = self.region.as_slice()?;
        let off = self.entry_offset(i)?;
        let (len, n) = varint::decode_u32(&buf[off..])?;
        let start = off + n;
        Ok(buf[start..start + len as usize].to_vec())
    }

    fn read_snapshot_and_value(&self, i: usize) -> Result<(u64, Vec<u8>)> {
        let buf = self.region.as_slice()?;
        let off = self.entry_offset(i)?;
        let (suffix_len, n1) = varint::decode_u32(&buf[off..])?;
        let mut cursor = off + n1 + suffix_len as usize;
        let (snapshot_id, n2) = varint::decode_u64(&buf[cursor..])?;
        cursor += n2;
        let (value_len, n3) = varint::decode_u32(&buf[cursor..])?;
        cursor += n3;
        let value = buf[cursor..cursor + value_len as usize].to_vec();
        Ok((snapshot_id, value))
    }

    /// Reconstructs entry `i` (full key bytes, snapshot id, value).
    pub fn get(&self, i: usize) -> Result<Entry> {
        if i >= self.entry_count {
            return Err(FormatError::IndexOutOfBounds {
                index: i,
                len: self.entry_count,
            });
        }
        let suffix = self.read_suffix(i)?;
        let (snapshot_id, value) = self.read_snapshot_and_value(i)?;
        let mut bytes = self.prefix.clone();
        bytes.extend_from_slice(&suffix);
        Ok(Entry::new(Key::new(bytes, snapshot_id), Value::new(value)))
    }

    /// Compares stored entry `i` against `query`, per the four-step rule:
    /// prefix bytes, then suffix bytes, then suffix length, then snapshot id.
    /// The returned ordering is `stored.cmp(query)`. Reads straight out of
    /// the region's bytes; never materializes the entry.
    fn compare_stored(&self, i: usize, query: &Key) -> Result<Ordering> {
        let qb = &query.bytes;
        let cmp_len = self.prefix.len().min(qb.len());
        for j in 0..cmp_len {
            match self.prefix[j].cmp(&qb[j]) {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        if cmp_len < self.prefix.len() {
            // query is shorter than the stored prefix and matched what there
            // was of it: query is a strict byte-prefix of the stored key.
            return Ok(Ordering::Greater);
        }
        let remaining_query = &qb[self.prefix.len()..];

        let buf = self.region.as_slice()?;
        let off = self.entry_offset(i)?;
        let (suffix_len, n1) = varint::decode_u32(&buf[off..])?;
        let suffix_start = off + n1;
        let suffix_end = suffix_start + suffix_len as usize;
        let suffix = &buf[suffix_start..suffix_end];

        let cmp_len2 = suffix.len().min(remaining_query.len());
        for j in 0..cmp_len2 {
            match suffix[j].cmp(&remaining_query[j]) {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        match suffix.len().cmp(&remaining_query.len()) {
            Ordering::Equal => {}
            other => return Ok(other),
        }
        let (stored_snapshot, _) = varint::decode_u64(&buf[suffix_end..])?;
        Ok(stored_snapshot.cmp(&query.snapshot_id))
    }

    /// Largest index `i` with `entry[i].key <= query`, or `-1` if none.
    pub fn floor_index(&self, query: &Key) -> Result<i64> {
        let mut low: i64 = 0;
        let mut high: i64 = self.entry_count as i64 - 1;
        let mut result: i64 = -1;
        while low <= high {
            let mid = low + (high - low) / 2;
            match self.compare_stored(mid as usize, query)? {
                Ordering::Greater => high = mid - 1,
                Ordering::Less | Ordering::Equal => {
                    result = mid;
                    low = mid + 1;
                }
            }
        }
        Ok(result)
    }

    /// Smallest index `i` with `entry[i].key >= query`, or `entry_count()` if
    /// none.
    pub fn ceiling_index(&self, query: &Key) -> Result<usize> {
        let mut low: i64 = 0;
        let mut high: i64 = self.entry_count as i64 - 1;
        let mut result: i64 = self.entry_count as i64;
        while low <= high {
            let mid = low + (high - low) / 2;
            match self.compare_stored(mid as usize, query)? {
                Ordering::Less => low = mid + 1,
                Ordering::Greater | Ordering::Equal => {
                    result = mid;
                    high = mid - 1;
                }
            }
        }
        Ok(result as usize)
    }

    /// Iterates entries ascending, optionally starting at the lowest-snapshot
    /// version of the first key `>= from_key`.
    pub fn ascending_iter(&self, from_key: Option<&Key>) -> Result<SbmIter<'_>> {
        let start = match from_key {
            Some(k) => self.ceiling_index(&Key::new(k.bytes.clone(), 0))?,
            None => 0,
        };
        Ok(SbmIter {
            sbm: self,
            next: start as i64,
            descending: false,
        })
    }

    /// Iterates entries descending, optionally starting at the
    /// highest-snapshot version of the last key `<= from_key`.
    pub fn descending_iter(&self, from_key: Option<&Key>) -> Result<SbmIter<'_>> {
        let start = match from_key {
            Some(k) => self.floor_index(&Key::new(k.bytes.clone(), u64::MAX))?,
            None => self.entry_count as i64 - 1,
        };
        Ok(SbmIter {
            sbm: self,
            next: start,
            descending: true,
        })
    }

    /// Releases the block's backing memory region.
    pub fn release(&self) -> Result<()> {
        self.region.release()
    }

    /// Borrows the block's raw serialized bytes.
    pub fn region_bytes(&self) -> Result<&[u8]> {
        self.region.as_slice()
    }
}

/// A pull-based, non-restartable iterator over an [`Sbm`]'s entries.
pub struct SbmIter<'a> {
    sbm: &'a Sbm,
    next: i64,
    descending: bool,
}

impl<'a> Iterator for SbmIter<'a> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next < 0 || self.next as usize >= self.sbm.entry_count {
            return None;
        }
        let idx = self.next as usize;
        let item = self.sbm.get(idx);
        self.next += if self.descending { -1 } else { 1 };
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alloc() -> Allocator {
        Allocator::new(8)
    }

    fn entry(key: &str, snap: u64, value: &str) -> Entry {
        Entry::new(
            Key::new(key.as_bytes().to_vec(), snap),
            Value::new(value.as_bytes().to_vec()),
        )
    }

    #[test]
    fn single_entry_matches_spec_scenario_s1() {
        let mut b = SbmBuilder::new(alloc());
        b.add(entry("abc", 5, "X")).unwrap();
        let sbm = b.build().unwrap();
        let got = sbm.get(0).unwrap();
        assert_eq!(got.key.bytes, b"abc");
        assert_eq!(got.key.snapshot_id, 5);
        assert_eq!(got.value.as_bytes(), b"X");

        let query = Key::new(b"abd".to_vec(), 0);
        assert_eq!(sbm.floor_index(&query).unwrap(), 0);
        assert_eq!(sbm.ceiling_index(&query).unwrap(), 1);
    }

    #[test]
    fn prefix_compression_scenario_s2() {
        let mut b = SbmBuilder::new(alloc());
        b.add(entry("user/1", 1, "A")).unwrap();
        b.add(entry("user/2", 1, "B")).unwrap();
        b.add(entry("user/10", 1, "C")).unwrap();
        let sbm = b.build().unwrap();
        assert_eq!(sbm.prefix(), b"user/");
        let all: Vec<Entry> = sbm
            .ascending_iter(None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all[0].key.bytes, b"user/1");
        assert_eq!(all[1].key.bytes, b"user/2");
        assert_eq!(all[2].key.bytes, b"user/10");
        assert_eq!(sbm.get(2).unwrap().key.bytes, b"user/10");
    }

    #[test]
    fn snapshot_tie_break_scenario_s3() {
        let mut b = SbmBuilder::new(alloc());
        b.add(entry("k", 1, "v1")).unwrap();
        b.add(entry("k", 3, "v3")).unwrap();
        b.add(entry("k", 7, "v7")).unwrap();
        let sbm = b.build().unwrap();

        assert_eq!(sbm.floor_index(&Key::new(b"k".to_vec(), 5)).unwrap(), 1);
        assert_eq!(sbm.ceiling_index(&Key::new(b"k".to_vec(), 5)).unwrap(), 2);
        assert_eq!(sbm.floor_index(&Key::new(b"k".to_vec(), 7)).unwrap(), 2);
        assert_eq!(sbm.floor_index(&Key::new(b"k".to_vec(), 0)).unwrap(), -1);
    }

    #[test]
    fn rejects_out_of_order_add() {
        let mut b = SbmBuilder::new(alloc());
        b.add(entry("b", 0, "")).unwrap();
        assert!(matches!(
            b.add(entry("a", 0, "")),
            Err(FormatError::OrderingViolation)
        ));
    }

    #[test]
    fn rejects_duplicate_key_and_snapshot() {
        let mut b = SbmBuilder::new(alloc());
        b.add(entry("a", 1, "")).unwrap();
        assert!(matches!(
            b.add(entry("a", 1, "")),
            Err(FormatError::OrderingViolation)
        ));
    }

    #[test]
    fn get_out_of_bounds_fails() {
        let mut b = SbmBuilder::new(alloc());
        b.add(entry("a", 0, "")).unwrap();
        let sbm = b.build().unwrap();
        assert!(matches!(
            sbm.get(1),
            Err(FormatError::IndexOutOfBounds { index: 1, len: 1 })
        ));
    }

    #[test]
    fn prefix_compression_neutrality() {
        let entries = vec![entry("xa", 0, "1"), entry("xb", 0, "2"), entry("xc", 0, "3")];

        let mut with_prefix = SbmBuilder::new(alloc());
        for e in &entries {
            with_prefix.add(e.clone()).unwrap();
        }
        let sbm_prefixed = with_prefix.build().unwrap();

        // Force an empty prefix by using keys that share nothing.
        let mut without_prefix = SbmBuilder::new(alloc());
        without_prefix.add(entry("xa", 0, "1")).unwrap();
        without_prefix.add(entry("yb", 0, "2")).unwrap();
        without_prefix.add(entry("zc", 0, "3")).unwrap();
        let sbm_unprefixed = without_prefix.build().unwrap();

        assert_eq!(
            sbm_prefixed.get(0).unwrap().value,
            sbm_unprefixed.get(0).unwrap().value
        );
    }

    #[test]
    fn release_then_get_fails() {
        let mut b = SbmBuilder::new(alloc());
        b.add(entry("a", 0, "v")).unwrap();
        let sbm = b.build().unwrap();
        sbm.release().unwrap();
        assert!(matches!(sbm.get(0), Err(FormatError::UseAfterFree)));
    }

    fn linear_floor(entries: &[Key], q: &Key) -> i64 {
        let mut result: i64 = -1;
        for (i, k) in entries.iter().enumerate() {
            if k <= q {
                result = i as i64;
            }
        }
        result
    }

    fn linear_ceiling(entries: &[Key], q: &Key) -> usize {
        for (i, k) in entries.iter().enumerate() {
            if k >= q {
                return i;
            }
        }
        entries.len()
    }

    proptest! {
        #[test]
        fn floor_ceiling_matches_linear_scan(
            mut raw_keys in prop::collection::vec((prop::collection::vec(any::<u8>(), 0..6), any::<u64>()), 1..20),
            query_bytes in prop::collection::vec(any::<u8>(), 0..6),
            query_snap in any::<u64>(),
        ) {
            raw_keys.sort();
            raw_keys.dedup();
            prop_assume!(!raw_keys.is_empty());

            let keys: Vec<Key> = raw_keys
                .into_iter()
                .map(|(b, s)| Key::new(b, s))
                .collect();

            let mut builder = SbmBuilder::new(Allocator::new(8));
            for k in &keys {
                builder.add(Entry::new(k.clone(), Value::new(vec![]))).unwrap();
            }
            let sbm = builder.build().unwrap();

            let query = Key::new(query_bytes, query_snap);
            let expected_floor = linear_floor(&keys, &query);
            let expected_ceiling = linear_ceiling(&keys, &query);

            prop_assert_eq!(sbm.floor_index(&query).unwrap(), expected_floor);
            prop_assert_eq!(sbm.ceiling_index(&query).unwrap(), expected_ceiling);
        }
    }
}
