//! Dense storage shard backed by a contiguous vector over the owned range.

use crate::server::storage::{SlotVal, SnapCursor};
use crate::server::{Key, KeyRange};
use crate::utils::ParasolError;

/// Vector-backed storage indexed by `key - range.begin()`. Every addressed
/// slot must lie inside the owned range; a miss is a programming error on
/// the caller's side.
#[derive(Debug, Clone)]
pub struct VectorStorage<V> {
    range: KeyRange,
    slots: Vec<V>,
    chunk_size: u32,
}

impl<V: SlotVal> VectorStorage<V> {
    /// Creates a zeroed shard in charge of `[range.begin(), range.end())`.
    pub fn new(range: KeyRange, chunk_size: u32) -> Self {
        VectorStorage {
            range,
            slots: vec![V::default(); range.len() as usize],
            chunk_size,
        }
    }

    #[inline]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    #[inline]
    pub fn range(&self) -> KeyRange {
        self.range
    }

    /// Number of slots owned.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maps a scalar slot key to its vector index.
    fn slot_index(&self, slot: Key) -> Result<usize, ParasolError> {
        if !self.range.contains(slot) {
            return logged_err!(
                "slot {} out of owned range [{}, {})",
                slot,
                self.range.begin(),
                self.range.end()
            );
        }
        Ok((slot - self.range.begin()) as usize)
    }

    /// Maps a chunk key to the vector index of its first slot, checking
    /// that the whole chunk span is owned.
    fn chunk_index(&self, key: Key) -> Result<usize, ParasolError> {
        let chunk = self.chunk_size as Key;
        let first = key * chunk;
        if first < self.range.begin() || first + chunk > self.range.end() {
            return logged_err!(
                "chunk key {} spans [{}, {}) outside owned range [{}, {})",
                key,
                first,
                first + chunk,
                self.range.begin(),
                self.range.end()
            );
        }
        Ok((first - self.range.begin()) as usize)
    }

    /// Accumulates `vals[i]` into slot `keys[i]`.
    pub fn add(
        &mut self,
        keys: &[Key],
        vals: &[V],
    ) -> Result<(), ParasolError> {
        if keys.len() != vals.len() {
            return logged_err!(
                "add keys/vals length mismatch: {} vs {}",
                keys.len(),
                vals.len()
            );
        }
        for (key, val) in keys.iter().zip(vals.iter()) {
            let index = self.slot_index(*key)?;
            self.slots[index] += *val;
        }
        Ok(())
    }

    /// Accumulates chunk `i` of `vals` into the slots owned by `keys[i]`.
    pub fn add_chunk(
        &mut self,
        keys: &[Key],
        vals: &[V],
    ) -> Result<(), ParasolError> {
        let chunk = self.chunk_size as usize;
        if vals.len() != keys.len() * chunk {
            return logged_err!(
                "add_chunk expected {} vals for {} keys, got {}",
                keys.len() * chunk,
                keys.len(),
                vals.len()
            );
        }
        for (i, key) in keys.iter().enumerate() {
            let index = self.chunk_index(*key)?;
            for j in 0..chunk {
                self.slots[index + j] += vals[i * chunk + j];
            }
        }
        Ok(())
    }

    /// Reads current slot values.
    pub fn get(&self, keys: &[Key]) -> Result<Vec<V>, ParasolError> {
        let mut vals = Vec::with_capacity(keys.len());
        for key in keys {
            vals.push(self.slots[self.slot_index(*key)?]);
        }
        Ok(vals)
    }

    /// Reads whole chunks; the reply is `keys.len() * chunk_size` long.
    pub fn get_chunk(&self, keys: &[Key]) -> Result<Vec<V>, ParasolError> {
        let chunk = self.chunk_size as usize;
        let mut vals = Vec::with_capacity(keys.len() * chunk);
        for key in keys {
            let index = self.chunk_index(*key)?;
            vals.extend_from_slice(&self.slots[index..index + chunk]);
        }
        Ok(vals)
    }

    /// Post-barrier hook; nothing to compact for the vector backend.
    pub fn finish_iter(&mut self) {}

    /// Resets all slots to the additive identity.
    pub fn clear(&mut self) {
        self.slots.fill(V::default());
    }

    /// Snapshot layout: `u32 chunk_size`, `u32 range_begin`, `u32 range_end`,
    /// `u64 count`, then `count` values. All little-endian.
    pub fn encode(&self) -> Result<Vec<u8>, ParasolError> {
        if self.range.end() > u32::MAX as Key {
            return logged_err!(
                "range end {} does not fit snapshot header",
                self.range.end()
            );
        }
        let mut out =
            Vec::with_capacity(4 + 4 + 4 + 8 + self.slots.len() * V::WIRE_SIZE);
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        out.extend_from_slice(&(self.range.begin() as u32).to_le_bytes());
        out.extend_from_slice(&(self.range.end() as u32).to_le_bytes());
        out.extend_from_slice(&(self.slots.len() as u64).to_le_bytes());
        for val in &self.slots {
            val.write_le(&mut out);
        }
        Ok(out)
    }

    /// Replaces this shard's contents (owned range included) from snapshot
    /// bytes.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), ParasolError> {
        let mut cursor = SnapCursor::new(bytes);
        let chunk_size = cursor.read_u32()?;
        let range_begin = cursor.read_u32()? as Key;
        let range_end = cursor.read_u32()? as Key;
        let count = cursor.read_u64()?;

        let range = KeyRange::new(range_begin, range_end)?;
        if count != range.len() {
            return logged_err!(
                "snapshot count {} does not match range [{}, {})",
                count,
                range_begin,
                range_end
            );
        }
        let mut slots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            slots.push(cursor.read_val::<V>()?);
        }
        cursor.expect_end()?;

        self.chunk_size = chunk_size;
        self.range = range;
        self.slots = slots;
        Ok(())
    }
}

#[cfg(test)]
mod vector_tests {
    use super::*;

    fn new_storage(
        begin: Key,
        end: Key,
        chunk_size: u32,
    ) -> Result<VectorStorage<f32>, ParasolError> {
        Ok(VectorStorage::new(KeyRange::new(begin, end)?, chunk_size))
    }

    #[test]
    fn add_get_in_range() -> Result<(), ParasolError> {
        let mut storage = new_storage(100, 104, 1)?;
        storage.add(&[100, 103], &[1.0, 2.0])?;
        storage.add(&[100], &[0.5])?;
        assert_eq!(
            storage.get(&[100, 101, 102, 103])?,
            vec![1.5, 0.0, 0.0, 2.0]
        );
        Ok(())
    }

    #[test]
    fn out_of_range_is_error() -> Result<(), ParasolError> {
        let mut storage = new_storage(100, 104, 1)?;
        assert!(storage.add(&[99], &[1.0]).is_err());
        assert!(storage.add(&[104], &[1.0]).is_err());
        assert!(storage.get(&[104]).is_err());
        Ok(())
    }

    #[test]
    fn chunked_add_get() -> Result<(), ParasolError> {
        // chunk key 51 owns scalar slots 102..104
        let mut storage = new_storage(100, 104, 2)?;
        storage.add_chunk(&[51], &[1.0, 2.0])?;
        storage.add_chunk(&[51], &[10.0, 20.0])?;
        assert_eq!(storage.get_chunk(&[51])?, vec![11.0, 22.0]);
        assert_eq!(storage.get(&[102, 103])?, vec![11.0, 22.0]);
        Ok(())
    }

    #[test]
    fn chunk_span_must_be_owned() -> Result<(), ParasolError> {
        let mut storage = new_storage(100, 103, 2)?;
        // chunk key 51 would span [102, 104) but the range ends at 103
        assert!(storage.add_chunk(&[51], &[1.0, 2.0]).is_err());
        assert!(storage.get_chunk(&[51]).is_err());
        Ok(())
    }

    #[test]
    fn clear_resets_to_identity() -> Result<(), ParasolError> {
        let mut storage = new_storage(0, 4, 1)?;
        storage.add(&[1, 2], &[1.0, 2.0])?;
        storage.clear();
        assert_eq!(storage.get(&[1, 2])?, vec![0.0, 0.0]);
        assert_eq!(storage.len(), 4);
        Ok(())
    }

    #[test]
    fn snapshot_roundtrip() -> Result<(), ParasolError> {
        // values [a, b, c, d] over range [100, 104)
        let mut storage = new_storage(100, 104, 1)?;
        storage.add(&[100, 101, 102, 103], &[1.0, 2.5, -3.0, 4.25])?;
        let bytes = storage.encode()?;

        let mut loaded = new_storage(100, 104, 1)?;
        loaded.decode(&bytes)?;
        assert_eq!(
            loaded.get(&[100, 101, 102, 103])?,
            vec![1.0, 2.5, -3.0, 4.25]
        );
        // re-dump reproduces the file bytes exactly
        assert_eq!(loaded.encode()?, bytes);
        Ok(())
    }

    #[test]
    fn snapshot_layout() -> Result<(), ParasolError> {
        let mut storage: VectorStorage<i32> =
            VectorStorage::new(KeyRange::new(2, 4)?, 1);
        storage.add(&[2, 3], &[7, 8])?;
        let bytes = storage.encode()?;
        // u32 chunk_size, u32 begin, u32 end, u64 count, then values
        assert_eq!(bytes.len(), 4 + 4 + 4 + 8 + 2 * 4);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &4u32.to_le_bytes());
        assert_eq!(&bytes[12..20], &2u64.to_le_bytes());
        assert_eq!(&bytes[20..24], &7i32.to_le_bytes());
        assert_eq!(&bytes[24..28], &8i32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn snapshot_count_mismatch() -> Result<(), ParasolError> {
        let storage = new_storage(100, 104, 1)?;
        let mut bytes = storage.encode()?;
        // corrupt the count field
        bytes[12..20].copy_from_slice(&7u64.to_le_bytes());
        let mut loaded = new_storage(100, 104, 1)?;
        assert!(loaded.decode(&bytes).is_err());
        Ok(())
    }

    #[test]
    fn snapshot_truncated() -> Result<(), ParasolError> {
        let storage = new_storage(100, 104, 1)?;
        let bytes = storage.encode()?;
        let mut loaded = new_storage(100, 104, 1)?;
        assert!(loaded.decode(&bytes[..bytes.len() - 2]).is_err());
        Ok(())
    }
}
