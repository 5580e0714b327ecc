//! Sparse storage shard backed by a hash map with insert-on-miss zeros.

use std::collections::HashMap;

use crate::server::storage::{SlotVal, SnapCursor};
use crate::server::Key;
use crate::utils::ParasolError;

/// Map-backed storage, suited to sparse key spaces. Slots default to the
/// additive identity until first touched.
///
/// The slot space is scalar: chunk key `k` with chunk size `C` owns scalar
/// slots `k*C .. k*C + C`, so scalar and chunked ops address the same
/// underlying slots.
#[derive(Debug, Clone)]
pub struct MapStorage<V> {
    slots: HashMap<Key, V>,
    chunk_size: u32,
}

impl<V: SlotVal> MapStorage<V> {
    /// Creates an empty shard; `chunk_size` is validated by the table layer.
    pub fn new(chunk_size: u32) -> Self {
        MapStorage {
            slots: HashMap::new(),
            chunk_size,
        }
    }

    #[inline]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of slots touched so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
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
            *self.slots.entry(*key).or_default() += *val;
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
            for j in 0..chunk {
                let slot = key * chunk as Key + j as Key;
                *self.slots.entry(slot).or_default() += vals[i * chunk + j];
            }
        }
        Ok(())
    }

    /// Reads current slot values, zero where untouched.
    pub fn get(&self, keys: &[Key]) -> Result<Vec<V>, ParasolError> {
        Ok(keys
            .iter()
            .map(|key| self.slots.get(key).copied().unwrap_or_default())
            .collect())
    }

    /// Reads whole chunks; the reply is `keys.len() * chunk_size` long.
    pub fn get_chunk(&self, keys: &[Key]) -> Result<Vec<V>, ParasolError> {
        let chunk = self.chunk_size as usize;
        let mut vals = Vec::with_capacity(keys.len() * chunk);
        for key in keys {
            for j in 0..chunk {
                let slot = key * chunk as Key + j as Key;
                vals.push(self.slots.get(&slot).copied().unwrap_or_default());
            }
        }
        Ok(vals)
    }

    /// Post-barrier hook; nothing to compact for the map backend.
    pub fn finish_iter(&mut self) {}

    /// Resets all slots to the additive identity.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Exports all touched slots sorted by key.
    pub fn keys_vals(&self) -> (Vec<Key>, Vec<V>) {
        let mut pairs: Vec<(Key, V)> =
            self.slots.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.sort_unstable_by_key(|(k, _)| *k);
        pairs.into_iter().unzip()
    }

    /// Snapshot layout: `u32 chunk_size`, `u64 count`, then `count` records
    /// of `(u64 key, V value)`, keys ascending. All little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let (keys, vals) = self.keys_vals();
        let mut out = Vec::with_capacity(
            4 + 8 + keys.len() * (8 + V::WIRE_SIZE),
        );
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        out.extend_from_slice(&(keys.len() as u64).to_le_bytes());
        for (key, val) in keys.iter().zip(vals.iter()) {
            out.extend_from_slice(&key.to_le_bytes());
            val.write_le(&mut out);
        }
        out
    }

    /// Replaces this shard's contents from snapshot bytes.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), ParasolError> {
        let mut cursor = SnapCursor::new(bytes);
        let chunk_size = cursor.read_u32()?;
        let count = cursor.read_u64()?;

        let mut slots = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = cursor.read_u64()?;
            let val = cursor.read_val::<V>()?;
            slots.insert(key, val);
        }
        cursor.expect_end()?;

        self.chunk_size = chunk_size;
        self.slots = slots;
        Ok(())
    }
}

#[cfg(test)]
mod map_tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn add_get_defaults() -> Result<(), ParasolError> {
        let mut storage: MapStorage<f32> = MapStorage::new(1);
        storage.add(&[0, 1], &[1.0, 2.0])?;
        storage.add(&[1, 2], &[3.0, 4.0])?;
        assert_eq!(storage.get(&[0, 1, 2, 99])?, vec![1.0, 5.0, 4.0, 0.0]);
        Ok(())
    }

    #[test]
    fn add_length_mismatch() {
        let mut storage: MapStorage<f32> = MapStorage::new(1);
        assert!(storage.add(&[0, 1], &[1.0]).is_err());
    }

    #[test]
    fn chunked_add_get() -> Result<(), ParasolError> {
        // chunk_size=3, key=[5], vals=[1,2,3]; then key=[5], vals=[10,20,30]
        let mut storage: MapStorage<f32> = MapStorage::new(3);
        storage.add_chunk(&[5], &[1.0, 2.0, 3.0])?;
        storage.add_chunk(&[5], &[10.0, 20.0, 30.0])?;
        assert_eq!(storage.get_chunk(&[5])?, vec![11.0, 22.0, 33.0]);
        // chunk key 5 owns scalar slots 15..18
        assert_eq!(storage.get(&[15, 16, 17])?, vec![11.0, 22.0, 33.0]);
        Ok(())
    }

    #[test]
    fn chunked_length_mismatch() {
        let mut storage: MapStorage<f32> = MapStorage::new(3);
        assert!(storage.add_chunk(&[5], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn chunk_size_one_matches_scalar() -> Result<(), ParasolError> {
        let mut chunked: MapStorage<i64> = MapStorage::new(1);
        let mut scalar: MapStorage<i64> = MapStorage::new(1);
        chunked.add_chunk(&[3, 4], &[7, 8])?;
        scalar.add(&[3, 4], &[7, 8])?;
        assert_eq!(chunked.get(&[3, 4])?, scalar.get(&[3, 4])?);
        assert_eq!(chunked.get_chunk(&[3, 4])?, scalar.get(&[3, 4])?);
        Ok(())
    }

    #[test]
    fn clear_resets_to_identity() -> Result<(), ParasolError> {
        let mut storage: MapStorage<f32> = MapStorage::new(1);
        storage.add(&[7], &[7.0])?;
        storage.clear();
        assert_eq!(storage.get(&[7])?, vec![0.0]);
        assert!(storage.is_empty());
        Ok(())
    }

    #[test]
    fn aggregation_order_insensitive() -> Result<(), ParasolError> {
        let mut forward: MapStorage<i64> = MapStorage::new(1);
        let mut backward: MapStorage<i64> = MapStorage::new(1);
        let mut rng = rand::thread_rng();
        let adds: Vec<(Key, i64)> = (0..100)
            .map(|_| (rng.gen_range(0..10), rng.gen_range(-50..50)))
            .collect();
        for (key, val) in adds.iter() {
            forward.add(&[*key], &[*val])?;
        }
        for (key, val) in adds.iter().rev() {
            backward.add(&[*key], &[*val])?;
        }
        let keys: Vec<Key> = (0..10).collect();
        assert_eq!(forward.get(&keys)?, backward.get(&keys)?);
        Ok(())
    }

    #[test]
    fn snapshot_roundtrip() -> Result<(), ParasolError> {
        let mut storage: MapStorage<f32> = MapStorage::new(2);
        storage.add_chunk(&[1, 3], &[1.0, 2.0, 3.0, 4.0])?;
        let bytes = storage.encode();

        let mut loaded: MapStorage<f32> = MapStorage::new(1);
        loaded.decode(&bytes)?;
        assert_eq!(loaded.chunk_size(), 2);
        assert_eq!(loaded.get_chunk(&[1, 3])?, storage.get_chunk(&[1, 3])?);
        // re-dump reproduces the bytes exactly
        assert_eq!(loaded.encode(), bytes);
        Ok(())
    }

    #[test]
    fn snapshot_layout() -> Result<(), ParasolError> {
        let mut storage: MapStorage<i32> = MapStorage::new(1);
        storage.add(&[258], &[7])?;
        let bytes = storage.encode();
        // u32 chunk_size, u64 count, then (u64 key, i32 val)
        assert_eq!(bytes.len(), 4 + 8 + 8 + 4);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..12], &1u64.to_le_bytes());
        assert_eq!(&bytes[12..20], &258u64.to_le_bytes());
        assert_eq!(&bytes[20..24], &7i32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn snapshot_truncated() {
        let mut storage: MapStorage<f32> = MapStorage::new(1);
        storage.add(&[0], &[1.0]).unwrap();
        let bytes = storage.encode();
        let mut loaded: MapStorage<f32> = MapStorage::new(1);
        assert!(loaded.decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(loaded.decode(&[0u8; 2]).is_err());
    }
}
