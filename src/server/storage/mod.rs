//! Pluggable partitioned storage shards behind model instances.

mod map;
mod value;
mod vector;

use std::path::Path;

use crate::server::Key;
use crate::utils::ParasolError;

use tokio::fs;

pub use map::MapStorage;
pub use value::SlotVal;
pub use vector::VectorStorage;

/// Storage shard owned by one model instance. Two backing variants; the
/// chunk size is an independent knob of either.
#[derive(Debug, Clone)]
pub enum Storage<V> {
    Map(MapStorage<V>),
    Vector(VectorStorage<V>),
}

impl<V: SlotVal> Storage<V> {
    /// Accumulates `vals[i]` into slot `keys[i]`.
    pub fn add(
        &mut self,
        keys: &[Key],
        vals: &[V],
    ) -> Result<(), ParasolError> {
        match self {
            Storage::Map(storage) => storage.add(keys, vals),
            Storage::Vector(storage) => storage.add(keys, vals),
        }
    }

    /// Accumulates whole chunks.
    pub fn add_chunk(
        &mut self,
        keys: &[Key],
        vals: &[V],
    ) -> Result<(), ParasolError> {
        match self {
            Storage::Map(storage) => storage.add_chunk(keys, vals),
            Storage::Vector(storage) => storage.add_chunk(keys, vals),
        }
    }

    /// Reads current slot values.
    pub fn get(&self, keys: &[Key]) -> Result<Vec<V>, ParasolError> {
        match self {
            Storage::Map(storage) => storage.get(keys),
            Storage::Vector(storage) => storage.get(keys),
        }
    }

    /// Reads whole chunks.
    pub fn get_chunk(&self, keys: &[Key]) -> Result<Vec<V>, ParasolError> {
        match self {
            Storage::Map(storage) => storage.get_chunk(keys),
            Storage::Vector(storage) => storage.get_chunk(keys),
        }
    }

    /// Hook called after a barrier fires; reserved for compaction.
    pub fn finish_iter(&mut self) {
        match self {
            Storage::Map(storage) => storage.finish_iter(),
            Storage::Vector(storage) => storage.finish_iter(),
        }
    }

    /// Resets all slots to the additive identity.
    pub fn clear(&mut self) {
        match self {
            Storage::Map(storage) => storage.clear(),
            Storage::Vector(storage) => storage.clear(),
        }
    }

    /// Encodes the snapshot byte image.
    pub fn encode(&self) -> Result<Vec<u8>, ParasolError> {
        match self {
            Storage::Map(storage) => Ok(storage.encode()),
            Storage::Vector(storage) => storage.encode(),
        }
    }

    /// Replaces contents from a snapshot byte image.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), ParasolError> {
        match self {
            Storage::Map(storage) => storage.decode(bytes),
            Storage::Vector(storage) => storage.decode(bytes),
        }
    }

    /// Dumps the snapshot image to a file. Partial files from an earlier
    /// failure are overwritten whole.
    pub async fn write_to(&self, path: &Path) -> Result<(), ParasolError> {
        let bytes = self.encode()?;
        fs::write(path, bytes).await?;
        Ok(())
    }

    /// Loads the snapshot image from a file.
    pub async fn load_from(&mut self, path: &Path) -> Result<(), ParasolError> {
        let bytes = fs::read(path).await?;
        self.decode(&bytes)
    }
}

/// Bounds-checked reader over snapshot bytes.
pub(crate) struct SnapCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SnapCursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        SnapCursor { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParasolError> {
        if self.pos + len > self.bytes.len() {
            return logged_err!(
                "snapshot truncated: need {} bytes at offset {}, file is {}",
                len,
                self.pos,
                self.bytes.len()
            );
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, ParasolError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(
            bytes.try_into().map_err(ParasolError::msg)?,
        ))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, ParasolError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(
            bytes.try_into().map_err(ParasolError::msg)?,
        ))
    }

    pub(crate) fn read_val<V: SlotVal>(&mut self) -> Result<V, ParasolError> {
        let bytes = self.take(V::WIRE_SIZE)?;
        V::read_le(bytes)
    }

    /// Errors if trailing bytes remain after decoding.
    pub(crate) fn expect_end(&self) -> Result<(), ParasolError> {
        if self.pos != self.bytes.len() {
            return logged_err!(
                "snapshot has {} trailing bytes",
                self.bytes.len() - self.pos
            );
        }
        Ok(())
    }
}
