//! Slot value trait: the numeric types a table may hold.
//!
//! Values are element-wise addable with `Default` as the additive identity,
//! and carry a fixed-width little-endian encoding that pins the snapshot
//! byte layout.

use std::fmt;
use std::ops::AddAssign;

use crate::utils::ParasolError;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait bound for the per-table slot value type.
pub trait SlotVal:
    Copy
    + Default
    + AddAssign
    + PartialEq
    + fmt::Debug
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// Encoded width in bytes.
    const WIRE_SIZE: usize;

    /// Appends the little-endian encoding of `self` to `out`.
    fn write_le(&self, out: &mut Vec<u8>);

    /// Decodes from exactly `WIRE_SIZE` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Result<Self, ParasolError>;
}

// Helper macro for saving boiler-plate `impl SlotVal`s for the numeric
// types that have `to_le_bytes()`/`from_le_bytes()`.
macro_rules! impl_slot_val {
    ($vtype:ty) => {
        impl SlotVal for $vtype {
            const WIRE_SIZE: usize = std::mem::size_of::<$vtype>();

            fn write_le(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Result<Self, ParasolError> {
                let bytes: [u8; std::mem::size_of::<$vtype>()] =
                    bytes.try_into().map_err(|_| {
                        ParasolError(format!(
                            "value needs {} bytes, got {}",
                            std::mem::size_of::<$vtype>(),
                            bytes.len()
                        ))
                    })?;
                Ok(<$vtype>::from_le_bytes(bytes))
            }
        }
    };
}

impl_slot_val!(f32);
impl_slot_val!(f64);
impl_slot_val!(i32);
impl_slot_val!(i64);
