//! Vector codec
//!
//! Converts float32 vectors to the packed byte layout used by the store and
//! the engine's bulk transfer format, and back. Bytes are native-endian
//! float32 values, `4 * dimension` bytes per vector. Conversions go through
//! `bytemuck` so no per-element allocation happens; batch helpers append into
//! a caller-owned buffer.

use crate::error::{VectorDbError, VectorDbResult};
use crate::models::{VectorId, VectorRecord};

/// Width of one encoded component
pub const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Number of bytes an encoded vector of `dimension` occupies
pub fn byte_len(dimension: usize) -> usize {
    dimension * FLOAT_SIZE
}

pub fn encode(vector: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice::<f32, u8>(vector).to_vec()
}

pub fn encode_into(vector: &[f32], out: &mut Vec<u8>) {
    out.extend_from_slice(bytemuck::cast_slice::<f32, u8>(vector));
}

pub fn decode(bytes: &[u8]) -> VectorDbResult<Vec<f32>> {
    let mut out = Vec::with_capacity(bytes.len() / FLOAT_SIZE);
    decode_into(bytes, &mut out)?;
    Ok(out)
}

/// Append the floats encoded in `bytes` to `out`
pub fn decode_into(bytes: &[u8], out: &mut Vec<f32>) -> VectorDbResult<()> {
    if bytes.len() % FLOAT_SIZE != 0 {
        return Err(VectorDbError::Codec(format!(
            "buffer of {} bytes is not a whole number of float32 values",
            bytes.len()
        )));
    }

    // Buffers coming back from a driver are not guaranteed to be 4-byte aligned
    match bytemuck::try_cast_slice::<u8, f32>(bytes) {
        Ok(floats) => out.extend_from_slice(floats),
        Err(_) => out.extend(
            bytes
                .chunks_exact(FLOAT_SIZE)
                .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        ),
    }
    Ok(())
}

/// A page of vectors decoded into one row-major buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorPage {
    pub ids: Vec<VectorId>,
    pub data: Vec<f32>,
    pub dimension: usize,
}

impl VectorPage {
    /// Decode store records, requiring every row to have `dimension` values
    pub fn from_records(records: &[VectorRecord], dimension: usize) -> VectorDbResult<Self> {
        let expected = byte_len(dimension);
        let mut ids = Vec::with_capacity(records.len());
        let mut data = Vec::with_capacity(records.len() * dimension);

        for record in records {
            if record.data.len() != expected {
                return Err(VectorDbError::DimensionMismatch {
                    expected: dimension,
                    actual: record.data.len() / FLOAT_SIZE,
                });
            }
            decode_into(&record.data, &mut data)?;
            ids.push(record.id);
        }

        Ok(Self {
            ids,
            data,
            dimension,
        })
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
