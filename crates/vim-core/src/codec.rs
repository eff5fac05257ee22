//! Pure encode/decode functions for the binary keys used to scan base data
//! and persist index metadata. No state, no I/O.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{ManagerError, ManagerResult};

/// Encodes `(region_id, vector_id)` as 16 big-endian bytes. The
/// concatenation is lexicographically ordered by `(region_id, vector_id)`,
/// so a range scan with `lower = encode(r, 0)` and `upper = encode(r,
/// u64::MAX)` returns exactly region `r`'s vectors in `vector_id` order.
pub fn encode_vector_id(region_id: u64, vector_id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.write_u64::<BigEndian>(region_id).unwrap();
    buf.write_u64::<BigEndian>(vector_id).unwrap();
    buf
}

/// Recovers the trailing `vector_id`. Fails if `bytes` is not exactly 16
/// bytes long.
pub fn decode_vector_id(bytes: &[u8]) -> ManagerResult<u64> {
    if bytes.len() != 16 {
        return Err(ManagerError::Codec(format!(
            "expected 16-byte vector id key, got {} bytes",
            bytes.len()
        )));
    }
    let mut cursor = Cursor::new(&bytes[8..16]);
    cursor
        .read_u64::<BigEndian>()
        .map_err(|e| ManagerError::Codec(e.to_string()))
}

/// Lower/upper bounds (`[lower, upper)`) that isolate region `region_id`'s
/// vectors in the base-data key space.
pub fn vector_scan_bounds(region_id: u64) -> (Vec<u8>, Vec<u8>) {
    (
        encode_vector_id(region_id, 0),
        encode_vector_id(region_id, u64::MAX),
    )
}

/// 16 bytes: `snapshot_log_index` (8 big-endian) ‖ `apply_log_index` (8
/// big-endian). This is the exact value stored under `GenKey(region_id)` in
/// the metadata store.
pub fn encode_vector_index_log_index(snapshot_log_index: u64, apply_log_index: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.write_u64::<BigEndian>(snapshot_log_index).unwrap();
    buf.write_u64::<BigEndian>(apply_log_index).unwrap();
    buf
}

/// Decodes a metadata record value. Any length other than 16 is an error.
pub fn decode_vector_index_log_index(bytes: &[u8]) -> ManagerResult<(u64, u64)> {
    if bytes.len() != 16 {
        return Err(ManagerError::Codec(format!(
            "expected 16-byte log-index record, got {} bytes",
            bytes.len()
        )));
    }
    let mut cursor = Cursor::new(bytes);
    let snapshot_log_index = cursor
        .read_u64::<BigEndian>()
        .map_err(|e| ManagerError::Codec(e.to_string()))?;
    let apply_log_index = cursor
        .read_u64::<BigEndian>()
        .map_err(|e| ManagerError::Codec(e.to_string()))?;
    Ok((snapshot_log_index, apply_log_index))
}

/// Namespaced metadata-store key for a region's log-index record:
/// `"vector_index_log/"` prefix + big-endian `region_id`.
pub fn gen_log_index_key(region_id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(18 + 8);
    buf.extend_from_slice(b"vector_index_log/");
    buf.write_u64::<BigEndian>(region_id).unwrap();
    buf
}

/// Encodes a vector's float values as the base-storage record value: a
/// 4-byte big-endian length prefix followed by that many big-endian `f32`s.
pub fn encode_vector_value(values: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + values.len() * 4);
    buf.write_u32::<BigEndian>(values.len() as u32).unwrap();
    for v in values {
        buf.write_f32::<BigEndian>(*v).unwrap();
    }
    buf
}

/// Decodes a value produced by `encode_vector_value`. Returns a codec error
/// on truncated input or a length prefix that doesn't match the remaining
/// bytes, so a corrupt base-storage record is skipped rather than panicking
/// the caller.
pub fn decode_vector_value(bytes: &[u8]) -> ManagerResult<Vec<f32>> {
    if bytes.len() < 4 {
        return Err(ManagerError::Codec(format!(
            "vector value record too short: {} bytes",
            bytes.len()
        )));
    }
    let mut cursor = Cursor::new(bytes);
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| ManagerError::Codec(e.to_string()))? as usize;
    if bytes.len() != 4 + len * 4 {
        return Err(ManagerError::Codec(format!(
            "vector value record declares {len} floats but has {} bytes",
            bytes.len()
        )));
    }
    if len == 0 {
        return Err(ManagerError::Codec("vector value record is empty".to_string()));
    }
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(
            cursor
                .read_f32::<BigEndian>()
                .map_err(|e| ManagerError::Codec(e.to_string()))?,
        );
    }
    Ok(values)
}
