//! Vector utilities.
//!
//! Embedding vectors are persisted as little-endian `f32` blobs (cache
//! entries, the flat index file) and compared by squared Euclidean distance.

/// Encode a float vector as a blob (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes, producing a blob of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use summary_rag_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), Some(v));
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a blob back into a float vector.
///
/// Returns `None` when the length is not a multiple of 4, which is how a
/// truncated or foreign file shows up.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Squared Euclidean distance. Callers guarantee equal lengths.
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
