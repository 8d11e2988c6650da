//! Flat, append-only vector index with exact k-nearest-neighbour search.
//!
//! Vectors are stored contiguously (`len × dims` floats); the row of a
//! vector is its identity and matches the position of the corresponding
//! document in the [`DocumentStore`](crate::store::DocumentStore).
//!
//! # On-disk format
//!
//! ```text
//! magic "SRVI" | version u32 | dims u32 | count u64 | count × dims × f32
//! ```
//!
//! All integers and floats are little-endian.

use crate::embedding::{blob_to_vec, squared_euclidean, vec_to_blob};
use crate::error::{KbError, Result};

const MAGIC: &[u8; 4] = b"SRVI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// One search result: the row that matched and its squared distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors in order. Every vector is checked before any is
    /// written, so a mismatch leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(KbError::Dimension {
                expected: self.dims,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Row `position`, if present.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dims;
        Some(&self.data[start..start + self.dims])
    }

    /// The `k` rows nearest to `query`, ascending by squared Euclidean
    /// distance (ties broken by position). Returns fewer than `k` hits when
    /// the index is smaller.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dims {
            return Err(KbError::Dimension {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(position, row)| SearchHit {
                position,
                distance: squared_euclidean(query, row),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Serialize to the flat on-disk format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&vec_to_blob(&self.data));
        bytes
    }

    /// Rebuild an index from [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(KbError::State("vector file has no valid header".into()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(KbError::State(format!(
                "unsupported vector file version {}",
                version
            )));
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = usize::try_from(u64::from_le_bytes(count_bytes))
            .map_err(|_| KbError::State("vector count does not fit in memory".into()))?;
        let expected = count.checked_mul(dims).ok_or_else(|| {
            KbError::State(format!(
                "vector file declares {} × {} floats, which overflows",
                count, dims
            ))
        })?;

        let data = blob_to_vec(&bytes[HEADER_LEN..])
            .ok_or_else(|| KbError::State("vector payload is not f32-aligned".into()))?;
        if dims == 0 && !data.is_empty() {
            return Err(KbError::State("vector file declares zero dimensions".into()));
        }
        if data.len() != expected {
            return Err(KbError::State(format!(
                "vector file declares {} × {} floats but holds {}",
                count,
                dims,
                data.len()
            )));
        }
        Ok(Self { dims, data })
    }
}
