//! Hashing functions using BLAKE3 (with SHA-256 alternative)

use ksync_core::{encode_row_into, Hash, HashAlgorithm, Row};
use sha2::{Digest, Sha256};

/// Compute BLAKE3 hash of data
pub fn blake3_hash(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash::from_bytes(*hash.as_bytes())
}

/// Compute SHA-256 hash of data
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash::from_bytes(bytes)
}

/// Hash data with the given algorithm
pub fn hash_with(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    match algorithm {
        HashAlgorithm::Blake3 => blake3_hash(data),
        HashAlgorithm::Sha256 => sha256_hash(data),
    }
}

/// Digest of a range containing no rows
pub fn empty_range_hash(algorithm: HashAlgorithm) -> Hash {
    hash_with(algorithm, &[])
}

enum Inner {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
}

/// Incremental hasher over a sequence of rows.
///
/// Feeding rows one at a time gives the same digest as hashing the
/// concatenation of their canonical encodings in one go.
pub struct RowHasher {
    inner: Inner,
    row_count: usize,
    scratch: Vec<u8>,
}

impl RowHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Blake3 => Inner::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Inner::Sha256(Sha256::new()),
        };
        Self {
            inner,
            row_count: 0,
            scratch: Vec::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Inner::Blake3(hasher) => {
                hasher.update(data);
            }
            Inner::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Add one row's canonical encoding
    pub fn add_row(&mut self, row: &Row) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        encode_row_into(row, &mut scratch);
        self.update(&scratch);
        self.scratch = scratch;
        self.row_count += 1;
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn finalize(self) -> Hash {
        match self.inner {
            Inner::Blake3(hasher) => Hash::from_bytes(*hasher.finalize().as_bytes()),
            Inner::Sha256(hasher) => {
                let result = hasher.finalize();
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&result);
                Hash::from_bytes(bytes)
            }
        }
    }
}

impl Default for RowHasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

/// Digest of a slice of rows, in the order given
pub fn hash_rows(algorithm: HashAlgorithm, rows: &[Row]) -> Hash {
    let mut hasher = RowHasher::new(algorithm);
    for row in rows {
        hasher.add_row(row);
    }
    hasher.finalize()
}
