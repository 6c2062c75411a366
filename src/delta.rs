//! Binary delta codec
//!
//! rsync-style block matching used by modified-only backups. A [`Signature`]
//! summarises a basis file as a list of per-block checksums; [`build_delta`]
//! scans new content with a rolling checksum and emits copy-from-basis and
//! literal operations; [`apply_delta`] replays those operations against a
//! basis to reconstruct the new content.
//!
//! ## Trust boundary
//!
//! [`apply_delta`] does not check that the basis it is given is the basis the
//! delta was built against. A drifted basis silently produces output equal to
//! replaying the operations over the bytes that are actually there. Callers
//! that want the check use [`apply_delta_verified`], which compares the basis
//! hash first and fails with [`ChronoError::HashMismatch`].
//!
//! ## Example
//!
//! ```rust
//! use chronovault::delta::{apply_delta, build_delta, build_signature};
//!
//! let basis = b"the quick brown fox jumps over the lazy dog".repeat(100);
//! let mut content = basis.clone();
//! content.extend_from_slice(b" and keeps running");
//!
//! let signature = build_signature(&basis);
//! let delta = build_delta(&content, &signature);
//! assert!(delta.literal_bytes() < content.len() as u64);
//!
//! let rebuilt = apply_delta(&basis, &delta).unwrap();
//! assert_eq!(rebuilt, content);
//! ```

use crate::collections::{HashMap, HashMapExt};
use crate::error::{ChronoError, Result};
use crate::rolling::RollingChecksum;
use crate::utils;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

/// Smallest block length; files up to `MIN_BLOCK_LEN²` bytes use it as-is
pub const MIN_BLOCK_LEN: usize = 700;
/// Largest block length regardless of file size
pub const MAX_BLOCK_LEN: usize = 128 * 1024;
/// Bytes of SHA-256 kept per block as the strong checksum
pub const STRONG_SUM_LEN: usize = 16;

/// Pick the block length for a basis of `file_len` bytes
///
/// Square-root heuristic: the block length grows with the square root of the
/// file size, rounded down to a multiple of 8 and clamped to
/// `[MIN_BLOCK_LEN, MAX_BLOCK_LEN]`.
pub fn block_length_for(file_len: u64) -> usize {
    let min_sq = (MIN_BLOCK_LEN * MIN_BLOCK_LEN) as u64;
    if file_len <= min_sq {
        return MIN_BLOCK_LEN;
    }
    let root = (file_len as f64).sqrt() as usize;
    (root & !7).clamp(MIN_BLOCK_LEN, MAX_BLOCK_LEN)
}

/// Checksums for one block of the basis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Rolling weak checksum
    pub weak: u32,
    /// Truncated SHA-256 of the block
    pub strong: [u8; STRONG_SUM_LEN],
}

/// Compact description of a basis file
///
/// Enough to compute a delta against the basis without the basis bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Block length used when the signature was built
    pub block_len: u32,
    /// Length of the basis in bytes
    pub file_len: u64,
    /// SHA-256 of the whole basis, hex encoded
    pub file_hash: String,
    /// Per-block checksums in basis order
    pub blocks: Vec<BlockSignature>,
}

impl Signature {
    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Byte range `(offset, len)` of block `index` in the basis
    pub fn block_range(&self, index: usize) -> (u64, u64) {
        let block_len = u64::from(self.block_len);
        let offset = index as u64 * block_len;
        let len = block_len.min(self.file_len.saturating_sub(offset));
        (offset, len)
    }

    /// Length of the final block when it is shorter than `block_len`
    fn short_tail_len(&self) -> Option<usize> {
        let rem = self.file_len.checked_rem(u64::from(self.block_len))? as usize;
        (rem > 0).then_some(rem)
    }
}

/// One reconstruction step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Copy `len` bytes from the basis starting at `offset`
    Copy {
        /// Byte offset into the basis
        offset: u64,
        /// Number of bytes
        len: u64,
    },
    /// Emit these bytes verbatim
    Literal(Vec<u8>),
}

/// Patch that turns a basis into new content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Length of the basis the delta was built against
    pub basis_len: u64,
    /// SHA-256 of that basis, hex encoded
    pub basis_hash: String,
    /// Length of the reconstructed content
    pub target_len: u64,
    /// Operations in output order
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    /// Bytes carried verbatim inside the delta
    pub fn literal_bytes(&self) -> u64 {
        self.ops
            .iter()
            .map(|op| match op {
                DeltaOp::Literal(bytes) => bytes.len() as u64,
                DeltaOp::Copy { .. } => 0,
            })
            .sum()
    }

    /// Bytes taken from the basis
    pub fn copy_bytes(&self) -> u64 {
        self.target_len.saturating_sub(self.literal_bytes())
    }

    /// Whether the delta can be applied without any basis at all
    pub fn is_literal_only(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, DeltaOp::Literal(_)))
    }
}

/// Build the signature of `content`
pub fn build_signature(content: &[u8]) -> Signature {
    let block_len = block_length_for(content.len() as u64);
    let blocks = content
        .chunks(block_len)
        .map(|block| BlockSignature {
            weak: RollingChecksum::of(block).digest(),
            strong: strong_sum(block),
        })
        .collect::<Vec<_>>();

    trace!(
        "Built signature: {} bytes, {} blocks of {}",
        content.len(),
        blocks.len(),
        block_len
    );

    Signature {
        block_len: block_len as u32,
        file_len: content.len() as u64,
        file_hash: utils::hash_data(content),
        blocks,
    }
}

/// Build a delta reproducing `content` from a basis described by `signature`
pub fn build_delta(content: &[u8], signature: &Signature) -> Delta {
    let block_len = signature.block_len as usize;
    let index = BlockIndex::new(signature);
    let mut ops = OpsBuilder::default();

    let mut pos = 0usize;
    let mut literal_start = 0usize;

    if block_len > 0 && !index.is_empty() && content.len() >= block_len {
        let mut rolling = RollingChecksum::of(&content[..block_len]);
        loop {
            let window = &content[pos..pos + block_len];
            if let Some(block) = index.find(rolling.digest(), window) {
                ops.literal(&content[literal_start..pos]);
                let (offset, len) = signature.block_range(block);
                ops.copy(offset, len);

                pos += block_len;
                literal_start = pos;
                if pos + block_len > content.len() {
                    break;
                }
                rolling = RollingChecksum::of(&content[pos..pos + block_len]);
                continue;
            }

            if pos + block_len >= content.len() {
                break;
            }
            rolling.roll(content[pos], content[pos + block_len]);
            pos += 1;
        }
    }

    // A short final basis block can still match the tail of the content
    let mut tail_end = content.len();
    let tail = signature.short_tail_len().zip(signature.blocks.len().checked_sub(1));
    if let Some((short_len, last)) = tail {
        if content.len() >= literal_start + short_len {
            let start = content.len() - short_len;
            let block = &signature.blocks[last];
            let candidate = &content[start..];
            if RollingChecksum::of(candidate).digest() == block.weak
                && strong_sum(candidate) == block.strong
            {
                ops.literal(&content[literal_start..start]);
                let (offset, len) = signature.block_range(last);
                ops.copy(offset, len);
                tail_end = start;
                literal_start = content.len();
            }
        }
    }
    if literal_start < tail_end {
        ops.literal(&content[literal_start..tail_end]);
    }

    let delta = Delta {
        basis_len: signature.file_len,
        basis_hash: signature.file_hash.clone(),
        target_len: content.len() as u64,
        ops: ops.finish(),
    };
    trace!(
        "Built delta: {} ops, {} literal bytes, {} copied bytes",
        delta.ops.len(),
        delta.literal_bytes(),
        delta.copy_bytes()
    );
    delta
}

/// Apply `delta` to `basis`
///
/// Deterministic and unverified: the basis hash is not checked. A copy that
/// reaches past the end of the basis fails with
/// [`ChronoError::DeltaOutOfRange`].
pub fn apply_delta(basis: &[u8], delta: &Delta) -> Result<Vec<u8>> {
    let hint = delta.target_len.min(basis.len() as u64 + delta.literal_bytes());
    let mut output = Vec::with_capacity(hint as usize);
    for op in &delta.ops {
        match op {
            DeltaOp::Literal(bytes) => output.extend_from_slice(bytes),
            DeltaOp::Copy { offset, len } => {
                let end = offset.checked_add(*len).filter(|end| *end <= basis.len() as u64);
                let Some(end) = end else {
                    return Err(ChronoError::DeltaOutOfRange {
                        offset: *offset,
                        len: *len,
                        basis_len: basis.len() as u64,
                    });
                };
                output.extend_from_slice(&basis[*offset as usize..end as usize]);
            }
        }
    }
    Ok(output)
}

/// Apply `delta` after checking that `basis` is the basis it was built against
pub fn apply_delta_verified(basis: &[u8], delta: &Delta) -> Result<Vec<u8>> {
    let actual = utils::hash_data(basis);
    if actual != delta.basis_hash {
        return Err(ChronoError::HashMismatch {
            expected: delta.basis_hash.clone(),
            actual,
        });
    }
    apply_delta(basis, delta)
}

fn strong_sum(block: &[u8]) -> [u8; STRONG_SUM_LEN] {
    let digest = Sha256::digest(block);
    let mut strong = [0u8; STRONG_SUM_LEN];
    strong.copy_from_slice(&digest[..STRONG_SUM_LEN]);
    strong
}

/// Weak-checksum lookup table over the full-size blocks of a signature
struct BlockIndex<'a> {
    signature: &'a Signature,
    by_weak: HashMap<u32, Vec<usize>>,
}

impl<'a> BlockIndex<'a> {
    fn new(signature: &'a Signature) -> Self {
        let block_len = u64::from(signature.block_len);
        let mut by_weak: HashMap<u32, Vec<usize>> = HashMap::with_capacity(signature.blocks.len());
        for (i, block) in signature.blocks.iter().enumerate() {
            if signature.block_range(i).1 == block_len {
                by_weak.entry(block.weak).or_default().push(i);
            }
        }
        Self { signature, by_weak }
    }

    fn is_empty(&self) -> bool {
        self.by_weak.is_empty()
    }

    fn find(&self, weak: u32, window: &[u8]) -> Option<usize> {
        let candidates = self.by_weak.get(&weak)?;
        let strong = strong_sum(window);
        candidates
            .iter()
            .copied()
            .find(|&i| self.signature.blocks[i].strong == strong)
    }
}

/// Accumulates ops, merging adjacent literals and contiguous copies
#[derive(Default)]
struct OpsBuilder {
    ops: Vec<DeltaOp>,
}

impl OpsBuilder {
    fn literal(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(DeltaOp::Literal(existing)) = self.ops.last_mut() {
            existing.extend_from_slice(bytes);
        } else {
            self.ops.push(DeltaOp::Literal(bytes.to_vec()));
        }
    }

    fn copy(&mut self, offset: u64, len: u64) {
        if let Some(DeltaOp::Copy { offset: prev, len: prev_len }) = self.ops.last_mut() {
            if *prev + *prev_len == offset {
                *prev_len += len;
                return;
            }
        }
        self.ops.push(DeltaOp::Copy { offset, len });
    }

    fn finish(self) -> Vec<DeltaOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.random::<u8>()).collect()
    }

    #[test]
    fn test_block_length_for() {
        assert_eq!(block_length_for(0), MIN_BLOCK_LEN);
        assert_eq!(block_length_for(490_000), MIN_BLOCK_LEN);
        assert_eq!(block_length_for(10 * 1024 * 1024), 3232);
        assert_eq!(block_length_for(u64::MAX / 2), MAX_BLOCK_LEN);
        assert_eq!(block_length_for(4_000_000) % 8, 0);
    }

    #[test]
    fn test_identical_content_is_all_copy() {
        let basis = random_bytes(1, 50_000);
        let delta = build_delta(&basis, &build_signature(&basis));

        assert_eq!(delta.literal_bytes(), 0);
        assert_eq!(delta.ops.len(), 1);
        assert_eq!(
            delta.ops[0],
            DeltaOp::Copy { offset: 0, len: basis.len() as u64 }
        );
        assert_eq!(apply_delta(&basis, &delta).unwrap(), basis);
    }

    #[test]
    fn test_insertion_in_the_middle() {
        let basis = random_bytes(2, 20_000);
        let mut content = basis[..10_000].to_vec();
        content.extend_from_slice(b"inserted bytes that were not there before");
        content.extend_from_slice(&basis[10_000..]);

        let delta = build_delta(&content, &build_signature(&basis));
        assert!(delta.literal_bytes() < 2 * MIN_BLOCK_LEN as u64 + 64);
        assert_eq!(apply_delta(&basis, &delta).unwrap(), content);
    }

    #[test]
    fn test_empty_basis_and_empty_content() {
        let empty_sig = build_signature(b"");
        assert_eq!(empty_sig.block_count(), 0);

        let delta = build_delta(b"new file", &empty_sig);
        assert!(delta.is_literal_only());
        assert_eq!(apply_delta(b"", &delta).unwrap(), b"new file");

        let delta = build_delta(b"", &build_signature(b"some basis"));
        assert!(delta.ops.is_empty());
        assert_eq!(apply_delta(b"some basis", &delta).unwrap(), b"");
    }

    #[test]
    fn test_short_tail_block_matches() {
        let basis = random_bytes(3, MIN_BLOCK_LEN * 3 + 123);
        let mut content = b"prefix".to_vec();
        content.extend_from_slice(&basis);

        let delta = build_delta(&content, &build_signature(&basis));
        assert_eq!(delta.literal_bytes(), 6);
        assert_eq!(apply_delta(&basis, &delta).unwrap(), content);
    }

    #[test]
    fn test_drifted_basis_is_applied_mathematically() {
        let basis = random_bytes(4, 5_000);
        let content = [&basis[..], b"tail"].concat();
        let delta = build_delta(&content, &build_signature(&basis));

        let mut drifted = basis.clone();
        drifted[0] ^= 0xff;

        let out = apply_delta(&drifted, &delta).unwrap();
        let mut expected = drifted.clone();
        expected.extend_from_slice(b"tail");
        assert_eq!(out, expected);

        assert!(matches!(
            apply_delta_verified(&drifted, &delta),
            Err(ChronoError::HashMismatch { .. })
        ));
        assert_eq!(apply_delta_verified(&basis, &delta).unwrap(), content);
    }

    #[test]
    fn test_truncated_basis_is_rejected() {
        let basis = random_bytes(5, 4_000);
        let delta = build_delta(&basis, &build_signature(&basis));
        let err = apply_delta(&basis[..100], &delta).unwrap_err();
        assert!(matches!(err, ChronoError::DeltaOutOfRange { .. }));
    }
}
