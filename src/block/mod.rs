
//! Code-blocks, the unit of data exchanged with the entropy coder.
//!
//! The coder itself is a collaborator behind the `BlockCoder` trait,
//! and encoded blocks are kept by a `BlockStore`.
//! Both are shared between all leaves of a tree, and may be used from worker threads.

pub mod bitplane;
pub mod store;

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::decomposition::BandPath;
use crate::error::{Result, UnitResult};
use crate::math::Vec2;

pub use bitplane::BitPlaneCoder;
pub use store::MemoryStore;


/// Locates a code-block within an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {

    /// Index of the image component.
    pub component: usize,

    /// The band that contains the block.
    pub band: BandPath,

    /// Column and row of the block within its band, counted in blocks.
    pub position: Vec2<usize>,
}

/// Quantized coefficients of one code-block, in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeBlock {

    /// Where this block is located.
    pub id: BlockId,

    /// Number of samples in this block. Blocks at the right and bottom of a band may be smaller.
    pub size: Vec2<usize>,

    /// One signed integer coefficient per sample.
    pub coefficients: Vec<i32>,
}

/// The output of the entropy coder for one code-block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodedBlock {

    /// The coded bytes of all passes, concatenated.
    pub bytes: Vec<u8>,

    /// The byte length of every coding pass, in coding order.
    pub pass_lengths: SmallVec<[usize; 16]>,

    /// Number of magnitude bit-planes the coefficients of this block occupy.
    pub bit_planes: u8,
}

/// The entropy coder. Implementations must be deterministic.
pub trait BlockCoder: Send + Sync {

    /// Code the coefficients of a block.
    fn encode(&self, block: &CodeBlock) -> Result<EncodedBlock>;

    /// Reconstruct the coefficients of a block, whose id and size are already set.
    /// Corrupted or truncated data must be reported as `Error::Decode` for this block.
    fn decode(&self, encoded: &EncodedBlock, block: &mut CodeBlock) -> UnitResult;
}

/// Keeps encoded blocks between analysis and synthesis.
pub trait BlockStore: Send + Sync {

    /// Remember an encoded block, replacing any previous block with the same id.
    fn store(&self, id: BlockId, block: EncodedBlock) -> UnitResult;

    /// Retrieve an encoded block. Missing blocks are reported as `Error::Decode`.
    fn load(&self, id: &BlockId) -> Result<EncodedBlock>;
}

/// The coder and storage used by the leaves of a tree.
#[derive(Clone)]
pub struct Codec {

    /// Encodes and decodes blocks.
    pub coder: Arc<dyn BlockCoder>,

    /// Where blocks go after encoding and come from before decoding.
    pub store: Arc<dyn BlockStore>,
}


impl CodeBlock {

    /// A block with all coefficients set to zero.
    pub fn zero(id: BlockId, size: Vec2<usize>) -> Self {
        CodeBlock { id, size, coefficients: vec![0; size.area()] }
    }

    /// Number of bit-planes required for the largest magnitude in this block.
    pub fn bit_planes(&self) -> u8 {
        let largest = self.coefficients.iter()
            .map(|coefficient| coefficient.unsigned_abs())
            .max().unwrap_or(0);

        (u32::BITS - largest.leading_zeros()) as u8
    }
}

impl EncodedBlock {

    /// Number of coding passes.
    pub fn pass_count(&self) -> usize { self.pass_lengths.len() }

    /// Discard all but the first `pass_count` coding passes.
    pub fn truncate(&mut self, pass_count: usize) {
        self.pass_lengths.truncate(pass_count);
        self.bytes.truncate(self.pass_lengths.iter().sum());
    }
}

impl Codec {

    /// The reference bit-plane coder with in-memory storage.
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let codec = Codec { coder: Arc::new(BitPlaneCoder), store: store.clone() };
        (codec, store)
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Codec").finish_non_exhaustive()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "code-block ({}, {}) of band [", self.position.x(), self.position.y())?;

        for (index, child) in self.band.iter().enumerate() {
            if index != 0 { write!(formatter, ".")?; }
            write!(formatter, "{}", child)?;
        }

        write!(formatter, "] in component {}", self.component)
    }
}


/// Map a normalized coefficient to a quantization index, using a dead-zone quantizer.
pub fn quantize(value: f32, step_size: f32) -> i32 {
    let magnitude = (value.abs() / step_size).floor() as i32;
    if value < 0.0 { -magnitude } else { magnitude }
}

/// Reconstruct a normalized coefficient at the mid-point of its quantization interval.
pub fn dequantize(index: i32, step_size: f32) -> f32 {
    if index == 0 { return 0.0; }

    let magnitude = (index.unsigned_abs() as f32 + 0.5) * step_size;
    if index < 0 { -magnitude } else { magnitude }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_block_location(){
        let id = BlockId { component: 1, band: smallvec::smallvec![0, 3], position: Vec2(2, 5) };
        assert_eq!(id.to_string(), "code-block (2, 5) of band [0.3] in component 1");
    }

    #[test]
    fn bit_planes_of_largest_magnitude(){
        let id = BlockId { component: 0, band: BandPath::new(), position: Vec2(0, 0) };
        let mut block = CodeBlock::zero(id, Vec2(2, 2));
        assert_eq!(block.bit_planes(), 0);

        block.coefficients = vec![3, -8, 0, 1];
        assert_eq!(block.bit_planes(), 4);
    }

    #[test]
    fn quantization_has_a_dead_zone(){
        assert_eq!(quantize(0.09, 0.1), 0);
        assert_eq!(quantize(-0.09, 0.1), 0);
        assert_eq!(quantize(0.25, 0.1), 2);
        assert_eq!(quantize(-0.25, 0.1), -2);

        assert_eq!(dequantize(0, 0.1), 0.0);
        assert!((dequantize(2, 0.1) - 0.25).abs() < 1.0e-6);
        assert!((dequantize(-2, 0.1) + 0.25).abs() < 1.0e-6);
    }
}
