
//! Streaming discrete wavelet transforms over arena-backed line buffers.
//!
//! Component rows are pushed into analysis trees, which split them into bands
//! with lifting kernels, row by row, and hand code-blocks to an entropy coder.
//! Synthesis trees pull rows back out of decoded code-blocks.
//! Every line buffer of a tree is backed by one shared `SampleArena`,
//! which commits all sample memory with a single allocation.
//!
//! See the `stage` module for an example.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]


pub mod math;
pub mod error;
pub mod arena;
pub mod line;
pub mod kernel;
pub mod decomposition;
pub mod scheduler;
pub mod roi;
pub mod block;
pub mod stage;
pub mod multi;


pub mod prelude {
    // main exports
    pub use crate::stage::{PushStage, PullStage, Push, Pull, TreeSetup, TreeOptions, NodeState};
    pub use crate::multi::{MultiAnalysis, MultiSynthesis, ColourTransform};

    // core data types
    pub use crate::arena::SampleArena;
    pub use crate::line::{LineBuffer, SampleType, BoundaryExtension, Absolute16, Absolute32, Fixed16, Float32};
    pub use crate::kernel::Kernel;
    pub use crate::decomposition::{Decomposition, Split};
    pub use crate::block::{Codec, BlockId, MemoryStore};
    pub use crate::scheduler::ThreadToken;
    pub use crate::roi::{RegionOfInterest, Rectangle};
    pub use crate::math::Vec2;

    // secondary data types
    pub use crate::error;
    pub use crate::error::{Error, Result, UnitResult};
}
