
//! Trees of processing stages.
//!
//! An analysis tree is a `PushStage`: the caller pushes component rows into its root,
//! and every transform node splits them and pushes the results into its children,
//! until encoder leaves collect them into code-blocks.
//!
//! A synthesis tree is a `PullStage`: the caller pulls component rows from its root,
//! and every transform node pulls the rows it needs from its children,
//! until decoder leaves produce them from code-blocks.
//!
//! Building a tree declares all of its lines in a `SampleArena`.
//! After the arena is finalized, the tree must be bound before the first row is processed:
//!
//! ```
//! use dwtflow::prelude::*;
//!
//! let (codec, store) = Codec::in_memory();
//! let setup = TreeSetup::new(Kernel::w5x3(), TreeOptions::reversible(false), codec);
//! let decomposition = Decomposition::mallat(2);
//!
//! let mut arena = SampleArena::new();
//! let mut tree = PushStage::new(&mut arena, &setup, &decomposition, 0, Vec2(16, 8), None)?;
//! let mut line = LineBuffer::declare(&mut arena, 16, 0, 0, SampleType::I32)?;
//!
//! arena.finalize()?;
//! let mut materializer = arena.materializer()?;
//! tree.bind(&mut materializer)?;
//! line.bind(&mut materializer)?;
//!
//! for row in 0 .. 8 {
//!     for (column, sample) in line.view_mut::<Absolute32>()?.nominal_mut().iter_mut().enumerate() {
//!         *sample = (row * column) as i32;
//!     }
//!
//!     tree.push(&line, None)?;
//! }
//!
//! assert_eq!(store.len()?, 7);
//! # Ok::<(), dwtflow::error::Error>(())
//! ```

mod lifting;
pub mod analysis;
pub mod synthesis;
pub mod encoder;
pub mod decoder;

use std::sync::Arc;

use crate::arena::{Materializer, SampleArena};
use crate::block::Codec;
use crate::decomposition::{Band, Decomposition};
use crate::error::{Error, Result, UnitResult};
use crate::kernel::Kernel;
use crate::line::{LineBuffer, SampleType};
use crate::math::Vec2;
use crate::roi::RegionOfInterest;
use crate::scheduler::ThreadToken;

pub use analysis::AnalysisNode;
pub use synthesis::SynthesisNode;
pub use encoder::EncoderLeaf;
pub use decoder::DecoderLeaf;


/// Accepts rows, one after another, in increasing order.
pub trait Push {

    /// Hand over the next row. The line is fully consumed before this returns,
    /// and may be overwritten by the caller afterwards.
    /// A token is required if the tree was built for a multi-threaded scheduler.
    fn push(&mut self, line: &LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult;
}

/// Produces rows, one after another, in increasing order.
pub trait Pull {

    /// Optionally begin background work before the first row is pulled.
    /// Has no effect after the first call.
    fn start(&mut self, token: Option<&ThreadToken>) -> UnitResult;

    /// Fill the line with the next row.
    /// A token is required if the tree was built for a multi-threaded scheduler.
    fn pull(&mut self, line: &mut LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult;
}

/// Numeric configuration shared by all stages of a tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeOptions {

    /// The representation of every line in the tree.
    pub sample_type: SampleType,

    /// The nominal size of a code-block. Blocks at the band boundaries may be smaller.
    pub block_size: Vec2<usize>,

    /// Quantization step size of normalized coefficients. Ignored by reversible trees.
    pub step_size: f32,

    /// Up-shift applied to foreground coefficients, if a region of interest is set.
    pub roi_shift: u32,
}

/// Everything a tree needs, apart from its geometry.
#[derive(Clone, Debug)]
pub struct TreeSetup {

    /// The wavelet kernel used by every transform node.
    pub kernel: Kernel,

    /// Representation, block size and quantization.
    pub options: TreeOptions,

    /// The entropy coder and block storage used by the leaves.
    pub codec: Codec,

    /// Optional foreground selection for max-shift coding.
    pub roi: Option<Arc<dyn RegionOfInterest>>,
}

/// Where a stage is in its sequence of rows.
/// Dropping a stage tears it down, waiting for its in-flight code-block jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {

    /// Built, no row was processed yet.
    Constructed,

    /// Some rows were processed, more are expected.
    BetweenRows,

    /// A row is being processed.
    InRow,

    /// All declared rows were processed.
    Finished,

    /// Processing a row failed. The tree cannot be used any further.
    Failed,
}

/// Counts rows and enforces the order of calls.
#[derive(Debug)]
pub(crate) struct RowProgress {
    height: usize,
    completed: usize,
    state: NodeState,
}

/// The root, or any subtree, of an analysis tree.
#[derive(Debug)]
pub enum PushStage<'a> {

    /// Splits rows into bands.
    Analysis(Box<AnalysisNode<'a>>),

    /// Codes the rows of a band.
    Encoder(EncoderLeaf<'a>),
}

/// The root, or any subtree, of a synthesis tree.
#[derive(Debug)]
pub enum PullStage<'a> {

    /// Merges bands into rows.
    Synthesis(Box<SynthesisNode<'a>>),

    /// Decodes the rows of a band.
    Decoder(DecoderLeaf<'a>),
}


impl TreeOptions {

    /// Options for reversible kernels, with absolute integer samples.
    pub fn reversible(use_shorts: bool) -> Self {
        TreeOptions {
            sample_type: SampleType::new(true, use_shorts),
            block_size: Vec2(64, 64),
            step_size: 1.0,
            roi_shift: 0,
        }
    }

    /// Options for irreversible kernels, with normalized samples.
    pub fn irreversible(use_shorts: bool) -> Self {
        TreeOptions {
            sample_type: SampleType::new(false, use_shorts),
            block_size: Vec2(64, 64),
            step_size: 1.0 / 1024.0,
            roi_shift: 0,
        }
    }

    /// Use another code-block size.
    pub fn with_block_size(self, block_size: Vec2<usize>) -> Self {
        TreeOptions { block_size, ..self }
    }

    /// Use another quantization step size.
    pub fn with_step_size(self, step_size: f32) -> Self {
        TreeOptions { step_size, ..self }
    }

    /// Use another region of interest shift.
    pub fn with_roi_shift(self, roi_shift: u32) -> Self {
        TreeOptions { roi_shift, ..self }
    }
}

impl TreeSetup {

    /// A setup without region of interest.
    pub fn new(kernel: Kernel, options: TreeOptions, codec: Codec) -> Self {
        TreeSetup { kernel, options, codec, roi: None }
    }

    /// Code the foreground of this region with more precision.
    pub fn with_roi(self, roi: Arc<dyn RegionOfInterest>) -> Self {
        TreeSetup { roi: Some(roi), ..self }
    }

    /// Errors if the kernel does not fit the sample type, or the options are unusable.
    pub fn validate(&self) -> UnitResult {
        let absolute = self.options.sample_type.is_absolute();

        if self.kernel.is_reversible() && !absolute {
            return Err(Error::invalid("reversible kernels require absolute integer samples"));
        }

        if !self.kernel.is_reversible() && absolute {
            return Err(Error::invalid("irreversible kernels require normalized samples"));
        }

        if self.options.block_size.area() == 0 {
            return Err(Error::invalid("code-block size must not be zero"));
        }

        if !absolute && !(self.options.step_size.is_finite() && self.options.step_size > 0.0) {
            return Err(Error::invalid("quantization step size must be positive"));
        }

        if self.options.roi_shift >= 31 {
            return Err(Error::invalid("region of interest shift must be smaller than 31"));
        }

        Ok(())
    }
}

impl RowProgress {

    pub fn new(height: usize) -> Self {
        RowProgress { height, completed: 0, state: NodeState::Constructed }
    }

    pub fn state(&self) -> NodeState { self.state }

    /// Enter the next row, returning its index.
    /// Errors if all rows were processed already, or an earlier row failed.
    pub fn begin(&mut self, action: &str) -> Result<usize> {
        match self.state {
            NodeState::Failed => Err(Error::contract(format!(
                "cannot {} after an earlier row failed", action
            ))),

            NodeState::InRow => Err(Error::contract(format!(
                "cannot {} while another row is in progress", action
            ))),

            _ if self.completed >= self.height => Err(Error::contract(format!(
                "cannot {} row {}, the band has only {} rows", action, self.completed, self.height
            ))),

            _ => {
                self.state = NodeState::InRow;
                Ok(self.completed)
            }
        }
    }

    /// Leave the current row, recording its outcome.
    pub fn finish(&mut self, result: UnitResult) -> UnitResult {
        match result {
            Ok(()) => {
                self.completed += 1;
                self.state = if self.completed == self.height { NodeState::Finished } else { NodeState::BetweenRows };
                Ok(())
            },

            Err(error) => {
                self.state = NodeState::Failed;
                Err(error)
            }
        }
    }
}


impl<'a> PushStage<'a> {

    /// Build an analysis tree for a component of the specified size.
    /// Declares all lines of the tree in the arena.
    #[tracing::instrument(level = "debug", skip(arena, setup, decomposition, token))]
    pub fn new(
        arena: &mut SampleArena, setup: &TreeSetup, decomposition: &Decomposition,
        component: usize, size: Vec2<usize>, token: Option<&ThreadToken>,
    ) -> Result<Self>
    {
        setup.validate()?;
        decomposition.validate()?;
        Self::build(arena, setup, decomposition, Band::root(component, size), token)
    }

    pub(crate) fn build(
        arena: &mut SampleArena, setup: &TreeSetup, decomposition: &Decomposition,
        band: Band, token: Option<&ThreadToken>,
    ) -> Result<Self>
    {
        Ok(match decomposition {
            Decomposition::Leaf => PushStage::Encoder(EncoderLeaf::new(arena, setup, band, token)?),

            Decomposition::Split { split, bands } => PushStage::Analysis(Box::new(
                AnalysisNode::new(arena, setup, *split, bands, band, token)?
            )),
        })
    }

    /// Back every line of the tree with arena memory, in declaration order.
    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        match self {
            PushStage::Analysis(node) => node.bind(materializer),
            PushStage::Encoder(leaf) => leaf.bind(materializer),
        }
    }

    /// The size of the rows this stage accepts, and the number of rows.
    pub fn size(&self) -> Vec2<usize> {
        match self {
            PushStage::Analysis(node) => node.size(),
            PushStage::Encoder(leaf) => leaf.size(),
        }
    }

    /// Where this stage is in its sequence of rows.
    pub fn state(&self) -> NodeState {
        match self {
            PushStage::Analysis(node) => node.state(),
            PushStage::Encoder(leaf) => leaf.state(),
        }
    }
}

impl Push for PushStage<'_> {
    fn push(&mut self, line: &LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        match self {
            PushStage::Analysis(node) => node.push(line, token),
            PushStage::Encoder(leaf) => leaf.push(line, token),
        }
    }
}

impl<'a> PullStage<'a> {

    /// Build a synthesis tree for a component of the specified size.
    /// Declares all lines of the tree in the arena.
    #[tracing::instrument(level = "debug", skip(arena, setup, decomposition, token))]
    pub fn new(
        arena: &mut SampleArena, setup: &TreeSetup, decomposition: &Decomposition,
        component: usize, size: Vec2<usize>, token: Option<&ThreadToken>,
    ) -> Result<Self>
    {
        setup.validate()?;
        decomposition.validate()?;
        Self::build(arena, setup, decomposition, Band::root(component, size), token)
    }

    pub(crate) fn build(
        arena: &mut SampleArena, setup: &TreeSetup, decomposition: &Decomposition,
        band: Band, token: Option<&ThreadToken>,
    ) -> Result<Self>
    {
        Ok(match decomposition {
            Decomposition::Leaf => PullStage::Decoder(DecoderLeaf::new(arena, setup, band, token)?),

            Decomposition::Split { split, bands } => PullStage::Synthesis(Box::new(
                SynthesisNode::new(arena, setup, *split, bands, band, token)?
            )),
        })
    }

    /// Back every line of the tree with arena memory, in declaration order.
    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        match self {
            PullStage::Synthesis(node) => node.bind(materializer),
            PullStage::Decoder(leaf) => leaf.bind(materializer),
        }
    }

    /// The size of the rows this stage produces, and the number of rows.
    pub fn size(&self) -> Vec2<usize> {
        match self {
            PullStage::Synthesis(node) => node.size(),
            PullStage::Decoder(leaf) => leaf.size(),
        }
    }

    /// Where this stage is in its sequence of rows.
    pub fn state(&self) -> NodeState {
        match self {
            PullStage::Synthesis(node) => node.state(),
            PullStage::Decoder(leaf) => leaf.state(),
        }
    }
}

impl Pull for PullStage<'_> {
    fn start(&mut self, token: Option<&ThreadToken>) -> UnitResult {
        match self {
            PullStage::Synthesis(node) => node.start(token),
            PullStage::Decoder(leaf) => leaf.start(token),
        }
    }

    fn pull(&mut self, line: &mut LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        match self {
            PullStage::Synthesis(node) => node.pull(line, token),
            PullStage::Decoder(leaf) => leaf.pull(line, token),
        }
    }
}
