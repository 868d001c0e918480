
//! The transform node of analysis trees.

use smallvec::SmallVec;

use crate::arena::{Materializer, SampleArena};
use crate::decomposition::{Band, Decomposition, Split};
use crate::error::{Error, UnitResult, Result};
use crate::kernel::Direction;
use crate::line::{with_representation, LineBuffer, Representation, SampleType};
use crate::math::Vec2;
use crate::scheduler::ThreadToken;
use crate::stage::lifting::Lifting;
use crate::stage::{NodeState, Push, PushStage, RowProgress, TreeSetup};


/// Performs one decomposition level, pushing the resulting band rows into its children.
#[derive(Debug)]
pub struct AnalysisNode<'a> {
    size: Vec2<usize>,
    sample_type: SampleType,
    lifting: Lifting<'a>,
    children: SmallVec<[PushStage<'a>; 4]>,
    progress: RowProgress,
    multi_threaded: bool,
}

impl<'a> AnalysisNode<'a> {

    /// Declare the lines of this node, then build all children.
    pub fn new(
        arena: &mut SampleArena, setup: &TreeSetup, split: Split,
        descriptors: &[Decomposition], band: Band, token: Option<&ThreadToken>,
    ) -> Result<Self>
    {
        if descriptors.len() != split.band_count() {
            return Err(Error::invalid("decomposition does not describe every band of a split"));
        }

        let sample_type = setup.options.sample_type;
        let lifting = Lifting::declare(arena, split, band.size, &setup.kernel, sample_type, Direction::Analysis)?;

        let children = band.children(split).into_iter().zip(descriptors)
            .map(|(child, descriptor)| PushStage::build(arena, setup, descriptor, child, token))
            .collect::<Result<SmallVec<_>>>()?;

        Ok(AnalysisNode {
            size: band.size, sample_type, lifting, children,
            progress: RowProgress::new(band.size.height()),
            multi_threaded: token.map_or(false, ThreadToken::is_multi_threaded),
        })
    }

    /// Bind own lines first, then those of the children, matching the declaration order.
    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        self.lifting.bind(materializer)?;
        self.children.iter_mut().try_for_each(|child| child.bind(materializer))
    }

    /// Width and height of the rows this node accepts.
    pub fn size(&self) -> Vec2<usize> { self.size }

    /// Where this node is in its sequence of rows.
    pub fn state(&self) -> NodeState { self.progress.state() }

    /// The subtrees, in band order.
    pub fn children(&self) -> &[PushStage<'a>] { &self.children }

    fn push_row<R: Representation>(&mut self, line: &LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        let AnalysisNode { lifting, children, .. } = self;

        match lifting {
            Lifting::PassThrough => children[0].push(line, token),

            Lifting::Horizontal(horizontal) => {
                horizontal.analyze::<R>(line)?;
                children[0].push(horizontal.low(), token)?;
                children[1].push(horizontal.high(), token)
            },

            Lifting::Vertical(vertical) => {
                vertical.push::<R>(line, |row, output| children[row % 2].push(output, token))
            },

            Lifting::Both(horizontal, [low, high]) => {
                horizontal.analyze::<R>(line)?;

                // bands are ordered LL, HL, LH, HH
                low.push::<R>(horizontal.low(), |row, output| children[2 * (row % 2)].push(output, token))?;
                high.push::<R>(horizontal.high(), |row, output| children[1 + 2 * (row % 2)].push(output, token))
            },
        }
    }
}

impl Push for AnalysisNode<'_> {
    fn push(&mut self, line: &LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        ThreadToken::check(self.multi_threaded, token)?;
        line.check_geometry(self.size.width(), self.sample_type)?;

        self.progress.begin("push")?;
        let result = with_representation!(self.sample_type, R => self.push_row::<R>(line, token));
        self.progress.finish(result)
    }
}
