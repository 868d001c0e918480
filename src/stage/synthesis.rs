
//! The transform node of synthesis trees.

use smallvec::SmallVec;

use crate::arena::{Materializer, SampleArena};
use crate::decomposition::{Band, Decomposition, Split};
use crate::error::{Error, UnitResult, Result};
use crate::kernel::Direction;
use crate::line::{with_representation, LineBuffer, Representation, SampleType};
use crate::math::Vec2;
use crate::scheduler::ThreadToken;
use crate::stage::lifting::Lifting;
use crate::stage::{NodeState, Pull, PullStage, RowProgress, TreeSetup};


/// Undoes one decomposition level, pulling the band rows it needs from its children.
#[derive(Debug)]
pub struct SynthesisNode<'a> {
    size: Vec2<usize>,
    sample_type: SampleType,
    lifting: Lifting<'a>,
    children: SmallVec<[PullStage<'a>; 4]>,
    progress: RowProgress,
    multi_threaded: bool,
}

impl<'a> SynthesisNode<'a> {

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
        let lifting = Lifting::declare(arena, split, band.size, &setup.kernel, sample_type, Direction::Synthesis)?;

        let children = band.children(split).into_iter().zip(descriptors)
            .map(|(child, descriptor)| PullStage::build(arena, setup, descriptor, child, token))
            .collect::<Result<SmallVec<_>>>()?;

        Ok(SynthesisNode {
            size: band.size, sample_type, lifting, children,
            progress: RowProgress::new(band.size.height()),
            multi_threaded: token.map_or(false, ThreadToken::is_multi_threaded),
        })
    }

    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        self.lifting.bind(materializer)?;
        self.children.iter_mut().try_for_each(|child| child.bind(materializer))
    }

    /// Width and height of the rows this node produces.
    pub fn size(&self) -> Vec2<usize> { self.size }

    pub fn state(&self) -> NodeState { self.progress.state() }

    /// The subtrees, in band order.
    pub fn children(&self) -> &[PullStage<'a>] { &self.children }

    fn pull_row<R: Representation>(&mut self, line: &mut LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        let SynthesisNode { lifting, children, .. } = self;

        match lifting {
            Lifting::PassThrough => children[0].pull(line, token),

            Lifting::Horizontal(horizontal) => {
                children[0].pull(horizontal.low_mut(), token)?;
                children[1].pull(horizontal.high_mut(), token)?;
                horizontal.synthesize::<R>(line)
            },

            Lifting::Vertical(vertical) => {
                vertical.pull::<R>(line, |row, target| children[row % 2].pull(target, token))
            },

            Lifting::Both(horizontal, [low, high]) => {
                low.pull::<R>(horizontal.low_mut(), |row, target| children[2 * (row % 2)].pull(target, token))?;
                high.pull::<R>(horizontal.high_mut(), |row, target| children[1 + 2 * (row % 2)].pull(target, token))?;
                horizontal.synthesize::<R>(line)
            },
        }
    }
}

impl Pull for SynthesisNode<'_> {
    fn start(&mut self, token: Option<&ThreadToken>) -> UnitResult {
        ThreadToken::check(self.multi_threaded, token)?;
        self.children.iter_mut().try_for_each(|child| child.start(token))
    }

    fn pull(&mut self, line: &mut LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        ThreadToken::check(self.multi_threaded, token)?;
        line.check_geometry(self.size.width(), self.sample_type)?;

        self.progress.begin("pull")?;
        let result = with_representation!(self.sample_type, R => self.pull_row::<R>(line, token));
        self.progress.finish(result)
    }
}
