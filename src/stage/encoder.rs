
//! The leaf of analysis trees.

use std::sync::Arc;

use crate::arena::{Materializer, SampleArena};
use crate::block::{quantize, BlockId, CodeBlock, Codec};
use crate::decomposition::Band;
use crate::error::{Result, UnitResult};
use crate::line::{with_representation, LineBuffer, Representation, Sample, SampleType};
use crate::math::{RoundingMode, Vec2};
use crate::roi::{self, RegionOfInterest};
use crate::scheduler::{JobQueue, ThreadToken};
use crate::stage::{NodeState, Push, RowProgress, TreeSetup};


/// Collects the rows of a band into a stripe of code-blocks,
/// and encodes every block once the stripe is complete.
#[derive(Debug)]
pub struct EncoderLeaf<'a> {
    band: Band,
    sample_type: SampleType,
    block_size: Vec2<usize>,
    step_size: f32,
    roi_shift: u32,
    roi: Option<Arc<dyn RegionOfInterest>>,
    codec: Codec,

    /// One line per row of a code-block stripe.
    stripe: Vec<LineBuffer<'a>>,
    progress: RowProgress,
    jobs: JobQueue<UnitResult>,
    multi_threaded: bool,
}

impl<'a> EncoderLeaf<'a> {

    /// Declare the stripe lines of this leaf.
    pub fn new(arena: &mut SampleArena, setup: &TreeSetup, band: Band, token: Option<&ThreadToken>) -> Result<Self> {
        let options = &setup.options;
        let stripe_height = options.block_size.height().min(band.size.height());

        let stripe = (0 .. stripe_height)
            .map(|_| LineBuffer::declare(arena, band.size.width(), 0, 0, options.sample_type))
            .collect::<Result<Vec<_>>>()?;

        Ok(EncoderLeaf {
            progress: RowProgress::new(band.size.height()),
            sample_type: options.sample_type,
            block_size: options.block_size,
            step_size: options.step_size,
            roi_shift: options.roi_shift,
            roi: setup.roi.clone(),
            codec: setup.codec.clone(),
            jobs: JobQueue::new(ThreadToken::scheduler_or_sequential(token)),
            multi_threaded: token.map_or(false, ThreadToken::is_multi_threaded),
            stripe, band,
        })
    }

    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        self.stripe.iter_mut().try_for_each(|line| line.bind(materializer))
    }

    /// Width and height of the band.
    pub fn size(&self) -> Vec2<usize> { self.band.size }

    /// The band this leaf codes.
    pub fn band(&self) -> &Band { &self.band }

    /// Where this leaf is in its sequence of rows.
    pub fn state(&self) -> NodeState { self.progress.state() }

    fn push_row<R: Representation>(&mut self, row: usize, line: &LineBuffer<'_>) -> UnitResult {
        let stripe_height = self.stripe.len();
        let row_in_stripe = row % stripe_height;
        self.stripe[row_in_stripe].copy_from(line)?;

        let is_last_row = row + 1 == self.band.size.height();
        if row_in_stripe + 1 == stripe_height || is_last_row {
            self.encode_stripe::<R>(row / stripe_height, row_in_stripe + 1)?;
        }

        // surface failures of earlier blocks as early as possible
        while let Some(result) = self.jobs.try_next_result()? { result?; }

        if is_last_row {
            // every block of the band must be coded before the last row is released
            self.jobs.join(|result| result)?;
        }

        Ok(())
    }

    fn encode_stripe<R: Representation>(&mut self, stripe_index: usize, rows: usize) -> UnitResult {
        let width = self.band.size.width();
        let block_columns = RoundingMode::Up.divide(width, self.block_size.width());

        for block_x in 0 .. block_columns {
            let start_x = block_x * self.block_size.width();
            let size = Vec2(self.block_size.width().min(width - start_x), rows);

            let mut coefficients = Vec::with_capacity(size.area());
            for line in &self.stripe[.. rows] {
                let samples = &line.view::<R>()?.nominal()[start_x .. start_x + size.width()];
                coefficients.extend(samples.iter().map(|&sample| self.to_coefficient(sample)));
            }

            if let Some(region) = &self.roi {
                let start = Vec2(start_x, stripe_index * self.block_size.height());

                roi::shift_up(&mut coefficients, self.roi_shift, |index| {
                    let position = start + Vec2(index % size.width(), index / size.width());
                    region.is_foreground(&self.band, position)
                })?;
            }

            let id = BlockId { component: self.band.component, band: self.band.path.clone(), position: Vec2(block_x, stripe_index) };
            let block = CodeBlock { id, size, coefficients };
            tracing::trace!(block = %block.id, "queued code-block encoding");

            let coder = self.codec.coder.clone();
            let store = self.codec.store.clone();

            self.jobs.submit(move || {
                let encoded = coder.encode(&block)?;
                store.store(block.id, encoded)
            });
        }

        Ok(())
    }

    fn to_coefficient<T: Sample>(&self, sample: T) -> i32 {
        if self.sample_type.is_absolute() { sample.to_i32() }
        else { quantize(self.sample_type.normalized_to_f32(sample.to_f32()), self.step_size) }
    }
}

impl Push for EncoderLeaf<'_> {
    fn push(&mut self, line: &LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        ThreadToken::check(self.multi_threaded, token)?;
        line.check_geometry(self.band.size.width(), self.sample_type)?;

        let row = self.progress.begin("push")?;
        let result = with_representation!(self.sample_type, R => self.push_row::<R>(row, line));
        self.progress.finish(result)
    }
}
