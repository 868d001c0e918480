
//! The leaf of synthesis trees.

use crate::arena::{Materializer, SampleArena};
use crate::block::{dequantize, BlockId, CodeBlock, Codec};
use crate::decomposition::Band;
use crate::error::{Error, Result, UnitResult};
use crate::line::{with_representation, LineBuffer, Representation, Sample, SampleType};
use crate::math::{RoundingMode, Vec2};
use crate::roi;
use crate::scheduler::{JobQueue, ThreadToken};
use crate::stage::{NodeState, Pull, RowProgress, TreeSetup};


/// Decodes a stripe of code-blocks whenever the first of its rows is pulled,
/// and hands out the rows of that stripe one after another.
/// The next stripe is decoded in the background while the current one is consumed.
#[derive(Debug)]
pub struct DecoderLeaf<'a> {
    band: Band,
    sample_type: SampleType,
    block_size: Vec2<usize>,
    step_size: f32,

    /// Zero unless a region of interest is set.
    roi_shift: u32,
    codec: Codec,

    stripe: Vec<LineBuffer<'a>>,
    progress: RowProgress,
    jobs: JobQueue<Result<CodeBlock>>,

    /// The stripe whose blocks are currently being decoded.
    queued_stripe: Option<usize>,
    multi_threaded: bool,
}

impl<'a> DecoderLeaf<'a> {

    /// Declare the stripe lines of this leaf.
    pub fn new(arena: &mut SampleArena, setup: &TreeSetup, band: Band, token: Option<&ThreadToken>) -> Result<Self> {
        let options = &setup.options;
        let stripe_height = options.block_size.height().min(band.size.height());

        let stripe = (0 .. stripe_height)
            .map(|_| LineBuffer::declare(arena, band.size.width(), 0, 0, options.sample_type))
            .collect::<Result<Vec<_>>>()?;

        Ok(DecoderLeaf {
            progress: RowProgress::new(band.size.height()),
            sample_type: options.sample_type,
            block_size: options.block_size,
            step_size: options.step_size,
            roi_shift: if setup.roi.is_some() { options.roi_shift } else { 0 },
            codec: setup.codec.clone(),
            jobs: JobQueue::new(ThreadToken::scheduler_or_sequential(token)),
            queued_stripe: None,
            multi_threaded: token.map_or(false, ThreadToken::is_multi_threaded),
            stripe, band,
        })
    }

    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        self.stripe.iter_mut().try_for_each(|line| line.bind(materializer))
    }

    /// Width and height of the band.
    pub fn size(&self) -> Vec2<usize> { self.band.size }

    /// The band this leaf reconstructs.
    pub fn band(&self) -> &Band { &self.band }

    /// Where this leaf is in its sequence of rows.
    pub fn state(&self) -> NodeState { self.progress.state() }

    fn stripe_count(&self) -> usize {
        if self.stripe.is_empty() { 0 }
        else { RoundingMode::Up.divide(self.band.size.height(), self.stripe.len()) }
    }

    /// Submit a decoding job for every block of a stripe.
    fn queue_stripe(&mut self, stripe_index: usize) {
        let stripe_height = self.stripe.len();
        let rows = stripe_height.min(self.band.size.height() - stripe_index * stripe_height);

        let width = self.band.size.width();
        let block_columns = RoundingMode::Up.divide(width, self.block_size.width());

        for block_x in 0 .. block_columns {
            let start_x = block_x * self.block_size.width();
            let size = Vec2(self.block_size.width().min(width - start_x), rows);
            let id = BlockId { component: self.band.component, band: self.band.path.clone(), position: Vec2(block_x, stripe_index) };

            tracing::trace!(block = %id, "queued code-block decoding");

            let coder = self.codec.coder.clone();
            let store = self.codec.store.clone();

            self.jobs.submit(move || {
                let encoded = store.load(&id)?;
                let mut block = CodeBlock::zero(id, size);
                coder.decode(&encoded, &mut block)?;
                Ok(block)
            });
        }

        self.queued_stripe = Some(stripe_index);
    }

    fn pull_row<R: Representation>(&mut self, row: usize, line: &mut LineBuffer<'_>) -> UnitResult {
        let stripe_height = self.stripe.len();
        let row_in_stripe = row % stripe_height;

        if row_in_stripe == 0 {
            let stripe_index = row / stripe_height;
            if self.queued_stripe != Some(stripe_index) { self.queue_stripe(stripe_index); }

            let DecoderLeaf { jobs, stripe, sample_type, step_size, roi_shift, block_size, .. } = self;
            let block_width = block_size.width();

            jobs.join(|block| {
                let block = block?;
                write_block::<R>(stripe, block, block_width, *sample_type, *step_size, *roi_shift)
            })?;

            self.queued_stripe = None;
            if stripe_index + 1 < self.stripe_count() { self.queue_stripe(stripe_index + 1); }
        }

        line.copy_from(&self.stripe[row_in_stripe])
    }
}

/// Convert the coefficients of a decoded block to samples, and place them in the stripe lines.
fn write_block<R: Representation>(
    stripe: &mut [LineBuffer<'_>], mut block: CodeBlock, block_width: usize,
    sample_type: SampleType, step_size: f32, roi_shift: u32,
) -> UnitResult
{
    if block.coefficients.len() != block.size.area() || block.size.height() > stripe.len() {
        return Err(Error::decode(block.id, "decoded block has an unexpected number of coefficients"));
    }

    roi::shift_down(&mut block.coefficients, roi_shift);

    let start_x = block.id.position.x() * block_width;
    let width = block.size.width();

    for (line, coefficients) in stripe.iter_mut().zip(block.coefficients.chunks_exact(width.max(1))) {
        let mut view = line.view_mut::<R>()?;
        let samples = view.nominal_mut().get_mut(start_x .. start_x + width)
            .ok_or_else(|| Error::contract("decoded block exceeds its band"))?;

        for (sample, &coefficient) in samples.iter_mut().zip(coefficients) {
            *sample =
                if sample_type.is_absolute() { <R::Sample as Sample>::from_i32(coefficient) }
                else { <R::Sample as Sample>::from_f32(sample_type.f32_to_normalized(dequantize(coefficient, step_size))) };
        }
    }

    Ok(())
}

impl Pull for DecoderLeaf<'_> {
    fn start(&mut self, token: Option<&ThreadToken>) -> UnitResult {
        ThreadToken::check(self.multi_threaded, token)?;

        if self.progress.state() == NodeState::Constructed && self.queued_stripe.is_none() && self.stripe_count() > 0 {
            self.queue_stripe(0);
        }

        Ok(())
    }

    fn pull(&mut self, line: &mut LineBuffer<'_>, token: Option<&ThreadToken>) -> UnitResult {
        ThreadToken::check(self.multi_threaded, token)?;
        line.check_geometry(self.band.size.width(), self.sample_type)?;

        let row = self.progress.begin("pull")?;
        let result = with_representation!(self.sample_type, R => self.pull_row::<R>(row, line));
        self.progress.finish(result)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{BlockStore, EncodedBlock};
    use crate::kernel::Kernel;
    use crate::line::{Absolute32, Float32};
    use crate::stage::{Push, EncoderLeaf, TreeOptions};

    fn bound_leaves<'a>(
        arena: &'a mut SampleArena, setup: &TreeSetup, band: &Band, sample_type: SampleType
    ) -> (EncoderLeaf<'a>, DecoderLeaf<'a>, LineBuffer<'a>)
    {
        let mut encoder = EncoderLeaf::new(arena, setup, band.clone(), None).unwrap();
        let mut decoder = DecoderLeaf::new(arena, setup, band.clone(), None).unwrap();
        let mut line = LineBuffer::declare(arena, band.size.width(), 0, 0, sample_type).unwrap();
        arena.finalize().unwrap();

        let mut materializer = arena.materializer().unwrap();
        encoder.bind(&mut materializer).unwrap();
        decoder.bind(&mut materializer).unwrap();
        line.bind(&mut materializer).unwrap();
        (encoder, decoder, line)
    }

    #[test]
    fn rows_come_back_from_several_stripes(){
        let (codec, _) = Codec::in_memory();
        let options = TreeOptions::reversible(false).with_block_size(Vec2(3, 2));
        let setup = TreeSetup::new(Kernel::w5x3(), options, codec);
        let band = Band::root(0, Vec2(7, 5));

        let mut arena = SampleArena::new();
        let (mut encoder, mut decoder, mut line) = bound_leaves(&mut arena, &setup, &band, SampleType::I32);

        for row in 0 .. 5 {
            for (column, sample) in line.view_mut::<Absolute32>().unwrap().nominal_mut().iter_mut().enumerate() {
                *sample = row * 100 - column as i32;
            }

            encoder.push(&line, None).unwrap();
        }

        decoder.start(None).unwrap();

        for row in 0 .. 5 {
            decoder.pull(&mut line, None).unwrap();
            let expected: Vec<i32> = (0 .. 7).map(|column| row * 100 - column).collect();
            assert_eq!(line.view::<Absolute32>().unwrap().nominal(), expected.as_slice());
        }

        assert!(decoder.pull(&mut line, None).unwrap_err().is_contract_violation());
    }

    #[test]
    fn normalized_samples_are_reconstructed_within_a_step(){
        let (codec, _) = Codec::in_memory();
        let options = TreeOptions::irreversible(false).with_step_size(0.01);
        let setup = TreeSetup::new(Kernel::w9x7(), options, codec);
        let band = Band::root(0, Vec2(4, 1));

        let mut arena = SampleArena::new();
        let (mut encoder, mut decoder, mut line) = bound_leaves(&mut arena, &setup, &band, SampleType::F32);

        let original = [0.123, -0.456, 0.004, 0.5];
        line.view_mut::<Float32>().unwrap().nominal_mut().copy_from_slice(&original);
        encoder.push(&line, None).unwrap();

        decoder.pull(&mut line, None).unwrap();
        let view = line.view::<Float32>().unwrap();

        for (&value, &expected) in view.nominal().iter().zip(&original) {
            assert!((value - expected).abs() <= 0.01, "{} vs {}", value, expected);
        }

        assert_eq!(view.nominal()[2], 0.0);
    }

    #[test]
    fn corrupt_blocks_name_the_block(){
        let (codec, store) = Codec::in_memory();
        let setup = TreeSetup::new(Kernel::w5x3(), TreeOptions::reversible(false), codec);
        let band = Band::root(2, Vec2(4, 2));

        let mut arena = SampleArena::new();
        let mut decoder = DecoderLeaf::new(&mut arena, &setup, band, None).unwrap();
        let mut line = LineBuffer::declare(&mut arena, 4, 0, 0, SampleType::I32).unwrap();
        arena.finalize().unwrap();

        let mut materializer = arena.materializer().unwrap();
        decoder.bind(&mut materializer).unwrap();
        line.bind(&mut materializer).unwrap();

        let id = BlockId { component: 2, band: Default::default(), position: Vec2(0, 0) };
        let garbage = EncodedBlock { bytes: vec![1, 2, 3], pass_lengths: smallvec::smallvec![3], bit_planes: 30 };
        store.store(id.clone(), garbage).unwrap();

        match decoder.pull(&mut line, None) {
            Err(Error::Decode { block, .. }) => assert_eq!(block, id),
            other => panic!("expected a decoding error, got {:?}", other),
        }

        assert_eq!(decoder.state(), NodeState::Failed);
        assert!(decoder.pull(&mut line, None).unwrap_err().is_contract_violation());
    }
}
