
//! Lifting along lines and along the sequence of lines.
//!
//! Horizontal lifting deinterleaves a line into its even and odd samples,
//! which are kept in two halo-padded lines, and then lifts these in place.
//!
//! Vertical lifting is streamed. Every lifting step is a `VerticalStep` with a small ring of lines,
//! just large enough to hold all rows that the next row to leave the step depends on.
//! Rows travel through the steps in increasing order, one copy per step.

use std::mem;

use smallvec::SmallVec;

use crate::arena::{Materializer, SampleArena};
use crate::decomposition::Split;
use crate::error::{Error, Result, UnitResult};
use crate::kernel::{Direction, Kernel, LiftingStep};
use crate::line::{BoundaryExtension, LineBuffer, LineMut, Representation, Sample, SampleType};
use crate::math::{RoundingMode, Vec2};


/// The lifting machinery of one transform node.
#[derive(Debug)]
pub(crate) enum Lifting<'a> {

    /// Rows are forwarded unchanged.
    PassThrough,

    /// Every row is split into low and high samples.
    Horizontal(HorizontalLifting<'a>),

    /// The sequence of rows is split into low and high rows.
    Vertical(VerticalCascade<'a>),

    /// Every row is split horizontally, then the low and high halves are each lifted vertically.
    Both(HorizontalLifting<'a>, [VerticalCascade<'a>; 2]),
}

/// Lifts single lines, keeping the low and high samples in separate lines.
#[derive(Debug)]
pub(crate) struct HorizontalLifting<'a> {
    width: usize,
    kernel: Kernel,
    low: LineBuffer<'a>,
    high: LineBuffer<'a>,
}

/// Lifts a sequence of rows, one row at a time.
#[derive(Debug)]
pub(crate) struct VerticalCascade<'a> {
    height: usize,
    kernel: Kernel,
    direction: Direction,

    /// In processing order. Empty if there are less than two rows.
    steps: Vec<VerticalStep<'a>>,

    /// Holds the scaled copy of an outgoing row of an irreversible analysis.
    output: LineBuffer<'a>,
}

#[derive(Debug)]
struct VerticalStep<'a> {

    /// Index of the step in analysis order, which decides the parity it updates.
    index: usize,
    step: LiftingStep,
    reach: usize,

    /// Row `r` is held in slot `r % ring.len()`.
    ring: Vec<LineBuffer<'a>>,
    received: usize,
    emitted: usize,
}


impl<'a> Lifting<'a> {

    /// Declare all lines required to lift rows of the specified size.
    pub fn declare(
        arena: &mut SampleArena, split: Split, size: Vec2<usize>,
        kernel: &Kernel, sample_type: SampleType, direction: Direction,
    ) -> Result<Self>
    {
        let cascade = |arena: &mut SampleArena, width: usize| {
            VerticalCascade::declare(arena, width, size.height(), kernel, sample_type, direction)
        };

        Ok(match split {
            Split::None => Lifting::PassThrough,
            Split::Horizontal => Lifting::Horizontal(HorizontalLifting::declare(arena, size.width(), kernel, sample_type)?),
            Split::Vertical => Lifting::Vertical(cascade(arena, size.width())?),

            Split::Both => {
                let horizontal = HorizontalLifting::declare(arena, size.width(), kernel, sample_type)?;
                let low = cascade(arena, horizontal.low.width())?;
                let high = cascade(arena, horizontal.high.width())?;
                Lifting::Both(horizontal, [low, high])
            }
        })
    }

    /// Bind all lines, in declaration order.
    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        match self {
            Lifting::PassThrough => Ok(()),
            Lifting::Horizontal(horizontal) => horizontal.bind(materializer),
            Lifting::Vertical(vertical) => vertical.bind(materializer),

            Lifting::Both(horizontal, [low, high]) => {
                horizontal.bind(materializer)?;
                low.bind(materializer)?;
                high.bind(materializer)
            }
        }
    }
}


impl<'a> HorizontalLifting<'a> {

    pub fn declare(arena: &mut SampleArena, width: usize, kernel: &Kernel, sample_type: SampleType) -> Result<Self> {
        let halo = kernel.halo();
        let low = LineBuffer::declare(arena, RoundingMode::Up.divide(width, 2), halo, halo, sample_type)?;
        let high = LineBuffer::declare(arena, RoundingMode::Down.divide(width, 2), halo, halo, sample_type)?;
        Ok(HorizontalLifting { width, kernel: kernel.clone(), low, high })
    }

    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        self.low.bind(materializer)?;
        self.high.bind(materializer)
    }

    /// The even samples, after analysis.
    pub fn low(&self) -> &LineBuffer<'a> { &self.low }

    /// The odd samples, after analysis.
    pub fn high(&self) -> &LineBuffer<'a> { &self.high }

    /// The even samples, to be filled before synthesis.
    pub fn low_mut(&mut self) -> &mut LineBuffer<'a> { &mut self.low }

    /// The odd samples, to be filled before synthesis.
    pub fn high_mut(&mut self) -> &mut LineBuffer<'a> { &mut self.high }

    /// Split a line into the low and the high line.
    pub fn analyze<R: Representation>(&mut self, input: &LineBuffer<'_>) -> UnitResult {
        {
            let input = input.view::<R>()?;
            let samples = input.nominal();

            let mut low = self.low.view_mut::<R>()?;
            let mut high = self.high.view_mut::<R>()?;

            for (target, &sample) in low.nominal_mut().iter_mut().zip(samples.iter().step_by(2)) { *target = sample; }
            for (target, &sample) in high.nominal_mut().iter_mut().zip(samples.iter().skip(1).step_by(2)) { *target = sample; }
        }

        if self.width < 2 { return Ok(()); }

        for index in 0 .. self.kernel.steps().len() {
            self.lift::<R>(index, Direction::Analysis)?;
        }

        if !self.kernel.is_reversible() {
            scale::<R>(&mut self.low, self.kernel.low_scale())?;
            scale::<R>(&mut self.high, self.kernel.high_scale())?;
        }

        Ok(())
    }

    /// Merge the low and the high line into the output line.
    pub fn synthesize<R: Representation>(&mut self, output: &mut LineBuffer<'_>) -> UnitResult {
        if self.width >= 2 {
            if !self.kernel.is_reversible() {
                scale::<R>(&mut self.low, self.kernel.low_scale().recip())?;
                scale::<R>(&mut self.high, self.kernel.high_scale().recip())?;
            }

            for index in (0 .. self.kernel.steps().len()).rev() {
                self.lift::<R>(index, Direction::Synthesis)?;
            }
        }

        let low = self.low.view::<R>()?;
        let high = self.high.view::<R>()?;
        let mut output = output.view_mut::<R>()?;

        let samples = output.nominal_mut();
        for (target, &sample) in samples.iter_mut().step_by(2).zip(low.nominal()) { *target = sample; }
        for (target, &sample) in samples.iter_mut().skip(1).step_by(2).zip(high.nominal()) { *target = sample; }

        Ok(())
    }

    fn lift<R: Representation>(&mut self, index: usize, direction: Direction) -> UnitResult {
        let step = &self.kernel.steps()[index];
        let source_parity = index & 1;
        let (source, target) = if source_parity == 0 { (&mut self.low, &mut self.high) } else { (&mut self.high, &mut self.low) };

        extend_subsequence(&mut source.view_mut::<R>()?, source_parity, self.width, self.kernel.extension());

        let source = source.view::<R>()?;
        let mut target = target.view_mut::<R>()?;
        let length = target.width();

        let taps: SmallVec<[&[R::Sample]; 4]> = (0 .. step.support_length())
            .map(|n| source.window(step.support_min as isize + n as isize, length))
            .collect();

        step.apply(self.kernel.is_reversible(), direction, target.nominal_mut(), &taps);
        Ok(())
    }
}


impl<'a> VerticalCascade<'a> {

    pub fn declare(
        arena: &mut SampleArena, width: usize, height: usize,
        kernel: &Kernel, sample_type: SampleType, direction: Direction,
    ) -> Result<Self>
    {
        let mut steps = Vec::new();

        if height >= 2 {
            let mut order: Vec<usize> = (0 .. kernel.steps().len()).collect();
            if direction == Direction::Synthesis { order.reverse(); }

            for index in order {
                let step = kernel.steps()[index].clone();
                let reach = step.reach(index);

                let ring = (0 .. (2 * reach + 1).min(height))
                    .map(|_| LineBuffer::declare(arena, width, 0, 0, sample_type))
                    .collect::<Result<Vec<_>>>()?;

                steps.push(VerticalStep { index, step, reach, ring, received: 0, emitted: 0 });
            }
        }

        let output =
            if direction == Direction::Analysis && !kernel.is_reversible() && !steps.is_empty() {
                LineBuffer::declare(arena, width, 0, 0, sample_type)?
            }
            else {
                LineBuffer::empty()
            };

        Ok(VerticalCascade { height, kernel: kernel.clone(), direction, steps, output })
    }

    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        for step in &mut self.steps {
            for line in &mut step.ring {
                line.bind(materializer)?;
            }
        }

        self.output.bind(materializer)
    }

    /// Feed the next row of an analysis.
    /// Calls `emit` for every row that leaves the cascade, with the row index.
    /// Even rows are low-pass, odd rows are high-pass.
    pub fn push<R: Representation>(
        &mut self, line: &LineBuffer<'_>,
        mut emit: impl FnMut(usize, &LineBuffer<'_>) -> UnitResult
    ) -> UnitResult
    {
        // a single row is the low band on its own
        if self.steps.is_empty() { return emit(0, line); }

        self.pump::<R>(&mut emit)?;

        let height = self.height;
        let first = &mut self.steps[0];

        if !first.can_accept(height) {
            return Err(Error::contract("vertical lifting received more rows than declared"));
        }

        first.accept(line)?;
        self.pump::<R>(&mut emit)
    }

    /// Move rows through the steps until no step can make progress.
    fn pump<R: Representation>(&mut self, emit: &mut impl FnMut(usize, &LineBuffer<'_>) -> UnitResult) -> UnitResult {
        let VerticalCascade { height, kernel, direction, steps, output } = self;

        loop {
            let mut progressed = false;

            // drain the last steps first, to make room for the earlier ones
            for index in (0 .. steps.len()).rev() {
                let (head, tail) = steps.split_at_mut(index + 1);
                let current = &mut head[index];

                while current.can_emit(*height) && tail.first().map_or(true, |next| next.can_accept(*height)) {
                    let (row, line) = current.emit::<R>(*height, kernel, *direction)?;

                    match tail.first_mut() {
                        Some(next) => next.accept(line)?,

                        None if kernel.is_reversible() => emit(row, line)?,

                        None => {
                            output.copy_from(line)?;
                            scale::<R>(output, band_scale(kernel, row))?;
                            emit(row, output)?;
                        }
                    }

                    progressed = true;
                }
            }

            if !progressed { return Ok(()); }
        }
    }

    /// Produce the next row of a synthesis.
    /// Calls `fetch` to obtain the row with the specified index from the low or the high band.
    pub fn pull<R: Representation>(
        &mut self, output: &mut LineBuffer<'_>,
        mut fetch: impl FnMut(usize, &mut LineBuffer<'_>) -> UnitResult
    ) -> UnitResult
    {
        if self.steps.is_empty() { return fetch(0, output); }

        let VerticalCascade { height, kernel, direction, steps, .. } = self;
        make_ready::<R>(steps, *height, kernel, *direction, &mut fetch)?;

        let last = steps.last_mut()
            .ok_or_else(|| Error::contract("vertical lifting without steps"))?;

        let (_, line) = last.emit::<R>(*height, kernel, *direction)?;
        output.copy_from(line)
    }
}

/// Ensure that the last step in the slice can emit its next row,
/// pulling rows through the earlier steps and from the bands as required.
fn make_ready<R: Representation>(
    steps: &mut [VerticalStep<'_>], height: usize, kernel: &Kernel, direction: Direction,
    fetch: &mut dyn FnMut(usize, &mut LineBuffer<'_>) -> UnitResult,
) -> UnitResult
{
    let (current, previous) = match steps.split_last_mut() {
        Some(split) => split,
        None => return Ok(()),
    };

    while !current.can_emit(height) {
        if !current.can_accept(height) {
            return Err(Error::contract("vertical lifting was asked for more rows than declared"));
        }

        if let Some(source) = previous.last() {
            debug_assert!(source.emitted == current.received);
            make_ready::<R>(previous, height, kernel, direction, fetch)?;

            let source = previous.last_mut().ok_or_else(|| Error::contract("missing lifting step"))?;
            let (_, line) = source.emit::<R>(height, kernel, direction)?;
            current.accept(line)?;
        }
        else {
            let row = current.received;

            current.accept_with(|line| {
                fetch(row, line)?;

                if kernel.is_reversible() { Ok(()) }
                else { scale::<R>(line, band_scale(kernel, row).recip()) }
            })?;
        }
    }

    Ok(())
}


impl<'a> VerticalStep<'a> {

    fn can_accept(&self, height: usize) -> bool {
        self.received < height && self.received <= self.emitted + self.reach
    }

    fn can_emit(&self, height: usize) -> bool {
        self.emitted < self.received && (self.received == height || self.received > self.emitted + self.reach)
    }

    fn slot(&self, row: usize) -> usize { row % self.ring.len() }

    fn accept(&mut self, line: &LineBuffer<'_>) -> UnitResult {
        self.accept_with(|slot| slot.copy_from(line))
    }

    fn accept_with(&mut self, fill: impl FnOnce(&mut LineBuffer<'a>) -> UnitResult) -> UnitResult {
        let slot = self.slot(self.received);
        fill(&mut self.ring[slot])?;
        self.received += 1;
        Ok(())
    }

    /// Release the next row, updating it first if this step targets its parity.
    fn emit<R: Representation>(&mut self, height: usize, kernel: &Kernel, direction: Direction) -> Result<(usize, &LineBuffer<'a>)> {
        let row = self.emitted;
        let slot = self.slot(row);

        if row % 2 != self.index % 2 {
            // take the target out of the ring, so that its sources can be borrowed alongside
            let mut target = mem::replace(&mut self.ring[slot], LineBuffer::empty());
            let result = self.update::<R>(&mut target, row, height, kernel, direction);
            self.ring[slot] = target;
            result?;
        }

        self.emitted += 1;
        Ok((row, &self.ring[slot]))
    }

    fn update<R: Representation>(
        &self, target: &mut LineBuffer<'a>, row: usize, height: usize,
        kernel: &Kernel, direction: Direction
    ) -> UnitResult
    {
        let source_parity = self.index % 2;

        let sources = (0 .. self.step.support_length())
            .map(|n| {
                let offset = LiftingStep::tap_offset(self.index, self.step.support_min + n as i32);
                let neighbour = (row as isize + offset - source_parity as isize).div_euclid(2);
                let source_row = 2 * extended_index(neighbour, source_parity, height, kernel.extension()) + source_parity;

                debug_assert!(source_row < self.received && source_row + self.ring.len() >= self.received);
                self.ring[self.slot(source_row)].view::<R>().map(|line| line.nominal())
            })
            .collect::<Result<SmallVec<[&[R::Sample]; 4]>>>()?;

        let mut target = target.view_mut::<R>()?;
        self.step.apply(kernel.is_reversible(), direction, target.nominal_mut(), &sources);
        Ok(())
    }
}


/// Map the index of a sample within the even (`parity = 0`) or odd subsequence of an
/// interleaved sequence of `total` samples to a valid subsequence index, extending the boundaries.
/// Symmetric extension mirrors in the interleaved domain, which preserves the parity.
pub(crate) fn extended_index(index: isize, parity: usize, total: usize, extension: BoundaryExtension) -> usize {
    match extension {
        BoundaryExtension::Symmetric => {
            let interleaved = extension.source_index(2 * index + parity as isize, total);
            interleaved.saturating_sub(parity) / 2
        },

        BoundaryExtension::Replicate => {
            let length = if parity == 0 { RoundingMode::Up.divide(total, 2) } else { RoundingMode::Down.divide(total, 2) };
            index.clamp(0, length.max(1) as isize - 1) as usize
        },
    }
}

/// Fill the halos of a subsequence line from its own samples.
fn extend_subsequence<T: Sample>(line: &mut LineMut<'_, T>, parity: usize, total: usize, extension: BoundaryExtension) {
    if line.width() == 0 { return; }

    let halo_indices = (line.first_index() .. 0).chain(line.width() as isize .. line.end_index());
    for index in halo_indices {
        let source = extended_index(index, parity, total, extension) as isize;
        line[index] = line.at(source);
    }
}

/// The factor an analysis applies to the row with the specified index.
fn band_scale(kernel: &Kernel, row: usize) -> f32 {
    if row % 2 == 0 { kernel.low_scale() } else { kernel.high_scale() }
}

/// Multiply every nominal sample with the factor.
fn scale<R: Representation>(line: &mut LineBuffer<'_>, factor: f32) -> UnitResult {
    for sample in line.view_mut::<R>()?.nominal_mut() {
        *sample = <R::Sample as Sample>::from_f32(sample.to_f32() * factor);
    }

    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::line::{Absolute32, Float32};

    #[test]
    fn symmetric_extension_preserves_parity(){
        // interleaved: 0 1 2 3 4 5 6 7 8, even subsequence has 5, odd has 4 samples
        assert_eq!(extended_index(-1, 0, 9, BoundaryExtension::Symmetric), 1);
        assert_eq!(extended_index(5, 0, 9, BoundaryExtension::Symmetric), 3);
        assert_eq!(extended_index(-1, 1, 9, BoundaryExtension::Symmetric), 0);
        assert_eq!(extended_index(4, 1, 9, BoundaryExtension::Symmetric), 3);
        assert_eq!(extended_index(4, 1, 8, BoundaryExtension::Symmetric), 2);
    }

    #[test]
    fn replicate_extension_clamps_the_subsequence(){
        assert_eq!(extended_index(-2, 0, 9, BoundaryExtension::Replicate), 0);
        assert_eq!(extended_index(7, 0, 9, BoundaryExtension::Replicate), 4);
        assert_eq!(extended_index(7, 1, 9, BoundaryExtension::Replicate), 3);
    }

    fn horizontal_round_trip<R: Representation>(kernel: Kernel, sample_type: SampleType, values: &[R::Sample]) -> (Vec<R::Sample>, Vec<R::Sample>, Vec<R::Sample>) {
        let mut arena = SampleArena::new();
        let mut lifting = HorizontalLifting::declare(&mut arena, values.len(), &kernel, sample_type).unwrap();
        let mut line = LineBuffer::declare(&mut arena, values.len(), 0, 0, sample_type).unwrap();
        arena.finalize().unwrap();

        let mut materializer = arena.materializer().unwrap();
        lifting.bind(&mut materializer).unwrap();
        line.bind(&mut materializer).unwrap();

        line.view_mut::<R>().unwrap().nominal_mut().copy_from_slice(values);
        lifting.analyze::<R>(&line).unwrap();

        let low = lifting.low().view::<R>().unwrap().nominal().to_vec();
        let high = lifting.high().view::<R>().unwrap().nominal().to_vec();

        line.view_mut::<R>().unwrap().nominal_mut().iter_mut().for_each(|sample| *sample = Default::default());
        lifting.synthesize::<R>(&mut line).unwrap();
        (low, high, line.view::<R>().unwrap().nominal().to_vec())
    }

    #[test]
    fn horizontal_w5x3_is_exact(){
        let values = [3, 9, -4, 100, 7, 7, 0, -31, 12];
        let (low, high, reconstructed) = horizontal_round_trip::<Absolute32>(Kernel::w5x3(), SampleType::I32, &values);

        assert_eq!(low.len(), 5);
        assert_eq!(high.len(), 4);
        assert_eq!(reconstructed, values);

        // first high sample: 9 - floor((3 - 4) / 2)
        assert_eq!(high[0], 10);
    }

    #[test]
    fn horizontal_w5x3_constant_line(){
        let values = [100; 6];
        let (low, high, _) = horizontal_round_trip::<Absolute32>(Kernel::w5x3(), SampleType::I32, &values);
        assert_eq!(low, vec![100; 3]);
        assert_eq!(high, vec![0; 3]);
    }

    #[test]
    fn horizontal_w9x7_with_replicate_extension(){
        let values: Vec<f32> = (0 .. 11).map(|index| (index as f32 * 0.37).sin() * 0.5).collect();
        let kernel = Kernel::w9x7().with_extension(BoundaryExtension::Replicate);
        let (_, _, reconstructed) = horizontal_round_trip::<Float32>(kernel, SampleType::F32, &values);

        for (original, reconstructed) in values.iter().zip(reconstructed) {
            assert!((original - reconstructed).abs() < 1.0e-5);
        }
    }

    fn vertical_round_trip(height: usize, extension: BoundaryExtension) {
        let kernel = Kernel::w5x3().with_extension(extension);
        let width = 3;

        let rows: Vec<Vec<i32>> = (0 .. height)
            .map(|row| (0 .. width).map(|column| ((row * 7 + column * 13) % 23) as i32 - 11).collect())
            .collect();

        let mut arena = SampleArena::new();
        let mut analysis = VerticalCascade::declare(&mut arena, width, height, &kernel, SampleType::I32, Direction::Analysis).unwrap();
        let mut synthesis = VerticalCascade::declare(&mut arena, width, height, &kernel, SampleType::I32, Direction::Synthesis).unwrap();
        let mut line = LineBuffer::declare(&mut arena, width, 0, 0, SampleType::I32).unwrap();
        arena.finalize().unwrap();

        let mut materializer = arena.materializer().unwrap();
        analysis.bind(&mut materializer).unwrap();
        synthesis.bind(&mut materializer).unwrap();
        line.bind(&mut materializer).unwrap();

        let mut bands: [Vec<Vec<i32>>; 2] = [Vec::new(), Vec::new()];
        for row in &rows {
            line.view_mut::<Absolute32>().unwrap().nominal_mut().copy_from_slice(row);

            analysis.push::<Absolute32>(&line, |index, output| {
                assert_eq!(index, bands[0].len() + bands[1].len(), "rows leave in order");
                bands[index % 2].push(output.view::<Absolute32>()?.nominal().to_vec());
                Ok(())
            }).unwrap();
        }

        assert_eq!(bands[0].len(), RoundingMode::Up.divide(height, 2));
        assert_eq!(bands[1].len(), height / 2);

        for row in &rows {
            synthesis.pull::<Absolute32>(&mut line, |index, target| {
                let band = &bands[index % 2][index / 2];
                target.view_mut::<Absolute32>()?.nominal_mut().copy_from_slice(band);
                Ok(())
            }).unwrap();

            assert_eq!(line.view::<Absolute32>().unwrap().nominal(), row.as_slice());
        }
    }

    #[test]
    fn vertical_streaming_is_exact_for_any_height(){
        for height in 1 .. 12 {
            vertical_round_trip(height, BoundaryExtension::Symmetric);
            vertical_round_trip(height, BoundaryExtension::Replicate);
        }
    }
}
