
//! Transform several image components at once.
//!
//! A multi-component engine owns one tree per component, all sharing one arena,
//! and optionally decorrelates the first three components before analysis,
//! with the reversible colour transform for reversible kernels,
//! and the irreversible colour transform otherwise.

use crate::arena::SampleArena;
use crate::decomposition::Decomposition;
use crate::error::{Error, Result, UnitResult};
use crate::line::{with_representation, LineBuffer, Representation, Sample, SampleType};
use crate::math::Vec2;
use crate::scheduler::ThreadToken;
use crate::stage::{Pull, PullStage, Push, PushStage, TreeSetup};


/// Decorrelates the first three components of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColourTransform {

    /// Integer transform that can be inverted exactly.
    Reversible,

    /// Floating point transform from RGB to YCbCr.
    Irreversible,
}

/// Analysis of all components of an image.
/// Rows are supplied component by component, by filling `line_mut` and calling `push`.
#[derive(Debug)]
pub struct MultiAnalysis<'a> {
    trees: Vec<PushStage<'a>>,
    lines: Vec<LineBuffer<'a>>,
    sample_type: SampleType,
    colour_transform: Option<ColourTransform>,

    /// Which of the first three components already supplied the current row.
    supplied: [bool; 3],
}

/// Synthesis of all components of an image.
/// Rows are retrieved component by component with `pull`.
#[derive(Debug)]
pub struct MultiSynthesis<'a> {
    trees: Vec<PullStage<'a>>,
    lines: Vec<LineBuffer<'a>>,
    sample_type: SampleType,
    colour_transform: Option<ColourTransform>,

    /// Whether the current row of the first three components has been reconstructed.
    buffered: bool,
    delivered: [bool; 3],
}


impl ColourTransform {

    /// The transform that matches the kernel of a setup.
    pub fn for_setup(setup: &TreeSetup) -> Self {
        if setup.kernel.is_reversible() { ColourTransform::Reversible } else { ColourTransform::Irreversible }
    }

    /// Convert red, green and blue to luminance and two colour differences.
    pub fn forward<T: Sample>(self, [red, green, blue]: [T; 3]) -> [T; 3] {
        match self {
            ColourTransform::Reversible => {
                let [red, green, blue] = [red, green, blue].map(|sample| i64::from(sample.to_i32()));
                let luma = (red + 2 * green + blue) >> 2;
                [luma, blue - green, red - green].map(|value| T::from_i32(value as i32))
            },

            ColourTransform::Irreversible => {
                let [red, green, blue] = [red, green, blue].map(T::to_f32);

                [
                    0.299 * red + 0.587 * green + 0.114 * blue,
                    -0.168736 * red - 0.331264 * green + 0.5 * blue,
                    0.5 * red - 0.418688 * green - 0.081312 * blue,
                ]
                .map(T::from_f32)
            },
        }
    }

    /// Convert luminance and colour differences back to red, green and blue.
    pub fn inverse<T: Sample>(self, [luma, blue_difference, red_difference]: [T; 3]) -> [T; 3] {
        match self {
            ColourTransform::Reversible => {
                let [luma, blue_difference, red_difference] = [luma, blue_difference, red_difference]
                    .map(|sample| i64::from(sample.to_i32()));

                let green = luma - ((blue_difference + red_difference) >> 2);
                [red_difference + green, green, blue_difference + green].map(|value| T::from_i32(value as i32))
            },

            ColourTransform::Irreversible => {
                let [luma, blue_difference, red_difference] = [luma, blue_difference, red_difference].map(T::to_f32);

                [
                    luma + 1.402 * red_difference,
                    luma - 0.344136 * blue_difference - 0.714136 * red_difference,
                    luma + 1.772 * blue_difference,
                ]
                .map(T::from_f32)
            },
        }
    }

    /// Transform the first three lines in place.
    fn apply_to_lines(self, sample_type: SampleType, lines: &mut [LineBuffer<'_>], inverse: bool) -> UnitResult {
        with_representation!(sample_type, R => self.apply::<R>(lines, inverse))
    }

    fn apply<R: Representation>(self, lines: &mut [LineBuffer<'_>], inverse: bool) -> UnitResult {
        let (first, rest) = lines.split_at_mut(1);
        let (second, third) = rest.split_at_mut(1);

        let mut first = first[0].view_mut::<R>()?;
        let mut second = second[0].view_mut::<R>()?;
        let mut third = third[0].view_mut::<R>()?;

        let pixels = first.nominal_mut().iter_mut()
            .zip(second.nominal_mut().iter_mut())
            .zip(third.nominal_mut().iter_mut());

        for ((a, b), c) in pixels {
            let pixel = [*a, *b, *c];
            [*a, *b, *c] = if inverse { self.inverse(pixel) } else { self.forward(pixel) };
        }

        Ok(())
    }
}

/// Errors unless a colour transform can be applied to these components.
fn check_colour_components(sizes: &[Vec2<usize>]) -> UnitResult {
    if sizes.len() < 3 {
        return Err(Error::invalid("colour transform requires at least three components"));
    }

    if sizes[1] != sizes[0] || sizes[2] != sizes[0] {
        return Err(Error::invalid("colour transform requires the first three components to have the same size"));
    }

    Ok(())
}

fn check_component(component: usize, count: usize) -> UnitResult {
    if component >= count {
        return Err(Error::contract(format!("component {} does not exist, there are only {}", component, count)));
    }

    Ok(())
}


impl<'a> MultiAnalysis<'a> {

    /// Build one analysis tree per component, then finalize the arena and bind all trees.
    /// The arena must be in its reservation phase.
    #[tracing::instrument(level = "debug", skip(arena, setup, decomposition, token))]
    pub fn new(
        arena: &'a mut SampleArena, setup: &TreeSetup, decomposition: &Decomposition,
        sizes: &[Vec2<usize>], colour_transform: bool, token: Option<&ThreadToken>,
    ) -> Result<Self>
    {
        if colour_transform { check_colour_components(sizes)?; }
        let sample_type = setup.options.sample_type;

        let mut trees = sizes.iter().enumerate()
            .map(|(component, &size)| PushStage::new(arena, setup, decomposition, component, size, token))
            .collect::<Result<Vec<_>>>()?;

        let mut lines = sizes.iter()
            .map(|size| LineBuffer::declare(arena, size.width(), 0, 0, sample_type))
            .collect::<Result<Vec<_>>>()?;

        arena.finalize()?;
        let mut materializer = arena.materializer()?;
        for tree in &mut trees { tree.bind(&mut materializer)?; }
        for line in &mut lines { line.bind(&mut materializer)?; }

        Ok(MultiAnalysis {
            trees, lines, sample_type,
            colour_transform: colour_transform.then(|| ColourTransform::for_setup(setup)),
            supplied: [false; 3],
        })
    }

    /// Number of components.
    pub fn component_count(&self) -> usize { self.trees.len() }

    /// The size of a component.
    pub fn size(&self, component: usize) -> Result<Vec2<usize>> {
        check_component(component, self.trees.len())?;
        Ok(self.trees[component].size())
    }

    /// The line to fill with the next row of a component, before calling `push`.
    pub fn line_mut(&mut self, component: usize) -> Result<&mut LineBuffer<'a>> {
        check_component(component, self.lines.len())?;
        Ok(&mut self.lines[component])
    }

    /// Process the row that was written to `line_mut(component)`.
    /// With a colour transform, the first three components are transformed and pushed together,
    /// once each of them has supplied its row.
    pub fn push(&mut self, component: usize, token: Option<&ThreadToken>) -> UnitResult {
        check_component(component, self.trees.len())?;

        let transform = match self.colour_transform {
            Some(transform) if component < 3 => transform,
            _ => return self.trees[component].push(&self.lines[component], token),
        };

        if self.supplied[component] {
            return Err(Error::contract(format!(
                "component {} supplied another row before components 0 to 2 completed theirs", component
            )));
        }

        self.supplied[component] = true;
        if self.supplied.contains(&false) { return Ok(()); }

        self.supplied = [false; 3];
        transform.apply_to_lines(self.sample_type, &mut self.lines[.. 3], false)?;

        for component in 0 .. 3 {
            self.trees[component].push(&self.lines[component], token)?;
        }

        Ok(())
    }
}

impl<'a> MultiSynthesis<'a> {

    /// Build one synthesis tree per component, then finalize the arena and bind all trees.
    /// The arena must be in its reservation phase.
    #[tracing::instrument(level = "debug", skip(arena, setup, decomposition, token))]
    pub fn new(
        arena: &'a mut SampleArena, setup: &TreeSetup, decomposition: &Decomposition,
        sizes: &[Vec2<usize>], colour_transform: bool, token: Option<&ThreadToken>,
    ) -> Result<Self>
    {
        if colour_transform { check_colour_components(sizes)?; }
        let sample_type = setup.options.sample_type;

        let mut trees = sizes.iter().enumerate()
            .map(|(component, &size)| PullStage::new(arena, setup, decomposition, component, size, token))
            .collect::<Result<Vec<_>>>()?;

        let mut lines = sizes.iter()
            .map(|size| LineBuffer::declare(arena, size.width(), 0, 0, sample_type))
            .collect::<Result<Vec<_>>>()?;

        arena.finalize()?;
        let mut materializer = arena.materializer()?;
        for tree in &mut trees { tree.bind(&mut materializer)?; }
        for line in &mut lines { line.bind(&mut materializer)?; }

        Ok(MultiSynthesis {
            trees, lines, sample_type,
            colour_transform: colour_transform.then(|| ColourTransform::for_setup(setup)),
            buffered: false,
            delivered: [false; 3],
        })
    }

    /// Number of components.
    pub fn component_count(&self) -> usize { self.trees.len() }

    /// The size of a component.
    pub fn size(&self, component: usize) -> Result<Vec2<usize>> {
        check_component(component, self.trees.len())?;
        Ok(self.trees[component].size())
    }

    /// Begin decoding the first code-blocks of every component.
    pub fn start(&mut self, token: Option<&ThreadToken>) -> UnitResult {
        self.trees.iter_mut().try_for_each(|tree| tree.start(token))
    }

    /// Reconstruct the next row of a component.
    /// The returned line stays valid until the next call.
    pub fn pull(&mut self, component: usize, token: Option<&ThreadToken>) -> Result<&LineBuffer<'a>> {
        check_component(component, self.trees.len())?;

        let transform = match self.colour_transform {
            Some(transform) if component < 3 => transform,

            _ => {
                self.trees[component].pull(&mut self.lines[component], token)?;
                return Ok(&self.lines[component]);
            }
        };

        if !self.buffered {
            for index in 0 .. 3 {
                self.trees[index].pull(&mut self.lines[index], token)?;
            }

            transform.apply_to_lines(self.sample_type, &mut self.lines[.. 3], true)?;
            self.buffered = true;
            self.delivered = [false; 3];
        }

        if self.delivered[component] {
            return Err(Error::contract(format!(
                "component {} requested another row before components 0 to 2 retrieved theirs", component
            )));
        }

        self.delivered[component] = true;
        if !self.delivered.contains(&false) { self.buffered = false; }

        Ok(&self.lines[component])
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reversible_colour_transform_is_exact(){
        let transform = ColourTransform::Reversible;

        for pixel in [[0, 0, 0], [255, 0, 17], [-3, 100, -128], [1, 2, 3], [32767, -32768, 5]] {
            let transformed = transform.forward::<i32>(pixel);
            assert_eq!(transform.inverse(transformed), pixel);
        }

        assert_eq!(transform.forward::<i32>([10, 20, 30]), [20, 10, -10]);
    }

    #[test]
    fn irreversible_colour_transform_is_close(){
        let transform = ColourTransform::Irreversible;
        let pixel = [0.25_f32, -0.5, 0.125];

        let restored = transform.inverse(transform.forward(pixel));
        for (restored, original) in restored.iter().zip(&pixel) {
            assert!((restored - original).abs() < 1.0e-4);
        }

        let [luma, ..] = transform.forward([1.0_f32, 1.0, 1.0]);
        assert!((luma - 1.0).abs() < 1.0e-5);
    }

    #[test]
    fn colour_transform_needs_three_equal_components(){
        assert!(check_colour_components(&[Vec2(4, 4), Vec2(4, 4)]).is_err());
        assert!(check_colour_components(&[Vec2(4, 4), Vec2(4, 4), Vec2(2, 4)]).is_err());
        assert!(check_colour_components(&[Vec2(4, 4), Vec2(4, 4), Vec2(4, 4), Vec2(1, 1)]).is_ok());
    }
}
