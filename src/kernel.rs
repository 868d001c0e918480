
//! Wavelet kernels described as a sequence of lifting steps.
//!
//! Step `s` updates the samples of parity `1 - p`, where `p = s & 1`, from the samples of parity `p`:
//! `X[2k+1-p] += sum over n in support of C[n] * X[2k+p+2n]`.
//! Reversible kernels use integer coefficients, `X += (rounding_offset + sum) >> downshift`,
//! and are undone exactly by subtracting the same update in reverse step order.

use smallvec::SmallVec;

use crate::error::{Error, Result, UnitResult};
use crate::line::{BoundaryExtension, Sample};


/// Coefficient tables are short for all practical kernels.
pub type Coefficients = SmallVec<[f32; 4]>;

/// One lifting step of a kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct LiftingStep {

    /// Offset `n` of the first coefficient.
    /// The support runs from `support_min` to `support_min + coefficients.len() - 1`.
    pub support_min: i32,

    /// The coefficient of every tap, starting at `support_min`.
    pub coefficients: Coefficients,

    /// Only for reversible kernels: the integer coefficients are `coefficients * 2^downshift`.
    pub downshift: u32,

    /// Only for reversible kernels: added to the integer sum before downshifting.
    pub rounding_offset: i32,
}

/// Whether samples are being decomposed or reconstructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {

    /// Forward transform, adds the lifting update.
    Analysis,

    /// Inverse transform, subtracts the lifting update.
    Synthesis,
}

/// A wavelet kernel and the boundary extension used with it.
/// Fixed at tree construction and only read afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    steps: SmallVec<[LiftingStep; 4]>,
    reversible: bool,
    low_scale: f32,
    high_scale: f32,
    extension: BoundaryExtension,
}


impl LiftingStep {

    /// Create a step with the specified support and coefficients, for irreversible kernels.
    pub fn irreversible(support_min: i32, coefficients: &[f32]) -> Self {
        LiftingStep { support_min, coefficients: SmallVec::from_slice(coefficients), downshift: 0, rounding_offset: 0 }
    }

    /// Create a step whose coefficients are exact multiples of `2^-downshift`.
    pub fn reversible(support_min: i32, coefficients: &[f32], downshift: u32, rounding_offset: i32) -> Self {
        LiftingStep { support_min, coefficients: SmallVec::from_slice(coefficients), downshift, rounding_offset }
    }

    /// Number of taps.
    pub fn support_length(&self) -> usize { self.coefficients.len() }

    /// Offset `n` of the last coefficient.
    pub fn support_max(&self) -> i32 { self.support_min + self.coefficients.len() as i32 - 1 }

    /// The coefficients scaled by `2^downshift`, as used by reversible kernels.
    pub fn integer_coefficients(&self) -> SmallVec<[i32; 4]> {
        let factor = (1_u64 << self.downshift) as f32;
        self.coefficients.iter().map(|&coefficient| (coefficient * factor).round() as i32).collect()
    }

    /// Offset in interleaved samples, relative to an updated sample,
    /// at which the tap `n` of the step with index `step_index` reads.
    pub fn tap_offset(step_index: usize, n: i32) -> isize {
        let parity = (step_index & 1) as isize;
        2 * parity - 1 + 2 * n as isize
    }

    /// The largest distance, in interleaved samples, between an updated sample and a sample it reads.
    pub fn reach(&self, step_index: usize) -> usize {
        let first = Self::tap_offset(step_index, self.support_min).unsigned_abs();
        let last = Self::tap_offset(step_index, self.support_max()).unsigned_abs();
        first.max(last)
    }

    /// Update every target sample from the source samples.
    /// `sources[n]` holds, for every target sample, the value of tap `n`.
    pub(crate) fn apply<T: Sample>(&self, reversible: bool, direction: Direction, target: &mut [T], sources: &[&[T]]) {
        debug_assert_eq!(sources.len(), self.support_length());
        debug_assert!(sources.iter().all(|source| source.len() == target.len()));

        if reversible {
            let coefficients = self.integer_coefficients();

            for (index, sample) in target.iter_mut().enumerate() {
                let sum: i32 = coefficients.iter().zip(sources)
                    .map(|(&coefficient, source)| coefficient * source[index].to_i32())
                    .sum();

                let update = (self.rounding_offset + sum) >> self.downshift;

                *sample = T::from_i32(match direction {
                    Direction::Analysis => sample.to_i32() + update,
                    Direction::Synthesis => sample.to_i32() - update,
                });
            }
        }
        else {
            for (index, sample) in target.iter_mut().enumerate() {
                let update: f32 = self.coefficients.iter().zip(sources)
                    .map(|(&coefficient, source)| coefficient * source[index].to_f32())
                    .sum();

                *sample = T::from_f32(match direction {
                    Direction::Analysis => sample.to_f32() + update,
                    Direction::Synthesis => sample.to_f32() - update,
                });
            }
        }
    }

    fn validate(&self, reversible: bool) -> UnitResult {
        if self.coefficients.is_empty() {
            return Err(Error::invalid("lifting step without coefficients"));
        }

        if self.coefficients.iter().any(|coefficient| !coefficient.is_finite()) {
            return Err(Error::invalid("lifting coefficient is not finite"));
        }

        if reversible {
            if self.downshift > 16 {
                return Err(Error::invalid("reversible lifting step downshift is larger than 16"));
            }

            let factor = (1_u64 << self.downshift) as f32;
            let representable = self.coefficients.iter()
                .all(|&coefficient| ((coefficient * factor).round() - coefficient * factor).abs() < 1.0e-4);

            if !representable {
                return Err(Error::invalid("reversible lifting coefficient is not a multiple of 2^-downshift"));
            }
        }

        Ok(())
    }
}


impl Kernel {

    /// The reversible 5/3 kernel (LeGall), with symmetric extension.
    pub fn w5x3() -> Self {
        Kernel {
            steps: smallvec::smallvec![
                LiftingStep::reversible(0, &[-0.5, -0.5], 1, 1),
                LiftingStep::reversible(-1, &[0.25, 0.25], 2, 2),
            ],

            reversible: true,
            low_scale: 1.0,
            high_scale: 1.0,
            extension: BoundaryExtension::Symmetric,
        }
    }

    /// The irreversible 9/7 kernel (CDF), with symmetric extension.
    /// Bands are scaled to unit gain at DC for the low band and at Nyquist for the high band.
    pub fn w9x7() -> Self {
        const ALPHA: f32 = -1.586_134_342;
        const BETA: f32 = -0.052_980_118;
        const GAMMA: f32 = 0.882_911_075;
        const DELTA: f32 = 0.443_506_852;
        const K: f32 = 1.230_174_104_914_001;

        Kernel {
            steps: smallvec::smallvec![
                LiftingStep::irreversible(0, &[ALPHA, ALPHA]),
                LiftingStep::irreversible(-1, &[BETA, BETA]),
                LiftingStep::irreversible(0, &[GAMMA, GAMMA]),
                LiftingStep::irreversible(-1, &[DELTA, DELTA]),
            ],

            reversible: false,
            low_scale: 1.0 / K,
            high_scale: K / 2.0,
            extension: BoundaryExtension::Symmetric,
        }
    }

    /// Create a custom kernel. Scales are ignored by reversible kernels.
    /// Errors if a step has no coefficients, or a reversible step has non-integral coefficients.
    pub fn new(steps: &[LiftingStep], reversible: bool, low_scale: f32, high_scale: f32) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::invalid("kernel without lifting steps"));
        }

        for step in steps {
            step.validate(reversible)?;
        }

        let valid_scale = |scale: f32| scale.is_finite() && scale != 0.0;
        if !reversible && !(valid_scale(low_scale) && valid_scale(high_scale)) {
            return Err(Error::invalid("kernel scale factors must be finite and non-zero"));
        }

        let (low_scale, high_scale) = if reversible { (1.0, 1.0) } else { (low_scale, high_scale) };

        Ok(Kernel {
            steps: steps.iter().cloned().collect(), reversible, low_scale, high_scale,
            extension: BoundaryExtension::Symmetric,
        })
    }

    /// Use another boundary extension policy with this kernel.
    pub fn with_extension(self, extension: BoundaryExtension) -> Self {
        Kernel { extension, ..self }
    }

    /// The lifting steps, in analysis order.
    pub fn steps(&self) -> &[LiftingStep] { &self.steps }

    /// Whether this kernel operates on integers and can be inverted exactly.
    pub fn is_reversible(&self) -> bool { self.reversible }

    /// Factor applied to low-pass samples after the last analysis step.
    pub fn low_scale(&self) -> f32 { self.low_scale }

    /// Factor applied to high-pass samples after the last analysis step.
    pub fn high_scale(&self) -> f32 { self.high_scale }

    /// How lines are extended beyond the image boundary.
    pub fn extension(&self) -> BoundaryExtension { self.extension }

    /// Number of halo samples a deinterleaved line needs on either side
    /// for every step of this kernel to read its full support.
    pub fn halo(&self) -> usize {
        self.steps.iter()
            .map(|step| (-step.support_min).max(step.support_max() + 1).max(0) as usize)
            .max().unwrap_or(0)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reversible_integer_coefficients(){
        let kernel = Kernel::w5x3();
        assert_eq!(kernel.steps()[0].integer_coefficients().as_slice(), &[-1, -1]);
        assert_eq!(kernel.steps()[1].integer_coefficients().as_slice(), &[1, 1]);
        assert_eq!(kernel.halo(), 2);
    }

    #[test]
    fn tap_offsets_reach_neighbouring_samples(){
        let kernel = Kernel::w9x7();
        for (index, step) in kernel.steps().iter().enumerate() {
            assert_eq!(LiftingStep::tap_offset(index, step.support_min), -1);
            assert_eq!(LiftingStep::tap_offset(index, step.support_max()), 1);
            assert_eq!(step.reach(index), 1);
        }
    }

    #[test]
    fn reversible_step_is_undone_exactly(){
        let kernel = Kernel::w5x3();
        let step = &kernel.steps()[0];
        let left = [7_i32, -3, 100, 5];
        let right = [2_i32, 9, -50, 5];
        let original = [4_i32, 1, -1, 77];

        let mut target = original;
        step.apply(true, Direction::Analysis, &mut target, &[&left, &right]);
        assert_eq!(target, [4 - 4, 1 - 3, -1 - 25, 77 - 5]);

        step.apply(true, Direction::Synthesis, &mut target, &[&left, &right]);
        assert_eq!(target, original);
    }

    #[test]
    fn custom_kernels_are_validated(){
        assert!(Kernel::new(&[], true, 1.0, 1.0).is_err());
        assert!(Kernel::new(&[LiftingStep::reversible(0, &[0.3], 1, 0)], true, 1.0, 1.0).is_err());
        assert!(Kernel::new(&[LiftingStep::irreversible(0, &[0.3])], false, 0.0, 1.0).is_err());

        let haar = Kernel::new(&[
            LiftingStep::reversible(0, &[-1.0], 0, 0),
            LiftingStep::reversible(0, &[0.5], 1, 1),
        ], true, 1.0, 1.0).unwrap();

        assert_eq!(haar.halo(), 1);
        assert_eq!(haar.steps()[1].reach(1), 1);
    }
}
