
//! Halo-padded line buffers drawn from a `SampleArena`.
//!
//! A line is _declared_ while the tree is being built, which reserves its storage,
//! and _bound_ once after the arena has been finalized. After that, the same storage
//! is overwritten for every row that passes through the owning stage.

use std::fmt::Debug;
use std::ops::{Index, IndexMut};

use bytemuck::Pod;

use crate::arena::{Chunk, Materializer, Reservation, SampleArena, ALIGNMENT};
use crate::error::{Error, Result, UnitResult, usize_to_u8};
use crate::math::RoundingMode;


/// Number of fraction bits in a 16-bit fixed-point sample.
/// A normalized value of `1.0` is represented as `1 << FIX_POINT`.
pub const FIX_POINT: u32 = 13;

/// The storage kind of the samples in a line.
/// Absolute types hold integers for the reversible path,
/// normalized types hold fixed-point or floating-point values for the irreversible path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleType {

    /// 16-bit absolute integers.
    I16,

    /// 32-bit absolute integers.
    I32,

    /// 16-bit normalized fixed-point values with `FIX_POINT` fraction bits.
    Fix16,

    /// 32-bit normalized floating-point values.
    F32,
}

/// How the halo of a line is filled at the true image boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundaryExtension {

    /// Mirror about the boundary sample, which is not repeated.
    /// Index `-1` reads index `1`.
    Symmetric,

    /// Repeat the boundary sample. Index `-1` reads index `0`.
    Replicate,
}

/// Whether a line has storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineStatus {

    /// Neither declared nor bound, holds no storage. Used as a placeholder.
    Empty,

    /// Storage is reserved but the arena has not been materialized yet.
    Declared,

    /// Backed by committed arena memory.
    Bound,
}

/// A single line of samples with addressable halos on both sides.
/// Valid indices run from `-halo_left` to `width + halo_right - 1`.
#[derive(Debug)]
pub struct LineBuffer<'a> {
    width: usize,
    halo_left: usize,
    halo_right: usize,
    sample_type: SampleType,
    storage: Storage<'a>,
}

#[derive(Debug)]
enum Storage<'a> {
    Empty,
    Declared(Reservation),
    Bound(&'a mut [Chunk]),
}

/// An immutable typed view of a line, indexed relative to the first nominal sample.
#[derive(Debug)]
pub struct LineRef<'l, T> {
    samples: &'l [T],
    origin: usize,
    width: usize,
}

/// A mutable typed view of a line, indexed relative to the first nominal sample.
#[derive(Debug)]
pub struct LineMut<'l, T> {
    samples: &'l mut [T],
    origin: usize,
    width: usize,
}


/// A sample value type that can be stored in a line.
pub trait Sample: Pod + Default + Debug + PartialEq + Send + Sync + 'static {

    /// Interpret as an integer. Floats are rounded.
    fn to_i32(self) -> i32;

    /// Convert from an integer, wrapping on overflow for integer types.
    fn from_i32(value: i32) -> Self;

    /// Interpret as a float in the units of this sample.
    fn to_f32(self) -> f32;

    /// Convert from a float in the units of this sample, rounding and saturating for integer types.
    fn from_f32(value: f32) -> Self;
}

/// Selects the typed view of a line.
/// Requesting the view of a different representation than the line was declared with is an error.
pub trait Representation {

    /// The value type of a single sample.
    type Sample: Sample;

    /// The tag a line must carry to be viewed as this representation.
    const TYPE: SampleType;
}

/// Representation of `SampleType::I16`.
#[derive(Clone, Copy, Debug)]
pub struct Absolute16;

/// Representation of `SampleType::I32`.
#[derive(Clone, Copy, Debug)]
pub struct Absolute32;

/// Representation of `SampleType::Fix16`.
#[derive(Clone, Copy, Debug)]
pub struct Fixed16;

/// Representation of `SampleType::F32`.
#[derive(Clone, Copy, Debug)]
pub struct Float32;

impl Representation for Absolute16 { type Sample = i16; const TYPE: SampleType = SampleType::I16; }
impl Representation for Absolute32 { type Sample = i32; const TYPE: SampleType = SampleType::I32; }
impl Representation for Fixed16 { type Sample = i16; const TYPE: SampleType = SampleType::Fix16; }
impl Representation for Float32 { type Sample = f32; const TYPE: SampleType = SampleType::F32; }

/// Run generic code with the representation that matches a runtime sample type.
/// `with_representation!(sample_type, R => body)` makes `R` a type alias within `body`.
macro_rules! with_representation {
    ($sample_type: expr, $representation: ident => $body: expr) => {
        match $sample_type {
            $crate::line::SampleType::I16 => { type $representation = $crate::line::Absolute16; $body },
            $crate::line::SampleType::I32 => { type $representation = $crate::line::Absolute32; $body },
            $crate::line::SampleType::Fix16 => { type $representation = $crate::line::Fixed16; $body },
            $crate::line::SampleType::F32 => { type $representation = $crate::line::Float32; $body },
        }
    };
}

pub(crate) use with_representation;

impl Sample for i16 {
    #[inline] fn to_i32(self) -> i32 { i32::from(self) }
    #[inline] fn from_i32(value: i32) -> Self { value as i16 }
    #[inline] fn to_f32(self) -> f32 { f32::from(self) }
    #[inline] fn from_f32(value: f32) -> Self { value.round() as i16 }
}

impl Sample for i32 {
    #[inline] fn to_i32(self) -> i32 { self }
    #[inline] fn from_i32(value: i32) -> Self { value }
    #[inline] fn to_f32(self) -> f32 { self as f32 }
    #[inline] fn from_f32(value: f32) -> Self { value.round() as i32 }
}

impl Sample for f32 {
    #[inline] fn to_i32(self) -> i32 { self.round() as i32 }
    #[inline] fn from_i32(value: i32) -> Self { value as f32 }
    #[inline] fn to_f32(self) -> f32 { self }
    #[inline] fn from_f32(value: f32) -> Self { value }
}


impl SampleType {

    /// Select the sample type for the reversible (`absolute`) or irreversible path.
    pub fn new(absolute: bool, use_shorts: bool) -> Self {
        match (absolute, use_shorts) {
            (true, true) => SampleType::I16,
            (true, false) => SampleType::I32,
            (false, true) => SampleType::Fix16,
            (false, false) => SampleType::F32,
        }
    }

    /// Whether samples are absolute integers, as required by reversible kernels.
    pub fn is_absolute(self) -> bool {
        matches!(self, SampleType::I16 | SampleType::I32)
    }

    /// Whether samples occupy 16 bits.
    pub fn is_short(self) -> bool {
        matches!(self, SampleType::I16 | SampleType::Fix16)
    }

    /// Number of bytes a single sample occupies.
    pub fn bytes_per_sample(self) -> usize {
        if self.is_short() { 2 } else { 4 }
    }

    /// Convert a normalized sample value of this type to a float where `1.0` is the nominal range.
    /// Absolute types are returned unchanged.
    pub fn normalized_to_f32(self, value: f32) -> f32 {
        match self {
            SampleType::Fix16 => value / (1 << FIX_POINT) as f32,
            _ => value,
        }
    }

    /// Inverse of `normalized_to_f32`.
    pub fn f32_to_normalized(self, value: f32) -> f32 {
        match self {
            SampleType::Fix16 => value * (1 << FIX_POINT) as f32,
            _ => value,
        }
    }
}


impl BoundaryExtension {

    /// Map any index to an index in `0 .. len`, extending the sequence beyond its ends.
    /// Returns zero for empty sequences.
    pub fn source_index(self, index: isize, len: usize) -> usize {
        if len <= 1 { return 0; }
        let last = len as isize - 1;

        match self {
            BoundaryExtension::Replicate => index.clamp(0, last) as usize,

            BoundaryExtension::Symmetric => {
                let period = 2 * last;
                let folded = index.rem_euclid(period);
                (if folded > last { period - folded } else { folded }) as usize
            },
        }
    }
}


impl<'a> LineBuffer<'a> {

    /// A line without storage. Can be used as a placeholder, but not viewed.
    pub fn empty() -> Self {
        LineBuffer { width: 0, halo_left: 0, halo_right: 0, sample_type: SampleType::I32, storage: Storage::Empty }
    }

    /// Reserve storage for a line of `width` samples, plus the halos on either side.
    /// The halos are rounded up so that the storage of every line starts and ends at an aligned boundary.
    /// Halos must be small, at most 255 samples after rounding.
    pub fn declare(
        arena: &mut SampleArena, width: usize,
        halo_left: usize, halo_right: usize, sample_type: SampleType
    ) -> Result<Self>
    {
        let bytes_per_sample = sample_type.bytes_per_sample();
        let samples_per_chunk = ALIGNMENT / bytes_per_sample;

        let halo_left = RoundingMode::align_up(halo_left, samples_per_chunk);
        let right_end = RoundingMode::align_up(width + halo_right, samples_per_chunk);
        let halo_right = right_end - width;

        usize_to_u8(halo_left, "line halo too large")?;
        usize_to_u8(halo_right, "line halo too large")?;

        let reservation = arena.reserve((halo_left + right_end) * bytes_per_sample)?;

        Ok(LineBuffer {
            width, halo_left, halo_right, sample_type,
            storage: Storage::Declared(reservation),
        })
    }

    /// Back a declared line with committed arena memory.
    /// Does nothing for empty placeholder lines. Errors if the line is already bound.
    pub fn bind(&mut self, materializer: &mut Materializer<'a>) -> UnitResult {
        match self.storage {
            Storage::Empty => Ok(()),
            Storage::Bound(_) => Err(Error::contract("line buffer is already bound")),
            Storage::Declared(reservation) => {
                self.storage = Storage::Bound(materializer.materialize(reservation)?);
                Ok(())
            }
        }
    }

    /// Whether this line currently has storage.
    pub fn status(&self) -> LineStatus {
        match self.storage {
            Storage::Empty => LineStatus::Empty,
            Storage::Declared(_) => LineStatus::Declared,
            Storage::Bound(_) => LineStatus::Bound,
        }
    }

    /// Number of nominal samples.
    pub fn width(&self) -> usize { self.width }

    /// Number of addressable samples before index zero, after rounding.
    pub fn halo_left(&self) -> usize { self.halo_left }

    /// Number of addressable samples after the last nominal sample, after rounding.
    pub fn halo_right(&self) -> usize { self.halo_right }

    /// The representation fixed at declaration.
    pub fn sample_type(&self) -> SampleType { self.sample_type }

    /// Typed read access. Errors if the line is not bound or holds another representation.
    pub fn view<R: Representation>(&self) -> Result<LineRef<'_, R::Sample>> {
        self.check_type(R::TYPE)?;

        match &self.storage {
            Storage::Bound(chunks) => Ok(LineRef {
                samples: bytemuck::cast_slice(chunks),
                origin: self.halo_left, width: self.width,
            }),

            _ => Err(Error::contract("line buffer is not bound to arena memory")),
        }
    }

    /// Typed write access. Errors if the line is not bound or holds another representation.
    pub fn view_mut<R: Representation>(&mut self) -> Result<LineMut<'_, R::Sample>> {
        self.check_type(R::TYPE)?;

        match &mut self.storage {
            Storage::Bound(chunks) => Ok(LineMut {
                samples: bytemuck::cast_slice_mut(chunks),
                origin: self.halo_left, width: self.width,
            }),

            _ => Err(Error::contract("line buffer is not bound to arena memory")),
        }
    }

    /// Copy the nominal samples of another line of equal width and representation.
    /// Halos are not copied.
    pub fn copy_from(&mut self, source: &LineBuffer<'_>) -> UnitResult {
        source.check_geometry(self.width, self.sample_type)?;

        let bytes_per_sample = self.sample_type.bytes_per_sample();
        let byte_count = self.width * bytes_per_sample;
        let target_start = self.halo_left * bytes_per_sample;
        let source_start = source.halo_left * bytes_per_sample;

        match (&mut self.storage, &source.storage) {
            (Storage::Bound(target), Storage::Bound(source)) => {
                let target: &mut [u8] = bytemuck::cast_slice_mut(target);
                let source: &[u8] = bytemuck::cast_slice(source);

                target[target_start .. target_start + byte_count]
                    .copy_from_slice(&source[source_start .. source_start + byte_count]);

                Ok(())
            },

            _ => Err(Error::contract("line buffer is not bound to arena memory")),
        }
    }

    /// Errors if this line does not have the specified width and representation.
    pub fn check_geometry(&self, width: usize, sample_type: SampleType) -> UnitResult {
        self.check_type(sample_type)?;

        if self.width != width {
            return Err(Error::contract(format!(
                "line has {} samples, but {} were expected", self.width, width
            )));
        }

        Ok(())
    }

    fn check_type(&self, expected: SampleType) -> UnitResult {
        if self.sample_type != expected {
            return Err(Error::TypeMismatch { expected, found: self.sample_type });
        }

        Ok(())
    }
}


impl<'l, T: Sample> LineRef<'l, T> {

    /// Number of nominal samples.
    pub fn width(&self) -> usize { self.width }

    /// The nominal samples, without halos.
    pub fn nominal(&self) -> &'l [T] { &self.samples[self.origin .. self.origin + self.width] }

    /// The sample at a signed index, which may point into a halo.
    /// Panics for indices outside the halos.
    #[inline] pub fn at(&self, index: isize) -> T { self.samples[offset(self.origin, index)] }

    /// The smallest valid index.
    pub fn first_index(&self) -> isize { -(self.origin as isize) }

    /// One past the largest valid index.
    pub fn end_index(&self) -> isize { (self.samples.len() - self.origin) as isize }

    /// The `len` samples starting at a signed index, which may reach into the halos.
    /// Panics if the window leaves the halos.
    pub fn window(&self, start: isize, len: usize) -> &'l [T] {
        let start = offset(self.origin, start);
        &self.samples[start .. start + len]
    }
}

impl<'l, T: Sample> LineMut<'l, T> {

    /// Number of nominal samples.
    pub fn width(&self) -> usize { self.width }

    /// The nominal samples, without halos.
    pub fn nominal(&self) -> &[T] { &self.samples[self.origin .. self.origin + self.width] }

    /// The nominal samples, without halos.
    pub fn nominal_mut(&mut self) -> &mut [T] { &mut self.samples[self.origin .. self.origin + self.width] }

    /// The sample at a signed index, which may point into a halo.
    /// Panics for indices outside the halos.
    #[inline] pub fn at(&self, index: isize) -> T { self.samples[offset(self.origin, index)] }

    /// The smallest valid index.
    pub fn first_index(&self) -> isize { -(self.origin as isize) }

    /// One past the largest valid index.
    pub fn end_index(&self) -> isize { (self.samples.len() - self.origin) as isize }

    /// Fill both halos from the nominal samples according to the extension policy.
    /// Lines without nominal samples are left untouched.
    pub fn extend_boundaries(&mut self, extension: BoundaryExtension) {
        if self.width == 0 { return; }

        let width = self.width;
        let (first, end) = (self.first_index(), self.end_index());
        let halo_indices = (first .. 0).chain(width as isize .. end);

        for index in halo_indices {
            let source = extension.source_index(index, width) as isize;
            self[index] = self.at(source);
        }
    }
}

impl<T: Sample> Index<isize> for LineRef<'_, T> {
    type Output = T;
    fn index(&self, index: isize) -> &T { &self.samples[offset(self.origin, index)] }
}

impl<T: Sample> Index<isize> for LineMut<'_, T> {
    type Output = T;
    fn index(&self, index: isize) -> &T { &self.samples[offset(self.origin, index)] }
}

impl<T: Sample> IndexMut<isize> for LineMut<'_, T> {
    fn index_mut(&mut self, index: isize) -> &mut T { &mut self.samples[offset(self.origin, index)] }
}

#[inline]
fn offset(origin: usize, index: isize) -> usize {
    let position = origin as isize + index;
    debug_assert!(position >= 0, "line index {} reaches beyond the left halo", index);
    position as usize
}
