
//! Region of interest coding with the max-shift method.
//!
//! Before encoding, the coefficients of foreground samples are scaled up by `2^shift`,
//! so that they occupy the most significant bit-planes on their own.
//! The decoder recognizes foreground coefficients by their magnitude alone,
//! which requires every background coefficient to stay below `2^shift`.

use std::fmt::Debug;

use crate::decomposition::Band;
use crate::error::{Error, UnitResult};
use crate::math::Vec2;


/// Decides which samples of a band belong to the foreground.
/// Shared between all leaves of a tree, and possibly worker threads.
pub trait RegionOfInterest: Debug + Send + Sync {

    /// Whether the band sample at `position` contributes to the foreground.
    fn is_foreground(&self, band: &Band, position: Vec2<usize>) -> bool;
}

/// A rectangle in component coordinates.
/// A band sample is foreground if the component area it spans intersects the rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rectangle {

    /// The top left corner, inclusive.
    pub position: Vec2<usize>,

    /// Width and height.
    pub size: Vec2<usize>,
}

impl RegionOfInterest for Rectangle {
    fn is_foreground(&self, band: &Band, position: Vec2<usize>) -> bool {
        let start = position * band.scale;
        let end = start + band.scale;
        let rectangle_end = self.position + self.size;

        start.x() < rectangle_end.x() && self.position.x() < end.x()
            && start.y() < rectangle_end.y() && self.position.y() < end.y()
    }
}


/// Scale up foreground coefficients of a block.
/// `mask` reports whether the coefficient at an index is foreground.
/// Errors if a background coefficient is too large to be told apart after shifting.
pub fn shift_up(coefficients: &mut [i32], shift: u32, mut mask: impl FnMut(usize) -> bool) -> UnitResult {
    if shift == 0 { return Ok(()); }

    if shift >= 31 {
        return Err(Error::invalid("region of interest shift must be smaller than 31"));
    }

    let threshold = 1_u32 << shift;
    for (index, coefficient) in coefficients.iter_mut().enumerate() {
        if mask(index) {
            let shifted = coefficient.checked_mul(1 << shift)
                .ok_or_else(|| Error::invalid("region of interest shift overflows coefficient"))?;

            *coefficient = shifted;
        }
        else if coefficient.unsigned_abs() >= threshold {
            return Err(Error::invalid(
                "background coefficient exceeds the region of interest shift"
            ));
        }
    }

    Ok(())
}

/// Undo `shift_up`, recognizing foreground coefficients by their magnitude.
pub fn shift_down(coefficients: &mut [i32], shift: u32) {
    if shift == 0 || shift >= 31 { return; }

    let threshold = 1_u32 << shift;
    for coefficient in coefficients {
        let magnitude = coefficient.unsigned_abs();

        if magnitude >= threshold {
            let magnitude = (magnitude >> shift) as i32;
            *coefficient = if *coefficient < 0 { -magnitude } else { magnitude };
        }
    }
}
