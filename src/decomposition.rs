
//! Describes how a component is split into subbands, level by level.

use smallvec::SmallVec;

use crate::error::{Error, UnitResult};
use crate::math::{RoundingMode, Vec2};


/// Identifies a band by the child index chosen at every level, starting at the root.
pub type BandPath = SmallVec<[u8; 8]>;

/// The primary split performed by one decomposition level.
/// Low-pass bands receive the even samples, high-pass bands the odd samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {

    /// Forward every line unchanged to a single band.
    None,

    /// Split every line into bands `[L, H]`.
    Horizontal,

    /// Split the sequence of lines into bands `[L, H]`.
    Vertical,

    /// Split both axes into bands `[LL, HL, LH, HH]`,
    /// where the first letter is the horizontal and the second the vertical filter.
    Both,
}

/// A recursive decomposition descriptor.
/// Fixed once a tree is built from it.
#[derive(Clone, Debug, PartialEq)]
pub enum Decomposition {

    /// Do not transform this band any further. The band is coded as is.
    Leaf,

    /// Transform this band, then continue with each resulting band.
    Split {

        /// How this level splits its input.
        split: Split,

        /// One descriptor for every band produced by the split, in band order.
        bands: Vec<Decomposition>,
    },
}

/// The location and geometry of one band within a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Band {

    /// Index of the image component this band belongs to.
    pub component: usize,

    /// The child indices leading from the component to this band.
    pub path: BandPath,

    /// Number of samples in this band.
    pub size: Vec2<usize>,

    /// How many component samples one band sample spans on each axis.
    pub scale: Vec2<usize>,
}


impl Split {

    /// Number of bands produced.
    pub fn band_count(self) -> usize {
        match self {
            Split::None => 1,
            Split::Horizontal | Split::Vertical => 2,
            Split::Both => 4,
        }
    }

    /// Whether lines are split into even and odd samples.
    pub fn splits_horizontally(self) -> bool { matches!(self, Split::Horizontal | Split::Both) }

    /// Whether the sequence of lines is split into even and odd lines.
    pub fn splits_vertically(self) -> bool { matches!(self, Split::Vertical | Split::Both) }

    /// The size of every band, in band order.
    pub fn band_sizes(self, size: Vec2<usize>) -> SmallVec<[Vec2<usize>; 4]> {
        let low = size.map(|length| RoundingMode::Up.divide(length, 2));
        let high = size.map(|length| RoundingMode::Down.divide(length, 2));

        match self {
            Split::None => smallvec::smallvec![ size ],
            Split::Horizontal => smallvec::smallvec![ Vec2(low.x(), size.y()), Vec2(high.x(), size.y()) ],
            Split::Vertical => smallvec::smallvec![ Vec2(size.x(), low.y()), Vec2(size.x(), high.y()) ],

            Split::Both => smallvec::smallvec![
                Vec2(low.x(), low.y()), Vec2(high.x(), low.y()),
                Vec2(low.x(), high.y()), Vec2(high.x(), high.y()),
            ],
        }
    }
}

impl Decomposition {

    /// Split both axes `levels` times, always continuing with the low-pass band.
    pub fn mallat(levels: usize) -> Self {
        Self::dyadic(Split::Both, levels)
    }

    /// Apply the same split `levels` times, always continuing with the first band.
    pub fn dyadic(split: Split, levels: usize) -> Self {
        (0 .. levels).fold(Decomposition::Leaf, |low, _| {
            let mut bands = vec![ low ];
            bands.extend((1 .. split.band_count()).map(|_| Decomposition::Leaf));
            Decomposition::Split { split, bands }
        })
    }

    /// Errors if any level does not describe exactly one child per band.
    pub fn validate(&self) -> UnitResult {
        match self {
            Decomposition::Leaf => Ok(()),

            Decomposition::Split { split, bands } => {
                if bands.len() != split.band_count() {
                    return Err(Error::invalid(format!(
                        "{:?} split produces {} bands, but {} descriptors were given",
                        split, split.band_count(), bands.len()
                    )));
                }

                bands.iter().try_for_each(Decomposition::validate)
            }
        }
    }

    /// Every band that is not split any further, in depth-first band order.
    pub fn leaves(&self, component: usize, size: Vec2<usize>) -> Vec<Band> {
        let mut leaves = Vec::new();
        self.collect_leaves(Band::root(component, size), &mut leaves);
        leaves
    }

    fn collect_leaves(&self, band: Band, leaves: &mut Vec<Band>) {
        match self {
            Decomposition::Leaf => leaves.push(band),

            Decomposition::Split { split, bands } => {
                for (child, descriptor) in band.children(*split).into_iter().zip(bands) {
                    descriptor.collect_leaves(child, leaves);
                }
            }
        }
    }
}

impl Band {

    /// The undivided component.
    pub fn root(component: usize, size: Vec2<usize>) -> Self {
        Band { component, path: BandPath::new(), size, scale: Vec2(1, 1) }
    }

    /// The bands produced by splitting this band, in band order.
    pub fn children(&self, split: Split) -> SmallVec<[Band; 4]> {
        let scale = Vec2(
            if split.splits_horizontally() { self.scale.x() * 2 } else { self.scale.x() },
            if split.splits_vertically() { self.scale.y() * 2 } else { self.scale.y() },
        );

        split.band_sizes(self.size).into_iter().enumerate()
            .map(|(index, size)| {
                let mut path = self.path.clone();
                path.push(index as u8);
                Band { component: self.component, path, size, scale }
            })
            .collect()
    }
}
