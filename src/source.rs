//! Source collaborator contract.
//!
//! A source exposes its axes, a deterministic pixel type and windowed reads. Concrete sources
//! live in the submodules.

pub mod array;
pub mod description;
pub mod tiff_file;

use ndarray::ArrayD;

use crate::error::MaxProjError;
use crate::models::{AxisSpec, DType};

pub use self::array::ArraySource;
pub use self::tiff_file::TiffSource;

/// Selection along one axis of a read window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisSelection {
    /// The whole axis. The axis is kept in the result.
    All,
    /// A single index. The axis is dropped from the result.
    Index(usize),
}

/// A read window: one selection per source axis, in source axis order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window {
    selections: Vec<AxisSelection>,
}

impl Window {
    /// Returns a new Window.
    pub fn new(selections: Vec<AxisSelection>) -> Self {
        Self { selections }
    }

    /// Selections in source axis order.
    pub fn selections(&self) -> &[AxisSelection] {
        &self.selections
    }

    /// Check the window against the axes of a source.
    pub fn validate(&self, axes: &AxisSpec) -> Result<(), MaxProjError> {
        if self.selections.len() != axes.ndim() {
            return Err(MaxProjError::WindowRank {
                window: self.selections.len(),
                axes: axes.ndim(),
            });
        }
        for (selection, (label, length)) in self.selections.iter().zip(axes.iter()) {
            if let AxisSelection::Index(index) = selection {
                if *index >= length {
                    return Err(MaxProjError::SourceRead(format!(
                        "index {} out of bounds for {} axis of length {}",
                        index, label, length
                    )));
                }
            }
        }
        Ok(())
    }

    /// Shape of the data selected from `axes`.
    pub fn selected_shape(&self, axes: &AxisSpec) -> Vec<usize> {
        self.selections
            .iter()
            .zip(axes.iter())
            .filter_map(|(selection, (_, length))| match selection {
                AxisSelection::All => Some(length),
                AxisSelection::Index(_) => None,
            })
            .collect()
    }
}

/// Pixel data returned by a source read.
#[derive(Clone, Debug, PartialEq)]
pub enum VolumeData {
    Uint8(ArrayD<u8>),
    Uint16(ArrayD<u16>),
    Uint32(ArrayD<u32>),
    Float32(ArrayD<f32>),
}

impl VolumeData {
    /// Pixel type of the data.
    pub fn dtype(&self) -> DType {
        match self {
            Self::Uint8(_) => DType::Uint8,
            Self::Uint16(_) => DType::Uint16,
            Self::Uint32(_) => DType::Uint32,
            Self::Float32(_) => DType::Float32,
        }
    }

    /// Shape of the data.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Uint8(array) => array.shape(),
            Self::Uint16(array) => array.shape(),
            Self::Uint32(array) => array.shape(),
            Self::Float32(array) => array.shape(),
        }
    }
}

/// A multi-dimensional image source.
///
/// Reads may be issued concurrently from several workers.
pub trait Source: Sync {
    /// Axes of the source, in storage order.
    fn axes(&self) -> &AxisSpec;

    /// Pixel type returned by reads.
    fn dtype(&self) -> DType;

    /// Read the data selected by `window`.
    ///
    /// The result has one axis per [AxisSelection::All] selection, in source axis order. When
    /// the source's axes lack both rows and columns, the result carries the plane reported by
    /// [Source::probe_plane] as two trailing axes. Channel, row and column lengths may differ
    /// from the declared ones; such fields are cropped or padded during reduction.
    fn read(&self, window: &Window) -> Result<VolumeData, MaxProjError>;

    /// Returns the (rows, columns) shape of an unlabeled trailing plane, if the source has one.
    fn probe_plane(&self) -> Result<Option<(usize, usize)>, MaxProjError> {
        Ok(None)
    }
}
