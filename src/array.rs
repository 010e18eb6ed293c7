//! Functions and utilities for working with [ndarray] objects.

use crate::error::MaxProjError;
use crate::models::PlaneShape;
use crate::source::{AxisSelection, Window};

use core::convert::TryFrom;
use ndarray::prelude::*;

/// Convert from bytes to `&[T]`.
///
/// Zerocopy provides a mechanism for converting between types.
/// Correct alignment of the data is necessary.
///
/// # Arguments
///
/// * `data`: Bytes containing data to convert.
pub fn from_bytes<T: zerocopy::FromBytes>(data: &[u8]) -> Result<&[T], MaxProjError> {
    let layout = zerocopy::LayoutVerified::<_, [T]>::new_slice(data)
        .ok_or(MaxProjError::MisalignedBuffer)?;
    Ok(layout.into_slice())
}

/// Convert from mutable bytes to `&mut [T]`.
///
/// # Arguments
///
/// * `data`: Bytes containing data to convert. Must be aligned for `T`.
pub fn from_bytes_mut<T>(data: &mut [u8]) -> Result<&mut [T], MaxProjError>
where
    T: zerocopy::FromBytes + zerocopy::AsBytes,
{
    let layout = zerocopy::LayoutVerified::<_, [T]>::new_slice(data)
        .ok_or(MaxProjError::MisalignedBuffer)?;
    Ok(layout.into_mut_slice())
}

/// Convert an [AxisSelection] to an [ndarray::SliceInfoElem].
fn to_ndarray_slice(selection: &AxisSelection) -> Result<ndarray::SliceInfoElem, MaxProjError> {
    match selection {
        AxisSelection::All => Ok(ndarray::SliceInfoElem::Slice {
            start: 0,
            end: None,
            step: 1,
        }),
        AxisSelection::Index(index) => Ok(ndarray::SliceInfoElem::Index(isize::try_from(
            *index,
        )?)),
    }
}

/// Returns an [ndarray] SliceInfo object corresponding to the window.
///
/// Axes beyond the window (for example an unlabeled trailing plane) are selected whole.
///
/// # Arguments
///
/// * `window`: Read window
/// * `ndim`: Number of dimensions of the array being sliced
pub fn build_slice_info(
    window: &Window,
    ndim: usize,
) -> Result<ndarray::SliceInfo<Vec<ndarray::SliceInfoElem>, ndarray::IxDyn, ndarray::IxDyn>, MaxProjError>
{
    let mut si = window
        .selections()
        .iter()
        .map(to_ndarray_slice)
        .collect::<Result<Vec<_>, _>>()?;
    while si.len() < ndim {
        si.push(to_ndarray_slice(&AxisSelection::All)?);
    }
    Ok(ndarray::SliceInfo::try_from(si)?)
}

/// Build an owned array from a shape and a vector of data.
///
/// # Arguments
///
/// * `shape`: The shape of the array
/// * `data`: Data in row-major order
pub fn build_array_from_shape<T>(shape: Vec<usize>, data: Vec<T>) -> Result<ArrayD<T>, MaxProjError> {
    ArrayD::<T>::from_shape_vec(IxDyn(&shape), data).map_err(MaxProjError::ShapeInvalid)
}

/// Fit a (channel, row, column) plane to the declared shape.
///
/// Axes that are too long are cropped from the origin; axes that are too short are padded by
/// replicating the last element along that axis. Returns the fitted plane and whether anything
/// changed.
pub fn fit_plane(
    plane: Array3<u16>,
    shape: PlaneShape,
) -> Result<(Array3<u16>, bool), MaxProjError> {
    let (channels, rows, columns) = plane.dim();
    if (channels, rows, columns) == (shape.channels, shape.rows, shape.columns) {
        return Ok((plane, false));
    }
    if channels == 0 || rows == 0 || columns == 0 {
        return Err(MaxProjError::PlaneShape {
            expected: shape.as_array(),
            actual: plane.shape().to_vec(),
        });
    }
    let fitted = Array3::from_shape_fn(
        (shape.channels, shape.rows, shape.columns),
        |(c, y, x)| plane[[c.min(channels - 1), y.min(rows - 1), x.min(columns - 1)]],
    );
    Ok((fitted, true))
}
