//! Reduction of a sub-volume to a (channel, row, column) u16 plane.
//!
//! Time and depth are folded away with [Max], in that order. The remaining axes are completed
//! to (channel, row, column), cast to u16 and fitted to the declared plane shape.

use ndarray::{Array3, ArrayD, Axis, Ix3};
use tracing::warn;

use crate::array;
use crate::axes::REDUCTION_ORDER;
use crate::error::MaxProjError;
use crate::extractor::SubVolume;
use crate::models::{AxisLabel, AxisSpec, PlaneShape};
use crate::operation::{clamp_to_u16, BinaryReduction, Element, Max};
use crate::source::VolumeData;

/// Surviving axes of a projected plane, in output order.
pub(crate) const PLANE_AXES: [AxisLabel; 3] = [AxisLabel::Channel, AxisLabel::Row, AxisLabel::Column];

/// Reduce a sub-volume to a plane of exactly the declared shape.
///
/// # Arguments
///
/// * `sub`: Sub-volume of one field of view
/// * `plane`: Declared output plane shape
/// * `index`: Field of view index, used only in log messages
pub fn reduce(sub: SubVolume, plane: PlaneShape, index: usize) -> Result<Array3<u16>, MaxProjError> {
    let SubVolume { axes, data } = sub;
    match data {
        VolumeData::Uint8(data) => project_t(axes, data, plane, index),
        VolumeData::Uint16(data) => project_t(axes, data, plane, index),
        VolumeData::Uint32(data) => project_t(axes, data, plane, index),
        VolumeData::Float32(data) => project_t(axes, data, plane, index),
    }
}

fn project_t<T: Element>(
    mut axes: AxisSpec,
    mut data: ArrayD<T>,
    plane: PlaneShape,
    index: usize,
) -> Result<Array3<u16>, MaxProjError> {
    for label in REDUCTION_ORDER {
        if axes.contains(label) {
            (axes, data) = reduce_axis::<Max, T>(&axes, &data, label)?;
        }
    }

    let mut clamped = 0_usize;
    let data = data.mapv(|value| {
        let (converted, was_clamped) = clamp_to_u16(value);
        if was_clamped {
            clamped += 1;
        }
        converted
    });
    if clamped > 0 {
        warn!(
            field = index,
            clamped,
            dtype = %T::DTYPE,
            "Values outside the u16 range were clamped"
        );
    }

    let data = to_plane_axes(&axes, data)?;
    let actual = data.dim();
    let (fitted, changed) = array::fit_plane(data, plane)?;
    if changed {
        warn!(
            field = index,
            actual = ?actual,
            expected = ?plane.as_array(),
            "Projected plane did not match the declared shape and was cropped or padded"
        );
    }
    Ok(fitted)
}

/// Fold one axis of an array with a binary reduction.
///
/// Returns the axes and data with `label` removed.
pub fn reduce_axis<R: BinaryReduction, T: Element>(
    axes: &AxisSpec,
    data: &ArrayD<T>,
    label: AxisLabel,
) -> Result<(AxisSpec, ArrayD<T>), MaxProjError> {
    let position = axes
        .index_of(label)
        .ok_or(MaxProjError::AxisNotFound(label))?;
    let reduced = data.fold_axis(Axis(position), R::identity::<T>(), |acc, value| {
        R::combine(*acc, *value)
    });
    Ok((axes.without(label)?, reduced))
}

/// Insert missing plane axes with length 1 and permute to (channel, row, column).
fn to_plane_axes(axes: &AxisSpec, data: ArrayD<u16>) -> Result<Array3<u16>, MaxProjError> {
    if let Some((label, _)) = axes.iter().find(|(label, _)| !PLANE_AXES.contains(label)) {
        return Err(MaxProjError::InvalidLayout(format!(
            "axis {} remains after reduction",
            label
        )));
    }
    let mut axes = axes.clone();
    let mut data = data;
    for label in PLANE_AXES {
        if !axes.contains(label) {
            let position = axes.ndim();
            axes = axes.with_inserted(position, label, 1)?;
            data = data.insert_axis(Axis(position));
        }
    }
    let order: Vec<usize> = PLANE_AXES
        .iter()
        .map(|label| axes.index_of(*label).ok_or(MaxProjError::AxisNotFound(*label)))
        .collect::<Result<_, _>>()?;
    let data = data
        .permuted_axes(order)
        .as_standard_layout()
        .into_owned()
        .into_dimensionality::<Ix3>()?;
    Ok(data)
}
