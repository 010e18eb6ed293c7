//! Axis model: classifies the axes of a source into a field-of-view axis, reduction axes and
//! the surviving (channel, row, column) plane.

use crate::error::MaxProjError;
use crate::models::{AxisLabel, AxisSpec, DType, FovPolicy, PlaneShape};
use crate::source::{AxisSelection, Window};

use tracing::{info, warn};

/// Axes that may supply fields of view, in priority order.
const FOV_CANDIDATES: [AxisLabel; 3] = [AxisLabel::Position, AxisLabel::Tile, AxisLabel::Time];

/// Axes eliminated by the reducer, in elimination order.
pub const REDUCTION_ORDER: [AxisLabel; 2] = [AxisLabel::Time, AxisLabel::Depth];

/// The classified axis layout of one source.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisModel {
    /// Axes as reported by the source.
    source_axes: AxisSpec,
    /// Axis supplying fields of view, if any.
    fov_axis: Option<AxisLabel>,
    /// Candidate axes of length 1 that are indexed away on every read.
    squeezed: Vec<AxisLabel>,
    /// Axes of each sub-volume after field slicing.
    field_axes: AxisSpec,
    /// Number of fields of view in the source.
    total_fields: usize,
    /// Declared output plane shape.
    plane: PlaneShape,
    /// Whether rows and columns were inferred from a probe read rather than labelled.
    inferred_plane: bool,
}

impl AxisModel {
    /// Classify the axes of a source.
    ///
    /// # Arguments
    ///
    /// * `axes`: Axes as reported by the source
    /// * `policy`: How to choose the field-of-view axis
    /// * `probe`: Called only when both rows and columns are missing. Returns the trailing
    ///   (rows, columns) plane shape of the source's reads, if it can be determined.
    pub fn classify<F>(axes: &AxisSpec, policy: FovPolicy, probe: F) -> Result<Self, MaxProjError>
    where
        F: FnOnce() -> Result<Option<(usize, usize)>, MaxProjError>,
    {
        let fov_axis = select_fov_axis(axes, policy)?;

        // Other candidates must be trivially indexable, otherwise the layout is ambiguous.
        let mut squeezed = vec![];
        for candidate in [AxisLabel::Position, AxisLabel::Tile] {
            if Some(candidate) == fov_axis {
                continue;
            }
            match axes.len_of(candidate) {
                Some(1) => squeezed.push(candidate),
                Some(length) => {
                    return Err(MaxProjError::InvalidConfig(format!(
                        "{} axis has {} steps but {} was chosen as the field-of-view axis",
                        candidate,
                        length,
                        fov_axis.map_or("no axis".to_string(), |label| label.to_string()),
                    )))
                }
                None => (),
            }
        }

        let mut field_axes = axes.clone();
        for label in fov_axis.iter().chain(squeezed.iter()) {
            field_axes = field_axes.without(*label)?;
        }

        let total_fields = fov_axis
            .and_then(|label| axes.len_of(label))
            .unwrap_or(1);

        let rows = axes.len_of(AxisLabel::Row);
        let columns = axes.len_of(AxisLabel::Column);
        let (rows, columns, inferred_plane) = match (rows, columns) {
            (None, None) => match probe()? {
                Some((rows, columns)) => {
                    info!(rows, columns, "Inferred plane shape from probe read");
                    (rows, columns, true)
                }
                None => return Err(MaxProjError::MissingPlaneAxes),
            },
            (rows, columns) => (rows.unwrap_or(1), columns.unwrap_or(1), false),
        };
        let channels = axes.len_of(AxisLabel::Channel).unwrap_or(1);

        if fov_axis.is_none() {
            if let Some(steps) = axes.len_of(AxisLabel::Time).filter(|steps| *steps > 1) {
                warn!(
                    steps,
                    "No position or tile axis; the time axis will be max-projected. \
                     Use the time field-of-view mode to treat time points as fields of view"
                );
            }
        }

        Ok(Self {
            source_axes: axes.clone(),
            fov_axis,
            squeezed,
            field_axes,
            total_fields,
            plane: PlaneShape::new(channels, rows, columns),
            inferred_plane,
        })
    }

    /// Axes as reported by the source.
    pub fn source_axes(&self) -> &AxisSpec {
        &self.source_axes
    }

    /// Axis supplying fields of view, or `None` for a single implicit field.
    pub fn fov_axis(&self) -> Option<AxisLabel> {
        self.fov_axis
    }

    /// Axes of each sub-volume, before any unlabeled plane is appended.
    pub fn field_axes(&self) -> &AxisSpec {
        &self.field_axes
    }

    /// Number of fields of view in the source.
    pub fn total_fields(&self) -> usize {
        self.total_fields
    }

    /// Declared shape of every projected plane.
    pub fn plane(&self) -> PlaneShape {
        self.plane
    }

    /// Whether reads return an unlabeled trailing (row, column) plane.
    pub fn inferred_plane(&self) -> bool {
        self.inferred_plane
    }

    /// Axes of each sub-volume that the reducer eliminates, in elimination order.
    pub fn reduction_axes(&self) -> Vec<AxisLabel> {
        REDUCTION_ORDER
            .into_iter()
            .filter(|label| self.field_axes.contains(*label))
            .collect()
    }

    /// Number of elements in one field's raw sub-volume.
    pub fn field_len(&self) -> usize {
        let labelled: usize = self.field_axes.shape().iter().product();
        if self.inferred_plane {
            labelled * self.plane.rows * self.plane.columns
        } else {
            labelled
        }
    }

    /// Bytes of one field's raw sub-volume for a given source pixel type.
    pub fn field_bytes(&self, dtype: DType) -> usize {
        self.field_len() * dtype.size_of()
    }

    /// Returns the read window selecting field of view `index` across all other axes.
    pub fn window(&self, index: usize) -> Result<Window, MaxProjError> {
        if index >= self.total_fields {
            return Err(MaxProjError::FieldOfViewOutOfRange {
                index,
                total: self.total_fields,
            });
        }
        let selections = self
            .source_axes
            .iter()
            .map(|(label, _)| {
                if Some(label) == self.fov_axis {
                    AxisSelection::Index(index)
                } else if self.squeezed.contains(&label) {
                    AxisSelection::Index(0)
                } else {
                    AxisSelection::All
                }
            })
            .collect();
        Ok(Window::new(selections))
    }
}

/// Choose the field-of-view axis according to the policy.
fn select_fov_axis(
    axes: &AxisSpec,
    policy: FovPolicy,
) -> Result<Option<AxisLabel>, MaxProjError> {
    let explicit = |label: AxisLabel| {
        if axes.contains(label) {
            Ok(Some(label))
        } else {
            Err(MaxProjError::AxisNotFound(label))
        }
    };
    match policy {
        FovPolicy::Position => explicit(AxisLabel::Position),
        FovPolicy::Tile => explicit(AxisLabel::Tile),
        FovPolicy::Time => explicit(AxisLabel::Time),
        FovPolicy::Auto => Ok(FOV_CANDIDATES
            .into_iter()
            .filter(|label| *label != AxisLabel::Time)
            .find(|label| axes.len_of(*label).is_some_and(|length| length > 1))),
    }
}
