//! Field extraction: one read window per field of view.

use crate::axes::AxisModel;
use crate::error::MaxProjError;
use crate::models::{AxisLabel, AxisSpec};
use crate::reducer::PLANE_AXES;
use crate::source::{Source, VolumeData};

/// The data of one field of view, labelled with its current axes.
#[derive(Clone, Debug, PartialEq)]
pub struct SubVolume {
    pub axes: AxisSpec,
    pub data: VolumeData,
}

/// Read the sub-volume of field of view `index`.
///
/// Issues exactly one read to the source. Out-of-range indices are rejected before reading.
#[tracing::instrument(level = "DEBUG", skip(source, model))]
pub fn extract<S: Source + ?Sized>(
    source: &S,
    model: &AxisModel,
    index: usize,
) -> Result<SubVolume, MaxProjError> {
    let window = model.window(index)?;
    let data = source.read(&window)?;

    let mut axes = model.field_axes().clone();
    if model.inferred_plane() {
        let plane = model.plane();
        axes = axes.with_inserted(axes.ndim(), AxisLabel::Row, plane.rows)?;
        axes = axes.with_inserted(axes.ndim(), AxisLabel::Column, plane.columns)?;
    }
    if data.shape().len() != axes.ndim() {
        return Err(MaxProjError::SourceRead(format!(
            "read of field of view {} returned shape {:?}, expected {} axes {}",
            index,
            data.shape(),
            axes.ndim(),
            axes
        )));
    }
    // Plane axes keep the lengths actually read; the reducer fits them to the declared plane.
    let mut read_axes = Vec::with_capacity(axes.ndim());
    for ((label, length), &actual) in axes.iter().zip(data.shape()) {
        if actual != length && !PLANE_AXES.contains(&label) {
            return Err(MaxProjError::SourceRead(format!(
                "read of field of view {} returned shape {:?}, expected {:?} for axes {}",
                index,
                data.shape(),
                axes.shape(),
                axes
            )));
        }
        read_axes.push((label, actual));
    }
    let axes = AxisSpec::new(read_axes)?;
    Ok(SubVolume { axes, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::FovPolicy;
    use crate::source::ArraySource;
    use crate::models::DType;
    use crate::source::Window;
    use crate::test_utils::{self, CountingSource, RaggedSource};
    use ndarray::ArrayD;

    #[test]
    fn extracts_one_field() {
        let source = test_utils::ramp_source("P:3,Z:2,C:2,Y:4,X:4");
        let counting = CountingSource::new(&source);
        let model = AxisModel::classify(source.axes(), FovPolicy::Auto, || Ok(None)).unwrap();
        let sub = extract(&counting, &model, 1).unwrap();
        assert_eq!("Z:2,C:2,Y:4,X:4", sub.axes.to_string());
        assert_eq!(&[2, 2, 4, 4], sub.data.shape());
        assert_eq!(1, counting.reads());
    }

    #[test]
    fn out_of_range_rejected_before_read() {
        let source = test_utils::ramp_source("P:3,Y:2,X:2");
        let counting = CountingSource::new(&source);
        let model = AxisModel::classify(source.axes(), FovPolicy::Auto, || Ok(None)).unwrap();
        match extract(&counting, &model, 3).unwrap_err() {
            MaxProjError::FieldOfViewOutOfRange { index: 3, total: 3 } => (),
            _ => panic!("expected out of range error"),
        }
        assert_eq!(0, counting.reads());
    }

    #[test]
    fn unlabeled_plane_gets_row_and_column() {
        let axes = AxisSpec::parse("P:2,Z:3").unwrap();
        let source =
            ArraySource::with_unlabeled_plane(axes, ArrayD::<u16>::zeros(vec![2, 3, 5, 6])).unwrap();
        let model =
            AxisModel::classify(source.axes(), FovPolicy::Auto, || source.probe_plane()).unwrap();
        let sub = extract(&source, &model, 0).unwrap();
        assert_eq!("Z:3,Y:5,X:6", sub.axes.to_string());
    }

    #[test]
    fn squeezed_tile_axis() {
        let source = test_utils::ramp_source("M:1,P:2,Z:2,Y:2,X:2");
        let model = AxisModel::classify(source.axes(), FovPolicy::Auto, || Ok(None)).unwrap();
        let sub = extract(&source, &model, 1).unwrap();
        assert_eq!("Z:2,Y:2,X:2", sub.axes.to_string());
    }

    #[test]
    fn ragged_plane_keeps_read_lengths() {
        let source = test_utils::ramp_source("P:3,Z:2,Y:4,X:4");
        let ragged = RaggedSource::new(&source, AxisLabel::Position, vec![(1, (3, 5))]);
        let model = AxisModel::classify(source.axes(), FovPolicy::Auto, || Ok(None)).unwrap();
        let sub = extract(&ragged, &model, 1).unwrap();
        assert_eq!("Z:2,Y:3,X:5", sub.axes.to_string());
        assert_eq!(&[2, 3, 5], sub.data.shape());
        let sub = extract(&ragged, &model, 0).unwrap();
        assert_eq!("Z:2,Y:4,X:4", sub.axes.to_string());
    }

    /// Declares three depth planes but reads two.
    struct ShortDepth(AxisSpec);

    impl Source for ShortDepth {
        fn axes(&self) -> &AxisSpec {
            &self.0
        }

        fn dtype(&self) -> DType {
            DType::Uint16
        }

        fn read(&self, _window: &Window) -> Result<VolumeData, MaxProjError> {
            Ok(VolumeData::Uint16(ArrayD::zeros(vec![2, 2, 2])))
        }
    }

    #[test]
    fn non_plane_length_mismatch_is_read_error() {
        let source = ShortDepth(AxisSpec::parse("P:2,Z:3,Y:2,X:2").unwrap());
        let model = AxisModel::classify(source.axes(), FovPolicy::Auto, || Ok(None)).unwrap();
        match extract(&source, &model, 0).unwrap_err() {
            MaxProjError::SourceRead(_) => (),
            err => panic!("expected source read error, got {:?}", err),
        }
    }
}
