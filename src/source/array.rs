//! In-memory source backed by an [ndarray] array.

use ndarray::ArrayD;

use crate::array;
use crate::error::MaxProjError;
use crate::models::{AxisSpec, DType};
use crate::operation::Element;
use crate::source::{Source, VolumeData, Window};

/// A source holding all of its data in memory.
///
/// Mostly useful for tests and for callers that decode data themselves.
#[derive(Clone, Debug)]
pub struct ArraySource<T> {
    axes: AxisSpec,
    data: ArrayD<T>,
    unlabeled_plane: bool,
}

impl<T: Element> ArraySource<T> {
    /// Returns a new ArraySource. The array must have one dimension per axis with matching
    /// lengths.
    pub fn new(axes: AxisSpec, data: ArrayD<T>) -> Result<Self, MaxProjError> {
        if axes.shape() != data.shape() {
            return Err(MaxProjError::InvalidLayout(format!(
                "array of shape {:?} does not match axes {}",
                data.shape(),
                axes
            )));
        }
        Ok(Self {
            axes,
            data,
            unlabeled_plane: false,
        })
    }

    /// Returns a new ArraySource whose last two dimensions are an unlabeled (row, column) plane.
    pub fn with_unlabeled_plane(axes: AxisSpec, data: ArrayD<T>) -> Result<Self, MaxProjError> {
        let labelled = data.ndim().checked_sub(2).ok_or_else(|| {
            MaxProjError::InvalidLayout("array has no trailing plane".to_string())
        })?;
        if axes.shape() != data.shape()[..labelled] {
            return Err(MaxProjError::InvalidLayout(format!(
                "array of shape {:?} does not match axes {} plus a plane",
                data.shape(),
                axes
            )));
        }
        Ok(Self {
            axes,
            data,
            unlabeled_plane: true,
        })
    }
}

impl<T: Element> Source for ArraySource<T> {
    fn axes(&self) -> &AxisSpec {
        &self.axes
    }

    fn dtype(&self) -> DType {
        T::DTYPE
    }

    fn read(&self, window: &Window) -> Result<VolumeData, MaxProjError> {
        window.validate(&self.axes)?;
        let slice_info = array::build_slice_info(window, self.data.ndim())?;
        let sliced = self.data.slice(slice_info).to_owned();
        Ok(T::into_volume(sliced))
    }

    fn probe_plane(&self) -> Result<Option<(usize, usize)>, MaxProjError> {
        if !self.unlabeled_plane {
            return Ok(None);
        }
        let shape = self.data.shape();
        Ok(Some((shape[shape.len() - 2], shape[shape.len() - 1])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::source::AxisSelection;
    use ndarray::Array;

    fn source() -> ArraySource<u16> {
        let axes = AxisSpec::parse("P:2,Y:2,X:3").unwrap();
        let data = Array::from_shape_vec((2, 2, 3), (0..12).collect())
            .unwrap()
            .into_dyn();
        ArraySource::new(axes, data).unwrap()
    }

    #[test]
    fn shape_mismatch_rejected() {
        let axes = AxisSpec::parse("P:3,Y:2,X:3").unwrap();
        let data = ArrayD::<u16>::zeros(vec![2, 2, 3]);
        assert!(ArraySource::new(axes, data).is_err());
    }

    #[test]
    fn read_one_field() {
        let source = source();
        let window = Window::new(vec![
            AxisSelection::Index(1),
            AxisSelection::All,
            AxisSelection::All,
        ]);
        match source.read(&window).unwrap() {
            VolumeData::Uint16(array) => {
                assert_eq!(&[2, 3], array.shape());
                assert_eq!(vec![6, 7, 8, 9, 10, 11], array.iter().copied().collect::<Vec<_>>());
            }
            _ => panic!("expected u16 data"),
        }
    }

    #[test]
    fn read_rejects_bad_window() {
        let source = source();
        let window = Window::new(vec![AxisSelection::Index(2)]);
        assert!(source.read(&window).is_err());
    }

    #[test]
    fn unlabeled_plane() {
        let axes = AxisSpec::parse("P:2").unwrap();
        let data = ArrayD::<u8>::zeros(vec![2, 4, 5]);
        let source = ArraySource::with_unlabeled_plane(axes, data).unwrap();
        assert_eq!(Some((4, 5)), source.probe_plane().unwrap());
        assert_eq!(DType::Uint8, source.dtype());
        let window = Window::new(vec![AxisSelection::Index(0)]);
        assert_eq!(&[4, 5], source.read(&window).unwrap().shape());
    }
}
