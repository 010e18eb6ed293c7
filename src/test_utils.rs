use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ndarray::{Array, ArrayD, Dimension, IxDyn};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::error::MaxProjError;
use crate::models::*;
use crate::source::{ArraySource, AxisSelection, Source, VolumeData, Window};

/// Create an array whose elements hold their row-major position.
pub(crate) fn ramp<T: num_traits::NumCast>(shape: &[usize]) -> ArrayD<T> {
    let len = shape.iter().product();
    Array::from_iter((0..len).map(|i| num_traits::cast(i).unwrap()))
        .into_shape(IxDyn(shape))
        .unwrap()
}

/// Create a u16 [ArraySource] filled with [ramp] values from a layout such as `P:3,Y:4,X:4`.
pub(crate) fn ramp_source(layout: &str) -> ArraySource<u16> {
    let axes = AxisSpec::parse(layout).unwrap();
    let data = ramp::<u16>(&axes.shape());
    ArraySource::new(axes, data).unwrap()
}

/// Write 16-bit grayscale pages of one size to a TIFF file.
pub(crate) fn write_gray16_tiff(
    path: &Path,
    pages: &[Vec<u16>],
    rows: usize,
    columns: usize,
    description: Option<&str>,
) {
    let pages: Vec<(usize, usize, Vec<u16>)> = pages
        .iter()
        .map(|page| (rows, columns, page.clone()))
        .collect();
    write_gray16_pages(path, &pages, description);
}

/// Write 16-bit grayscale `(rows, columns, values)` pages to a TIFF file.
pub(crate) fn write_gray16_pages(
    path: &Path,
    pages: &[(usize, usize, Vec<u16>)],
    description: Option<&str>,
) {
    let mut out = BufWriter::new(File::create(path).unwrap());
    let mut encoder = TiffEncoder::new(&mut out).unwrap();
    for (i, (rows, columns, values)) in pages.iter().enumerate() {
        let mut image = encoder
            .new_image::<colortype::Gray16>(*columns as u32, *rows as u32)
            .unwrap();
        if let (0, Some(description)) = (i, description) {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, description)
                .unwrap();
        }
        image.write_data(values).unwrap();
    }
}

/// Wraps a source and counts reads.
pub(crate) struct CountingSource<'a, S: ?Sized> {
    inner: &'a S,
    reads: AtomicUsize,
}

impl<'a, S: Source + ?Sized> CountingSource<'a, S> {
    pub(crate) fn new(inner: &'a S) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl<S: Source + ?Sized> Source for CountingSource<'_, S> {
    fn axes(&self) -> &AxisSpec {
        self.inner.axes()
    }

    fn dtype(&self) -> DType {
        self.inner.dtype()
    }

    fn read(&self, window: &Window) -> Result<VolumeData, MaxProjError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(window)
    }

    fn probe_plane(&self) -> Result<Option<(usize, usize)>, MaxProjError> {
        self.inner.probe_plane()
    }
}

/// Wraps a source and fails every read of one index along one axis. Records the indices
/// along that axis that were read.
pub(crate) struct FailingSource<'a, S: ?Sized> {
    inner: &'a S,
    axis: usize,
    fail: usize,
    attempted: Mutex<Vec<usize>>,
}

impl<'a, S: Source + ?Sized> FailingSource<'a, S> {
    pub(crate) fn new(inner: &'a S, label: AxisLabel, fail: usize) -> Self {
        Self {
            axis: inner.axes().index_of(label).unwrap(),
            inner,
            fail,
            attempted: Mutex::new(vec![]),
        }
    }

    /// Indices read so far, sorted.
    pub(crate) fn attempted(&self) -> Vec<usize> {
        let mut attempted = self.attempted.lock().unwrap().clone();
        attempted.sort();
        attempted
    }
}

impl<S: Source + ?Sized> Source for FailingSource<'_, S> {
    fn axes(&self) -> &AxisSpec {
        self.inner.axes()
    }

    fn dtype(&self) -> DType {
        self.inner.dtype()
    }

    fn read(&self, window: &Window) -> Result<VolumeData, MaxProjError> {
        if let Some(AxisSelection::Index(index)) = window.selections().get(self.axis) {
            self.attempted.lock().unwrap().push(*index);
            if *index == self.fail {
                return Err(MaxProjError::SourceRead(format!(
                    "simulated failure reading index {}",
                    index
                )));
            }
        }
        self.inner.read(window)
    }

    fn probe_plane(&self) -> Result<Option<(usize, usize)>, MaxProjError> {
        self.inner.probe_plane()
    }
}

/// Wraps a u16 source and changes the (row, column) size of the reads of chosen indices along
/// one axis. Reads are cropped from the origin, or grown with `u16::MAX`.
pub(crate) struct RaggedSource<'a, S: ?Sized> {
    inner: &'a S,
    axis: usize,
    planes: Vec<(usize, (usize, usize))>,
}

impl<'a, S: Source + ?Sized> RaggedSource<'a, S> {
    pub(crate) fn new(
        inner: &'a S,
        label: AxisLabel,
        planes: Vec<(usize, (usize, usize))>,
    ) -> Self {
        Self {
            axis: inner.axes().index_of(label).unwrap(),
            inner,
            planes,
        }
    }
}

impl<S: Source + ?Sized> Source for RaggedSource<'_, S> {
    fn axes(&self) -> &AxisSpec {
        self.inner.axes()
    }

    fn dtype(&self) -> DType {
        self.inner.dtype()
    }

    fn read(&self, window: &Window) -> Result<VolumeData, MaxProjError> {
        let data = self.inner.read(window)?;
        let plane = match window.selections().get(self.axis) {
            Some(AxisSelection::Index(index)) => self
                .planes
                .iter()
                .find(|(ragged, _)| ragged == index)
                .map(|(_, plane)| *plane),
            _ => None,
        };
        match (data, plane) {
            (VolumeData::Uint16(array), Some((rows, columns))) => {
                let ndim = array.ndim();
                let (read_rows, read_columns) = (array.shape()[ndim - 2], array.shape()[ndim - 1]);
                let mut shape = array.shape().to_vec();
                shape[ndim - 2] = rows;
                shape[ndim - 1] = columns;
                let resized = ArrayD::from_shape_fn(IxDyn(&shape), |index| {
                    if index[ndim - 2] < read_rows && index[ndim - 1] < read_columns {
                        array[index.slice()]
                    } else {
                        u16::MAX
                    }
                });
                Ok(VolumeData::Uint16(resized))
            }
            (data, _) => Ok(data),
        }
    }

    fn probe_plane(&self) -> Result<Option<(usize, usize)>, MaxProjError> {
        self.inner.probe_plane()
    }
}
