//! Multi-page TIFF source.
//!
//! Every page holds one (row, column) plane. The outer axes of the page sequence come from a
//! caller supplied layout, the file's `ImageDescription`, or default to a single depth axis.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use memmap2::Mmap;
use ndarray::{Array2, ArrayD};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, info, warn};

use crate::array;
use crate::error::MaxProjError;
use crate::models::{AxisLabel, AxisSpec, DType};
use crate::operation::Element;
use crate::source::{description, AxisSelection, Source, VolumeData, Window};

/// Shared read-only mapping of the input file.
#[derive(Clone)]
struct SharedMap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMap {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

type PageDecoder = Decoder<Cursor<SharedMap>>;

/// Element types that can be taken from a decoded page.
trait PageElement: Element {
    fn from_decoded(result: DecodingResult) -> Option<Vec<Self>>;
}

macro_rules! impl_page_element {
    ($t:ty, $variant:ident) => {
        impl PageElement for $t {
            fn from_decoded(result: DecodingResult) -> Option<Vec<Self>> {
                match result {
                    DecodingResult::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

impl_page_element!(u8, U8);
impl_page_element!(u16, U16);
impl_page_element!(u32, U32);
impl_page_element!(f32, F32);

/// A multi-page grayscale TIFF file.
///
/// The file is memory-mapped once. Each read takes a decoder of its own from a small pool, so
/// reads from several workers never share decoder state.
pub struct TiffSource {
    path: PathBuf,
    map: SharedMap,
    axes: AxisSpec,
    /// Outer (page) axes, slowest first.
    pages: AxisSpec,
    dtype: DType,
    decoders: Mutex<Vec<PageDecoder>>,
}

impl TiffSource {
    /// Open a TIFF file.
    ///
    /// # Arguments
    ///
    /// * `path`: Path of the file
    /// * `layout`: Optional page layout overriding the one recorded in the file
    pub fn open(path: &Path, layout: Option<AxisSpec>) -> Result<Self, MaxProjError> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the file is not expected to change during a run.
        let map = SharedMap(Arc::new(unsafe { Mmap::map(&file)? }));
        let mut decoder = Self::decoder(&map)?;

        let (width, height) = decoder.dimensions()?;
        let dtype = page_dtype(&mut decoder)?;
        let recorded = match decoder.find_tag(Tag::ImageDescription)? {
            Some(value) => Some(value.into_string()?),
            None => None,
        };

        let mut page_count = 1;
        let mut ragged = 0;
        while decoder.more_images() {
            decoder.next_image()?;
            if decoder.dimensions()? != (width, height) {
                ragged += 1;
            }
            if page_dtype(&mut decoder)? != dtype {
                return Err(MaxProjError::SourceRead(format!(
                    "page {} has a different pixel type from page 0",
                    page_count
                )));
            }
            page_count += 1;
        }

        let pages = match layout {
            Some(layout) => layout,
            None => match recorded.as_deref().and_then(description::page_layout) {
                Some(layout) => layout?,
                None => AxisSpec::new(vec![(AxisLabel::Depth, page_count)])?,
            },
        };
        if pages.contains(AxisLabel::Row) || pages.contains(AxisLabel::Column) {
            return Err(MaxProjError::InvalidLayout(format!(
                "page layout {} must not contain row or column axes",
                pages
            )));
        }
        let expected: usize = pages.shape().iter().product();
        if expected != page_count {
            return Err(MaxProjError::InvalidLayout(format!(
                "page layout {} describes {} pages but {} has {}",
                pages,
                expected,
                path.display(),
                page_count
            )));
        }

        let mut axes = pages.clone();
        axes = axes.with_inserted(axes.ndim(), AxisLabel::Row, usize::try_from(height)?)?;
        axes = axes.with_inserted(axes.ndim(), AxisLabel::Column, usize::try_from(width)?)?;
        info!(path = %path.display(), %axes, %dtype, "Opened TIFF source");
        if ragged > 0 {
            warn!(
                path = %path.display(),
                pages = ragged,
                "Pages differ in size from page 0 and will be cropped or padded when read"
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            map,
            axes,
            pages,
            dtype,
            decoders: Mutex::new(vec![decoder]),
        })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decoder(map: &SharedMap) -> Result<PageDecoder, MaxProjError> {
        Ok(Decoder::new(Cursor::new(map.clone()))?.with_limits(Limits::unlimited()))
    }

    /// Take a decoder from the pool, or create one.
    fn checkout(&self) -> Result<PageDecoder, MaxProjError> {
        let pooled = match self.decoders.lock() {
            Ok(mut decoders) => decoders.pop(),
            Err(_) => None,
        };
        match pooled {
            Some(decoder) => Ok(decoder),
            None => Self::decoder(&self.map),
        }
    }

    fn checkin(&self, decoder: PageDecoder) {
        if let Ok(mut decoders) = self.decoders.lock() {
            decoders.push(decoder);
        }
    }

    /// Page numbers selected by the outer part of a window, in row-major order.
    fn page_numbers(&self, selections: &[AxisSelection]) -> Vec<usize> {
        let mut pages = vec![0];
        for (selection, (_, length)) in selections.iter().zip(self.pages.iter()) {
            let indices: Vec<usize> = match selection {
                AxisSelection::All => (0..length).collect(),
                AxisSelection::Index(index) => vec![*index],
            };
            pages = pages
                .iter()
                .flat_map(|page| indices.iter().map(move |index| page * length + index))
                .collect();
        }
        pages
    }

    fn read_pages<T: PageElement>(&self, window: &Window) -> Result<ArrayD<T>, MaxProjError> {
        let outer = self.pages.ndim();
        let (page_selections, plane_selections) = window.selections().split_at(outer);
        let page_numbers = self.page_numbers(page_selections);

        let mut decoder = self.checkout()?;
        // The first page read decides the plane of the whole read.
        let mut plane: Option<(usize, usize)> = None;
        let mut fitted = 0;
        let mut data = vec![];
        for page in &page_numbers {
            decoder.seek_to_image(*page)?;
            let (width, height) = decoder.dimensions()?;
            let page_shape = (usize::try_from(height)?, usize::try_from(width)?);
            let values = T::from_decoded(decoder.read_image()?).ok_or_else(|| {
                MaxProjError::SourceRead(format!(
                    "page {} of {} does not decode as {}",
                    page,
                    self.path.display(),
                    self.dtype
                ))
            })?;
            if values.len() != page_shape.0 * page_shape.1 {
                return Err(MaxProjError::SourceRead(format!(
                    "page {} of {} has {} values, expected {}",
                    page,
                    self.path.display(),
                    values.len(),
                    page_shape.0 * page_shape.1
                )));
            }
            let target = *plane.get_or_insert(page_shape);
            if page_shape == target {
                data.extend(values);
            } else {
                fitted += 1;
                data.extend(fit_page(values, page_shape, target)?);
            }
        }
        self.checkin(decoder);
        debug!(pages = page_numbers.len(), "Read TIFF pages");
        if fitted > 0 {
            warn!(
                path = %self.path.display(),
                pages = fitted,
                plane = ?plane,
                "Pages of one read differ in size and were cropped or padded"
            );
        }

        let (rows, columns) = plane.unwrap_or((
            self.axes.len_of(AxisLabel::Row).unwrap_or(1),
            self.axes.len_of(AxisLabel::Column).unwrap_or(1),
        ));
        for (selection, length) in plane_selections.iter().zip([rows, columns]) {
            if let AxisSelection::Index(index) = selection {
                if *index >= length {
                    return Err(MaxProjError::SourceRead(format!(
                        "index {} is outside a plane axis of length {} in {}",
                        index,
                        length,
                        self.path.display()
                    )));
                }
            }
        }

        let mut shape = Window::new(page_selections.to_vec()).selected_shape(&self.pages);
        shape.extend([rows, columns]);
        let stacked = array::build_array_from_shape(shape, data)?;

        if plane_selections.iter().all(|s| *s == AxisSelection::All) {
            return Ok(stacked);
        }
        let kept = stacked.ndim() - 2;
        let mut selections = vec![AxisSelection::All; kept];
        selections.extend_from_slice(plane_selections);
        let slice_info = array::build_slice_info(&Window::new(selections), stacked.ndim())?;
        Ok(stacked.slice(slice_info).to_owned())
    }
}

impl Source for TiffSource {
    fn axes(&self) -> &AxisSpec {
        &self.axes
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn read(&self, window: &Window) -> Result<VolumeData, MaxProjError> {
        window.validate(&self.axes)?;
        Ok(match self.dtype {
            DType::Uint8 => u8::into_volume(self.read_pages::<u8>(window)?),
            DType::Uint16 => u16::into_volume(self.read_pages::<u16>(window)?),
            DType::Uint32 => u32::into_volume(self.read_pages::<u32>(window)?),
            DType::Float32 => f32::into_volume(self.read_pages::<f32>(window)?),
        })
    }
}

/// Crop or pad a row-major page to `to`, replicating the last row and column.
fn fit_page<T: Copy>(
    values: Vec<T>,
    from: (usize, usize),
    to: (usize, usize),
) -> Result<Vec<T>, MaxProjError> {
    if from.0 == 0 || from.1 == 0 {
        return Err(MaxProjError::SourceRead(format!(
            "cannot fit an empty {:?} page to {:?}",
            from, to
        )));
    }
    let page = Array2::from_shape_vec(from, values)?;
    let fitted = Array2::from_shape_fn(to, |(y, x)| page[[y.min(from.0 - 1), x.min(from.1 - 1)]]);
    Ok(fitted.into_raw_vec())
}

/// Pixel type of the decoder's current page.
fn page_dtype(decoder: &mut PageDecoder) -> Result<DType, MaxProjError> {
    let color_type = decoder.colortype()?;
    let float = decoder
        .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
        .map_or(false, |formats| formats.first() == Some(&3));
    match (color_type, float) {
        (ColorType::Gray(8), false) => Ok(DType::Uint8),
        (ColorType::Gray(16), false) => Ok(DType::Uint16),
        (ColorType::Gray(32), false) => Ok(DType::Uint32),
        (ColorType::Gray(32), true) => Ok(DType::Float32),
        (other, _) => Err(MaxProjError::UnsupportedPixelType(format!("{:?}", other))),
    }
}
