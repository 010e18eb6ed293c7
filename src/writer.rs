//! Output collaborator contract and the OME-TIFF stack writer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use ndarray::{s, ArrayView4};
use tiff::encoder::compression::{Compression as TiffCompression, Deflate, Lzw, Uncompressed};
use tiff::encoder::{colortype, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::MaxProjError;
use crate::models::{BigTiff, Compression, PlaneShape, OUTPUT_AXES};
use crate::source::description;

/// Pixel data size above which `auto` switches to BigTIFF, leaving room for tags and offsets.
const BIGTIFF_THRESHOLD: u64 = (1 << 32) - (1 << 25);

/// Metadata handed to a [StackWriter] with the pixel data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackMetadata {
    /// Axis order of the stack, always `TCYX` where `T` counts fields of view.
    pub axes: String,
    /// Write pages as grayscale (min-is-black).
    pub grayscale: bool,
    pub compression: Compression,
    pub bigtiff: BigTiff,
}

impl StackMetadata {
    /// Returns metadata for a grayscale TCYX stack.
    pub fn tcyx(compression: Compression, bigtiff: BigTiff) -> Self {
        Self {
            axes: OUTPUT_AXES.to_string(),
            grayscale: true,
            compression,
            bigtiff,
        }
    }
}

/// Persists a (field, channel, row, column) u16 stack.
pub trait StackWriter {
    /// Destination of the stack.
    fn path(&self) -> &Path;

    /// Write the whole stack. The destination either receives the complete stack or is left
    /// untouched.
    fn write_stack(
        &self,
        stack: ArrayView4<'_, u16>,
        metadata: &StackMetadata,
    ) -> Result<(), MaxProjError>;
}

/// Partially written output, removed on drop unless committed.
struct PartialOutput {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "Failed to remove partial output");
        }
    }
}

/// Writes multi-page OME-TIFF files, one 16-bit grayscale page per (field, channel).
#[derive(Clone, Debug)]
pub struct TiffStackWriter {
    path: PathBuf,
}

impl TiffStackWriter {
    /// Returns a new TiffStackWriter for `path`.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Sibling file the stack is written to before it is renamed into place.
    fn partial_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        self.path
            .with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4()))
    }
}

impl StackWriter for TiffStackWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_stack(
        &self,
        stack: ArrayView4<'_, u16>,
        metadata: &StackMetadata,
    ) -> Result<(), MaxProjError> {
        if metadata.axes != OUTPUT_AXES {
            return Err(MaxProjError::InvalidConfig(format!(
                "TIFF output requires {} axes, got {}",
                OUTPUT_AXES, metadata.axes
            )));
        }
        if !metadata.grayscale {
            return Err(MaxProjError::InvalidConfig(
                "TIFF output supports grayscale pages only".to_string(),
            ));
        }
        let (fields, channels, rows, columns) = stack.dim();
        let bytes = u64::try_from(stack.len())? * 2;
        let big = match metadata.bigtiff {
            BigTiff::Always => true,
            BigTiff::Auto => bytes > BIGTIFF_THRESHOLD,
            BigTiff::Never if bytes > BIGTIFF_THRESHOLD => {
                return Err(MaxProjError::InvalidConfig(format!(
                    "{} bytes of pixel data do not fit a classic TIFF",
                    bytes
                )))
            }
            BigTiff::Never => false,
        };
        let description = description::ome_xml(fields, PlaneShape::new(channels, rows, columns));

        let mut partial = PartialOutput {
            path: self.partial_path(),
            committed: false,
        };
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial.path)?;
        let mut out = BufWriter::new(file);
        debug!(path = %partial.path.display(), big, "Writing partial output");
        if big {
            let mut encoder = TiffEncoder::new_big(&mut out)?;
            write_compressed(&mut encoder, stack, metadata.compression, &description)?;
        } else {
            let mut encoder = TiffEncoder::new(&mut out)?;
            write_compressed(&mut encoder, stack, metadata.compression, &description)?;
        }
        out.flush()?;
        let file: &File = out.get_ref();
        file.sync_all()?;
        drop(out);

        fs::rename(&partial.path, &self.path)?;
        partial.committed = true;
        info!(
            path = %self.path.display(),
            pages = fields * channels,
            bigtiff = big,
            compression = ?metadata.compression,
            "Wrote output stack"
        );
        Ok(())
    }
}

fn write_compressed<W: Write + Seek, K: TiffKind>(
    encoder: &mut TiffEncoder<W, K>,
    stack: ArrayView4<'_, u16>,
    compression: Compression,
    description: &str,
) -> Result<(), MaxProjError> {
    match compression {
        Compression::None => write_pages(encoder, stack, Uncompressed, description),
        Compression::Lzw => write_pages(encoder, stack, Lzw, description),
        Compression::Deflate => write_pages(encoder, stack, Deflate::default(), description),
    }
}

/// Write one page per (field, channel), channel fastest. The description goes on the first page.
fn write_pages<W: Write + Seek, K: TiffKind, D: TiffCompression + Clone>(
    encoder: &mut TiffEncoder<W, K>,
    stack: ArrayView4<'_, u16>,
    compression: D,
    description: &str,
) -> Result<(), MaxProjError> {
    let (fields, channels, rows, columns) = stack.dim();
    let width = u32::try_from(columns)?;
    let height = u32::try_from(rows)?;
    for field in 0..fields {
        for channel in 0..channels {
            let page: Vec<u16> = stack.slice(s![field, channel, .., ..]).iter().copied().collect();
            let mut image = encoder.new_image_with_compression::<colortype::Gray16, D>(
                width,
                height,
                compression.clone(),
            )?;
            if field == 0 && channel == 0 {
                image.encoder().write_tag(Tag::ImageDescription, description)?;
            }
            image.write_data(&page)?;
        }
    }
    Ok(())
}
