//! Error handling.

use std::error::Error;
use std::path::PathBuf;

use ndarray::ShapeError;
use thiserror::Error;
use tracing::{event, Level};

use crate::models::AxisLabel;

/// maxproj error type
///
/// This type encapsulates the various errors that may occur during a run.
/// Each variant belongs to one [ErrorKind], which decides how the run ends.
#[derive(Debug, Error)]
pub enum MaxProjError {
    /// An axis referenced by the pipeline is not present in the axis spec
    #[error("axis {0} is not present in the axis spec")]
    AxisNotFound(AxisLabel),

    /// The run was cancelled between batches
    #[error("run cancelled after {completed} of {total} fields of view")]
    Cancelled { completed: usize, total: usize },

    /// An axis label appears more than once in an axis spec
    #[error("axis {0} appears more than once")]
    DuplicateAxis(AxisLabel),

    /// Processing a single field of view failed
    #[error("failed to process field of view {index}")]
    FieldOfView {
        index: usize,
        #[source]
        source: Box<MaxProjError>,
    },

    /// A field of view index outside of the run was requested
    #[error("field of view {index} is out of range (total {total})")]
    FieldOfViewOutOfRange { index: usize, total: usize },

    /// Finalize was called before every field of view was written
    #[error("{missing} of {total} fields of view were never written (first missing: {first})")]
    IncompleteBuffer {
        missing: usize,
        first: usize,
        total: usize,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Page layout does not describe the input
    #[error("invalid page layout: {0}")]
    InvalidLayout(String),

    /// File I/O error
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Error serialising the run summary
    #[error("failed to serialise run summary")]
    Json(#[from] serde_json::Error),

    /// Available memory could not be determined
    #[error("available system memory reported as 0")]
    MemoryTelemetry,

    /// Memory mapped buffer cannot be viewed as u16
    #[error("accumulation buffer is not aligned for 16-bit access")]
    MisalignedBuffer,

    /// Neither rows nor columns could be found or inferred
    #[error("source has no row or column axis and the plane shape could not be inferred")]
    MissingPlaneAxes,

    /// The output writer failed
    #[error("failed to write output {}{}", .path.display(), preserved_note(.preserved))]
    OutputWrite {
        path: PathBuf,
        /// Backing file of the accumulation buffer, kept for inspection
        preserved: Option<PathBuf>,
        #[source]
        source: Box<MaxProjError>,
    },

    /// Two workers were handed the same slot in one batch
    #[error("field of view {index} was scheduled twice in one batch")]
    OverlappingSlot { index: usize },

    /// A plane does not fit the slot it is written to
    #[error("plane of shape {actual:?} does not match slot shape {expected:?}")]
    PlaneShape {
        expected: [usize; 3],
        actual: Vec<usize>,
    },

    /// Error creating an ndarray array from a shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// The source reported a failure for a read window
    #[error("source read failed: {0}")]
    SourceRead(String),

    /// Error building the worker pool
    #[error("failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Error decoding or encoding TIFF data
    #[error("TIFF error")]
    Tiff(#[from] tiff::TiffError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Axis label outside the supported vocabulary
    #[error("unknown axis label {0:?}")]
    UnknownAxisLabel(String),

    /// Pixel type the pipeline cannot reduce
    #[error("unsupported pixel type {0}")]
    UnsupportedPixelType(String),

    /// A read window does not match the rank of the source
    #[error("read window has {window} selections but the source has {axes} axes")]
    WindowRank { window: usize, axes: usize },
}

/// Classification of errors, following how a failed run is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad axis roles, layout or options. Nothing has been processed.
    Configuration,
    /// A field of view could not be read or decoded.
    SourceRead,
    /// A plane did not match its slot.
    ShapeMismatch,
    /// System resources could not be obtained.
    Resource,
    /// The output writer failed. The accumulation buffer is preserved.
    OutputWrite,
    /// The run was cancelled.
    Cancelled,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Process exit code for this kind of failure.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::SourceRead => 3,
            Self::OutputWrite => 4,
            Self::Resource => 5,
            Self::Cancelled => 130,
            Self::ShapeMismatch | Self::Internal => 1,
        }
    }
}

impl MaxProjError {
    /// Returns the [ErrorKind] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaxProjError::AxisNotFound(_)
            | MaxProjError::DuplicateAxis(_)
            | MaxProjError::FieldOfViewOutOfRange { .. }
            | MaxProjError::InvalidConfig(_)
            | MaxProjError::InvalidLayout(_)
            | MaxProjError::MissingPlaneAxes
            | MaxProjError::UnknownAxisLabel(_)
            | MaxProjError::UnsupportedPixelType(_) => ErrorKind::Configuration,

            MaxProjError::SourceRead(_) | MaxProjError::Tiff(_) => ErrorKind::SourceRead,

            // A per-field failure is classified by its cause, except that a bare I/O error
            // inside a field is still a read failure.
            MaxProjError::FieldOfView { source, .. } => match source.kind() {
                ErrorKind::Internal => ErrorKind::SourceRead,
                kind => kind,
            },

            MaxProjError::PlaneShape { .. } => ErrorKind::ShapeMismatch,

            MaxProjError::MemoryTelemetry
            | MaxProjError::MisalignedBuffer
            | MaxProjError::ThreadPool(_) => ErrorKind::Resource,

            MaxProjError::OutputWrite { .. } => ErrorKind::OutputWrite,

            MaxProjError::Cancelled { .. } => ErrorKind::Cancelled,

            MaxProjError::IncompleteBuffer { .. }
            | MaxProjError::Io(_)
            | MaxProjError::Json(_)
            | MaxProjError::OverlappingSlot { .. }
            | MaxProjError::ShapeInvalid(_)
            | MaxProjError::TryFromInt(_)
            | MaxProjError::WindowRank { .. } => ErrorKind::Internal,
        }
    }

    /// Wrap an error as the failure of one field of view.
    pub fn in_field(self, index: usize) -> Self {
        MaxProjError::FieldOfView {
            index,
            source: Box::new(self),
        }
    }
}

fn preserved_note(preserved: &Option<PathBuf>) -> String {
    match preserved {
        Some(path) => format!(" (accumulation buffer preserved at {})", path.display()),
        None => String::new(),
    }
}

/// Returns the chain of messages for an error, outermost first, without duplicates.
pub fn error_chain(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        messages.push(source.to_string());
        current = source.source();
    }
    messages.dedup();
    messages
}

/// Log an error and each of its causes.
pub fn report(error: &MaxProjError) {
    let mut chain = error_chain(error).into_iter();
    if let Some(message) = chain.next() {
        event!(Level::ERROR, "{}", message);
    }
    for cause in chain {
        event!(Level::ERROR, "Caused by: {}", cause);
    }
}
