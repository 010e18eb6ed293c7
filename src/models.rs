//! Data types and associated functions and methods

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use strum_macros::Display;

use crate::error::MaxProjError;

/// Axis labels understood by the pipeline.
///
/// The vocabulary is closed. Sources reporting any other label are rejected.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AxisLabel {
    /// Multi-position (multi-point) axis, `P`
    Position,
    /// Multi-tile axis, `M`
    Tile,
    /// Time, `T`
    Time,
    /// Depth (Z), `Z`
    Depth,
    /// Channel, `C`
    Channel,
    /// Row (Y), `Y`
    Row,
    /// Column (X), `X`
    Column,
}

impl AxisLabel {
    /// Returns the single letter code of the label.
    pub fn code(self) -> char {
        match self {
            Self::Position => 'P',
            Self::Tile => 'M',
            Self::Time => 'T',
            Self::Depth => 'Z',
            Self::Channel => 'C',
            Self::Row => 'Y',
            Self::Column => 'X',
        }
    }

    /// Parse a single letter axis code.
    ///
    /// `V` is accepted as an alias of `P`, as some readers name the multi-point axis that way.
    pub fn from_code(code: char) -> Result<Self, MaxProjError> {
        match code.to_ascii_uppercase() {
            'P' | 'V' => Ok(Self::Position),
            'M' => Ok(Self::Tile),
            'T' => Ok(Self::Time),
            'Z' => Ok(Self::Depth),
            'C' => Ok(Self::Channel),
            'Y' => Ok(Self::Row),
            'X' => Ok(Self::Column),
            other => Err(MaxProjError::UnknownAxisLabel(other.to_string())),
        }
    }
}

impl FromStr for AxisLabel {
    type Err = MaxProjError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(code), None) => Self::from_code(code),
            _ => match s.trim().to_ascii_lowercase().as_str() {
                "position" => Ok(Self::Position),
                "tile" => Ok(Self::Tile),
                "time" => Ok(Self::Time),
                "depth" => Ok(Self::Depth),
                "channel" => Ok(Self::Channel),
                "row" => Ok(Self::Row),
                "column" => Ok(Self::Column),
                _ => Err(MaxProjError::UnknownAxisLabel(s.to_string())),
            },
        }
    }
}

/// An ordered sequence of (label, length) pairs.
///
/// Labels are unique within a spec.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AxisSpec {
    axes: Vec<(AxisLabel, usize)>,
}

impl AxisSpec {
    /// Returns a new AxisSpec, rejecting duplicate labels.
    pub fn new(axes: Vec<(AxisLabel, usize)>) -> Result<Self, MaxProjError> {
        for (i, (label, _)) in axes.iter().enumerate() {
            if axes[..i].iter().any(|(other, _)| other == label) {
                return Err(MaxProjError::DuplicateAxis(*label));
            }
        }
        Ok(Self { axes })
    }

    /// Parse a layout such as `P:3,Z:5,C:2,Y:512,X:512`.
    pub fn parse(layout: &str) -> Result<Self, MaxProjError> {
        let mut axes = vec![];
        for item in layout.split(',').filter(|item| !item.trim().is_empty()) {
            let (label, length) = item.split_once(':').ok_or_else(|| {
                MaxProjError::InvalidLayout(format!("expected LABEL:LENGTH, got {:?}", item))
            })?;
            let label: AxisLabel = label.parse()?;
            let length: usize = length.trim().parse().map_err(|_| {
                MaxProjError::InvalidLayout(format!("invalid length for axis {}: {:?}", label, length))
            })?;
            if length == 0 {
                return Err(MaxProjError::InvalidLayout(format!(
                    "axis {} must have length greater than 0",
                    label
                )));
            }
            axes.push((label, length));
        }
        Self::new(axes)
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// Returns true when the spec has no axes.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Iterate over (label, length) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (AxisLabel, usize)> + '_ {
        self.axes.iter().copied()
    }

    /// Labels in order.
    pub fn labels(&self) -> Vec<AxisLabel> {
        self.axes.iter().map(|(label, _)| *label).collect()
    }

    /// Lengths in order.
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|(_, length)| *length).collect()
    }

    /// Returns the length of an axis, if present.
    pub fn len_of(&self, label: AxisLabel) -> Option<usize> {
        self.axes
            .iter()
            .find(|(other, _)| *other == label)
            .map(|(_, length)| *length)
    }

    /// Returns the position of an axis, if present.
    pub fn index_of(&self, label: AxisLabel) -> Option<usize> {
        self.axes.iter().position(|(other, _)| *other == label)
    }

    /// Returns true when the axis is present.
    pub fn contains(&self, label: AxisLabel) -> bool {
        self.index_of(label).is_some()
    }

    /// Returns a copy of the spec without `label`.
    pub fn without(&self, label: AxisLabel) -> Result<Self, MaxProjError> {
        let index = self
            .index_of(label)
            .ok_or(MaxProjError::AxisNotFound(label))?;
        let mut axes = self.axes.clone();
        axes.remove(index);
        Ok(Self { axes })
    }

    /// Returns a copy of the spec with `label` inserted at `index`.
    pub fn with_inserted(
        &self,
        index: usize,
        label: AxisLabel,
        length: usize,
    ) -> Result<Self, MaxProjError> {
        let mut axes = self.axes.clone();
        axes.insert(index.min(axes.len()), (label, length));
        Self::new(axes)
    }

    /// Letter codes of the axes, e.g. `PZCYX`.
    pub fn codes(&self) -> String {
        self.axes.iter().map(|(label, _)| label.code()).collect()
    }
}

impl fmt::Display for AxisSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .axes
            .iter()
            .map(|(label, length)| format!("{}:{}", label.code(), length))
            .collect();
        write!(f, "{}", items.join(","))
    }
}

/// Supported source pixel types
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    /// [u8]
    Uint8,
    /// [u16]
    Uint16,
    /// [u32]
    Uint32,
    /// [f32]
    Float32,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Uint8 => std::mem::size_of::<u8>(),
            Self::Uint16 => std::mem::size_of::<u16>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Float32 => std::mem::size_of::<f32>(),
        }
    }
}

/// Declared (channel, row, column) shape of every projected plane in a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PlaneShape {
    pub channels: usize,
    pub rows: usize,
    pub columns: usize,
}

impl PlaneShape {
    /// Returns a new PlaneShape.
    pub fn new(channels: usize, rows: usize, columns: usize) -> Self {
        Self {
            channels,
            rows,
            columns,
        }
    }

    /// Number of elements in one plane.
    pub fn len(&self) -> usize {
        self.channels * self.rows * self.columns
    }

    /// Returns true when the plane has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape as `[channels, rows, columns]`.
    pub fn as_array(&self) -> [usize; 3] {
        [self.channels, self.rows, self.columns]
    }
}

/// Canonical axis order of the output stack. `T` counts fields of view.
pub const OUTPUT_AXES: &str = "TCYX";

/// Which axis supplies the fields of view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FovPolicy {
    /// A multi-step position axis, else a multi-step tile axis, else a single implicit field.
    /// A time axis is always reduced.
    #[default]
    Auto,
    /// The position axis.
    Position,
    /// The tile axis.
    Tile,
    /// Treat each time point as an independent field of view.
    Time,
}

/// Backing store for the accumulation buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Resident when the output fits comfortably in the memory budget, disk-backed otherwise.
    #[default]
    Auto,
    /// Allocated in memory.
    Resident,
    /// Memory-mapped temporary file.
    Disk,
}

/// Output compression
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Uncompressed strips
    None,
    /// LZW
    #[default]
    Lzw,
    /// Deflate (zlib)
    Deflate,
}

/// Output container size
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BigTiff {
    /// BigTIFF when the pixel data exceeds 4 GiB.
    #[default]
    Auto,
    /// Always BigTIFF.
    Always,
    /// Always classic TIFF.
    Never,
}
