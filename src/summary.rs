//! Run summary

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::MaxProjError;
use crate::models::{AxisLabel, DType, PlaneShape, SinkKind, OUTPUT_AXES};
use crate::resource_manager::MemorySource;

/// Wall clock time of each phase of a run, in seconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    pub classify: f64,
    pub process: f64,
    pub write: f64,
    pub total: f64,
}

impl PhaseTimings {
    /// Returns timings from phase durations.
    pub fn new(classify: Duration, process: Duration, write: Duration) -> Self {
        Self {
            classify: classify.as_secs_f64(),
            process: process.as_secs_f64(),
            write: write.as_secs_f64(),
            total: (classify + process + write).as_secs_f64(),
        }
    }
}

/// What a run did, for logging and optional JSON output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    /// Input files, when known.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Output axis order.
    pub axes: &'static str,
    /// Output shape in `axes` order.
    pub shape: [usize; 4],
    /// Fields of view available in the inputs.
    pub fields_available: usize,
    pub fov_axis: Option<AxisLabel>,
    pub dtype: DType,
    pub workers: usize,
    pub sink: SinkKind,
    /// Memory budget in bytes.
    pub memory_budget: u64,
    pub memory_source: MemorySource,
    pub timings: PhaseTimings,
}

impl RunSummary {
    /// Returns a new RunSummary with no inputs recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        output: &Path,
        total: usize,
        plane: PlaneShape,
        fields_available: usize,
        fov_axis: Option<AxisLabel>,
        dtype: DType,
        workers: usize,
        sink: SinkKind,
        memory_budget: u64,
        memory_source: MemorySource,
        timings: PhaseTimings,
    ) -> Self {
        Self {
            inputs: vec![],
            output: output.to_path_buf(),
            axes: OUTPUT_AXES,
            shape: [total, plane.channels, plane.rows, plane.columns],
            fields_available,
            fov_axis,
            dtype,
            workers,
            sink,
            memory_budget,
            memory_source,
            timings,
        }
    }

    /// Write the summary as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), MaxProjError> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
