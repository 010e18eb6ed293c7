//! End-to-end projection of one source into one output stack.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array3;
use tracing::{info, warn};

use crate::axes::AxisModel;
use crate::error::MaxProjError;
use crate::extractor;
use crate::finalizer;
use crate::models::{BigTiff, Compression, FovPolicy, PlaneShape, SinkKind};
use crate::reducer;
use crate::resource_manager::{ResourceBudget, DEFAULT_SAFETY_MULTIPLIER};
use crate::scheduler::Scheduler;
use crate::sink::AccumulationSink;
use crate::source::Source;
use crate::summary::{PhaseTimings, RunSummary};
use crate::writer::{StackMetadata, StackWriter};

/// Every tunable of a run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// How to choose the field-of-view axis.
    pub fov_policy: FovPolicy,
    /// Process at most this many fields of view, starting from 0.
    pub max_fields: Option<usize>,
    pub sink: SinkKind,
    /// Fixed worker count. Planned from the resource budget when unset.
    pub workers: Option<usize>,
    /// Memory budget in bytes. Available system memory when unset.
    pub memory_limit: Option<u64>,
    pub safety_multiplier: f64,
    /// Directory of a disk-backed buffer. The system temporary directory when unset.
    pub temp_dir: Option<PathBuf>,
    pub compression: Compression,
    pub bigtiff: BigTiff,
    /// Checked between batches. Setting it stops the run.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fov_policy: FovPolicy::Auto,
            max_fields: None,
            sink: SinkKind::Auto,
            workers: None,
            memory_limit: None,
            safety_multiplier: DEFAULT_SAFETY_MULTIPLIER,
            temp_dir: None,
            compression: Compression::Lzw,
            bigtiff: BigTiff::Auto,
            cancel: None,
        }
    }
}

impl PipelineConfig {
    /// Check values that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), MaxProjError> {
        if self.max_fields == Some(0) {
            return Err(MaxProjError::InvalidConfig(
                "max fields of view must be greater than 0".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(MaxProjError::InvalidConfig(
                "worker count must be greater than 0".to_string(),
            ));
        }
        if !(self.safety_multiplier.is_finite() && self.safety_multiplier > 0.0) {
            return Err(MaxProjError::InvalidConfig(format!(
                "safety multiplier must be a positive number, got {}",
                self.safety_multiplier
            )));
        }
        Ok(())
    }

    pub(crate) fn scheduler(&self, workers: usize) -> Scheduler {
        let scheduler = Scheduler::new(workers);
        match &self.cancel {
            Some(cancel) => scheduler.with_cancel_flag(cancel.clone()),
            None => scheduler,
        }
    }

    pub(crate) fn metadata(&self) -> StackMetadata {
        StackMetadata::tcyx(self.compression, self.bigtiff)
    }
}

/// Create the accumulation buffer for a run.
///
/// `auto` keeps the buffer in memory when it needs at most half of the memory budget.
pub(crate) fn open_sink(
    kind: SinkKind,
    budget: &ResourceBudget,
    total: usize,
    plane: PlaneShape,
    temp_dir: Option<&Path>,
    output: &Path,
) -> Result<AccumulationSink, MaxProjError> {
    let bytes = u64::try_from(total)?
        .saturating_mul(u64::try_from(plane.len())?)
        .saturating_mul(2);
    let kind = match kind {
        SinkKind::Auto if bytes <= budget.memory() / 2 => SinkKind::Resident,
        SinkKind::Auto => SinkKind::Disk,
        kind => kind,
    };
    info!(kind = ?kind, bytes, "Allocating accumulation buffer");
    match kind {
        SinkKind::Disk => {
            let dir = temp_dir.map_or_else(std::env::temp_dir, Path::to_path_buf);
            let basename = output
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "maxproj".to_string());
            AccumulationSink::disk(total, plane, &dir, &basename)
        }
        _ => AccumulationSink::resident(total, plane),
    }
}

/// Run `job` for every index with `scheduler`, preserving a disk-backed buffer on failure.
pub(crate) fn fill_sink<F>(
    scheduler: &Scheduler,
    sink: &mut AccumulationSink,
    total: usize,
    job: F,
) -> Result<(), MaxProjError>
where
    F: Fn(usize) -> Result<Array3<u16>, MaxProjError> + Sync,
{
    let indices: Vec<usize> = (0..total).collect();
    let result = scheduler.run(sink, &indices, job);
    if result.is_err() {
        if let Some(path) = sink.preserve() {
            warn!(
                path = %path.display(),
                written = total - sink.missing_indices().len(),
                total,
                "Run failed; keeping partially filled accumulation buffer"
            );
        }
    }
    result
}

/// Project every field of view of `source` and write the stack with `writer`.
///
/// # Arguments
///
/// * `source`: Input data
/// * `writer`: Output collaborator
/// * `config`: Run configuration
pub fn project<S, W>(source: &S, writer: &W, config: &PipelineConfig) -> Result<RunSummary, MaxProjError>
where
    S: Source + ?Sized,
    W: StackWriter + ?Sized,
{
    config.validate()?;
    let start = Instant::now();
    let model = AxisModel::classify(source.axes(), config.fov_policy, || source.probe_plane())?;
    let available = model.total_fields();
    let total = config.max_fields.map_or(available, |limit| limit.min(available));
    let plane = model.plane();
    info!(
        axes = %source.axes(),
        fov_axis = ?model.fov_axis(),
        total,
        available,
        plane = ?plane.as_array(),
        "Classified axes"
    );
    let classify_time = start.elapsed();

    let budget = ResourceBudget::detect(config.memory_limit)?;
    let per_field_bytes = model.field_bytes(source.dtype());
    let workers = match config.workers {
        Some(workers) => workers.min(total).max(1),
        None => budget.plan(total, per_field_bytes, config.safety_multiplier),
    };
    let mut sink = open_sink(
        config.sink,
        &budget,
        total,
        plane,
        config.temp_dir.as_deref(),
        writer.path(),
    )?;
    let sink_kind = sink.kind();

    let process_start = Instant::now();
    fill_sink(&config.scheduler(workers), &mut sink, total, |index| {
        let sub = extractor::extract(source, &model, index)?;
        reducer::reduce(sub, plane, index)
    })?;
    let process_time = process_start.elapsed();

    let write_start = Instant::now();
    finalizer::finalize(sink, writer, &config.metadata())?;
    let write_time = write_start.elapsed();

    let timings = PhaseTimings::new(classify_time, process_time, write_time);
    info!(
        "Total time: {:.2}s (classify {:.2}s, process {:.2}s, write {:.2}s)",
        timings.total, timings.classify, timings.process, timings.write
    );
    Ok(RunSummary::new(
        writer.path(),
        total,
        plane,
        available,
        model.fov_axis(),
        source.dtype(),
        workers,
        sink_kind,
        budget.memory(),
        budget.source(),
        timings,
    ))
}
