//! Concatenation of several TCYX projection stacks into one.
//!
//! Each input's time axis holds its fields of view. Inputs are placed at field offsets of the
//! combined stack, which must be covered exactly once.

use std::time::Instant;

use tracing::info;

use crate::axes::AxisModel;
use crate::error::MaxProjError;
use crate::extractor;
use crate::finalizer;
use crate::models::{AxisLabel, DType, FovPolicy};
use crate::pipeline::{self, PipelineConfig};
use crate::reducer;
use crate::resource_manager::ResourceBudget;
use crate::source::Source;
use crate::summary::{PhaseTimings, RunSummary};
use crate::writer::StackWriter;

/// One input stack and where its first field goes in the combined stack.
struct Part<'a, S: ?Sized> {
    source: &'a S,
    model: AxisModel,
    offset: usize,
    /// One past the last combined field of this input.
    end: usize,
}

impl<'a, S: ?Sized> Part<'a, S> {
    fn new(source: &'a S, model: AxisModel, offset: usize) -> Result<Self, MaxProjError> {
        let end = offset.checked_add(model.total_fields()).ok_or_else(|| {
            MaxProjError::InvalidConfig(format!(
                "offset {} with {} fields of view is out of range",
                offset,
                model.total_fields()
            ))
        })?;
        Ok(Self {
            source,
            model,
            offset,
            end,
        })
    }
}

/// Combine `sources` into one stack written by `writer`.
///
/// # Arguments
///
/// * `sources`: Input stacks, each with a time axis of fields of view
/// * `offsets`: Field offset of each input. Inputs follow each other when unset.
/// * `writer`: Output collaborator
/// * `config`: Run configuration. The field-of-view policy and field limit are ignored.
pub fn combine<S, W>(
    sources: &[S],
    offsets: Option<&[usize]>,
    writer: &W,
    config: &PipelineConfig,
) -> Result<RunSummary, MaxProjError>
where
    S: Source,
    W: StackWriter + ?Sized,
{
    config.validate()?;
    let start = Instant::now();
    if sources.is_empty() {
        return Err(MaxProjError::InvalidConfig(
            "at least one input is required".to_string(),
        ));
    }
    if let Some(offsets) = offsets {
        if offsets.len() != sources.len() {
            return Err(MaxProjError::InvalidConfig(format!(
                "{} offsets given for {} inputs",
                offsets.len(),
                sources.len()
            )));
        }
    }

    let mut parts = Vec::with_capacity(sources.len());
    let mut next = 0;
    for (i, source) in sources.iter().enumerate() {
        let model = AxisModel::classify(source.axes(), FovPolicy::Time, || source.probe_plane())?;
        let offset = offsets.map_or(next, |offsets| offsets[i]);
        let part = Part::new(source, model, offset)?;
        next = part.end;
        info!(
            input = i,
            axes = %source.axes(),
            offset,
            fields = part.model.total_fields(),
            "Combining input"
        );
        parts.push(part);
    }

    let plane = parts[0].model.plane();
    if let Some(part) = parts.iter().find(|part| part.model.plane() != plane) {
        return Err(MaxProjError::InvalidConfig(format!(
            "input planes differ: {:?} and {:?}",
            plane.as_array(),
            part.model.plane().as_array()
        )));
    }
    let dtype = parts[0].source.dtype();
    if parts.iter().any(|part| part.source.dtype() != DType::Uint16) {
        return Err(MaxProjError::UnsupportedPixelType(format!(
            "combined inputs must be uint16, got {}",
            dtype
        )));
    }

    let total = check_coverage(&parts)?;
    let classify_time = start.elapsed();

    let budget = ResourceBudget::detect(config.memory_limit)?;
    let per_field_bytes = plane.len() * DType::Uint16.size_of();
    let workers = match config.workers {
        Some(workers) => workers.min(total).max(1),
        None => budget.plan(total, per_field_bytes, config.safety_multiplier),
    };
    let mut sink = pipeline::open_sink(
        config.sink,
        &budget,
        total,
        plane,
        config.temp_dir.as_deref(),
        writer.path(),
    )?;
    let sink_kind = sink.kind();

    let process_start = Instant::now();
    pipeline::fill_sink(&config.scheduler(workers), &mut sink, total, |index| {
        let part = parts
            .iter()
            .find(|part| part.offset <= index && index < part.end)
            .ok_or(MaxProjError::FieldOfViewOutOfRange { index, total })?;
        let sub = extractor::extract(part.source, &part.model, index - part.offset)?;
        reducer::reduce(sub, plane, index)
    })?;
    let process_time = process_start.elapsed();

    let write_start = Instant::now();
    finalizer::finalize(sink, writer, &config.metadata())?;
    let write_time = write_start.elapsed();

    Ok(RunSummary::new(
        writer.path(),
        total,
        plane,
        parts.iter().map(|part| part.model.total_fields()).sum(),
        Some(AxisLabel::Time),
        dtype,
        workers,
        sink_kind,
        budget.memory(),
        budget.source(),
        PhaseTimings::new(classify_time, process_time, write_time),
    ))
}

/// Returns the combined field count, checking that the parts cover `[0, total)` exactly once.
fn check_coverage<S: ?Sized>(parts: &[Part<'_, S>]) -> Result<usize, MaxProjError> {
    let mut ranges: Vec<(usize, usize)> = parts.iter().map(|part| (part.offset, part.end)).collect();
    ranges.sort();
    let mut covered = 0;
    for (start, end) in ranges {
        if start > covered {
            return Err(MaxProjError::InvalidConfig(format!(
                "fields of view {}..{} are not covered by any input",
                covered, start
            )));
        }
        if start < covered {
            return Err(MaxProjError::InvalidConfig(format!(
                "inputs overlap at field of view {}",
                start
            )));
        }
        covered = end;
    }
    Ok(covered)
}
