//! This crate computes per-field-of-view maximum intensity projections of multi-dimensional
//! microscope stacks. Each field of view (a stage position or tile) has its depth and time axes
//! collapsed by an element-wise maximum, and the results are written as a single
//! (field of view, channel, row, column) stack.
//!
//! Processing streams one field of view per worker at a time, so peak memory is bounded by the
//! worker count rather than by the size of the input. Workers are planned from the available
//! memory and CPUs, and the output is accumulated either in memory or in a memory-mapped
//! temporary file.
//!
//! The pipeline is built from the following components:
//!
//! * [axes] classifies the input axes and maps a field of view index to a read window.
//! * [extractor] reads one field of view from a [source::Source].
//! * [reducer] collapses depth and time with [operation::Max] and reorders to (C, Y, X).
//! * [sink] holds the accumulation buffer, addressed by field of view index.
//! * [scheduler] runs fields of view in batches on a [rayon] thread pool.
//! * [finalizer] hands the completed buffer to a [writer::StackWriter].
//!
//! It is built on top of a number of open source components.
//!
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used in numerical
//!   computation.
//! * [tiff] decodes input stacks and encodes the output stack.
//! * [memmap2] maps input files and the disk-backed accumulation buffer.
//! * [sysinfo] reports available memory.

pub mod array;
pub mod axes;
pub mod cli;
pub mod combine;
pub mod error;
pub mod extractor;
pub mod finalizer;
pub mod models;
pub mod operation;
pub mod pipeline;
pub mod reducer;
pub mod resource_manager;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod summary;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod writer;
