//! Worker scheduling.
//!
//! Fields of view are processed in batches of `worker_count` on a rayon thread pool that lives
//! for one run. A batch finishes (or fails) before the next one starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array3;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::MaxProjError;
use crate::sink::AccumulationSink;

/// Progress is logged each time this many more fields have completed.
const PROGRESS_INTERVAL: usize = 10;

/// Drives per-field work across batches of a bounded worker pool.
#[derive(Clone, Debug)]
pub struct Scheduler {
    worker_count: usize,
    cancel: Arc<AtomicBool>,
}

impl Scheduler {
    /// Returns a new Scheduler. A worker count of 0 is treated as 1.
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a shared cancellation flag. It is checked between batches.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Number of workers, and so the batch size.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// The cancellation flag.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Process `indices`, writing the plane produced by `job` for each index into `sink`.
    ///
    /// The first failing field aborts the run: later batches are never started, while fields of
    /// the failing batch that already completed stay written.
    ///
    /// # Arguments
    ///
    /// * `sink`: Destination of the planes
    /// * `indices`: Field of view indices, processed in this order
    /// * `job`: Produces the plane of one field of view
    pub fn run<F>(
        &self,
        sink: &mut AccumulationSink,
        indices: &[usize],
        job: F,
    ) -> Result<(), MaxProjError>
    where
        F: Fn(usize) -> Result<Array3<u16>, MaxProjError> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_count)
            .thread_name(|i| format!("maxproj-worker-{}", i))
            .build()?;
        let start = Instant::now();
        let total = indices.len();
        let mut completed = 0;

        for (batch_number, batch) in indices.chunks(self.worker_count).enumerate() {
            if self.cancel.load(Ordering::Acquire) {
                info!(completed, total, "Cancelled");
                return Err(MaxProjError::Cancelled { completed, total });
            }
            debug!(batch = batch_number, fields = ?batch, "Starting batch");
            let slots = sink.slots(batch)?;
            pool.install(|| {
                slots.into_par_iter().try_for_each(|mut slot| {
                    let index = slot.index();
                    job(index)
                        .and_then(|plane| slot.write(&plane))
                        .map_err(|err| err.in_field(index))
                })
            })?;

            let before = completed;
            completed += batch.len();
            if completed / PROGRESS_INTERVAL > before / PROGRESS_INTERVAL || completed == total {
                info!(
                    "Processed {}/{} fields of view in {:.2}s",
                    completed,
                    total,
                    start.elapsed().as_secs_f64()
                );
            }
        }
        Ok(())
    }
}
