//! Hands the completed accumulation buffer to the output writer.

use std::time::Instant;

use tracing::{info, warn};

use crate::error::MaxProjError;
use crate::sink::AccumulationSink;
use crate::writer::{StackMetadata, StackWriter};

/// Persist the contents of `sink` with `writer`, then release the sink.
///
/// If the buffer is incomplete or the writer fails, a disk-backed buffer is preserved. A writer
/// failure is reported as [MaxProjError::OutputWrite] naming the preserved file.
pub fn finalize<W: StackWriter + ?Sized>(
    mut sink: AccumulationSink,
    writer: &W,
    metadata: &StackMetadata,
) -> Result<(), MaxProjError> {
    let start = Instant::now();
    let outcome = sink
        .finalize()
        .map(|view| writer.write_stack(view, metadata));
    match outcome {
        Err(err) => {
            sink.preserve();
            Err(err)
        }
        Ok(Ok(())) => {
            info!(
                path = %writer.path().display(),
                "Finalized output in {:.2}s",
                start.elapsed().as_secs_f64()
            );
            sink.release();
            Ok(())
        }
        Ok(Err(source)) => {
            let preserved = sink.preserve();
            if let Some(path) = &preserved {
                warn!(path = %path.display(), "Output write failed; keeping accumulation buffer");
            }
            Err(MaxProjError::OutputWrite {
                path: writer.path().to_path_buf(),
                preserved,
                source: Box::new(source),
            })
        }
    }
}
