//! This file defines the maxproj-combine binary entry point.

use maxproj::cli;
use maxproj::combine;
use maxproj::error::{self, MaxProjError};
use maxproj::source::TiffSource;
use maxproj::summary::RunSummary;
use maxproj::tracing;
use maxproj::writer::TiffStackWriter;

fn run(args: &cli::CombineArgs) -> Result<RunSummary, MaxProjError> {
    let config = args.run.to_config()?;
    let sources = args
        .inputs
        .iter()
        .map(|path| TiffSource::open(path, None))
        .collect::<Result<Vec<_>, _>>()?;
    let writer = TiffStackWriter::new(&args.output);
    let mut summary = combine::combine(&sources, args.offsets.as_deref(), &writer, &config)?;
    summary.inputs = args.inputs.clone();
    if let Some(path) = &args.run.summary {
        summary.write_json(path)?;
    }
    Ok(summary)
}

/// Application entry point
fn main() {
    let args = cli::parse_combine();
    tracing::init_tracing(args.run.verbose);
    if let Err(err) = run(&args) {
        error::report(&err);
        std::process::exit(err.kind().exit_code());
    }
}
