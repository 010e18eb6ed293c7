//! This file defines the maxproj binary entry point.

use maxproj::cli;
use maxproj::error::{self, MaxProjError};
use maxproj::pipeline;
use maxproj::source::TiffSource;
use maxproj::summary::RunSummary;
use maxproj::tracing;
use maxproj::writer::TiffStackWriter;

fn run(args: &cli::CommandLineArgs) -> Result<RunSummary, MaxProjError> {
    let config = args.to_config()?;
    let source = TiffSource::open(&args.input, args.layout()?)?;
    let writer = TiffStackWriter::new(&args.output);
    let mut summary = pipeline::project(&source, &writer, &config)?;
    summary.inputs.push(args.input.clone());
    if let Some(path) = &args.run.summary {
        summary.write_json(path)?;
    }
    Ok(summary)
}

/// Application entry point
fn main() {
    let args = cli::parse();
    tracing::init_tracing(args.run.verbose);
    if let Err(err) = run(&args) {
        error::report(&err);
        std::process::exit(err.kind().exit_code());
    }
}
