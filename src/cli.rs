//! Command Line Interface (CLI) arguments.

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::error::MaxProjError;
use crate::models::{AxisSpec, BigTiff, Compression, FovPolicy, SinkKind};
use crate::pipeline::PipelineConfig;
use crate::resource_manager::{parse_memory_size, DEFAULT_SAFETY_MULTIPLIER};

/// Options shared by every binary.
#[derive(Clone, Debug, Args)]
pub struct RunArgs {
    /// Where to keep the accumulation buffer
    #[arg(long, value_enum, default_value_t = SinkKind::Auto, env = "MAXPROJ_SINK")]
    pub sink: SinkKind,
    /// Number of worker threads. Planned from available memory and CPUs when unset.
    #[arg(long, env = "MAXPROJ_WORKERS")]
    pub workers: Option<usize>,
    /// Memory budget, e.g. `8GiB`. Available system memory when unset.
    #[arg(long, env = "MAXPROJ_MEMORY_LIMIT")]
    pub memory_limit: Option<String>,
    /// Multiple of the per-field working set reserved for each worker
    #[arg(long, default_value_t = DEFAULT_SAFETY_MULTIPLIER, env = "MAXPROJ_SAFETY_MULTIPLIER")]
    pub safety_multiplier: f64,
    /// Directory for a disk-backed accumulation buffer
    #[arg(long, env = "MAXPROJ_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,
    /// Output compression
    #[arg(long, value_enum, default_value_t = Compression::Lzw, env = "MAXPROJ_COMPRESSION")]
    pub compression: Compression,
    /// Whether to write a BigTIFF container
    #[arg(long, value_enum, default_value_t = BigTiff::Auto, env = "MAXPROJ_BIGTIFF")]
    pub bigtiff: BigTiff,
    /// Write a JSON run summary to this path
    #[arg(long, env = "MAXPROJ_SUMMARY")]
    pub summary: Option<PathBuf>,
    /// Enable debug logging unless `RUST_LOG` is set
    #[arg(short, long, default_value_t = false, env = "MAXPROJ_VERBOSE")]
    pub verbose: bool,
}

impl RunArgs {
    /// Returns a [PipelineConfig] with these options applied.
    pub fn to_config(&self) -> Result<PipelineConfig, MaxProjError> {
        let memory_limit = self
            .memory_limit
            .as_deref()
            .map(parse_memory_size)
            .transpose()?;
        let config = PipelineConfig {
            sink: self.sink,
            workers: self.workers,
            memory_limit,
            safety_multiplier: self.safety_multiplier,
            temp_dir: self.temp_dir.clone(),
            compression: self.compression,
            bigtiff: self.bigtiff,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Maximum intensity projection of each field of view in a microscope stack
#[derive(Clone, Debug, Parser)]
#[command(name = "maxproj", version)]
pub struct CommandLineArgs {
    /// Input TIFF stack
    pub input: PathBuf,
    /// Output TCYX stack
    pub output: PathBuf,
    /// Process at most this many fields of view
    pub max_fields_of_view: Option<usize>,
    /// Which axis supplies the fields of view
    #[arg(long, value_enum, default_value_t = FovPolicy::Auto, env = "MAXPROJ_FOV_AXIS")]
    pub fov_axis: FovPolicy,
    /// Page layout of the input, slowest axis first, e.g. `P:4,Z:10,C:2`
    #[arg(long, env = "MAXPROJ_LAYOUT")]
    pub layout: Option<String>,
    #[command(flatten)]
    pub run: RunArgs,
}

impl CommandLineArgs {
    /// Returns the pipeline configuration described by the arguments.
    pub fn to_config(&self) -> Result<PipelineConfig, MaxProjError> {
        let config = PipelineConfig {
            fov_policy: self.fov_axis,
            max_fields: self.max_fields_of_view,
            ..self.run.to_config()?
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns the page layout override, if any.
    pub fn layout(&self) -> Result<Option<AxisSpec>, MaxProjError> {
        self.layout.as_deref().map(AxisSpec::parse).transpose()
    }
}

/// Concatenate TCYX projection stacks along the field of view axis
#[derive(Clone, Debug, Parser)]
#[command(name = "maxproj-combine", version)]
pub struct CombineArgs {
    /// Input TCYX stacks
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Output TCYX stack
    #[arg(short, long)]
    pub output: PathBuf,
    /// Field offset of each input, comma separated. Inputs follow each other when unset.
    #[arg(long, value_delimiter = ',', env = "MAXPROJ_OFFSETS")]
    pub offsets: Option<Vec<usize>>,
    #[command(flatten)]
    pub run: RunArgs,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}

/// Returns parsed command line arguments of the combine binary.
pub fn parse_combine() -> CombineArgs {
    CombineArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CommandLineArgs::try_parse_from(["maxproj", "in.tif", "out.tif"]).unwrap();
        assert_eq!(None, args.max_fields_of_view);
        let config = args.to_config().unwrap();
        assert_eq!(FovPolicy::Auto, config.fov_policy);
        assert_eq!(SinkKind::Auto, config.sink);
        assert_eq!(Compression::Lzw, config.compression);
        assert_eq!(BigTiff::Auto, config.bigtiff);
        assert_eq!(DEFAULT_SAFETY_MULTIPLIER, config.safety_multiplier);
        assert_eq!(None, config.memory_limit);
        assert_eq!(None, args.layout().unwrap());
    }

    #[test]
    fn options() {
        let args = CommandLineArgs::try_parse_from([
            "maxproj",
            "in.tif",
            "out.tif",
            "7",
            "--fov-axis",
            "time",
            "--sink",
            "disk",
            "--workers",
            "3",
            "--memory-limit",
            "2 GiB",
            "--compression",
            "deflate",
            "--bigtiff",
            "always",
            "--layout",
            "T:7,C:2",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(Some(7), config.max_fields);
        assert_eq!(FovPolicy::Time, config.fov_policy);
        assert_eq!(SinkKind::Disk, config.sink);
        assert_eq!(Some(3), config.workers);
        assert_eq!(Some(2 << 30), config.memory_limit);
        assert_eq!(Compression::Deflate, config.compression);
        assert_eq!(BigTiff::Always, config.bigtiff);
        assert_eq!("T:7,C:2", args.layout().unwrap().unwrap().to_string());
    }

    #[test]
    fn invalid_values() {
        let args =
            CommandLineArgs::try_parse_from(["maxproj", "in.tif", "out.tif", "0"]).unwrap();
        assert!(args.to_config().is_err());
        let args = CommandLineArgs::try_parse_from([
            "maxproj",
            "in.tif",
            "out.tif",
            "--memory-limit",
            "lots",
        ])
        .unwrap();
        assert!(matches!(
            args.to_config(),
            Err(MaxProjError::InvalidConfig(_))
        ));
        assert!(CommandLineArgs::try_parse_from(["maxproj", "in.tif", "out.tif", "--sink", "tape"])
            .is_err());
    }

    #[test]
    fn combine_args() {
        let args = CombineArgs::try_parse_from([
            "maxproj-combine",
            "a.tif",
            "b.tif",
            "-o",
            "out.tif",
            "--offsets",
            "3,0",
        ])
        .unwrap();
        assert_eq!(2, args.inputs.len());
        assert_eq!(Some(vec![3, 0]), args.offsets);
        assert!(CombineArgs::try_parse_from(["maxproj-combine", "-o", "out.tif"]).is_err());
    }
}
