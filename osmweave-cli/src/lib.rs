//! Command-line interface for streaming features out of OSM files.
#![forbid(unsafe_code)]

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use structured_logger::{Builder, json::new_writer};

mod error;
mod extent;
mod features;

pub use error::CliError;

use extent::{ExtentArgs, run_extent};
use features::{FeaturesArgs, run_features};

const ARG_INPUT: &str = "input";
const ARG_OUTPUT: &str = "output";
const ARG_COLLECTION: &str = "collection";
const ARG_DECODER_CONFIG: &str = "decoder-config";
const ARG_SCRATCH_DIR: &str = "scratch-dir";
const ENV_FEATURES_INPUT: &str = "OSMWEAVE_CMDS_FEATURES_INPUT";
const ENV_EXTENT_INPUT: &str = "OSMWEAVE_CMDS_EXTENT_INPUT";

/// Run the osmweave CLI with the current process arguments and environment.
///
/// # Errors
/// Returns [`CliError`] when arguments, configuration, decoding or output
/// fail.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    init_logging(&cli.log_level);
    let mut stdout = io::stdout().lock();
    match cli.command {
        Command::Features(args) => run_features(args, &mut stdout),
        Command::Extent(args) => run_extent(args, &mut stdout),
    }
}

fn init_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stderr()))
        .init();
}

#[derive(Debug, Parser)]
#[command(
    name = "osmweave",
    about = "Stream geometries and tags out of OSM PBF and XML files",
    version
)]
struct Cli {
    /// Minimum level of the JSON log lines written to stderr.
    #[arg(
        long,
        global = true,
        env = "OSMWEAVE_LOG_LEVEL",
        default_value = "warn",
        value_name = "level"
    )]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write resolved features as GeoJSON lines.
    Features(FeaturesArgs),
    /// Print the bounding box declared by the input.
    Extent(ExtentArgs),
}

/// Check that `path` names an existing regular file.
fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match osmweave_fs::is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::SourcePathNotFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn required_input(
    input: Option<Utf8PathBuf>,
    env: &'static str,
) -> Result<Utf8PathBuf, CliError> {
    input.ok_or(CliError::MissingArgument {
        field: ARG_INPUT,
        env,
    })
}

#[cfg(test)]
mod tests;
