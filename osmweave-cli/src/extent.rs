//! `extent` command: print the bounding box declared by an input.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use osmweave_core::Bounds;
use osmweave_data::{DecoderConfig, OsmStream};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{ARG_INPUT, CliError, ENV_EXTENT_INPUT, require_existing, required_input};

/// CLI arguments for the `extent` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Print the bounding box declared by the input as a JSON \
                 array [min_lon, min_lat, max_lon, max_lat], or null when \
                 the file declares none.",
    about = "Print the declared bounding box"
)]
#[ortho_config(prefix = "OSMWEAVE")]
pub(crate) struct ExtentArgs {
    /// Path to the OSM PBF or XML input.
    #[arg(long = ARG_INPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
}

impl ExtentArgs {
    pub(crate) fn into_input(self) -> Result<Utf8PathBuf, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        required_input(merged.input, ENV_EXTENT_INPUT)
    }
}

pub(super) fn run_extent(args: ExtentArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let input = args.into_input()?;
    require_existing(&input, ARG_INPUT)?;
    let bounds = read_extent(&input)?;
    let line = serde_json::to_string(&bbox_json(bounds)).map_err(CliError::SerialiseRecord)?;
    writer
        .write_all(line.as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .map_err(CliError::WriteOutput)
}

pub(crate) fn read_extent(input: &Utf8Path) -> Result<Option<Bounds>, CliError> {
    let mut stream = OsmStream::open(input, DecoderConfig::default())?;
    stream.extent().map_err(CliError::from)
}

fn bbox_json(bounds: Option<Bounds>) -> Value {
    bounds.map_or(Value::Null, |b| {
        json!([b.min_lon, b.min_lat, b.max_lon, b.max_lat])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn missing_bounds_print_null() {
        assert_eq!(bbox_json(None), Value::Null);
    }

    #[rstest]
    fn bounds_print_in_geojson_order() {
        let bounds = Bounds {
            min_lon: 1.0,
            min_lat: 2.0,
            max_lon: 3.0,
            max_lat: 4.0,
        };
        assert_eq!(bbox_json(Some(bounds)), json!([1.0, 2.0, 3.0, 4.0]));
    }
}
