//! `features` command: stream resolved features as GeoJSON lines.

use std::io::{BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use osmweave_core::{Collection, Feature, JsonTagMapper, TagMapper};
use osmweave_data::{DecoderConfig, OsmStream};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    ARG_COLLECTION, ARG_DECODER_CONFIG, ARG_INPUT, ARG_OUTPUT, ARG_SCRATCH_DIR, CliError,
    ENV_FEATURES_INPUT, require_existing, required_input,
};

/// CLI arguments for the `features` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Decode an OSM PBF or XML file and write one GeoJSON \
                 feature per line. Collections are drained one after \
                 another unless --interleaved is given.",
    about = "Write resolved features as GeoJSON lines"
)]
#[ortho_config(prefix = "OSMWEAVE")]
pub(crate) struct FeaturesArgs {
    /// Path to the OSM PBF or XML input.
    #[arg(long = ARG_INPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
    /// Write to this file instead of stdout.
    #[arg(long = ARG_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Only produce this collection.
    #[arg(long = ARG_COLLECTION, value_name = "name")]
    #[serde(default)]
    pub(crate) collection: Option<String>,
    /// JSON file with decoder tuning knobs.
    #[arg(long = ARG_DECODER_CONFIG, value_name = "path")]
    #[serde(default)]
    pub(crate) decoder_config: Option<Utf8PathBuf>,
    /// Directory for spill files.
    #[arg(long = ARG_SCRATCH_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
    /// Serve all collections round-robin in a single pass.
    #[arg(long)]
    #[serde(default)]
    pub(crate) interleaved: bool,
    /// Include version, changeset, user and timestamp properties.
    #[arg(long)]
    #[serde(default)]
    pub(crate) attributes: bool,
}

impl FeaturesArgs {
    pub(crate) fn into_config(self) -> Result<FeaturesConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        FeaturesConfig::try_from(merged)
    }
}

/// Resolved `features` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FeaturesConfig {
    pub(crate) input: Utf8PathBuf,
    pub(crate) output: Option<Utf8PathBuf>,
    pub(crate) collection: Option<Collection>,
    pub(crate) decoder_config: Option<Utf8PathBuf>,
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
    pub(crate) interleaved: bool,
    pub(crate) attributes: bool,
}

impl TryFrom<FeaturesArgs> for FeaturesConfig {
    type Error = CliError;

    fn try_from(args: FeaturesArgs) -> Result<Self, Self::Error> {
        let input = required_input(args.input, ENV_FEATURES_INPUT)?;
        let collection = args
            .collection
            .as_deref()
            .map(str::parse::<Collection>)
            .transpose()?;
        Ok(Self {
            input,
            output: args.output,
            collection,
            decoder_config: args.decoder_config,
            scratch_dir: args.scratch_dir,
            interleaved: args.interleaved,
            attributes: args.attributes,
        })
    }
}

impl FeaturesConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.input, ARG_INPUT)?;
        if let Some(path) = &self.decoder_config {
            require_existing(path, ARG_DECODER_CONFIG)?;
        }
        Ok(())
    }

    /// Decoder settings: the JSON file if given, then flag overrides.
    pub(crate) fn decoder(&self) -> Result<DecoderConfig, CliError> {
        let mut decoder = match &self.decoder_config {
            Some(path) => load_decoder_config(path)?,
            None => DecoderConfig::default(),
        };
        decoder.interleaved |= self.interleaved;
        decoder.attributes |= self.attributes;
        if let Some(dir) = &self.scratch_dir {
            decoder.scratch_dir = Some(dir.clone().into_std_path_buf());
        }
        Ok(decoder)
    }
}

fn load_decoder_config(path: &Utf8Path) -> Result<DecoderConfig, CliError> {
    let file = osmweave_fs::open_input(path).map_err(|source| CliError::ReadDecoderConfig {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| {
        CliError::ParseDecoderConfig {
            path: path.to_path_buf(),
            source,
        }
    })
}

pub(super) fn run_features(args: FeaturesArgs, stdout: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    match &config.output {
        Some(path) => {
            let file = osmweave_fs::create_output(path).map_err(|source| {
                CliError::CreateOutput {
                    path: path.clone(),
                    source,
                }
            })?;
            let mut writer = BufWriter::new(file);
            write_features(&config, &mut writer)?;
            writer.flush().map_err(CliError::WriteOutput)
        }
        None => write_features(&config, stdout).map(drop),
    }
}

/// Stream every requested feature of `config.input` into `writer`.
///
/// Returns the number of features written.
pub(crate) fn write_features(
    config: &FeaturesConfig,
    writer: &mut dyn Write,
) -> Result<u64, CliError> {
    let decoder = config.decoder()?;
    let mapper = JsonTagMapper::with_info(decoder.attributes);
    let interleaved = decoder.interleaved;
    let mut stream = OsmStream::open(&config.input, decoder)?;
    let selected: Vec<Collection> = config
        .collection
        .map_or_else(|| Collection::ALL.to_vec(), |collection| vec![collection]);
    for collection in Collection::ALL {
        stream.set_interest(collection, selected.contains(&collection));
    }

    let mut written = 0;
    if interleaved {
        written += drain(&mut stream, &mapper, writer)?;
    } else {
        for collection in selected {
            stream.set_current_collection(collection)?;
            written += drain(&mut stream, &mapper, writer)?;
        }
    }
    let stats = stream.stats();
    info!(
        "wrote {written} features ({} unresolved ways, {} unresolved relations)",
        stats.unresolved_ways, stats.unresolved_relations
    );
    Ok(written)
}

fn drain(
    stream: &mut OsmStream,
    mapper: &JsonTagMapper,
    writer: &mut dyn Write,
) -> Result<u64, CliError> {
    let mut written = 0;
    while let Some(feature) = stream.next_feature()? {
        let line = serde_json::to_string(&to_geojson(&feature, mapper))
            .map_err(CliError::SerialiseRecord)?;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(CliError::WriteOutput)?;
        written += 1;
    }
    Ok(written)
}

fn to_geojson(feature: &Feature, mapper: &JsonTagMapper) -> Value {
    let mut properties = mapper.map_feature(feature);
    properties.insert(
        "osm_collection".into(),
        Value::from(feature.collection.name()),
    );
    json!({
        "type": "Feature",
        "id": feature.id,
        "properties": properties,
        "geometry": feature.geometry.to_geojson(),
    })
}
