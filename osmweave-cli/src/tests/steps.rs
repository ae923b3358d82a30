//! Behaviour-driven step definitions driving the features command scenarios.

use super::helpers::{VILLAGE, Workspace, parse_lines};
use super::*;
use crate::features::{FeaturesConfig, write_features};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;

/// Scenario state shared by every step.
#[derive(Debug)]
struct FeaturesWorld {
    workspace: Workspace,
    cli_args: RefCell<Vec<String>>,
    stdout: RefCell<Vec<u8>>,
    result: RefCell<Option<Result<u64, CliError>>>,
}

impl FeaturesWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::with_xml(VILLAGE),
            cli_args: RefCell::new(Vec::new()),
            stdout: RefCell::new(Vec::new()),
            result: RefCell::new(None),
        }
    }

    fn written(&self) -> Vec<serde_json::Value> {
        let borrowed = self.result.borrow();
        let outcome = borrowed.as_ref().expect("result recorded");
        assert!(outcome.is_ok(), "expected success, got {outcome:?}");
        parse_lines(&self.stdout.borrow())
    }
}

#[fixture]
fn world() -> FeaturesWorld {
    FeaturesWorld::new()
}

#[given("an OSM file with a church, a street and a post box")]
fn village_input(#[from(world)] world: &FeaturesWorld) {
    let input = world.workspace.input().as_str().to_owned();
    world
        .cli_args
        .borrow_mut()
        .extend([format!("--{ARG_INPUT}"), input]);
}

#[given("I select the \"multipolygons\" collection")]
fn select_multipolygons(#[from(world)] world: &FeaturesWorld) {
    world
        .cli_args
        .borrow_mut()
        .extend([format!("--{ARG_COLLECTION}"), "multipolygons".to_owned()]);
}

#[given("no input is configured")]
fn no_input(#[from(world)] world: &FeaturesWorld) {
    world.cli_args.borrow_mut().clear();
}

#[when("I run the features command")]
fn run_command(#[from(world)] world: &FeaturesWorld) {
    let mut invocation = vec!["osmweave".to_owned(), "features".to_owned()];
    invocation.extend(world.cli_args.borrow().iter().cloned());
    let outcome = Cli::try_parse_from(invocation)
        .map_err(CliError::ArgumentParsing)
        .and_then(|cli| match cli.command {
            Command::Features(args) => FeaturesConfig::try_from(args),
            Command::Extent(_) => panic!("parsed the wrong subcommand"),
        })
        .and_then(|config| {
            config.validate_sources()?;
            write_features(&config, &mut *world.stdout.borrow_mut())
        });
    world.result.replace(Some(outcome));
}

#[then("three GeoJSON features are written")]
fn three_features(#[from(world)] world: &FeaturesWorld) {
    let lines = world.written();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| line["type"] == "Feature"));
}

#[then("only the church is written")]
fn only_church(#[from(world)] world: &FeaturesWorld) {
    let lines = world.written();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["id"], 10);
    assert_eq!(lines[0]["properties"]["building"], "church");
}

#[then("the CLI reports that the \"input\" flag is missing")]
fn reports_missing_input(#[from(world)] world: &FeaturesWorld) {
    let borrowed = world.result.borrow();
    let error = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::MissingArgument { field, .. } => assert_eq!(*field, ARG_INPUT),
        other => panic!("unexpected error {other:?}"),
    }
}

macro_rules! register_features_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/features_command.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: FeaturesWorld) {
            let _ = world;
        }
    };
}

register_features_scenario!(streaming_everything, "streaming every collection to stdout");
register_features_scenario!(selecting_one_collection, "selecting one collection");
register_features_scenario!(rejecting_missing_input, "rejecting a missing input flag");
