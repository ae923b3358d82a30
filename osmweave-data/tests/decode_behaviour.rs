//! Behavioural tests for streaming features out of OSM files.

use camino::Utf8PathBuf;
use osmweave_core::{Collection, Feature, Geometry, find_tag};
use osmweave_data::{DecoderConfig, OsmStream, StreamError, StreamStats, decoder::DecodeError};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::{cell::RefCell, fs, path::PathBuf};
use tempfile::TempPath;

mod support;

use support::{FOREST_XML, forest_pbf, write_fixture};

type Outcome = Result<(Vec<Feature>, StreamStats), StreamError>;

#[fixture]
fn input_file() -> RefCell<Option<TempPath>> {
    RefCell::new(None)
}

#[fixture]
fn stream_outcome() -> RefCell<Option<Outcome>> {
    RefCell::new(None)
}

fn expect_features(outcome: &RefCell<Option<Outcome>>) -> (Vec<Feature>, StreamStats) {
    outcome
        .borrow()
        .as_ref()
        .expect("stream was drained")
        .as_ref()
        .expect("expected a successful pass")
        .clone()
}

fn prepare(target: &RefCell<Option<TempPath>>, stem: &str, suffix: &str, bytes: &[u8]) {
    *target.borrow_mut() = Some(write_fixture(stem, suffix, bytes));
}

fn in_collection(features: &[Feature], collection: Collection) -> Vec<&Feature> {
    features
        .iter()
        .filter(|feature| feature.collection == collection)
        .collect()
}

#[given("an XML file with a closed building way")]
fn square_building(#[from(input_file)] target: &RefCell<Option<TempPath>>) {
    let xml = r#"<osm version="0.6">
      <node id="1" lat="0.0" lon="0.0"/>
      <node id="2" lat="0.0" lon="0.001"/>
      <node id="3" lat="0.001" lon="0.001"/>
      <node id="4" lat="0.001" lon="0.0"/>
      <way id="10">
        <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
        <tag k="building" v="yes"/>
      </way>
    </osm>"#;
    prepare(target, "square", ".osm", xml.as_bytes());
}

#[given("an XML file with a forest multipolygon and a clearing")]
fn forest_xml(#[from(input_file)] target: &RefCell<Option<TempPath>>) {
    prepare(target, "forest", ".osm", FOREST_XML.as_bytes());
}

#[given("a PBF file with a forest multipolygon and a clearing")]
fn forest_pbf_file(#[from(input_file)] target: &RefCell<Option<TempPath>>) {
    prepare(target, "forest", ".osm.pbf", &forest_pbf());
}

#[given("an XML file with a multipolygon referencing a missing way")]
fn missing_member(#[from(input_file)] target: &RefCell<Option<TempPath>>) {
    let xml = r#"<osm version="0.6">
      <node id="1" lat="0.0" lon="0.0"/>
      <node id="2" lat="0.0" lon="1.0"/>
      <node id="3" lat="1.0" lon="1.0"/>
      <way id="100"><nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="1"/></way>
      <relation id="200">
        <member type="way" ref="100" role="outer"/>
        <member type="way" ref="999" role="inner"/>
        <tag k="type" v="multipolygon"/>
        <tag k="natural" v="water"/>
      </relation>
    </osm>"#;
    prepare(target, "missing", ".osm", xml.as_bytes());
}

#[given("an XML file with a closed building tagged area=no")]
fn explicit_non_area(#[from(input_file)] target: &RefCell<Option<TempPath>>) {
    let xml = r#"<osm version="0.6">
      <node id="1" lat="0.0" lon="0.0"/>
      <node id="2" lat="0.0" lon="0.001"/>
      <node id="3" lat="0.001" lon="0.001"/>
      <way id="10">
        <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="1"/>
        <tag k="building" v="yes"/>
        <tag k="area" v="no"/>
      </way>
    </osm>"#;
    prepare(target, "not-area", ".osm", xml.as_bytes());
}

#[given("an XML file with an untyped relation grouping a path")]
fn untyped_relation(#[from(input_file)] target: &RefCell<Option<TempPath>>) {
    let xml = r#"<osm version="0.6">
      <node id="1" lat="0.0" lon="0.0"/>
      <node id="2" lat="0.0" lon="0.001"/>
      <way id="10"><nd ref="1"/><nd ref="2"/><tag k="highway" v="path"/></way>
      <relation id="9">
        <member type="way" ref="10" role=""/>
        <tag k="name" v="x"/>
      </relation>
    </osm>"#;
    prepare(target, "untyped", ".osm", xml.as_bytes());
}

#[given("a file that is neither XML nor PBF")]
fn garbage(#[from(input_file)] target: &RefCell<Option<TempPath>>) {
    prepare(target, "garbage", ".bin", b"definitely not a map");
}

#[when("I stream every collection")]
fn stream_everything(
    #[from(input_file)] target: &RefCell<Option<TempPath>>,
    #[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>,
) {
    let result = {
        let guard = target.borrow();
        let temp = guard.as_ref().expect("input prepared");
        let path = Utf8PathBuf::from_path_buf(temp.to_path_buf()).expect("UTF-8 temp path");
        let config = DecoderConfig {
            interleaved: true,
            ..DecoderConfig::default()
        };
        OsmStream::open(&path, config).and_then(|mut stream| {
            let features = stream.by_ref().collect::<Result<Vec<_>, _>>()?;
            Ok((features, stream.stats()))
        })
    };
    *outcome.borrow_mut() = Some(result);
}

#[then("one area feature with 5 coordinates is emitted")]
fn one_square(#[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let (features, _) = expect_features(outcome);
    let areas = in_collection(&features, Collection::MultiPolygons);
    assert_eq!(areas.len(), 1, "expected one area, got {features:?}");
    let area = areas.first().expect("one area");
    assert_eq!(area.id, 10);
    assert!(area.is_area);
    assert_eq!(area.geometry.coordinate_count(), 5);
    assert!(in_collection(&features, Collection::Lines).is_empty());
}

#[then("the forest polygon has one hole")]
fn forest_has_hole(#[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let (features, _) = expect_features(outcome);
    let areas = in_collection(&features, Collection::MultiPolygons);
    assert_eq!(areas.len(), 1, "standalone rings must not repeat: {areas:?}");
    let forest = areas.first().expect("forest feature");
    assert_eq!(forest.id, 200);
    assert_eq!(find_tag(&forest.tags, "landuse"), Some("forest"));
    let Geometry::MultiGeometry(parts) = &forest.geometry else {
        panic!("expected a multipolygon, got {:?}", forest.geometry);
    };
    let [Geometry::Polygon(polygon)] = parts.as_slice() else {
        panic!("expected one polygon, got {parts:?}");
    };
    assert_eq!(polygon.exterior().0.len(), 5);
    assert_eq!(polygon.interiors().len(), 1);
}

#[then("no relation features are emitted")]
fn no_relations(#[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let (features, _) = expect_features(outcome);
    assert!(
        features.iter().all(|feature| feature.id != 200),
        "relation 200 should be dropped: {features:?}"
    );
}

#[then("one unresolved relation is counted")]
fn unresolved_counted(#[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let (_, stats) = expect_features(outcome);
    assert_eq!(stats.unresolved_relations, 1);
    assert_eq!(stats.relations, 1);
}

#[then("the way is emitted as a line")]
fn emitted_as_line(#[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let (features, _) = expect_features(outcome);
    let lines = in_collection(&features, Collection::Lines);
    assert_eq!(lines.len(), 1, "expected one line, got {features:?}");
    assert!(!lines.first().expect("line").is_area);
    assert!(in_collection(&features, Collection::MultiPolygons).is_empty());
}

#[then("the relation is emitted as a generic collection")]
fn generic_relation(#[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let (features, _) = expect_features(outcome);
    let others = in_collection(&features, Collection::OtherRelations);
    let [relation] = others.as_slice() else {
        panic!("expected one generic relation, got {features:?}");
    };
    assert_eq!(relation.id, 9);
    assert_eq!(find_tag(&relation.tags, "name"), Some("x"));
    assert!(matches!(relation.geometry, Geometry::MultiGeometry(_)));
    assert_eq!(in_collection(&features, Collection::Lines).len(), 1);
}

#[then("a format error is returned")]
fn format_error(#[from(stream_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let borrowed = outcome.borrow();
    match borrowed.as_ref().expect("stream was attempted") {
        Ok(_) => panic!("expected unrecognised input to fail"),
        Err(StreamError::Decode(DecodeError::CorruptInput { offset, .. })) => {
            assert_eq!(*offset, 0);
        }
        Err(other) => panic!("expected a format error, got {other:?}"),
    }
}

#[test]
fn scenario_indices_follow_feature_order() {
    let feature =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/features/decode_osm.feature");
    let contents = fs::read_to_string(&feature).unwrap_or_else(|err| {
        panic!("failed to read feature file {feature:?}: {err}");
    });
    let titles: Vec<&str> = contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Scenario: "))
        .collect();
    assert_eq!(
        titles,
        [
            "decoding a square area from XML",
            "decoding a multipolygon with a hole from XML",
            "decoding a multipolygon with a hole from PBF",
            "dropping a multipolygon with a missing member",
            "honouring explicit area tags",
            "rejecting unrecognised input",
            "keeping relations without a type tag",
        ]
    );
}

#[scenario(path = "tests/features/decode_osm.feature", index = 0)]
fn decoding_square_area(
    input_file: RefCell<Option<TempPath>>,
    stream_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (input_file, stream_outcome);
}

#[scenario(path = "tests/features/decode_osm.feature", index = 1)]
fn decoding_xml_multipolygon(
    input_file: RefCell<Option<TempPath>>,
    stream_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (input_file, stream_outcome);
}

#[scenario(path = "tests/features/decode_osm.feature", index = 2)]
fn decoding_pbf_multipolygon(
    input_file: RefCell<Option<TempPath>>,
    stream_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (input_file, stream_outcome);
}

#[scenario(path = "tests/features/decode_osm.feature", index = 3)]
fn dropping_incomplete_multipolygon(
    input_file: RefCell<Option<TempPath>>,
    stream_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (input_file, stream_outcome);
}

#[scenario(path = "tests/features/decode_osm.feature", index = 4)]
fn honouring_area_tags(
    input_file: RefCell<Option<TempPath>>,
    stream_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (input_file, stream_outcome);
}

#[scenario(path = "tests/features/decode_osm.feature", index = 5)]
fn rejecting_unrecognised_input(
    input_file: RefCell<Option<TempPath>>,
    stream_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (input_file, stream_outcome);
}

#[scenario(path = "tests/features/decode_osm.feature", index = 6)]
fn keeping_untyped_relations(
    input_file: RefCell<Option<TempPath>>,
    stream_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (input_file, stream_outcome);
}
