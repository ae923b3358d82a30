//! Fixture helpers shared by behaviour tests.

use std::io::Write;

use osmweave_core::{
    Bounds, Member, MemberType, RawNode, RawRelation, RawWay, Tag,
    test_support::{PbfFileBuilder, PrimitiveBlockBuilder},
};
use tempfile::{Builder, TempPath};

/// Forest relation with one outer and one inner ring, as OSM XML.
pub const FOREST_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="fixture">
  <node id="1" lat="0.0" lon="0.0"/>
  <node id="2" lat="0.0" lon="1.0"/>
  <node id="3" lat="1.0" lon="1.0"/>
  <node id="4" lat="1.0" lon="0.0"/>
  <node id="5" lat="0.2" lon="0.2"/>
  <node id="6" lat="0.2" lon="0.4"/>
  <node id="7" lat="0.4" lon="0.4"/>
  <node id="8" lat="0.4" lon="0.2"/>
  <way id="100">
    <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
  </way>
  <way id="101">
    <nd ref="5"/><nd ref="6"/><nd ref="7"/><nd ref="8"/><nd ref="5"/>
  </way>
  <relation id="200">
    <member type="way" ref="100" role="outer"/>
    <member type="way" ref="101" role="inner"/>
    <tag k="type" v="multipolygon"/>
    <tag k="landuse" v="forest"/>
  </relation>
</osm>
"#;

/// Write `bytes` to a temporary file named after `stem`.
pub fn write_fixture(stem: &str, suffix: &str, bytes: &[u8]) -> TempPath {
    let mut file = Builder::new()
        .prefix(stem)
        .suffix(suffix)
        .tempfile()
        .unwrap_or_else(|err| panic!("failed to create fixture {stem}: {err}"));
    file.write_all(bytes)
        .unwrap_or_else(|err| panic!("failed to write fixture {stem}: {err}"));
    file.flush()
        .unwrap_or_else(|err| panic!("failed to flush fixture {stem}: {err}"));
    file.into_temp_path()
}

fn node(id: i64, lon: f64, lat: f64) -> RawNode {
    RawNode {
        id,
        lon,
        lat,
        tags: Vec::new(),
        info: None,
    }
}

fn ring(id: i64, refs: &[i64]) -> RawWay {
    RawWay {
        id,
        refs: refs.to_vec(),
        tags: Vec::new(),
        info: None,
    }
}

/// The forest of [`FOREST_XML`] encoded as a compressed PBF file.
pub fn forest_pbf() -> Vec<u8> {
    let mut block = PrimitiveBlockBuilder::new();
    block
        .dense_nodes(&[
            node(1, 0.0, 0.0),
            node(2, 1.0, 0.0),
            node(3, 1.0, 1.0),
            node(4, 0.0, 1.0),
            node(5, 0.2, 0.2),
            node(6, 0.4, 0.2),
            node(7, 0.4, 0.4),
            node(8, 0.2, 0.4),
        ])
        .ways(&[ring(100, &[1, 2, 3, 4, 1]), ring(101, &[5, 6, 7, 8, 5])])
        .relations(&[RawRelation {
            id: 200,
            members: vec![
                Member {
                    id: 100,
                    role: "outer".into(),
                    kind: MemberType::Way,
                },
                Member {
                    id: 101,
                    role: "inner".into(),
                    kind: MemberType::Way,
                },
            ],
            tags: vec![Tag::new("type", "multipolygon"), Tag::new("landuse", "forest")],
            info: None,
        }]);
    PbfFileBuilder::new()
        .compressed(true)
        .header(
            Some(Bounds {
                min_lon: 0.0,
                min_lat: 0.0,
                max_lon: 1.0,
                max_lat: 1.0,
            }),
            &["OsmSchema-V0.6", "DenseNodes"],
        )
        .block(&block)
        .build()
}
