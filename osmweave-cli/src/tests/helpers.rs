//! Test helpers for writing small OSM inputs to disk.

use camino::Utf8PathBuf;
use std::fs;
use tempfile::TempDir;

pub(super) const VILLAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="fixture">
  <bounds minlat="51.0" minlon="-1.0" maxlat="51.1" maxlon="-0.9"/>
  <node id="1" lat="51.01" lon="-0.99" version="3" user="mapper"/>
  <node id="2" lat="51.01" lon="-0.98"/>
  <node id="3" lat="51.02" lon="-0.98"/>
  <node id="4" lat="51.02" lon="-0.99"><tag k="amenity" v="post_box"/></node>
  <way id="10">
    <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
    <tag k="building" v="church"/>
  </way>
  <way id="11">
    <nd ref="1"/><nd ref="3"/>
    <tag k="highway" v="residential"/>
  </way>
</osm>
"#;

/// Temporary workspace holding one OSM input.
#[derive(Debug)]
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
    input: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn with_xml(xml: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        let input = root.join("village.osm");
        fs::write(&input, xml).expect("write input");
        Self {
            _dir: dir,
            root,
            input,
        }
    }

    pub(super) fn input(&self) -> &Utf8PathBuf {
        &self.input
    }

    pub(super) fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub(super) fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("write workspace file");
        path
    }
}

/// Parse the GeoJSON lines written by the `features` command.
pub(super) fn parse_lines(bytes: &[u8]) -> Vec<serde_json::Value> {
    std::str::from_utf8(bytes)
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid JSON line"))
        .collect()
}
