//! Streaming OSM XML decoder built on `quick-xml`.
//!
//! The reader is driven event by event. A unit ends once roughly one
//! 64 KiB chunk of input has been consumed; element state carries over
//! between units, so a way may start in one unit and end in the next.

use std::{
    borrow::Cow,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    ops::ControlFlow,
    str::FromStr,
};

use log::warn;
use osmweave_core::{
    Bounds, Member, MemberType, PrimitiveInfo, RawNode, RawRelation, RawWay, Tag, Timestamp,
    is_valid_lon_lat,
};
use quick_xml::{
    events::{BytesStart, Event},
    reader::Reader,
};

use super::{BlockDecoder, DecodeError, InputFormat, PrimitiveSink, UnitOutcome};

/// Input consumed per unit.
pub const XML_CHUNK_SIZE: u64 = 64 * 1024;
/// Longest single markup event, in chunks.
const MAX_CHUNKS_PER_EVENT: u64 = 10;
/// String bytes (tags, roles, user, timestamp) allowed per element.
pub const MAX_ELEMENT_STRING_BYTES: usize = 1024 * 1024;
/// Tags kept per way.
pub const MAX_TAGS_PER_WAY: usize = 255;
/// Nodes reported per batch.
const NODE_BATCH: usize = 10_000;

/// Element currently being assembled.
#[derive(Debug)]
enum OpenElement {
    Node(RawNode),
    Way(RawWay),
    Relation(RawRelation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Node,
    Way,
    Relation,
}

impl OpenElement {
    const fn kind(&self) -> ElementKind {
        match self {
            Self::Node(_) => ElementKind::Node,
            Self::Way(_) => ElementKind::Way,
            Self::Relation(_) => ElementKind::Relation,
        }
    }
}

/// Streaming decoder over an OSM XML source.
pub struct XmlDecoder<R> {
    reader: Option<Reader<EventBudget<R>>>,
    buf: Vec<u8>,
    open: Option<OpenElement>,
    string_bytes: usize,
    nodes: Vec<RawNode>,
    bounds_allowed: bool,
    finished: bool,
    warned_tags: bool,
}

impl<R> std::fmt::Debug for XmlDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlDecoder")
            .field("open", &self.open)
            .field("string_bytes", &self.string_bytes)
            .field("nodes", &self.nodes)
            .field("bounds_allowed", &self.bounds_allowed)
            .field("finished", &self.finished)
            .field("warned_tags", &self.warned_tags)
            .finish_non_exhaustive()
    }
}

/// Buffered source that stops feeding the parser once one markup event
/// has consumed its byte budget, so an unterminated element cannot grow the
/// event buffer without bound.
#[derive(Debug)]
struct EventBudget<R> {
    inner: BufReader<R>,
    used: u64,
    exceeded: bool,
}

impl<R: Read> EventBudget<R> {
    fn new(source: R) -> Self {
        Self {
            inner: BufReader::new(source),
            used: 0,
            exceeded: false,
        }
    }

    const fn start_event(&mut self) {
        self.used = 0;
        self.exceeded = false;
    }

    fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read> Read for EventBudget<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let count = available.len().min(out.len());
        if let (Some(target), Some(source)) = (out.get_mut(..count), available.get(..count)) {
            target.copy_from_slice(source);
        }
        self.consume(count);
        Ok(count)
    }
}

impl<R: Read> BufRead for EventBudget<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let remaining = (MAX_CHUNKS_PER_EVENT * XML_CHUNK_SIZE).saturating_sub(self.used);
        if remaining == 0 {
            self.exceeded = true;
            return Err(io::Error::other("markup event exceeds its byte budget"));
        }
        let room = usize::try_from(remaining).unwrap_or(usize::MAX);
        let available = self.inner.fill_buf()?;
        Ok(available.get(..room).unwrap_or(available))
    }

    fn consume(&mut self, amount: usize) {
        self.used = self
            .used
            .saturating_add(u64::try_from(amount).unwrap_or(u64::MAX));
        self.inner.consume(amount);
    }
}

fn new_reader<R: Read>(source: R) -> Reader<EventBudget<R>> {
    let mut reader = Reader::from_reader(EventBudget::new(source));
    reader.trim_text(true);
    reader
}

fn parse_or<T: FromStr>(raw: &str, fallback: T) -> T {
    raw.trim().parse().unwrap_or(fallback)
}

impl<R: Read + Seek> XmlDecoder<R> {
    /// Wrap a seekable source positioned at the start of the document.
    #[must_use]
    pub fn new(source: R) -> Self {
        Self {
            reader: Some(new_reader(source)),
            buf: Vec::new(),
            open: None,
            string_bytes: 0,
            nodes: Vec::new(),
            bounds_allowed: true,
            finished: false,
            warned_tags: false,
        }
    }

    fn position(&self) -> u64 {
        self.reader
            .as_ref()
            .map_or(0, |reader| reader.buffer_position() as u64)
    }

    /// Charge `value` against the element's string budget.
    fn intern(&mut self, value: Cow<'_, str>, offset: u64) -> Result<String, DecodeError> {
        self.string_bytes += value.len() + 1;
        if self.string_bytes > MAX_ELEMENT_STRING_BYTES {
            return Err(DecodeError::corrupt(
                offset,
                "element strings exceed the 1 MiB buffer",
            ));
        }
        Ok(value.into_owned())
    }

    fn flush_nodes(&mut self, sink: &mut dyn PrimitiveSink) -> ControlFlow<()> {
        if self.nodes.is_empty() {
            return ControlFlow::Continue(());
        }
        let flow = sink.notify_nodes(&self.nodes);
        self.nodes.clear();
        flow
    }

    fn start_element(
        &mut self,
        element: &BytesStart<'_>,
        offset: u64,
    ) -> Result<Option<Bounds>, DecodeError> {
        let attrs = Attributes::collect(element, offset)?;
        let open = self.open.as_ref().map(OpenElement::kind);
        match (element.name().as_ref(), open) {
            (b"bounds" | b"bound", None) if self.bounds_allowed => {
                self.bounds_allowed = false;
                return Ok(attrs.bounds());
            }
            (b"node", None) => {
                self.bounds_allowed = false;
                self.string_bytes = 0;
                let info = self.info(&attrs, offset)?;
                self.open = Some(OpenElement::Node(RawNode {
                    id: attrs.get("id").map_or(0, |id| parse_or(id, 0)),
                    lon: attrs.get("lon").map_or(f64::NAN, |lon| parse_or(lon, f64::NAN)),
                    lat: attrs.get("lat").map_or(f64::NAN, |lat| parse_or(lat, f64::NAN)),
                    tags: Vec::new(),
                    info,
                }));
            }
            (b"way", None) => {
                self.string_bytes = 0;
                let info = self.info(&attrs, offset)?;
                self.open = Some(OpenElement::Way(RawWay {
                    id: attrs.get("id").map_or(0, |id| parse_or(id, 0)),
                    info,
                    ..RawWay::default()
                }));
            }
            (b"relation", None) => {
                self.string_bytes = 0;
                let info = self.info(&attrs, offset)?;
                self.open = Some(OpenElement::Relation(RawRelation {
                    id: attrs.get("id").map_or(0, |id| parse_or(id, 0)),
                    info,
                    ..RawRelation::default()
                }));
            }
            (b"nd", Some(ElementKind::Way)) => {
                if let (Some(reference), Some(OpenElement::Way(way))) =
                    (attrs.get("ref"), &mut self.open)
                {
                    way.refs.push(parse_or(reference, 0));
                }
            }
            (b"member", Some(ElementKind::Relation)) => {
                let role = self.intern(Cow::Borrowed(attrs.get("role").unwrap_or_default()), offset)?;
                let member = Member {
                    id: attrs.get("ref").map_or(0, |id| parse_or(id, 0)),
                    role,
                    kind: attrs
                        .get("type")
                        .and_then(MemberType::from_name)
                        .unwrap_or(MemberType::Node),
                };
                if let Some(OpenElement::Relation(relation)) = &mut self.open {
                    relation.members.push(member);
                }
            }
            (b"tag", Some(_)) => {
                let key = self.intern(Cow::Borrowed(attrs.get("k").unwrap_or_default()), offset)?;
                let value = self.intern(Cow::Borrowed(attrs.get("v").unwrap_or_default()), offset)?;
                self.push_tag(Tag::new(key, value));
            }
            _ => {}
        }
        Ok(None)
    }

    fn push_tag(&mut self, tag: Tag) {
        match &mut self.open {
            Some(OpenElement::Node(node)) => node.tags.push(tag),
            Some(OpenElement::Relation(relation)) => relation.tags.push(tag),
            Some(OpenElement::Way(way)) => {
                if way.tags.len() < MAX_TAGS_PER_WAY {
                    way.tags.push(tag);
                } else if !self.warned_tags {
                    self.warned_tags = true;
                    warn!(
                        "way {} has more than {MAX_TAGS_PER_WAY} tags; extra tags dropped",
                        way.id
                    );
                }
            }
            None => {}
        }
    }

    fn info(&mut self, attrs: &Attributes, offset: u64) -> Result<Option<PrimitiveInfo>, DecodeError> {
        let user = attrs
            .get("user")
            .map(|user| self.intern(Cow::Borrowed(user), offset))
            .transpose()?;
        let timestamp = attrs
            .get("timestamp")
            .map(|raw| self.intern(Cow::Borrowed(raw), offset).map(Timestamp::Raw))
            .transpose()?;
        let info = PrimitiveInfo {
            version: attrs.get("version").map(|raw| parse_or(raw, 0)),
            changeset: attrs.get("changeset").map(|raw| parse_or(raw, 0)),
            uid: attrs.get("uid").map(|raw| parse_or(raw, 0)),
            user,
            timestamp,
            visible: attrs.get("visible").map(|raw| raw != "false"),
        };
        Ok((!info.is_empty()).then_some(info))
    }

    fn end_element(&mut self, name: &[u8], sink: &mut dyn PrimitiveSink) -> ControlFlow<()> {
        let closes = matches!(
            (name, self.open.as_ref().map(OpenElement::kind)),
            (b"node", Some(ElementKind::Node))
                | (b"way", Some(ElementKind::Way))
                | (b"relation", Some(ElementKind::Relation))
        );
        if !closes {
            return ControlFlow::Continue(());
        }
        match self.open.take() {
            Some(OpenElement::Node(node)) => {
                if is_valid_lon_lat(node.lon, node.lat) {
                    self.nodes.push(node);
                    if self.nodes.len() >= NODE_BATCH {
                        return self.flush_nodes(sink);
                    }
                } else {
                    warn!(
                        "skipping node {}: invalid coordinates lon={}, lat={}",
                        node.id, node.lon, node.lat
                    );
                }
                ControlFlow::Continue(())
            }
            Some(OpenElement::Way(way)) => {
                if self.flush_nodes(sink).is_break() {
                    return ControlFlow::Break(());
                }
                sink.notify_way(way)
            }
            Some(OpenElement::Relation(relation)) => {
                if self.flush_nodes(sink).is_break() {
                    return ControlFlow::Break(());
                }
                sink.notify_relation(relation)
            }
            None => ControlFlow::Continue(()),
        }
    }
}

/// Attribute values of one start tag, unescaped.
struct Attributes {
    pairs: Vec<(Vec<u8>, String)>,
}

impl Attributes {
    fn collect(element: &BytesStart<'_>, offset: u64) -> Result<Self, DecodeError> {
        let mut pairs = Vec::new();
        for entry in element.attributes() {
            let attribute = entry.map_err(|source| DecodeError::Xml {
                offset,
                source: source.into(),
            })?;
            let value = attribute
                .unescape_value()
                .map_err(|source| DecodeError::Xml { offset, source })?;
            pairs.push((attribute.key.as_ref().to_vec(), value.into_owned()));
        }
        Ok(Self { pairs })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(name, _)| name.as_slice() == key.as_bytes())
            .map(|(_, value)| value.as_str())
    }

    fn bounds(&self) -> Option<Bounds> {
        let number = |key: &str| self.get(key).and_then(|raw| raw.trim().parse::<f64>().ok());
        if let Some(raw) = self.get("box") {
            let parts: Vec<f64> = raw
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect();
            return match parts.as_slice() {
                &[min_lat, min_lon, max_lat, max_lon] => Some(Bounds {
                    min_lon,
                    min_lat,
                    max_lon,
                    max_lat,
                }),
                _ => None,
            };
        }
        Some(Bounds {
            min_lon: number("minlon")?,
            min_lat: number("minlat")?,
            max_lon: number("maxlon")?,
            max_lat: number("maxlat")?,
        })
    }
}

impl<R: Read + Seek> BlockDecoder for XmlDecoder<R> {
    fn process_unit(&mut self, sink: &mut dyn PrimitiveSink) -> Result<UnitOutcome, DecodeError> {
        if self.finished {
            return Ok(UnitOutcome::Finished);
        }
        let unit_start = self.position();
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(UnitOutcome::Finished);
            };
            self.buf.clear();
            reader.get_mut().start_event();
            let before = reader.buffer_position() as u64;
            let event = match reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(_) if reader.get_ref().exceeded => {
                    return Err(DecodeError::corrupt(
                        before,
                        "too much data inside one element",
                    ));
                }
                Err(source) => {
                    return Err(DecodeError::Xml {
                        offset: before,
                        source,
                    });
                }
            };
            let flow = match event {
                Event::Eof => {
                    self.finished = true;
                    let flow = self.flush_nodes(sink);
                    return Ok(if flow.is_break() {
                        UnitOutcome::Interrupted
                    } else {
                        UnitOutcome::Finished
                    });
                }
                Event::DocType(text) => {
                    if text.windows(6).any(|window| window == b"ENTITY") {
                        return Err(DecodeError::corrupt(
                            before,
                            "document type declares entities",
                        ));
                    }
                    ControlFlow::Continue(())
                }
                Event::Start(element) => self
                    .start_element(&element, before)?
                    .map_or(ControlFlow::Continue(()), |bounds| sink.notify_bounds(bounds)),
                Event::Empty(element) => {
                    if let Some(bounds) = self.start_element(&element, before)? {
                        sink.notify_bounds(bounds)
                    } else {
                        self.end_element(element.name().as_ref(), sink)
                    }
                }
                Event::End(element) => self.end_element(element.name().as_ref(), sink),
                _ => ControlFlow::Continue(()),
            };
            if flow.is_break() {
                return Ok(UnitOutcome::Interrupted);
            }
            if self.position().saturating_sub(unit_start) >= XML_CHUNK_SIZE {
                return Ok(if self.flush_nodes(sink).is_break() {
                    UnitOutcome::Interrupted
                } else {
                    UnitOutcome::Decoded
                });
            }
        }
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        let reader = self.reader.take().ok_or_else(|| DecodeError::Io {
            source: std::io::Error::other("XML reader lost after a failed rewind"),
        })?;
        let mut source = reader.into_inner().into_inner();
        source
            .seek(SeekFrom::Start(0))
            .map_err(|source| DecodeError::Io { source })?;
        self.reader = Some(new_reader(source));
        self.buf.clear();
        self.open = None;
        self.string_bytes = 0;
        self.nodes.clear();
        self.bounds_allowed = true;
        self.finished = false;
        self.warned_tags = false;
        Ok(())
    }

    fn bytes_consumed(&self) -> u64 {
        self.position()
    }

    fn format(&self) -> InputFormat {
        InputFormat::Xml
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::decoder::test_sink::drain;
    use rstest::rstest;

    fn decoder(text: &str) -> XmlDecoder<Cursor<Vec<u8>>> {
        XmlDecoder::new(Cursor::new(text.as_bytes().to_vec()))
    }

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="0" minlon="0" maxlat="1" maxlon="1"/>
  <node id="1" lat="0.5" lon="0.25" version="2" user="ann" timestamp="2020-01-01T00:00:00Z"/>
  <node id="2" lat="0.5" lon="0.75">
    <tag k="amenity" v="bench"/>
    <tag k="name" v="A &amp; B"/>
  </node>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="path"/>
  </way>
  <relation id="20">
    <member type="way" ref="10" role="outer"/>
    <member type="node" ref="1" role=""/>
    <tag k="type" v="route"/>
  </relation>
</osm>
"#;

    #[rstest]
    fn decodes_all_primitive_kinds() {
        let sink = drain(&mut decoder(SAMPLE)).expect("decode");
        assert_eq!(
            sink.bounds,
            vec![Bounds {
                min_lon: 0.0,
                min_lat: 0.0,
                max_lon: 1.0,
                max_lat: 1.0
            }]
        );
        assert_eq!(sink.nodes.len(), 2);
        let first = &sink.nodes[0];
        let info = first.info.as_ref().expect("node info");
        assert_eq!(info.version, Some(2));
        assert_eq!(info.user.as_deref(), Some("ann"));
        assert_eq!(
            info.timestamp,
            Some(Timestamp::Raw("2020-01-01T00:00:00Z".into()))
        );
        assert_eq!(sink.nodes[1].tags[1], Tag::new("name", "A & B"));
        assert_eq!(sink.ways[0].refs, vec![1, 2]);
        assert_eq!(sink.relations[0].members.len(), 2);
        assert_eq!(sink.relations[0].members[0].kind, MemberType::Way);
        assert_eq!(sink.relations[0].members[0].role, "outer");
    }

    #[rstest]
    fn osmosis_bound_box_is_parsed() {
        let text = r#"<osm><bound box="-2,-1,4,3" origin="x"/><node id="1" lat="0" lon="1"/></osm>"#;
        let sink = drain(&mut decoder(text)).expect("decode");
        assert_eq!(
            sink.bounds,
            vec![Bounds {
                min_lon: -1.0,
                min_lat: -2.0,
                max_lon: 3.0,
                max_lat: 4.0
            }]
        );
    }

    #[rstest]
    fn bounds_after_first_node_are_ignored() {
        let text = r#"<osm><node id="1" lat="0" lon="1"/><bounds minlat="0" minlon="0" maxlat="1" maxlon="1"/></osm>"#;
        let sink = drain(&mut decoder(text)).expect("decode");
        assert!(sink.bounds.is_empty());
    }

    #[rstest]
    fn entity_declarations_are_rejected() {
        let text = r#"<?xml version="1.0"?><!DOCTYPE osm [<!ENTITY lol "lol">]><osm/>"#;
        let err = drain(&mut decoder(text)).expect_err("entity declaration");
        assert!(matches!(err, DecodeError::CorruptInput { .. }));
    }

    #[rstest]
    fn invalid_node_coordinates_are_skipped() {
        let text = r#"<osm><node id="1" lat="91" lon="0"/><node id="2" lat="1" lon="1"/></osm>"#;
        let sink = drain(&mut decoder(text)).expect("decode");
        assert_eq!(sink.nodes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2]);
    }

    #[rstest]
    fn long_ways_keep_every_ref() {
        let refs: String = (0..2500).map(|n| format!(r#"<nd ref="{n}"/>"#)).collect();
        let text = format!(r#"<osm><way id="7">{refs}</way></osm>"#);
        let sink = drain(&mut decoder(&text)).expect("decode");
        assert_eq!(sink.ways[0].refs.len(), 2500);
        assert_eq!(sink.ways[0].refs.last(), Some(&2499));
    }

    #[rstest]
    fn large_relations_keep_every_member() {
        let members: String = (1..=2001)
            .map(|n| format!(r#"<member type="node" ref="{n}" role="part"/>"#))
            .collect();
        let text = format!(
            r#"<osm><relation id="3">{members}<tag k="type" v="site"/></relation></osm>"#
        );
        let sink = drain(&mut decoder(&text)).expect("decode");
        assert_eq!(sink.relations[0].members.len(), 2001);
        assert_eq!(sink.relations[0].tags, vec![Tag::new("type", "site")]);
    }

    #[rstest]
    fn way_tags_are_truncated() {
        let tags: String = (0..MAX_TAGS_PER_WAY + 3)
            .map(|n| format!(r#"<tag k="k{n}" v="v"/>"#))
            .collect();
        let text = format!(r#"<osm><way id="7"><nd ref="1"/>{tags}</way></osm>"#);
        let sink = drain(&mut decoder(&text)).expect("decode");
        assert_eq!(sink.ways[0].tags.len(), MAX_TAGS_PER_WAY);
    }

    #[rstest]
    fn oversized_element_strings_fail_fast() {
        let long = "x".repeat(512 * 1024);
        let text = format!(
            r#"<osm><way id="1"><tag k="a" v="{long}"/><tag k="b" v="{long}"/></way></osm>"#
        );
        let err = drain(&mut decoder(&text)).expect_err("arena overflow");
        assert!(matches!(err, DecodeError::CorruptInput { .. }));
    }

    #[rstest]
    fn oversized_events_stop_buffering_at_the_budget() {
        let long = "&amp;".repeat(256 * 1024);
        let text = format!(
            r#"<osm><node id="1" lat="0" lon="0"/><way id="2"><nd ref="1"/><tag k="a" v="{long}"/></way></osm>"#
        );
        let mut decoder = decoder(&text);
        let mut sink = crate::decoder::test_sink::RecordingSink::default();
        let err = loop {
            match decoder.process_unit(&mut sink) {
                Ok(UnitOutcome::Finished) => panic!("oversized tag was accepted"),
                Ok(_) => {}
                Err(err) => break err,
            }
        };
        let DecodeError::CorruptInput { offset, reason } = err else {
            panic!("expected corrupt input, got {err:?}");
        };
        assert_eq!(reason, "too much data inside one element");
        assert!(offset > 0);
        assert!(sink.ways.is_empty());
        assert!(decoder.buf.len() as u64 <= MAX_CHUNKS_PER_EVENT * XML_CHUNK_SIZE);
    }

    #[rstest]
    fn large_input_spans_several_units() {
        let nodes: String = (1..=3000)
            .map(|n| format!(r#"<node id="{n}" lat="1" lon="1"><tag k="k" v="v"/></node>"#))
            .collect();
        let text = format!("<osm>{nodes}</osm>");
        let mut decoder = decoder(&text);
        let mut sink = crate::decoder::test_sink::RecordingSink::default();
        let mut units = 0;
        while decoder.process_unit(&mut sink).expect("unit") != UnitOutcome::Finished {
            units += 1;
        }
        assert!(units > 1);
        assert_eq!(sink.nodes.len(), 3000);

        decoder.rewind().expect("rewind");
        assert_eq!(decoder.bytes_consumed(), 0);
        let again = drain(&mut decoder).expect("second pass");
        assert_eq!(again.nodes.len(), 3000);
    }
}
