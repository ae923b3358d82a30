//! Builders for synthetic OSM PBF inputs used by unit and behaviour tests.
//!
//! The writer covers just enough of the protobuf encoding to produce
//! well-formed header and data blobs, optionally zlib-compressed. It is not
//! a general-purpose encoder.

use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};

use crate::{
    Bounds, PrimitiveInfo, RawNode, RawRelation, RawWay, Timestamp,
    coord::degrees_to_fixed,
    model::MemberType,
    wire::{write_svarint64, write_varint64},
};

/// Minimal protobuf message writer.
#[derive(Debug, Default, Clone)]
pub struct ProtoWriter {
    buf: Vec<u8>,
}

impl ProtoWriter {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&mut self, field: u32, wire_type: u8) {
        write_varint64(&mut self.buf, (u64::from(field) << 3) | u64::from(wire_type));
    }

    /// Append an unsigned varint field.
    pub fn varint(&mut self, field: u32, value: u64) -> &mut Self {
        self.key(field, 0);
        write_varint64(&mut self.buf, value);
        self
    }

    /// Append a two's complement `int64` field.
    #[expect(clippy::cast_sign_loss, reason = "int64 is sent as its two's complement bits")]
    pub fn int64(&mut self, field: u32, value: i64) -> &mut Self {
        self.varint(field, value as u64)
    }

    /// Append a zig-zag `sint64` field.
    pub fn svarint(&mut self, field: u32, value: i64) -> &mut Self {
        self.key(field, 0);
        write_svarint64(&mut self.buf, value);
        self
    }

    /// Append a length-delimited field.
    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        self.key(field, 2);
        write_varint64(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    /// Append a string field.
    pub fn string(&mut self, field: u32, value: &str) -> &mut Self {
        self.bytes(field, value.as_bytes())
    }

    /// Append a nested message.
    pub fn message(&mut self, field: u32, value: &Self) -> &mut Self {
        self.bytes(field, &value.buf)
    }

    /// Append a packed run of unsigned varints.
    pub fn packed_varints(&mut self, field: u32, values: &[u64]) -> &mut Self {
        let mut packed = Vec::new();
        for value in values {
            write_varint64(&mut packed, *value);
        }
        self.bytes(field, &packed)
    }

    /// Append a packed run of zig-zag varints.
    pub fn packed_svarints(&mut self, field: u32, values: &[i64]) -> &mut Self {
        let mut packed = Vec::new();
        for value in values {
            write_svarint64(&mut packed, *value);
        }
        self.bytes(field, &packed)
    }

    /// Append a packed, delta-coded run of zig-zag varints.
    pub fn packed_deltas(&mut self, field: u32, values: &[i64]) -> &mut Self {
        let mut previous = 0_i64;
        let deltas: Vec<i64> = values
            .iter()
            .map(|value| {
                let delta = value.wrapping_sub(previous);
                previous = *value;
                delta
            })
            .collect();
        self.packed_svarints(field, &deltas)
    }

    /// Encoded bytes so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Granularity used by [`PrimitiveBlockBuilder`], in nanodegrees.
///
/// At 100 nanodegrees one block unit equals one fixed-point unit.
const GRANULARITY: u64 = 100;

fn to_block_units(degrees: f64) -> i64 {
    i64::from(degrees_to_fixed(degrees))
}

/// Builds one `PrimitiveBlock` with a shared string table.
#[derive(Debug, Clone)]
pub struct PrimitiveBlockBuilder {
    strings: Vec<String>,
    groups: Vec<ProtoWriter>,
}

impl Default for PrimitiveBlockBuilder {
    fn default() -> Self {
        Self {
            strings: vec![String::new()],
            groups: Vec::new(),
        }
    }
}

impl PrimitiveBlockBuilder {
    /// Start a block whose string table holds only the empty string.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sid(&mut self, value: &str) -> u64 {
        let index = self
            .strings
            .iter()
            .position(|existing| existing == value)
            .unwrap_or_else(|| {
                self.strings.push(value.to_owned());
                self.strings.len() - 1
            });
        index as u64
    }

    fn info(&mut self, info: &PrimitiveInfo) -> ProtoWriter {
        let mut message = ProtoWriter::new();
        if let Some(version) = info.version {
            message.int64(1, i64::from(version));
        }
        if let Some(Timestamp::Epoch(seconds)) = info.timestamp {
            message.int64(2, seconds);
        }
        if let Some(changeset) = info.changeset {
            message.int64(3, changeset);
        }
        if let Some(uid) = info.uid {
            message.int64(4, i64::from(uid));
        }
        if let Some(user) = &info.user {
            let sid = self.sid(user);
            message.varint(5, sid);
        }
        if let Some(visible) = info.visible {
            message.varint(6, u64::from(visible));
        }
        message
    }

    /// Add a group of individually encoded nodes.
    pub fn nodes(&mut self, nodes: &[RawNode]) -> &mut Self {
        let mut group = ProtoWriter::new();
        for node in nodes {
            let mut message = ProtoWriter::new();
            message.svarint(1, node.id);
            let keys: Vec<u64> = node.tags.iter().map(|tag| self.sid(&tag.key)).collect();
            let vals: Vec<u64> = node.tags.iter().map(|tag| self.sid(&tag.value)).collect();
            message.packed_varints(2, &keys).packed_varints(3, &vals);
            if let Some(info) = &node.info {
                let info_message = self.info(info);
                message.message(4, &info_message);
            }
            message
                .svarint(8, to_block_units(node.lat))
                .svarint(9, to_block_units(node.lon));
            group.message(1, &message);
        }
        self.groups.push(group);
        self
    }

    /// Add a dense-nodes group.
    pub fn dense_nodes(&mut self, nodes: &[RawNode]) -> &mut Self {
        let ids: Vec<i64> = nodes.iter().map(|node| node.id).collect();
        let lats: Vec<i64> = nodes.iter().map(|node| to_block_units(node.lat)).collect();
        let lons: Vec<i64> = nodes.iter().map(|node| to_block_units(node.lon)).collect();
        let mut keys_vals = Vec::new();
        let has_tags = nodes.iter().any(|node| !node.tags.is_empty());
        if has_tags {
            for node in nodes {
                for tag in &node.tags {
                    keys_vals.push(self.sid(&tag.key));
                    keys_vals.push(self.sid(&tag.value));
                }
                keys_vals.push(0);
            }
        }
        let mut dense = ProtoWriter::new();
        dense.packed_deltas(1, &ids);
        if nodes.iter().any(|node| node.info.is_some()) {
            let info = self.dense_info(nodes);
            dense.message(5, &info);
        }
        dense.packed_deltas(8, &lats).packed_deltas(9, &lons);
        if has_tags {
            dense.packed_varints(10, &keys_vals);
        }
        let mut group = ProtoWriter::new();
        group.message(2, &dense);
        self.groups.push(group);
        self
    }

    fn dense_info(&mut self, nodes: &[RawNode]) -> ProtoWriter {
        let default = PrimitiveInfo::default();
        let infos: Vec<&PrimitiveInfo> = nodes
            .iter()
            .map(|node| node.info.as_ref().unwrap_or(&default))
            .collect();
        let versions: Vec<u64> = infos
            .iter()
            .map(|info| u64::try_from(info.version.unwrap_or(0)).unwrap_or(0))
            .collect();
        let timestamps: Vec<i64> = infos
            .iter()
            .map(|info| match info.timestamp {
                Some(Timestamp::Epoch(seconds)) => seconds,
                _ => 0,
            })
            .collect();
        let changesets: Vec<i64> = infos.iter().map(|info| info.changeset.unwrap_or(0)).collect();
        let uids: Vec<i64> = infos
            .iter()
            .map(|info| i64::from(info.uid.unwrap_or(0)))
            .collect();
        let users: Vec<i64> = infos
            .iter()
            .map(|info| {
                info.user
                    .as_deref()
                    .map_or(0, |user| i64::try_from(self.sid(user)).unwrap_or(0))
            })
            .collect();
        let mut message = ProtoWriter::new();
        message
            .packed_varints(1, &versions)
            .packed_deltas(2, &timestamps)
            .packed_deltas(3, &changesets)
            .packed_deltas(4, &uids)
            .packed_deltas(5, &users);
        message
    }

    /// Add a group of ways.
    pub fn ways(&mut self, ways: &[RawWay]) -> &mut Self {
        let mut group = ProtoWriter::new();
        for way in ways {
            let mut message = ProtoWriter::new();
            message.int64(1, way.id);
            let keys: Vec<u64> = way.tags.iter().map(|tag| self.sid(&tag.key)).collect();
            let vals: Vec<u64> = way.tags.iter().map(|tag| self.sid(&tag.value)).collect();
            message.packed_varints(2, &keys).packed_varints(3, &vals);
            if let Some(info) = &way.info {
                let info_message = self.info(info);
                message.message(4, &info_message);
            }
            message.packed_deltas(8, &way.refs);
            group.message(3, &message);
        }
        self.groups.push(group);
        self
    }

    /// Add a group of relations.
    pub fn relations(&mut self, relations: &[RawRelation]) -> &mut Self {
        let mut group = ProtoWriter::new();
        for relation in relations {
            let mut message = ProtoWriter::new();
            message.int64(1, relation.id);
            let keys: Vec<u64> = relation
                .tags
                .iter()
                .map(|tag| self.sid(&tag.key))
                .collect();
            let vals: Vec<u64> = relation
                .tags
                .iter()
                .map(|tag| self.sid(&tag.value))
                .collect();
            message.packed_varints(2, &keys).packed_varints(3, &vals);
            if let Some(info) = &relation.info {
                let info_message = self.info(info);
                message.message(4, &info_message);
            }
            let roles: Vec<u64> = relation
                .members
                .iter()
                .map(|member| self.sid(&member.role))
                .collect();
            let ids: Vec<i64> = relation.members.iter().map(|member| member.id).collect();
            let types: Vec<u64> = relation
                .members
                .iter()
                .map(|member| match member.kind {
                    MemberType::Node => 0,
                    MemberType::Way => 1,
                    MemberType::Relation => 2,
                })
                .collect();
            message
                .packed_varints(8, &roles)
                .packed_deltas(9, &ids)
                .packed_varints(10, &types);
            group.message(4, &message);
        }
        self.groups.push(group);
        self
    }

    /// Encode the block.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut table = ProtoWriter::new();
        for entry in &self.strings {
            table.string(1, entry);
        }
        let mut block = ProtoWriter::new();
        block.message(1, &table);
        for group in &self.groups {
            block.message(2, group);
        }
        block.varint(17, GRANULARITY);
        block.finish()
    }
}

/// Assembles framed blobs into a complete `.osm.pbf` byte stream.
#[derive(Debug, Clone, Default)]
pub struct PbfFileBuilder {
    out: Vec<u8>,
    compress: bool,
}

impl PbfFileBuilder {
    /// Start an empty file with raw (uncompressed) blobs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select zlib compression for subsequent blobs.
    #[must_use]
    pub const fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Append an `OSMHeader` blob.
    #[must_use]
    pub fn header(self, bbox: Option<Bounds>, required_features: &[&str]) -> Self {
        let mut header = ProtoWriter::new();
        if let Some(bounds) = bbox {
            let mut bbox_message = ProtoWriter::new();
            bbox_message
                .svarint(1, nanodegrees(bounds.min_lon))
                .svarint(2, nanodegrees(bounds.max_lon))
                .svarint(3, nanodegrees(bounds.max_lat))
                .svarint(4, nanodegrees(bounds.min_lat));
            header.message(1, &bbox_message);
        }
        for feature in required_features {
            header.string(4, feature);
        }
        header.string(16, "osmweave-tests");
        self.blob("OSMHeader", header.as_bytes())
    }

    /// Append an `OSMData` blob built from `block`.
    #[must_use]
    pub fn block(self, block: &PrimitiveBlockBuilder) -> Self {
        self.blob("OSMData", &block.encode())
    }

    /// Append a blob of arbitrary type and payload.
    #[must_use]
    #[expect(clippy::big_endian_bytes, reason = "blob frames carry a big-endian length")]
    pub fn blob(mut self, blob_type: &str, payload: &[u8]) -> Self {
        let mut message = ProtoWriter::new();
        if self.compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            let compressed = encoder
                .write_all(payload)
                .and_then(|()| encoder.finish())
                .unwrap_or_default();
            message.varint(2, payload.len() as u64).bytes(3, &compressed);
        } else {
            message.bytes(1, payload);
        }
        let blob = message.finish();
        let mut header_message = ProtoWriter::new();
        header_message
            .string(1, blob_type)
            .varint(3, blob.len() as u64);
        let blob_header = header_message.finish();
        let header_len = u32::try_from(blob_header.len()).unwrap_or(u32::MAX);
        self.out.extend_from_slice(&header_len.to_be_bytes());
        self.out.extend_from_slice(&blob_header);
        self.out.extend_from_slice(&blob);
        self
    }

    /// Append raw bytes verbatim, for truncation and corruption tests.
    #[must_use]
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.out.extend_from_slice(bytes);
        self
    }

    /// Finish the file.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.out
    }
}

fn nanodegrees(degrees: f64) -> i64 {
    i64::from(degrees_to_fixed(degrees)) * 100
}
