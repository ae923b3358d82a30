//! `PrimitiveBlock` decoding.
//!
//! A block is read in two passes: the first collects the string table,
//! group payloads and coordinate scaling, which protobuf allows in any
//! order; the second walks the groups and reports primitives.

use std::ops::ControlFlow;

use log::warn;
use osmweave_core::{
    Member, MemberType, PrimitiveInfo, RawNode, RawRelation, RawWay, Tag, Timestamp, WireCursor,
    WireError, is_valid_lon_lat,
    wire::WireType,
};

use crate::decoder::PrimitiveSink;

const DEFAULT_GRANULARITY: i64 = 100;
const DEFAULT_DATE_GRANULARITY: i64 = 1000;
const NANO: f64 = 1e-9;

type WireResult<T> = Result<T, WireError>;

const fn corrupt(cursor: &WireCursor<'_>, reason: &'static str) -> WireError {
    WireError::CorruptInput {
        offset: cursor.position(),
        reason,
    }
}

/// Block-wide decoding context.
struct BlockContext<'a> {
    strings: Vec<&'a [u8]>,
    granularity: i64,
    date_granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
}

impl BlockContext<'_> {
    fn string(&self, cursor: &WireCursor<'_>, index: u64) -> WireResult<String> {
        usize::try_from(index)
            .ok()
            .and_then(|position| self.strings.get(position))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .ok_or_else(|| corrupt(cursor, "string table index out of range"))
    }

    fn tags(&self, cursor: &WireCursor<'_>, keys: &[u64], vals: &[u64]) -> WireResult<Vec<Tag>> {
        if keys.len() != vals.len() {
            return Err(corrupt(cursor, "tag keys and values differ in length"));
        }
        keys.iter()
            .zip(vals)
            .map(|(&key, &value)| Ok(Tag::new(self.string(cursor, key)?, self.string(cursor, value)?)))
            .collect()
    }

    #[expect(
        clippy::float_arithmetic,
        clippy::cast_precision_loss,
        reason = "block units scale to decimal degrees"
    )]
    fn degrees(&self, offset: i64, value: i64) -> f64 {
        NANO * offset.wrapping_add(self.granularity.wrapping_mul(value)) as f64
    }

    fn lon(&self, value: i64) -> f64 {
        self.degrees(self.lon_offset, value)
    }

    fn lat(&self, value: i64) -> f64 {
        self.degrees(self.lat_offset, value)
    }

    #[expect(
        clippy::integer_division,
        clippy::integer_division_remainder_used,
        reason = "date granularity is expressed in milliseconds"
    )]
    fn epoch_seconds(&self, timestamp: i64) -> i64 {
        timestamp.wrapping_mul(self.date_granularity) / 1000
    }
}

/// Decode one block, reporting its primitives to `sink`.
///
/// Returns `Break` when the sink interrupted the block.
pub(super) fn decode_primitive_block(
    data: &[u8],
    sink: &mut dyn PrimitiveSink,
) -> WireResult<ControlFlow<()>> {
    let mut cursor = WireCursor::new(data);
    let mut context = BlockContext {
        strings: Vec::new(),
        granularity: DEFAULT_GRANULARITY,
        date_granularity: DEFAULT_DATE_GRANULARITY,
        lat_offset: 0,
        lon_offset: 0,
    };
    let mut groups = Vec::new();
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        match (key.number, key.wire_type) {
            (1, WireType::LengthDelimited) => {
                context.strings = read_string_table(cursor.read_message()?)?;
            }
            (2, WireType::LengthDelimited) => groups.push(cursor.read_length_delimited()?),
            (17, WireType::Varint) => {
                context.granularity = cursor.read_int64()?;
                if context.granularity <= 0 {
                    return Err(corrupt(&cursor, "granularity must be positive"));
                }
            }
            (18, WireType::Varint) => context.date_granularity = cursor.read_int64()?,
            (19, WireType::Varint) => context.lat_offset = cursor.read_int64()?,
            (20, WireType::Varint) => context.lon_offset = cursor.read_int64()?,
            _ => cursor.skip_field(key)?,
        }
    }

    let mut nodes = Vec::new();
    for payload in groups {
        let mut group = WireCursor::new(payload);
        while !group.is_empty() {
            let key = group.read_key()?;
            let flow = match (key.number, key.wire_type) {
                (1, WireType::LengthDelimited) => {
                    if let Some(node) = read_node(&context, group.read_message()?)? {
                        nodes.push(node);
                    }
                    ControlFlow::Continue(())
                }
                (2, WireType::LengthDelimited) => {
                    read_dense_nodes(&context, group.read_message()?, &mut nodes)?;
                    ControlFlow::Continue(())
                }
                (3, WireType::LengthDelimited) => {
                    let way = read_way(&context, group.read_message()?)?;
                    if flush_nodes(&mut nodes, sink).is_break() {
                        return Ok(ControlFlow::Break(()));
                    }
                    sink.notify_way(way)
                }
                (4, WireType::LengthDelimited) => {
                    let relation = read_relation(&context, group.read_message()?)?;
                    if flush_nodes(&mut nodes, sink).is_break() {
                        return Ok(ControlFlow::Break(()));
                    }
                    sink.notify_relation(relation)
                }
                _ => {
                    group.skip_field(key)?;
                    ControlFlow::Continue(())
                }
            };
            if flow.is_break() {
                return Ok(flow);
            }
        }
        if flush_nodes(&mut nodes, sink).is_break() {
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// Hand the accumulated nodes to the sink.
fn flush_nodes(nodes: &mut Vec<RawNode>, sink: &mut dyn PrimitiveSink) -> ControlFlow<()> {
    if nodes.is_empty() {
        return ControlFlow::Continue(());
    }
    let flow = sink.notify_nodes(nodes);
    nodes.clear();
    flow
}

fn read_string_table(mut cursor: WireCursor<'_>) -> WireResult<Vec<&[u8]>> {
    let mut strings = Vec::new();
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        if key.number == 1 && key.wire_type == WireType::LengthDelimited {
            strings.push(cursor.read_length_delimited()?);
        } else {
            cursor.skip_field(key)?;
        }
    }
    Ok(strings)
}

fn read_info(context: &BlockContext<'_>, mut cursor: WireCursor<'_>) -> WireResult<PrimitiveInfo> {
    let mut info = PrimitiveInfo::default();
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        match (key.number, key.wire_type) {
            (1, WireType::Varint) => info.version = Some(cursor.read_int32()?),
            (2, WireType::Varint) => {
                let raw = cursor.read_int64()?;
                info.timestamp = Some(Timestamp::Epoch(context.epoch_seconds(raw)));
            }
            (3, WireType::Varint) => info.changeset = Some(cursor.read_int64()?),
            (4, WireType::Varint) => info.uid = Some(cursor.read_int32()?),
            (5, WireType::Varint) => {
                let sid = u64::from(cursor.read_varint32()?);
                info.user = Some(context.string(&cursor, sid)?);
            }
            (6, WireType::Varint) => info.visible = Some(cursor.read_varint64()? != 0),
            _ => cursor.skip_field(key)?,
        }
    }
    Ok(info)
}

fn checked_node(id: i64, lon: f64, lat: f64, tags: Vec<Tag>, info: Option<PrimitiveInfo>) -> Option<RawNode> {
    if !is_valid_lon_lat(lon, lat) {
        warn!("skipping node {id}: invalid coordinates lon={lon}, lat={lat}");
        return None;
    }
    Some(RawNode {
        id,
        lon,
        lat,
        tags,
        info,
    })
}

fn read_node(context: &BlockContext<'_>, mut cursor: WireCursor<'_>) -> WireResult<Option<RawNode>> {
    let mut id = 0;
    let mut keys = Vec::new();
    let mut vals = Vec::new();
    let mut info = None;
    let mut lat = 0;
    let mut lon = 0;
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        match (key.number, key.wire_type) {
            (1, WireType::Varint) => id = cursor.read_svarint64()?,
            (2, _) => cursor.read_repeated_varint(key, &mut keys)?,
            (3, _) => cursor.read_repeated_varint(key, &mut vals)?,
            (4, WireType::LengthDelimited) => {
                info = Some(read_info(context, cursor.read_message()?)?);
            }
            (8, WireType::Varint) => lat = cursor.read_svarint64()?,
            (9, WireType::Varint) => lon = cursor.read_svarint64()?,
            _ => cursor.skip_field(key)?,
        }
    }
    let tags = context.tags(&cursor, &keys, &vals)?;
    Ok(checked_node(id, context.lon(lon), context.lat(lat), tags, info))
}

/// Column-oriented provenance of a dense node group.
#[derive(Default)]
struct DenseInfo {
    versions: Vec<u64>,
    timestamps: Vec<i64>,
    changesets: Vec<i64>,
    uids: Vec<i64>,
    user_sids: Vec<i64>,
    visible: Vec<u64>,
}

impl DenseInfo {
    fn read(mut cursor: WireCursor<'_>) -> WireResult<Self> {
        let mut info = Self::default();
        while !cursor.is_empty() {
            let key = cursor.read_key()?;
            match key.number {
                1 => cursor.read_repeated_varint(key, &mut info.versions)?,
                2 => cursor.read_repeated_svarint(key, true, &mut info.timestamps)?,
                3 => cursor.read_repeated_svarint(key, true, &mut info.changesets)?,
                4 => cursor.read_repeated_svarint(key, true, &mut info.uids)?,
                5 => cursor.read_repeated_svarint(key, true, &mut info.user_sids)?,
                6 => cursor.read_repeated_varint(key, &mut info.visible)?,
                _ => cursor.skip_field(key)?,
            }
        }
        Ok(info)
    }

    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        reason = "dense columns narrow to int32 the way protobuf does"
    )]
    fn at(
        &self,
        context: &BlockContext<'_>,
        cursor: &WireCursor<'_>,
        index: usize,
    ) -> WireResult<PrimitiveInfo> {
        let user = self
            .user_sids
            .get(index)
            .map(|&raw| {
                let sid =
                    u64::try_from(raw).map_err(|_| corrupt(cursor, "negative user string index"))?;
                context.string(cursor, sid)
            })
            .transpose()?;
        Ok(PrimitiveInfo {
            version: self
                .versions
                .get(index)
                .map(|&version| (version & u64::from(u32::MAX)) as u32 as i32),
            changeset: self.changesets.get(index).copied(),
            uid: self.uids.get(index).map(|&uid| uid as i32),
            user,
            timestamp: self
                .timestamps
                .get(index)
                .map(|&raw| Timestamp::Epoch(context.epoch_seconds(raw))),
            visible: self.visible.get(index).map(|&flag| flag != 0),
        })
    }
}

fn read_dense_nodes(
    context: &BlockContext<'_>,
    mut cursor: WireCursor<'_>,
    nodes: &mut Vec<RawNode>,
) -> WireResult<()> {
    let mut ids = Vec::new();
    let mut lats = Vec::new();
    let mut lons = Vec::new();
    let mut keys_vals = Vec::new();
    let mut info = None;
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        match key.number {
            1 => cursor.read_repeated_svarint(key, true, &mut ids)?,
            5 if key.wire_type == WireType::LengthDelimited => {
                info = Some(DenseInfo::read(cursor.read_message()?)?);
            }
            8 => cursor.read_repeated_svarint(key, true, &mut lats)?,
            9 => cursor.read_repeated_svarint(key, true, &mut lons)?,
            10 => cursor.read_repeated_varint(key, &mut keys_vals)?,
            _ => cursor.skip_field(key)?,
        }
    }
    if lats.len() != ids.len() || lons.len() != ids.len() {
        return Err(corrupt(&cursor, "dense node columns differ in length"));
    }

    let mut pairs = keys_vals.iter().copied();
    for (index, ((&id, &lat), &lon)) in ids.iter().zip(&lats).zip(&lons).enumerate() {
        let mut tags = Vec::new();
        while let Some(key) = pairs.next() {
            if key == 0 {
                break;
            }
            let value = pairs
                .next()
                .ok_or_else(|| corrupt(&cursor, "dense node tag without value"))?;
            tags.push(Tag::new(context.string(&cursor, key)?, context.string(&cursor, value)?));
        }
        let node_info = info
            .as_ref()
            .map(|columns| columns.at(context, &cursor, index))
            .transpose()?;
        if let Some(node) = checked_node(id, context.lon(lon), context.lat(lat), tags, node_info) {
            nodes.push(node);
        }
    }
    Ok(())
}

fn read_way(context: &BlockContext<'_>, mut cursor: WireCursor<'_>) -> WireResult<RawWay> {
    let mut way = RawWay::default();
    let mut keys = Vec::new();
    let mut vals = Vec::new();
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        match (key.number, key.wire_type) {
            (1, WireType::Varint) => way.id = cursor.read_int64()?,
            (2, _) => cursor.read_repeated_varint(key, &mut keys)?,
            (3, _) => cursor.read_repeated_varint(key, &mut vals)?,
            (4, WireType::LengthDelimited) => {
                way.info = Some(read_info(context, cursor.read_message()?)?);
            }
            (8, _) => cursor.read_repeated_svarint(key, true, &mut way.refs)?,
            _ => cursor.skip_field(key)?,
        }
    }
    way.tags = context.tags(&cursor, &keys, &vals)?;
    Ok(way)
}

fn read_relation(context: &BlockContext<'_>, mut cursor: WireCursor<'_>) -> WireResult<RawRelation> {
    let mut relation = RawRelation::default();
    let mut keys = Vec::new();
    let mut vals = Vec::new();
    let mut roles = Vec::new();
    let mut ids = Vec::new();
    let mut types = Vec::new();
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        match (key.number, key.wire_type) {
            (1, WireType::Varint) => relation.id = cursor.read_int64()?,
            (2, _) => cursor.read_repeated_varint(key, &mut keys)?,
            (3, _) => cursor.read_repeated_varint(key, &mut vals)?,
            (4, WireType::LengthDelimited) => {
                relation.info = Some(read_info(context, cursor.read_message()?)?);
            }
            (8, _) => cursor.read_repeated_varint(key, &mut roles)?,
            (9, _) => cursor.read_repeated_svarint(key, true, &mut ids)?,
            (10, _) => cursor.read_repeated_varint(key, &mut types)?,
            _ => cursor.skip_field(key)?,
        }
    }
    relation.tags = context.tags(&cursor, &keys, &vals)?;
    if roles.len() != ids.len() || types.len() != ids.len() {
        return Err(corrupt(&cursor, "relation member columns differ in length"));
    }
    relation.members = ids
        .iter()
        .zip(&roles)
        .zip(&types)
        .map(|((&id, &role), &code)| {
            let kind = MemberType::from_code(code).ok_or_else(|| corrupt(&cursor, "unknown member type"))?;
            Ok(Member {
                id,
                role: context.string(&cursor, role & u64::from(u32::MAX))?,
                kind,
            })
        })
        .collect::<WireResult<_>>()?;
    Ok(relation)
}
