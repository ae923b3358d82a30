//! Compact persisted form of a resolved way.
//!
//! Layout:
//!
//! ```text
//! is_area: u8
//! tag_count: u8
//! tag_count × (key: varint, value: varint [, inline: bytes NUL])
//! info_flags: u8 [, timestamp, changeset, version, uid: svarint] [, user NUL] [, raw timestamp NUL]
//! first: lon i32 LE, lat i32 LE
//! rest: (dlon, dlat) zig-zag varints
//! ```
//!
//! A value index of 0 means the value follows inline.

use osmweave_core::{
    CoordinatePair, PrimitiveInfo, Tag, Timestamp, WireCursor, WireError,
    wire::{write_svarint64, write_varint64},
};

use super::dictionary::{KeyDictionary, ValueRef};

/// Most tags stored per way.
pub const MAX_TAGS_PER_WAY: usize = 255;

const INFO_TIMESTAMP: u8 = 1;
const INFO_CHANGESET: u8 = 1 << 1;
const INFO_VERSION: u8 = 1 << 2;
const INFO_UID: u8 = 1 << 3;
const INFO_USER: u8 = 1 << 4;
const INFO_RAW_TIMESTAMP: u8 = 1 << 5;

/// A resolved way as stored in the scratch `ways` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedWay {
    /// Whether the way was classified as an area.
    pub is_area: bool,
    /// Tags, at most [`MAX_TAGS_PER_WAY`].
    pub tags: Vec<Tag>,
    /// Provenance, when retained.
    pub info: Option<PrimitiveInfo>,
    /// Resolved positions in way order.
    pub coords: Vec<CoordinatePair>,
}

fn write_cstr(out: &mut Vec<u8>, text: &str) {
    // Values cannot contain the terminator; anything after a NUL is cut.
    let bytes = text.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    out.extend_from_slice(bytes.get(..end).unwrap_or_default());
    out.push(0);
}

fn read_cstr(cursor: &mut WireCursor<'_>) -> Result<String, WireError> {
    let mut bytes = Vec::new();
    loop {
        match cursor.read_u8()? {
            0 => break,
            byte => bytes.push(byte),
        }
    }
    String::from_utf8(bytes).map_err(|_| WireError::CorruptInput {
        offset: cursor.position(),
        reason: "inline string is not UTF-8",
    })
}

fn narrow(cursor: &WireCursor<'_>, value: i64) -> Result<i32, WireError> {
    i32::try_from(value).map_err(|_| WireError::CorruptInput {
        offset: cursor.position(),
        reason: "value out of 32-bit range",
    })
}

fn unknown_index(cursor: &WireCursor<'_>) -> WireError {
    WireError::CorruptInput {
        offset: cursor.position(),
        reason: "tag index missing from dictionary",
    }
}

impl EncodedWay {
    /// Serialise, interning tags into `dictionary`.
    ///
    /// Tags beyond [`MAX_TAGS_PER_WAY`] and tags whose key the dictionary
    /// refuses are dropped.
    #[expect(clippy::little_endian_bytes, reason = "first pair is stored little-endian")]
    pub fn encode(&self, dictionary: &mut KeyDictionary) -> Vec<u8> {
        let mut tag_bytes = Vec::new();
        let mut tag_count = 0_u8;
        for tag in self.tags.iter().take(MAX_TAGS_PER_WAY) {
            let Some((key, value)) = dictionary.intern(&tag.key, &tag.value) else {
                continue;
            };
            write_varint64(&mut tag_bytes, u64::from(key));
            match value {
                ValueRef::Indexed(index) => write_varint64(&mut tag_bytes, u64::from(index)),
                ValueRef::Inline => {
                    tag_bytes.push(0);
                    write_cstr(&mut tag_bytes, &tag.value);
                }
            }
            tag_count += 1;
        }

        let mut out = Vec::with_capacity(4 + tag_bytes.len() + self.coords.len() * 4);
        out.push(u8::from(self.is_area));
        out.push(tag_count);
        out.extend_from_slice(&tag_bytes);
        encode_info(&mut out, self.info.as_ref());

        let mut coords = self.coords.iter();
        if let Some(first) = coords.next() {
            out.extend_from_slice(&first.lon.to_le_bytes());
            out.extend_from_slice(&first.lat.to_le_bytes());
            let mut prev = *first;
            for coord in coords {
                write_svarint64(&mut out, i64::from(coord.lon) - i64::from(prev.lon));
                write_svarint64(&mut out, i64::from(coord.lat) - i64::from(prev.lat));
                prev = *coord;
            }
        }
        out
    }

    /// Parse bytes produced by [`EncodedWay::encode`] with the same dictionary.
    ///
    /// # Errors
    /// Returns [`WireError`] when the bytes are truncated, reference unknown
    /// dictionary entries, or hold out-of-range values.
    pub fn decode(bytes: &[u8], dictionary: &KeyDictionary) -> Result<Self, WireError> {
        let mut cursor = WireCursor::new(bytes);
        let is_area = cursor.read_u8()? != 0;
        let tag_count = cursor.read_u8()?;
        let mut tags = Vec::with_capacity(usize::from(tag_count));
        for _ in 0..tag_count {
            let key_index =
                u32::try_from(cursor.read_varint64()?).map_err(|_| unknown_index(&cursor))?;
            let key = dictionary
                .key(key_index)
                .ok_or_else(|| unknown_index(&cursor))?
                .to_owned();
            let value = match cursor.read_varint64()? {
                0 => read_cstr(&mut cursor)?,
                raw => {
                    let index = u32::try_from(raw).map_err(|_| unknown_index(&cursor))?;
                    dictionary
                        .value(key_index, index)
                        .ok_or_else(|| unknown_index(&cursor))?
                        .to_owned()
                }
            };
            tags.push(Tag { key, value });
        }
        let info = decode_info(&mut cursor)?;

        let mut coords = Vec::new();
        if !cursor.is_empty() {
            let first_lon = cursor.read_fixed32()?.cast_signed();
            let first_lat = cursor.read_fixed32()?.cast_signed();
            let mut prev = CoordinatePair::new(first_lon, first_lat);
            coords.push(prev);
            while !cursor.is_empty() {
                let dlon = cursor.read_svarint64()?;
                let dlat = cursor.read_svarint64()?;
                let lon = narrow(&cursor, i64::from(prev.lon).saturating_add(dlon))?;
                let lat = narrow(&cursor, i64::from(prev.lat).saturating_add(dlat))?;
                prev = CoordinatePair::new(lon, lat);
                coords.push(prev);
            }
        }

        Ok(Self {
            is_area,
            tags,
            info,
            coords,
        })
    }
}

fn encode_info(out: &mut Vec<u8>, attributes: Option<&PrimitiveInfo>) {
    let Some(info) = attributes else {
        out.push(0);
        return;
    };
    let mut flags = 0;
    let mut fields = Vec::new();
    if let Some(Timestamp::Epoch(seconds)) = info.timestamp {
        flags |= INFO_TIMESTAMP;
        write_svarint64(&mut fields, seconds);
    }
    if let Some(changeset) = info.changeset {
        flags |= INFO_CHANGESET;
        write_svarint64(&mut fields, changeset);
    }
    if let Some(version) = info.version {
        flags |= INFO_VERSION;
        write_svarint64(&mut fields, i64::from(version));
    }
    if let Some(uid) = info.uid {
        flags |= INFO_UID;
        write_svarint64(&mut fields, i64::from(uid));
    }
    if let Some(user) = &info.user {
        flags |= INFO_USER;
        write_cstr(&mut fields, user);
    }
    if let Some(Timestamp::Raw(text)) = &info.timestamp {
        flags |= INFO_RAW_TIMESTAMP;
        write_cstr(&mut fields, text);
    }
    out.push(flags);
    out.extend_from_slice(&fields);
}

fn decode_info(cursor: &mut WireCursor<'_>) -> Result<Option<PrimitiveInfo>, WireError> {
    let flags = cursor.read_u8()?;
    if flags == 0 {
        return Ok(None);
    }
    let mut info = PrimitiveInfo::default();
    if flags & INFO_TIMESTAMP != 0 {
        info.timestamp = Some(Timestamp::Epoch(cursor.read_svarint64()?));
    }
    if flags & INFO_CHANGESET != 0 {
        info.changeset = Some(cursor.read_svarint64()?);
    }
    if flags & INFO_VERSION != 0 {
        let version = cursor.read_svarint64()?;
        info.version = Some(narrow(cursor, version)?);
    }
    if flags & INFO_UID != 0 {
        let uid = cursor.read_svarint64()?;
        info.uid = Some(narrow(cursor, uid)?);
    }
    if flags & INFO_USER != 0 {
        info.user = Some(read_cstr(cursor)?);
    }
    if flags & INFO_RAW_TIMESTAMP != 0 {
        info.timestamp = Some(Timestamp::Raw(read_cstr(cursor)?));
    }
    Ok(Some(info))
}
