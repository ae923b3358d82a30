//! Protocol buffer wire primitives.
//!
//! [`WireCursor`] walks a borrowed byte slice and decodes varints, zig-zag
//! integers and length-delimited fields. Every read is bounds-checked against
//! the slice the cursor was built from, so nested messages are decoded by
//! carving a sub-cursor out of the parent rather than trusting a raw length.
//!
//! The module also exposes the matching writers used by the compact
//! encodings elsewhere in the workspace (sector compression and encoded
//! ways).

use thiserror::Error;

/// Longest legal varint encoding of a 64-bit value.
const MAX_VARINT_BYTES: usize = 10;

/// Errors raised while decoding wire-format data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    /// A read would run past the end of the available bytes.
    #[error("input truncated at offset {offset}: {needed} more bytes required")]
    TruncatedInput {
        /// Cursor position when the read was attempted.
        offset: usize,
        /// Number of bytes that were missing.
        needed: usize,
    },
    /// The bytes are structurally invalid.
    #[error("corrupt input at offset {offset}: {reason}")]
    CorruptInput {
        /// Cursor position where the violation was detected.
        offset: usize,
        /// Short description of the violation.
        reason: &'static str,
    },
}

/// Protocol buffer wire types understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    /// Base-128 varint.
    Varint,
    /// Eight little-endian bytes.
    Fixed64,
    /// Varint length followed by that many bytes.
    LengthDelimited,
    /// Four little-endian bytes.
    Fixed32,
}

impl WireType {
    const fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::LengthDelimited),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }
}

/// A decoded field key: field number plus wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKey {
    /// Field number declared in the message schema.
    pub number: u32,
    /// Encoding of the value that follows.
    pub wire_type: WireType,
}

/// Bounds-checked reader over a protobuf-encoded byte slice.
///
/// # Examples
/// ```
/// use osmweave_core::wire::WireCursor;
///
/// // field 1, varint 150
/// let bytes = [0x08, 0x96, 0x01];
/// let mut cursor = WireCursor::new(&bytes);
/// let key = cursor.read_key()?;
/// assert_eq!(key.number, 1);
/// assert_eq!(cursor.read_varint64()?, 150);
/// assert!(cursor.is_empty());
/// # Ok::<(), osmweave_core::wire::WireError>(())
/// ```
#[derive(Debug, Clone)]
pub struct WireCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireCursor<'a> {
    /// Create a cursor positioned at the start of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Offset of the next byte to be read.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    const fn truncated(&self, needed: usize) -> WireError {
        WireError::TruncatedInput {
            offset: self.pos,
            needed,
        }
    }

    const fn corrupt(&self, reason: &'static str) -> WireError {
        WireError::CorruptInput {
            offset: self.pos,
            reason,
        }
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.truncated(1))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(self.truncated(len - remaining));
        }
        let start = self.pos;
        self.pos += len;
        self.data
            .get(start..self.pos)
            .ok_or_else(|| self.corrupt("slice bounds out of range"))
    }

    /// Read an unsigned varint of up to 64 bits.
    pub fn read_varint64(&mut self) -> Result<u64, WireError> {
        let mut value = 0_u64;
        for index in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            let payload = u64::from(byte & 0x7f);
            if index == MAX_VARINT_BYTES - 1 && byte > 1 {
                return Err(self.corrupt("varint overflows 64 bits"));
            }
            value |= payload << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.corrupt("varint longer than 10 bytes"))
    }

    /// Read an unsigned varint and keep its low 32 bits.
    ///
    /// Negative `int32` values are sign-extended to ten bytes on the wire, so
    /// the truncation mirrors how protobuf itself narrows them.
    pub fn read_varint32(&mut self) -> Result<u32, WireError> {
        let wide = self.read_varint64()?;
        u32::try_from(wide & u64::from(u32::MAX)).map_err(|_| self.corrupt("varint32 mask failed"))
    }

    /// Read a zig-zag encoded signed 64-bit varint.
    pub fn read_svarint64(&mut self) -> Result<i64, WireError> {
        self.read_varint64().map(zigzag_decode64)
    }

    /// Read a zig-zag encoded signed 32-bit varint.
    pub fn read_svarint32(&mut self) -> Result<i32, WireError> {
        self.read_varint32().map(zigzag_decode32)
    }

    /// Read a varint and reinterpret it as a two's complement `int64`.
    #[expect(clippy::cast_possible_wrap, reason = "protobuf int64 is two's complement")]
    pub fn read_int64(&mut self) -> Result<i64, WireError> {
        self.read_varint64().map(|raw| raw as i64)
    }

    /// Read a varint and reinterpret it as a two's complement `int32`.
    #[expect(clippy::cast_possible_wrap, reason = "protobuf int32 is two's complement")]
    pub fn read_int32(&mut self) -> Result<i32, WireError> {
        self.read_varint32().map(|raw| raw as i32)
    }

    /// Read four little-endian bytes.
    #[expect(clippy::little_endian_bytes, reason = "fixed32 is little-endian on the wire")]
    pub fn read_fixed32(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_bytes(4)?;
        let array: [u8; 4] = bytes
            .try_into()
            .map_err(|_| self.corrupt("fixed32 width mismatch"))?;
        Ok(u32::from_le_bytes(array))
    }

    /// Read eight little-endian bytes.
    #[expect(clippy::little_endian_bytes, reason = "fixed64 is little-endian on the wire")]
    pub fn read_fixed64(&mut self) -> Result<u64, WireError> {
        let bytes = self.read_bytes(8)?;
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| self.corrupt("fixed64 width mismatch"))?;
        Ok(u64::from_le_bytes(array))
    }

    /// Read a field key.
    pub fn read_key(&mut self) -> Result<FieldKey, WireError> {
        let raw = self.read_varint64()?;
        let wire_type =
            WireType::from_bits(raw & 0x7).ok_or_else(|| self.corrupt("unsupported wire type"))?;
        let number = u32::try_from(raw >> 3).map_err(|_| self.corrupt("field number too large"))?;
        if number == 0 {
            return Err(self.corrupt("field number zero"));
        }
        Ok(FieldKey { number, wire_type })
    }

    /// Read a length-delimited payload.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], WireError> {
        let declared = self.read_varint64()?;
        let len =
            usize::try_from(declared).map_err(|_| self.corrupt("length exceeds address space"))?;
        self.read_bytes(len)
    }

    /// Read a length-delimited payload as a nested message cursor.
    pub fn read_message(&mut self) -> Result<Self, WireError> {
        self.read_length_delimited().map(Self::new)
    }

    /// Skip the value that follows `key`.
    pub fn skip_field(&mut self, key: FieldKey) -> Result<(), WireError> {
        match key.wire_type {
            WireType::Varint => self.read_varint64().map(drop),
            WireType::Fixed64 => self.read_bytes(8).map(drop),
            WireType::LengthDelimited => self.read_length_delimited().map(drop),
            WireType::Fixed32 => self.read_bytes(4).map(drop),
        }
    }

    /// Decode a repeated unsigned field that may be packed or unpacked.
    ///
    /// Packed payloads are appended in full; an unpacked occurrence
    /// contributes a single value.
    pub fn read_repeated_varint(
        &mut self,
        key: FieldKey,
        out: &mut Vec<u64>,
    ) -> Result<(), WireError> {
        match key.wire_type {
            WireType::LengthDelimited => {
                let mut packed = self.read_message()?;
                while !packed.is_empty() {
                    out.push(packed.read_varint64()?);
                }
                Ok(())
            }
            WireType::Varint => {
                out.push(self.read_varint64()?);
                Ok(())
            }
            WireType::Fixed32 | WireType::Fixed64 => {
                Err(self.corrupt("repeated varint field has fixed-width encoding"))
            }
        }
    }

    /// Decode a repeated zig-zag field, optionally accumulating deltas.
    ///
    /// With `delta` set each decoded value is added to the previous result
    /// using wrapping arithmetic, matching the delta coding of ids and
    /// coordinates in OSM blocks.
    pub fn read_repeated_svarint(
        &mut self,
        key: FieldKey,
        delta: bool,
        out: &mut Vec<i64>,
    ) -> Result<(), WireError> {
        let mut running = if delta { out.last().copied().unwrap_or(0) } else { 0 };
        let mut push = |value: i64| {
            if delta {
                running = running.wrapping_add(value);
                out.push(running);
            } else {
                out.push(value);
            }
        };
        match key.wire_type {
            WireType::LengthDelimited => {
                let mut packed = self.read_message()?;
                while !packed.is_empty() {
                    push(packed.read_svarint64()?);
                }
                Ok(())
            }
            WireType::Varint => {
                push(self.read_svarint64()?);
                Ok(())
            }
            WireType::Fixed32 | WireType::Fixed64 => {
                Err(self.corrupt("repeated svarint field has fixed-width encoding"))
            }
        }
    }
}

/// Map a zig-zag encoded value back to a signed integer.
///
/// # Examples
/// ```
/// use osmweave_core::wire::zigzag_decode64;
///
/// assert_eq!(zigzag_decode64(0), 0);
/// assert_eq!(zigzag_decode64(1), -1);
/// assert_eq!(zigzag_decode64(2), 1);
/// assert_eq!(zigzag_decode64(3), -2);
/// ```
#[must_use]
#[expect(clippy::cast_possible_wrap, reason = "zig-zag decoding reinterprets bits")]
pub const fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// 32-bit counterpart of [`zigzag_decode64`].
#[must_use]
#[expect(clippy::cast_possible_wrap, reason = "zig-zag decoding reinterprets bits")]
pub const fn zigzag_decode32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Map a signed integer onto the zig-zag unsigned space.
#[must_use]
#[expect(clippy::cast_sign_loss, reason = "zig-zag encoding reinterprets bits")]
pub const fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Append `value` as a base-128 varint.
#[expect(
    clippy::cast_possible_truncation,
    reason = "each step keeps the low seven bits"
)]
pub fn write_varint64(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append `value` as a zig-zag varint.
pub fn write_svarint64(out: &mut Vec<u8>, value: i64) {
    write_varint64(out, zigzag_encode64(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x00], 0)]
    #[case(&[0x01], 1)]
    #[case(&[0x7f], 127)]
    #[case(&[0x80, 0x01], 128)]
    #[case(&[0xac, 0x02], 300)]
    #[case(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01], u64::MAX)]
    fn decodes_varints(#[case] bytes: &[u8], #[case] expected: u64) {
        let mut cursor = WireCursor::new(bytes);
        assert_eq!(cursor.read_varint64(), Ok(expected));
        assert!(cursor.is_empty());
    }

    #[rstest]
    fn truncated_varint_reports_offset() {
        let mut cursor = WireCursor::new(&[0x80, 0x80]);
        assert_eq!(
            cursor.read_varint64(),
            Err(WireError::TruncatedInput {
                offset: 2,
                needed: 1
            })
        );
    }

    #[rstest]
    fn overlong_varint_is_corrupt() {
        let bytes = [0xff_u8; 11];
        let mut cursor = WireCursor::new(&bytes);
        assert!(matches!(
            cursor.read_varint64(),
            Err(WireError::CorruptInput { .. })
        ));
    }

    #[rstest]
    fn length_delimited_respects_limit() {
        // declared length 5, only 2 bytes present
        let mut cursor = WireCursor::new(&[0x05, 0xaa, 0xbb]);
        assert_eq!(
            cursor.read_length_delimited(),
            Err(WireError::TruncatedInput {
                offset: 1,
                needed: 3
            })
        );
    }

    #[rstest]
    fn skip_field_consumes_each_wire_type() {
        let bytes = [
            0x08, 0x96, 0x01, // 1: varint
            0x11, 0, 0, 0, 0, 0, 0, 0, 0, // 2: fixed64
            0x1a, 0x02, 0xaa, 0xbb, // 3: bytes
            0x25, 0, 0, 0, 0, // 4: fixed32
        ];
        let mut cursor = WireCursor::new(&bytes);
        for expected in 1..=4 {
            let key = cursor.read_key().expect("key");
            assert_eq!(key.number, expected);
            cursor.skip_field(key).expect("skip");
        }
        assert!(cursor.is_empty());
    }

    #[rstest]
    #[case(3)]
    #[case(4)]
    #[case(6)]
    fn group_wire_types_are_rejected(#[case] wire: u8) {
        let bytes = [0x08 | wire];
        let mut cursor = WireCursor::new(&bytes);
        assert!(matches!(
            cursor.read_key(),
            Err(WireError::CorruptInput { .. })
        ));
    }

    #[rstest]
    fn delta_fields_accumulate_with_wrapping() {
        let mut packed = Vec::new();
        for delta in [i64::MAX, 1, -3] {
            write_svarint64(&mut packed, delta);
        }
        let mut bytes = vec![0x42];
        write_varint64(&mut bytes, packed.len() as u64);
        bytes.extend_from_slice(&packed);

        let mut cursor = WireCursor::new(&bytes);
        let key = cursor.read_key().expect("key");
        let mut out = Vec::new();
        cursor
            .read_repeated_svarint(key, true, &mut out)
            .expect("packed deltas");
        assert_eq!(out, vec![i64::MAX, i64::MIN, i64::MIN.wrapping_sub(3)]);
    }

    #[rstest]
    fn unpacked_repeated_values_are_accepted() {
        let mut cursor = WireCursor::new(&[0x10, 0x05, 0x10, 0x07]);
        let mut out = Vec::new();
        while !cursor.is_empty() {
            let key = cursor.read_key().expect("key");
            cursor.read_repeated_varint(key, &mut out).expect("value");
        }
        assert_eq!(out, vec![5, 7]);
    }

    #[rstest]
    fn negative_int32_narrows_from_ten_bytes() {
        let mut bytes = Vec::new();
        write_varint64(&mut bytes, (-2_i64) as u64);
        let mut cursor = WireCursor::new(&bytes);
        assert_eq!(cursor.read_int32(), Ok(-2));
    }

    proptest! {
        #[test]
        fn svarint_survives_writer(value in any::<i64>()) {
            let mut bytes = Vec::new();
            write_svarint64(&mut bytes, value);
            let mut cursor = WireCursor::new(&bytes);
            prop_assert_eq!(cursor.read_svarint64(), Ok(value));
            prop_assert!(cursor.is_empty());
        }

        #[test]
        fn zigzag32_matches_64_bit_mapping(value in any::<i32>()) {
            let encoded = zigzag_encode64(i64::from(value));
            let narrow = u32::try_from(encoded).expect("32-bit zigzag fits");
            prop_assert_eq!(zigzag_decode32(narrow), value);
        }
    }
}
