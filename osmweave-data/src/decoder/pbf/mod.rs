//! Binary `.osm.pbf` decoder.
//!
//! The file is a sequence of frames: a big-endian header length, a
//! `BlobHeader` and a `Blob` holding either the file header or one
//! `PrimitiveBlock`. Each frame is one decode unit.

use std::{
    io::{self, BufReader, Read, Seek, SeekFrom},
    ops::ControlFlow,
};

use flate2::read::ZlibDecoder;
use log::debug;
use osmweave_core::{Bounds, WireCursor, WireError, wire::WireType};

use super::{BlockDecoder, DecodeError, InputFormat, PrimitiveSink, UnitOutcome};

mod block;

/// Largest accepted `BlobHeader`.
pub const MAX_BLOB_HEADER_SIZE: usize = 64 * 1024;
/// Largest accepted blob, compressed or not.
pub const MAX_BLOB_SIZE: usize = 64 * 1024 * 1024;

const SUPPORTED_FEATURES: [&str; 2] = ["OsmSchema-V0.6", "DenseNodes"];

/// Metadata announced by the `OSMHeader` blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PbfHeader {
    /// Declared extent, if any.
    pub bbox: Option<Bounds>,
    /// Features a reader must understand.
    pub required_features: Vec<String>,
    /// Features a reader may exploit.
    pub optional_features: Vec<String>,
    /// Program that wrote the file.
    pub writing_program: Option<String>,
    /// Data source description.
    pub source: Option<String>,
    /// Replication timestamp in epoch seconds.
    pub replication_timestamp: Option<i64>,
    /// Replication sequence number.
    pub replication_sequence: Option<i64>,
    /// Replication base URL.
    pub replication_base_url: Option<String>,
}

enum BlobKind {
    Header,
    Data,
    Other(String),
}

/// Streaming decoder over a PBF source.
#[derive(Debug)]
pub struct PbfDecoder<R> {
    reader: BufReader<R>,
    consumed: u64,
    header: Option<PbfHeader>,
    frame: Vec<u8>,
    payload: Vec<u8>,
}

impl<R: Read + Seek> PbfDecoder<R> {
    /// Wrap a seekable source positioned at the start of the file.
    #[must_use]
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
            consumed: 0,
            header: None,
            frame: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Header metadata, once the `OSMHeader` blob has been decoded.
    #[must_use]
    pub const fn header(&self) -> Option<&PbfHeader> {
        self.header.as_ref()
    }

    /// Read exactly `len` bytes into `frame`. Returns `false` on a clean end
    /// of input, when nothing at all could be read.
    fn read_exact_or_eof(&mut self, len: usize) -> Result<bool, DecodeError> {
        self.frame.clear();
        let read = (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut self.frame)
            .map_err(|source| DecodeError::Io { source })?;
        self.consumed += read as u64;
        if read == len {
            Ok(true)
        } else if read == 0 {
            Ok(false)
        } else {
            Err(DecodeError::TruncatedInput {
                offset: self.consumed,
            })
        }
    }

    fn read_blob_header(&self, offset: u64) -> Result<(BlobKind, usize), DecodeError> {
        let mut cursor = WireCursor::new(&self.frame);
        let mut blob_type = None;
        let mut declared_size = None;
        while !cursor.is_empty() {
            let key = cursor.read_key().map_err(|err| DecodeError::from_wire(offset, err))?;
            match (key.number, key.wire_type) {
                (1, WireType::LengthDelimited) => {
                    let raw = cursor
                        .read_length_delimited()
                        .map_err(|err| DecodeError::from_wire(offset, err))?;
                    blob_type = Some(match raw {
                        b"OSMHeader" => BlobKind::Header,
                        b"OSMData" => BlobKind::Data,
                        other => BlobKind::Other(String::from_utf8_lossy(other).into_owned()),
                    });
                }
                (3, WireType::Varint) => {
                    let size = cursor
                        .read_varint32()
                        .map_err(|err| DecodeError::from_wire(offset, err))?;
                    declared_size = Some(size);
                }
                _ => cursor
                    .skip_field(key)
                    .map_err(|err| DecodeError::from_wire(offset, err))?,
            }
        }
        let kind =
            blob_type.ok_or_else(|| DecodeError::corrupt(offset, "blob header without type"))?;
        let datasize = declared_size
            .ok_or_else(|| DecodeError::corrupt(offset, "blob header without data size"))
            .and_then(|size| to_len(size, offset))?;
        if datasize > MAX_BLOB_SIZE {
            return Err(DecodeError::corrupt(offset, "blob exceeds 64 MiB"));
        }
        Ok((kind, datasize))
    }

    /// Unpack the blob in `frame` into `payload`.
    fn unpack_blob(&mut self, offset: u64) -> Result<(), DecodeError> {
        let mut cursor = WireCursor::new(&self.frame);
        let mut raw = None;
        let mut zlib = None;
        let mut raw_size = None;
        while !cursor.is_empty() {
            let key = cursor.read_key().map_err(|err| DecodeError::from_wire(offset, err))?;
            match (key.number, key.wire_type) {
                (1, WireType::LengthDelimited) => {
                    raw = Some(
                        cursor
                            .read_length_delimited()
                            .map_err(|err| DecodeError::from_wire(offset, err))?,
                    );
                }
                (2, WireType::Varint) => {
                    let size = cursor
                        .read_varint32()
                        .map_err(|err| DecodeError::from_wire(offset, err))?;
                    raw_size = Some(to_len(size, offset)?);
                }
                (3, WireType::LengthDelimited) => {
                    zlib = Some(
                        cursor
                            .read_length_delimited()
                            .map_err(|err| DecodeError::from_wire(offset, err))?,
                    );
                }
                (4..=7, WireType::LengthDelimited) => {
                    return Err(DecodeError::UnsupportedFeature {
                        feature: format!("blob compression field {}", key.number),
                    });
                }
                _ => cursor
                    .skip_field(key)
                    .map_err(|err| DecodeError::from_wire(offset, err))?,
            }
        }

        self.payload.clear();
        if let Some(bytes) = raw {
            self.payload.extend_from_slice(bytes);
            return Ok(());
        }
        let Some(compressed) = zlib else {
            return Err(DecodeError::corrupt(offset, "blob without payload"));
        };
        let expected = raw_size.unwrap_or(0);
        if expected > MAX_BLOB_SIZE {
            return Err(DecodeError::corrupt(offset, "inflated blob exceeds 64 MiB"));
        }
        if expected > compressed.len().saturating_mul(100) {
            return Err(DecodeError::corrupt(
                offset,
                "declared raw size is implausibly large for the compressed payload",
            ));
        }
        ZlibDecoder::new(compressed)
            .take(expected as u64 + 1)
            .read_to_end(&mut self.payload)
            .map_err(|source| DecodeError::Inflate { offset, source })?;
        if self.payload.len() != expected {
            return Err(DecodeError::corrupt(
                offset,
                format!(
                    "inflated {} bytes but the blob declared {expected}",
                    self.payload.len()
                ),
            ));
        }
        Ok(())
    }
}

fn to_len(size: u32, offset: u64) -> Result<usize, DecodeError> {
    usize::try_from(size).map_err(|_| DecodeError::corrupt(offset, "size exceeds address space"))
}

/// Decode the big-endian frame length prefix.
#[expect(clippy::big_endian_bytes, reason = "frame lengths are big-endian")]
fn frame_length(prefix: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = prefix.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn read_text(cursor: &mut WireCursor<'_>) -> Result<String, WireError> {
    cursor
        .read_length_delimited()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn read_header_bbox(mut cursor: WireCursor<'_>) -> Result<Bounds, WireError> {
    let (mut left, mut right, mut top, mut bottom) = (0, 0, 0, 0);
    while !cursor.is_empty() {
        let key = cursor.read_key()?;
        match (key.number, key.wire_type) {
            (1, WireType::Varint) => left = cursor.read_svarint64()?,
            (2, WireType::Varint) => right = cursor.read_svarint64()?,
            (3, WireType::Varint) => top = cursor.read_svarint64()?,
            (4, WireType::Varint) => bottom = cursor.read_svarint64()?,
            _ => cursor.skip_field(key)?,
        }
    }
    #[expect(
        clippy::float_arithmetic,
        clippy::cast_precision_loss,
        reason = "nanodegrees convert to decimal degrees"
    )]
    let degrees = |nano: i64| nano as f64 / 1e9;
    Ok(Bounds {
        min_lon: degrees(left),
        min_lat: degrees(bottom),
        max_lon: degrees(right),
        max_lat: degrees(top),
    })
}

fn read_header_block(data: &[u8], offset: u64) -> Result<PbfHeader, DecodeError> {
    let wire = |err: WireError| DecodeError::from_wire(offset, err);
    let mut cursor = WireCursor::new(data);
    let mut header = PbfHeader::default();
    while !cursor.is_empty() {
        let key = cursor.read_key().map_err(wire)?;
        match (key.number, key.wire_type) {
            (1, WireType::LengthDelimited) => {
                let bbox = cursor.read_message().map_err(wire)?;
                header.bbox = Some(read_header_bbox(bbox).map_err(wire)?);
            }
            (4, WireType::LengthDelimited) => {
                let feature = read_text(&mut cursor).map_err(wire)?;
                if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
                    return Err(DecodeError::UnsupportedFeature { feature });
                }
                header.required_features.push(feature);
            }
            (5, WireType::LengthDelimited) => {
                header
                    .optional_features
                    .push(read_text(&mut cursor).map_err(wire)?);
            }
            (16, WireType::LengthDelimited) => {
                header.writing_program = Some(read_text(&mut cursor).map_err(wire)?);
            }
            (17, WireType::LengthDelimited) => {
                header.source = Some(read_text(&mut cursor).map_err(wire)?);
            }
            (32, WireType::Varint) => {
                header.replication_timestamp = Some(cursor.read_int64().map_err(wire)?);
            }
            (33, WireType::Varint) => {
                header.replication_sequence = Some(cursor.read_int64().map_err(wire)?);
            }
            (34, WireType::LengthDelimited) => {
                header.replication_base_url = Some(read_text(&mut cursor).map_err(wire)?);
            }
            _ => cursor.skip_field(key).map_err(wire)?,
        }
    }
    Ok(header)
}

impl<R: Read + Seek> BlockDecoder for PbfDecoder<R> {
    fn process_unit(&mut self, sink: &mut dyn PrimitiveSink) -> Result<UnitOutcome, DecodeError> {
        let frame_start = self.consumed;
        if !self.read_exact_or_eof(4)? {
            return Ok(UnitOutcome::Finished);
        }
        let header_len = frame_length(&self.frame)
            .ok_or_else(|| DecodeError::corrupt(frame_start, "short frame length"))
            .and_then(|len| to_len(len, frame_start))?;
        if header_len > MAX_BLOB_HEADER_SIZE {
            return Err(DecodeError::corrupt(frame_start, "blob header exceeds 64 KiB"));
        }
        let header_offset = self.consumed;
        if !self.read_exact_or_eof(header_len)? {
            return Err(DecodeError::TruncatedInput {
                offset: header_offset,
            });
        }
        let (kind, datasize) = self.read_blob_header(header_offset)?;
        let blob_offset = self.consumed;
        if !self.read_exact_or_eof(datasize)? {
            return Err(DecodeError::TruncatedInput {
                offset: blob_offset,
            });
        }

        let flow = match kind {
            BlobKind::Other(name) => {
                debug!("skipping blob of unknown type {name:?} at byte {frame_start}");
                return Ok(UnitOutcome::Decoded);
            }
            BlobKind::Header => {
                self.unpack_blob(blob_offset)?;
                let header = read_header_block(&self.payload, blob_offset)?;
                let flow = header
                    .bbox
                    .map_or(ControlFlow::Continue(()), |bounds| sink.notify_bounds(bounds));
                self.header = Some(header);
                flow
            }
            BlobKind::Data => {
                self.unpack_blob(blob_offset)?;
                block::decode_primitive_block(&self.payload, sink)
                    .map_err(|err| DecodeError::from_wire(blob_offset, err))?
            }
        };
        Ok(if flow.is_break() {
            UnitOutcome::Interrupted
        } else {
            UnitOutcome::Decoded
        })
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|source| DecodeError::Io { source })?;
        self.consumed = 0;
        self.header = None;
        Ok(())
    }

    fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    fn format(&self) -> InputFormat {
        InputFormat::Pbf
    }
}

/// Convenience for callers holding a byte buffer.
impl PbfDecoder<io::Cursor<Vec<u8>>> {
    /// Decode an in-memory file.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_sink::drain;
    use osmweave_core::{
        RawNode, RawWay, Tag,
        test_support::{PbfFileBuilder, PrimitiveBlockBuilder},
    };
    use rstest::rstest;

    fn sample_block() -> PrimitiveBlockBuilder {
        let mut block = PrimitiveBlockBuilder::new();
        block
            .dense_nodes(&[
                RawNode {
                    id: 1,
                    lon: 0.5,
                    lat: 0.5,
                    tags: vec![],
                    info: None,
                },
                RawNode {
                    id: 2,
                    lon: 1.5,
                    lat: 0.5,
                    tags: vec![Tag::new("highway", "crossing")],
                    info: None,
                },
            ])
            .ways(&[RawWay {
                id: 10,
                refs: vec![1, 2],
                tags: vec![Tag::new("highway", "path")],
                info: None,
            }]);
        block
    }

    fn bounds() -> Bounds {
        Bounds {
            min_lon: -1.0,
            min_lat: -2.0,
            max_lon: 3.0,
            max_lat: 4.0,
        }
    }

    #[rstest]
    #[case::raw(false)]
    #[case::zlib(true)]
    fn decodes_framed_file(#[case] compressed: bool) {
        let bytes = PbfFileBuilder::new()
            .compressed(compressed)
            .header(Some(bounds()), &["OsmSchema-V0.6", "DenseNodes"])
            .block(&sample_block())
            .build();
        let total = bytes.len() as u64;
        let mut decoder = PbfDecoder::from_bytes(bytes);
        let sink = drain(&mut decoder).expect("decode file");
        assert_eq!(sink.bounds, vec![bounds()]);
        assert_eq!(sink.nodes.len(), 2);
        assert_eq!(sink.ways.len(), 1);
        assert_eq!(decoder.bytes_consumed(), total);
        let header = decoder.header().expect("header decoded");
        assert_eq!(header.writing_program.as_deref(), Some("osmweave-tests"));
    }

    #[rstest]
    fn rewind_replays_input() {
        let bytes = PbfFileBuilder::new()
            .header(None, &["OsmSchema-V0.6"])
            .block(&sample_block())
            .build();
        let mut decoder = PbfDecoder::from_bytes(bytes);
        let first = drain(&mut decoder).expect("first pass");
        decoder.rewind().expect("rewind");
        assert_eq!(decoder.bytes_consumed(), 0);
        let second = drain(&mut decoder).expect("second pass");
        assert_eq!(first.nodes, second.nodes);
        assert_eq!(first.ways, second.ways);
    }

    #[rstest]
    fn unsupported_required_feature_is_fatal() {
        let bytes = PbfFileBuilder::new()
            .header(None, &["OsmSchema-V0.6", "HistoricalInformation"])
            .build();
        let err = drain(&mut PbfDecoder::from_bytes(bytes)).expect_err("unsupported feature");
        assert!(
            matches!(err, DecodeError::UnsupportedFeature { ref feature } if feature == "HistoricalInformation")
        );
    }

    #[rstest]
    fn unknown_blob_types_are_skipped() {
        let bytes = PbfFileBuilder::new()
            .blob("OSMIndex", b"whatever")
            .block(&sample_block())
            .build();
        let sink = drain(&mut PbfDecoder::from_bytes(bytes)).expect("decode file");
        assert_eq!(sink.ways.len(), 1);
    }

    #[rstest]
    fn oversized_blob_header_is_rejected() {
        let bytes = PbfFileBuilder::new().raw(&[0x00, 0x01, 0x00, 0x01]).build();
        let err = drain(&mut PbfDecoder::from_bytes(bytes)).expect_err("oversized header");
        assert!(matches!(err, DecodeError::CorruptInput { offset: 0, .. }));
    }

    #[rstest]
    fn truncated_frame_is_reported() {
        let mut bytes = PbfFileBuilder::new().block(&sample_block()).build();
        bytes.truncate(bytes.len() - 3);
        let err = drain(&mut PbfDecoder::from_bytes(bytes)).expect_err("truncated");
        assert!(matches!(err, DecodeError::TruncatedInput { .. }));
    }
}
