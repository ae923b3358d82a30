//! Input format detection.

use std::io::{Read, Seek, SeekFrom};

use camino::Utf8Path;
use log::debug;

use super::{BlockDecoder, DecodeError, PbfDecoder, XmlDecoder};

/// Bytes inspected when detecting the format.
pub const SNIFF_BYTES: usize = 1023;

/// Supported input encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Binary protobuf blocks.
    Pbf,
    /// OSM XML text.
    Xml,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Detect the format from the leading bytes of a file.
///
/// # Examples
/// ```
/// use osmweave_data::decoder::{InputFormat, sniff_format};
///
/// assert_eq!(sniff_format(b"<?xml version='1.0'?><osm>"), Some(InputFormat::Xml));
/// assert_eq!(sniff_format(b"{}"), None);
/// ```
#[must_use]
pub fn sniff_format(head: &[u8]) -> Option<InputFormat> {
    let window = head.get(..SNIFF_BYTES).unwrap_or(head);
    if contains(window, b"<osm") {
        Some(InputFormat::Xml)
    } else if contains(window, b"OSMHeader") {
        Some(InputFormat::Pbf)
    } else {
        None
    }
}

/// Sniff `source` and wrap it in the matching decoder.
///
/// # Errors
/// Returns [`DecodeError::Io`] when reading or seeking fails and
/// [`DecodeError::CorruptInput`] when the format is not recognised.
pub fn decoder_for<R>(mut source: R) -> Result<Box<dyn BlockDecoder>, DecodeError>
where
    R: Read + Seek + 'static,
{
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    (&mut source)
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut head)
        .map_err(|source| DecodeError::Io { source })?;
    source
        .seek(SeekFrom::Start(0))
        .map_err(|source| DecodeError::Io { source })?;
    match sniff_format(&head) {
        Some(InputFormat::Pbf) => Ok(Box::new(PbfDecoder::new(source))),
        Some(InputFormat::Xml) => Ok(Box::new(XmlDecoder::new(source))),
        None => Err(DecodeError::corrupt(0, "input is neither OSM XML nor OSM PBF")),
    }
}

/// Open `path` and build the decoder matching its content.
///
/// # Errors
/// See [`decoder_for`]; failing to open the file is [`DecodeError::Io`].
pub fn open_decoder(path: &Utf8Path) -> Result<Box<dyn BlockDecoder>, DecodeError> {
    let file = osmweave_fs::open_input(path).map_err(|source| DecodeError::Io { source })?;
    let decoder = decoder_for(file)?;
    debug!("opened {path} as {:?}", decoder.format());
    Ok(decoder)
}
