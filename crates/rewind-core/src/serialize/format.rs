//! Stream headers and backend selection

use super::binary::{BinaryReader, BinaryWriter};
use super::stream::{BufferedSink, BufferedSource, ByteSink, ByteSource};
use super::text::{TextReader, TextWriter};
use super::{Reader, Writer};
use crate::error::{TtdError, TtdResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Magic number for binary streams: "RWND\0\0\0\0"
pub const STREAM_MAGIC: u64 = 0x0000_0000_444E_5752;

/// Current binary format version
pub const STREAM_VERSION: u32 = 1;

/// Endianness marker written by the producing machine
pub const ENDIANNESS_MARKER: u32 = 0x0102_0304;

/// Byte-order mark opening every text stream
pub const TEXT_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Size of the trailing SHA-256 digest in binary streams
pub const DIGEST_LEN: usize = 32;

/// Binary stream header (20 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Magic number (must be [`STREAM_MAGIC`])
    pub magic: u64,

    /// Format version
    pub version: u32,

    /// Reserved flag bits
    pub flags: u32,

    /// Endianness marker (must be [`ENDIANNESS_MARKER`])
    pub endianness: u32,
}

impl StreamHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = 20;

    /// Header for a new stream
    pub fn new() -> Self {
        Self {
            magic: STREAM_MAGIC,
            version: STREAM_VERSION,
            flags: 0,
            endianness: ENDIANNESS_MARKER,
        }
    }

    /// Check magic, version and byte order
    pub fn validate(&self) -> TtdResult<()> {
        if self.magic != STREAM_MAGIC {
            return Err(TtdError::InvalidHeader);
        }
        if self.version != STREAM_VERSION {
            return Err(TtdError::IncompatibleVersion {
                expected: STREAM_VERSION,
                actual: self.version,
            });
        }
        if self.endianness != ENDIANNESS_MARKER {
            return Err(TtdError::EndiannessMismatch);
        }
        Ok(())
    }

    /// Little-endian encoding
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..20].copy_from_slice(&self.endianness.to_le_bytes());
        out
    }

    /// Decode from the first [`StreamHeader::SIZE`] bytes
    pub fn decode(bytes: &[u8]) -> TtdResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(TtdError::InvalidHeader);
        }
        let u32_at = |at: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(b)
        };
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        Ok(Self {
            magic: u64::from_le_bytes(magic),
            version: u32_at(8),
            flags: u32_at(12),
            endianness: u32_at(16),
        })
    }
}

impl Default for StreamHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Running SHA-256 over the token bytes of a binary stream
#[derive(Clone, Default)]
pub struct StreamDigest {
    hasher: Sha256,
}

impl StreamDigest {
    /// Start a new digest
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Final 32-byte digest
    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&self.hasher.finalize());
        out
    }
}

/// On-disk encoding of logs and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Verbose, human-diffable
    #[default]
    Text,
    /// Compact
    Binary,
}

impl Format {
    /// Identify the encoding from a stream's first bytes
    pub fn detect(prefix: &[u8]) -> Option<Format> {
        if prefix.starts_with(&TEXT_BOM) {
            Some(Format::Text)
        } else if prefix.len() >= 8 && prefix[0..8] == STREAM_MAGIC.to_le_bytes() {
            Some(Format::Binary)
        } else {
            None
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Text => write!(f, "text"),
            Format::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for Format {
    type Err = TtdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Format::Text),
            "binary" => Ok(Format::Binary),
            other => Err(TtdError::Config(format!("unknown format '{}'", other))),
        }
    }
}

/// Writer for `format` over `sink`
pub fn open_writer(
    format: Format,
    sink: Box<dyn ByteSink>,
    buffer_size: usize,
) -> TtdResult<Box<dyn Writer>> {
    let sink = BufferedSink::new(sink, buffer_size);
    Ok(match format {
        Format::Text => Box::new(TextWriter::new(sink)?),
        Format::Binary => Box::new(BinaryWriter::new(sink)?),
    })
}

/// Reader for `format` over `source`
pub fn open_reader(
    format: Format,
    source: Box<dyn ByteSource>,
    buffer_size: usize,
) -> TtdResult<Box<dyn Reader>> {
    let source = BufferedSource::new(source, buffer_size);
    Ok(match format {
        Format::Text => Box::new(TextReader::new(source)?),
        Format::Binary => Box::new(BinaryReader::new(source)?),
    })
}

/// Reader for whichever encoding `source` starts with
pub fn open_reader_detect(
    source: Box<dyn ByteSource>,
    buffer_size: usize,
) -> TtdResult<(Format, Box<dyn Reader>)> {
    let mut source = BufferedSource::new(source, buffer_size);
    let format = match source.peek_byte()? {
        Some(b) if b == TEXT_BOM[0] => Format::Text,
        Some(b) if b == STREAM_MAGIC.to_le_bytes()[0] => Format::Binary,
        _ => return Err(TtdError::InvalidHeader),
    };
    let reader: Box<dyn Reader> = match format {
        Format::Text => Box::new(TextReader::new(source)?),
        Format::Binary => Box::new(BinaryReader::new(source)?),
    };
    Ok((format, reader))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = StreamHeader::new();
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], b"RWND");
        let decoded = StreamHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.validate().is_ok());
    }

    #[test]
    fn test_header_validation() {
        let mut header = StreamHeader::new();
        header.magic = 0xDEAD;
        assert!(matches!(header.validate(), Err(TtdError::InvalidHeader)));

        let mut header = StreamHeader::new();
        header.version = 99;
        assert!(matches!(
            header.validate(),
            Err(TtdError::IncompatibleVersion {
                expected: 1,
                actual: 99
            })
        ));

        let mut header = StreamHeader::new();
        header.endianness = 0x0403_0201;
        assert!(matches!(
            header.validate(),
            Err(TtdError::EndiannessMismatch)
        ));
    }

    #[test]
    fn test_format_detect() {
        assert_eq!(Format::detect(&[0xEF, 0xBB, 0xBF, b'{']), Some(Format::Text));
        assert_eq!(
            Format::detect(&StreamHeader::new().encode()),
            Some(Format::Binary)
        );
        assert_eq!(Format::detect(b"junk"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("binary".parse::<Format>().unwrap(), Format::Binary);
        assert_eq!(Format::Text.to_string(), "text");
        assert!("xml".parse::<Format>().is_err());
    }

    #[test]
    fn test_digest_is_stable() {
        let mut a = StreamDigest::new();
        a.update(b"abc");
        let mut b = StreamDigest::new();
        b.update(b"a");
        b.update(b"bc");
        assert_eq!(a.finalize(), b.finalize());
    }
}
