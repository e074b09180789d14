//! Compact binary backend
//!
//! A [`StreamHeader`] is followed by the token bytes and a trailing SHA-256
//! digest of those bytes. Keys and structure markers are single bytes;
//! scalars are fixed-width little-endian. A comma byte is written only when
//! the separator carries one, so readers must mirror the writer's commas.

use super::format::{StreamDigest, StreamHeader, DIGEST_LEN};
use super::stream::{BufferedSink, BufferedSource};
use super::{Key, Reader, Separator, Writer};
use crate::error::{TtdError, TtdResult};

const RECORD_START: u8 = b'{';
const RECORD_END: u8 = b'}';
const SEQUENCE_START: u8 = b'[';
const SEQUENCE_END: u8 = b']';
const COMMA: u8 = b',';
const NULL: u8 = b'n';
const NULL_STRING_LEN: u32 = u32::MAX;

/// Binary-format [`Writer`]
pub struct BinaryWriter {
    sink: BufferedSink,
    digest: StreamDigest,
    closed: bool,
}

impl BinaryWriter {
    /// Start a binary stream, writing the header
    pub fn new(mut sink: BufferedSink) -> TtdResult<Self> {
        sink.write_bytes(&StreamHeader::new().encode())?;
        Ok(Self {
            sink,
            digest: StreamDigest::new(),
            closed: false,
        })
    }

    fn emit(&mut self, bytes: &[u8]) -> TtdResult<()> {
        self.digest.update(bytes);
        self.sink.write_bytes(bytes)
    }

    fn sep_then(&mut self, sep: Separator, bytes: &[u8]) -> TtdResult<()> {
        self.write_separator(sep)?;
        self.emit(bytes)
    }

    fn emit_str(&mut self, s: &str) -> TtdResult<()> {
        let len = u32::try_from(s.len())
            .ok()
            .filter(|l| *l != NULL_STRING_LEN)
            .ok_or(TtdError::PolicyViolation("string too long for binary stream"))?;
        self.emit(&len.to_le_bytes())?;
        self.emit(s.as_bytes())
    }
}

impl Writer for BinaryWriter {
    fn write_separator(&mut self, sep: Separator) -> TtdResult<()> {
        if sep.has_comma() {
            self.emit(&[COMMA])?;
        }
        Ok(())
    }

    fn write_key(&mut self, key: Key, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[key.to_byte()])
    }

    fn write_sequence_start(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[SEQUENCE_START])
    }

    fn write_sequence_end(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[SEQUENCE_END])
    }

    fn write_record_start(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[RECORD_START])
    }

    fn write_record_end(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[RECORD_END])
    }

    fn write_naked_null(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[NULL])
    }

    fn write_naked_byte(&mut self, value: u8, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[value])
    }

    fn write_naked_bool(&mut self, value: bool, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &[value as u8])
    }

    fn write_naked_int32(&mut self, value: i32, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_le_bytes())
    }

    fn write_naked_uint32(&mut self, value: u32, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_le_bytes())
    }

    fn write_naked_int64(&mut self, value: i64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_le_bytes())
    }

    fn write_naked_uint64(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_le_bytes())
    }

    fn write_naked_double(&mut self, value: f64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_bits().to_le_bytes())
    }

    fn write_naked_addr(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_le_bytes())
    }

    fn write_naked_log_tag(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_le_bytes())
    }

    fn write_naked_tag(&mut self, value: u32, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_le_bytes())
    }

    fn write_naked_opt_string(&mut self, value: Option<&str>, sep: Separator) -> TtdResult<()> {
        self.write_separator(sep)?;
        match value {
            None => self.emit(&NULL_STRING_LEN.to_le_bytes()),
            Some(s) => self.emit_str(s),
        }
    }

    fn write_naked_well_known_token(&mut self, token: &str, sep: Separator) -> TtdResult<()> {
        self.write_separator(sep)?;
        self.emit_str(token)
    }

    fn adjust_indent(&mut self, _delta: i32) {}

    fn set_indent(&mut self, _depth: u32) {}

    fn flush_and_close(&mut self) -> TtdResult<()> {
        if self.closed {
            return Ok(());
        }
        let digest = std::mem::take(&mut self.digest).finalize();
        self.sink.write_bytes(&digest)?;
        self.sink.flush_and_close()?;
        self.closed = true;
        Ok(())
    }
}

/// Binary-format [`Reader`]
pub struct BinaryReader {
    source: BufferedSource,
    digest: StreamDigest,
}

impl BinaryReader {
    /// Open a binary stream, validating the header
    pub fn new(mut source: BufferedSource) -> TtdResult<Self> {
        let mut header = [0u8; StreamHeader::SIZE];
        source
            .read_exact(&mut header)
            .map_err(|_| TtdError::InvalidHeader)?;
        StreamHeader::decode(&header)?.validate()?;
        Ok(Self {
            source,
            digest: StreamDigest::new(),
        })
    }

    fn take<const N: usize>(&mut self) -> TtdResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.source.read_exact(&mut buf)?;
        self.digest.update(&buf);
        Ok(buf)
    }

    fn expect(&mut self, expected: u8, what: &'static str) -> TtdResult<()> {
        let [found] = self.take::<1>()?;
        if found != expected {
            return Err(TtdError::TokenMismatch {
                expected: what,
                found: format!("0x{:02x}", found),
            });
        }
        Ok(())
    }

    fn take_str(&mut self, len: u32) -> TtdResult<String> {
        let bytes = self.source.read_declared(u64::from(len))?;
        self.digest.update(&bytes);
        String::from_utf8(bytes).map_err(|e| TtdError::TokenMismatch {
            expected: "UTF-8 string",
            found: e.to_string(),
        })
    }
}

impl Reader for BinaryReader {
    fn read_separator(&mut self, read_sep: bool) -> TtdResult<()> {
        if read_sep {
            self.expect(COMMA, "','")?;
        }
        Ok(())
    }

    fn read_key(&mut self, key: Key, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        let [found] = self.take::<1>()?;
        if found != key.to_byte() {
            return Err(TtdError::KeyMismatch {
                expected: key.name(),
                found: Key::from_byte(found)
                    .map(|k| k.name().to_string())
                    .unwrap_or_else(|| format!("0x{:02x}", found)),
            });
        }
        Ok(())
    }

    fn read_sequence_start(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        self.expect(SEQUENCE_START, "'['")
    }

    fn read_sequence_end(&mut self) -> TtdResult<()> {
        self.expect(SEQUENCE_END, "']'")
    }

    fn read_record_start(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        self.expect(RECORD_START, "'{'")
    }

    fn read_record_end(&mut self) -> TtdResult<()> {
        self.expect(RECORD_END, "'}'")
    }

    fn read_naked_null(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        self.expect(NULL, "null")
    }

    fn read_naked_byte(&mut self, read_sep: bool) -> TtdResult<u8> {
        self.read_separator(read_sep)?;
        Ok(self.take::<1>()?[0])
    }

    fn read_naked_bool(&mut self, read_sep: bool) -> TtdResult<bool> {
        self.read_separator(read_sep)?;
        match self.take::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TtdError::TokenMismatch {
                expected: "bool",
                found: format!("0x{:02x}", other),
            }),
        }
    }

    fn read_naked_int32(&mut self, read_sep: bool) -> TtdResult<i32> {
        self.read_separator(read_sep)?;
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn read_naked_uint32(&mut self, read_sep: bool) -> TtdResult<u32> {
        self.read_separator(read_sep)?;
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn read_naked_int64(&mut self, read_sep: bool) -> TtdResult<i64> {
        self.read_separator(read_sep)?;
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn read_naked_uint64(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.read_separator(read_sep)?;
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn read_naked_double(&mut self, read_sep: bool) -> TtdResult<f64> {
        self.read_separator(read_sep)?;
        Ok(f64::from_bits(u64::from_le_bytes(self.take()?)))
    }

    fn read_naked_addr(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.read_naked_uint64(read_sep)
    }

    fn read_naked_log_tag(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.read_naked_uint64(read_sep)
    }

    fn read_naked_tag(&mut self, read_sep: bool) -> TtdResult<u32> {
        self.read_naked_uint32(read_sep)
    }

    fn read_naked_opt_string(&mut self, read_sep: bool) -> TtdResult<Option<String>> {
        self.read_separator(read_sep)?;
        let len = u32::from_le_bytes(self.take()?);
        if len == NULL_STRING_LEN {
            return Ok(None);
        }
        self.take_str(len).map(Some)
    }

    fn read_naked_well_known_token(&mut self, read_sep: bool) -> TtdResult<String> {
        self.read_separator(read_sep)?;
        let len = u32::from_le_bytes(self.take()?);
        self.take_str(len)
    }

    fn peek_char(&mut self) -> TtdResult<Option<char>> {
        Ok(self.source.peek_byte()?.map(|b| b as char))
    }

    fn close(&mut self) -> TtdResult<()> {
        let mut stored = [0u8; DIGEST_LEN];
        self.source.read_exact(&mut stored)?;
        let computed = std::mem::take(&mut self.digest).finalize();
        if stored != computed || !self.source.at_end()? {
            return Err(TtdError::ChecksumMismatch);
        }
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::stream::{MemoryStreams, StreamProvider, MIN_BUFFER_SIZE};

    fn writer(streams: &MemoryStreams) -> BinaryWriter {
        let sink = BufferedSink::new(streams.open_write("b").unwrap(), MIN_BUFFER_SIZE);
        BinaryWriter::new(sink).unwrap()
    }

    fn reader(streams: &MemoryStreams) -> BinaryReader {
        let source = BufferedSource::new(streams.open_read("b").unwrap(), MIN_BUFFER_SIZE);
        BinaryReader::new(source).unwrap()
    }

    #[test]
    fn test_keys_are_single_bytes() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_int32(Key::Line, 5, Separator::None).unwrap();
        w.flush_and_close().unwrap();
        let bytes = streams.contents("b").unwrap();
        assert_eq!(bytes.len(), StreamHeader::SIZE + 1 + 4 + DIGEST_LEN);
        assert_eq!(bytes[StreamHeader::SIZE], Key::Line.to_byte());
    }

    #[test]
    fn test_comma_written_only_when_requested() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_naked_byte(1, Separator::BigSpace).unwrap();
        w.write_naked_byte(2, Separator::CommaAndBigSpace).unwrap();
        w.flush_and_close().unwrap();
        let bytes = streams.contents("b").unwrap();
        assert_eq!(&bytes[StreamHeader::SIZE..StreamHeader::SIZE + 3], &[1, b',', 2]);
    }

    #[test]
    fn test_scalars_read_back() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_record_start(Separator::None).unwrap();
        w.write_double(Key::DoubleVal, f64::NAN, Separator::None).unwrap();
        w.write_int64(Key::EventTime, -4, Separator::Comma).unwrap();
        w.write_opt_string(Key::Name, None, Separator::Comma).unwrap();
        w.write_string(Key::StringVal, "héllo", Separator::Comma).unwrap();
        w.write_bool(Key::BoolVal, true, Separator::Comma).unwrap();
        w.write_record_end(Separator::None).unwrap();
        w.flush_and_close().unwrap();

        let mut r = reader(&streams);
        r.read_record_start(false).unwrap();
        assert!(r.read_double(Key::DoubleVal, false).unwrap().is_nan());
        assert_eq!(r.read_int64(Key::EventTime, true).unwrap(), -4);
        assert_eq!(r.read_opt_string(Key::Name, true).unwrap(), None);
        assert_eq!(r.read_string(Key::StringVal, true).unwrap(), "héllo");
        assert!(r.read_bool(Key::BoolVal, true).unwrap());
        r.read_record_end().unwrap();
        r.close().unwrap();
    }

    #[test]
    fn test_corruption_detected_on_close() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_uint64(Key::Id, 99, Separator::None).unwrap();
        w.flush_and_close().unwrap();
        let mut bytes = streams.contents("b").unwrap();
        bytes[StreamHeader::SIZE + 1] ^= 0xFF;
        streams.insert("b", bytes);

        let mut r = reader(&streams);
        r.read_uint64(Key::Id, false).unwrap();
        assert!(matches!(r.close(), Err(TtdError::ChecksumMismatch)));
    }

    #[test]
    fn test_bad_header_rejected() {
        let streams = MemoryStreams::new();
        streams.insert("b", vec![0u8; 40]);
        let source = BufferedSource::new(streams.open_read("b").unwrap(), MIN_BUFFER_SIZE);
        assert!(matches!(
            BinaryReader::new(source),
            Err(TtdError::InvalidHeader)
        ));
    }

    #[test]
    fn test_wrong_key_reports_name() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_int32(Key::Line, 5, Separator::None).unwrap();
        w.flush_and_close().unwrap();
        let mut r = reader(&streams);
        match r.read_int32(Key::Column, false) {
            Err(TtdError::KeyMismatch { found, .. }) => assert_eq!(found, "line"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_string_length_is_eof() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_naked_uint32(u32::MAX - 1, Separator::None).unwrap();
        w.write_naked_byte(b'a', Separator::None).unwrap();
        w.flush_and_close().unwrap();

        let mut r = reader(&streams);
        assert!(matches!(
            r.read_naked_opt_string(false),
            Err(TtdError::UnexpectedEof)
        ));
    }
}
