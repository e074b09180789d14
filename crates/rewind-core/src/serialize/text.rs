//! Verbose text backend
//!
//! UTF-8 with a leading byte-order mark. Records are `{...}`, sequences
//! `[...]`, keys `name:`. Scalars carry a sigil so a stream can be read
//! back without a schema: `*` pointer ids, `!` log tags, `$` enum tags,
//! `@len"..."` strings, `~token~` well-known tokens, `#` special doubles.

use super::format::TEXT_BOM;
use super::stream::{BufferedSink, BufferedSource};
use super::{Key, Reader, Separator, Writer};
use crate::error::{TtdError, TtdResult};

const MAX_KEY_LEN: usize = 256;
const INDENT_WIDTH: usize = 2;

/// Text-format [`Writer`]
pub struct TextWriter {
    sink: BufferedSink,
    indent: u32,
}

impl TextWriter {
    /// Start a text stream, writing the byte-order mark
    pub fn new(mut sink: BufferedSink) -> TtdResult<Self> {
        sink.write_bytes(&TEXT_BOM)?;
        Ok(Self { sink, indent: 0 })
    }

    fn raw(&mut self, text: &str) -> TtdResult<()> {
        self.sink.write_bytes(text.as_bytes())
    }

    fn newline(&mut self) -> TtdResult<()> {
        let mut line = String::with_capacity(1 + self.indent as usize * INDENT_WIDTH);
        line.push('\n');
        for _ in 0..self.indent as usize * INDENT_WIDTH {
            line.push(' ');
        }
        self.raw(&line)
    }

    fn sep_then(&mut self, sep: Separator, text: &str) -> TtdResult<()> {
        self.write_separator(sep)?;
        self.raw(text)
    }
}

/// Text rendering of a double
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        "#nan".to_string()
    } else if value == f64::INFINITY {
        "#+inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "#-inf".to_string()
    } else if value == f64::MAX {
        "#ub".to_string()
    } else if value == f64::MIN {
        "#lb".to_string()
    } else if value == f64::EPSILON {
        "#ep".to_string()
    } else {
        format!("{}", value)
    }
}

/// Parse a double rendered by [`format_double`]
pub fn parse_double(text: &str) -> Option<f64> {
    match text {
        "#nan" => Some(f64::NAN),
        "#+inf" => Some(f64::INFINITY),
        "#-inf" => Some(f64::NEG_INFINITY),
        "#ub" => Some(f64::MAX),
        "#lb" => Some(f64::MIN),
        "#ep" => Some(f64::EPSILON),
        _ => text.parse().ok(),
    }
}

impl Writer for TextWriter {
    fn write_separator(&mut self, sep: Separator) -> TtdResult<()> {
        if sep.has_comma() {
            self.raw(",")?;
            if sep.has_big_space() {
                self.newline()?;
            } else {
                self.raw(" ")?;
            }
        } else if sep.has_big_space() {
            self.newline()?;
        }
        Ok(())
    }

    fn write_key(&mut self, key: Key, sep: Separator) -> TtdResult<()> {
        self.write_separator(sep)?;
        self.raw(key.name())?;
        self.raw(":")
    }

    fn write_sequence_start(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, "[")
    }

    fn write_sequence_end(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, "]")
    }

    fn write_record_start(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, "{")
    }

    fn write_record_end(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, "}")
    }

    fn write_naked_null(&mut self, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, "null")
    }

    fn write_naked_byte(&mut self, value: u8, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_string())
    }

    fn write_naked_bool(&mut self, value: bool, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, if value { "true" } else { "false" })
    }

    fn write_naked_int32(&mut self, value: i32, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_string())
    }

    fn write_naked_uint32(&mut self, value: u32, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_string())
    }

    fn write_naked_int64(&mut self, value: i64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_string())
    }

    fn write_naked_uint64(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &value.to_string())
    }

    fn write_naked_double(&mut self, value: f64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &format_double(value))
    }

    fn write_naked_addr(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &format!("*{}", value))
    }

    fn write_naked_log_tag(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &format!("!{}", value))
    }

    fn write_naked_tag(&mut self, value: u32, sep: Separator) -> TtdResult<()> {
        self.sep_then(sep, &format!("${}", value))
    }

    fn write_naked_opt_string(&mut self, value: Option<&str>, sep: Separator) -> TtdResult<()> {
        self.write_separator(sep)?;
        match value {
            None => self.raw("null"),
            Some(s) => {
                self.raw(&format!("@{}\"", s.len()))?;
                self.raw(s)?;
                self.raw("\"")
            }
        }
    }

    fn write_naked_well_known_token(&mut self, token: &str, sep: Separator) -> TtdResult<()> {
        if token.contains('~') {
            return Err(TtdError::PolicyViolation(
                "well-known tokens may not contain '~'",
            ));
        }
        self.sep_then(sep, &format!("~{}~", token))
    }

    fn adjust_indent(&mut self, delta: i32) {
        self.indent = (self.indent as i64 + delta as i64).max(0) as u32;
    }

    fn set_indent(&mut self, depth: u32) {
        self.indent = depth;
    }

    fn flush_and_close(&mut self) -> TtdResult<()> {
        self.sink.flush_and_close()
    }
}

/// Text-format [`Reader`]
pub struct TextReader {
    source: BufferedSource,
}

impl TextReader {
    /// Open a text stream, checking the byte-order mark
    pub fn new(mut source: BufferedSource) -> TtdResult<Self> {
        let mut bom = [0u8; 3];
        source
            .read_exact(&mut bom)
            .map_err(|_| TtdError::InvalidHeader)?;
        if bom != TEXT_BOM {
            return Err(TtdError::InvalidHeader);
        }
        Ok(Self { source })
    }

    fn skip_whitespace(&mut self) -> TtdResult<()> {
        while let Some(b) = self.source.peek_byte()? {
            if matches!(b, b' ' | b'\n' | b'\r' | b'\t') {
                self.source.next_byte()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn expect_byte(&mut self, expected: u8, what: &'static str) -> TtdResult<()> {
        self.skip_whitespace()?;
        let found = self.source.read_byte()?;
        if found != expected {
            return Err(TtdError::TokenMismatch {
                expected: what,
                found: (found as char).to_string(),
            });
        }
        Ok(())
    }

    fn read_word(&mut self) -> TtdResult<String> {
        self.skip_whitespace()?;
        let mut word = String::new();
        while let Some(b) = self.source.peek_byte()? {
            if b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.' | b'#' | b'_') {
                word.push(b as char);
                self.source.next_byte()?;
            } else {
                break;
            }
        }
        if word.is_empty() {
            return match self.source.peek_byte()? {
                Some(b) => Err(TtdError::TokenMismatch {
                    expected: "value",
                    found: (b as char).to_string(),
                }),
                None => Err(TtdError::UnexpectedEof),
            };
        }
        Ok(word)
    }

    fn parse_word<T: std::str::FromStr>(&mut self, what: &'static str) -> TtdResult<T> {
        let word = self.read_word()?;
        word.parse().map_err(|_| TtdError::TokenMismatch {
            expected: what,
            found: word,
        })
    }

    fn sigil_number<T: std::str::FromStr>(
        &mut self,
        read_sep: bool,
        sigil: u8,
        what: &'static str,
    ) -> TtdResult<T> {
        self.read_separator(read_sep)?;
        self.expect_byte(sigil, what)?;
        let word = self.read_word()?;
        word.parse().map_err(|_| TtdError::TokenMismatch {
            expected: what,
            found: word,
        })
    }
}

impl Reader for TextReader {
    fn read_separator(&mut self, read_sep: bool) -> TtdResult<()> {
        if read_sep {
            self.expect_byte(b',', "','")?;
        }
        self.skip_whitespace()
    }

    fn read_key(&mut self, key: Key, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        let mut name = Vec::new();
        loop {
            let b = self.source.read_byte()?;
            if b == b':' {
                break;
            }
            if name.len() >= MAX_KEY_LEN {
                return Err(TtdError::TokenMismatch {
                    expected: "key",
                    found: String::from_utf8_lossy(&name).into_owned(),
                });
            }
            name.push(b);
        }
        let name = String::from_utf8_lossy(&name);
        if name != key.name() {
            return Err(TtdError::KeyMismatch {
                expected: key.name(),
                found: name.into_owned(),
            });
        }
        Ok(())
    }

    fn read_sequence_start(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        self.expect_byte(b'[', "'['")
    }

    fn read_sequence_end(&mut self) -> TtdResult<()> {
        self.expect_byte(b']', "']'")
    }

    fn read_record_start(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        self.expect_byte(b'{', "'{'")
    }

    fn read_record_end(&mut self) -> TtdResult<()> {
        self.expect_byte(b'}', "'}'")
    }

    fn read_naked_null(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_separator(read_sep)?;
        let word = self.read_word()?;
        if word != "null" {
            return Err(TtdError::TokenMismatch {
                expected: "null",
                found: word,
            });
        }
        Ok(())
    }

    fn read_naked_byte(&mut self, read_sep: bool) -> TtdResult<u8> {
        self.read_separator(read_sep)?;
        self.parse_word("byte")
    }

    fn read_naked_bool(&mut self, read_sep: bool) -> TtdResult<bool> {
        self.read_separator(read_sep)?;
        let word = self.read_word()?;
        match word.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(TtdError::TokenMismatch {
                expected: "bool",
                found: word,
            }),
        }
    }

    fn read_naked_int32(&mut self, read_sep: bool) -> TtdResult<i32> {
        self.read_separator(read_sep)?;
        self.parse_word("int32")
    }

    fn read_naked_uint32(&mut self, read_sep: bool) -> TtdResult<u32> {
        self.read_separator(read_sep)?;
        self.parse_word("uint32")
    }

    fn read_naked_int64(&mut self, read_sep: bool) -> TtdResult<i64> {
        self.read_separator(read_sep)?;
        self.parse_word("int64")
    }

    fn read_naked_uint64(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.read_separator(read_sep)?;
        self.parse_word("uint64")
    }

    fn read_naked_double(&mut self, read_sep: bool) -> TtdResult<f64> {
        self.read_separator(read_sep)?;
        let word = self.read_word()?;
        parse_double(&word).ok_or(TtdError::TokenMismatch {
            expected: "double",
            found: word,
        })
    }

    fn read_naked_addr(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.sigil_number(read_sep, b'*', "pointer id")
    }

    fn read_naked_log_tag(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.sigil_number(read_sep, b'!', "log tag")
    }

    fn read_naked_tag(&mut self, read_sep: bool) -> TtdResult<u32> {
        self.sigil_number(read_sep, b'$', "enum tag")
    }

    fn read_naked_opt_string(&mut self, read_sep: bool) -> TtdResult<Option<String>> {
        self.read_separator(read_sep)?;
        if self.source.peek_byte()? == Some(b'n') {
            self.read_naked_null(false)?;
            return Ok(None);
        }
        self.expect_byte(b'@', "string")?;
        let len: u64 = self.parse_word("string length")?;
        let quote = self.source.read_byte()?;
        if quote != b'"' {
            return Err(TtdError::TokenMismatch {
                expected: "'\"'",
                found: (quote as char).to_string(),
            });
        }
        let bytes = self.source.read_declared(len)?;
        let close = self.source.read_byte()?;
        if close != b'"' {
            return Err(TtdError::TokenMismatch {
                expected: "'\"'",
                found: (close as char).to_string(),
            });
        }
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| TtdError::TokenMismatch {
                expected: "UTF-8 string",
                found: e.to_string(),
            })
    }

    fn read_naked_well_known_token(&mut self, read_sep: bool) -> TtdResult<String> {
        self.read_separator(read_sep)?;
        self.expect_byte(b'~', "well-known token")?;
        let mut bytes = Vec::new();
        loop {
            let b = self.source.read_byte()?;
            if b == b'~' {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8(bytes).map_err(|e| TtdError::TokenMismatch {
            expected: "UTF-8 token",
            found: e.to_string(),
        })
    }

    fn peek_char(&mut self) -> TtdResult<Option<char>> {
        self.skip_whitespace()?;
        Ok(self.source.peek_byte()?.map(|b| b as char))
    }

    fn close(&mut self) -> TtdResult<()> {
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::stream::{MemoryStreams, StreamProvider, MIN_BUFFER_SIZE};

    fn writer(streams: &MemoryStreams) -> TextWriter {
        let sink = BufferedSink::new(streams.open_write("t").unwrap(), MIN_BUFFER_SIZE);
        TextWriter::new(sink).unwrap()
    }

    fn reader(streams: &MemoryStreams) -> TextReader {
        let source = BufferedSource::new(streams.open_read("t").unwrap(), MIN_BUFFER_SIZE);
        TextReader::new(source).unwrap()
    }

    fn body(streams: &MemoryStreams) -> String {
        let bytes = streams.contents("t").unwrap();
        assert_eq!(&bytes[..3], &TEXT_BOM);
        String::from_utf8(bytes[3..].to_vec()).unwrap()
    }

    #[test]
    fn test_double_formatting() {
        assert_eq!(format_double(3.0), "3");
        assert_eq!(format_double(-0.0), "-0");
        assert_eq!(format_double(0.1), "0.1");
        assert_eq!(format_double(f64::NAN), "#nan");
        assert_eq!(format_double(f64::NEG_INFINITY), "#-inf");
        assert_eq!(format_double(f64::MAX), "#ub");
        assert_eq!(format_double(f64::MIN), "#lb");
        assert_eq!(format_double(f64::EPSILON), "#ep");
        assert!(parse_double("-0").unwrap().is_sign_negative());
        assert!(parse_double("#nan").unwrap().is_nan());
    }

    #[test]
    fn test_record_layout() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_record_start(Separator::None).unwrap();
        w.write_int64(Key::EventTime, 7, Separator::None).unwrap();
        w.write_string(Key::Name, "ab", Separator::Comma).unwrap();
        w.write_addr(Key::PtrId, 16, Separator::Comma).unwrap();
        w.write_record_end(Separator::None).unwrap();
        w.flush_and_close().unwrap();
        assert_eq!(
            body(&streams),
            "{eventTime:7, name:@2\"ab\", ptrId:*16}"
        );
    }

    #[test]
    fn test_big_space_indents() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_sequence_start(Separator::None).unwrap();
        w.adjust_indent(1);
        w.write_naked_int32(1, Separator::BigSpace).unwrap();
        w.write_naked_int32(2, Separator::CommaAndBigSpace).unwrap();
        w.adjust_indent(-1);
        w.write_sequence_end(Separator::BigSpace).unwrap();
        w.flush_and_close().unwrap();
        assert_eq!(body(&streams), "[\n  1,\n  2\n]");
    }

    #[test]
    fn test_scalars_read_back() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_record_start(Separator::None).unwrap();
        w.write_bool(Key::BoolVal, true, Separator::None).unwrap();
        w.write_double(Key::DoubleVal, -0.0, Separator::Comma).unwrap();
        w.write_opt_string(Key::Name, None, Separator::Comma).unwrap();
        w.write_string(Key::StringVal, "x,\"y\"\n", Separator::Comma).unwrap();
        w.write_log_tag(12, Separator::Comma).unwrap();
        w.write_enum_tag(Key::EventKind, 3, Separator::Comma).unwrap();
        w.write_well_known_token(Key::WellKnownToken, "global", Separator::Comma)
            .unwrap();
        w.write_record_end(Separator::None).unwrap();
        w.flush_and_close().unwrap();

        let mut r = reader(&streams);
        r.read_record_start(false).unwrap();
        assert!(r.read_bool(Key::BoolVal, false).unwrap());
        assert!(r.read_double(Key::DoubleVal, true).unwrap().is_sign_negative());
        assert_eq!(r.read_opt_string(Key::Name, true).unwrap(), None);
        assert_eq!(r.read_string(Key::StringVal, true).unwrap(), "x,\"y\"\n");
        assert_eq!(r.read_log_tag(true).unwrap(), 12);
        assert_eq!(r.read_enum_tag(Key::EventKind, true).unwrap(), 3);
        assert_eq!(
            r.read_well_known_token(Key::WellKnownToken, true).unwrap(),
            "global"
        );
        r.read_record_end().unwrap();
        r.close().unwrap();
    }

    #[test]
    fn test_key_mismatch() {
        let streams = MemoryStreams::new();
        let mut w = writer(&streams);
        w.write_int32(Key::Line, 1, Separator::None).unwrap();
        w.flush_and_close().unwrap();
        let mut r = reader(&streams);
        match r.read_int32(Key::Column, false) {
            Err(TtdError::KeyMismatch { expected, found }) => {
                assert_eq!(expected, "column");
                assert_eq!(found, "line");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_bom_rejected() {
        let streams = MemoryStreams::new();
        streams.insert("t", b"{}".to_vec());
        let source = BufferedSource::new(streams.open_read("t").unwrap(), MIN_BUFFER_SIZE);
        assert!(matches!(
            TextReader::new(source),
            Err(TtdError::InvalidHeader)
        ));
    }

    #[test]
    fn test_truncated_stream_is_eof() {
        let streams = MemoryStreams::new();
        let mut bytes = TEXT_BOM.to_vec();
        bytes.extend_from_slice(b"name:@5\"ab");
        streams.insert("t", bytes);
        let mut r = reader(&streams);
        assert!(matches!(
            r.read_string(Key::Name, false),
            Err(TtdError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_peek_char_skips_whitespace() {
        let streams = MemoryStreams::new();
        let mut bytes = TEXT_BOM.to_vec();
        bytes.extend_from_slice(b"  \n {");
        streams.insert("t", bytes);
        let mut r = reader(&streams);
        assert_eq!(r.peek_char().unwrap(), Some('{'));
        r.read_record_start(false).unwrap();
        assert_eq!(r.peek_char().unwrap(), None);
    }

    #[test]
    fn test_oversized_string_length_is_eof() {
        let streams = MemoryStreams::new();
        let mut bytes = TEXT_BOM.to_vec();
        bytes.extend_from_slice(b"@18446744073709551615\"abc\"");
        streams.insert("t", bytes);
        let mut r = reader(&streams);
        assert!(matches!(
            r.read_naked_opt_string(false),
            Err(TtdError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_string_length_past_u64_is_rejected() {
        let streams = MemoryStreams::new();
        let mut bytes = TEXT_BOM.to_vec();
        bytes.extend_from_slice(b"@99999999999999999999999\"abc\"");
        streams.insert("t", bytes);
        let mut r = reader(&streams);
        assert!(r.read_naked_opt_string(false).is_err());
    }
}
