//! Token-based serialization for logs and snapshots
//!
//! A [`Writer`] emits records, sequences, keys and naked scalars; a
//! [`Reader`] consumes the same tokens in the same order. Callers pass the
//! separator explicitly on every write and tell the reader whether a comma
//! precedes each read. Two backends implement the protocol:
//!
//! - [`text`]: human-diffable, keys and tags rendered by name
//! - [`binary`]: compact, keys and tags rendered by discriminant byte

pub mod binary;
pub mod format;
pub mod key;
pub mod stream;
pub mod text;

pub use format::{open_reader, open_reader_detect, open_writer, Format};
pub use key::Key;
pub use stream::{
    snapshot_stream_name, BufferedSink, BufferedSource, ByteSink, ByteSource, DirectoryStreams,
    MemoryStreams, StreamProvider, DEFAULT_BUFFER_SIZE, LOG_STREAM_NAME, MIN_BUFFER_SIZE,
};

use crate::error::{TtdError, TtdResult};

/// Largest element count trusted for preallocation when parsing
pub const MAX_PREALLOCATION: usize = 1024;

/// Capacity to reserve for `count` elements declared by a stream
pub fn preallocation(count: impl Into<u64>) -> usize {
    count.into().min(MAX_PREALLOCATION as u64) as usize
}

/// Separator written before a token
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// Nothing
    None = 0,
    /// A comma between siblings
    Comma = 1,
    /// A line break at the current indent
    BigSpace = 2,
    /// A comma followed by a line break
    CommaAndBigSpace = 3,
}

impl Separator {
    /// True if a comma is written
    pub fn has_comma(self) -> bool {
        (self as u8) & (Separator::Comma as u8) != 0
    }

    /// True if a line break is written
    pub fn has_big_space(self) -> bool {
        (self as u8) & (Separator::BigSpace as u8) != 0
    }

    /// Comma when `cond` holds, otherwise none
    pub fn comma_if(cond: bool) -> Self {
        if cond {
            Separator::Comma
        } else {
            Separator::None
        }
    }

    /// Comma-and-break when `cond` holds, otherwise a bare break
    pub fn big_comma_if(cond: bool) -> Self {
        if cond {
            Separator::CommaAndBigSpace
        } else {
            Separator::BigSpace
        }
    }
}

/// A closed enumeration persisted as an enum tag
pub trait EnumTag: Sized + Copy {
    /// Name used in error messages
    const NAME: &'static str;

    /// Discriminant
    fn tag(self) -> u32;

    /// Enum value for a discriminant
    fn from_tag(tag: u32) -> Option<Self>;
}

/// Output half of the token protocol
pub trait Writer {
    /// Write a separator on its own
    fn write_separator(&mut self, sep: Separator) -> TtdResult<()>;

    /// Write a field key; the value that follows is written with no separator
    fn write_key(&mut self, key: Key, sep: Separator) -> TtdResult<()>;

    /// Open a sequence
    fn write_sequence_start(&mut self, sep: Separator) -> TtdResult<()>;

    /// Close a sequence
    fn write_sequence_end(&mut self, sep: Separator) -> TtdResult<()>;

    /// Open a record
    fn write_record_start(&mut self, sep: Separator) -> TtdResult<()>;

    /// Close a record
    fn write_record_end(&mut self, sep: Separator) -> TtdResult<()>;

    /// Null literal
    fn write_naked_null(&mut self, sep: Separator) -> TtdResult<()>;

    /// Unsigned byte
    fn write_naked_byte(&mut self, value: u8, sep: Separator) -> TtdResult<()>;

    /// Boolean
    fn write_naked_bool(&mut self, value: bool, sep: Separator) -> TtdResult<()>;

    /// Signed 32-bit integer
    fn write_naked_int32(&mut self, value: i32, sep: Separator) -> TtdResult<()>;

    /// Unsigned 32-bit integer
    fn write_naked_uint32(&mut self, value: u32, sep: Separator) -> TtdResult<()>;

    /// Signed 64-bit integer
    fn write_naked_int64(&mut self, value: i64, sep: Separator) -> TtdResult<()>;

    /// Unsigned 64-bit integer
    fn write_naked_uint64(&mut self, value: u64, sep: Separator) -> TtdResult<()>;

    /// Double, bit-faithful except for NaN payloads
    fn write_naked_double(&mut self, value: f64, sep: Separator) -> TtdResult<()>;

    /// Pointer id
    fn write_naked_addr(&mut self, value: u64, sep: Separator) -> TtdResult<()>;

    /// Logical tag
    fn write_naked_log_tag(&mut self, value: u64, sep: Separator) -> TtdResult<()>;

    /// Enum discriminant
    fn write_naked_tag(&mut self, value: u32, sep: Separator) -> TtdResult<()>;

    /// String, or the null string
    fn write_naked_opt_string(&mut self, value: Option<&str>, sep: Separator) -> TtdResult<()>;

    /// Well-known object path
    fn write_naked_well_known_token(&mut self, token: &str, sep: Separator) -> TtdResult<()>;

    /// Change the indent level by `delta`
    fn adjust_indent(&mut self, delta: i32);

    /// Set the indent level
    fn set_indent(&mut self, depth: u32);

    /// Flush all pending output and close the stream
    fn flush_and_close(&mut self) -> TtdResult<()>;

    /// Non-null string
    fn write_naked_string(&mut self, value: &str, sep: Separator) -> TtdResult<()> {
        self.write_naked_opt_string(Some(value), sep)
    }

    /// Keyed null
    fn write_null(&mut self, key: Key, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_null(Separator::None)
    }

    /// Keyed byte
    fn write_byte(&mut self, key: Key, value: u8, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_byte(value, Separator::None)
    }

    /// Keyed boolean
    fn write_bool(&mut self, key: Key, value: bool, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_bool(value, Separator::None)
    }

    /// Keyed i32
    fn write_int32(&mut self, key: Key, value: i32, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_int32(value, Separator::None)
    }

    /// Keyed u32
    fn write_uint32(&mut self, key: Key, value: u32, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_uint32(value, Separator::None)
    }

    /// Keyed i64
    fn write_int64(&mut self, key: Key, value: i64, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_int64(value, Separator::None)
    }

    /// Keyed u64
    fn write_uint64(&mut self, key: Key, value: u64, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_uint64(value, Separator::None)
    }

    /// Keyed double
    fn write_double(&mut self, key: Key, value: f64, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_double(value, Separator::None)
    }

    /// Keyed pointer id
    fn write_addr(&mut self, key: Key, value: u64, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_addr(value, Separator::None)
    }

    /// Keyed logical tag under [`Key::LogTag`]
    fn write_log_tag(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.write_key(Key::LogTag, sep)?;
        self.write_naked_log_tag(value, Separator::None)
    }

    /// Keyed identity tag under [`Key::IdentityTag`]
    fn write_identity_tag(&mut self, value: u64, sep: Separator) -> TtdResult<()> {
        self.write_key(Key::IdentityTag, sep)?;
        self.write_naked_log_tag(value, Separator::None)
    }

    /// Keyed enum discriminant
    fn write_enum_tag(&mut self, key: Key, value: u32, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_tag(value, Separator::None)
    }

    /// Keyed string
    fn write_string(&mut self, key: Key, value: &str, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_string(value, Separator::None)
    }

    /// Keyed optional string
    fn write_opt_string(&mut self, key: Key, value: Option<&str>, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_opt_string(value, Separator::None)
    }

    /// Keyed well-known token
    fn write_well_known_token(&mut self, key: Key, token: &str, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_naked_well_known_token(token, Separator::None)
    }

    /// Sequence length under [`Key::Count`]
    fn write_length_value(&mut self, len: u32, sep: Separator) -> TtdResult<()> {
        self.write_uint32(Key::Count, len, sep)
    }

    /// Open a sequence under [`Key::Values`]
    fn write_sequence_start_default_key(&mut self, sep: Separator) -> TtdResult<()> {
        self.write_key(Key::Values, sep)?;
        self.write_sequence_start(Separator::None)
    }

    /// Open a sequence under `key`
    fn write_sequence_start_named(&mut self, key: Key, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_sequence_start(Separator::None)
    }

    /// Open a record under [`Key::Entry`]
    fn write_record_start_default_key(&mut self, sep: Separator) -> TtdResult<()> {
        self.write_key(Key::Entry, sep)?;
        self.write_record_start(Separator::None)
    }

    /// Open a record under `key`
    fn write_record_start_named(&mut self, key: Key, sep: Separator) -> TtdResult<()> {
        self.write_key(key, sep)?;
        self.write_record_start(Separator::None)
    }
}

impl dyn Writer + '_ {
    /// Keyed enum value
    pub fn write_tag<T: EnumTag>(&mut self, key: Key, value: T, sep: Separator) -> TtdResult<()> {
        self.write_enum_tag(key, value.tag(), sep)
    }

    /// Naked enum value
    pub fn write_naked_enum<T: EnumTag>(&mut self, value: T, sep: Separator) -> TtdResult<()> {
        self.write_naked_tag(value.tag(), sep)
    }
}

/// Input half of the token protocol
pub trait Reader {
    /// Consume a comma when `read_sep` is set, otherwise only whitespace
    fn read_separator(&mut self, read_sep: bool) -> TtdResult<()>;

    /// Consume `key` and fail with [`TtdError::KeyMismatch`] on any other key
    fn read_key(&mut self, key: Key, read_sep: bool) -> TtdResult<()>;

    /// Consume a sequence opener
    fn read_sequence_start(&mut self, read_sep: bool) -> TtdResult<()>;

    /// Consume a sequence closer
    fn read_sequence_end(&mut self) -> TtdResult<()>;

    /// Consume a record opener
    fn read_record_start(&mut self, read_sep: bool) -> TtdResult<()>;

    /// Consume a record closer
    fn read_record_end(&mut self) -> TtdResult<()>;

    /// Null literal
    fn read_naked_null(&mut self, read_sep: bool) -> TtdResult<()>;

    /// Unsigned byte
    fn read_naked_byte(&mut self, read_sep: bool) -> TtdResult<u8>;

    /// Boolean
    fn read_naked_bool(&mut self, read_sep: bool) -> TtdResult<bool>;

    /// Signed 32-bit integer
    fn read_naked_int32(&mut self, read_sep: bool) -> TtdResult<i32>;

    /// Unsigned 32-bit integer
    fn read_naked_uint32(&mut self, read_sep: bool) -> TtdResult<u32>;

    /// Signed 64-bit integer
    fn read_naked_int64(&mut self, read_sep: bool) -> TtdResult<i64>;

    /// Unsigned 64-bit integer
    fn read_naked_uint64(&mut self, read_sep: bool) -> TtdResult<u64>;

    /// Double
    fn read_naked_double(&mut self, read_sep: bool) -> TtdResult<f64>;

    /// Pointer id
    fn read_naked_addr(&mut self, read_sep: bool) -> TtdResult<u64>;

    /// Logical tag
    fn read_naked_log_tag(&mut self, read_sep: bool) -> TtdResult<u64>;

    /// Enum discriminant
    fn read_naked_tag(&mut self, read_sep: bool) -> TtdResult<u32>;

    /// String, or `None` for the null string
    fn read_naked_opt_string(&mut self, read_sep: bool) -> TtdResult<Option<String>>;

    /// Well-known object path
    fn read_naked_well_known_token(&mut self, read_sep: bool) -> TtdResult<String>;

    /// Next significant character without consuming it
    fn peek_char(&mut self) -> TtdResult<Option<char>>;

    /// Finish reading and release the stream
    fn close(&mut self) -> TtdResult<()>;

    /// Non-null string
    fn read_naked_string(&mut self, read_sep: bool) -> TtdResult<String> {
        self.read_naked_opt_string(read_sep)?
            .ok_or(TtdError::TokenMismatch {
                expected: "string",
                found: "null".to_string(),
            })
    }

    /// Keyed null
    fn read_null(&mut self, key: Key, read_sep: bool) -> TtdResult<()> {
        self.read_key(key, read_sep)?;
        self.read_naked_null(false)
    }

    /// Keyed byte
    fn read_byte(&mut self, key: Key, read_sep: bool) -> TtdResult<u8> {
        self.read_key(key, read_sep)?;
        self.read_naked_byte(false)
    }

    /// Keyed boolean
    fn read_bool(&mut self, key: Key, read_sep: bool) -> TtdResult<bool> {
        self.read_key(key, read_sep)?;
        self.read_naked_bool(false)
    }

    /// Keyed i32
    fn read_int32(&mut self, key: Key, read_sep: bool) -> TtdResult<i32> {
        self.read_key(key, read_sep)?;
        self.read_naked_int32(false)
    }

    /// Keyed u32
    fn read_uint32(&mut self, key: Key, read_sep: bool) -> TtdResult<u32> {
        self.read_key(key, read_sep)?;
        self.read_naked_uint32(false)
    }

    /// Keyed i64
    fn read_int64(&mut self, key: Key, read_sep: bool) -> TtdResult<i64> {
        self.read_key(key, read_sep)?;
        self.read_naked_int64(false)
    }

    /// Keyed u64
    fn read_uint64(&mut self, key: Key, read_sep: bool) -> TtdResult<u64> {
        self.read_key(key, read_sep)?;
        self.read_naked_uint64(false)
    }

    /// Keyed double
    fn read_double(&mut self, key: Key, read_sep: bool) -> TtdResult<f64> {
        self.read_key(key, read_sep)?;
        self.read_naked_double(false)
    }

    /// Keyed pointer id
    fn read_addr(&mut self, key: Key, read_sep: bool) -> TtdResult<u64> {
        self.read_key(key, read_sep)?;
        self.read_naked_addr(false)
    }

    /// Logical tag under [`Key::LogTag`]
    fn read_log_tag(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.read_key(Key::LogTag, read_sep)?;
        self.read_naked_log_tag(false)
    }

    /// Identity tag under [`Key::IdentityTag`]
    fn read_identity_tag(&mut self, read_sep: bool) -> TtdResult<u64> {
        self.read_key(Key::IdentityTag, read_sep)?;
        self.read_naked_log_tag(false)
    }

    /// Keyed enum discriminant
    fn read_enum_tag(&mut self, key: Key, read_sep: bool) -> TtdResult<u32> {
        self.read_key(key, read_sep)?;
        self.read_naked_tag(false)
    }

    /// Keyed string
    fn read_string(&mut self, key: Key, read_sep: bool) -> TtdResult<String> {
        self.read_key(key, read_sep)?;
        self.read_naked_string(false)
    }

    /// Keyed optional string
    fn read_opt_string(&mut self, key: Key, read_sep: bool) -> TtdResult<Option<String>> {
        self.read_key(key, read_sep)?;
        self.read_naked_opt_string(false)
    }

    /// Keyed well-known token
    fn read_well_known_token(&mut self, key: Key, read_sep: bool) -> TtdResult<String> {
        self.read_key(key, read_sep)?;
        self.read_naked_well_known_token(false)
    }

    /// Sequence length under [`Key::Count`]
    fn read_length_value(&mut self, read_sep: bool) -> TtdResult<u32> {
        self.read_uint32(Key::Count, read_sep)
    }

    /// Sequence opener under [`Key::Values`]
    fn read_sequence_start_default_key(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_key(Key::Values, read_sep)?;
        self.read_sequence_start(false)
    }

    /// Sequence opener under `key`
    fn read_sequence_start_named(&mut self, key: Key, read_sep: bool) -> TtdResult<()> {
        self.read_key(key, read_sep)?;
        self.read_sequence_start(false)
    }

    /// Record opener under [`Key::Entry`]
    fn read_record_start_default_key(&mut self, read_sep: bool) -> TtdResult<()> {
        self.read_key(Key::Entry, read_sep)?;
        self.read_record_start(false)
    }

    /// Record opener under `key`
    fn read_record_start_named(&mut self, key: Key, read_sep: bool) -> TtdResult<()> {
        self.read_key(key, read_sep)?;
        self.read_record_start(false)
    }
}

impl dyn Reader + '_ {
    /// Keyed enum value
    pub fn read_tag<T: EnumTag>(&mut self, key: Key, read_sep: bool) -> TtdResult<T> {
        let raw = self.read_enum_tag(key, read_sep)?;
        T::from_tag(raw).ok_or(TtdError::UnknownDiscriminant {
            what: T::NAME,
            value: raw as u64,
        })
    }

    /// Naked enum value
    pub fn read_naked_enum<T: EnumTag>(&mut self, read_sep: bool) -> TtdResult<T> {
        let raw = self.read_naked_tag(read_sep)?;
        T::from_tag(raw).ok_or(TtdError::UnknownDiscriminant {
            what: T::NAME,
            value: raw as u64,
        })
    }
}

/// Implements [`EnumTag`] for a fieldless `#[repr(u8)]`/`#[repr(u32)]` enum
#[macro_export]
macro_rules! impl_enum_tag {
    ($ty:ident, $name:literal, [$($variant:ident),* $(,)?]) => {
        impl $crate::serialize::EnumTag for $ty {
            const NAME: &'static str = $name;

            fn tag(self) -> u32 {
                self as u32
            }

            fn from_tag(tag: u32) -> Option<Self> {
                [$($ty::$variant),*]
                    .into_iter()
                    .find(|v| *v as u32 == tag)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_flags() {
        assert!(!Separator::None.has_comma());
        assert!(Separator::Comma.has_comma());
        assert!(!Separator::BigSpace.has_comma());
        assert!(Separator::CommaAndBigSpace.has_comma());
        assert!(Separator::CommaAndBigSpace.has_big_space());
        assert!(!Separator::Comma.has_big_space());
    }

    #[test]
    fn test_separator_helpers() {
        assert_eq!(Separator::comma_if(true), Separator::Comma);
        assert_eq!(Separator::comma_if(false), Separator::None);
        assert_eq!(Separator::big_comma_if(true), Separator::CommaAndBigSpace);
        assert_eq!(Separator::big_comma_if(false), Separator::BigSpace);
    }
}
