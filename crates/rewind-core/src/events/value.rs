//! Values crossing the host boundary
//!
//! Arguments and results of logged operations are stored by value, except
//! objects, which are stored by the log tag they were given when they first
//! crossed the boundary.

use crate::error::TtdResult;
use crate::impl_enum_tag;
use crate::serialize::{preallocation, Key, Reader, Separator, Writer};
use crate::snapshot::{LogTag, PropertyId};
use std::fmt;

/// An argument or result value
#[derive(Debug, Clone, Default)]
pub enum LogValue {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Number
    Number(f64),
    /// String contents
    String(String),
    /// Symbol, by property id
    Symbol(PropertyId),
    /// Object, by log tag
    Object(LogTag),
}

impl PartialEq for LogValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LogValue::Undefined, LogValue::Undefined) => true,
            (LogValue::Null, LogValue::Null) => true,
            (LogValue::Bool(a), LogValue::Bool(b)) => a == b,
            (LogValue::Number(a), LogValue::Number(b)) => a.to_bits() == b.to_bits(),
            (LogValue::String(a), LogValue::String(b)) => a == b,
            (LogValue::Symbol(a), LogValue::Symbol(b)) => a == b,
            (LogValue::Object(a), LogValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogValueKind {
    Undefined = 0,
    Null = 1,
    Bool = 2,
    Number = 3,
    String = 4,
    Symbol = 5,
    Object = 6,
}

impl_enum_tag!(
    LogValueKind,
    "LogValueKind",
    [Undefined, Null, Bool, Number, String, Symbol, Object]
);

impl LogValue {
    fn kind(&self) -> LogValueKind {
        match self {
            LogValue::Undefined => LogValueKind::Undefined,
            LogValue::Null => LogValueKind::Null,
            LogValue::Bool(_) => LogValueKind::Bool,
            LogValue::Number(_) => LogValueKind::Number,
            LogValue::String(_) => LogValueKind::String,
            LogValue::Symbol(_) => LogValueKind::Symbol,
            LogValue::Object(_) => LogValueKind::Object,
        }
    }

    /// Log tag of an object value
    pub fn object_tag(&self) -> Option<LogTag> {
        match self {
            LogValue::Object(tag) => Some(*tag),
            _ => None,
        }
    }

    /// Serialize as a small record
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.write_tag(Key::ValueKind, self.kind(), Separator::None)?;
        match self {
            LogValue::Undefined | LogValue::Null => {}
            LogValue::Bool(b) => w.write_bool(Key::BoolVal, *b, Separator::Comma)?,
            LogValue::Number(n) => w.write_double(Key::DoubleVal, *n, Separator::Comma)?,
            LogValue::String(s) => w.write_string(Key::StringVal, s, Separator::Comma)?,
            LogValue::Symbol(pid) => w.write_uint32(Key::PropertyId, pid.0, Separator::Comma)?,
            LogValue::Object(tag) => w.write_log_tag(tag.0, Separator::Comma)?,
        }
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let kind: LogValueKind = r.read_tag(Key::ValueKind, false)?;
        let value = match kind {
            LogValueKind::Undefined => LogValue::Undefined,
            LogValueKind::Null => LogValue::Null,
            LogValueKind::Bool => LogValue::Bool(r.read_bool(Key::BoolVal, true)?),
            LogValueKind::Number => LogValue::Number(r.read_double(Key::DoubleVal, true)?),
            LogValueKind::String => LogValue::String(r.read_string(Key::StringVal, true)?),
            LogValueKind::Symbol => LogValue::Symbol(PropertyId(r.read_uint32(Key::PropertyId, true)?)),
            LogValueKind::Object => LogValue::Object(LogTag(r.read_log_tag(true)?)),
        };
        r.read_record_end()?;
        Ok(value)
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Undefined => write!(f, "undefined"),
            LogValue::Null => write!(f, "null"),
            LogValue::Bool(b) => write!(f, "{}", b),
            LogValue::Number(n) => write!(f, "{}", n),
            LogValue::String(s) => write!(f, "{:?}", s),
            LogValue::Symbol(pid) => write!(f, "Symbol({})", pid.0),
            LogValue::Object(tag) => write!(f, "object{}", tag),
        }
    }
}

/// Keyed value field
pub fn emit_keyed_value(w: &mut dyn Writer, key: Key, value: &LogValue, sep: Separator) -> TtdResult<()> {
    w.write_key(key, sep)?;
    value.emit(w, Separator::None)
}

/// Keyed value field
pub fn parse_keyed_value(r: &mut dyn Reader, key: Key, read_sep: bool) -> TtdResult<LogValue> {
    r.read_key(key, read_sep)?;
    LogValue::parse(r, false)
}

/// Counted value sequence
pub fn emit_value_array(w: &mut dyn Writer, key: Key, values: &[LogValue], sep: Separator) -> TtdResult<()> {
    w.write_record_start_named(key, sep)?;
    w.write_length_value(values.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, v) in values.iter().enumerate() {
        v.emit(w, Separator::comma_if(i != 0))?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

/// Counted value sequence
pub fn parse_value_array(r: &mut dyn Reader, key: Key, read_sep: bool) -> TtdResult<Vec<LogValue>> {
    r.read_record_start_named(key, read_sep)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut values = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        values.push(LogValue::parse(r, i != 0)?);
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_equality_is_bitwise() {
        assert_eq!(LogValue::Number(f64::NAN), LogValue::Number(f64::NAN));
        assert_ne!(LogValue::Number(0.0), LogValue::Number(-0.0));
    }

    #[test]
    fn test_object_tag() {
        assert_eq!(LogValue::Object(LogTag(7)).object_tag(), Some(LogTag(7)));
        assert_eq!(LogValue::Null.object_tag(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(LogValue::String("a".into()).to_string(), "\"a\"");
        assert_eq!(LogValue::Undefined.to_string(), "undefined");
    }
}
