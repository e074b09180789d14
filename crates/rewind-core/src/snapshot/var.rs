//! Identifiers and tagged slot values

use crate::error::{TtdError, TtdResult};
use crate::serialize::{preallocation, Key, Reader, Separator, Writer};
use std::fmt;

/// Address of a heap cell in the source heap at extraction time (0 is invalid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PtrId(pub u64);

impl PtrId {
    /// The invalid id
    pub const INVALID: PtrId = PtrId(0);

    /// True unless this is [`PtrId::INVALID`]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// `Some(self)` for valid ids
    pub fn non_null(self) -> Option<PtrId> {
        self.is_valid().then_some(self)
    }

    /// Id for an optional reference, [`PtrId::INVALID`] for none
    pub fn from_opt(id: Option<PtrId>) -> PtrId {
        id.unwrap_or(PtrId::INVALID)
    }
}

impl fmt::Display for PtrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*{}", self.0)
    }
}

/// Logical tag attached to objects that cross the host boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LogTag(pub u64);

impl LogTag {
    /// Untagged
    pub const INVALID: LogTag = LogTag(0);

    /// True unless this is [`LogTag::INVALID`]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

/// Object identity that survives address reuse across snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct IdentityTag(pub u64);

impl IdentityTag {
    /// No identity assigned
    pub const INVALID: IdentityTag = IdentityTag(0);

    /// True unless this is [`IdentityTag::INVALID`]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Interned property name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub u32);

/// Path naming a runtime singleton (e.g. `global`, `_Object.prototype`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WellKnownToken(pub String);

impl WellKnownToken {
    /// Token for the global object of a context
    pub const GLOBAL: &'static str = "global";

    /// Create a token
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WellKnownToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}~", self.0)
    }
}

/// A slot value: an inline number or a reference in `R`'s address space
#[derive(Debug, Clone, Copy)]
pub enum Var<R> {
    /// No value
    Invalid,
    /// Tagged integer
    Int(i32),
    /// Unboxed double
    Number(f64),
    /// Heap reference
    Ref(R),
}

/// A slot value in snapshot space
pub type SnapVar = Var<PtrId>;

impl<R: PartialEq> PartialEq for Var<R> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Var::Invalid, Var::Invalid) => true,
            (Var::Int(a), Var::Int(b)) => a == b,
            (Var::Number(a), Var::Number(b)) => a.to_bits() == b.to_bits(),
            (Var::Ref(a), Var::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl<R> Default for Var<R> {
    fn default() -> Self {
        Var::Invalid
    }
}

impl<R: Copy> Var<R> {
    /// Referenced cell, if any
    pub fn reference(&self) -> Option<R> {
        match self {
            Var::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Rewrite the reference into another address space
    pub fn map_ref<S>(self, f: impl FnOnce(R) -> S) -> Var<S> {
        match self {
            Var::Invalid => Var::Invalid,
            Var::Int(i) => Var::Int(i),
            Var::Number(n) => Var::Number(n),
            Var::Ref(r) => Var::Ref(f(r)),
        }
    }

    /// Fallible [`Var::map_ref`]
    pub fn try_map_ref<S, E>(self, f: impl FnOnce(R) -> Result<S, E>) -> Result<Var<S>, E> {
        Ok(match self {
            Var::Invalid => Var::Invalid,
            Var::Int(i) => Var::Int(i),
            Var::Number(n) => Var::Number(n),
            Var::Ref(r) => Var::Ref(f(r)?),
        })
    }
}

const VAR_INVALID: u32 = 0;
const VAR_INT: u32 = 1;
const VAR_NUMBER: u32 = 2;
const VAR_REF: u32 = 3;

impl SnapVar {
    /// Write as a small record
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        match self {
            Var::Invalid => w.write_enum_tag(Key::VarTag, VAR_INVALID, Separator::None)?,
            Var::Int(i) => {
                w.write_enum_tag(Key::VarTag, VAR_INT, Separator::None)?;
                w.write_int32(Key::IntVal, *i, Separator::Comma)?;
            }
            Var::Number(n) => {
                w.write_enum_tag(Key::VarTag, VAR_NUMBER, Separator::None)?;
                w.write_double(Key::DoubleVal, *n, Separator::Comma)?;
            }
            Var::Ref(id) => {
                w.write_enum_tag(Key::VarTag, VAR_REF, Separator::None)?;
                w.write_addr(Key::PtrIdVal, id.0, Separator::Comma)?;
            }
        }
        w.write_record_end(Separator::None)
    }

    /// Read a record written by [`SnapVar::emit`]
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<SnapVar> {
        r.read_record_start(read_sep)?;
        let var = match r.read_enum_tag(Key::VarTag, false)? {
            VAR_INVALID => Var::Invalid,
            VAR_INT => Var::Int(r.read_int32(Key::IntVal, true)?),
            VAR_NUMBER => Var::Number(r.read_double(Key::DoubleVal, true)?),
            VAR_REF => Var::Ref(PtrId(r.read_addr(Key::PtrIdVal, true)?)),
            other => {
                return Err(TtdError::UnknownDiscriminant {
                    what: "ttdVarTag",
                    value: other as u64,
                })
            }
        };
        r.read_record_end()?;
        Ok(var)
    }
}

/// Write an optional pointer id under `key` (0 for none)
pub fn emit_opt_ptr(w: &mut dyn Writer, key: Key, id: Option<PtrId>, sep: Separator) -> TtdResult<()> {
    w.write_addr(key, PtrId::from_opt(id).0, sep)
}

/// Read an optional pointer id written by [`emit_opt_ptr`]
pub fn parse_opt_ptr(r: &mut dyn Reader, key: Key, read_sep: bool) -> TtdResult<Option<PtrId>> {
    Ok(PtrId(r.read_addr(key, read_sep)?).non_null())
}

/// Write a counted sequence of vars under `key`
pub fn emit_var_array(w: &mut dyn Writer, key: Key, vars: &[SnapVar], sep: Separator) -> TtdResult<()> {
    w.write_record_start_named(key, sep)?;
    w.write_length_value(vars.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, v) in vars.iter().enumerate() {
        v.emit(w, Separator::comma_if(i != 0))?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

/// Read a sequence written by [`emit_var_array`]
pub fn parse_var_array(r: &mut dyn Reader, key: Key, read_sep: bool) -> TtdResult<Vec<SnapVar>> {
    r.read_record_start_named(key, read_sep)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut vars = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        vars.push(SnapVar::parse(r, i != 0)?);
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(vars)
}

/// Write a counted sequence of pointer ids under `key`
pub fn emit_ptr_array(w: &mut dyn Writer, key: Key, ids: &[PtrId], sep: Separator) -> TtdResult<()> {
    w.write_record_start_named(key, sep)?;
    w.write_length_value(ids.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, id) in ids.iter().enumerate() {
        w.write_naked_addr(id.0, Separator::comma_if(i != 0))?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

/// Read a sequence written by [`emit_ptr_array`]
pub fn parse_ptr_array(r: &mut dyn Reader, key: Key, read_sep: bool) -> TtdResult<Vec<PtrId>> {
    r.read_record_start_named(key, read_sep)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut ids = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        ids.push(PtrId(r.read_naked_addr(i != 0)?));
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptr_id_validity() {
        assert!(!PtrId::INVALID.is_valid());
        assert_eq!(PtrId(0).non_null(), None);
        assert_eq!(PtrId(8).non_null(), Some(PtrId(8)));
        assert_eq!(PtrId::from_opt(None), PtrId::INVALID);
        assert_eq!(PtrId(16).to_string(), "*16");
    }

    #[test]
    fn test_var_number_equality_is_bitwise() {
        let nan: SnapVar = Var::Number(f64::NAN);
        assert_eq!(nan, nan);
        assert_ne!(Var::<PtrId>::Number(0.0), Var::Number(-0.0));
        assert_ne!(Var::<PtrId>::Int(1), Var::Number(1.0));
    }

    #[test]
    fn test_var_map_ref() {
        let v: SnapVar = Var::Ref(PtrId(32));
        let mapped: Var<u64> = v.map_ref(|p| p.0 * 2);
        assert_eq!(mapped.reference(), Some(64));
        let n: SnapVar = Var::Int(3);
        assert_eq!(n.reference(), None);
    }

    #[test]
    fn test_inflated_count_fails_cleanly() {
        use crate::serialize::{open_reader, open_writer, Format, MemoryStreams, StreamProvider};

        for format in [Format::Text, Format::Binary] {
            let streams = MemoryStreams::new();
            let mut w = open_writer(format, streams.open_write("v").unwrap(), 64).unwrap();
            w.write_record_start_named(Key::Values, Separator::None).unwrap();
            w.write_length_value(u32::MAX, Separator::None).unwrap();
            w.write_sequence_start_default_key(Separator::Comma).unwrap();
            w.write_naked_addr(8, Separator::None).unwrap();
            w.write_sequence_end(Separator::None).unwrap();
            w.write_record_end(Separator::None).unwrap();
            w.flush_and_close().unwrap();

            let mut r = open_reader(format, streams.open_read("v").unwrap(), 64).unwrap();
            assert!(parse_ptr_array(r.as_mut(), Key::Values, false).is_err(), "{:?}", format);
        }
    }
}
