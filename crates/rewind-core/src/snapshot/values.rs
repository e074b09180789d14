//! Primitive values, function bodies, closures, and script contexts

use super::types::TypeId;
use super::var::{
    emit_opt_ptr, emit_var_array, parse_opt_ptr, parse_var_array, LogTag, PropertyId, PtrId,
    SnapVar, WellKnownToken,
};
use crate::error::{TtdError, TtdResult};
use crate::impl_enum_tag;
use crate::serialize::{preallocation, Key, Reader, Separator, Writer};

/// Payload of a boxed primitive
#[derive(Debug, Clone)]
pub enum PrimitivePayload {
    /// `true` / `false`
    Bool(bool),
    /// Heap number
    Number(f64),
    /// 64-bit integer
    Int64(i64),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Symbol, by its property id
    Symbol(PropertyId),
    /// String contents
    String(String),
}

impl PartialEq for PrimitivePayload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::UInt64(a), Self::UInt64(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl PrimitivePayload {
    fn kind(&self) -> u32 {
        match self {
            Self::Bool(_) => 0,
            Self::Number(_) => 1,
            Self::Int64(_) => 2,
            Self::UInt64(_) => 3,
            Self::Symbol(_) => 4,
            Self::String(_) => 5,
        }
    }

    fn emit(&self, w: &mut dyn Writer) -> TtdResult<()> {
        w.write_enum_tag(Key::PayloadKind, self.kind(), Separator::Comma)?;
        match self {
            Self::Bool(b) => w.write_bool(Key::BoolVal, *b, Separator::Comma),
            Self::Number(n) => w.write_double(Key::DoubleVal, *n, Separator::Comma),
            Self::Int64(i) => w.write_int64(Key::I64Val, *i, Separator::Comma),
            Self::UInt64(u) => w.write_uint64(Key::U64Val, *u, Separator::Comma),
            Self::Symbol(pid) => w.write_uint32(Key::PropertyId, pid.0, Separator::Comma),
            Self::String(s) => w.write_string(Key::StringVal, s, Separator::Comma),
        }
    }

    fn parse(r: &mut dyn Reader) -> TtdResult<Self> {
        Ok(match r.read_enum_tag(Key::PayloadKind, true)? {
            0 => Self::Bool(r.read_bool(Key::BoolVal, true)?),
            1 => Self::Number(r.read_double(Key::DoubleVal, true)?),
            2 => Self::Int64(r.read_int64(Key::I64Val, true)?),
            3 => Self::UInt64(r.read_uint64(Key::U64Val, true)?),
            4 => Self::Symbol(PropertyId(r.read_uint32(Key::PropertyId, true)?)),
            5 => Self::String(r.read_string(Key::StringVal, true)?),
            other => {
                return Err(TtdError::UnknownDiscriminant {
                    what: "primitive payload",
                    value: other as u64,
                })
            }
        })
    }
}

/// A boxed primitive value (number, string, boolean, symbol)
#[derive(Debug, Clone, PartialEq)]
pub struct SnapPrimitiveValue {
    /// Address at extraction
    pub ptr_id: PtrId,
    /// Primitive type
    pub type_id: TypeId,
    /// Logical tag, if tagged
    pub log_tag: LogTag,
    /// Set for engine singletons such as `undefined`
    pub well_known_token: Option<WellKnownToken>,
    /// Value
    pub payload: PrimitivePayload,
}

impl SnapPrimitiveValue {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.write_addr(Key::PtrId, self.ptr_id.0, Separator::None)?;
        w.write_addr(Key::TypeId, self.type_id.0, Separator::Comma)?;
        w.write_log_tag(self.log_tag.0, Separator::Comma)?;
        emit_well_known(w, self.well_known_token.as_ref())?;
        self.payload.emit(w)?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let ptr_id = PtrId(r.read_addr(Key::PtrId, false)?);
        let type_id = TypeId(r.read_addr(Key::TypeId, true)?);
        let log_tag = LogTag(r.read_log_tag(true)?);
        let well_known_token = parse_well_known(r)?;
        let payload = PrimitivePayload::parse(r)?;
        r.read_record_end()?;
        Ok(Self {
            ptr_id,
            type_id,
            log_tag,
            well_known_token,
            payload,
        })
    }
}

pub(crate) fn emit_well_known(w: &mut dyn Writer, token: Option<&WellKnownToken>) -> TtdResult<()> {
    w.write_bool(Key::IsWellKnown, token.is_some(), Separator::Comma)?;
    if let Some(token) = token {
        w.write_well_known_token(Key::WellKnownToken, token.as_str(), Separator::Comma)?;
    }
    Ok(())
}

pub(crate) fn parse_well_known(r: &mut dyn Reader) -> TtdResult<Option<WellKnownToken>> {
    if r.read_bool(Key::IsWellKnown, true)? {
        Ok(Some(WellKnownToken(
            r.read_well_known_token(Key::WellKnownToken, true)?,
        )))
    } else {
        Ok(None)
    }
}

/// Compiled-function metadata needed to find or recreate a function body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBodyResolveInfo {
    /// Body identity
    pub function_body_id: PtrId,
    /// Owning context
    pub context_tag: LogTag,
    /// Display name
    pub name: String,
    /// Set for bodies of engine built-ins
    pub known_path: Option<WellKnownToken>,
    /// Enclosing body (parsed first)
    pub parent_body_id: Option<PtrId>,
    /// Top-level script the body was compiled from
    pub top_level_body_counter: u64,
    /// Source line
    pub line: u32,
    /// Source column
    pub column: u32,
}

impl FunctionBodyResolveInfo {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.write_addr(Key::FunctionBodyId, self.function_body_id.0, Separator::None)?;
        w.write_log_tag(self.context_tag.0, Separator::Comma)?;
        w.write_string(Key::Name, &self.name, Separator::Comma)?;
        w.write_opt_string(
            Key::KnownPath,
            self.known_path.as_ref().map(|t| t.as_str()),
            Separator::Comma,
        )?;
        emit_opt_ptr(w, Key::ParentBodyId, self.parent_body_id, Separator::Comma)?;
        w.write_uint64(Key::BodyCounterId, self.top_level_body_counter, Separator::Comma)?;
        w.write_uint32(Key::Line, self.line, Separator::Comma)?;
        w.write_uint32(Key::Column, self.column, Separator::Comma)?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let function_body_id = PtrId(r.read_addr(Key::FunctionBodyId, false)?);
        let context_tag = LogTag(r.read_log_tag(true)?);
        let name = r.read_string(Key::Name, true)?;
        let known_path = r.read_opt_string(Key::KnownPath, true)?.map(WellKnownToken);
        let parent_body_id = parse_opt_ptr(r, Key::ParentBodyId, true)?;
        let top_level_body_counter = r.read_uint64(Key::BodyCounterId, true)?;
        let line = r.read_uint32(Key::Line, true)?;
        let column = r.read_uint32(Key::Column, true)?;
        r.read_record_end()?;
        Ok(Self {
            function_body_id,
            context_tag,
            name,
            known_path,
            parent_body_id,
            top_level_body_counter,
            line,
            column,
        })
    }
}

/// Fields shared by every top-level code record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelCommonInfo {
    /// Monotonic counter identifying the load
    pub body_counter_id: u64,
    /// Module the code belongs to
    pub module_id: u64,
    /// Debugger document id
    pub document_id: u64,
    /// Source location
    pub uri: String,
    /// Full source text
    pub source_code: String,
}

impl TopLevelCommonInfo {
    fn emit(&self, w: &mut dyn Writer) -> TtdResult<()> {
        w.write_uint64(Key::BodyCounterId, self.body_counter_id, Separator::None)?;
        w.write_uint64(Key::ModuleId, self.module_id, Separator::Comma)?;
        w.write_uint64(Key::DocumentId, self.document_id, Separator::Comma)?;
        w.write_string(Key::Uri, &self.uri, Separator::Comma)?;
        w.write_string(Key::SourceCode, &self.source_code, Separator::Comma)
    }

    fn parse(r: &mut dyn Reader) -> TtdResult<Self> {
        Ok(Self {
            body_counter_id: r.read_uint64(Key::BodyCounterId, false)?,
            module_id: r.read_uint64(Key::ModuleId, true)?,
            document_id: r.read_uint64(Key::DocumentId, true)?,
            uri: r.read_string(Key::Uri, true)?,
            source_code: r.read_string(Key::SourceCode, true)?,
        })
    }
}

/// A script loaded through the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelScriptLoad {
    /// Shared fields
    pub info: TopLevelCommonInfo,
    /// Host load flags
    pub load_flag: u32,
}

/// Code compiled by `new Function(...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelNewFunction {
    /// Shared fields
    pub info: TopLevelCommonInfo,
}

/// Code compiled by `eval(...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelEval {
    /// Shared fields
    pub info: TopLevelCommonInfo,
    /// Strict-mode eval
    pub is_strict: bool,
    /// Whether the debugger sees the code as a document
    pub register_document: bool,
}

impl TopLevelScriptLoad {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        self.info.emit(w)?;
        w.write_uint32(Key::LoadFlag, self.load_flag, Separator::Comma)?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let info = TopLevelCommonInfo::parse(r)?;
        let load_flag = r.read_uint32(Key::LoadFlag, true)?;
        r.read_record_end()?;
        Ok(Self { info, load_flag })
    }
}

impl TopLevelNewFunction {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        self.info.emit(w)?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let info = TopLevelCommonInfo::parse(r)?;
        r.read_record_end()?;
        Ok(Self { info })
    }
}

impl TopLevelEval {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        self.info.emit(w)?;
        w.write_bool(Key::IsStrict, self.is_strict, Separator::Comma)?;
        w.write_bool(Key::RegisterDocument, self.register_document, Separator::Comma)?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let info = TopLevelCommonInfo::parse(r)?;
        let is_strict = r.read_bool(Key::IsStrict, true)?;
        let register_document = r.read_bool(Key::RegisterDocument, true)?;
        r.read_record_end()?;
        Ok(Self {
            info,
            is_strict,
            register_document,
        })
    }
}

/// Every top-level code record known to a log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopLevelScripts {
    /// Host script loads
    pub script_loads: Vec<TopLevelScriptLoad>,
    /// `new Function` bodies
    pub new_functions: Vec<TopLevelNewFunction>,
    /// `eval` bodies
    pub evals: Vec<TopLevelEval>,
}

impl TopLevelScripts {
    /// Record for a body counter, searching all three lists
    pub fn find(&self, body_counter_id: u64) -> Option<&TopLevelCommonInfo> {
        self.script_loads
            .iter()
            .map(|s| &s.info)
            .chain(self.new_functions.iter().map(|s| &s.info))
            .chain(self.evals.iter().map(|s| &s.info))
            .find(|info| info.body_counter_id == body_counter_id)
    }

    /// Total record count
    pub fn len(&self) -> usize {
        self.script_loads.len() + self.new_functions.len() + self.evals.len()
    }

    /// True if no code was loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closure slot storage
#[derive(Debug, Clone, PartialEq)]
pub struct SlotArrayInfo {
    /// Slot array identity
    pub slot_id: PtrId,
    /// Owning context
    pub context_tag: LogTag,
    /// Slot contents
    pub slots: Vec<SnapVar>,
    /// Property names for the debugger, parallel to `slots`
    pub debug_property_ids: Vec<PropertyId>,
    /// Function the slots were allocated for
    pub function_body_id: Option<PtrId>,
}

impl SlotArrayInfo {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.write_addr(Key::SlotId, self.slot_id.0, Separator::None)?;
        w.write_log_tag(self.context_tag.0, Separator::Comma)?;
        emit_opt_ptr(w, Key::FunctionBodyId, self.function_body_id, Separator::Comma)?;
        emit_var_array(w, Key::Slots, &self.slots, Separator::Comma)?;
        w.write_record_start_named(Key::PropertyIds, Separator::Comma)?;
        w.write_length_value(self.debug_property_ids.len() as u32, Separator::None)?;
        w.write_sequence_start_default_key(Separator::Comma)?;
        for (i, pid) in self.debug_property_ids.iter().enumerate() {
            w.write_naked_uint32(pid.0, Separator::comma_if(i != 0))?;
        }
        w.write_sequence_end(Separator::None)?;
        w.write_record_end(Separator::None)?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let slot_id = PtrId(r.read_addr(Key::SlotId, false)?);
        let context_tag = LogTag(r.read_log_tag(true)?);
        let function_body_id = parse_opt_ptr(r, Key::FunctionBodyId, true)?;
        let slots = parse_var_array(r, Key::Slots, true)?;
        r.read_record_start_named(Key::PropertyIds, true)?;
        let count = r.read_length_value(false)?;
        r.read_sequence_start_default_key(true)?;
        let mut debug_property_ids = Vec::with_capacity(preallocation(count));
        for i in 0..count {
            debug_property_ids.push(PropertyId(r.read_naked_uint32(i != 0)?));
        }
        r.read_sequence_end()?;
        r.read_record_end()?;
        r.read_record_end()?;
        Ok(Self {
            slot_id,
            context_tag,
            slots,
            debug_property_ids,
            function_body_id,
        })
    }
}

/// Kind of one link in a function's scope chain
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeType {
    /// Unused entry
    Invalid = 0,
    /// Heap activation object
    ActivationObject = 1,
    /// Closure slot array
    SlotArray = 2,
    /// `with` statement target
    With = 3,
}

impl_enum_tag!(ScopeType, "ScopeType", [Invalid, ActivationObject, SlotArray, With]);

/// One link in a scope chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeEntry {
    /// Link kind
    pub scope_type: ScopeType,
    /// Activation object or slot array
    pub id: PtrId,
}

/// A function's captured scope chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFunctionScopeInfo {
    /// Scope identity
    pub scope_id: PtrId,
    /// Owning context
    pub context_tag: LogTag,
    /// Chain, innermost first
    pub entries: Vec<ScopeEntry>,
}

impl ScriptFunctionScopeInfo {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.write_addr(Key::ScopeId, self.scope_id.0, Separator::None)?;
        w.write_log_tag(self.context_tag.0, Separator::Comma)?;
        w.write_length_value(self.entries.len() as u32, Separator::Comma)?;
        w.write_sequence_start_default_key(Separator::Comma)?;
        for (i, entry) in self.entries.iter().enumerate() {
            w.write_record_start(Separator::comma_if(i != 0))?;
            w.write_tag(Key::ScopeType, entry.scope_type, Separator::None)?;
            w.write_addr(Key::Id, entry.id.0, Separator::Comma)?;
            w.write_record_end(Separator::None)?;
        }
        w.write_sequence_end(Separator::None)?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let scope_id = PtrId(r.read_addr(Key::ScopeId, false)?);
        let context_tag = LogTag(r.read_log_tag(true)?);
        let count = r.read_length_value(true)?;
        r.read_sequence_start_default_key(true)?;
        let mut entries = Vec::with_capacity(preallocation(count));
        for i in 0..count {
            r.read_record_start(i != 0)?;
            let scope_type = r.read_tag(Key::ScopeType, false)?;
            let id = PtrId(r.read_addr(Key::Id, true)?);
            r.read_record_end()?;
            entries.push(ScopeEntry { scope_type, id });
        }
        r.read_sequence_end()?;
        r.read_record_end()?;
        Ok(Self {
            scope_id,
            context_tag,
            entries,
        })
    }
}

/// A top-level body loaded into a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedBody {
    /// Top-level counter of the load
    pub body_counter_id: u64,
    /// Function body created for it
    pub function_body_id: PtrId,
}

/// A long-lived root held by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapRoot {
    /// Rooted cell
    pub ptr_id: PtrId,
    /// Tag the host refers to it by
    pub log_tag: LogTag,
}

/// One script context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapContext {
    /// Context identity
    pub context_tag: LogTag,
    /// `Math.random` state
    pub random_seed0: u64,
    /// `Math.random` state
    pub random_seed1: u64,
    /// Context source uri
    pub uri: String,
    /// The context's global object
    pub global_object: PtrId,
    /// Scripts loaded by the host
    pub loaded_scripts: Vec<LoadedBody>,
    /// `new Function` bodies
    pub new_functions: Vec<LoadedBody>,
    /// `eval` bodies
    pub evals: Vec<LoadedBody>,
    /// Long-lived roots
    pub roots: Vec<SnapRoot>,
}

fn emit_loaded(w: &mut dyn Writer, key: Key, bodies: &[LoadedBody]) -> TtdResult<()> {
    w.write_record_start_named(key, Separator::Comma)?;
    w.write_length_value(bodies.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, b) in bodies.iter().enumerate() {
        w.write_record_start(Separator::comma_if(i != 0))?;
        w.write_uint64(Key::BodyCounterId, b.body_counter_id, Separator::None)?;
        w.write_addr(Key::FunctionBodyId, b.function_body_id.0, Separator::Comma)?;
        w.write_record_end(Separator::None)?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

fn parse_loaded(r: &mut dyn Reader, key: Key) -> TtdResult<Vec<LoadedBody>> {
    r.read_record_start_named(key, true)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut bodies = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        r.read_record_start(i != 0)?;
        let body_counter_id = r.read_uint64(Key::BodyCounterId, false)?;
        let function_body_id = PtrId(r.read_addr(Key::FunctionBodyId, true)?);
        r.read_record_end()?;
        bodies.push(LoadedBody {
            body_counter_id,
            function_body_id,
        });
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(bodies)
}

impl SnapContext {
    /// Every function body the context's top-level code created
    pub fn all_loaded_bodies(&self) -> impl Iterator<Item = &LoadedBody> {
        self.loaded_scripts
            .iter()
            .chain(self.new_functions.iter())
            .chain(self.evals.iter())
    }

    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.adjust_indent(1);
        w.write_log_tag(self.context_tag.0, Separator::None)?;
        w.write_uint64(Key::Seed0, self.random_seed0, Separator::Comma)?;
        w.write_uint64(Key::Seed1, self.random_seed1, Separator::Comma)?;
        w.write_string(Key::Uri, &self.uri, Separator::Comma)?;
        w.write_addr(Key::GlobalObject, self.global_object.0, Separator::Comma)?;
        emit_loaded(w, Key::ScriptLoads, &self.loaded_scripts)?;
        emit_loaded(w, Key::NewFunctions, &self.new_functions)?;
        emit_loaded(w, Key::Evals, &self.evals)?;
        w.write_record_start_named(Key::Roots, Separator::CommaAndBigSpace)?;
        w.write_length_value(self.roots.len() as u32, Separator::None)?;
        w.write_sequence_start_default_key(Separator::Comma)?;
        for (i, root) in self.roots.iter().enumerate() {
            w.write_record_start(Separator::comma_if(i != 0))?;
            w.write_addr(Key::PtrId, root.ptr_id.0, Separator::None)?;
            w.write_log_tag(root.log_tag.0, Separator::Comma)?;
            w.write_record_end(Separator::None)?;
        }
        w.write_sequence_end(Separator::None)?;
        w.write_record_end(Separator::None)?;
        w.adjust_indent(-1);
        w.write_record_end(Separator::BigSpace)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let context_tag = LogTag(r.read_log_tag(false)?);
        let random_seed0 = r.read_uint64(Key::Seed0, true)?;
        let random_seed1 = r.read_uint64(Key::Seed1, true)?;
        let uri = r.read_string(Key::Uri, true)?;
        let global_object = PtrId(r.read_addr(Key::GlobalObject, true)?);
        let loaded_scripts = parse_loaded(r, Key::ScriptLoads)?;
        let new_functions = parse_loaded(r, Key::NewFunctions)?;
        let evals = parse_loaded(r, Key::Evals)?;
        r.read_record_start_named(Key::Roots, true)?;
        let count = r.read_length_value(false)?;
        r.read_sequence_start_default_key(true)?;
        let mut roots = Vec::with_capacity(preallocation(count));
        for i in 0..count {
            r.read_record_start(i != 0)?;
            let ptr_id = PtrId(r.read_addr(Key::PtrId, false)?);
            let log_tag = LogTag(r.read_log_tag(true)?);
            r.read_record_end()?;
            roots.push(SnapRoot { ptr_id, log_tag });
        }
        r.read_sequence_end()?;
        r.read_record_end()?;
        r.read_record_end()?;
        Ok(Self {
            context_tag,
            random_seed0,
            random_seed1,
            uri,
            global_object,
            loaded_scripts,
            new_functions,
            evals,
            roots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(id: u64) -> TopLevelCommonInfo {
        TopLevelCommonInfo {
            body_counter_id: id,
            module_id: 0,
            document_id: id,
            uri: format!("file{}.js", id),
            source_code: "x = 1;".to_string(),
        }
    }

    #[test]
    fn test_top_level_scripts_find() {
        let scripts = TopLevelScripts {
            script_loads: vec![TopLevelScriptLoad {
                info: common(1),
                load_flag: 0,
            }],
            new_functions: vec![TopLevelNewFunction { info: common(2) }],
            evals: vec![TopLevelEval {
                info: common(3),
                is_strict: false,
                register_document: false,
            }],
        };
        assert_eq!(scripts.len(), 3);
        assert_eq!(scripts.find(2).unwrap().uri, "file2.js");
        assert!(scripts.find(4).is_none());
    }

    #[test]
    fn test_primitive_payload_equality() {
        assert_eq!(
            PrimitivePayload::Number(f64::NAN),
            PrimitivePayload::Number(f64::NAN)
        );
        assert_ne!(PrimitivePayload::Int64(1), PrimitivePayload::UInt64(1));
    }

    #[test]
    fn test_context_loaded_bodies() {
        let ctx = SnapContext {
            context_tag: LogTag(1),
            random_seed0: 0,
            random_seed1: 0,
            uri: String::new(),
            global_object: PtrId(16),
            loaded_scripts: vec![LoadedBody {
                body_counter_id: 1,
                function_body_id: PtrId(32),
            }],
            new_functions: vec![],
            evals: vec![LoadedBody {
                body_counter_id: 2,
                function_body_id: PtrId(48),
            }],
            roots: vec![],
        };
        let ids: Vec<PtrId> = ctx.all_loaded_bodies().map(|b| b.function_body_id).collect();
        assert_eq!(ids, vec![PtrId(32), PtrId(48)]);
    }
}
