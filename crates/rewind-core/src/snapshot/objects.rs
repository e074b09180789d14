//! Heap objects and the per-kind dispatch table
//!
//! Each [`SnapObjectType`] maps to an [`ObjectKindOps`] entry holding up to
//! four function pointers: `inflate` allocates the live object, and
//! `additional_instantiation` wires object-to-object references once every
//! object in the snapshot exists. `emit_extra` and `parse_extra` serialize
//! the kind payload. A tag without an entry cannot be extracted or inflated.
//!
//! References needed to allocate an object (a bound function's target, a
//! typed array's buffer) are listed in `depends_on` so they are inflated
//! first. Everything else is deferred to the second pass.

use super::types::TypeId;
use super::values::{emit_well_known, parse_well_known};
use super::var::{
    emit_opt_ptr, emit_ptr_array, emit_var_array, parse_opt_ptr, parse_ptr_array,
    parse_var_array, IdentityTag, LogTag, PtrId, SnapVar, Var, WellKnownToken,
};
use crate::error::{TtdError, TtdResult};
use crate::heap::{
    AdditionalValues, ConstructKind, ConstructShape, HeapBuilder, LivePtr, LiveValue,
};
use crate::impl_enum_tag;
use crate::inflate_map::InflateMap;
use crate::serialize::{preallocation, Key, Reader, Separator, Writer};

/// Object kind, selecting inflation and serialization behavior
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SnapObjectType {
    Invalid = 0,
    Unhandled = 1,
    Dynamic = 2,
    External = 3,
    ScriptFunction = 4,
    RuntimeFunction = 5,
    ExternalFunction = 6,
    RuntimeRevokerFunction = 7,
    BoundFunction = 8,
    Activation = 9,
    BlockActivation = 10,
    PseudoActivation = 11,
    ConsoleScopeActivation = 12,
    HeapArguments = 13,
    ES5HeapArguments = 14,
    BoxedValue = 15,
    Date = 16,
    Regex = 17,
    Error = 18,
    Array = 19,
    NativeIntArray = 20,
    NativeFloatArray = 21,
    ES5Array = 22,
    ArrayBuffer = 23,
    TypedArray = 24,
    Set = 25,
    Map = 26,
    Proxy = 27,
    Promise = 28,
    PromiseResolveOrRejectFunction = 29,
    PromiseReactionTaskFunction = 30,
    PromiseAllResolveElementFunction = 31,
    WellKnown = 32,
}

impl_enum_tag!(
    SnapObjectType,
    "SnapObjectType",
    [
        Invalid,
        Unhandled,
        Dynamic,
        External,
        ScriptFunction,
        RuntimeFunction,
        ExternalFunction,
        RuntimeRevokerFunction,
        BoundFunction,
        Activation,
        BlockActivation,
        PseudoActivation,
        ConsoleScopeActivation,
        HeapArguments,
        ES5HeapArguments,
        BoxedValue,
        Date,
        Regex,
        Error,
        Array,
        NativeIntArray,
        NativeFloatArray,
        ES5Array,
        ArrayBuffer,
        TypedArray,
        Set,
        Map,
        Proxy,
        Promise,
        PromiseResolveOrRejectFunction,
        PromiseReactionTaskFunction,
        PromiseAllResolveElementFunction,
        WellKnown,
    ]
);

/// Script function state
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFunctionInfo {
    /// Compiled body
    pub body_id: PtrId,
    /// Captured scope chain
    pub scope_id: Option<PtrId>,
    /// `super` home object
    pub home_object: Option<PtrId>,
    /// Computed method name
    pub computed_name: SnapVar,
    /// Body references `super`
    pub has_super_reference: bool,
}

/// Bound function state
#[derive(Debug, Clone, PartialEq)]
pub struct BoundFunctionInfo {
    /// Target function
    pub target: PtrId,
    /// Bound `this`
    pub bound_this: SnapVar,
    /// Bound leading arguments
    pub args: Vec<SnapVar>,
}

/// Arguments object state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapArgumentsInfo {
    /// Actual argument count
    pub number_of_arguments: u32,
    /// Declared parameter count
    pub formal_count: u32,
    /// Activation the arguments alias
    pub frame_object: Option<PtrId>,
    /// Per-argument deletion flags
    pub deleted_args: Vec<bool>,
}

/// Regular expression state
#[derive(Debug, Clone, PartialEq)]
pub struct RegexInfo {
    /// Source pattern
    pub pattern: String,
    /// Flag bits
    pub flags: u32,
    /// `lastIndex`
    pub last_index: SnapVar,
}

/// Sparse array contents
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInfo<T> {
    /// `length`
    pub length: u32,
    /// Populated indices, ascending
    pub entries: Vec<(u32, T)>,
}

impl<T> Default for ArrayInfo<T> {
    fn default() -> Self {
        Self {
            length: 0,
            entries: Vec::new(),
        }
    }
}

/// An accessor property on an ES5 array index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorEntry<R> {
    /// Array index
    pub index: u32,
    /// Getter function
    pub getter: Option<R>,
    /// Setter function
    pub setter: Option<R>,
    /// Property attributes
    pub attributes: u8,
}

/// ES5 array with accessor or non-default indices
#[derive(Debug, Clone, PartialEq)]
pub struct ES5ArrayInfo {
    /// Data elements
    pub elements: ArrayInfo<SnapVar>,
    /// Accessor indices
    pub accessors: Vec<AccessorEntry<PtrId>>,
    /// `length` writability
    pub is_length_writable: bool,
}

/// Typed array view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedArrayInfo {
    /// Offset into the buffer
    pub byte_offset: u32,
    /// Element count
    pub length: u32,
    /// Backing buffer
    pub buffer: PtrId,
}

/// Promise lifecycle state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PromiseStatus {
    Pending = 0,
    Fulfilled = 1,
    Rejected = 2,
}

impl_enum_tag!(PromiseStatus, "PromiseStatus", [Pending, Fulfilled, Rejected]);

/// Promise capability triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseCapability<R> {
    /// Derived promise
    pub promise: R,
    /// Its resolve function
    pub resolve: R,
    /// Its reject function
    pub reject: R,
}

impl<R: Copy> PromiseCapability<R> {
    /// Rewrite into another address space
    pub fn try_map<S, E>(&self, mut f: impl FnMut(R) -> Result<S, E>) -> Result<PromiseCapability<S>, E> {
        Ok(PromiseCapability {
            promise: f(self.promise)?,
            resolve: f(self.resolve)?,
            reject: f(self.reject)?,
        })
    }
}

/// A registered `then` reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseReaction<R> {
    /// Handler function
    pub handler: R,
    /// Capability of the derived promise
    pub capability: PromiseCapability<R>,
}

impl<R: Copy> PromiseReaction<R> {
    /// Rewrite into another address space
    pub fn try_map<S, E>(&self, mut f: impl FnMut(R) -> Result<S, E>) -> Result<PromiseReaction<S>, E> {
        Ok(PromiseReaction {
            handler: f(self.handler)?,
            capability: self.capability.try_map(f)?,
        })
    }

    fn refs(&self) -> [R; 4] {
        [
            self.handler,
            self.capability.promise,
            self.capability.resolve,
            self.capability.reject,
        ]
    }
}

/// Promise state
#[derive(Debug, Clone, PartialEq)]
pub struct PromiseInfo {
    /// Lifecycle state
    pub status: PromiseStatus,
    /// A rejection handler was attached
    pub is_handled: bool,
    /// Settled value
    pub result: SnapVar,
    /// Pending fulfil reactions
    pub resolve_reactions: Vec<PromiseReaction<PtrId>>,
    /// Pending reject reactions
    pub reject_reactions: Vec<PromiseReaction<PtrId>>,
}

/// A promise resolve or reject function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiseResolveOrRejectInfo {
    /// Promise being settled
    pub promise: PtrId,
    /// Reject rather than resolve
    pub is_reject: bool,
    /// Shared already-resolved flag
    pub already_resolved: bool,
}

/// A queued reaction job
#[derive(Debug, Clone, PartialEq)]
pub struct PromiseReactionTaskInfo {
    /// Reaction to run
    pub reaction: PromiseReaction<PtrId>,
    /// Settled value passed to it
    pub argument: SnapVar,
}

/// A `Promise.all` element resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromiseAllResolveElementInfo {
    /// Aggregate capability
    pub capability: PromiseCapability<PtrId>,
    /// Element index
    pub index: u32,
    /// Shared remaining-elements counter
    pub remaining_elements: u32,
    /// Shared values array
    pub values: PtrId,
    /// Resolver already ran
    pub already_called: bool,
}

/// Kind-specific object data
#[derive(Debug, Clone, PartialEq, Default)]
#[allow(missing_docs)]
pub enum ObjectPayload {
    #[default]
    None,
    ScriptFunction(ScriptFunctionInfo),
    ExternalFunction { display_name: SnapVar },
    RevokerFunction { proxy: Option<PtrId> },
    BoundFunction(BoundFunctionInfo),
    HeapArguments(HeapArgumentsInfo),
    BoxedValue(SnapVar),
    Date(f64),
    Regex(RegexInfo),
    Array(ArrayInfo<SnapVar>),
    NativeIntArray(ArrayInfo<i32>),
    NativeFloatArray(ArrayInfo<f64>),
    ES5Array(ES5ArrayInfo),
    ArrayBuffer(Vec<u8>),
    TypedArray(TypedArrayInfo),
    Set(Vec<SnapVar>),
    Map(Vec<(SnapVar, SnapVar)>),
    Proxy { handler: Option<PtrId>, target: Option<PtrId> },
    Promise(PromiseInfo),
    PromiseResolveOrReject(PromiseResolveOrRejectInfo),
    PromiseReactionTask(PromiseReactionTaskInfo),
    PromiseAllResolveElement(PromiseAllResolveElementInfo),
}

fn push_var(out: &mut Vec<PtrId>, v: &SnapVar) {
    if let Some(id) = v.reference() {
        out.push(id);
    }
}

impl ObjectPayload {
    /// Objects that must exist before this object can be allocated
    pub fn construction_refs(&self) -> Vec<PtrId> {
        let mut out = Vec::new();
        match self {
            ObjectPayload::ExternalFunction { display_name } => push_var(&mut out, display_name),
            ObjectPayload::RevokerFunction { proxy } => out.extend(proxy.iter().copied()),
            ObjectPayload::BoundFunction(b) => {
                out.push(b.target);
                push_var(&mut out, &b.bound_this);
                b.args.iter().for_each(|a| push_var(&mut out, a));
            }
            ObjectPayload::HeapArguments(h) => out.extend(h.frame_object.iter().copied()),
            ObjectPayload::Regex(r) => push_var(&mut out, &r.last_index),
            ObjectPayload::TypedArray(t) => out.push(t.buffer),
            ObjectPayload::Proxy { handler, target } => {
                out.extend(handler.iter().copied());
                out.extend(target.iter().copied());
            }
            ObjectPayload::PromiseResolveOrReject(p) => out.push(p.promise),
            ObjectPayload::PromiseReactionTask(t) => {
                out.extend(t.reaction.refs());
                push_var(&mut out, &t.argument);
            }
            ObjectPayload::PromiseAllResolveElement(p) => {
                out.push(p.capability.promise);
                out.push(p.capability.resolve);
                out.push(p.capability.reject);
                out.push(p.values);
            }
            _ => {}
        }
        out.retain(|id| id.is_valid());
        out
    }

    /// Every object this payload references, at construction or later
    pub fn all_refs(&self) -> Vec<PtrId> {
        let mut out = self.construction_refs();
        match self {
            ObjectPayload::ScriptFunction(f) => {
                out.extend(f.home_object.iter().copied());
                push_var(&mut out, &f.computed_name);
            }
            ObjectPayload::BoxedValue(v) => push_var(&mut out, v),
            ObjectPayload::Array(a) => a.entries.iter().for_each(|(_, v)| push_var(&mut out, v)),
            ObjectPayload::ES5Array(a) => {
                a.elements
                    .entries
                    .iter()
                    .for_each(|(_, v)| push_var(&mut out, v));
                for acc in &a.accessors {
                    out.extend(acc.getter.iter().copied());
                    out.extend(acc.setter.iter().copied());
                }
            }
            ObjectPayload::Set(values) => values.iter().for_each(|v| push_var(&mut out, v)),
            ObjectPayload::Map(entries) => {
                for (k, v) in entries {
                    push_var(&mut out, k);
                    push_var(&mut out, v);
                }
            }
            ObjectPayload::Promise(p) => {
                push_var(&mut out, &p.result);
                for r in p.resolve_reactions.iter().chain(p.reject_reactions.iter()) {
                    out.extend(r.refs());
                }
            }
            _ => {}
        }
        out.retain(|id| id.is_valid());
        out
    }

    /// Function body and scope chain a script function points at
    pub fn function_refs(&self) -> (Option<PtrId>, Option<PtrId>) {
        match self {
            ObjectPayload::ScriptFunction(f) => (Some(f.body_id), f.scope_id),
            _ => (None, None),
        }
    }
}

/// A general heap object
#[derive(Debug, Clone, PartialEq)]
pub struct SnapObject {
    /// Address at extraction; unique within one snapshot
    pub object_ptr_id: PtrId,
    /// Kind
    pub object_tag: SnapObjectType,
    /// Shared type
    pub type_id: TypeId,
    /// Set for runtime singletons, which are resolved rather than rebuilt
    pub optional_well_known_token: Option<WellKnownToken>,
    /// Slot contents in handler order
    pub slot_values: Vec<SnapVar>,
    /// Array holding indexed properties
    pub optional_indexed_array_id: Option<PtrId>,
    /// Boundary tag
    pub log_tag: LogTag,
    /// Identity stable across snapshots
    pub identity_tag: IdentityTag,
    /// Objects to inflate first
    pub depends_on: Vec<PtrId>,
    /// Kind-specific data
    pub payload: ObjectPayload,
}

impl SnapObject {
    /// True for runtime singletons
    pub fn is_well_known(&self) -> bool {
        self.optional_well_known_token.is_some()
    }

    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        let ops = object_kind_ops(self.object_tag)
            .ok_or(TtdError::UnhandledObject(self.object_ptr_id))?;
        w.write_record_start(sep)?;
        w.adjust_indent(1);
        w.write_addr(Key::PtrId, self.object_ptr_id.0, Separator::None)?;
        w.write_tag(Key::ObjectType, self.object_tag, Separator::Comma)?;
        w.write_addr(Key::TypeId, self.type_id.0, Separator::Comma)?;
        emit_well_known(w, self.optional_well_known_token.as_ref())?;
        emit_var_array(w, Key::Slots, &self.slot_values, Separator::CommaAndBigSpace)?;
        emit_opt_ptr(w, Key::IndexedArrayId, self.optional_indexed_array_id, Separator::CommaAndBigSpace)?;
        w.write_log_tag(self.log_tag.0, Separator::Comma)?;
        w.write_identity_tag(self.identity_tag.0, Separator::Comma)?;
        emit_ptr_array(w, Key::DependsOn, &self.depends_on, Separator::Comma)?;
        if let Some(emit_extra) = ops.emit_extra {
            emit_extra(&self.payload, w)?;
        }
        w.adjust_indent(-1);
        w.write_record_end(Separator::BigSpace)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let object_ptr_id = PtrId(r.read_addr(Key::PtrId, false)?);
        let object_tag: SnapObjectType = r.read_tag(Key::ObjectType, true)?;
        let ops = object_kind_ops(object_tag).ok_or(TtdError::UnhandledObject(object_ptr_id))?;
        let type_id = TypeId(r.read_addr(Key::TypeId, true)?);
        let optional_well_known_token = parse_well_known(r)?;
        let slot_values = parse_var_array(r, Key::Slots, true)?;
        let optional_indexed_array_id = parse_opt_ptr(r, Key::IndexedArrayId, true)?;
        let log_tag = LogTag(r.read_log_tag(true)?);
        let identity_tag = IdentityTag(r.read_identity_tag(true)?);
        let depends_on = parse_ptr_array(r, Key::DependsOn, true)?;
        let payload = match ops.parse_extra {
            Some(parse_extra) => parse_extra(r)?,
            None => ObjectPayload::None,
        };
        r.read_record_end()?;
        Ok(Self {
            object_ptr_id,
            object_tag,
            type_id,
            optional_well_known_token,
            slot_values,
            optional_indexed_array_id,
            log_tag,
            identity_tag,
            depends_on,
            payload,
        })
    }
}

/// Live-heap context an object is allocated into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstructBase {
    /// Inflated type
    pub type_ptr: LivePtr,
    /// Global object of the owning context
    pub context: LivePtr,
}

/// Allocates the live object for a snapshot object
pub type InflateFn =
    fn(&SnapObject, ConstructBase, &InflateMap, &mut dyn HeapBuilder) -> TtdResult<LivePtr>;

/// Wires references once every object exists
pub type AdditionalFn = fn(&SnapObject, LivePtr, &InflateMap, &mut dyn HeapBuilder) -> TtdResult<()>;

/// Writes the kind payload
pub type EmitExtraFn = fn(&ObjectPayload, &mut dyn Writer) -> TtdResult<()>;

/// Reads the kind payload
pub type ParseExtraFn = fn(&mut dyn Reader) -> TtdResult<ObjectPayload>;

/// Dispatch entry for one object kind
pub struct ObjectKindOps {
    /// Allocation
    pub inflate: Option<InflateFn>,
    /// Second-pass wiring
    pub additional_instantiation: Option<AdditionalFn>,
    /// Payload output
    pub emit_extra: Option<EmitExtraFn>,
    /// Payload input
    pub parse_extra: Option<ParseExtraFn>,
    /// A previous session's object of this kind may be recycled in place
    pub reusable: bool,
}

static PLAIN_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_plain),
    additional_instantiation: None,
    emit_extra: None,
    parse_extra: None,
    reusable: true,
};

static WELL_KNOWN_OPS: ObjectKindOps = ObjectKindOps {
    inflate: None,
    additional_instantiation: None,
    emit_extra: None,
    parse_extra: None,
    reusable: true,
};

static SCRIPT_FUNCTION_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_script_function),
    additional_instantiation: Some(additional_script_function),
    emit_extra: Some(emit_script_function),
    parse_extra: Some(parse_script_function),
    reusable: true,
};

static EXTERNAL_FUNCTION_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_external_function),
    additional_instantiation: None,
    emit_extra: Some(emit_external_function),
    parse_extra: Some(parse_external_function),
    reusable: false,
};

static REVOKER_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_revoker),
    additional_instantiation: None,
    emit_extra: Some(emit_revoker),
    parse_extra: Some(parse_revoker),
    reusable: false,
};

static BOUND_FUNCTION_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_bound_function),
    additional_instantiation: None,
    emit_extra: Some(emit_bound_function),
    parse_extra: Some(parse_bound_function),
    reusable: false,
};

static HEAP_ARGUMENTS_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_heap_arguments),
    additional_instantiation: None,
    emit_extra: Some(emit_heap_arguments),
    parse_extra: Some(parse_heap_arguments),
    reusable: false,
};

static BOXED_VALUE_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_plain),
    additional_instantiation: Some(additional_boxed_value),
    emit_extra: Some(emit_boxed_value),
    parse_extra: Some(parse_boxed_value),
    reusable: false,
};

static DATE_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_date),
    additional_instantiation: None,
    emit_extra: Some(emit_date),
    parse_extra: Some(parse_date),
    reusable: false,
};

static REGEX_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_regex),
    additional_instantiation: None,
    emit_extra: Some(emit_regex),
    parse_extra: Some(parse_regex),
    reusable: false,
};

static ARRAY_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_array),
    additional_instantiation: Some(additional_array),
    emit_extra: Some(emit_array),
    parse_extra: Some(parse_array),
    reusable: false,
};

static NATIVE_INT_ARRAY_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_array),
    additional_instantiation: Some(additional_array),
    emit_extra: Some(emit_native_int_array),
    parse_extra: Some(parse_native_int_array),
    reusable: false,
};

static NATIVE_FLOAT_ARRAY_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_array),
    additional_instantiation: Some(additional_array),
    emit_extra: Some(emit_native_float_array),
    parse_extra: Some(parse_native_float_array),
    reusable: false,
};

static ES5_ARRAY_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_array),
    additional_instantiation: Some(additional_array),
    emit_extra: Some(emit_es5_array),
    parse_extra: Some(parse_es5_array),
    reusable: false,
};

static ARRAY_BUFFER_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_array_buffer),
    additional_instantiation: None,
    emit_extra: Some(emit_array_buffer),
    parse_extra: Some(parse_array_buffer),
    reusable: false,
};

static TYPED_ARRAY_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_typed_array),
    additional_instantiation: None,
    emit_extra: Some(emit_typed_array),
    parse_extra: Some(parse_typed_array),
    reusable: false,
};

static SET_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_plain),
    additional_instantiation: Some(additional_set),
    emit_extra: Some(emit_set),
    parse_extra: Some(parse_set),
    reusable: false,
};

static MAP_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_plain),
    additional_instantiation: Some(additional_map),
    emit_extra: Some(emit_map),
    parse_extra: Some(parse_map),
    reusable: false,
};

static PROXY_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_proxy),
    additional_instantiation: None,
    emit_extra: Some(emit_proxy),
    parse_extra: Some(parse_proxy),
    reusable: false,
};

static PROMISE_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_plain),
    additional_instantiation: Some(additional_promise),
    emit_extra: Some(emit_promise),
    parse_extra: Some(parse_promise),
    reusable: false,
};

static PROMISE_RESOLVE_OR_REJECT_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_promise_resolve_or_reject),
    additional_instantiation: None,
    emit_extra: Some(emit_promise_resolve_or_reject),
    parse_extra: Some(parse_promise_resolve_or_reject),
    reusable: false,
};

static PROMISE_REACTION_TASK_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_promise_reaction_task),
    additional_instantiation: None,
    emit_extra: Some(emit_promise_reaction_task),
    parse_extra: Some(parse_promise_reaction_task),
    reusable: false,
};

static PROMISE_ALL_RESOLVE_ELEMENT_OPS: ObjectKindOps = ObjectKindOps {
    inflate: Some(inflate_promise_all_resolve_element),
    additional_instantiation: None,
    emit_extra: Some(emit_promise_all_resolve_element),
    parse_extra: Some(parse_promise_all_resolve_element),
    reusable: false,
};

/// Dispatch entry for `tag`, `None` for kinds that cannot be handled
pub fn object_kind_ops(tag: SnapObjectType) -> Option<&'static ObjectKindOps> {
    use SnapObjectType as T;
    Some(match tag {
        T::Invalid | T::Unhandled => return None,
        T::Dynamic
        | T::External
        | T::RuntimeFunction
        | T::Activation
        | T::BlockActivation
        | T::PseudoActivation
        | T::ConsoleScopeActivation
        | T::Error => &PLAIN_OPS,
        T::ScriptFunction => &SCRIPT_FUNCTION_OPS,
        T::ExternalFunction => &EXTERNAL_FUNCTION_OPS,
        T::RuntimeRevokerFunction => &REVOKER_OPS,
        T::BoundFunction => &BOUND_FUNCTION_OPS,
        T::HeapArguments | T::ES5HeapArguments => &HEAP_ARGUMENTS_OPS,
        T::BoxedValue => &BOXED_VALUE_OPS,
        T::Date => &DATE_OPS,
        T::Regex => &REGEX_OPS,
        T::Array => &ARRAY_OPS,
        T::NativeIntArray => &NATIVE_INT_ARRAY_OPS,
        T::NativeFloatArray => &NATIVE_FLOAT_ARRAY_OPS,
        T::ES5Array => &ES5_ARRAY_OPS,
        T::ArrayBuffer => &ARRAY_BUFFER_OPS,
        T::TypedArray => &TYPED_ARRAY_OPS,
        T::Set => &SET_OPS,
        T::Map => &MAP_OPS,
        T::Proxy => &PROXY_OPS,
        T::Promise => &PROMISE_OPS,
        T::PromiseResolveOrRejectFunction => &PROMISE_RESOLVE_OR_REJECT_OPS,
        T::PromiseReactionTaskFunction => &PROMISE_REACTION_TASK_OPS,
        T::PromiseAllResolveElementFunction => &PROMISE_ALL_RESOLVE_ELEMENT_OPS,
        T::WellKnown => &WELL_KNOWN_OPS,
    })
}

fn payload_mismatch(obj: &SnapObject) -> TtdError {
    TtdError::UnhandledObject(obj.object_ptr_id)
}

fn emit_mismatch() -> TtdError {
    TtdError::PolicyViolation("object payload does not match its tag")
}

fn construct(
    obj: &SnapObject,
    base: ConstructBase,
    builder: &mut dyn HeapBuilder,
    kind: ConstructKind,
) -> TtdResult<LivePtr> {
    builder.construct(&ConstructShape {
        tag: obj.object_tag,
        type_ptr: base.type_ptr,
        context: base.context,
        kind,
    })
}

fn live_opt(map: &InflateMap, id: Option<PtrId>) -> TtdResult<Option<LivePtr>> {
    id.map(|id| map.lookup_object(id)).transpose()
}

fn live_reaction(
    map: &InflateMap,
    reaction: &PromiseReaction<PtrId>,
) -> TtdResult<PromiseReaction<LivePtr>> {
    reaction.try_map(|id| map.lookup_object(id))
}

fn inflate_plain(
    obj: &SnapObject,
    base: ConstructBase,
    _map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    construct(obj, base, builder, ConstructKind::Plain)
}

fn inflate_script_function(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::ScriptFunction(f) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let body = map.lookup_function_body(f.body_id)?;
    construct(
        obj,
        base,
        builder,
        ConstructKind::ScriptFunction {
            body,
            has_super_reference: f.has_super_reference,
        },
    )
}

fn additional_script_function(
    obj: &SnapObject,
    live: LivePtr,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<()> {
    let ObjectPayload::ScriptFunction(f) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let scope = f
        .scope_id
        .map(|id| map.lookup_environment(id))
        .transpose()?;
    let values = AdditionalValues::ScriptFunction {
        scope,
        home_object: live_opt(map, f.home_object)?,
        computed_name: map.inflate_var(f.computed_name)?,
    };
    builder.instantiate_additional(live, values)
}

fn emit_script_function(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::ScriptFunction(f) = payload else {
        return Err(emit_mismatch());
    };
    w.write_addr(Key::FunctionBodyId, f.body_id.0, Separator::Comma)?;
    emit_opt_ptr(w, Key::ScopeId, f.scope_id, Separator::Comma)?;
    emit_opt_ptr(w, Key::HomeObject, f.home_object, Separator::Comma)?;
    w.write_key(Key::ComputedName, Separator::Comma)?;
    f.computed_name.emit(w, Separator::None)?;
    w.write_bool(Key::HasSuperReference, f.has_super_reference, Separator::Comma)
}

fn parse_script_function(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    let body_id = PtrId(r.read_addr(Key::FunctionBodyId, true)?);
    let scope_id = parse_opt_ptr(r, Key::ScopeId, true)?;
    let home_object = parse_opt_ptr(r, Key::HomeObject, true)?;
    r.read_key(Key::ComputedName, true)?;
    let computed_name = SnapVar::parse(r, false)?;
    let has_super_reference = r.read_bool(Key::HasSuperReference, true)?;
    Ok(ObjectPayload::ScriptFunction(ScriptFunctionInfo {
        body_id,
        scope_id,
        home_object,
        computed_name,
        has_super_reference,
    }))
}

fn inflate_external_function(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::ExternalFunction { display_name } = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let display_name = map.inflate_var(*display_name)?;
    construct(obj, base, builder, ConstructKind::ExternalFunction { display_name })
}

fn emit_external_function(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::ExternalFunction { display_name } = payload else {
        return Err(emit_mismatch());
    };
    w.write_key(Key::Name, Separator::Comma)?;
    display_name.emit(w, Separator::None)
}

fn parse_external_function(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    r.read_key(Key::Name, true)?;
    Ok(ObjectPayload::ExternalFunction {
        display_name: SnapVar::parse(r, false)?,
    })
}

fn inflate_revoker(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::RevokerFunction { proxy } = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let proxy = live_opt(map, *proxy)?;
    construct(obj, base, builder, ConstructKind::RevokerFunction { proxy })
}

fn emit_revoker(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::RevokerFunction { proxy } = payload else {
        return Err(emit_mismatch());
    };
    emit_opt_ptr(w, Key::Proxy, *proxy, Separator::Comma)
}

fn parse_revoker(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::RevokerFunction {
        proxy: parse_opt_ptr(r, Key::Proxy, true)?,
    })
}

fn inflate_bound_function(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::BoundFunction(b) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::BoundFunction {
        target: map.lookup_object(b.target)?,
        bound_this: map.inflate_var(b.bound_this)?,
        args: b
            .args
            .iter()
            .map(|a| map.inflate_var(*a))
            .collect::<TtdResult<Vec<_>>>()?,
    };
    construct(obj, base, builder, kind)
}

fn emit_bound_function(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::BoundFunction(b) = payload else {
        return Err(emit_mismatch());
    };
    w.write_addr(Key::Target, b.target.0, Separator::Comma)?;
    w.write_key(Key::BoundThis, Separator::Comma)?;
    b.bound_this.emit(w, Separator::None)?;
    emit_var_array(w, Key::Arguments, &b.args, Separator::Comma)
}

fn parse_bound_function(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    let target = PtrId(r.read_addr(Key::Target, true)?);
    r.read_key(Key::BoundThis, true)?;
    let bound_this = SnapVar::parse(r, false)?;
    let args = parse_var_array(r, Key::Arguments, true)?;
    Ok(ObjectPayload::BoundFunction(BoundFunctionInfo {
        target,
        bound_this,
        args,
    }))
}

fn inflate_heap_arguments(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::HeapArguments(h) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::HeapArguments {
        number_of_arguments: h.number_of_arguments,
        formal_count: h.formal_count,
        frame_object: live_opt(map, h.frame_object)?,
        deleted_args: h.deleted_args.clone(),
    };
    construct(obj, base, builder, kind)
}

fn emit_heap_arguments(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::HeapArguments(h) = payload else {
        return Err(emit_mismatch());
    };
    w.write_uint32(Key::NumberOfArgs, h.number_of_arguments, Separator::Comma)?;
    w.write_uint32(Key::FormalCount, h.formal_count, Separator::Comma)?;
    emit_opt_ptr(w, Key::FrameObject, h.frame_object, Separator::Comma)?;
    w.write_record_start_named(Key::DeletedArgs, Separator::Comma)?;
    w.write_length_value(h.deleted_args.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, deleted) in h.deleted_args.iter().enumerate() {
        w.write_naked_bool(*deleted, Separator::comma_if(i != 0))?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

fn parse_heap_arguments(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    let number_of_arguments = r.read_uint32(Key::NumberOfArgs, true)?;
    let formal_count = r.read_uint32(Key::FormalCount, true)?;
    let frame_object = parse_opt_ptr(r, Key::FrameObject, true)?;
    r.read_record_start_named(Key::DeletedArgs, true)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut deleted_args = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        deleted_args.push(r.read_naked_bool(i != 0)?);
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(ObjectPayload::HeapArguments(HeapArgumentsInfo {
        number_of_arguments,
        formal_count,
        frame_object,
        deleted_args,
    }))
}

fn additional_boxed_value(
    obj: &SnapObject,
    live: LivePtr,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<()> {
    let ObjectPayload::BoxedValue(v) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    builder.instantiate_additional(live, AdditionalValues::BoxedValue(map.inflate_var(*v)?))
}

fn emit_boxed_value(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::BoxedValue(v) = payload else {
        return Err(emit_mismatch());
    };
    w.write_key(Key::Value, Separator::Comma)?;
    v.emit(w, Separator::None)
}

fn parse_boxed_value(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    r.read_key(Key::Value, true)?;
    Ok(ObjectPayload::BoxedValue(SnapVar::parse(r, false)?))
}

fn inflate_date(
    obj: &SnapObject,
    base: ConstructBase,
    _map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::Date(t) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    construct(obj, base, builder, ConstructKind::Date(*t))
}

fn emit_date(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::Date(t) = payload else {
        return Err(emit_mismatch());
    };
    w.write_double(Key::DoubleVal, *t, Separator::Comma)
}

fn parse_date(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::Date(r.read_double(Key::DoubleVal, true)?))
}

fn inflate_regex(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::Regex(re) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::Regex {
        pattern: re.pattern.clone(),
        flags: re.flags,
        last_index: map.inflate_var(re.last_index)?,
    };
    construct(obj, base, builder, kind)
}

fn emit_regex(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::Regex(re) = payload else {
        return Err(emit_mismatch());
    };
    w.write_string(Key::Pattern, &re.pattern, Separator::Comma)?;
    w.write_uint32(Key::Flags, re.flags, Separator::Comma)?;
    w.write_key(Key::LastIndex, Separator::Comma)?;
    re.last_index.emit(w, Separator::None)
}

fn parse_regex(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    let pattern = r.read_string(Key::Pattern, true)?;
    let flags = r.read_uint32(Key::Flags, true)?;
    r.read_key(Key::LastIndex, true)?;
    let last_index = SnapVar::parse(r, false)?;
    Ok(ObjectPayload::Regex(RegexInfo {
        pattern,
        flags,
        last_index,
    }))
}

fn array_length(payload: &ObjectPayload) -> Option<u32> {
    match payload {
        ObjectPayload::Array(a) => Some(a.length),
        ObjectPayload::NativeIntArray(a) => Some(a.length),
        ObjectPayload::NativeFloatArray(a) => Some(a.length),
        ObjectPayload::ES5Array(a) => Some(a.elements.length),
        _ => None,
    }
}

fn inflate_array(
    obj: &SnapObject,
    base: ConstructBase,
    _map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let length = array_length(&obj.payload).ok_or_else(|| payload_mismatch(obj))?;
    construct(obj, base, builder, ConstructKind::Array { length })
}

fn live_elements(map: &InflateMap, info: &ArrayInfo<SnapVar>) -> TtdResult<Vec<(u32, LiveValue)>> {
    info.entries
        .iter()
        .map(|(i, v)| Ok((*i, map.inflate_var(*v)?)))
        .collect()
}

fn additional_array(
    obj: &SnapObject,
    live: LivePtr,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<()> {
    let values = match &obj.payload {
        ObjectPayload::Array(a) => AdditionalValues::Elements(live_elements(map, a)?),
        ObjectPayload::NativeIntArray(a) => AdditionalValues::IntElements(a.entries.clone()),
        ObjectPayload::NativeFloatArray(a) => AdditionalValues::FloatElements(a.entries.clone()),
        ObjectPayload::ES5Array(a) => AdditionalValues::ES5Array {
            elements: live_elements(map, &a.elements)?,
            accessors: a
                .accessors
                .iter()
                .map(|acc| {
                    Ok(AccessorEntry {
                        index: acc.index,
                        getter: live_opt(map, acc.getter)?,
                        setter: live_opt(map, acc.setter)?,
                        attributes: acc.attributes,
                    })
                })
                .collect::<TtdResult<Vec<_>>>()?,
            is_length_writable: a.is_length_writable,
        },
        _ => return Err(payload_mismatch(obj)),
    };
    builder.instantiate_additional(live, values)
}

fn emit_array_info<T>(
    w: &mut dyn Writer,
    info: &ArrayInfo<T>,
    mut emit_value: impl FnMut(&mut dyn Writer, &T) -> TtdResult<()>,
) -> TtdResult<()> {
    w.write_uint32(Key::Length, info.length, Separator::Comma)?;
    w.write_length_value(info.entries.len() as u32, Separator::Comma)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, (index, value)) in info.entries.iter().enumerate() {
        w.write_record_start(Separator::comma_if(i != 0))?;
        w.write_uint32(Key::Index, *index, Separator::None)?;
        emit_value(w, value)?;
        w.write_record_end(Separator::None)?;
    }
    w.write_sequence_end(Separator::None)
}

fn parse_array_info<T>(
    r: &mut dyn Reader,
    mut parse_value: impl FnMut(&mut dyn Reader) -> TtdResult<T>,
) -> TtdResult<ArrayInfo<T>> {
    let length = r.read_uint32(Key::Length, true)?;
    let count = r.read_length_value(true)?;
    r.read_sequence_start_default_key(true)?;
    let mut entries = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        r.read_record_start(i != 0)?;
        let index = r.read_uint32(Key::Index, false)?;
        let value = parse_value(r)?;
        r.read_record_end()?;
        entries.push((index, value));
    }
    r.read_sequence_end()?;
    Ok(ArrayInfo { length, entries })
}

fn emit_var_value(w: &mut dyn Writer, v: &SnapVar) -> TtdResult<()> {
    w.write_key(Key::Value, Separator::Comma)?;
    v.emit(w, Separator::None)
}

fn parse_var_value(r: &mut dyn Reader) -> TtdResult<SnapVar> {
    r.read_key(Key::Value, true)?;
    SnapVar::parse(r, false)
}

fn emit_array(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::Array(a) = payload else {
        return Err(emit_mismatch());
    };
    emit_array_info(w, a, emit_var_value)
}

fn parse_array(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::Array(parse_array_info(r, parse_var_value)?))
}

fn emit_native_int_array(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::NativeIntArray(a) = payload else {
        return Err(emit_mismatch());
    };
    emit_array_info(w, a, |w, v| w.write_int32(Key::Value, *v, Separator::Comma))
}

fn parse_native_int_array(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::NativeIntArray(parse_array_info(r, |r| {
        r.read_int32(Key::Value, true)
    })?))
}

fn emit_native_float_array(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::NativeFloatArray(a) = payload else {
        return Err(emit_mismatch());
    };
    emit_array_info(w, a, |w, v| w.write_double(Key::Value, *v, Separator::Comma))
}

fn parse_native_float_array(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::NativeFloatArray(parse_array_info(r, |r| {
        r.read_double(Key::Value, true)
    })?))
}

fn emit_es5_array(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::ES5Array(a) = payload else {
        return Err(emit_mismatch());
    };
    emit_array_info(w, &a.elements, emit_var_value)?;
    w.write_bool(Key::IsLengthWritable, a.is_length_writable, Separator::Comma)?;
    w.write_record_start_named(Key::Accessors, Separator::Comma)?;
    w.write_length_value(a.accessors.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, acc) in a.accessors.iter().enumerate() {
        w.write_record_start(Separator::comma_if(i != 0))?;
        w.write_uint32(Key::Index, acc.index, Separator::None)?;
        emit_opt_ptr(w, Key::Getter, acc.getter, Separator::Comma)?;
        emit_opt_ptr(w, Key::Setter, acc.setter, Separator::Comma)?;
        w.write_byte(Key::Attributes, acc.attributes, Separator::Comma)?;
        w.write_record_end(Separator::None)?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

fn parse_es5_array(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    let elements = parse_array_info(r, parse_var_value)?;
    let is_length_writable = r.read_bool(Key::IsLengthWritable, true)?;
    r.read_record_start_named(Key::Accessors, true)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut accessors = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        r.read_record_start(i != 0)?;
        let index = r.read_uint32(Key::Index, false)?;
        let getter = parse_opt_ptr(r, Key::Getter, true)?;
        let setter = parse_opt_ptr(r, Key::Setter, true)?;
        let attributes = r.read_byte(Key::Attributes, true)?;
        r.read_record_end()?;
        accessors.push(AccessorEntry {
            index,
            getter,
            setter,
            attributes,
        });
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(ObjectPayload::ES5Array(ES5ArrayInfo {
        elements,
        accessors,
        is_length_writable,
    }))
}

fn inflate_array_buffer(
    obj: &SnapObject,
    base: ConstructBase,
    _map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::ArrayBuffer(bytes) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    construct(obj, base, builder, ConstructKind::ArrayBuffer(bytes.clone()))
}

fn emit_array_buffer(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::ArrayBuffer(bytes) = payload else {
        return Err(emit_mismatch());
    };
    w.write_record_start_named(Key::Bytes, Separator::Comma)?;
    w.write_length_value(bytes.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, b) in bytes.iter().enumerate() {
        w.write_naked_byte(*b, Separator::comma_if(i != 0))?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

fn parse_array_buffer(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    r.read_record_start_named(Key::Bytes, true)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut bytes = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        bytes.push(r.read_naked_byte(i != 0)?);
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(ObjectPayload::ArrayBuffer(bytes))
}

fn inflate_typed_array(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::TypedArray(t) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::TypedArray {
        buffer: map.lookup_object(t.buffer)?,
        byte_offset: t.byte_offset,
        length: t.length,
    };
    construct(obj, base, builder, kind)
}

fn emit_typed_array(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::TypedArray(t) = payload else {
        return Err(emit_mismatch());
    };
    w.write_uint32(Key::ByteOffset, t.byte_offset, Separator::Comma)?;
    w.write_uint32(Key::Length, t.length, Separator::Comma)?;
    w.write_addr(Key::Buffer, t.buffer.0, Separator::Comma)
}

fn parse_typed_array(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::TypedArray(TypedArrayInfo {
        byte_offset: r.read_uint32(Key::ByteOffset, true)?,
        length: r.read_uint32(Key::Length, true)?,
        buffer: PtrId(r.read_addr(Key::Buffer, true)?),
    }))
}

fn additional_set(
    obj: &SnapObject,
    live: LivePtr,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<()> {
    let ObjectPayload::Set(values) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let values = values
        .iter()
        .map(|v| map.inflate_var(*v))
        .collect::<TtdResult<Vec<_>>>()?;
    builder.instantiate_additional(live, AdditionalValues::SetValues(values))
}

fn emit_set(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::Set(values) = payload else {
        return Err(emit_mismatch());
    };
    emit_var_array(w, Key::Values, values, Separator::Comma)
}

fn parse_set(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::Set(parse_var_array(r, Key::Values, true)?))
}

fn additional_map(
    obj: &SnapObject,
    live: LivePtr,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<()> {
    let ObjectPayload::Map(entries) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let entries = entries
        .iter()
        .map(|(k, v)| Ok((map.inflate_var(*k)?, map.inflate_var(*v)?)))
        .collect::<TtdResult<Vec<_>>>()?;
    builder.instantiate_additional(live, AdditionalValues::MapEntries(entries))
}

fn emit_map(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::Map(entries) = payload else {
        return Err(emit_mismatch());
    };
    w.write_length_value(entries.len() as u32, Separator::Comma)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, (k, v)) in entries.iter().enumerate() {
        w.write_record_start(Separator::comma_if(i != 0))?;
        w.write_key(Key::Index, Separator::None)?;
        k.emit(w, Separator::None)?;
        w.write_key(Key::Value, Separator::Comma)?;
        v.emit(w, Separator::None)?;
        w.write_record_end(Separator::None)?;
    }
    w.write_sequence_end(Separator::None)
}

fn parse_map(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    let count = r.read_length_value(true)?;
    r.read_sequence_start_default_key(true)?;
    let mut entries = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        r.read_record_start(i != 0)?;
        r.read_key(Key::Index, false)?;
        let k = SnapVar::parse(r, false)?;
        r.read_key(Key::Value, true)?;
        let v = SnapVar::parse(r, false)?;
        r.read_record_end()?;
        entries.push((k, v));
    }
    r.read_sequence_end()?;
    Ok(ObjectPayload::Map(entries))
}

fn inflate_proxy(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::Proxy { handler, target } = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::Proxy {
        handler: live_opt(map, *handler)?,
        target: live_opt(map, *target)?,
    };
    construct(obj, base, builder, kind)
}

fn emit_proxy(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::Proxy { handler, target } = payload else {
        return Err(emit_mismatch());
    };
    emit_opt_ptr(w, Key::Handler, *handler, Separator::Comma)?;
    emit_opt_ptr(w, Key::Target, *target, Separator::Comma)
}

fn parse_proxy(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::Proxy {
        handler: parse_opt_ptr(r, Key::Handler, true)?,
        target: parse_opt_ptr(r, Key::Target, true)?,
    })
}

fn emit_capability(w: &mut dyn Writer, cap: &PromiseCapability<PtrId>, sep: Separator) -> TtdResult<()> {
    w.write_record_start_named(Key::Capability, sep)?;
    w.write_addr(Key::Promise, cap.promise.0, Separator::None)?;
    w.write_addr(Key::Resolve, cap.resolve.0, Separator::Comma)?;
    w.write_addr(Key::Reject, cap.reject.0, Separator::Comma)?;
    w.write_record_end(Separator::None)
}

fn parse_capability(r: &mut dyn Reader, read_sep: bool) -> TtdResult<PromiseCapability<PtrId>> {
    r.read_record_start_named(Key::Capability, read_sep)?;
    let cap = PromiseCapability {
        promise: PtrId(r.read_addr(Key::Promise, false)?),
        resolve: PtrId(r.read_addr(Key::Resolve, true)?),
        reject: PtrId(r.read_addr(Key::Reject, true)?),
    };
    r.read_record_end()?;
    Ok(cap)
}

fn emit_reaction(w: &mut dyn Writer, reaction: &PromiseReaction<PtrId>, sep: Separator) -> TtdResult<()> {
    w.write_record_start(sep)?;
    w.write_addr(Key::Handler, reaction.handler.0, Separator::None)?;
    emit_capability(w, &reaction.capability, Separator::Comma)?;
    w.write_record_end(Separator::None)
}

fn parse_reaction(r: &mut dyn Reader, read_sep: bool) -> TtdResult<PromiseReaction<PtrId>> {
    r.read_record_start(read_sep)?;
    let handler = PtrId(r.read_addr(Key::Handler, false)?);
    let capability = parse_capability(r, true)?;
    r.read_record_end()?;
    Ok(PromiseReaction {
        handler,
        capability,
    })
}

fn emit_reactions(w: &mut dyn Writer, key: Key, reactions: &[PromiseReaction<PtrId>]) -> TtdResult<()> {
    w.write_record_start_named(key, Separator::Comma)?;
    w.write_length_value(reactions.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    for (i, reaction) in reactions.iter().enumerate() {
        emit_reaction(w, reaction, Separator::comma_if(i != 0))?;
    }
    w.write_sequence_end(Separator::None)?;
    w.write_record_end(Separator::None)
}

fn parse_reactions(r: &mut dyn Reader, key: Key) -> TtdResult<Vec<PromiseReaction<PtrId>>> {
    r.read_record_start_named(key, true)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut reactions = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        reactions.push(parse_reaction(r, i != 0)?);
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(reactions)
}

fn additional_promise(
    obj: &SnapObject,
    live: LivePtr,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<()> {
    let ObjectPayload::Promise(p) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let values = AdditionalValues::Promise {
        status: p.status,
        is_handled: p.is_handled,
        result: map.inflate_var(p.result)?,
        resolve_reactions: p
            .resolve_reactions
            .iter()
            .map(|r| live_reaction(map, r))
            .collect::<TtdResult<Vec<_>>>()?,
        reject_reactions: p
            .reject_reactions
            .iter()
            .map(|r| live_reaction(map, r))
            .collect::<TtdResult<Vec<_>>>()?,
    };
    builder.instantiate_additional(live, values)
}

fn emit_promise(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::Promise(p) = payload else {
        return Err(emit_mismatch());
    };
    w.write_tag(Key::Status, p.status, Separator::Comma)?;
    w.write_bool(Key::IsHandled, p.is_handled, Separator::Comma)?;
    w.write_key(Key::Result, Separator::Comma)?;
    p.result.emit(w, Separator::None)?;
    emit_reactions(w, Key::ResolveReactions, &p.resolve_reactions)?;
    emit_reactions(w, Key::RejectReactions, &p.reject_reactions)
}

fn parse_promise(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    let status = r.read_tag(Key::Status, true)?;
    let is_handled = r.read_bool(Key::IsHandled, true)?;
    r.read_key(Key::Result, true)?;
    let result = SnapVar::parse(r, false)?;
    let resolve_reactions = parse_reactions(r, Key::ResolveReactions)?;
    let reject_reactions = parse_reactions(r, Key::RejectReactions)?;
    Ok(ObjectPayload::Promise(PromiseInfo {
        status,
        is_handled,
        result,
        resolve_reactions,
        reject_reactions,
    }))
}

fn inflate_promise_resolve_or_reject(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::PromiseResolveOrReject(p) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::PromiseResolveOrReject {
        promise: map.lookup_object(p.promise)?,
        is_reject: p.is_reject,
        already_resolved: p.already_resolved,
    };
    construct(obj, base, builder, kind)
}

fn emit_promise_resolve_or_reject(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::PromiseResolveOrReject(p) = payload else {
        return Err(emit_mismatch());
    };
    w.write_addr(Key::Promise, p.promise.0, Separator::Comma)?;
    w.write_bool(Key::IsReject, p.is_reject, Separator::Comma)?;
    w.write_bool(Key::AlreadyResolved, p.already_resolved, Separator::Comma)
}

fn parse_promise_resolve_or_reject(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::PromiseResolveOrReject(
        PromiseResolveOrRejectInfo {
            promise: PtrId(r.read_addr(Key::Promise, true)?),
            is_reject: r.read_bool(Key::IsReject, true)?,
            already_resolved: r.read_bool(Key::AlreadyResolved, true)?,
        },
    ))
}

fn inflate_promise_reaction_task(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::PromiseReactionTask(t) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::PromiseReactionTask {
        reaction: live_reaction(map, &t.reaction)?,
        argument: map.inflate_var(t.argument)?,
    };
    construct(obj, base, builder, kind)
}

fn emit_promise_reaction_task(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::PromiseReactionTask(t) = payload else {
        return Err(emit_mismatch());
    };
    w.write_key(Key::Reaction, Separator::Comma)?;
    emit_reaction(w, &t.reaction, Separator::None)?;
    w.write_key(Key::Argument, Separator::Comma)?;
    t.argument.emit(w, Separator::None)
}

fn parse_promise_reaction_task(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    r.read_key(Key::Reaction, true)?;
    let reaction = parse_reaction(r, false)?;
    r.read_key(Key::Argument, true)?;
    let argument = SnapVar::parse(r, false)?;
    Ok(ObjectPayload::PromiseReactionTask(PromiseReactionTaskInfo {
        reaction,
        argument,
    }))
}

fn inflate_promise_all_resolve_element(
    obj: &SnapObject,
    base: ConstructBase,
    map: &InflateMap,
    builder: &mut dyn HeapBuilder,
) -> TtdResult<LivePtr> {
    let ObjectPayload::PromiseAllResolveElement(p) = &obj.payload else {
        return Err(payload_mismatch(obj));
    };
    let kind = ConstructKind::PromiseAllResolveElement {
        capability: p.capability.try_map(|id| map.lookup_object(id))?,
        index: p.index,
        remaining_elements: p.remaining_elements,
        values: map.lookup_object(p.values)?,
        already_called: p.already_called,
    };
    construct(obj, base, builder, kind)
}

fn emit_promise_all_resolve_element(payload: &ObjectPayload, w: &mut dyn Writer) -> TtdResult<()> {
    let ObjectPayload::PromiseAllResolveElement(p) = payload else {
        return Err(emit_mismatch());
    };
    emit_capability(w, &p.capability, Separator::Comma)?;
    w.write_uint32(Key::Index, p.index, Separator::Comma)?;
    w.write_uint32(Key::RemainingElements, p.remaining_elements, Separator::Comma)?;
    w.write_addr(Key::Values, p.values.0, Separator::Comma)?;
    w.write_bool(Key::AlreadyCalled, p.already_called, Separator::Comma)
}

fn parse_promise_all_resolve_element(r: &mut dyn Reader) -> TtdResult<ObjectPayload> {
    Ok(ObjectPayload::PromiseAllResolveElement(
        PromiseAllResolveElementInfo {
            capability: parse_capability(r, true)?,
            index: r.read_uint32(Key::Index, true)?,
            remaining_elements: r.read_uint32(Key::RemainingElements, true)?,
            values: PtrId(r.read_addr(Key::Values, true)?),
            already_called: r.read_bool(Key::AlreadyCalled, true)?,
        },
    ))
}

/// Convert a snapshot var that must be a plain value (no reference)
pub fn plain_value(v: SnapVar) -> Option<LiveValue> {
    match v {
        Var::Ref(_) => None,
        Var::Invalid => Some(Var::Invalid),
        Var::Int(i) => Some(Var::Int(i)),
        Var::Number(n) => Some(Var::Number(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::EnumTag;

    #[test]
    fn test_unhandled_tags_have_no_ops() {
        assert!(object_kind_ops(SnapObjectType::Invalid).is_none());
        assert!(object_kind_ops(SnapObjectType::Unhandled).is_none());
        for tag in 2..=32 {
            let tag = SnapObjectType::from_tag(tag).unwrap();
            assert!(object_kind_ops(tag).is_some(), "{:?}", tag);
        }
    }

    #[test]
    fn test_construction_refs_skip_deferred() {
        let bound = ObjectPayload::BoundFunction(BoundFunctionInfo {
            target: PtrId(16),
            bound_this: Var::Ref(PtrId(32)),
            args: vec![Var::Int(1), Var::Ref(PtrId(48))],
        });
        assert_eq!(
            bound.construction_refs(),
            vec![PtrId(16), PtrId(32), PtrId(48)]
        );

        let set = ObjectPayload::Set(vec![Var::Ref(PtrId(64))]);
        assert!(set.construction_refs().is_empty());
        assert_eq!(set.all_refs(), vec![PtrId(64)]);
    }

    #[test]
    fn test_script_function_refs() {
        let f = ObjectPayload::ScriptFunction(ScriptFunctionInfo {
            body_id: PtrId(8),
            scope_id: Some(PtrId(24)),
            home_object: Some(PtrId(40)),
            computed_name: Var::Invalid,
            has_super_reference: false,
        });
        assert_eq!(f.function_refs(), (Some(PtrId(8)), Some(PtrId(24))));
        assert!(f.construction_refs().is_empty());
        assert_eq!(f.all_refs(), vec![PtrId(40)]);
    }

    #[test]
    fn test_promise_refs() {
        let reaction = PromiseReaction {
            handler: PtrId(1),
            capability: PromiseCapability {
                promise: PtrId(2),
                resolve: PtrId(3),
                reject: PtrId(4),
            },
        };
        let task = ObjectPayload::PromiseReactionTask(PromiseReactionTaskInfo {
            reaction,
            argument: Var::Number(1.0),
        });
        assert_eq!(
            task.construction_refs(),
            vec![PtrId(1), PtrId(2), PtrId(3), PtrId(4)]
        );
        let mapped = reaction.try_map(|id| Ok::<_, ()>(id.0 * 10)).unwrap();
        assert_eq!(mapped.capability.reject, 40);
    }

    #[test]
    fn test_plain_value() {
        assert_eq!(plain_value(Var::Int(3)), Some(Var::Int(3)));
        assert_eq!(plain_value(Var::Ref(PtrId(8))), None);
    }
}
