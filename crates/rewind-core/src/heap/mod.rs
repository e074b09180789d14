//! Boundary between the engine and a live heap
//!
//! Extraction reads the heap through [`HeapWalker`]; inflation rebuilds it
//! through [`HeapBuilder`]. Addresses handed out by the walker become the
//! snapshot's `PtrId`s unchanged, so the two spaces share a numeric domain
//! but never mix: inflated objects get fresh addresses recorded in the
//! [`InflateMap`](crate::inflate_map::InflateMap).

pub mod reference;
pub mod runtime;

use crate::error::TtdResult;
use crate::snapshot::{
    AccessorEntry, FunctionBodyResolveInfo, HandlerId, IdentityTag, LogTag, ObjectPayload,
    PrimitivePayload, PromiseCapability, PromiseReaction, PromiseStatus, PtrId, ScopeType,
    ScriptFunctionScopeInfo, SlotArrayInfo, SnapContext, SnapHandler, SnapObjectType,
    SnapPrimitiveValue, SnapType, SnapVar, TopLevelScripts, TypeId, Var, WellKnownToken,
};
use std::fmt;

pub use reference::ReferenceHeap;
pub use runtime::{Behavior, HostCall, HostFunction, Invocation};

/// Address of a cell in a live heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LivePtr(pub u64);

impl fmt::Display for LivePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<LivePtr> for PtrId {
    fn from(ptr: LivePtr) -> Self {
        PtrId(ptr.0)
    }
}

impl From<PtrId> for LivePtr {
    fn from(id: PtrId) -> Self {
        LivePtr(id.0)
    }
}

/// A slot value in the live heap
pub type LiveValue = Var<LivePtr>;

/// Extraction view of a live value
pub fn snap_value(v: LiveValue) -> SnapVar {
    v.map_ref(PtrId::from)
}

/// What a reachable cell is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Boxed number, string, boolean or symbol
    Primitive,
    /// Anything with a [`SnapObjectType`]
    Object,
}

/// Everything a builder needs to allocate one object
#[derive(Debug, Clone, PartialEq)]
pub struct ConstructShape {
    /// Object kind
    pub tag: SnapObjectType,
    /// Inflated type
    pub type_ptr: LivePtr,
    /// Global object of the owning context
    pub context: LivePtr,
    /// Kind-specific construction data
    pub kind: ConstructKind,
}

/// Construction data that must be present when an object is allocated
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ConstructKind {
    Plain,
    ScriptFunction {
        body: LivePtr,
        has_super_reference: bool,
    },
    ExternalFunction {
        display_name: LiveValue,
    },
    RevokerFunction {
        proxy: Option<LivePtr>,
    },
    BoundFunction {
        target: LivePtr,
        bound_this: LiveValue,
        args: Vec<LiveValue>,
    },
    HeapArguments {
        number_of_arguments: u32,
        formal_count: u32,
        frame_object: Option<LivePtr>,
        deleted_args: Vec<bool>,
    },
    Date(f64),
    Regex {
        pattern: String,
        flags: u32,
        last_index: LiveValue,
    },
    Array {
        length: u32,
    },
    ArrayBuffer(Vec<u8>),
    TypedArray {
        buffer: LivePtr,
        byte_offset: u32,
        length: u32,
    },
    Proxy {
        handler: Option<LivePtr>,
        target: Option<LivePtr>,
    },
    PromiseResolveOrReject {
        promise: LivePtr,
        is_reject: bool,
        already_resolved: bool,
    },
    PromiseReactionTask {
        reaction: PromiseReaction<LivePtr>,
        argument: LiveValue,
    },
    PromiseAllResolveElement {
        capability: PromiseCapability<LivePtr>,
        index: u32,
        remaining_elements: u32,
        values: LivePtr,
        already_called: bool,
    },
}

/// References wired after every object in a snapshot exists
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum AdditionalValues {
    ScriptFunction {
        scope: Option<LivePtr>,
        home_object: Option<LivePtr>,
        computed_name: LiveValue,
    },
    BoxedValue(LiveValue),
    Elements(Vec<(u32, LiveValue)>),
    IntElements(Vec<(u32, i32)>),
    FloatElements(Vec<(u32, f64)>),
    ES5Array {
        elements: Vec<(u32, LiveValue)>,
        accessors: Vec<AccessorEntry<LivePtr>>,
        is_length_writable: bool,
    },
    SetValues(Vec<LiveValue>),
    MapEntries(Vec<(LiveValue, LiveValue)>),
    Promise {
        status: PromiseStatus,
        is_handled: bool,
        result: LiveValue,
        resolve_reactions: Vec<PromiseReaction<LivePtr>>,
        reject_reactions: Vec<PromiseReaction<LivePtr>>,
    },
}

/// Read-only access to a live heap for extraction
pub trait HeapWalker {
    /// Every live script context, with its roots
    fn contexts(&self) -> TtdResult<Vec<SnapContext>>;

    /// Long-lived references and live call-stack arguments outside any context
    fn extra_roots(&self) -> TtdResult<Vec<LivePtr>>;

    /// Kind of a reachable cell
    fn cell_kind(&self, ptr: LivePtr) -> TtdResult<CellKind>;

    /// Object kind
    fn object_tag(&self, ptr: LivePtr) -> TtdResult<SnapObjectType>;

    /// Singleton path, if the cell is a runtime singleton
    fn well_known_token(&self, ptr: LivePtr) -> TtdResult<Option<WellKnownToken>>;

    /// Type of an object or primitive
    fn type_of(&self, ptr: LivePtr) -> TtdResult<TypeId>;

    /// Type descriptor
    fn describe_type(&self, id: TypeId) -> TtdResult<SnapType>;

    /// Handler descriptor
    fn describe_handler(&self, id: HandlerId) -> TtdResult<SnapHandler>;

    /// Slot contents in handler order
    fn read_slots(&self, ptr: LivePtr) -> TtdResult<Vec<SnapVar>>;

    /// Separate storage for indexed properties
    fn indexed_array(&self, ptr: LivePtr) -> TtdResult<Option<PtrId>>;

    /// Kind payload
    fn read_payload(&self, ptr: LivePtr) -> TtdResult<ObjectPayload>;

    /// Primitive value
    fn read_primitive(&self, ptr: LivePtr) -> TtdResult<PrimitivePayload>;

    /// Log and identity tags of a cell
    fn object_tags(&self, ptr: LivePtr) -> TtdResult<(LogTag, IdentityTag)>;

    /// Compiled body metadata
    fn describe_function_body(&self, id: PtrId) -> TtdResult<FunctionBodyResolveInfo>;

    /// Scope chain
    fn describe_scope(&self, id: PtrId) -> TtdResult<ScriptFunctionScopeInfo>;

    /// Closure slots
    fn describe_slot_array(&self, id: PtrId) -> TtdResult<SlotArrayInfo>;

    /// Used and reserved bytes
    fn memory_stats(&self) -> (u64, u64) {
        (0, 0)
    }
}

/// Mutating access to a live heap for inflation
pub trait HeapBuilder {
    /// True if a context was created or destroyed since the last inflate,
    /// which makes the previous session's objects unsafe to reuse
    fn context_created_or_destroyed_in_replay(&self) -> bool;

    /// Drop every context before a fresh inflate
    fn unload_contexts(&mut self) -> TtdResult<()>;

    /// Create the context, or reset an existing one with the same tag; returns its global object
    fn inflate_context(&mut self, ctx: &SnapContext, scripts: &TopLevelScripts) -> TtdResult<LivePtr>;

    /// Create a property-layout handler
    fn construct_handler(&mut self, handler: &SnapHandler) -> TtdResult<LivePtr>;

    /// Create a type; the prototype is set later
    fn construct_type(
        &mut self,
        ty: &SnapType,
        handler: Option<LivePtr>,
        context: LivePtr,
    ) -> TtdResult<LivePtr>;

    /// Wire a type's prototype
    fn set_type_prototype(&mut self, ty: LivePtr, prototype: LiveValue) -> TtdResult<()>;

    /// Find or recompile a function body
    fn construct_function_body(
        &mut self,
        info: &FunctionBodyResolveInfo,
        parent: Option<LivePtr>,
        context: LivePtr,
        scripts: &TopLevelScripts,
    ) -> TtdResult<LivePtr>;

    /// Allocate a primitive value
    fn construct_primitive(&mut self, value: &SnapPrimitiveValue, ty: LivePtr) -> TtdResult<LivePtr>;

    /// Look up a runtime singleton in a context
    fn resolve_well_known(&mut self, context: LivePtr, token: &WellKnownToken) -> TtdResult<LivePtr>;

    /// True if `ptr` is still a live object of kind `tag` that can be recycled
    fn can_reuse_object(&self, ptr: LivePtr, tag: SnapObjectType) -> bool;

    /// Clear an existing object back to an empty object of type `ty`
    fn reset_object(&mut self, ptr: LivePtr, ty: LivePtr) -> TtdResult<()>;

    /// Allocate an object
    fn construct(&mut self, shape: &ConstructShape) -> TtdResult<LivePtr>;

    /// Restore boundary and identity tags
    fn set_object_tags(&mut self, ptr: LivePtr, log_tag: LogTag, identity_tag: IdentityTag) -> TtdResult<()>;

    /// Allocate closure slots with their values
    fn construct_slot_array(
        &mut self,
        info: &SlotArrayInfo,
        values: Vec<LiveValue>,
        body: Option<LivePtr>,
    ) -> TtdResult<LivePtr>;

    /// Allocate a scope chain
    fn construct_scope(
        &mut self,
        info: &ScriptFunctionScopeInfo,
        entries: Vec<(ScopeType, LivePtr)>,
    ) -> TtdResult<LivePtr>;

    /// Wire deferred references
    fn instantiate_additional(&mut self, ptr: LivePtr, values: AdditionalValues) -> TtdResult<()>;

    /// Write slot contents and indexed storage
    fn restore_slots(
        &mut self,
        ptr: LivePtr,
        values: Vec<LiveValue>,
        indexed: Option<LivePtr>,
    ) -> TtdResult<()>;

    /// Re-register a context's long-lived roots
    fn relink_roots(&mut self, context: LivePtr, roots: &[(LivePtr, LogTag)]) -> TtdResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_ptr_conversions() {
        let live = LivePtr(0x40);
        let id: PtrId = live.into();
        assert_eq!(id, PtrId(0x40));
        assert_eq!(LivePtr::from(id), live);
        assert_eq!(live.to_string(), "0x40");
    }

    #[test]
    fn test_snap_value() {
        assert_eq!(snap_value(Var::Ref(LivePtr(16))), Var::Ref(PtrId(16)));
        assert_eq!(snap_value(Var::Int(4)), Var::Int(4));
    }
}
