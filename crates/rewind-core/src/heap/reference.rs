//! In-memory heap for tests, benchmarks and the CLI demo
//!
//! Cells live in a hash map keyed by address; addresses are handed out by a
//! bump counter and never reused, so pointers held by a stale inflate map can
//! never alias a newer cell. Each context owns its global object, the builtin
//! prototypes and the singleton primitives. Script bodies are not interpreted:
//! a body's name selects a registered native behavior that runs in its place
//! (see [`runtime`](super::runtime)).

use super::runtime::{Behavior, HostFunction};
use super::{
    snap_value, AdditionalValues, CellKind, ConstructKind, ConstructShape, HeapBuilder, HeapWalker,
    LivePtr, LiveValue,
};
use crate::error::{TtdError, TtdResult};
use crate::inflate_map::InflateMap;
use crate::snapshot::{
    ArrayInfo, BoundFunctionInfo, ES5ArrayInfo, FunctionBodyResolveInfo, HandlerEntry, HandlerId,
    HeapArgumentsInfo, IdentityTag, JsTypeTag, LoadedBody, LogTag, ObjectPayload,
    PrimitivePayload, PromiseAllResolveElementInfo, PromiseCapability, PromiseInfo,
    PromiseReaction, PromiseReactionTaskInfo, PromiseResolveOrRejectInfo, PromiseStatus,
    PropertyId, PtrId, RegexInfo, ScopeEntry, ScopeType, ScriptFunctionInfo,
    ScriptFunctionScopeInfo, SlotArrayInfo, SlotKind, SnapContext, SnapHandler, SnapObjectType,
    SnapPrimitiveValue, SnapRoot, SnapType, SnapVar, TopLevelScripts, TypeId, TypedArrayInfo, Var,
    WellKnownToken,
};
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const CELL_ALIGN: u64 = 16;
const FIRST_ADDR: u64 = 0x1000;

/// Set on every property id derived from a name; symbol ids never have it
pub const NAMED_PROPERTY_BIT: u32 = 0x8000_0000;

/// Writable, enumerable, configurable
pub const DEFAULT_ATTRIBUTES: u8 = 0x7;

/// Token of a context's global object
pub const GLOBAL: &str = "global";
/// Token of `Object.prototype`
pub const OBJECT_PROTOTYPE: &str = "Object.prototype";
/// Token of `Function.prototype`
pub const FUNCTION_PROTOTYPE: &str = "Function.prototype";
/// Token of `Array.prototype`
pub const ARRAY_PROTOTYPE: &str = "Array.prototype";

pub(super) const UNDEFINED: &str = "undefined";
pub(super) const NULL: &str = "null";
pub(super) const TRUE: &str = "true";
pub(super) const FALSE: &str = "false";

/// Property id for a named property
///
/// Derived from a digest of the name so ids are stable across processes and
/// platforms, which persisted logs rely on.
pub fn property_id(name: &str) -> PropertyId {
    let digest = Sha256::digest(name.as_bytes());
    let low = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    PropertyId(low | NAMED_PROPERTY_BIT)
}

#[derive(Debug, Clone)]
pub(super) struct ObjectCell {
    pub(super) tag: SnapObjectType,
    pub(super) type_ptr: LivePtr,
    pub(super) context: LivePtr,
    pub(super) well_known: Option<WellKnownToken>,
    pub(super) slots: Vec<LiveValue>,
    pub(super) indexed: Option<LivePtr>,
    pub(super) payload: ObjectPayload,
    pub(super) log_tag: LogTag,
    pub(super) identity_tag: IdentityTag,
}

impl ObjectCell {
    fn new(tag: SnapObjectType, type_ptr: LivePtr, context: LivePtr, payload: ObjectPayload) -> Self {
        Self {
            tag,
            type_ptr,
            context,
            well_known: None,
            slots: Vec::new(),
            indexed: None,
            payload,
            log_tag: LogTag::INVALID,
            identity_tag: IdentityTag::INVALID,
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct PrimitiveCell {
    pub(super) type_ptr: LivePtr,
    pub(super) context: LivePtr,
    pub(super) well_known: Option<WellKnownToken>,
    pub(super) payload: PrimitivePayload,
    pub(super) log_tag: LogTag,
}

#[derive(Debug, Clone)]
pub(super) struct TypeCell {
    pub(super) js_type: JsTypeTag,
    pub(super) context: LivePtr,
    pub(super) prototype: LiveValue,
    pub(super) handler: LivePtr,
    pub(super) has_no_enumerable_properties: bool,
}

#[derive(Debug, Clone)]
pub(super) struct HandlerCell {
    inline_slot_capacity: u32,
    total_slot_capacity: u32,
    is_extensible: bool,
    pub(super) entries: Vec<HandlerEntry>,
}

impl HandlerCell {
    fn empty() -> Self {
        Self {
            inline_slot_capacity: 0,
            total_slot_capacity: 0,
            is_extensible: true,
            entries: Vec::new(),
        }
    }

    pub(super) fn slot_of(&self, pid: PropertyId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.property_id == pid && e.kind != SlotKind::Clear)
    }
}

#[derive(Debug, Clone)]
pub(super) struct BodyCell {
    pub(super) context: LivePtr,
    pub(super) name: String,
    known_path: Option<WellKnownToken>,
    parent: Option<LivePtr>,
    pub(super) top_level_body_counter: u64,
    line: u32,
    column: u32,
}

#[derive(Debug, Clone)]
pub(super) struct ScopeCell {
    context: LivePtr,
    pub(super) entries: Vec<(ScopeType, LivePtr)>,
}

#[derive(Debug, Clone)]
pub(super) struct SlotArrayCell {
    context: LivePtr,
    pub(super) slots: Vec<LiveValue>,
    debug_property_ids: Vec<PropertyId>,
    body: Option<LivePtr>,
}

#[derive(Debug, Clone)]
pub(super) enum Cell {
    Object(ObjectCell),
    Primitive(PrimitiveCell),
    Type(TypeCell),
    Handler(HandlerCell),
    Body(BodyCell),
    Scope(ScopeCell),
    SlotArray(SlotArrayCell),
}

impl Cell {
    fn refs(&self, out: &mut Vec<LivePtr>) {
        fn push_var(out: &mut Vec<LivePtr>, v: &LiveValue) {
            out.extend(v.reference());
        }
        match self {
            Cell::Object(o) => {
                out.push(o.type_ptr);
                out.push(o.context);
                o.slots.iter().for_each(|v| push_var(out, v));
                out.extend(o.indexed);
                out.extend(o.payload.all_refs().into_iter().map(LivePtr::from));
                let (body, scope) = o.payload.function_refs();
                out.extend(body.map(LivePtr::from));
                out.extend(scope.map(LivePtr::from));
            }
            Cell::Primitive(p) => {
                out.push(p.type_ptr);
                out.push(p.context);
            }
            Cell::Type(t) => {
                out.push(t.context);
                out.push(t.handler);
                push_var(out, &t.prototype);
            }
            Cell::Handler(_) => {}
            Cell::Body(b) => {
                out.push(b.context);
                out.extend(b.parent);
            }
            Cell::Scope(s) => {
                out.push(s.context);
                out.extend(s.entries.iter().map(|(_, p)| *p));
            }
            Cell::SlotArray(s) => {
                out.push(s.context);
                s.slots.iter().for_each(|v| push_var(out, v));
                out.extend(s.body);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct ContextState {
    pub(super) tag: LogTag,
    uri: String,
    pub(super) global: LivePtr,
    pub(super) random_seed0: u64,
    pub(super) random_seed1: u64,
    builtins: FxHashMap<String, LivePtr>,
    default_types: FxHashMap<JsTypeTag, LivePtr>,
    pub(super) loaded: Vec<LoadedBody>,
    pending_loads: Vec<LoadedBody>,
}

/// Collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Collections run
    pub collections: usize,
    /// Cells freed across all collections
    pub cells_freed: usize,
    /// Time spent collecting
    pub total_pause_time: Duration,
}

/// Reference implementation of [`HeapWalker`] and [`HeapBuilder`]
pub struct ReferenceHeap {
    pub(super) cells: FxHashMap<LivePtr, Cell>,
    next_addr: u64,
    pub(super) contexts: Vec<ContextState>,
    pub(super) roots: FxHashMap<LogTag, LivePtr>,
    transitions: FxHashMap<(LivePtr, PropertyId), LivePtr>,
    pub(super) context_churn: bool,

    pub(super) behaviors: FxHashMap<String, Behavior>,
    pub(super) host_functions: FxHashMap<String, HostFunction>,
    pub(super) callbacks: FxHashMap<i64, LogTag>,
    pub(super) pending_exception: Option<LiveValue>,
    pub(super) call_depth: i32,
    pub(super) open_calls: Vec<i64>,

    gc_stats: GcStats,
}

impl fmt::Debug for ReferenceHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceHeap")
            .field("cells", &self.cells.len())
            .field("contexts", &self.contexts.len())
            .field("roots", &self.roots.len())
            .field("behaviors", &self.behaviors.len())
            .field("host_functions", &self.host_functions.len())
            .field("call_depth", &self.call_depth)
            .finish()
    }
}

impl Default for ReferenceHeap {
    fn default() -> Self {
        Self::new()
    }
}

pub(super) fn not_a(ptr: LivePtr, what: &str) -> TtdError {
    TtdError::Host(format!("cell {} is not a {}", ptr, what))
}

fn snap_capability(c: &PromiseCapability<LivePtr>) -> PromiseCapability<PtrId> {
    PromiseCapability {
        promise: c.promise.into(),
        resolve: c.resolve.into(),
        reject: c.reject.into(),
    }
}

fn snap_reaction(r: &PromiseReaction<LivePtr>) -> PromiseReaction<PtrId> {
    PromiseReaction {
        handler: r.handler.into(),
        capability: snap_capability(&r.capability),
    }
}

fn snap_elements(elements: Vec<(u32, LiveValue)>) -> Vec<(u32, SnapVar)> {
    elements.into_iter().map(|(i, v)| (i, snap_value(v))).collect()
}

impl ReferenceHeap {
    /// Empty heap with no contexts
    pub fn new() -> Self {
        Self {
            cells: FxHashMap::default(),
            next_addr: FIRST_ADDR,
            contexts: Vec::new(),
            roots: FxHashMap::default(),
            transitions: FxHashMap::default(),
            context_churn: false,
            behaviors: FxHashMap::default(),
            host_functions: FxHashMap::default(),
            callbacks: FxHashMap::default(),
            pending_exception: None,
            call_depth: 0,
            open_calls: Vec::new(),
            gc_stats: GcStats::default(),
        }
    }

    // ---- cells ----

    fn reserve(&mut self) -> LivePtr {
        let ptr = LivePtr(self.next_addr);
        self.next_addr += CELL_ALIGN;
        ptr
    }

    pub(super) fn alloc(&mut self, cell: Cell) -> LivePtr {
        let ptr = self.reserve();
        self.cells.insert(ptr, cell);
        ptr
    }

    /// Live cell count
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// True if `ptr` is a live object
    pub fn is_object(&self, ptr: LivePtr) -> bool {
        matches!(self.cells.get(&ptr), Some(Cell::Object(_)))
    }

    pub(super) fn object(&self, ptr: LivePtr) -> TtdResult<&ObjectCell> {
        match self.cells.get(&ptr) {
            Some(Cell::Object(o)) => Ok(o),
            _ => Err(not_a(ptr, "object")),
        }
    }

    pub(super) fn object_mut(&mut self, ptr: LivePtr) -> TtdResult<&mut ObjectCell> {
        match self.cells.get_mut(&ptr) {
            Some(Cell::Object(o)) => Ok(o),
            _ => Err(not_a(ptr, "object")),
        }
    }

    pub(super) fn primitive(&self, ptr: LivePtr) -> Option<&PrimitiveCell> {
        match self.cells.get(&ptr) {
            Some(Cell::Primitive(p)) => Some(p),
            _ => None,
        }
    }

    pub(super) fn type_cell(&self, ptr: LivePtr) -> TtdResult<&TypeCell> {
        match self.cells.get(&ptr) {
            Some(Cell::Type(t)) => Ok(t),
            _ => Err(not_a(ptr, "type")),
        }
    }

    fn type_cell_mut(&mut self, ptr: LivePtr) -> TtdResult<&mut TypeCell> {
        match self.cells.get_mut(&ptr) {
            Some(Cell::Type(t)) => Ok(t),
            _ => Err(not_a(ptr, "type")),
        }
    }

    pub(super) fn handler_cell(&self, ptr: LivePtr) -> TtdResult<&HandlerCell> {
        match self.cells.get(&ptr) {
            Some(Cell::Handler(h)) => Ok(h),
            _ => Err(not_a(ptr, "handler")),
        }
    }

    pub(super) fn body_cell(&self, ptr: LivePtr) -> TtdResult<&BodyCell> {
        match self.cells.get(&ptr) {
            Some(Cell::Body(b)) => Ok(b),
            _ => Err(not_a(ptr, "function body")),
        }
    }

    pub(super) fn scope_cell(&self, ptr: LivePtr) -> TtdResult<&ScopeCell> {
        match self.cells.get(&ptr) {
            Some(Cell::Scope(s)) => Ok(s),
            _ => Err(not_a(ptr, "scope")),
        }
    }

    pub(super) fn slot_array_cell(&self, ptr: LivePtr) -> TtdResult<&SlotArrayCell> {
        match self.cells.get(&ptr) {
            Some(Cell::SlotArray(s)) => Ok(s),
            _ => Err(not_a(ptr, "slot array")),
        }
    }

    pub(super) fn slot_array_cell_mut(&mut self, ptr: LivePtr) -> TtdResult<&mut SlotArrayCell> {
        match self.cells.get_mut(&ptr) {
            Some(Cell::SlotArray(s)) => Ok(s),
            _ => Err(not_a(ptr, "slot array")),
        }
    }

    // ---- contexts ----

    pub(super) fn context_index(&self, tag: LogTag) -> TtdResult<usize> {
        self.contexts
            .iter()
            .position(|c| c.tag == tag)
            .ok_or_else(|| TtdError::Host(format!("unknown context {}", tag)))
    }

    pub(super) fn context_index_of_global(&self, global: LivePtr) -> TtdResult<usize> {
        self.contexts
            .iter()
            .position(|c| c.global == global)
            .ok_or_else(|| TtdError::Host(format!("{} is not a context global", global)))
    }

    fn context_tag_of(&self, global: LivePtr) -> TtdResult<LogTag> {
        Ok(self.contexts[self.context_index_of_global(global)?].tag)
    }

    /// Global object of a context
    pub fn context_global(&self, ctx: LogTag) -> TtdResult<LivePtr> {
        Ok(self.contexts[self.context_index(ctx)?].global)
    }

    /// Tags of every live context, in creation order
    pub fn context_tags(&self) -> Vec<LogTag> {
        self.contexts.iter().map(|c| c.tag).collect()
    }

    pub(super) fn builtin(&self, c: usize, token: &str) -> TtdResult<LivePtr> {
        self.contexts[c]
            .builtins
            .get(token)
            .copied()
            .ok_or(TtdError::MissingInflateTarget {
                what: "well-known object",
                id: 0,
            })
    }

    fn new_type(&mut self, context: LivePtr, js_type: JsTypeTag, prototype: LiveValue) -> LivePtr {
        let handler = self.alloc(Cell::Handler(HandlerCell::empty()));
        self.alloc(Cell::Type(TypeCell {
            js_type,
            context,
            prototype,
            handler,
            has_no_enumerable_properties: true,
        }))
    }

    pub(super) fn default_type(&mut self, c: usize, js_type: JsTypeTag) -> TtdResult<LivePtr> {
        if let Some(ty) = self.contexts[c].default_types.get(&js_type) {
            return Ok(*ty);
        }
        let prototype = if js_type.is_primitive() {
            Var::Invalid
        } else {
            let token = match js_type {
                JsTypeTag::Function => FUNCTION_PROTOTYPE,
                JsTypeTag::Array | JsTypeTag::NativeIntArray | JsTypeTag::NativeFloatArray => ARRAY_PROTOTYPE,
                _ => OBJECT_PROTOTYPE,
            };
            Var::Ref(self.builtin(c, token)?)
        };
        let global = self.contexts[c].global;
        let ty = self.new_type(global, js_type, prototype);
        self.contexts[c].default_types.insert(js_type, ty);
        Ok(ty)
    }

    fn add_builtin_object(
        &mut self,
        c: usize,
        token: &str,
        tag: SnapObjectType,
        js_type: JsTypeTag,
        prototype: LiveValue,
        at: Option<LivePtr>,
    ) -> LivePtr {
        let global = self.contexts[c].global;
        let ty = self.new_type(global, js_type, prototype);
        let mut cell = ObjectCell::new(tag, ty, global, ObjectPayload::None);
        cell.well_known = Some(WellKnownToken::new(token));
        let ptr = match at {
            Some(ptr) => {
                self.cells.insert(ptr, Cell::Object(cell));
                ptr
            }
            None => self.alloc(Cell::Object(cell)),
        };
        self.contexts[c].builtins.insert(token.to_string(), ptr);
        ptr
    }

    fn add_builtin_primitive(&mut self, c: usize, token: &str, js_type: JsTypeTag, payload: PrimitivePayload) -> TtdResult<()> {
        let type_ptr = self.default_type(c, js_type)?;
        let global = self.contexts[c].global;
        let ptr = self.alloc(Cell::Primitive(PrimitiveCell {
            type_ptr,
            context: global,
            well_known: Some(WellKnownToken::new(token)),
            payload,
            log_tag: LogTag::INVALID,
        }));
        self.contexts[c].builtins.insert(token.to_string(), ptr);
        Ok(())
    }

    /// Build a context with its builtins; returns its index
    pub(super) fn build_context(&mut self, tag: LogTag, uri: &str, seeds: (u64, u64)) -> TtdResult<usize> {
        let global = self.reserve();
        self.contexts.push(ContextState {
            tag,
            uri: uri.to_string(),
            global,
            random_seed0: seeds.0,
            random_seed1: seeds.1,
            builtins: FxHashMap::default(),
            default_types: FxHashMap::default(),
            loaded: Vec::new(),
            pending_loads: Vec::new(),
        });
        let c = self.contexts.len() - 1;

        let object_prototype = self.add_builtin_object(
            c,
            OBJECT_PROTOTYPE,
            SnapObjectType::Dynamic,
            JsTypeTag::Object,
            Var::Invalid,
            None,
        );
        let proto = Var::Ref(object_prototype);
        self.add_builtin_object(
            c,
            FUNCTION_PROTOTYPE,
            SnapObjectType::RuntimeFunction,
            JsTypeTag::Function,
            proto,
            None,
        );
        self.add_builtin_object(c, ARRAY_PROTOTYPE, SnapObjectType::Dynamic, JsTypeTag::Object, proto, None);
        self.add_builtin_object(
            c,
            GLOBAL,
            SnapObjectType::Dynamic,
            JsTypeTag::GlobalObject,
            proto,
            Some(global),
        );
        // The host names a context's global by the context's own tag
        self.object_mut(global)?.log_tag = tag;
        self.roots.insert(tag, global);

        self.add_builtin_primitive(c, UNDEFINED, JsTypeTag::Undefined, PrimitivePayload::Bool(false))?;
        self.add_builtin_primitive(c, NULL, JsTypeTag::Null, PrimitivePayload::Bool(false))?;
        self.add_builtin_primitive(c, TRUE, JsTypeTag::Boolean, PrimitivePayload::Bool(true))?;
        self.add_builtin_primitive(c, FALSE, JsTypeTag::Boolean, PrimitivePayload::Bool(false))?;
        trace!(context = %tag, global = %global, "context built");
        Ok(c)
    }

    // ---- allocation ----

    pub(super) fn new_primitive(&mut self, c: usize, js_type: JsTypeTag, payload: PrimitivePayload) -> TtdResult<LivePtr> {
        let type_ptr = self.default_type(c, js_type)?;
        let context = self.contexts[c].global;
        Ok(self.alloc(Cell::Primitive(PrimitiveCell {
            type_ptr,
            context,
            well_known: None,
            payload,
            log_tag: LogTag::INVALID,
        })))
    }

    pub(super) fn new_object_cell(
        &mut self,
        c: usize,
        tag: SnapObjectType,
        js_type: JsTypeTag,
        payload: ObjectPayload,
    ) -> TtdResult<LivePtr> {
        let type_ptr = self.default_type(c, js_type)?;
        let context = self.contexts[c].global;
        Ok(self.alloc(Cell::Object(ObjectCell::new(tag, type_ptr, context, payload))))
    }

    pub(super) fn new_body(&mut self, c: usize, name: &str, parent: Option<LivePtr>, counter: u64) -> LivePtr {
        let context = self.contexts[c].global;
        self.alloc(Cell::Body(BodyCell {
            context,
            name: name.to_string(),
            known_path: None,
            parent,
            top_level_body_counter: counter,
            line: 0,
            column: 0,
        }))
    }

    /// Closure slots wrapped in a one-entry scope chain
    pub(super) fn new_closure_scope(&mut self, c: usize, body: LivePtr, captured: Vec<LiveValue>) -> LivePtr {
        let context = self.contexts[c].global;
        let slot_array = self.alloc(Cell::SlotArray(SlotArrayCell {
            context,
            slots: captured,
            debug_property_ids: Vec::new(),
            body: Some(body),
        }));
        self.alloc(Cell::Scope(ScopeCell {
            context,
            entries: vec![(ScopeType::SlotArray, slot_array)],
        }))
    }

    // ---- properties ----

    /// Own property value
    pub fn get_own_property(&self, obj: LivePtr, pid: PropertyId) -> TtdResult<Option<LiveValue>> {
        let cell = self.object(obj)?;
        let handler = self.handler_cell(self.type_cell(cell.type_ptr)?.handler)?;
        Ok(handler
            .slot_of(pid)
            .map(|slot| cell.slots.get(slot).copied().unwrap_or_default()))
    }

    /// Property value found along the prototype chain
    pub fn lookup_property(&self, obj: LivePtr, pid: PropertyId) -> TtdResult<Option<LiveValue>> {
        let mut current = Some(obj);
        let mut visited = FxHashSet::default();
        while let Some(ptr) = current {
            if !visited.insert(ptr) {
                break;
            }
            if let Some(v) = self.get_own_property(ptr, pid)? {
                return Ok(Some(v));
            }
            current = self
                .type_cell(self.object(ptr)?.type_ptr)?
                .prototype
                .reference()
                .filter(|p| self.is_object(*p));
        }
        Ok(None)
    }

    /// Set or add an own property
    pub fn put_property(&mut self, obj: LivePtr, pid: PropertyId, value: LiveValue, attributes: u8) -> TtdResult<()> {
        let type_ptr = self.object(obj)?.type_ptr;
        let handler_ptr = self.type_cell(type_ptr)?.handler;
        let handler = self.handler_cell(handler_ptr)?;
        if let Some(slot) = handler.slot_of(pid) {
            let cell = self.object_mut(obj)?;
            if cell.slots.len() <= slot {
                cell.slots.resize(slot + 1, Var::Invalid);
            }
            cell.slots[slot] = value;
            return Ok(());
        }
        if !handler.is_extensible {
            return Err(TtdError::Host(format!("object {} is not extensible", obj)));
        }
        let slot = handler.entries.len();

        let next_type = match self.transitions.get(&(type_ptr, pid)) {
            Some(ty) if self.cells.contains_key(ty) => *ty,
            _ => {
                let mut entries = handler.entries.clone();
                entries.push(HandlerEntry {
                    property_id: pid,
                    attributes,
                    kind: SlotKind::Data,
                });
                let ty = self.derive_type(type_ptr, entries, None)?;
                self.transitions.insert((type_ptr, pid), ty);
                ty
            }
        };
        let cell = self.object_mut(obj)?;
        cell.type_ptr = next_type;
        cell.slots.resize(slot, Var::Invalid);
        cell.slots.push(value);
        Ok(())
    }

    /// Remove an own property; returns false if it was absent
    pub fn remove_property(&mut self, obj: LivePtr, pid: PropertyId) -> TtdResult<bool> {
        let type_ptr = self.object(obj)?.type_ptr;
        let handler = self.handler_cell(self.type_cell(type_ptr)?.handler)?;
        let Some(slot) = handler.slot_of(pid) else {
            return Ok(false);
        };
        let mut entries = handler.entries.clone();
        entries[slot].kind = SlotKind::Clear;
        let ty = self.derive_type(type_ptr, entries, None)?;
        let cell = self.object_mut(obj)?;
        cell.type_ptr = ty;
        if let Some(v) = cell.slots.get_mut(slot) {
            *v = Var::Invalid;
        }
        Ok(true)
    }

    /// Prototype of an object
    pub fn prototype_of(&self, obj: LivePtr) -> TtdResult<LiveValue> {
        Ok(self.type_cell(self.object(obj)?.type_ptr)?.prototype)
    }

    /// Move an object to a type with a different prototype
    pub fn set_prototype(&mut self, obj: LivePtr, prototype: LiveValue) -> TtdResult<()> {
        let type_ptr = self.object(obj)?.type_ptr;
        let entries = self.handler_cell(self.type_cell(type_ptr)?.handler)?.entries.clone();
        let ty = self.derive_type(type_ptr, entries, Some(prototype))?;
        self.object_mut(obj)?.type_ptr = ty;
        Ok(())
    }

    fn derive_type(&mut self, from: LivePtr, entries: Vec<HandlerEntry>, prototype: Option<LiveValue>) -> TtdResult<LivePtr> {
        let base = self.type_cell(from)?.clone();
        let capacity = entries.len() as u32;
        let handler = self.alloc(Cell::Handler(HandlerCell {
            inline_slot_capacity: capacity,
            total_slot_capacity: capacity,
            is_extensible: true,
            entries,
        }));
        Ok(self.alloc(Cell::Type(TypeCell {
            handler,
            prototype: prototype.unwrap_or(base.prototype),
            has_no_enumerable_properties: false,
            ..base
        })))
    }

    // ---- roots and collection ----

    /// Stop holding an object for the host
    pub fn release(&mut self, tag: LogTag) -> bool {
        self.roots.remove(&tag).is_some()
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> &GcStats {
        &self.gc_stats
    }

    /// Mark from the contexts, the host roots and every pinned pointer, then free the rest
    pub fn collect(&mut self, pins: &InflateMap) -> usize {
        let start = Instant::now();
        let mut stack: Vec<LivePtr> = Vec::new();
        for ctx in &self.contexts {
            stack.push(ctx.global);
            stack.extend(ctx.builtins.values().copied());
            stack.extend(ctx.default_types.values().copied());
            stack.extend(ctx.loaded.iter().map(|b| LivePtr::from(b.function_body_id)));
        }
        stack.extend(self.roots.values().copied());
        stack.extend(self.pending_exception.and_then(|v| v.reference()));
        stack.extend(self.cells.keys().copied().filter(|p| pins.is_pinned(*p)));

        let mut marked: FxHashSet<LivePtr> = FxHashSet::default();
        let mut edges = Vec::new();
        while let Some(ptr) = stack.pop() {
            if !marked.insert(ptr) {
                continue;
            }
            if let Some(cell) = self.cells.get(&ptr) {
                edges.clear();
                cell.refs(&mut edges);
                stack.extend(edges.iter().copied().filter(|p| !marked.contains(p)));
            }
        }

        let before = self.cells.len();
        self.cells.retain(|ptr, _| marked.contains(ptr));
        let cells = &self.cells;
        self.transitions
            .retain(|(from, _), to| cells.contains_key(from) && cells.contains_key(to));
        let freed = before - self.cells.len();

        self.gc_stats.collections += 1;
        self.gc_stats.cells_freed += freed;
        self.gc_stats.total_pause_time += start.elapsed();
        debug!(freed, live = self.cells.len(), "collection complete");
        freed
    }

    // ---- equivalence ----

    /// Address-independent rendering of everything reachable from the contexts and host roots
    ///
    /// Two heaps with equal fingerprints hold the same object graph, property
    /// layout and values, whatever addresses their cells have.
    pub fn fingerprint(&self) -> TtdResult<String> {
        let mut fp = Fingerprinter {
            heap: self,
            ordinals: FxHashMap::default(),
            queue: VecDeque::new(),
            out: String::new(),
        };
        let mut contexts: Vec<&ContextState> = self.contexts.iter().collect();
        contexts.sort_by_key(|c| c.tag);
        for ctx in contexts {
            let global = fp.value(Var::Ref(ctx.global))?;
            let _ = writeln!(fp.out, "context {} {:?} global={}", ctx.tag, ctx.uri, global);
            let mut roots: Vec<(LogTag, LivePtr)> = self
                .roots
                .iter()
                .filter(|(_, p)| self.object(**p).map(|o| o.context == ctx.global).unwrap_or(false))
                .map(|(t, p)| (*t, *p))
                .collect();
            roots.sort();
            for (tag, ptr) in roots {
                let desc = fp.value(Var::Ref(ptr))?;
                let _ = writeln!(fp.out, "root {} = {}", tag, desc);
            }
            fp.drain()?;
        }
        Ok(fp.out)
    }
}

struct Fingerprinter<'h> {
    heap: &'h ReferenceHeap,
    ordinals: FxHashMap<LivePtr, usize>,
    queue: VecDeque<LivePtr>,
    out: String,
}

impl Fingerprinter<'_> {
    fn value(&mut self, v: LiveValue) -> TtdResult<String> {
        Ok(match v {
            Var::Invalid => "<empty>".to_string(),
            Var::Int(i) => format!("i{}", i),
            Var::Number(n) => format!("n{}", n),
            Var::Ref(ptr) => match self.heap.cells.get(&ptr) {
                Some(Cell::Primitive(p)) => {
                    let js_type = self.heap.type_cell(p.type_ptr)?.js_type;
                    match (js_type, &p.payload) {
                        (JsTypeTag::Undefined, _) => "undefined".to_string(),
                        (JsTypeTag::Null, _) => "null".to_string(),
                        (_, PrimitivePayload::Bool(b)) => b.to_string(),
                        (_, PrimitivePayload::Number(n)) => format!("n{}", n),
                        (_, PrimitivePayload::Int64(i)) => format!("l{}", i),
                        (_, PrimitivePayload::UInt64(u)) => format!("u{}", u),
                        (_, PrimitivePayload::Symbol(pid)) => format!("sym{}", pid.0),
                        (_, PrimitivePayload::String(s)) => format!("{:?}", s),
                    }
                }
                Some(Cell::Object(_)) => format!("#{}", self.ordinal(ptr)),
                _ => return Err(not_a(ptr, "value")),
            },
        })
    }

    fn ordinal(&mut self, ptr: LivePtr) -> usize {
        let next = self.ordinals.len();
        *self.ordinals.entry(ptr).or_insert_with(|| {
            self.queue.push_back(ptr);
            next
        })
    }

    fn refs(&mut self, ids: Vec<PtrId>) -> TtdResult<String> {
        let mut parts = Vec::with_capacity(ids.len());
        for id in ids {
            parts.push(self.value(Var::Ref(LivePtr::from(id)))?);
        }
        Ok(parts.join(","))
    }

    fn payload(&mut self, payload: &ObjectPayload) -> TtdResult<String> {
        Ok(match payload {
            ObjectPayload::None => String::new(),
            ObjectPayload::ScriptFunction(f) => {
                let name = self.heap.body_cell(LivePtr::from(f.body_id))?.name.clone();
                let mut scope = String::new();
                if let Some(scope_id) = f.scope_id {
                    for (kind, ptr) in self.heap.scope_cell(LivePtr::from(scope_id))?.entries.clone() {
                        let part = match kind {
                            ScopeType::SlotArray => {
                                let mut slots = Vec::new();
                                for v in self.heap.slot_array_cell(ptr)?.slots.clone() {
                                    slots.push(self.value(v)?);
                                }
                                format!("[{}]", slots.join(","))
                            }
                            _ => self.value(Var::Ref(ptr))?,
                        };
                        scope.push_str(&part);
                    }
                }
                format!("fn {} scope={}", name, scope)
            }
            ObjectPayload::ExternalFunction { display_name } => {
                format!("host {}", self.value(display_name.map_ref(LivePtr::from))?)
            }
            ObjectPayload::BoxedValue(v) => format!("box {}", self.value(v.map_ref(LivePtr::from))?),
            ObjectPayload::Date(t) => format!("date {}", t),
            ObjectPayload::Array(a) => {
                let mut parts = Vec::with_capacity(a.entries.len());
                for (i, v) in &a.entries {
                    parts.push(format!("{}:{}", i, self.value(v.map_ref(LivePtr::from))?));
                }
                format!("array {} [{}]", a.length, parts.join(","))
            }
            ObjectPayload::ArrayBuffer(bytes) => format!("buffer {:?}", bytes),
            other => format!("refs [{}]", self.refs(other.all_refs())?),
        })
    }

    fn drain(&mut self) -> TtdResult<()> {
        while let Some(ptr) = self.queue.pop_front() {
            let ordinal = self.ordinals.get(&ptr).copied().unwrap_or_default();
            let cell = self.heap.object(ptr)?.clone();
            let ty = self.heap.type_cell(cell.type_ptr)?.clone();
            let prototype = self.value(ty.prototype)?;
            let mut props = Vec::new();
            for (slot, entry) in self.heap.handler_cell(ty.handler)?.entries.clone().iter().enumerate() {
                if entry.kind == SlotKind::Clear {
                    continue;
                }
                let v = cell.slots.get(slot).copied().unwrap_or_default();
                props.push(format!("{}/{}={}", entry.property_id.0, entry.attributes, self.value(v)?));
            }
            let payload = self.payload(&cell.payload)?;
            let well_known = cell.well_known.as_ref().map(|t| t.to_string()).unwrap_or_default();
            let _ = writeln!(
                self.out,
                "#{} {:?} {:?}{} proto={} {{{}}} {}",
                ordinal,
                cell.tag,
                ty.js_type,
                well_known,
                prototype,
                props.join(","),
                payload
            );
        }
        Ok(())
    }
}

impl HeapWalker for ReferenceHeap {
    fn contexts(&self) -> TtdResult<Vec<SnapContext>> {
        let mut out = Vec::with_capacity(self.contexts.len());
        for ctx in &self.contexts {
            let mut roots: Vec<SnapRoot> = self
                .roots
                .iter()
                .filter(|(_, p)| self.object(**p).map(|o| o.context == ctx.global).unwrap_or(false))
                .map(|(tag, p)| SnapRoot {
                    ptr_id: (*p).into(),
                    log_tag: *tag,
                })
                .collect();
            roots.sort_by_key(|r| r.log_tag);
            out.push(SnapContext {
                context_tag: ctx.tag,
                random_seed0: ctx.random_seed0,
                random_seed1: ctx.random_seed1,
                uri: ctx.uri.clone(),
                global_object: ctx.global.into(),
                loaded_scripts: ctx.loaded.clone(),
                new_functions: Vec::new(),
                evals: Vec::new(),
                roots,
            });
        }
        Ok(out)
    }

    fn extra_roots(&self) -> TtdResult<Vec<LivePtr>> {
        Ok(self
            .pending_exception
            .and_then(|v| v.reference())
            .filter(|p| self.is_object(*p))
            .into_iter()
            .collect())
    }

    fn cell_kind(&self, ptr: LivePtr) -> TtdResult<CellKind> {
        match self.cells.get(&ptr) {
            Some(Cell::Object(_)) => Ok(CellKind::Object),
            Some(Cell::Primitive(_)) => Ok(CellKind::Primitive),
            _ => Err(TtdError::UnhandledObject(ptr.into())),
        }
    }

    fn object_tag(&self, ptr: LivePtr) -> TtdResult<SnapObjectType> {
        Ok(self.object(ptr)?.tag)
    }

    fn well_known_token(&self, ptr: LivePtr) -> TtdResult<Option<WellKnownToken>> {
        match self.cells.get(&ptr) {
            Some(Cell::Object(o)) => Ok(o.well_known.clone()),
            Some(Cell::Primitive(p)) => Ok(p.well_known.clone()),
            _ => Err(TtdError::UnhandledObject(ptr.into())),
        }
    }

    fn type_of(&self, ptr: LivePtr) -> TtdResult<TypeId> {
        match self.cells.get(&ptr) {
            Some(Cell::Object(o)) => Ok(TypeId(o.type_ptr.0)),
            Some(Cell::Primitive(p)) => Ok(TypeId(p.type_ptr.0)),
            _ => Err(TtdError::UnhandledObject(ptr.into())),
        }
    }

    fn describe_type(&self, id: TypeId) -> TtdResult<SnapType> {
        let ty = self.type_cell(LivePtr(id.0))?;
        Ok(SnapType {
            type_id: id,
            js_type: ty.js_type,
            context_tag: self.context_tag_of(ty.context)?,
            prototype: snap_value(ty.prototype),
            handler_id: Some(HandlerId(ty.handler.0)),
            has_no_enumerable_properties: ty.has_no_enumerable_properties,
        })
    }

    fn describe_handler(&self, id: HandlerId) -> TtdResult<SnapHandler> {
        let h = self.handler_cell(LivePtr(id.0))?;
        Ok(SnapHandler {
            handler_id: id,
            inline_slot_capacity: h.inline_slot_capacity,
            total_slot_capacity: h.total_slot_capacity,
            is_extensible: h.is_extensible,
            entries: h.entries.clone(),
        })
    }

    fn read_slots(&self, ptr: LivePtr) -> TtdResult<Vec<SnapVar>> {
        Ok(self.object(ptr)?.slots.iter().map(|v| snap_value(*v)).collect())
    }

    fn indexed_array(&self, ptr: LivePtr) -> TtdResult<Option<PtrId>> {
        Ok(self.object(ptr)?.indexed.map(PtrId::from))
    }

    fn read_payload(&self, ptr: LivePtr) -> TtdResult<ObjectPayload> {
        Ok(self.object(ptr)?.payload.clone())
    }

    fn read_primitive(&self, ptr: LivePtr) -> TtdResult<PrimitivePayload> {
        self.primitive(ptr)
            .map(|p| p.payload.clone())
            .ok_or_else(|| not_a(ptr, "primitive"))
    }

    fn object_tags(&self, ptr: LivePtr) -> TtdResult<(LogTag, IdentityTag)> {
        match self.cells.get(&ptr) {
            Some(Cell::Object(o)) => Ok((o.log_tag, o.identity_tag)),
            Some(Cell::Primitive(p)) => Ok((p.log_tag, IdentityTag::INVALID)),
            _ => Err(TtdError::UnhandledObject(ptr.into())),
        }
    }

    fn describe_function_body(&self, id: PtrId) -> TtdResult<FunctionBodyResolveInfo> {
        let body = self.body_cell(id.into())?;
        Ok(FunctionBodyResolveInfo {
            function_body_id: id,
            context_tag: self.context_tag_of(body.context)?,
            name: body.name.clone(),
            known_path: body.known_path.clone(),
            parent_body_id: body.parent.map(PtrId::from),
            top_level_body_counter: body.top_level_body_counter,
            line: body.line,
            column: body.column,
        })
    }

    fn describe_scope(&self, id: PtrId) -> TtdResult<ScriptFunctionScopeInfo> {
        let scope = self.scope_cell(id.into())?;
        Ok(ScriptFunctionScopeInfo {
            scope_id: id,
            context_tag: self.context_tag_of(scope.context)?,
            entries: scope
                .entries
                .iter()
                .map(|(scope_type, ptr)| ScopeEntry {
                    scope_type: *scope_type,
                    id: (*ptr).into(),
                })
                .collect(),
        })
    }

    fn describe_slot_array(&self, id: PtrId) -> TtdResult<SlotArrayInfo> {
        let slots = self.slot_array_cell(id.into())?;
        Ok(SlotArrayInfo {
            slot_id: id,
            context_tag: self.context_tag_of(slots.context)?,
            slots: slots.slots.iter().map(|v| snap_value(*v)).collect(),
            debug_property_ids: slots.debug_property_ids.clone(),
            function_body_id: slots.body.map(PtrId::from),
        })
    }

    fn memory_stats(&self) -> (u64, u64) {
        (
            self.cells.len() as u64 * CELL_ALIGN,
            self.next_addr - FIRST_ADDR,
        )
    }
}

fn construct_payload(tag: SnapObjectType, kind: &ConstructKind) -> TtdResult<ObjectPayload> {
    use SnapObjectType as T;
    Ok(match kind {
        ConstructKind::Plain => match tag {
            T::BoxedValue => ObjectPayload::BoxedValue(Var::Invalid),
            T::Set => ObjectPayload::Set(Vec::new()),
            T::Map => ObjectPayload::Map(Vec::new()),
            T::Promise => ObjectPayload::Promise(PromiseInfo {
                status: PromiseStatus::Pending,
                is_handled: false,
                result: Var::Invalid,
                resolve_reactions: Vec::new(),
                reject_reactions: Vec::new(),
            }),
            _ => ObjectPayload::None,
        },
        ConstructKind::ScriptFunction {
            body,
            has_super_reference,
        } => ObjectPayload::ScriptFunction(ScriptFunctionInfo {
            body_id: (*body).into(),
            scope_id: None,
            home_object: None,
            computed_name: Var::Invalid,
            has_super_reference: *has_super_reference,
        }),
        ConstructKind::ExternalFunction { display_name } => ObjectPayload::ExternalFunction {
            display_name: snap_value(*display_name),
        },
        ConstructKind::RevokerFunction { proxy } => ObjectPayload::RevokerFunction {
            proxy: proxy.map(PtrId::from),
        },
        ConstructKind::BoundFunction {
            target,
            bound_this,
            args,
        } => ObjectPayload::BoundFunction(BoundFunctionInfo {
            target: (*target).into(),
            bound_this: snap_value(*bound_this),
            args: args.iter().map(|a| snap_value(*a)).collect(),
        }),
        ConstructKind::HeapArguments {
            number_of_arguments,
            formal_count,
            frame_object,
            deleted_args,
        } => ObjectPayload::HeapArguments(HeapArgumentsInfo {
            number_of_arguments: *number_of_arguments,
            formal_count: *formal_count,
            frame_object: frame_object.map(PtrId::from),
            deleted_args: deleted_args.clone(),
        }),
        ConstructKind::Date(t) => ObjectPayload::Date(*t),
        ConstructKind::Regex {
            pattern,
            flags,
            last_index,
        } => ObjectPayload::Regex(RegexInfo {
            pattern: pattern.clone(),
            flags: *flags,
            last_index: snap_value(*last_index),
        }),
        ConstructKind::Array { length } => {
            let length = *length;
            match tag {
                T::Array => ObjectPayload::Array(ArrayInfo {
                    length,
                    entries: Vec::new(),
                }),
                T::NativeIntArray => ObjectPayload::NativeIntArray(ArrayInfo {
                    length,
                    entries: Vec::new(),
                }),
                T::NativeFloatArray => ObjectPayload::NativeFloatArray(ArrayInfo {
                    length,
                    entries: Vec::new(),
                }),
                T::ES5Array => ObjectPayload::ES5Array(ES5ArrayInfo {
                    elements: ArrayInfo {
                        length,
                        entries: Vec::new(),
                    },
                    accessors: Vec::new(),
                    is_length_writable: true,
                }),
                _ => return Err(TtdError::PolicyViolation("array construction for a non-array kind")),
            }
        }
        ConstructKind::ArrayBuffer(bytes) => ObjectPayload::ArrayBuffer(bytes.clone()),
        ConstructKind::TypedArray {
            buffer,
            byte_offset,
            length,
        } => ObjectPayload::TypedArray(TypedArrayInfo {
            byte_offset: *byte_offset,
            length: *length,
            buffer: (*buffer).into(),
        }),
        ConstructKind::Proxy { handler, target } => ObjectPayload::Proxy {
            handler: handler.map(PtrId::from),
            target: target.map(PtrId::from),
        },
        ConstructKind::PromiseResolveOrReject {
            promise,
            is_reject,
            already_resolved,
        } => ObjectPayload::PromiseResolveOrReject(PromiseResolveOrRejectInfo {
            promise: (*promise).into(),
            is_reject: *is_reject,
            already_resolved: *already_resolved,
        }),
        ConstructKind::PromiseReactionTask { reaction, argument } => {
            ObjectPayload::PromiseReactionTask(PromiseReactionTaskInfo {
                reaction: snap_reaction(reaction),
                argument: snap_value(*argument),
            })
        }
        ConstructKind::PromiseAllResolveElement {
            capability,
            index,
            remaining_elements,
            values,
            already_called,
        } => ObjectPayload::PromiseAllResolveElement(PromiseAllResolveElementInfo {
            capability: snap_capability(capability),
            index: *index,
            remaining_elements: *remaining_elements,
            values: (*values).into(),
            already_called: *already_called,
        }),
    })
}

impl HeapBuilder for ReferenceHeap {
    fn context_created_or_destroyed_in_replay(&self) -> bool {
        self.context_churn
    }

    fn unload_contexts(&mut self) -> TtdResult<()> {
        let dropped = self.cells.len();
        self.cells.clear();
        self.contexts.clear();
        self.roots.clear();
        self.transitions.clear();
        self.callbacks.clear();
        self.pending_exception = None;
        self.open_calls.clear();
        self.call_depth = 0;
        self.context_churn = false;
        debug!(dropped, "contexts unloaded");
        Ok(())
    }

    fn inflate_context(&mut self, ctx: &SnapContext, scripts: &TopLevelScripts) -> TtdResult<LivePtr> {
        for body in ctx.all_loaded_bodies() {
            if scripts.find(body.body_counter_id).is_none() {
                return Err(TtdError::MissingInflateTarget {
                    what: "top-level script",
                    id: body.body_counter_id,
                });
            }
        }
        let c = match self.context_index(ctx.context_tag) {
            Ok(c) => c,
            Err(_) => self.build_context(ctx.context_tag, &ctx.uri, (ctx.random_seed0, ctx.random_seed1))?,
        };
        let global = self.contexts[c].global;
        let cells = &self.cells;
        self.roots.retain(|_, p| match cells.get(p) {
            Some(Cell::Object(o)) => o.context != global,
            _ => false,
        });

        // Reused bodies are never reconstructed, so loads they satisfy stay put
        let wanted: Vec<LoadedBody> = ctx.all_loaded_bodies().copied().collect();
        let state = &mut self.contexts[c];
        state.uri = ctx.uri.clone();
        state.random_seed0 = ctx.random_seed0;
        state.random_seed1 = ctx.random_seed1;
        state
            .loaded
            .retain(|b| wanted.iter().any(|w| w.body_counter_id == b.body_counter_id));
        let kept: Vec<u64> = state.loaded.iter().map(|b| b.body_counter_id).collect();
        state.pending_loads = wanted
            .into_iter()
            .filter(|w| !kept.contains(&w.body_counter_id))
            .collect();

        self.open_calls.clear();
        self.callbacks.clear();
        self.pending_exception = None;
        self.call_depth = 0;
        Ok(global)
    }

    fn construct_handler(&mut self, handler: &SnapHandler) -> TtdResult<LivePtr> {
        Ok(self.alloc(Cell::Handler(HandlerCell {
            inline_slot_capacity: handler.inline_slot_capacity,
            total_slot_capacity: handler.total_slot_capacity,
            is_extensible: handler.is_extensible,
            entries: handler.entries.clone(),
        })))
    }

    fn construct_type(&mut self, ty: &SnapType, handler: Option<LivePtr>, context: LivePtr) -> TtdResult<LivePtr> {
        let handler = match handler {
            Some(h) => h,
            None => self.alloc(Cell::Handler(HandlerCell::empty())),
        };
        Ok(self.alloc(Cell::Type(TypeCell {
            js_type: ty.js_type,
            context,
            prototype: Var::Invalid,
            handler,
            has_no_enumerable_properties: ty.has_no_enumerable_properties,
        })))
    }

    fn set_type_prototype(&mut self, ty: LivePtr, prototype: LiveValue) -> TtdResult<()> {
        self.type_cell_mut(ty)?.prototype = prototype;
        Ok(())
    }

    fn construct_function_body(
        &mut self,
        info: &FunctionBodyResolveInfo,
        parent: Option<LivePtr>,
        context: LivePtr,
        scripts: &TopLevelScripts,
    ) -> TtdResult<LivePtr> {
        if parent.is_none() && scripts.find(info.top_level_body_counter).is_none() {
            return Err(TtdError::MissingInflateTarget {
                what: "top-level script",
                id: info.top_level_body_counter,
            });
        }
        let live = self.alloc(Cell::Body(BodyCell {
            context,
            name: info.name.clone(),
            known_path: info.known_path.clone(),
            parent,
            top_level_body_counter: info.top_level_body_counter,
            line: info.line,
            column: info.column,
        }));
        let c = self.context_index_of_global(context)?;
        let state = &mut self.contexts[c];
        if let Some(pos) = state
            .pending_loads
            .iter()
            .position(|b| b.function_body_id == info.function_body_id)
        {
            let load = state.pending_loads.remove(pos);
            state.loaded.push(LoadedBody {
                body_counter_id: load.body_counter_id,
                function_body_id: live.into(),
            });
        }
        Ok(live)
    }

    fn construct_primitive(&mut self, value: &SnapPrimitiveValue, ty: LivePtr) -> TtdResult<LivePtr> {
        let context = self.type_cell(ty)?.context;
        Ok(self.alloc(Cell::Primitive(PrimitiveCell {
            type_ptr: ty,
            context,
            well_known: None,
            payload: value.payload.clone(),
            log_tag: LogTag::INVALID,
        })))
    }

    fn resolve_well_known(&mut self, context: LivePtr, token: &WellKnownToken) -> TtdResult<LivePtr> {
        let c = self.context_index_of_global(context)?;
        self.builtin(c, token.as_str())
    }

    fn can_reuse_object(&self, ptr: LivePtr, tag: SnapObjectType) -> bool {
        matches!(self.cells.get(&ptr), Some(Cell::Object(o)) if o.tag == tag)
    }

    fn reset_object(&mut self, ptr: LivePtr, ty: LivePtr) -> TtdResult<()> {
        let cell = self.object_mut(ptr)?;
        cell.type_ptr = ty;
        cell.slots.clear();
        cell.indexed = None;
        cell.log_tag = LogTag::INVALID;
        cell.identity_tag = IdentityTag::INVALID;
        if let ObjectPayload::ScriptFunction(f) = &mut cell.payload {
            f.scope_id = None;
            f.home_object = None;
            f.computed_name = Var::Invalid;
        }
        self.roots.retain(|_, p| *p != ptr);
        Ok(())
    }

    fn construct(&mut self, shape: &ConstructShape) -> TtdResult<LivePtr> {
        let payload = construct_payload(shape.tag, &shape.kind)?;
        self.context_index_of_global(shape.context)?;
        Ok(self.alloc(Cell::Object(ObjectCell::new(
            shape.tag,
            shape.type_ptr,
            shape.context,
            payload,
        ))))
    }

    fn set_object_tags(&mut self, ptr: LivePtr, log_tag: LogTag, identity_tag: IdentityTag) -> TtdResult<()> {
        match self.cells.get_mut(&ptr) {
            Some(Cell::Object(o)) => {
                o.log_tag = log_tag;
                o.identity_tag = identity_tag;
                Ok(())
            }
            Some(Cell::Primitive(p)) => {
                p.log_tag = log_tag;
                Ok(())
            }
            _ => Err(not_a(ptr, "value")),
        }
    }

    fn construct_slot_array(
        &mut self,
        info: &SlotArrayInfo,
        values: Vec<LiveValue>,
        body: Option<LivePtr>,
    ) -> TtdResult<LivePtr> {
        let context = self.contexts[self.context_index(info.context_tag)?].global;
        Ok(self.alloc(Cell::SlotArray(SlotArrayCell {
            context,
            slots: values,
            debug_property_ids: info.debug_property_ids.clone(),
            body,
        })))
    }

    fn construct_scope(
        &mut self,
        info: &ScriptFunctionScopeInfo,
        entries: Vec<(ScopeType, LivePtr)>,
    ) -> TtdResult<LivePtr> {
        let context = self.contexts[self.context_index(info.context_tag)?].global;
        Ok(self.alloc(Cell::Scope(ScopeCell { context, entries })))
    }

    fn instantiate_additional(&mut self, ptr: LivePtr, values: AdditionalValues) -> TtdResult<()> {
        let cell = self.object_mut(ptr)?;
        match (&mut cell.payload, values) {
            (
                ObjectPayload::ScriptFunction(f),
                AdditionalValues::ScriptFunction {
                    scope,
                    home_object,
                    computed_name,
                },
            ) => {
                f.scope_id = scope.map(PtrId::from);
                f.home_object = home_object.map(PtrId::from);
                f.computed_name = snap_value(computed_name);
            }
            (ObjectPayload::BoxedValue(v), AdditionalValues::BoxedValue(value)) => *v = snap_value(value),
            (ObjectPayload::Array(a), AdditionalValues::Elements(elements)) => {
                a.entries = snap_elements(elements)
            }
            (ObjectPayload::NativeIntArray(a), AdditionalValues::IntElements(elements)) => a.entries = elements,
            (ObjectPayload::NativeFloatArray(a), AdditionalValues::FloatElements(elements)) => {
                a.entries = elements
            }
            (
                ObjectPayload::ES5Array(a),
                AdditionalValues::ES5Array {
                    elements,
                    accessors,
                    is_length_writable,
                },
            ) => {
                a.elements.entries = snap_elements(elements);
                a.accessors = accessors
                    .iter()
                    .map(|acc| crate::snapshot::AccessorEntry {
                        index: acc.index,
                        getter: acc.getter.map(PtrId::from),
                        setter: acc.setter.map(PtrId::from),
                        attributes: acc.attributes,
                    })
                    .collect();
                a.is_length_writable = is_length_writable;
            }
            (ObjectPayload::Set(set), AdditionalValues::SetValues(values)) => {
                *set = values.into_iter().map(snap_value).collect()
            }
            (ObjectPayload::Map(map), AdditionalValues::MapEntries(entries)) => {
                *map = entries
                    .into_iter()
                    .map(|(k, v)| (snap_value(k), snap_value(v)))
                    .collect()
            }
            (
                ObjectPayload::Promise(p),
                AdditionalValues::Promise {
                    status,
                    is_handled,
                    result,
                    resolve_reactions,
                    reject_reactions,
                },
            ) => {
                p.status = status;
                p.is_handled = is_handled;
                p.result = snap_value(result);
                p.resolve_reactions = resolve_reactions.iter().map(snap_reaction).collect();
                p.reject_reactions = reject_reactions.iter().map(snap_reaction).collect();
            }
            _ => {
                return Err(TtdError::PolicyViolation(
                    "deferred values do not match the object kind",
                ))
            }
        }
        Ok(())
    }

    fn restore_slots(&mut self, ptr: LivePtr, values: Vec<LiveValue>, indexed: Option<LivePtr>) -> TtdResult<()> {
        let cell = self.object_mut(ptr)?;
        cell.slots = values;
        cell.indexed = indexed;
        Ok(())
    }

    fn relink_roots(&mut self, context: LivePtr, roots: &[(LivePtr, LogTag)]) -> TtdResult<()> {
        self.context_index_of_global(context)?;
        for (ptr, tag) in roots {
            self.roots.insert(*tag, *ptr);
        }
        trace!(context = %context, roots = roots.len(), "roots relinked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{SnapShot, SnapshotExtractor};

    fn heap_with_context() -> (ReferenceHeap, LogTag) {
        let mut heap = ReferenceHeap::new();
        let tag = LogTag(1);
        heap.build_context(tag, "main.js", (1, 2)).unwrap();
        (heap, tag)
    }

    fn extract(heap: &ReferenceHeap) -> SnapShot {
        SnapshotExtractor::new().extract(heap, 0.0).unwrap()
    }

    #[test]
    fn test_property_ids_are_stable_and_named() {
        assert_eq!(property_id("x"), property_id("x"));
        assert_ne!(property_id("x"), property_id("y"));
        assert_ne!(property_id("x").0 & NAMED_PROPERTY_BIT, 0);
    }

    #[test]
    fn test_put_lookup_and_remove() {
        let (mut heap, ctx) = heap_with_context();
        let c = heap.context_index(ctx).unwrap();
        let a = heap
            .new_object_cell(c, SnapObjectType::Dynamic, JsTypeTag::Object, ObjectPayload::None)
            .unwrap();
        let b = heap
            .new_object_cell(c, SnapObjectType::Dynamic, JsTypeTag::Object, ObjectPayload::None)
            .unwrap();
        let x = property_id("x");
        heap.put_property(a, x, Var::Int(1), DEFAULT_ATTRIBUTES).unwrap();
        heap.put_property(b, x, Var::Int(2), DEFAULT_ATTRIBUTES).unwrap();
        // same transition from the same starting type
        assert_eq!(heap.object(a).unwrap().type_ptr, heap.object(b).unwrap().type_ptr);
        assert_eq!(heap.get_own_property(a, x).unwrap(), Some(Var::Int(1)));

        heap.set_prototype(b, Var::Ref(a)).unwrap();
        let y = property_id("y");
        heap.put_property(a, y, Var::Number(0.5), DEFAULT_ATTRIBUTES).unwrap();
        assert_eq!(heap.lookup_property(b, y).unwrap(), Some(Var::Number(0.5)));

        assert!(heap.remove_property(a, x).unwrap());
        assert!(!heap.remove_property(a, x).unwrap());
        assert_eq!(heap.get_own_property(a, x).unwrap(), None);
        assert_eq!(heap.get_own_property(a, y).unwrap(), Some(Var::Number(0.5)));
    }

    #[test]
    fn test_extract_marks_builtins_as_well_known() {
        let (heap, _) = heap_with_context();
        let snap = extract(&heap);
        let tokens: Vec<String> = snap
            .objects
            .iter()
            .filter_map(|o| o.optional_well_known_token.as_ref().map(|t| t.as_str().to_string()))
            .collect();
        assert!(tokens.contains(&GLOBAL.to_string()));
        assert!(tokens.contains(&OBJECT_PROTOTYPE.to_string()));
        assert!(snap.objects.iter().all(|o| o.is_well_known()));
        assert_eq!(snap.contexts[0].random_seed0, 1);
    }

    #[test]
    fn test_inflate_into_fresh_heap_matches_fingerprint() {
        let (mut heap, ctx) = heap_with_context();
        let c = heap.context_index(ctx).unwrap();
        let global = heap.context_global(ctx).unwrap();
        let obj = heap
            .new_object_cell(c, SnapObjectType::Dynamic, JsTypeTag::Object, ObjectPayload::None)
            .unwrap();
        let s = heap.new_primitive(c, JsTypeTag::String, PrimitivePayload::String("v".into())).unwrap();
        heap.put_property(obj, property_id("name"), Var::Ref(s), DEFAULT_ATTRIBUTES).unwrap();
        heap.put_property(global, property_id("o"), Var::Ref(obj), DEFAULT_ATTRIBUTES).unwrap();
        heap.object_mut(obj).unwrap().log_tag = LogTag(7);
        heap.roots.insert(LogTag(7), obj);

        let snap = extract(&heap);
        let mut map = InflateMap::new();
        map.prep_for_initial_inflate(snap.inflate_counts());
        let mut fresh = ReferenceHeap::new();
        snap.inflate(&mut map, &mut fresh, &TopLevelScripts::default()).unwrap();
        map.cleanup_after_inflate();

        assert_eq!(fresh.fingerprint().unwrap(), heap.fingerprint().unwrap());
        assert!(fresh.roots.contains_key(&LogTag(7)));
    }

    #[test]
    fn test_collect_frees_unreachable_cells() {
        let (mut heap, ctx) = heap_with_context();
        let c = heap.context_index(ctx).unwrap();
        let kept = heap
            .new_object_cell(c, SnapObjectType::Dynamic, JsTypeTag::Object, ObjectPayload::None)
            .unwrap();
        heap.roots.insert(LogTag(3), kept);
        let garbage = heap
            .new_object_cell(c, SnapObjectType::Date, JsTypeTag::Date, ObjectPayload::Date(1.0))
            .unwrap();
        let freed = heap.collect(&InflateMap::new());
        assert!(freed >= 1);
        assert!(heap.is_object(kept));
        assert!(!heap.is_object(garbage));
        assert_eq!(heap.gc_stats().collections, 1);
    }

    #[test]
    fn test_construct_rejects_unknown_context() {
        let (mut heap, _) = heap_with_context();
        let shape = ConstructShape {
            tag: SnapObjectType::Date,
            type_ptr: LivePtr(0x10),
            context: LivePtr(0x10),
            kind: ConstructKind::Date(3.0),
        };
        assert!(heap.construct(&shape).is_err());
    }
}
